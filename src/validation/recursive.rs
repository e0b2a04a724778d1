//! Recursive comparison of nested outputs
//!
//! Answers "is ANY leaf pair close", not "are ALL leaf pairs close":
//! containers fold their children with a short-circuiting OR, while a leaf
//! pair that is not close is an error rather than `false`. A close leaf
//! therefore stops its siblings from being compared at all, and a non-close
//! leaf reached before any close one aborts the whole call.

use anyhow::{Context, Result};

use super::close::{assert_close, CloseError};
use super::outputs::Outputs;

/// Default absolute tolerance
pub const DEFAULT_ATOL: f64 = 1e-4;
/// Default relative tolerance
pub const DEFAULT_RTOL: f64 = 1e-4;

/// Walk `eager` and `exported` in parallel.
///
/// - tensor: [`assert_close`], then `Ok(true)`
/// - sequence: pairs in order (up to the shorter length), OR-folded
/// - mapping: eager keys in insertion order, OR-folded
/// - none: `Ok(false)` without looking at `exported`
///
/// `atol`/`rtol` only apply when the top-level values are tensors; every
/// element of a container is compared with [`DEFAULT_ATOL`] / [`DEFAULT_RTOL`].
/// Structural mismatches surface as [`CloseError::StructureMismatch`] /
/// [`CloseError::MissingKey`].
pub fn check_close_recursively(
    eager: &Outputs,
    exported: &Outputs,
    atol: f64,
    rtol: f64,
) -> Result<bool> {
    check_at("outputs", eager, exported, atol, rtol)
}

fn check_at(path: &str, eager: &Outputs, exported: &Outputs, atol: f64, rtol: f64) -> Result<bool> {
    match eager {
        Outputs::Tensor(eager_tensor) => {
            let exported_tensor = exported
                .as_tensor()
                .ok_or_else(|| structure_mismatch(path, eager, exported))?;
            assert_close(eager_tensor, exported_tensor, atol, rtol)
                .with_context(|| format!("Comparing {}", path))?;
            Ok(true)
        }
        Outputs::Sequence(eager_items) => {
            let Outputs::Sequence(exported_items) = exported else {
                return Err(structure_mismatch(path, eager, exported).into());
            };

            let mut is_close = false;
            for (i, (e, x)) in eager_items.iter().zip(exported_items).enumerate() {
                is_close = is_close || check_nested(&format!("{}[{}]", path, i), e, x)?;
            }
            Ok(is_close)
        }
        Outputs::Mapping(eager_map) => {
            let Outputs::Mapping(exported_map) = exported else {
                return Err(structure_mismatch(path, eager, exported).into());
            };

            let mut is_close = false;
            for (key, e) in eager_map {
                is_close = is_close || {
                    let x = exported_map.get(key).ok_or_else(|| CloseError::MissingKey {
                        path: path.to_string(),
                        key: key.clone(),
                    })?;
                    check_nested(&format!("{}['{}']", path, key), e, x)?
                };
            }
            Ok(is_close)
        }
        Outputs::None => Ok(false),
    }
}

/// Container elements are always compared at the default tolerances
fn check_nested(path: &str, eager: &Outputs, exported: &Outputs) -> Result<bool> {
    check_at(path, eager, exported, DEFAULT_ATOL, DEFAULT_RTOL)
}

fn structure_mismatch(path: &str, eager: &Outputs, exported: &Outputs) -> CloseError {
    CloseError::StructureMismatch {
        path: path.to_string(),
        eager: eager.kind(),
        exported: exported.kind(),
    }
}
