//! Leaf tensor comparison
//!
//! Same contract as `torch.testing.assert_close` with explicit tolerances:
//! shape, dtype and device must match, and every element pair `(a, b)`
//! (eager, exported) must satisfy `a == b || |a - b| <= atol + rtol * |b|`.
//! NaN never compares close.

use anyhow::Result;
use candle_core::{DType, Tensor};
use std::fmt;
use thiserror::Error;

use crate::utils::device_utils::device_name;
use crate::utils::shape_utils::{format_index, unravel_index};

/// Why two outputs were judged not close
#[derive(Debug, Clone, Error)]
pub enum CloseError {
    /// Tensors have different shapes
    #[error("The values for attribute 'shape' do not match: {eager:?} != {exported:?}.")]
    ShapeMismatch {
        eager: Vec<usize>,
        exported: Vec<usize>,
    },

    /// Tensors have different dtypes
    #[error("The values for attribute 'dtype' do not match: {eager:?} != {exported:?}.")]
    DTypeMismatch { eager: DType, exported: DType },

    /// Tensors live on different devices
    #[error("The values for attribute 'device' do not match: {eager} != {exported}.")]
    DeviceMismatch { eager: String, exported: String },

    /// At least one element pair is outside tolerance
    #[error("Tensor-likes are not close!\n\n{0}")]
    NotClose(MismatchReport),

    /// The two trees have different shapes at `path`
    #[error("Structure mismatch at {path}: eager is a {eager}, exported is a {exported}")]
    StructureMismatch {
        path: String,
        eager: &'static str,
        exported: &'static str,
    },

    /// The exported mapping lacks a key the eager mapping has
    #[error("Exported outputs at {path} have no key '{key}'")]
    MissingKey { path: String, key: String },
}

/// Element-level summary of a failed comparison
#[derive(Debug, Clone, PartialEq)]
pub struct MismatchReport {
    /// Element pairs outside tolerance
    pub mismatched: usize,
    /// Elements compared
    pub total: usize,
    /// Largest `|a - b|`
    pub max_abs_diff: f64,
    /// Where `max_abs_diff` occurs
    pub max_abs_index: Vec<usize>,
    /// Largest `|a - b| / |b|`
    pub max_rel_diff: f64,
    /// Where `max_rel_diff` occurs
    pub max_rel_index: Vec<usize>,
    /// Absolute tolerance used
    pub atol: f64,
    /// Relative tolerance used
    pub rtol: f64,
}

impl fmt::Display for MismatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pct = 100.0 * self.mismatched as f64 / self.total.max(1) as f64;
        writeln!(
            f,
            "Mismatched elements: {} / {} ({:.1}%)",
            self.mismatched, self.total, pct
        )?;
        writeln!(
            f,
            "Greatest absolute difference: {} at index {} (up to {} allowed)",
            self.max_abs_diff,
            format_index(&self.max_abs_index),
            self.atol
        )?;
        write!(
            f,
            "Greatest relative difference: {} at index {} (up to {} allowed)",
            self.max_rel_diff,
            format_index(&self.max_rel_index),
            self.rtol
        )
    }
}

/// Fail unless `eager` and `exported` are close within `atol`/`rtol`.
///
/// Errors are [`CloseError`] (inside `anyhow::Error`, use `downcast_ref`)
/// for comparison failures, or the underlying candle error if the data
/// cannot be read.
pub fn assert_close(eager: &Tensor, exported: &Tensor, atol: f64, rtol: f64) -> Result<()> {
    if eager.dims() != exported.dims() {
        return Err(CloseError::ShapeMismatch {
            eager: eager.dims().to_vec(),
            exported: exported.dims().to_vec(),
        }
        .into());
    }
    if eager.dtype() != exported.dtype() {
        return Err(CloseError::DTypeMismatch {
            eager: eager.dtype(),
            exported: exported.dtype(),
        }
        .into());
    }
    if !eager.device().same_device(exported.device()) {
        return Err(CloseError::DeviceMismatch {
            eager: device_name(eager.device()),
            exported: device_name(exported.device()),
        }
        .into());
    }

    let actual = to_f64_vec(eager)?;
    let expected = to_f64_vec(exported)?;

    match compare_values(&actual, &expected, eager.dims(), atol, rtol) {
        None => Ok(()),
        Some(report) => Err(CloseError::NotClose(report).into()),
    }
}

fn to_f64_vec(t: &Tensor) -> Result<Vec<f64>> {
    Ok(t.flatten_all()?.to_dtype(DType::F64)?.to_vec1::<f64>()?)
}

/// Element closeness
fn is_close(a: f64, b: f64, atol: f64, rtol: f64) -> bool {
    if a == b {
        return true;
    }
    if !a.is_finite() || !b.is_finite() {
        return false;
    }
    (a - b).abs() <= atol + rtol * b.abs()
}

/// Compare flat row-major data; `None` when every pair is close
pub(crate) fn compare_values(
    actual: &[f64],
    expected: &[f64],
    dims: &[usize],
    atol: f64,
    rtol: f64,
) -> Option<MismatchReport> {
    let mut mismatched = 0;
    let mut max_abs = (0.0f64, 0usize);
    let mut max_rel = (0.0f64, 0usize);

    for (i, (&a, &b)) in actual.iter().zip(expected.iter()).enumerate() {
        if !is_close(a, b, atol, rtol) {
            mismatched += 1;
        }

        let abs_diff = (a - b).abs();
        if abs_diff > max_abs.0 {
            max_abs = (abs_diff, i);
        }
        let rel_diff = abs_diff / b.abs();
        if rel_diff > max_rel.0 {
            max_rel = (rel_diff, i);
        }
    }

    if mismatched == 0 {
        return None;
    }

    Some(MismatchReport {
        mismatched,
        total: expected.len(),
        max_abs_diff: max_abs.0,
        max_abs_index: unravel_index(max_abs.1, dims),
        max_rel_diff: max_rel.0,
        max_rel_index: unravel_index(max_rel.1, dims),
        atol,
        rtol,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn tensor(data: &[f32], shape: &[usize]) -> Tensor {
        Tensor::from_slice(data, shape, &Device::Cpu).unwrap()
    }

    fn close_error(result: Result<()>) -> CloseError {
        result
            .unwrap_err()
            .downcast_ref::<CloseError>()
            .cloned()
            .expect("expected a CloseError")
    }

    #[test]
    fn test_identical_tensors() {
        let a = tensor(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        assert_close(&a, &a.clone(), 1e-4, 1e-4).unwrap();
    }

    #[test]
    fn test_within_absolute_tolerance() {
        let a = tensor(&[0.0, 0.0], &[2]);
        let b = tensor(&[0.00005, -0.00005], &[2]);
        assert_close(&a, &b, 1e-4, 0.0).unwrap();
    }

    #[test]
    fn test_relative_tolerance_scales_with_exported() {
        let a = tensor(&[1000.05], &[1]);
        let b = tensor(&[1000.0], &[1]);
        assert_close(&a, &b, 0.0, 1e-4).unwrap();
        assert!(assert_close(&a, &b, 0.0, 1e-5).is_err());
    }

    #[test]
    fn test_report_locates_worst_element() {
        let a = tensor(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let b = tensor(&[1.0, 2.5, 3.0, 4.0], &[2, 2]);

        match close_error(assert_close(&a, &b, 1e-4, 1e-4)) {
            CloseError::NotClose(report) => {
                assert_eq!(report.mismatched, 1);
                assert_eq!(report.total, 4);
                assert!((report.max_abs_diff - 0.5).abs() < 1e-12);
                assert_eq!(report.max_abs_index, vec![0, 1]);
                assert!((report.max_rel_diff - 0.2).abs() < 1e-12);
                let message = report.to_string();
                assert!(message.contains("Mismatched elements: 1 / 4 (25.0%)"));
                assert!(message.contains("at index (0, 1)"));
            }
            other => panic!("Expected NotClose, got {:?}", other),
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let a = tensor(&[1.0, 2.0], &[2]);
        let b = tensor(&[1.0, 2.0], &[1, 2]);
        match close_error(assert_close(&a, &b, 1e-4, 1e-4)) {
            CloseError::ShapeMismatch { eager, exported } => {
                assert_eq!(eager, vec![2]);
                assert_eq!(exported, vec![1, 2]);
            }
            other => panic!("Expected ShapeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_dtype_mismatch() {
        let a = tensor(&[1.0, 2.0], &[2]);
        let b = a.to_dtype(DType::F64).unwrap();
        assert!(matches!(
            close_error(assert_close(&a, &b, 1e-4, 1e-4)),
            CloseError::DTypeMismatch { .. }
        ));
    }

    #[test]
    fn test_nan_is_never_close() {
        let a = tensor(&[f32::NAN], &[1]);
        assert!(assert_close(&a, &a.clone(), 1.0, 1.0).is_err());
    }

    #[test]
    fn test_matching_infinities_are_close() {
        let a = tensor(&[f32::INFINITY, f32::NEG_INFINITY], &[2]);
        assert_close(&a, &a.clone(), 0.0, 0.0).unwrap();

        let b = tensor(&[f32::INFINITY, f32::INFINITY], &[2]);
        assert!(assert_close(&a, &b, 1e9, 1e9).is_err());
    }

    #[test]
    fn test_integer_tensors() {
        let a = Tensor::new(&[1u32, 2, 3], &Device::Cpu).unwrap();
        let b = Tensor::new(&[1u32, 2, 4], &Device::Cpu).unwrap();
        assert_close(&a, &a.clone(), 0.0, 0.0).unwrap();
        assert!(assert_close(&a, &b, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_scalar_tensors() {
        let a = Tensor::new(1.0f32, &Device::Cpu).unwrap();
        let b = Tensor::new(1.00001f32, &Device::Cpu).unwrap();
        assert_close(&a, &b, 1e-4, 1e-4).unwrap();
    }

    #[test]
    fn test_compare_values_all_close() {
        let data = [1.0, -2.0, 3.5];
        assert!(compare_values(&data, &data, &[3], 0.0, 0.0).is_none());
    }
}
