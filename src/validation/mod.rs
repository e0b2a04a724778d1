//! Closeness oracle
//!
//! Tools for comparing exported-model outputs against eager reference outputs:
//! - Outputs: nested tensor trees (and loading them from golden dumps)
//! - assert_close: leaf tensor comparison with tolerance
//! - check_close_recursively: OR-folded walk over two trees

mod close;
mod golden;
mod outputs;
mod recursive;

pub use close::{assert_close, CloseError, MismatchReport};
pub use outputs::Outputs;
pub use recursive::{check_close_recursively, DEFAULT_ATOL, DEFAULT_RTOL};
