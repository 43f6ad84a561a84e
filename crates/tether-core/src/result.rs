//! Result type aliases

use crate::error::TetherError;

/// Standard Result type for Tether operations
pub type TetherResult<T> = Result<T, TetherError>;
