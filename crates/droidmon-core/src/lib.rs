//! # droidmon-core - Core Domain Types
//!
//! Foundation crate for droidmon. Provides error handling, the shared retry
//! policy, and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde_json, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ### Retry Policy (`retry`)
//! - [`RetryPolicy`] - Deterministic exponential backoff with a hard ceiling,
//!   shared by install retries and device-recovery pacing
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use droidmon_core::prelude::*;
//! ```

pub mod error;
pub mod logging;
pub mod retry;

/// Prelude for common imports used throughout all droidmon crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use error::{Error, Result, ResultExt};
pub use retry::RetryPolicy;
