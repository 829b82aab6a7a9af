//! The `utils` module collects the pieces shared across `paystream`:
//! the broker error type and logging setup.

pub mod error;
pub mod logging;
