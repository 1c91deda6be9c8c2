pub mod error;
pub mod session;

// Re-export common error type
pub use error::{Result, RoostError};
