//! Shared helpers: the node-level error type and idle backoff.

pub mod backoff;
pub mod error;

pub use backoff::IdleBackoff;
pub use error::RaftError;
