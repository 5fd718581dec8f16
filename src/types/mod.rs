//! Shared types

pub mod error;

pub use error::{EventHubError, Result};
