//! mf-core: shared types, IDs, errors, and configuration.
//!
//! This crate is the foundational dependency for the other mf-* crates,
//! providing the batch data model, a unified error type, and the
//! application configuration shape.

pub mod config;
pub mod error;
pub mod ids;
pub mod job;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use job::*;
