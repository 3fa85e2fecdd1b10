//! Storage implementations
//!
//! - `memory` - in-memory store for tests and ephemeral sessions
//! - `sqlite` - persistent store (requires `sqlite` feature)

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
