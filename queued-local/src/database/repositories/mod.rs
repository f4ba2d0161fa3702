//! Repository layer for database access.

pub mod persisted_job;

pub use persisted_job::{PersistedJobRepository, SqlxPersistedJobRepository};
