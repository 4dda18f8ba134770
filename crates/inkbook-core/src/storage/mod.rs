//! Storage layer
//!
//! Owns the live SQLite database and the filesystem primitives the backup
//! subsystem builds on.
//!
//! ## Layout
//!
//! - `engine`: the single live connection, consistent copies, exclusive access
//! - `schema`: table definitions and the idempotent initializer
//! - `persistence`: temp-then-rename writes and sync helpers

pub mod engine;
pub mod persistence;
pub mod schema;

pub use engine::{EngineHealth, ExclusiveAccess, StorageEngine};
pub use persistence::atomic_write;
pub use schema::{AdminSeed, InitResult, SchemaState, SCHEMA_VERSION};
