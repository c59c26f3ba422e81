//! Storage backends.

#[cfg(feature = "sqlite")]
pub mod sqlite;
