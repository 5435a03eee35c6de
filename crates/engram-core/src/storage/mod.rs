//! Storage layer
//!
//! Row-level persistence for observations, relations, sessions, and
//! patterns, with the full-text and vector indexes kept consistent with
//! every committed write.

mod migrations;
mod sqlite;

pub use migrations::{apply_migrations, get_current_version};
pub use sqlite::{CycleRecord, Result, Store, StoreError, TraversalHit};
