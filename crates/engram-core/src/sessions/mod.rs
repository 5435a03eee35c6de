//! Session indexing
//!
//! Parses the host assistant's conversation logs into session rows with
//! searchable transcripts.

mod indexer;

pub use indexer::{ScanReport, SessionIndexer};
