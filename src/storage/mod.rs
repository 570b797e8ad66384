//! Storage layer.
//!
//! - **Versions**: model artifacts plus the durable current-version pointer
//!   (filesystem, in-memory)
//! - **Records**: append-only feedback and prediction logs (`SQLite`,
//!   in-memory)
//! - **Dataset**: base training set loader (CSV)

// Allow significant_drop_tightening - dropping the connection guard slightly
// early provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]

pub mod connection;
pub mod dataset;
pub mod records;
pub mod versions;

pub use dataset::{load_csv, load_csv_from};
pub use records::{FeedbackStore, MemoryRecordStore, PredictionLog, SqliteRecordStore};
pub use versions::{FilesystemVersionStore, MemoryVersionStore, POINTER_FILE, VersionStore};
