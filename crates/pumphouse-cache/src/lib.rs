//! Durable namespaced cache for the pumphouse backup pipeline.
//!
//! Every component of the pipeline shares exactly one mutable resource: a
//! directory tree of cached artifacts (object metadata, exported record
//! files, and per-job progress state). This crate owns that tree.
//!
//! ## Layout
//!
//! ```text
//! <base dir>/
//!   .today                     freshness marker
//!   .surveyor                  process-wide counters
//!   <ObjectType>/metadata.json object schema snapshot
//!   <ObjectType>/.state        export-job progress
//!   <ObjectType>.<id>.csv      one exported record per file
//! ```
//!
//! ## Write serialization
//!
//! Progress state is written by several concurrent producers. All state
//! mutations are funneled through a single-writer actor task fed by a
//! bounded channel, so updates to the same key are applied in send order
//! and a write never races a delete. See [`Cache::set_state`].

mod cache;
mod error;
mod namespace;
mod split;
mod state;

pub use cache::{Cache, STATE_QUEUE_CAPACITY};
pub use error::{CacheError, Result};
pub use namespace::EntryInfo;
pub use split::{SplitOptions, DEFAULT_KEY_COLUMN};
pub use state::{state_path, STATE_FILE_NAME};

/// File name under which an object type's schema snapshot is cached.
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Extension of exported record files.
pub const RECORD_EXT: &str = "csv";
