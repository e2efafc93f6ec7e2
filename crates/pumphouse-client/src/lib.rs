//! Remote bulk-export API interface.
//!
//! The orchestrator treats the remote record store as an external
//! collaborator: this crate defines the wire types and the [`RemoteClient`]
//! trait the pipeline is written against, plus export-query synthesis.
//! Authentication and transport live behind implementations of the trait
//! and are out of scope here.
//!
//! An export job is a server-side asynchronous bulk query. Its results
//! stream across pages identified by an opaque locator; an empty locator or
//! the literal string `"null"` signals the final page (the wire format
//! sends the string literally, so it must be compared as a string).

mod error;
mod query;
pub mod scripted;
mod types;

use async_trait::async_trait;

pub use error::{ClientError, Result};
pub use query::export_query;
pub use types::{
    ExportJob, ExportResults, FieldSchema, JobInfo, JobState, ObjectSchema, ObjectSummary,
};

/// Locator sentinel the remote API sends for "no more pages".
pub const LOCATOR_NULL: &str = "null";

/// Whether a locator value means pagination is finished.
pub fn locator_finished(locator: &str) -> bool {
    locator.is_empty() || locator == LOCATOR_NULL
}

/// Client for the remote bulk-export API.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Enumerate every object type the remote store exposes.
    async fn describe_all(&self) -> Result<Vec<ObjectSummary>>;

    /// Fetch the full schema of one object type.
    async fn describe_one(&self, name: &str) -> Result<ObjectSchema>;

    /// Create a server-side bulk export job for `query`.
    async fn create_export_job(&self, query: &str) -> Result<ExportJob>;

    /// Fetch the next result chunk of a running export job.
    async fn get_export_results(&self, job_id: &str) -> Result<ExportResults>;

    /// List export jobs created by `created_by`.
    async fn list_jobs(&self, created_by: &str) -> Result<Vec<JobInfo>>;

    /// Tear down a finished export job on the remote side.
    async fn delete_job(&self, job_id: &str) -> Result<()>;

    /// The remote user id this session acts as.
    fn user_id(&self) -> &str;
}
