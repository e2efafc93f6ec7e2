//! Wire types exchanged with the remote bulk-export API.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One entry of the "describe all" listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub name: String,
    pub queryable: bool,
}

/// A field of an object schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

/// Full schema of one object type, cached as `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSchema {
    pub name: String,
    pub queryable: bool,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

/// A freshly created export job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: String,
    pub object: String,
    #[serde(rename = "createdDate")]
    pub created_date: String,
    #[serde(rename = "createdById")]
    pub created_by: String,
}

/// One page of export results.
///
/// `next_locator` is opaque; emptiness or the literal string `"null"`
/// terminate pagination (see [`crate::locator_finished`]).
#[derive(Debug, Clone)]
pub struct ExportResults {
    pub job_id: String,
    pub number_of_records: u64,
    pub next_locator: String,
    /// Raw CSV payload of this page.
    pub data: Bytes,
}

/// Lifecycle state of a remote export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Open,
    UploadComplete,
    InProgress,
    JobComplete,
    Failed,
    Aborted,
}

/// A job as reported by the job listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: String,
    pub object: String,
    pub state: JobState,
}

impl JobInfo {
    /// Whether results are ready to fetch.
    pub fn complete(&self) -> bool {
        self.state == JobState::JobComplete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_job_complete_counts_as_complete() {
        for (state, complete) in [
            (JobState::Open, false),
            (JobState::UploadComplete, false),
            (JobState::InProgress, false),
            (JobState::JobComplete, true),
            (JobState::Failed, false),
            (JobState::Aborted, false),
        ] {
            let job = JobInfo {
                id: "750".into(),
                object: "Account".into(),
                state,
            };
            assert_eq!(job.complete(), complete, "state {state:?}");
        }
    }

    #[test]
    fn schema_round_trips_through_json() {
        let schema = ObjectSchema {
            name: "Account".into(),
            queryable: true,
            fields: vec![FieldSchema {
                name: "Id".into(),
                field_type: "id".into(),
            }],
        };
        let json = serde_json::to_string(&schema).unwrap();
        let back: ObjectSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "Account");
        assert_eq!(back.fields, schema.fields);
    }

    #[test]
    fn schema_fields_default_to_empty() {
        let back: ObjectSchema =
            serde_json::from_str(r#"{"name":"Note","queryable":false}"#).unwrap();
        assert!(back.fields.is_empty());
    }
}
