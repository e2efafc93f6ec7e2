//! In-memory scripted client.
//!
//! Serves a fixed set of object types and pre-scripted export pages, and
//! records teardown calls. Used by the pipeline integration tests and the
//! offline drill binary; never by production wiring.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{ClientError, Result};
use crate::types::{
    ExportJob, ExportResults, JobInfo, JobState, ObjectSchema, ObjectSummary,
};
use crate::RemoteClient;

/// One scripted result page.
#[derive(Debug, Clone)]
pub struct ScriptedPage {
    pub records: u64,
    pub next_locator: String,
    pub data: Bytes,
}

/// One scripted object type: its schema and the pages any export of it
/// will stream.
#[derive(Debug, Clone)]
pub struct ScriptedObject {
    pub schema: ObjectSchema,
    pub pages: Vec<ScriptedPage>,
}

#[derive(Debug)]
struct ActiveJob {
    object: String,
    pages: VecDeque<ScriptedPage>,
}

/// Scripted [`RemoteClient`] double.
#[derive(Default)]
pub struct ScriptedClient {
    user: String,
    objects: Mutex<HashMap<String, ScriptedObject>>,
    jobs: Mutex<HashMap<String, ActiveJob>>,
    next_job_id: AtomicU64,
    created_queries: Mutex<Vec<String>>,
    deleted_jobs: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Default::default()
        }
    }

    /// Register an object type and the pages its exports will return.
    pub fn add_object(&self, object: ScriptedObject) {
        self.objects
            .lock()
            .unwrap()
            .insert(object.schema.name.clone(), object);
    }

    /// Queries passed to `create_export_job`, in call order.
    pub fn created_queries(&self) -> Vec<String> {
        self.created_queries.lock().unwrap().clone()
    }

    /// Job ids passed to `delete_job`, in call order.
    pub fn deleted_jobs(&self) -> Vec<String> {
        self.deleted_jobs.lock().unwrap().clone()
    }

    fn object_for_query(&self, query: &str) -> Option<String> {
        // The scripted surface only needs the FROM target.
        let objects = self.objects.lock().unwrap();
        objects
            .keys()
            .find(|name| query.contains(&format!("FROM {name}")))
            .cloned()
    }
}

#[async_trait]
impl RemoteClient for ScriptedClient {
    async fn describe_all(&self) -> Result<Vec<ObjectSummary>> {
        let objects = self.objects.lock().unwrap();
        let mut summaries: Vec<_> = objects
            .values()
            .map(|o| ObjectSummary {
                name: o.schema.name.clone(),
                queryable: o.schema.queryable,
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    async fn describe_one(&self, name: &str) -> Result<ObjectSchema> {
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .map(|o| o.schema.clone())
            .ok_or_else(|| ClientError::NotFound(name.to_string()))
    }

    async fn create_export_job(&self, query: &str) -> Result<ExportJob> {
        let object = self
            .object_for_query(query)
            .ok_or_else(|| ClientError::NotFound(query.to_string()))?;

        self.created_queries.lock().unwrap().push(query.to_string());

        let id = format!("JOB-{}", self.next_job_id.fetch_add(1, Ordering::SeqCst));
        let pages = self.objects.lock().unwrap()[&object].pages.clone();
        self.jobs.lock().unwrap().insert(
            id.clone(),
            ActiveJob {
                object: object.clone(),
                pages: pages.into(),
            },
        );

        Ok(ExportJob {
            id,
            object,
            created_date: "2024-01-01T00:00:00Z".to_string(),
            created_by: self.user.clone(),
        })
    }

    async fn get_export_results(&self, job_id: &str) -> Result<ExportResults> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| ClientError::NotFound(job_id.to_string()))?;

        match job.pages.pop_front() {
            Some(page) => Ok(ExportResults {
                job_id: job_id.to_string(),
                number_of_records: page.records,
                next_locator: page.next_locator,
                data: page.data,
            }),
            None => Ok(ExportResults {
                job_id: job_id.to_string(),
                number_of_records: 0,
                next_locator: String::new(),
                data: Bytes::new(),
            }),
        }
    }

    async fn list_jobs(&self, _created_by: &str) -> Result<Vec<JobInfo>> {
        let jobs = self.jobs.lock().unwrap();
        let mut listing: Vec<_> = jobs
            .iter()
            .map(|(id, job)| JobInfo {
                id: id.clone(),
                object: job.object.clone(),
                state: JobState::JobComplete,
            })
            .collect();
        listing.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(listing)
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        self.jobs.lock().unwrap().remove(job_id);
        self.deleted_jobs.lock().unwrap().push(job_id.to_string());
        Ok(())
    }

    fn user_id(&self) -> &str {
        &self.user
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldSchema;

    fn sample_object() -> ScriptedObject {
        ScriptedObject {
            schema: ObjectSchema {
                name: "Account".into(),
                queryable: true,
                fields: vec![FieldSchema {
                    name: "Id".into(),
                    field_type: "id".into(),
                }],
            },
            pages: vec![ScriptedPage {
                records: 1,
                next_locator: "null".into(),
                data: Bytes::from_static(b"Id\n001\n"),
            }],
        }
    }

    #[tokio::test]
    async fn scripted_job_streams_pages_then_empties() {
        let client = ScriptedClient::new("user-1");
        client.add_object(sample_object());

        let job = client
            .create_export_job("SELECT Id FROM Account")
            .await
            .unwrap();
        let page = client.get_export_results(&job.id).await.unwrap();
        assert_eq!(page.number_of_records, 1);
        assert_eq!(page.next_locator, "null");

        let done = client.get_export_results(&job.id).await.unwrap();
        assert_eq!(done.number_of_records, 0);
    }

    #[tokio::test]
    async fn delete_job_is_recorded() {
        let client = ScriptedClient::new("user-1");
        client.add_object(sample_object());
        let job = client
            .create_export_job("SELECT Id FROM Account")
            .await
            .unwrap();
        client.delete_job(&job.id).await.unwrap();
        assert_eq!(client.deleted_jobs(), vec![job.id.clone()]);
        assert!(client.list_jobs("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_object_is_not_found() {
        let client = ScriptedClient::new("user-1");
        assert!(matches!(
            client.describe_one("Ghost").await,
            Err(ClientError::NotFound(_))
        ));
    }
}
