//! Warehouse loading.
//!
//! [`WarehouseLoader`] makes sure the dataset exists, submits a load job that
//! appends the staged Parquet artifact to the target table (creating the table
//! on first use), and waits for the job to finish. The warehouse itself is a
//! capability trait; [`BigQueryClient`] implements it over the BigQuery v2
//! REST API.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::gcp::{encode_component, endpoint_or, GcpCredentials, BIGQUERY_ENDPOINT};
use crate::models::{Ensured, LoadOutcome};
use crate::sanitize::sanitize;

/// One append of a staged artifact into a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub source_uri: String,
    pub dataset: String,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Running,
    Done { rows: u64 },
    Failed { reason: String },
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn dataset_exists(&self, dataset: &str) -> Result<bool>;

    /// Create the dataset. Losing a creation race is [`Ensured::AlreadyPresent`].
    async fn create_dataset(&self, dataset: &str, location: &str) -> Result<Ensured>;

    /// Submit an append-only load job and return its id.
    async fn submit_load(&self, request: &LoadRequest) -> Result<String>;

    async fn job_status(&self, job_id: &str) -> Result<JobState>;
}

/// Table name for a category pair: `sanitize("{main}_{sub}")`.
pub fn table_name(main: &str, sub: &str) -> String {
    sanitize(&format!("{}_{}", main, sub))
}

pub struct WarehouseLoader<'w> {
    warehouse: &'w dyn Warehouse,
    location: String,
    poll_interval: Duration,
}

impl<'w> WarehouseLoader<'w> {
    pub fn new(warehouse: &'w dyn Warehouse, location: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            warehouse,
            location: location.into(),
            poll_interval,
        }
    }

    /// Ensure the dataset, append `source_uri` to `dataset.table`, and block
    /// until the job completes.
    ///
    /// A failed job surfaces as [`Error::LoadJob`]; errors from the warehouse
    /// calls themselves are returned as they are.
    pub async fn load(&self, source_uri: &str, dataset: &str, table: &str) -> Result<LoadOutcome> {
        self.ensure_dataset(dataset).await?;

        let request = LoadRequest {
            source_uri: source_uri.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
        };
        let job_id = self.warehouse.submit_load(&request).await?;
        info!(job_id = %job_id, source = source_uri, dataset, table, "load job submitted");

        loop {
            match self.warehouse.job_status(&job_id).await? {
                JobState::Running => {
                    debug!(job_id = %job_id, "load job running");
                    tokio::time::sleep(self.poll_interval).await;
                }
                JobState::Done { rows } => {
                    info!(job_id = %job_id, rows, dataset, table, "load job finished");
                    return Ok(LoadOutcome {
                        job_id,
                        rows_loaded: rows,
                    });
                }
                JobState::Failed { reason } => {
                    return Err(Error::LoadJob { job_id, reason });
                }
            }
        }
    }

    async fn ensure_dataset(&self, dataset: &str) -> Result<Ensured> {
        if self.warehouse.dataset_exists(dataset).await? {
            return Ok(Ensured::AlreadyPresent);
        }
        let outcome = self
            .warehouse
            .create_dataset(dataset, &self.location)
            .await?;
        info!(dataset, location = %self.location, ?outcome, "dataset ensured");
        Ok(outcome)
    }
}

// ============ BigQuery REST ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: Option<JobReference>,
    status: Option<JobStatusBody>,
    statistics: Option<JobStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatusBody {
    state: String,
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobStatistics {
    load: Option<LoadStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    /// int64 values arrive as JSON strings.
    output_rows: Option<String>,
}

impl JobResource {
    fn state(&self) -> Result<JobState> {
        let status = self
            .status
            .as_ref()
            .ok_or_else(|| Error::Warehouse("job resource has no status".into()))?;
        if status.state != "DONE" {
            return Ok(JobState::Running);
        }
        if let Some(err) = &status.error_result {
            let reason = match (&err.reason, &err.message) {
                (Some(r), Some(m)) => format!("{}: {}", r, m),
                (None, Some(m)) => m.clone(),
                (Some(r), None) => r.clone(),
                (None, None) => "unknown error".to_string(),
            };
            return Ok(JobState::Failed { reason });
        }
        let rows = self
            .statistics
            .as_ref()
            .and_then(|s| s.load.as_ref())
            .and_then(|l| l.output_rows.as_deref())
            .map(|r| {
                r.parse::<u64>()
                    .map_err(|_| Error::Warehouse(format!("invalid outputRows '{}'", r)))
            })
            .transpose()?
            .unwrap_or(0);
        Ok(JobState::Done { rows })
    }
}

/// BigQuery v2 REST client scoped to one project and location.
pub struct BigQueryClient {
    http: reqwest::Client,
    credentials: GcpCredentials,
    endpoint: String,
    project: String,
    location: String,
}

impl BigQueryClient {
    pub fn new(
        credentials: GcpCredentials,
        project: impl Into<String>,
        location: impl Into<String>,
        endpoint: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            credentials,
            endpoint: endpoint_or(endpoint, BIGQUERY_ENDPOINT),
            project: project.into(),
            location: location.into(),
        })
    }

    fn project_url(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}",
            self.endpoint,
            encode_component(&self.project)
        )
    }

    async fn failure(action: &str, resp: reqwest::Response) -> Error {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Error::Warehouse(format!(
            "{} failed (HTTP {}): {}",
            action,
            status.as_u16(),
            body.chars().take(500).collect::<String>()
        ))
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn dataset_exists(&self, dataset: &str) -> Result<bool> {
        let url = format!("{}/datasets/{}", self.project_url(), encode_component(dataset));
        let resp = self
            .http
            .get(&url)
            .header(AUTHORIZATION, self.credentials.bearer())
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::failure("dataset lookup", resp).await),
        }
    }

    async fn create_dataset(&self, dataset: &str, location: &str) -> Result<Ensured> {
        let url = format!("{}/datasets", self.project_url());
        let resp = self
            .http
            .post(&url)
            .header(AUTHORIZATION, self.credentials.bearer())
            .json(&serde_json::json!({
                "datasetReference": {
                    "projectId": self.project,
                    "datasetId": dataset,
                },
                "location": location,
            }))
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => Ok(Ensured::Created),
            StatusCode::CONFLICT => Ok(Ensured::AlreadyPresent),
            _ => Err(Self::failure("dataset creation", resp).await),
        }
    }

    async fn submit_load(&self, request: &LoadRequest) -> Result<String> {
        let url = format!("{}/jobs", self.project_url());
        let resp = self
            .http
            .post(&url)
            .header(AUTHORIZATION, self.credentials.bearer())
            .json(&serde_json::json!({
                "jobReference": {
                    "projectId": self.project,
                    "location": self.location,
                },
                "configuration": {
                    "load": {
                        "sourceUris": [request.source_uri],
                        "destinationTable": {
                            "projectId": self.project,
                            "datasetId": request.dataset,
                            "tableId": request.table,
                        },
                        "sourceFormat": "PARQUET",
                        "writeDisposition": "WRITE_APPEND",
                        "createDisposition": "CREATE_IF_NEEDED",
                    }
                }
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::failure("load job submission", resp).await);
        }
        let job: JobResource = resp.json().await?;
        job.job_reference
            .map(|r| r.job_id)
            .ok_or_else(|| Error::Warehouse("load job response has no jobReference".into()))
    }

    async fn job_status(&self, job_id: &str) -> Result<JobState> {
        let url = format!(
            "{}/jobs/{}?location={}",
            self.project_url(),
            encode_component(job_id),
            encode_component(&self.location)
        );
        let resp = self
            .http
            .get(&url)
            .header(AUTHORIZATION, self.credentials.bearer())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::failure("load job lookup", resp).await);
        }
        let job: JobResource = resp.json().await?;
        job.state()
    }
}
