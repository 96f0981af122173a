//! Object storage for staged artifacts.
//!
//! [`ObjectStore`] is the capability the pipeline receives from its caller;
//! [`GcsClient`] implements it over the Cloud Storage JSON API. Uploads stream
//! the staged file from disk instead of reading it into memory.
//!
//! The endpoint is configurable so the client can be pointed at an emulator or
//! a local stub.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::StatusCode;
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::gcp::{encode_component, endpoint_or, GcpCredentials, STORAGE_ENDPOINT};
use crate::models::Ensured;

/// A bucket the pipeline may write artifacts into.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    async fn bucket_exists(&self) -> Result<bool>;

    /// Create the bucket. A concurrent creator winning the race is reported
    /// as [`Ensured::AlreadyPresent`], not as an error.
    async fn create_bucket(&self, location: &str) -> Result<Ensured>;

    /// Upload a local file under `name` and return its `gs://` URI.
    async fn put_file(&self, path: &Path, name: &str) -> Result<String>;
}

/// Ensure the store's bucket exists, creating it in `location` if needed.
pub async fn ensure_bucket(store: &dyn ObjectStore, location: &str) -> Result<Ensured> {
    if store.bucket_exists().await? {
        debug!(bucket = store.bucket(), "bucket present");
        return Ok(Ensured::AlreadyPresent);
    }
    let outcome = store.create_bucket(location).await?;
    info!(bucket = store.bucket(), location, ?outcome, "bucket ensured");
    Ok(outcome)
}

/// Ensure the bucket, then upload the staged artifact under `name`.
pub async fn upload_artifact(
    store: &dyn ObjectStore,
    location: &str,
    path: &Path,
    name: &str,
) -> Result<String> {
    ensure_bucket(store, location).await?;
    let uri = store.put_file(path, name).await?;
    info!(uri = %uri, "artifact uploaded");
    Ok(uri)
}

/// `gs://bucket/name` for an object.
pub fn object_uri(bucket: &str, name: &str) -> String {
    format!("gs://{}/{}", bucket, name)
}

/// Cloud Storage JSON API client bound to one bucket.
pub struct GcsClient {
    http: reqwest::Client,
    credentials: GcpCredentials,
    endpoint: String,
    project: String,
    bucket: String,
}

impl GcsClient {
    pub fn new(
        credentials: GcpCredentials,
        project: impl Into<String>,
        bucket: impl Into<String>,
        endpoint: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            credentials,
            endpoint: endpoint_or(endpoint, STORAGE_ENDPOINT),
            project: project.into(),
            bucket: bucket.into(),
        })
    }

    async fn failure(&self, action: &str, resp: reqwest::Response) -> Error {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Error::ObjectStore(format!(
            "{} gs://{} failed (HTTP {}): {}",
            action,
            self.bucket,
            status.as_u16(),
            body.chars().take(500).collect::<String>()
        ))
    }
}

#[async_trait]
impl ObjectStore for GcsClient {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> Result<bool> {
        let url = format!(
            "{}/storage/v1/b/{}",
            self.endpoint,
            encode_component(&self.bucket)
        );
        let resp = self
            .http
            .get(&url)
            .header(AUTHORIZATION, self.credentials.bearer())
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(self.failure("lookup of", resp).await),
        }
    }

    async fn create_bucket(&self, location: &str) -> Result<Ensured> {
        let url = format!(
            "{}/storage/v1/b?project={}",
            self.endpoint,
            encode_component(&self.project)
        );
        let resp = self
            .http
            .post(&url)
            .header(AUTHORIZATION, self.credentials.bearer())
            .json(&serde_json::json!({
                "name": self.bucket,
                "location": location,
            }))
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => Ok(Ensured::Created),
            StatusCode::CONFLICT => Ok(Ensured::AlreadyPresent),
            _ => Err(self.failure("creation of", resp).await),
        }
    }

    async fn put_file(&self, path: &Path, name: &str) -> Result<String> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        let url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.endpoint,
            encode_component(&self.bucket),
            encode_component(name)
        );
        debug!(path = %path.display(), bytes = len, name, "uploading");

        let resp = self
            .http
            .post(&url)
            .header(AUTHORIZATION, self.credentials.bearer())
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, len)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(self.failure("upload to", resp).await);
        }
        Ok(object_uri(&self.bucket, name))
    }
}
