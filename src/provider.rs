//! Provider download endpoint.
//!
//! Sends the request body as JSON and hands back the response as a buffered
//! byte stream. Nothing is read beyond what the caller consumes, so the header
//! can be inferred before the bulk of the rows arrives.

use std::io::BufReader;
use std::time::Duration;
use tracing::info;

use crate::error::{Error, Result};
use crate::models::RequestPayload;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Blocking client for the provider's CSV download endpoint.
pub struct ProviderClient {
    http: reqwest::blocking::Client,
    api_url: String,
}

impl ProviderClient {
    /// `timeout` bounds the whole exchange including the body; `None`
    /// leaves long downloads unbounded.
    pub fn new(api_url: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.into(),
        })
    }

    /// POST the payload and return the streamed body.
    ///
    /// Non-2xx answers are read (first 500 characters) into the error.
    pub fn open(&self, payload: &RequestPayload) -> Result<BufReader<reqwest::blocking::Response>> {
        info!(
            url = %self.api_url,
            modules = payload.form().module_ids.len(),
            from = payload.form().timestamp_from,
            to = payload.form().timestamp_to,
            "requesting provider data"
        );
        let resp = self.http.post(&self.api_url).json(payload).send()?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().unwrap_or_default();
            return Err(Error::HttpStatus {
                url: self.api_url.clone(),
                status,
                body: body.chars().take(500).collect(),
            });
        }

        Ok(BufReader::new(resp))
    }
}
