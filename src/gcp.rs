//! Google Cloud credentials and endpoints shared by the object store and the
//! warehouse clients.
//!
//! Both services are reached over their JSON REST APIs with an OAuth bearer
//! token taken from the environment (e.g. `gcloud auth print-access-token`).

use crate::error::{Error, Result};

pub const TOKEN_ENV: &str = "GCP_ACCESS_TOKEN";

pub const STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";
pub const BIGQUERY_ENDPOINT: &str = "https://bigquery.googleapis.com";

#[derive(Clone)]
pub struct GcpCredentials {
    access_token: String,
}

impl GcpCredentials {
    /// Load the bearer token from `GCP_ACCESS_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let token = std::env::var(TOKEN_ENV)
            .map_err(|_| Error::config(format!("{} environment variable not set", TOKEN_ENV)))?;
        Self::new(token)
    }

    pub fn new(access_token: impl Into<String>) -> Result<Self> {
        let access_token = access_token.into().trim().to_string();
        if access_token.is_empty() {
            return Err(Error::config("GCP access token is empty"));
        }
        Ok(Self { access_token })
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl std::fmt::Debug for GcpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpCredentials")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Configured endpoint, or the public default, without a trailing slash.
pub(crate) fn endpoint_or(endpoint: Option<&str>, default: &str) -> String {
    endpoint.unwrap_or(default).trim_end_matches('/').to_string()
}

/// Percent-encode one URL path segment or query value.
pub(crate) fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_header() {
        let creds = GcpCredentials::new(" ya29.token\n").unwrap();
        assert_eq!(creds.bearer(), "Bearer ya29.token");
        assert!(!format!("{:?}", creds).contains("ya29"));
    }

    #[test]
    fn test_empty_token_rejected() {
        assert!(matches!(
            GcpCredentials::new("  "),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_encode_component() {
        assert_eq!(
            encode_component("Stromerzeugung/Realisierte Erzeugung/2024-01-15_to_2024-01-15.parquet"),
            "Stromerzeugung%2FRealisierte%20Erzeugung%2F2024-01-15_to_2024-01-15.parquet"
        );
        assert_eq!(encode_component("Ä"), "%C3%84");
    }

    #[test]
    fn test_endpoint_default_and_override() {
        assert_eq!(endpoint_or(None, STORAGE_ENDPOINT), STORAGE_ENDPOINT);
        assert_eq!(endpoint_or(Some("http://127.0.0.1:9000/"), STORAGE_ENDPOINT), "http://127.0.0.1:9000");
    }
}
