//! Error types for the ingestion pipeline.
//!
//! Every fallible library operation returns [`Result`]. The variants map onto
//! the failure classes the pipeline distinguishes: configuration problems stop
//! a run before it starts, transport failures abort it, schema failures mean
//! the provider sent something the staged file cannot represent, and the
//! object-store / warehouse variants carry the remote service's own verdict.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed configuration, settings, or category file.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network failure while talking to a remote endpoint.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body broke off while it was being consumed.
    #[error("transport error: response stream interrupted: {0}")]
    StreamInterrupted(#[source] std::io::Error),

    /// Remote endpoint answered with a non-success status.
    #[error("HTTP {status} from {url}: {body}")]
    HttpStatus {
        url: String,
        status: u16,
        body: String,
    },

    /// The response stream carried no usable header row.
    #[error("schema error: {0}")]
    Schema(String),

    /// A chunk (or a cell in it) does not fit the inferred schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Object store rejected a request.
    #[error("object store error: {0}")]
    ObjectStore(String),

    /// Warehouse rejected a request.
    #[error("warehouse error: {0}")]
    Warehouse(String),

    /// A warehouse load job finished with an error result.
    #[error("load job {job_id} failed: {reason}")]
    LoadJob { job_id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
}

impl Error {
    /// True for failures of the network leg (no response, or a non-2xx one).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::StreamInterrupted(_) | Error::HttpStatus { .. }
        )
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Classify a CSV reader failure raised while consuming the body.
    ///
    /// Reads that fail underneath the parser are the network dying mid-stream;
    /// everything else is a row that does not fit the header.
    pub(crate) fn from_csv(err: csv::Error, line: u64) -> Self {
        match err.into_kind() {
            csv::ErrorKind::Io(e) => Error::StreamInterrupted(e),
            csv::ErrorKind::UnequalLengths {
                expected_len, len, ..
            } => Error::SchemaMismatch(format!(
                "line {}: expected {} fields, found {}",
                line, expected_len, len
            )),
            csv::ErrorKind::Utf8 { err, .. } => {
                Error::SchemaMismatch(format!("line {}: invalid UTF-8 ({})", line, err))
            }
            other => Error::SchemaMismatch(format!("line {}: {:?}", line, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_is_transport() {
        let err = Error::HttpStatus {
            url: "https://example.invalid".to_string(),
            status: 503,
            body: String::new(),
        };
        assert!(err.is_transport());
        assert!(!Error::Schema("empty".into()).is_transport());
    }

    #[test]
    fn test_unequal_lengths_is_schema_mismatch() {
        let data = "a;b\n1;2;3\n";
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .from_reader(data.as_bytes());
        let mut record = csv::StringRecord::new();
        reader.read_record(&mut record).unwrap();
        let err = reader.read_record(&mut record).unwrap_err();
        match Error::from_csv(err, 2) {
            Error::SchemaMismatch(msg) => assert!(msg.contains("expected 2 fields")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
