//! Local staging of the columnar artifact.
//!
//! A [`StagedArtifact`] is a temporary `.parquet` path owned by one pipeline
//! invocation. It is removed when the value is dropped, so every exit path
//! (success, transport failure, schema failure, failed upload or load)
//! leaves nothing behind.
//!
//! [`ParquetChunkSink`] turns the transcoder's create/append protocol into a
//! single Parquet file: `Create` opens the file, each chunk becomes its own
//! row group and is flushed immediately, so the writer never buffers more than
//! one chunk.

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties, WriterVersion};
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::transcode::{ChunkSink, WriteMode};

pub struct StagedArtifact {
    path: PathBuf,
    guard: Option<TempPath>,
}

impl StagedArtifact {
    /// Reserve a fresh temporary path, in `dir` if given.
    pub fn create(dir: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("mingest-").suffix(".parquet");
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let guard = file.into_temp_path();
        let path = guard.to_path_buf();
        debug!(path = %path.display(), "staged artifact reserved");
        Ok(Self {
            path,
            guard: Some(guard),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            match guard.close() {
                Ok(()) => info!(path = %self.path.display(), "staged artifact removed"),
                Err(e) => warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to remove staged artifact"
                ),
            }
        }
    }
}

/// Writes transcoded chunks into one Parquet file.
pub struct ParquetChunkSink {
    path: PathBuf,
    props: WriterProperties,
    writer: Option<ArrowWriter<File>>,
    schema: Option<SchemaRef>,
    writes: u64,
    rows: u64,
}

impl ParquetChunkSink {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            path: path.into(),
            props: writer_properties()?,
            writer: None,
            schema: None,
            writes: 0,
            rows: 0,
        })
    }

    /// Number of `write_chunk` calls that reached the file.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Write the footer. Returns the number of rows in the file; a sink that
    /// never saw a chunk leaves no Parquet file and returns 0.
    pub fn finish(mut self) -> Result<u64> {
        if let Some(writer) = self.writer.take() {
            writer.close()?;
        }
        Ok(self.rows)
    }
}

impl ChunkSink for ParquetChunkSink {
    fn write_chunk(&mut self, batch: &RecordBatch, mode: WriteMode) -> Result<()> {
        match mode {
            WriteMode::Create => {
                if self.writer.is_some() {
                    return Err(Error::SchemaMismatch(format!(
                        "{} was already created by an earlier chunk",
                        self.path.display()
                    )));
                }
                let file = File::create(&self.path)?;
                self.schema = Some(batch.schema());
                self.writer = Some(ArrowWriter::try_new(
                    file,
                    batch.schema(),
                    Some(self.props.clone()),
                )?);
            }
            WriteMode::Append => {
                if self.schema.as_ref() != Some(&batch.schema()) {
                    return Err(Error::SchemaMismatch(format!(
                        "chunk {} schema differs from the staged file",
                        self.writes + 1
                    )));
                }
            }
        }

        let writer = self.writer.as_mut().ok_or_else(|| {
            Error::SchemaMismatch(format!(
                "cannot append to {}: no chunk created it",
                self.path.display()
            ))
        })?;
        writer.write(batch)?;
        writer.flush()?;
        self.writes += 1;
        self.rows += batch.num_rows() as u64;
        Ok(())
    }
}

fn writer_properties() -> Result<WriterProperties> {
    Ok(WriterProperties::builder()
        .set_writer_version(WriterVersion::PARQUET_2_0)
        .set_compression(Compression::ZSTD(ZstdLevel::try_new(3)?))
        .set_dictionary_enabled(true)
        .set_statistics_enabled(EnabledStatistics::Page)
        .build())
}
