//! Header-driven schema inference.
//!
//! The provider announces its columns only in the first CSV line. That line
//! is read (and only that line) before the bulk of the body arrives; the
//! resulting [`InferredSchema`] is an immutable value handed to the
//! transcoder, which continues on the same stream from the first data row.
//!
//! Column layout:
//!
//! | Position | Kind | Arrow type |
//! |----------|------|------------|
//! | 0 | interval start | `Timestamp(µs, "UTC")` |
//! | 1 | interval end | `Timestamp(µs, "UTC")` |
//! | 2.. | measurement | `Float64` |

use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use std::collections::HashSet;
use std::io::BufRead;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::sanitize::sanitize;

pub const FIELD_DELIMITER: u8 = b';';
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    IntervalStart,
    IntervalEnd,
    Measurement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Header text as sent by the provider.
    pub raw: String,
    /// Warehouse-safe, unique name.
    pub name: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferredSchema {
    columns: Vec<Column>,
    arrow: SchemaRef,
}

impl InferredSchema {
    /// Build from already-split header tokens.
    pub fn from_header<S: AsRef<str>>(tokens: &[S]) -> Result<Self> {
        if tokens.len() < 2 {
            return Err(Error::Schema(format!(
                "header has {} column(s); at least the two interval columns are required",
                tokens.len()
            )));
        }

        let mut seen = HashSet::new();
        let columns: Vec<Column> = tokens
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                let raw = raw.as_ref().trim().to_string();
                let kind = match i {
                    0 => ColumnKind::IntervalStart,
                    1 => ColumnKind::IntervalEnd,
                    _ => ColumnKind::Measurement,
                };
                let name = unique_name(&mut seen, &raw, i);
                Column { raw, name, kind }
            })
            .collect();

        let fields: Vec<Field> = columns
            .iter()
            .map(|c| match c.kind {
                ColumnKind::IntervalStart | ColumnKind::IntervalEnd => Field::new(
                    &c.name,
                    DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                    true,
                ),
                ColumnKind::Measurement => Field::new(&c.name, DataType::Float64, true),
            })
            .collect();

        Ok(Self {
            columns,
            arrow: Arc::new(Schema::new(fields)),
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn measurement_count(&self) -> usize {
        self.columns.len() - 2
    }

    pub fn arrow_schema(&self) -> SchemaRef {
        self.arrow.clone()
    }
}

fn unique_name(seen: &mut HashSet<String>, raw: &str, index: usize) -> String {
    let base = match sanitize(raw) {
        s if s.is_empty() => format!("column_{}", index),
        s => s,
    };
    let mut name = base.clone();
    let mut n = 2;
    while !seen.insert(name.clone()) {
        name = format!("{}_{}", base, n);
        n += 1;
    }
    name
}

/// Consume exactly one line from `stream` and derive the schema from it.
pub fn infer<R: BufRead>(stream: &mut R) -> Result<InferredSchema> {
    let mut line = Vec::new();
    let read = stream
        .read_until(b'\n', &mut line)
        .map_err(Error::StreamInterrupted)?;
    if read == 0 {
        return Err(Error::Schema("response stream is empty".to_string()));
    }

    let mut bytes = line.as_slice();
    if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
        bytes = rest;
    }
    while let Some((b'\n' | b'\r', rest)) = bytes.split_last() {
        bytes = rest;
    }
    if bytes.is_empty() {
        return Err(Error::Schema("header line is blank".to_string()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(FIELD_DELIMITER)
        .has_headers(false)
        .from_reader(bytes);
    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => {}
        Ok(false) => return Err(Error::Schema("header line is blank".to_string())),
        Err(e) => return Err(Error::Schema(format!("malformed header: {}", e))),
    }

    let tokens: Vec<&str> = record.iter().collect();
    let schema = InferredSchema::from_header(&tokens)?;
    debug!(
        columns = ?schema.columns().iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        "inferred schema from header"
    );
    Ok(schema)
}
