//! Streaming CSV → Arrow chunk conversion.
//!
//! Consumes the body that remains after [`schema::infer`](crate::schema::infer)
//! took the header, in chunks of at most `chunk_rows` records. Each chunk is
//! typed against the [`InferredSchema`], its interval columns normalized to
//! UTC, and handed to a [`ChunkSink`]: the first chunk with
//! [`WriteMode::Create`], every later one with [`WriteMode::Append`]. At most
//! one chunk of rows, plus the rows of a repeated fall-back hour that end it,
//! is held in memory at any time.
//!
//! Cell formats (provider CSV):
//!
//! | Cell | Meaning |
//! |------|---------|
//! | `1.234,5` | 1234.5 (dot thousands, comma decimal) |
//! | `-` or empty | null |
//! | `29.10.2023 02:15` | local interval start, any whitespace between date and time |

use arrow_array::{ArrayRef, Float64Array, RecordBatch, TimestampMicrosecondArray};
use chrono::NaiveDateTime;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::normalize::TimeNormalizer;
use crate::progress::{ProgressReporter, TranscodeEvent};
use crate::schema::{ColumnKind, InferredSchema, FIELD_DELIMITER};

pub const DEFAULT_CHUNK_ROWS: usize = 10_000;

/// Two passes over a repeated hour at one-minute resolution.
const MAX_HELD_ROWS: usize = 120;

const NULL_MARKER: &str = "-";
const TIMESTAMP_FORMATS: &[&str] = &[
    "%d.%m.%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Start the destination file.
    Create,
    /// Add rows to the file started by an earlier `Create`.
    Append,
}

/// Destination of typed chunks.
pub trait ChunkSink {
    fn write_chunk(&mut self, batch: &RecordBatch, mode: WriteMode) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscodeReport {
    pub chunks: u64,
    pub rows: u64,
    /// Interval starts nulled by the timestamp fallback.
    pub invalidated_timestamps: u64,
}

pub struct ChunkedTranscoder<'p> {
    chunk_rows: usize,
    normalizer: TimeNormalizer,
    progress: &'p dyn ProgressReporter,
    target: String,
}

impl<'p> ChunkedTranscoder<'p> {
    pub fn new(
        chunk_rows: usize,
        normalizer: TimeNormalizer,
        progress: &'p dyn ProgressReporter,
        target: impl Into<String>,
    ) -> Self {
        Self {
            chunk_rows: chunk_rows.max(1),
            normalizer,
            progress,
            target: target.into(),
        }
    }

    /// Stream every remaining record of `body` into `sink`.
    ///
    /// Zero data rows is a warning, not an error.
    pub fn transcode<R: Read, S: ChunkSink>(
        &mut self,
        body: R,
        schema: &InferredSchema,
        sink: &mut S,
    ) -> Result<TranscodeReport> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(FIELD_DELIMITER)
            .has_headers(false)
            .from_reader(body);

        let mut report = TranscodeReport::default();
        let mut buffer: Vec<csv::StringRecord> = Vec::with_capacity(self.chunk_rows);
        // line 1 was the header
        let mut first_line = 2u64;

        loop {
            let mut record = csv::StringRecord::new();
            let line = first_line + buffer.len() as u64;
            let more = reader
                .read_record(&mut record)
                .map_err(|e| Error::from_csv(e, line))?;
            if more {
                if record.len() != schema.len() {
                    return Err(Error::SchemaMismatch(format!(
                        "line {}: expected {} fields, found {}",
                        line,
                        schema.len(),
                        record.len()
                    )));
                }
                buffer.push(record);
            }

            let flush = if !more {
                buffer.len()
            } else if buffer.len() >= self.chunk_rows {
                self.writable_rows(&buffer, schema)
            } else {
                0
            };

            if flush > 0 {
                let held = buffer.split_off(flush);
                let batch = self.build_batch(&buffer, schema, first_line, &mut report)?;
                let mode = if report.chunks == 0 {
                    WriteMode::Create
                } else {
                    WriteMode::Append
                };
                sink.write_chunk(&batch, mode)?;

                report.chunks += 1;
                report.rows += batch.num_rows() as u64;
                first_line += buffer.len() as u64;
                buffer = held;
                debug!(chunk = report.chunks, rows = report.rows, "chunk written");
                self.progress.report(TranscodeEvent::ChunkWritten {
                    target: self.target.clone(),
                    chunk: report.chunks,
                    rows: report.rows,
                });
            }

            if !more {
                break;
            }
        }

        if report.chunks == 0 {
            warn!(label = %self.target, "response had a header but no data rows");
        } else {
            info!(
                label = %self.target,
                chunks = report.chunks,
                rows = report.rows,
                "transcoding finished"
            );
        }
        self.progress.report(TranscodeEvent::Finished {
            target: self.target.clone(),
            chunks: report.chunks,
            rows: report.rows,
        });
        Ok(report)
    }

    /// How many leading rows of a full buffer can be written now.
    ///
    /// Trailing rows in a repeated (fall-back) local hour are held for the
    /// next chunk, so an ambiguous run is always decided together with the
    /// row that ends it. If the whole buffer is ambiguous, reading continues
    /// for up to [`MAX_HELD_ROWS`] rows; past that the buffer is written and
    /// the normalizer's carry takes over.
    fn writable_rows(&self, records: &[csv::StringRecord], schema: &InferredSchema) -> usize {
        let Some(start) = schema
            .columns()
            .iter()
            .position(|c| c.kind == ColumnKind::IntervalStart)
        else {
            return records.len();
        };
        let held = records
            .iter()
            .rev()
            .take_while(|r| {
                matches!(
                    r.get(start).and_then(parse_local_timestamp),
                    Some(Some(local)) if self.normalizer.is_ambiguous(&local)
                )
            })
            .count();

        match held {
            0 => records.len(),
            n if n < records.len() => records.len() - n,
            n if n <= MAX_HELD_ROWS => 0,
            _ => records.len(),
        }
    }

    fn build_batch(
        &mut self,
        records: &[csv::StringRecord],
        schema: &InferredSchema,
        first_line: u64,
        report: &mut TranscodeReport,
    ) -> Result<RecordBatch> {
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.len());
        let mut interval_end: Option<Vec<Option<i64>>> = None;

        for (index, column) in schema.columns().iter().enumerate() {
            match column.kind {
                ColumnKind::IntervalStart => {
                    let locals = records
                        .iter()
                        .enumerate()
                        .map(|(row, r)| {
                            parse_local_timestamp(&r[index]).ok_or_else(|| {
                                Error::SchemaMismatch(format!(
                                    "line {}, column '{}': '{}' is not a timestamp",
                                    first_line + row as u64,
                                    column.raw,
                                    &r[index]
                                ))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    let normalized = self.normalizer.normalize(&column.name, &locals);
                    report.invalidated_timestamps += normalized.invalidated as u64;
                    interval_end = Some(normalized.end);
                    columns.push(timestamp_array(normalized.start));
                }
                ColumnKind::IntervalEnd => {
                    let end = interval_end.take().ok_or_else(|| {
                        Error::SchemaMismatch("interval end precedes interval start".to_string())
                    })?;
                    columns.push(timestamp_array(end));
                }
                ColumnKind::Measurement => {
                    let values = records
                        .iter()
                        .enumerate()
                        .map(|(row, r)| {
                            parse_decimal(&r[index]).ok_or_else(|| {
                                Error::SchemaMismatch(format!(
                                    "line {}, column '{}': '{}' is not a number",
                                    first_line + row as u64,
                                    column.raw,
                                    &r[index]
                                ))
                            })
                        })
                        .collect::<Result<Vec<Option<f64>>>>()?;
                    columns.push(Arc::new(Float64Array::from(values)));
                }
            }
        }

        Ok(RecordBatch::try_new(schema.arrow_schema(), columns)?)
    }
}

fn timestamp_array(values: Vec<Option<i64>>) -> ArrayRef {
    Arc::new(TimestampMicrosecondArray::from(values).with_timezone("UTC"))
}

/// Parse a provider number. `Some(None)` is a null cell, `None` is garbage.
pub fn parse_decimal(cell: &str) -> Option<Option<f64>> {
    let cell = cell.trim();
    if cell.is_empty() || cell == NULL_MARKER {
        return Some(None);
    }
    let normalized: String = cell
        .chars()
        .filter(|c| *c != '.')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    normalized.parse::<f64>().ok().map(Some)
}

/// Parse a local interval start. `Some(None)` is a null cell, `None` is garbage.
pub fn parse_local_timestamp(cell: &str) -> Option<Option<NaiveDateTime>> {
    let cell = cell.trim();
    if cell.is_empty() || cell == NULL_MARKER {
        return Some(None);
    }
    let collapsed = cell.split_whitespace().collect::<Vec<_>>().join(" ");
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&collapsed, fmt).ok())
        .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use arrow_array::Array;
    use chrono::Duration;
    use chrono_tz::Europe::Berlin;

    /// Keeps every batch in memory.
    #[derive(Debug, Default)]
    struct VecSink {
        batches: Vec<RecordBatch>,
        modes: Vec<WriteMode>,
    }

    impl ChunkSink for VecSink {
        fn write_chunk(&mut self, batch: &RecordBatch, mode: WriteMode) -> Result<()> {
            self.batches.push(batch.clone());
            self.modes.push(mode);
            Ok(())
        }
    }

    fn schema() -> InferredSchema {
        InferredSchema::from_header(&["Datum von", "Datum bis", "Wind [MWh]", "Solar [MWh]"]).unwrap()
    }

    fn body(rows: usize) -> String {
        let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        (0..rows)
            .map(|i| {
                let t = start + Duration::minutes(15 * i as i64);
                format!(
                    "{};{};{},{};-\n",
                    t.format("%d.%m.%Y %H:%M"),
                    (t + Duration::minutes(15)).format("%d.%m.%Y %H:%M"),
                    1000 + i,
                    i % 10
                )
            })
            .collect()
    }

    fn run(data: &str, chunk_rows: usize) -> Result<(TranscodeReport, VecSink)> {
        let mut sink = VecSink::default();
        let mut transcoder = ChunkedTranscoder::new(
            chunk_rows,
            TimeNormalizer::new(Berlin, Duration::minutes(15)),
            &NoProgress,
            "test",
        );
        let report = transcoder.transcode(data.as_bytes(), &schema(), &mut sink)?;
        Ok((report, sink))
    }

    #[test]
    fn test_parse_decimal_formats() {
        assert_eq!(parse_decimal("1.234,5"), Some(Some(1234.5)));
        assert_eq!(parse_decimal("-12,25"), Some(Some(-12.25)));
        assert_eq!(parse_decimal("7"), Some(Some(7.0)));
        assert_eq!(parse_decimal("-"), Some(None));
        assert_eq!(parse_decimal(" "), Some(None));
        assert_eq!(parse_decimal("n/a"), None);
    }

    #[test]
    fn test_parse_timestamp_whitespace() {
        let expected = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 45, 0)
            .unwrap();
        assert_eq!(parse_local_timestamp("02.01.2024  03:45"), Some(Some(expected)));
        assert_eq!(parse_local_timestamp("02.01.2024 03:45"), Some(Some(expected)));
        assert_eq!(parse_local_timestamp("-"), Some(None));
        assert_eq!(parse_local_timestamp("yesterday"), None);
    }

    #[test]
    fn test_chunks_create_then_append() {
        let (report, sink) = run(&body(25), 10).unwrap();
        assert_eq!(report.chunks, 3);
        assert_eq!(report.rows, 25);
        assert_eq!(sink.modes, vec![WriteMode::Create, WriteMode::Append, WriteMode::Append]);
        let sizes: Vec<usize> = sink.batches.iter().map(RecordBatch::num_rows).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
    }

    #[test]
    fn test_chunk_size_does_not_change_values() {
        let data = body(57);
        let (_, whole) = run(&data, 1000).unwrap();
        let whole = flatten(&whole.batches);
        for size in [1, 7, 10, 56, 57] {
            let (report, sink) = run(&data, size).unwrap();
            assert_eq!(report.rows, 57);
            assert_eq!(flatten(&sink.batches), whole, "chunk size {}", size);
        }
    }

    /// Flatten batches into comparable rows of (start, end, wind, solar).
    fn flatten(batches: &[RecordBatch]) -> Vec<(Option<i64>, Option<i64>, Option<f64>, Option<f64>)> {
        let mut rows = Vec::new();
        for b in batches {
            let start = b.column(0).as_any().downcast_ref::<TimestampMicrosecondArray>().unwrap();
            let end = b.column(1).as_any().downcast_ref::<TimestampMicrosecondArray>().unwrap();
            let wind = b.column(2).as_any().downcast_ref::<Float64Array>().unwrap();
            let solar = b.column(3).as_any().downcast_ref::<Float64Array>().unwrap();
            for i in 0..b.num_rows() {
                let get_ts = |a: &TimestampMicrosecondArray| (!a.is_null(i)).then(|| a.value(i));
                let get_f = |a: &Float64Array| (!a.is_null(i)).then(|| a.value(i));
                rows.push((get_ts(start), get_ts(end), get_f(wind), get_f(solar)));
            }
        }
        rows
    }

    #[test]
    fn test_values_typed_and_nulls() {
        let (_, sink) = run(&body(2), 10).unwrap();
        let rows = flatten(&sink.batches);
        // 01.01.2024 00:00 CET
        assert_eq!(rows[0].0, Some(1_704_063_600_000_000));
        assert_eq!(rows[0].1, Some(1_704_063_600_000_000 + 900_000_000));
        assert_eq!(rows[1].2, Some(1001.1));
        assert_eq!(rows[1].3, None);
    }

    /// Rows on the 2023 fall-back night at the given local times.
    fn fall_back_body(times: &[&str]) -> String {
        times
            .iter()
            .map(|t| format!("29.10.2023 {};-;1;2\n", t))
            .collect()
    }

    #[test]
    fn test_unrepeated_fall_back_hour_fails_for_every_chunk_size() {
        let data = fall_back_body(&["01:00", "02:00", "03:00"]);
        let (report, whole) = run(&data, 100).unwrap();
        let whole = flatten(&whole.batches);
        assert_eq!(report.invalidated_timestamps, 1);
        assert_eq!(whole[1].0, None);

        for size in 1..=3 {
            let (report, sink) = run(&data, size).unwrap();
            assert_eq!(report.invalidated_timestamps, 1, "chunk size {}", size);
            assert_eq!(flatten(&sink.batches), whole, "chunk size {}", size);
        }
    }

    #[test]
    fn test_repeated_fall_back_hour_across_chunk_sizes() {
        let data = fall_back_body(&[
            "01:45", "02:00", "02:15", "02:30", "02:45", "02:00", "02:15", "02:30", "02:45",
            "03:00",
        ]);
        let (_, whole) = run(&data, 100).unwrap();
        let whole = flatten(&whole.batches);
        assert!(whole.iter().all(|row| row.0.is_some()));

        for size in 1..=10 {
            let (report, sink) = run(&data, size).unwrap();
            assert_eq!(report.rows, 10);
            assert_eq!(report.invalidated_timestamps, 0, "chunk size {}", size);
            assert_eq!(flatten(&sink.batches), whole, "chunk size {}", size);
        }
    }

    #[test]
    fn test_fall_back_rows_held_for_next_chunk() {
        let data = fall_back_body(&["01:00", "02:00", "03:00"]);
        let (_, sink) = run(&data, 2).unwrap();
        let sizes: Vec<usize> = sink.batches.iter().map(RecordBatch::num_rows).collect();
        assert_eq!(sizes, vec![1, 2]);
    }

    #[test]
    fn test_empty_body_is_not_an_error() {
        let (report, sink) = run("", 10).unwrap();
        assert_eq!(report, TranscodeReport::default());
        assert!(sink.batches.is_empty());
    }

    #[test]
    fn test_field_count_drift_fails() {
        let mut data = body(3);
        data.push_str("01.01.2024 01:00;01.01.2024 01:15;1\n");
        let err = run(&data, 2).unwrap_err();
        match err {
            Error::SchemaMismatch(msg) => assert!(msg.contains("line 5"), "{}", msg),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_numeric_cell_fails() {
        let data = "01.01.2024 00:00;01.01.2024 00:15;abc;1\n";
        assert!(matches!(run(data, 10), Err(Error::SchemaMismatch(_))));
    }
}
