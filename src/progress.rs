//! Transcoding progress reporting.
//!
//! Reports observable progress while a response is streamed into the staged
//! Parquet file, so long downloads show how many chunks and rows have landed.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// Human output only prints every n-th chunk.
const HUMAN_EVERY: u64 = 5;

/// A single progress event for one pipeline run.
#[derive(Clone, Debug)]
pub enum TranscodeEvent {
    /// Request sent, waiting for the header row.
    Requesting { target: String },
    /// A chunk was written to the staged file.
    ChunkWritten {
        target: String,
        chunk: u64,
        rows: u64,
    },
    /// The response is fully consumed.
    Finished {
        target: String,
        chunks: u64,
        rows: u64,
    },
}

/// Reports transcoding progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: TranscodeEvent);
}

/// Human-friendly progress on stderr: "ingest Stromerzeugung/Realisierte Erzeugung  chunk 5  50,000 rows".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: TranscodeEvent) {
        let line = match &event {
            TranscodeEvent::Requesting { target } => {
                format!("ingest {}  requesting...\n", target)
            }
            TranscodeEvent::ChunkWritten {
                target,
                chunk,
                rows,
            } => {
                if chunk % HUMAN_EVERY != 1 {
                    return;
                }
                format!(
                    "ingest {}  chunk {}  {} rows\n",
                    target,
                    chunk,
                    format_number(*rows)
                )
            }
            TranscodeEvent::Finished {
                target,
                chunks,
                rows,
            } => format!(
                "ingest {}  done  {} chunks  {} rows\n",
                target,
                chunks,
                format_number(*rows)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: TranscodeEvent) {
        let obj = match &event {
            TranscodeEvent::Requesting { target } => serde_json::json!({
                "event": "progress",
                "target": target,
                "phase": "requesting"
            }),
            TranscodeEvent::ChunkWritten {
                target,
                chunk,
                rows,
            } => serde_json::json!({
                "event": "progress",
                "target": target,
                "phase": "transcoding",
                "chunk": chunk,
                "rows": rows
            }),
            TranscodeEvent::Finished {
                target,
                chunks,
                rows,
            } => serde_json::json!({
                "event": "progress",
                "target": target,
                "phase": "finished",
                "chunks": chunks,
                "rows": rows
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: TranscodeEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(25_000), "25,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
