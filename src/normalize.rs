//! Local wall-clock → UTC conversion for the interval columns.
//!
//! The provider writes interval starts in civil time of a zone with daylight
//! saving (`Europe/Berlin`). Two kinds of local instants need a policy:
//!
//! - **Non-existent** (spring-forward gap): shifted forward to the first valid
//!   local minute after the gap.
//! - **Ambiguous** (fall-back repeat): resolved from row order. In a
//!   chronological series the repeated hour appears twice; the rows before the
//!   single backwards step take the summer offset, the rows after it the
//!   winter offset. The transcoder keeps a run inside one chunk where it can;
//!   otherwise the state of the unfinished run is carried into the next chunk
//!   of the same stream.
//!
//! When row order cannot explain the ambiguity (more than one backwards step,
//! or a repeat-free ambiguous run in the middle of a chunk), every ambiguous
//! row of that chunk becomes `None` and a data-quality warning is logged.
//!
//! The interval end is never parsed: it is always start + the fixed interval.

use chrono::{Duration, LocalResult, NaiveDateTime, TimeZone, Timelike};
use chrono_tz::Tz;
use tracing::warn;

/// Gap lengths beyond this are not daylight-saving transitions.
const MAX_GAP_MINUTES: i64 = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Carry {
    last_local: NaiveDateTime,
    switched: bool,
}

#[derive(Debug, Clone, Copy)]
enum Localized {
    Null,
    Utc(i64),
    Ambiguous {
        local: NaiveDateTime,
        earliest: i64,
        latest: i64,
    },
}

/// UTC microseconds for one chunk's interval columns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedInterval {
    pub start: Vec<Option<i64>>,
    pub end: Vec<Option<i64>>,
    /// Ambiguous rows replaced by `None` because inference failed.
    pub invalidated: usize,
}

pub struct TimeNormalizer {
    tz: Tz,
    interval: Duration,
    carry: Option<Carry>,
}

impl TimeNormalizer {
    pub fn new(tz: Tz, interval: Duration) -> Self {
        Self {
            tz,
            interval,
            carry: None,
        }
    }

    /// Localize one chunk of interval starts and derive the interval ends.
    ///
    /// Chunks must be fed in stream order; `column` is only used for logging.
    pub fn normalize(&mut self, column: &str, locals: &[Option<NaiveDateTime>]) -> NormalizedInterval {
        let localized: Vec<Localized> = locals
            .iter()
            .map(|local| match local {
                Some(naive) => self.localize(naive),
                None => Localized::Null,
            })
            .collect();

        let (start, invalidated) = match self.infer(&localized) {
            Ok(start) => (start, 0),
            Err(reason) => {
                self.carry = None;
                let mut invalidated = 0;
                let start = localized
                    .iter()
                    .map(|l| match *l {
                        Localized::Utc(us) => Some(us),
                        Localized::Ambiguous { .. } => {
                            invalidated += 1;
                            None
                        }
                        Localized::Null => None,
                    })
                    .collect();
                warn!(
                    column,
                    rows = invalidated,
                    reason = %reason,
                    "could not infer daylight-saving offsets; ambiguous timestamps set to null"
                );
                (start, invalidated)
            }
        };

        let step = self.interval.num_microseconds().unwrap_or(0);
        let end = start.iter().map(|s| s.map(|us| us + step)).collect();
        NormalizedInterval {
            start,
            end,
            invalidated,
        }
    }

    /// True for a local time inside a repeated (fall-back) hour.
    pub fn is_ambiguous(&self, local: &NaiveDateTime) -> bool {
        matches!(self.tz.from_local_datetime(local), LocalResult::Ambiguous(..))
    }

    fn localize(&self, naive: &NaiveDateTime) -> Localized {
        match self.tz.from_local_datetime(naive) {
            LocalResult::Single(dt) => Localized::Utc(dt.timestamp_micros()),
            LocalResult::Ambiguous(early, late) => Localized::Ambiguous {
                local: *naive,
                earliest: early.timestamp_micros(),
                latest: late.timestamp_micros(),
            },
            LocalResult::None => match self.shift_forward(naive) {
                Some(us) => Localized::Utc(us),
                None => Localized::Null,
            },
        }
    }

    fn shift_forward(&self, naive: &NaiveDateTime) -> Option<i64> {
        let floor = naive.with_second(0)?.with_nanosecond(0)?;
        (1..=MAX_GAP_MINUTES)
            .map(|m| floor + Duration::minutes(m))
            .find_map(|candidate| self.tz.from_local_datetime(&candidate).earliest())
            .map(|dt| dt.timestamp_micros())
    }

    /// Resolve every ambiguous run of the chunk, or explain why not.
    ///
    /// Only commits the carry on success.
    fn infer(&mut self, localized: &[Localized]) -> Result<Vec<Option<i64>>, String> {
        let mut out: Vec<Option<i64>> = localized
            .iter()
            .map(|l| match *l {
                Localized::Utc(us) => Some(us),
                _ => None,
            })
            .collect();
        let mut carry = None;

        if let Some(previous) = self.carry {
            let continued = matches!(localized.first(), Some(Localized::Ambiguous { .. }));
            if !previous.switched && !continued && !localized.is_empty() {
                warn!(
                    last = %previous.last_local,
                    "ambiguous rows ending the previous chunk were never repeated; kept the earliest offset"
                );
            }
        }

        let mut i = 0;
        while i < localized.len() {
            if !matches!(localized[i], Localized::Ambiguous { .. }) {
                i += 1;
                continue;
            }
            let run_start = i;
            while i < localized.len() && matches!(localized[i], Localized::Ambiguous { .. }) {
                i += 1;
            }
            let run = &localized[run_start..i];
            let continues = if run_start == 0 { self.carry } else { None };
            let at_chunk_end = i == localized.len();

            let mut previous = continues.map(|c| c.last_local);
            let mut switched = continues.map(|c| c.switched).unwrap_or(false);
            let mut repeated = switched;

            for (offset, row) in run.iter().enumerate() {
                let Localized::Ambiguous {
                    local,
                    earliest,
                    latest,
                } = *row
                else {
                    continue;
                };
                if let Some(prev) = previous {
                    if local <= prev {
                        if switched {
                            return Err(format!(
                                "second backwards step at {} (row {})",
                                local,
                                run_start + offset
                            ));
                        }
                        switched = true;
                        repeated = true;
                    }
                }
                out[run_start + offset] = Some(if switched { latest } else { earliest });
                previous = Some(local);
            }

            if !repeated && !at_chunk_end {
                let first = match run[0] {
                    Localized::Ambiguous { local, .. } => local.to_string(),
                    _ => String::new(),
                };
                return Err(format!("no repeated times after {}", first));
            }

            if at_chunk_end {
                carry = previous.map(|last_local| Carry {
                    last_local,
                    switched,
                });
            }
        }

        self.carry = carry;
        Ok(out)
    }
}
