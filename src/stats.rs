//! # STATS — resource and time accounting
//!
//! Three snapshots (begin-of-run, current, restored-from-checkpoint) and a
//! derived total, the same "capture now, diff against a baseline" shape the
//! teacher's `progress.rs` uses for its wall-clock rate calculation, but
//! extended to full `getrusage(2)` accounting since STATS must survive a
//! checkpoint/restart cycle (`Progress` never does — it is recreated fresh
//! each run).

use libc::{getrusage, rusage, timeval, RUSAGE_SELF};
use std::mem::MaybeUninit;
use std::time::{SystemTime, UNIX_EPOCH};

/// A `sec.usec` duration or point in time, matching the checkpoint record's
/// `*_timestamp`, `*_ru_utime`, `*_ru_stime`, `*_wall_clock` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeVal {
    pub sec: i64,
    pub usec: i64,
}

impl TimeVal {
    pub const ZERO: TimeVal = TimeVal { sec: 0, usec: 0 };

    fn from_libc(tv: timeval) -> Self {
        TimeVal {
            sec: tv.tv_sec as i64,
            usec: tv.tv_usec as i64,
        }
    }

    fn as_micros(&self) -> i128 {
        self.sec as i128 * 1_000_000 + self.usec as i128
    }

    fn from_micros(micros: i128) -> Self {
        TimeVal {
            sec: (micros.div_euclid(1_000_000)) as i64,
            usec: (micros.rem_euclid(1_000_000)) as i64,
        }
    }

    /// `self - other`, clamped to zero (with the caller expected to warn) if
    /// the result would be negative — STATS never reports negative deltas.
    pub fn saturating_sub(&self, other: &TimeVal) -> (TimeVal, bool) {
        let diff = self.as_micros() - other.as_micros();
        if diff < 0 {
            (TimeVal::ZERO, true)
        } else {
            (TimeVal::from_micros(diff), false)
        }
    }

    pub fn add(&self, other: &TimeVal) -> TimeVal {
        TimeVal::from_micros(self.as_micros() + other.as_micros())
    }

    /// `sec.usec` as printed in checkpoint records, e.g. `1732489123.045012`.
    pub fn to_record_string(&self) -> String {
        format!("{}.{:06}", self.sec, self.usec)
    }

    pub fn parse(s: &str) -> Option<TimeVal> {
        let (sec_s, usec_s) = s.split_once('.')?;
        Some(TimeVal {
            sec: sec_s.parse().ok()?,
            usec: usec_s.parse().ok()?,
        })
    }

    /// `YYYY-MM-DD HH:MM:SS UTC`, computed from the epoch-seconds component.
    pub fn to_date_time_string(&self) -> String {
        use chrono::{DateTime, Utc};
        let dt: DateTime<Utc> = DateTime::from_timestamp(self.sec, 0).unwrap_or(DateTime::UNIX_EPOCH);
        dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    }
}

/// One captured resource-usage snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub timestamp: TimeVal,
    pub ru_utime: TimeVal,
    pub ru_stime: TimeVal,
    pub wall_clock: TimeVal,
    pub ru_maxrss: i64,
    pub ru_minflt: i64,
    pub ru_majflt: i64,
    pub ru_inblock: i64,
    pub ru_oublock: i64,
    pub ru_nvcsw: i64,
    pub ru_nivcsw: i64,
}

fn wall_clock_now() -> TimeVal {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    TimeVal {
        sec: now.as_secs() as i64,
        usec: now.subsec_micros() as i64,
    }
}

/// Capture current process resource usage via `getrusage(RUSAGE_SELF, ...)`.
/// `wall_clock` here is the point-in-time wall clock reading at capture,
/// not yet a delta; per the open question in spec.md §9, `current.wall_clock`
/// is a convenience snapshot only — the authoritative wall-clock figure is
/// computed by [`PrimeStats::total`].
pub fn capture_now() -> StatsSnapshot {
    let mut ru: MaybeUninit<rusage> = MaybeUninit::zeroed();
    // SAFETY: `ru` is a valid, zeroed `rusage` buffer of the correct size;
    // getrusage only ever writes to it.
    let rc = unsafe { getrusage(RUSAGE_SELF, ru.as_mut_ptr()) };
    let wall = wall_clock_now();
    if rc != 0 {
        return StatsSnapshot {
            timestamp: wall,
            wall_clock: wall,
            ..Default::default()
        };
    }
    // SAFETY: getrusage returned success, so `ru` is fully initialized.
    let ru = unsafe { ru.assume_init() };
    StatsSnapshot {
        timestamp: wall,
        ru_utime: TimeVal::from_libc(ru.ru_utime),
        ru_stime: TimeVal::from_libc(ru.ru_stime),
        wall_clock: wall,
        ru_maxrss: ru.ru_maxrss as i64,
        ru_minflt: ru.ru_minflt as i64,
        ru_majflt: ru.ru_majflt as i64,
        ru_inblock: ru.ru_inblock as i64,
        ru_oublock: ru.ru_oublock as i64,
        ru_nvcsw: ru.ru_nvcsw as i64,
        ru_nivcsw: ru.ru_nivcsw as i64,
    }
}

impl StatsSnapshot {
    /// One human-readable line for the stderr stats dump (spec.md §6):
    /// timestamps as both `sec.usec` and an RFC-3339-like UTC string,
    /// followed by the `getrusage(2)` counters.
    pub fn dump(&self, label: &str) -> String {
        format!(
            "{label}: timestamp={} ({}) utime={} stime={} wall_clock={} maxrss={} minflt={} majflt={} inblock={} oublock={} nvcsw={} nivcsw={}",
            self.timestamp.to_record_string(),
            self.timestamp.to_date_time_string(),
            self.ru_utime.to_record_string(),
            self.ru_stime.to_record_string(),
            self.wall_clock.to_record_string(),
            self.ru_maxrss,
            self.ru_minflt,
            self.ru_majflt,
            self.ru_inblock,
            self.ru_oublock,
            self.ru_nvcsw,
            self.ru_nivcsw,
        )
    }
}

/// Cumulative resource usage across begin-of-run, current, and restored
/// (accumulated from prior runs) snapshots, with a derived total.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimeStats {
    pub beginrun: StatsSnapshot,
    pub current: StatsSnapshot,
    pub restored: StatsSnapshot,
}

impl PrimeStats {
    /// Start a fresh run: `beginrun` and `current` both capture now, `restored`
    /// is zeroed (no prior accumulated usage).
    pub fn new() -> Self {
        let now = capture_now();
        PrimeStats {
            beginrun: now,
            current: now,
            restored: StatsSnapshot::default(),
        }
    }

    /// Restore accumulated usage from a checkpoint; `beginrun`/`current`
    /// still capture the new process's start, per spec.md §4.5.
    pub fn with_restored(restored: StatsSnapshot) -> Self {
        let now = capture_now();
        PrimeStats {
            beginrun: now,
            current: now,
            restored,
        }
    }

    /// Refresh the `current` snapshot. Called once per checkpoint write.
    pub fn update(&mut self) {
        self.current = capture_now();
    }

    /// `total = restored + (current - beginrun)`, component-wise, with any
    /// negative delta (clock or accounting regression) clamped to zero and
    /// logged as a warning. `ru_maxrss` is a running maximum, not a sum.
    pub fn total(&self) -> StatsSnapshot {
        let mut warned = false;
        let mut sub = |cur: TimeVal, begin: TimeVal, restored: TimeVal| -> TimeVal {
            let (delta, clamp) = cur.saturating_sub(&begin);
            if clamp {
                warned = true;
            }
            restored.add(&delta)
        };

        let total = StatsSnapshot {
            timestamp: capture_now().timestamp,
            ru_utime: sub(self.current.ru_utime, self.beginrun.ru_utime, self.restored.ru_utime),
            ru_stime: sub(self.current.ru_stime, self.beginrun.ru_stime, self.restored.ru_stime),
            wall_clock: sub(self.current.wall_clock, self.beginrun.wall_clock, self.restored.wall_clock),
            ru_maxrss: self.current.ru_maxrss.max(self.restored.ru_maxrss),
            ru_minflt: self.restored.ru_minflt + (self.current.ru_minflt - self.beginrun.ru_minflt).max(0),
            ru_majflt: self.restored.ru_majflt + (self.current.ru_majflt - self.beginrun.ru_majflt).max(0),
            ru_inblock: self.restored.ru_inblock + (self.current.ru_inblock - self.beginrun.ru_inblock).max(0),
            ru_oublock: self.restored.ru_oublock + (self.current.ru_oublock - self.beginrun.ru_oublock).max(0),
            ru_nvcsw: self.restored.ru_nvcsw + (self.current.ru_nvcsw - self.beginrun.ru_nvcsw).max(0),
            ru_nivcsw: self.restored.ru_nivcsw + (self.current.ru_nivcsw - self.beginrun.ru_nivcsw).max(0),
        };

        if warned {
            tracing::warn!("clock or accounting regression detected; clamped delta to zero");
        }

        total
    }

    /// `--write-total-stats` dump: just the derived total.
    pub fn dump_total(&self) -> String {
        self.total().dump("total")
    }

    /// `--write-extended-stats` dump: all three snapshots plus the total.
    pub fn dump_extended(&self) -> String {
        [
            self.beginrun.dump("beginrun"),
            self.current.dump("current"),
            self.restored.dump("restored"),
            self.total().dump("total"),
        ]
        .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeval_record_roundtrip() {
        let tv = TimeVal { sec: 123, usec: 456 };
        let s = tv.to_record_string();
        assert_eq!(s, "123.000456");
        assert_eq!(TimeVal::parse(&s), Some(tv));
    }

    #[test]
    fn timeval_sub_clamps_negative() {
        let a = TimeVal { sec: 1, usec: 0 };
        let b = TimeVal { sec: 2, usec: 0 };
        let (diff, clamped) = a.saturating_sub(&b);
        assert_eq!(diff, TimeVal::ZERO);
        assert!(clamped);
    }

    #[test]
    fn timeval_sub_normal() {
        let a = TimeVal { sec: 5, usec: 500_000 };
        let b = TimeVal { sec: 2, usec: 100_000 };
        let (diff, clamped) = a.saturating_sub(&b);
        assert_eq!(diff, TimeVal { sec: 3, usec: 400_000 });
        assert!(!clamped);
    }

    #[test]
    fn capture_now_populates_timestamp() {
        let s = capture_now();
        assert!(s.timestamp.sec > 0);
    }

    #[test]
    fn total_equals_restored_when_no_elapsed_time() {
        let restored = StatsSnapshot {
            ru_maxrss: 1000,
            ru_minflt: 50,
            ..Default::default()
        };
        let stats = PrimeStats {
            beginrun: StatsSnapshot::default(),
            current: StatsSnapshot::default(),
            restored,
        };
        let total = stats.total();
        assert_eq!(total.ru_maxrss, 1000);
        assert_eq!(total.ru_minflt, 50);
    }

    #[test]
    fn total_accumulates_delta_onto_restored() {
        let beginrun = StatsSnapshot {
            ru_utime: TimeVal { sec: 10, usec: 0 },
            ru_minflt: 5,
            ..Default::default()
        };
        let current = StatsSnapshot {
            ru_utime: TimeVal { sec: 15, usec: 0 },
            ru_minflt: 8,
            ..Default::default()
        };
        let restored = StatsSnapshot {
            ru_utime: TimeVal { sec: 100, usec: 0 },
            ru_minflt: 20,
            ..Default::default()
        };
        let stats = PrimeStats { beginrun, current, restored };
        let total = stats.total();
        assert_eq!(total.ru_utime, TimeVal { sec: 105, usec: 0 });
        assert_eq!(total.ru_minflt, 23);
    }

    #[test]
    fn date_time_string_format() {
        let tv = TimeVal { sec: 0, usec: 0 };
        assert_eq!(tv.to_date_time_string(), "1970-01-01 00:00:00 UTC");
    }

    #[test]
    fn dump_total_contains_label_and_timestamp() {
        let stats = PrimeStats::new();
        let dump = stats.dump_total();
        assert!(dump.starts_with("total: timestamp="));
    }

    #[test]
    fn dump_extended_contains_all_four_blocks() {
        let stats = PrimeStats::new();
        let dump = stats.dump_extended();
        assert!(dump.contains("beginrun: "));
        assert!(dump.contains("current: "));
        assert!(dump.contains("restored: "));
        assert!(dump.contains("total: "));
    }
}
