use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Clock time
// ---------------------------------------------------------------------------

/// A pipeline timestamp or duration in nanoseconds.
///
/// Scenario files express times in seconds (possibly fractional, possibly
/// as an expression); everything internal is nanosecond-precise.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ClockTime(pub u64);

impl ClockTime {
    pub const ZERO: ClockTime = ClockTime(0);
    pub const SECOND: ClockTime = ClockTime(1_000_000_000);
    pub const MSECOND: ClockTime = ClockTime(1_000_000);

    pub fn from_secs_f64(secs: f64) -> ClockTime {
        ClockTime((secs * 1_000_000_000.0).round() as u64)
    }

    pub fn from_millis(ms: u64) -> ClockTime {
        ClockTime(ms * 1_000_000)
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    pub fn nanos(self) -> u64 {
        self.0
    }

    pub fn saturating_sub(self, other: ClockTime) -> ClockTime {
        ClockTime(self.0.saturating_sub(other.0))
    }

    pub fn saturating_add(self, other: ClockTime) -> ClockTime {
        ClockTime(self.0.saturating_add(other.0))
    }

    pub fn to_duration(self) -> Duration {
        Duration::from_nanos(self.0)
    }
}

impl From<Duration> for ClockTime {
    fn from(d: Duration) -> ClockTime {
        ClockTime(d.as_nanos() as u64)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_ms = self.0 / 1_000_000;
        let h = total_ms / 3_600_000;
        let m = (total_ms / 60_000) % 60;
        let s = (total_ms / 1000) % 60;
        let ms = total_ms % 1000;
        write!(f, "{h}:{m:02}:{s:02}.{ms:03}")
    }
}

// ---------------------------------------------------------------------------
// Seek event tokens
// ---------------------------------------------------------------------------

/// Correlation token stamped on a seek request and echoed back on the
/// segments it produces downstream. Process-unique, never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Seqnum(u32);

static NEXT_SEQNUM: AtomicU32 = AtomicU32::new(1);

impl Seqnum {
    pub fn next() -> Seqnum {
        Seqnum(NEXT_SEQNUM.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Seqnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Pipeline states
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Null,
    Ready,
    Paused,
    #[default]
    Playing,
}

impl PipelineState {
    pub fn parse(s: &str) -> Option<PipelineState> {
        match s {
            "null" => Some(PipelineState::Null),
            "ready" => Some(PipelineState::Ready),
            "paused" => Some(PipelineState::Paused),
            "playing" => Some(PipelineState::Playing),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Null => "null",
            PipelineState::Ready => "ready",
            PipelineState::Paused => "paused",
            PipelineState::Playing => "playing",
        };
        f.write_str(s)
    }
}

/// Outcome of asking the pipeline to change state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeResult {
    /// The transition completed synchronously.
    Success,
    /// The transition will complete later; an `AsyncDone` message follows.
    Async,
    Failure,
}

// ---------------------------------------------------------------------------
// Seeks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SeekFormat {
    #[default]
    Time,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SeekType {
    #[default]
    None,
    Set,
    End,
}

/// Behavior flags on a seek, parsed from a `flags` parameter such as
/// `flush+accurate` or a YAML list of flag names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SeekFlags {
    #[serde(default)]
    pub flush: bool,
    #[serde(default)]
    pub accurate: bool,
    #[serde(default)]
    pub key_unit: bool,
    #[serde(default)]
    pub snap_before: bool,
    #[serde(default)]
    pub snap_after: bool,
}

impl SeekFlags {
    pub fn parse(spec: &str) -> Option<SeekFlags> {
        let mut flags = SeekFlags::default();
        for part in spec.split('+').map(str::trim).filter(|p| !p.is_empty()) {
            match part {
                "flush" => flags.flush = true,
                "accurate" => flags.accurate = true,
                "key-unit" | "key_unit" => flags.key_unit = true,
                "snap-before" | "snap_before" => flags.snap_before = true,
                "snap-after" | "snap_after" => flags.snap_after = true,
                "none" => {}
                _ => return None,
            }
        }
        Some(flags)
    }
}

impl fmt::Display for SeekFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.flush {
            names.push("flush");
        }
        if self.accurate {
            names.push("accurate");
        }
        if self.key_unit {
            names.push("key-unit");
        }
        if self.snap_before {
            names.push("snap-before");
        }
        if self.snap_after {
            names.push("snap-after");
        }
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("+"))
        }
    }
}
