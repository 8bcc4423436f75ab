//! Runtime issue reporting.
//!
//! Execution faults do not abort a scenario. They are turned into
//! [`Report`] values and handed to the [`Reporter`] the engine was built
//! with, so the embedding decides whether to print, collect or fail fast.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Issue,
    Warning,
    Critical,
}

/// Stable identifiers for every issue the engine can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueId {
    /// A sink saw a segment whose token matches no seek we sent.
    SeekInvalidSeqnum,
    /// The pipeline refused to take a seek event.
    SeekNotHandled,
    /// An action's executor returned an error.
    ActionExecutionError,
    /// An async action did not complete within its timeout.
    ActionTimeout,
    /// EOS or an error arrived while non-optional actions were pending.
    ScenarioNotEnded,
    /// EOS arrived before a timed action's trigger time.
    ActionEndedEarly,
    /// Reported position fell outside the configured segment.
    PositionOutOfSegment,
    /// Reported position exceeds the stream duration.
    PositionSuperiorToDuration,
    /// Pipeline latency exceeds the scenario's `max-latency`.
    LatencyTooHigh,
    /// More buffers dropped than the scenario's `max-dropped` allows.
    TooManyBuffersDropped,
    /// A requested state change failed outright.
    StateChangeFailure,
    /// A `check-property` or `check-position` expectation did not hold.
    CheckFailed,
}

impl IssueId {
    pub fn default_severity(self) -> Severity {
        match self {
            IssueId::ActionTimeout => Severity::Warning,
            IssueId::PositionOutOfSegment => Severity::Warning,
            IssueId::PositionSuperiorToDuration => Severity::Warning,
            _ => Severity::Critical,
        }
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueId::SeekInvalidSeqnum => "event::seek-invalid-seqnum",
            IssueId::SeekNotHandled => "event::seek-not-handled",
            IssueId::ActionExecutionError => "scenario::execution-error",
            IssueId::ActionTimeout => "scenario::action-timeout",
            IssueId::ScenarioNotEnded => "scenario::not-ended",
            IssueId::ActionEndedEarly => "scenario::ended-early",
            IssueId::PositionOutOfSegment => "query::position-out-of-segment",
            IssueId::PositionSuperiorToDuration => "query::position-superior-duration",
            IssueId::LatencyTooHigh => "config::latency-too-high",
            IssueId::TooManyBuffersDropped => "config::too-many-buffers-dropped",
            IssueId::StateChangeFailure => "pipeline::state-change-failure",
            IssueId::CheckFailed => "scenario::check-failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub issue: IssueId,
    pub severity: Severity,
    pub message: String,
    /// Sequence number of the action being executed, when one was.
    pub action_seq: Option<u64>,
    pub action_type: Option<String>,
    pub at: DateTime<Utc>,
}

impl Report {
    pub fn new(issue: IssueId, message: impl Into<String>) -> Report {
        Report {
            issue,
            severity: issue.default_severity(),
            message: message.into(),
            action_seq: None,
            action_type: None,
            at: Utc::now(),
        }
    }

    pub fn for_action(mut self, seq: u64, type_name: &str) -> Report {
        self.action_seq = Some(seq);
        self.action_type = Some(type_name.to_string());
        self
    }
}

pub trait Reporter: Send + Sync {
    fn report(&self, report: Report);
}

/// Reporter that keeps everything in memory. The test suites use it to
/// assert on what the engine raised; embeddings can use it to gate exit
/// codes on the worst severity seen.
#[derive(Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<Report>>,
}

impl CollectingReporter {
    pub fn new() -> CollectingReporter {
        CollectingReporter::default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn count(&self, issue: IssueId) -> usize {
        self.reports().iter().filter(|r| r.issue == issue).count()
    }

    pub fn worst_severity(&self) -> Option<Severity> {
        self.reports().iter().map(|r| r.severity).max()
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, report: Report) {
        tracing::debug!(issue = %report.issue, message = %report.message, "issue reported");
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_defaults_to_warning_severity() {
        assert_eq!(
            IssueId::ActionTimeout.default_severity(),
            Severity::Warning
        );
        assert_eq!(
            IssueId::SeekInvalidSeqnum.default_severity(),
            Severity::Critical
        );
    }

    #[test]
    fn collecting_reporter_tracks_worst_severity() {
        let reporter = CollectingReporter::new();
        reporter.report(Report::new(IssueId::ActionTimeout, "slow"));
        assert_eq!(reporter.worst_severity(), Some(Severity::Warning));
        reporter.report(Report::new(IssueId::ScenarioNotEnded, "leftovers"));
        assert_eq!(reporter.worst_severity(), Some(Severity::Critical));
        assert_eq!(reporter.count(IssueId::ActionTimeout), 1);
    }

    #[test]
    fn report_carries_action_context() {
        let r = Report::new(IssueId::ActionExecutionError, "boom").for_action(3, "seek");
        assert_eq!(r.action_seq, Some(3));
        assert_eq!(r.action_type.as_deref(), Some("seek"));
    }
}
