//! The pipeline port.
//!
//! The engine never talks to a real media stack directly. It drives
//! anything implementing [`Pipeline`] and consumes [`PipelineMessage`]
//! values the embedding feeds into the scenario loop. This keeps the
//! engine deterministic under test: a scripted fake pipeline exercises
//! the exact same code paths as a real one.

use serde_yaml::Value;

use crate::types::{ClockTime, PipelineState, SeekFlags, SeekFormat, SeekType, Seqnum, StateChangeResult};

/// A fully resolved seek request, ready to hand to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekParams {
    pub seqnum: Seqnum,
    pub rate: f64,
    pub format: SeekFormat,
    pub flags: SeekFlags,
    pub start_type: SeekType,
    pub start: Option<ClockTime>,
    pub stop_type: SeekType,
    pub stop: Option<ClockTime>,
}

/// Segment bounds a sink reports after configuration, carrying the token
/// of the seek that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub format: SeekFormat,
    pub rate: f64,
    pub start: ClockTime,
    pub stop: Option<ClockTime>,
}

/// Everything the pipeline can tell the scenario loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineMessage {
    StateChanged {
        old: PipelineState,
        new: PipelineState,
        /// `Some` while the transition is part of a longer chain still in
        /// flight, `None` once the target state is reached.
        pending: Option<PipelineState>,
    },
    AsyncDone,
    Error {
        message: String,
    },
    Eos,
    Buffering {
        percent: u8,
    },
    Qos {
        dropped: u64,
    },
    LatencyChanged,
    SegmentObserved {
        sink: String,
        token: Seqnum,
        segment: Segment,
    },
    ElementAdded {
        name: String,
        is_sink: bool,
    },
    ElementRemoved {
        name: String,
    },
}

impl PipelineMessage {
    /// Name used by `wait: { message-type: ... }` matching.
    pub fn type_name(&self) -> &'static str {
        match self {
            PipelineMessage::StateChanged { .. } => "state-changed",
            PipelineMessage::AsyncDone => "async-done",
            PipelineMessage::Error { .. } => "error",
            PipelineMessage::Eos => "eos",
            PipelineMessage::Buffering { .. } => "buffering",
            PipelineMessage::Qos { .. } => "qos",
            PipelineMessage::LatencyChanged => "latency",
            PipelineMessage::SegmentObserved { .. } => "segment",
            PipelineMessage::ElementAdded { .. } => "element-added",
            PipelineMessage::ElementRemoved { .. } => "element-removed",
        }
    }

    /// Named field lookup for `expected-values` matching on waits.
    pub fn field(&self, name: &str) -> Option<Value> {
        match (self, name) {
            (PipelineMessage::Buffering { percent }, "percent") => Some(Value::from(*percent)),
            (PipelineMessage::Qos { dropped }, "dropped") => Some(Value::from(*dropped)),
            (PipelineMessage::Error { message }, "message") => {
                Some(Value::from(message.clone()))
            }
            (PipelineMessage::StateChanged { new, .. }, "new-state") => {
                Some(Value::from(new.to_string()))
            }
            (PipelineMessage::ElementAdded { name: n, .. }, "name")
            | (PipelineMessage::ElementRemoved { name: n }, "name") => {
                Some(Value::from(n.clone()))
            }
            _ => None,
        }
    }
}

/// Control surface the engine needs from a pipeline.
pub trait Pipeline: Send + Sync {
    fn position(&self) -> Option<ClockTime>;
    fn duration(&self) -> Option<ClockTime>;
    fn playback_rate(&self) -> f64;
    fn current_state(&self) -> PipelineState;

    /// Hand a seek event to the pipeline. Returns false when the pipeline
    /// refuses it, which the engine reports as `SeekNotHandled`.
    fn send_seek(&self, seek: &SeekParams) -> bool;
    fn set_state(&self, state: PipelineState) -> StateChangeResult;
    fn send_eos(&self) -> bool;
    fn query_latency(&self) -> Option<ClockTime>;

    /// Set a named property on a named element. The error string is
    /// surfaced verbatim in the resulting report.
    fn set_property(&self, target: &str, property: &str, value: &Value) -> Result<(), String>;
    fn get_property(&self, target: &str, property: &str) -> Option<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_names_match_wait_syntax() {
        assert_eq!(PipelineMessage::Eos.type_name(), "eos");
        assert_eq!(
            PipelineMessage::Buffering { percent: 50 }.type_name(),
            "buffering"
        );
    }

    #[test]
    fn message_fields_are_queryable() {
        let msg = PipelineMessage::Buffering { percent: 100 };
        assert_eq!(msg.field("percent"), Some(Value::from(100u8)));
        assert_eq!(msg.field("dropped"), None);
    }
}
