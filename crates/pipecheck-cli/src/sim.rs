//! A scripted stand-in for a real media pipeline.
//!
//! The simulator keeps a virtual clock the run loop advances in steps.
//! Seeks jump the clock, state changes and segments are acknowledged
//! with the matching bus messages, and reaching the end of the media
//! produces an end-of-stream. Good enough to exercise every scenario
//! code path without a media stack in the loop.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde_yaml::Value;

use pipecheck_core::pipeline::{Pipeline, PipelineMessage, SeekParams, Segment};
use pipecheck_core::types::{
    ClockTime, PipelineState, SeekFormat, SeekType, Seqnum, StateChangeResult,
};

/// Non-sink elements every simulated pipeline announces at startup.
const FIXED_ELEMENTS: &[&str] = &["source", "demux", "decoder"];

struct Inner {
    position: ClockTime,
    duration: ClockTime,
    rate: f64,
    state: PipelineState,
    latency: ClockTime,
    sinks: Vec<String>,
    outbox: VecDeque<PipelineMessage>,
    properties: BTreeMap<String, Value>,
    eos_emitted: bool,
}

pub struct SimPipeline {
    inner: Mutex<Inner>,
}

impl SimPipeline {
    pub fn new(duration_secs: f64, sink_count: usize) -> Arc<SimPipeline> {
        let duration = ClockTime::from_secs_f64(duration_secs.max(0.0));
        let sinks: Vec<String> = (0..sink_count.max(1)).map(|i| format!("sink-{i}")).collect();

        let mut outbox = VecDeque::new();
        for name in FIXED_ELEMENTS {
            outbox.push_back(PipelineMessage::ElementAdded {
                name: name.to_string(),
                is_sink: false,
            });
        }
        for sink in &sinks {
            outbox.push_back(PipelineMessage::ElementAdded {
                name: sink.clone(),
                is_sink: true,
            });
        }
        // Initial segments, one shared token nobody requested.
        let token = Seqnum::next();
        for sink in &sinks {
            outbox.push_back(PipelineMessage::SegmentObserved {
                sink: sink.clone(),
                token,
                segment: Segment {
                    format: SeekFormat::Time,
                    rate: 1.0,
                    start: ClockTime::ZERO,
                    stop: Some(duration),
                },
            });
        }

        Arc::new(SimPipeline {
            inner: Mutex::new(Inner {
                position: ClockTime::ZERO,
                duration,
                rate: 1.0,
                state: PipelineState::Null,
                latency: ClockTime::from_millis(20),
                sinks,
                outbox,
                properties: BTreeMap::new(),
                eos_emitted: false,
            }),
        })
    }

    /// Move the virtual clock forward by `dt_secs` of wall time. The
    /// position moves with the playback rate while playing.
    pub fn advance(&self, dt_secs: f64) {
        let mut inner = self.lock();
        if inner.state != PipelineState::Playing || inner.eos_emitted {
            return;
        }
        let delta = ClockTime::from_secs_f64(dt_secs * inner.rate.abs());
        if inner.rate >= 0.0 {
            inner.position = inner.position.saturating_add(delta).min(inner.duration);
            if inner.position >= inner.duration {
                inner.eos_emitted = true;
                inner.outbox.push_back(PipelineMessage::Eos);
            }
        } else {
            inner.position = inner.position.saturating_sub(delta);
            if inner.position == ClockTime::ZERO {
                inner.eos_emitted = true;
                inner.outbox.push_back(PipelineMessage::Eos);
            }
        }
    }

    /// Take every message produced since the last call.
    pub fn drain(&self) -> Vec<PipelineMessage> {
        self.lock().outbox.drain(..).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Pipeline for SimPipeline {
    fn position(&self) -> Option<ClockTime> {
        Some(self.lock().position)
    }

    fn duration(&self) -> Option<ClockTime> {
        Some(self.lock().duration)
    }

    fn playback_rate(&self) -> f64 {
        self.lock().rate
    }

    fn current_state(&self) -> PipelineState {
        self.lock().state
    }

    fn send_seek(&self, seek: &SeekParams) -> bool {
        let mut inner = self.lock();
        if seek.start_type == SeekType::Set {
            let Some(start) = seek.start else {
                return false;
            };
            inner.position = start.min(inner.duration);
        }
        inner.rate = seek.rate;
        inner.eos_emitted = false;

        let stop = match seek.stop_type {
            SeekType::Set => seek.stop,
            SeekType::End => Some(inner.duration),
            SeekType::None => Some(inner.duration),
        };
        let segment = Segment {
            format: SeekFormat::Time,
            rate: seek.rate,
            start: inner.position,
            stop,
        };
        let observations: Vec<PipelineMessage> = inner
            .sinks
            .iter()
            .map(|sink| PipelineMessage::SegmentObserved {
                sink: sink.clone(),
                token: seek.seqnum,
                segment,
            })
            .collect();
        inner.outbox.extend(observations);
        if seek.flags.flush {
            // A flushing seek makes the pipeline re-preroll.
            inner.outbox.push_back(PipelineMessage::AsyncDone);
        }
        true
    }

    fn set_state(&self, state: PipelineState) -> StateChangeResult {
        let mut inner = self.lock();
        let old = inner.state;
        if old == state {
            return StateChangeResult::Success;
        }
        inner.state = state;
        inner.outbox.push_back(PipelineMessage::StateChanged {
            old,
            new: state,
            pending: None,
        });
        StateChangeResult::Success
    }

    fn send_eos(&self) -> bool {
        let mut inner = self.lock();
        if !inner.eos_emitted {
            inner.eos_emitted = true;
            inner.outbox.push_back(PipelineMessage::Eos);
        }
        true
    }

    fn query_latency(&self) -> Option<ClockTime> {
        Some(self.lock().latency)
    }

    fn set_property(&self, target: &str, property: &str, value: &Value) -> Result<(), String> {
        self.lock()
            .properties
            .insert(format!("{target}.{property}"), value.clone());
        Ok(())
    }

    fn get_property(&self, target: &str, property: &str) -> Option<Value> {
        self.lock()
            .properties
            .get(&format!("{target}.{property}"))
            .cloned()
    }
}
