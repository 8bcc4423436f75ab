//! Seek and segment tracking across sink endpoints.
//!
//! Every seek the engine sends carries a token; each sink echoes the
//! token of the seek that produced its current segment. A seek counts as
//! applied only once every known sink reports that same token. Sinks
//! disagreeing while no seek is in flight is a consistency violation of
//! the pipeline itself, which the engine reports rather than swallows.

use crate::pipeline::{Segment, SeekParams};
use crate::types::{ClockTime, Seqnum};

/// Per-sink view of the last segment it configured.
#[derive(Debug, Clone)]
pub struct SinkEndpointInfo {
    pub name: String,
    pub token: Option<Seqnum>,
    pub segment: Option<Segment>,
}

/// A seek in flight, waiting for the sinks to apply it.
#[derive(Debug, Clone)]
pub struct SeekRequest {
    pub action_seq: u64,
    pub params: SeekParams,
}

/// What one segment observation means for the scenario.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    /// The reporting sink was never announced; ignored.
    UnknownSink,
    /// Some sink has not reported yet.
    NotReady,
    /// Sinks disagree, but an in-flight seek explains the disagreement.
    Transitioning,
    /// Sinks disagree and nothing explains it.
    InconsistentTokens { token: Seqnum },
    /// Every sink applied the seek with this token.
    Matched {
        action_seq: u64,
        flushing: bool,
        /// First observation of the full match; completion fires on this.
        newly: bool,
    },
    /// Sinks agree on a token that maps to no pending seek, e.g. the
    /// initial segments at stream start.
    Unified,
}

#[derive(Debug, Default)]
pub struct SeekTracker {
    sinks: Vec<SinkEndpointInfo>,
    pending: Vec<SeekRequest>,
    current_seek: Option<SeekRequest>,
    current_seqnum: Option<Seqnum>,
    segment_start: ClockTime,
    segment_stop: Option<ClockTime>,
}

impl SeekTracker {
    pub fn new() -> SeekTracker {
        SeekTracker::default()
    }

    pub fn add_sink(&mut self, name: &str) {
        if self.sinks.iter().any(|s| s.name == name) {
            return;
        }
        self.sinks.push(SinkEndpointInfo {
            name: name.to_string(),
            token: None,
            segment: None,
        });
    }

    pub fn remove_sink(&mut self, name: &str) {
        self.sinks.retain(|s| s.name != name);
    }

    pub fn sinks(&self) -> &[SinkEndpointInfo] {
        &self.sinks
    }

    pub fn has_pending_seeks(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn on_seek_issued(&mut self, action_seq: u64, params: SeekParams) {
        self.pending.push(SeekRequest { action_seq, params });
    }

    /// Forget a seek the pipeline refused to take.
    pub fn abort_seek(&mut self, seqnum: Seqnum) {
        self.pending.retain(|s| s.params.seqnum != seqnum);
    }

    /// Drop every in-flight seek, e.g. once EOS makes them moot.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Forget all sink observations. Called on a Paused to Ready
    /// transition, which invalidates every configured segment.
    pub fn reset(&mut self) {
        for sink in &mut self.sinks {
            sink.token = None;
            sink.segment = None;
        }
        self.current_seek = None;
        self.current_seqnum = None;
    }

    /// The action of the flushing seek currently being applied, if any.
    pub fn current_flushing_action(&self) -> Option<u64> {
        self.current_seek
            .as_ref()
            .filter(|s| s.params.flags.flush)
            .map(|s| s.action_seq)
    }

    /// Applied segment bounds, for position sanity checks.
    pub fn segment_bounds(&self) -> (ClockTime, Option<ClockTime>) {
        (self.segment_start, self.segment_stop)
    }

    pub fn current_seek(&self) -> Option<&SeekRequest> {
        self.current_seek.as_ref()
    }

    /// Fold one sink's segment report into the tracking state.
    pub fn observe_segment(
        &mut self,
        sink: &str,
        token: Seqnum,
        segment: Segment,
    ) -> SegmentOutcome {
        let Some(info) = self.sinks.iter_mut().find(|s| s.name == sink) else {
            return SegmentOutcome::UnknownSink;
        };
        info.token = Some(token);
        info.segment = Some(segment);

        let next = self.pending.first().map(|s| s.params.seqnum);
        let mut transitioning = false;
        let mut common: Option<Seqnum> = None;
        let mut identical = true;
        for s in &self.sinks {
            let Some(t) = s.token else {
                return SegmentOutcome::NotReady;
            };
            if Some(t) == self.current_seqnum || Some(t) == next {
                transitioning = true;
            }
            match common {
                None => common = Some(t),
                Some(c) if c != t => identical = false,
                Some(_) => {}
            }
        }
        let Some(common) = common else {
            // No sinks at all; nothing can ever match.
            return SegmentOutcome::NotReady;
        };

        if !identical {
            if transitioning || !self.pending.is_empty() {
                return SegmentOutcome::Transitioning;
            }
            return SegmentOutcome::InconsistentTokens { token };
        }

        if let Some(pos) = self
            .pending
            .iter()
            .position(|s| s.params.seqnum == common)
        {
            let request = self.pending.remove(pos);
            self.segment_start = segment.start;
            self.segment_stop = segment.stop;
            self.current_seqnum = Some(common);
            let outcome = SegmentOutcome::Matched {
                action_seq: request.action_seq,
                flushing: request.params.flags.flush,
                newly: true,
            };
            self.current_seek = Some(request);
            return outcome;
        }

        if self.current_seqnum == Some(common) {
            if let Some(current) = &self.current_seek {
                return SegmentOutcome::Matched {
                    action_seq: current.action_seq,
                    flushing: current.params.flags.flush,
                    newly: false,
                };
            }
            return SegmentOutcome::Unified;
        }

        // Agreement on a token we never issued, e.g. initial segments.
        self.current_seqnum = Some(common);
        self.current_seek = None;
        self.segment_start = segment.start;
        self.segment_stop = segment.stop;
        SegmentOutcome::Unified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SeekFlags, SeekFormat, SeekType};

    fn seek_params(seqnum: Seqnum, flush: bool) -> SeekParams {
        SeekParams {
            seqnum,
            rate: 1.0,
            format: SeekFormat::Time,
            flags: SeekFlags {
                flush,
                ..Default::default()
            },
            start_type: SeekType::Set,
            start: Some(ClockTime::from_secs_f64(5.0)),
            stop_type: SeekType::None,
            stop: None,
        }
    }

    fn segment(start: f64) -> Segment {
        Segment {
            format: SeekFormat::Time,
            rate: 1.0,
            start: ClockTime::from_secs_f64(start),
            stop: None,
        }
    }

    #[test]
    fn seek_applies_only_when_all_sinks_agree() {
        let mut tracker = SeekTracker::new();
        tracker.add_sink("audio-sink");
        tracker.add_sink("video-sink");
        let token = Seqnum::next();
        tracker.on_seek_issued(7, seek_params(token, true));

        assert_eq!(
            tracker.observe_segment("audio-sink", token, segment(5.0)),
            SegmentOutcome::NotReady
        );
        assert_eq!(
            tracker.observe_segment("video-sink", token, segment(5.0)),
            SegmentOutcome::Matched {
                action_seq: 7,
                flushing: true,
                newly: true,
            }
        );
        assert_eq!(tracker.current_flushing_action(), Some(7));
        assert_eq!(
            tracker.segment_bounds().0,
            ClockTime::from_secs_f64(5.0)
        );
    }

    #[test]
    fn reobserving_a_matched_seek_is_not_newly() {
        let mut tracker = SeekTracker::new();
        tracker.add_sink("sink");
        let token = Seqnum::next();
        tracker.on_seek_issued(3, seek_params(token, false));
        assert!(matches!(
            tracker.observe_segment("sink", token, segment(5.0)),
            SegmentOutcome::Matched { newly: true, .. }
        ));
        assert!(matches!(
            tracker.observe_segment("sink", token, segment(5.0)),
            SegmentOutcome::Matched { newly: false, .. }
        ));
    }

    #[test]
    fn disagreement_during_seek_is_transitioning() {
        let mut tracker = SeekTracker::new();
        tracker.add_sink("audio-sink");
        tracker.add_sink("video-sink");
        let stale = Seqnum::next();
        tracker.observe_segment("audio-sink", stale, segment(0.0));
        tracker.observe_segment("video-sink", stale, segment(0.0));

        let token = Seqnum::next();
        tracker.on_seek_issued(4, seek_params(token, true));
        assert_eq!(
            tracker.observe_segment("audio-sink", token, segment(5.0)),
            SegmentOutcome::Transitioning
        );
    }

    #[test]
    fn unexplained_disagreement_is_a_violation() {
        let mut tracker = SeekTracker::new();
        tracker.add_sink("audio-sink");
        tracker.add_sink("video-sink");
        let a = Seqnum::next();
        let b = Seqnum::next();
        tracker.observe_segment("audio-sink", a, segment(0.0));
        assert_eq!(
            tracker.observe_segment("video-sink", b, segment(1.0)),
            SegmentOutcome::InconsistentTokens { token: b }
        );
    }

    #[test]
    fn superseding_seek_matches_without_completing_the_older_one() {
        let mut tracker = SeekTracker::new();
        tracker.add_sink("audio-sink");
        tracker.add_sink("video-sink");
        let first = Seqnum::next();
        let second = Seqnum::next();
        tracker.on_seek_issued(1, seek_params(first, true));
        tracker.on_seek_issued(2, seek_params(second, true));

        // The sinks only ever apply the newer seek.
        assert_eq!(
            tracker.observe_segment("audio-sink", second, segment(5.0)),
            SegmentOutcome::NotReady
        );
        assert_eq!(
            tracker.observe_segment("video-sink", second, segment(5.0)),
            SegmentOutcome::Matched {
                action_seq: 2,
                flushing: true,
                newly: true,
            }
        );
        // The superseded seek stays pending; nothing ever reports it as
        // applied.
        assert!(tracker.has_pending_seeks());
        assert_eq!(tracker.current_seek().map(|s| s.action_seq), Some(2));
    }

    #[test]
    fn initial_segments_unify_without_a_seek() {
        let mut tracker = SeekTracker::new();
        tracker.add_sink("sink");
        let token = Seqnum::next();
        assert_eq!(
            tracker.observe_segment("sink", token, segment(0.0)),
            SegmentOutcome::Unified
        );
        assert_eq!(tracker.current_flushing_action(), None);
    }

    #[test]
    fn unknown_sinks_are_ignored() {
        let mut tracker = SeekTracker::new();
        assert_eq!(
            tracker.observe_segment("mystery", Seqnum::next(), segment(0.0)),
            SegmentOutcome::UnknownSink
        );
    }

    #[test]
    fn reset_forgets_observations_but_keeps_sinks() {
        let mut tracker = SeekTracker::new();
        tracker.add_sink("sink");
        let token = Seqnum::next();
        tracker.on_seek_issued(1, seek_params(token, true));
        tracker.observe_segment("sink", token, segment(5.0));
        tracker.reset();
        assert_eq!(tracker.sinks().len(), 1);
        assert!(tracker.sinks()[0].token.is_none());
        assert_eq!(tracker.current_flushing_action(), None);
    }
}
