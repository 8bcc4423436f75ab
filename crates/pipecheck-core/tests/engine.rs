//! End-to-end scheduler tests against a scripted pipeline.

use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use serde_yaml::Value;

use pipecheck_core::action::ActionState;
use pipecheck_core::pipeline::{
    Pipeline, PipelineMessage, SeekParams, Segment,
};
use pipecheck_core::report::{CollectingReporter, IssueId, Reporter};
use pipecheck_core::scenario::{Scenario, ScenarioEvent};
use pipecheck_core::types::{
    ClockTime, PipelineState, SeekFormat, StateChangeResult,
};

#[derive(Default)]
struct Inner {
    position: Option<ClockTime>,
    duration: Option<ClockTime>,
    rate: f64,
    state: PipelineState,
    seeks: Vec<SeekParams>,
    refuse_seeks: bool,
    eos_sent: bool,
    properties: BTreeMap<String, Value>,
}

struct FakePipeline {
    inner: Mutex<Inner>,
}

impl FakePipeline {
    fn new() -> Arc<FakePipeline> {
        Arc::new(FakePipeline {
            inner: Mutex::new(Inner {
                position: Some(ClockTime::ZERO),
                duration: Some(ClockTime::from_secs_f64(60.0)),
                rate: 1.0,
                state: PipelineState::Playing,
                ..Default::default()
            }),
        })
    }

    fn set_position(&self, secs: f64) {
        self.inner.lock().unwrap().position = Some(ClockTime::from_secs_f64(secs));
    }

    fn set_rate(&self, rate: f64) {
        self.inner.lock().unwrap().rate = rate;
    }

    fn state(&self) -> PipelineState {
        self.inner.lock().unwrap().state
    }

    fn sent_seeks(&self) -> Vec<SeekParams> {
        self.inner.lock().unwrap().seeks.clone()
    }

    fn eos_sent(&self) -> bool {
        self.inner.lock().unwrap().eos_sent
    }
}

impl Pipeline for FakePipeline {
    fn position(&self) -> Option<ClockTime> {
        self.inner.lock().unwrap().position
    }

    fn duration(&self) -> Option<ClockTime> {
        self.inner.lock().unwrap().duration
    }

    fn playback_rate(&self) -> f64 {
        self.inner.lock().unwrap().rate
    }

    fn current_state(&self) -> PipelineState {
        self.inner.lock().unwrap().state
    }

    fn send_seek(&self, seek: &SeekParams) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.refuse_seeks {
            return false;
        }
        inner.rate = seek.rate;
        inner.seeks.push(seek.clone());
        true
    }

    fn set_state(&self, state: PipelineState) -> StateChangeResult {
        self.inner.lock().unwrap().state = state;
        StateChangeResult::Success
    }

    fn send_eos(&self) -> bool {
        self.inner.lock().unwrap().eos_sent = true;
        true
    }

    fn query_latency(&self) -> Option<ClockTime> {
        None
    }

    fn set_property(&self, target: &str, property: &str, value: &Value) -> Result<(), String> {
        self.inner
            .lock()
            .unwrap()
            .properties
            .insert(format!("{target}.{property}"), value.clone());
        Ok(())
    }

    fn get_property(&self, target: &str, property: &str) -> Option<Value> {
        self.inner
            .lock()
            .unwrap()
            .properties
            .get(&format!("{target}.{property}"))
            .cloned()
    }
}

struct Harness {
    pipeline: Arc<FakePipeline>,
    reporter: Arc<CollectingReporter>,
    scenario: Scenario,
    events: Receiver<ScenarioEvent>,
}

fn harness(source: &str) -> Harness {
    let pipeline = FakePipeline::new();
    let reporter = Arc::new(CollectingReporter::new());
    let mut scenario = Scenario::from_source(
        pipeline.clone() as Arc<dyn Pipeline>,
        reporter.clone() as Arc<dyn Reporter>,
        source,
    )
    .unwrap();
    let events = scenario.take_events().unwrap();
    scenario.attach().unwrap();
    Harness {
        pipeline,
        reporter,
        scenario,
        events,
    }
}

/// Names of the actions that finished since the last call, in order.
fn finished(events: &Receiver<ScenarioEvent>) -> Vec<String> {
    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ScenarioEvent::ActionDone { action, .. } = event {
            names.push(action.type_name);
        }
    }
    names
}

/// Like [`finished`], but preferring the user label over the type name.
fn finished_labels(events: &Receiver<ScenarioEvent>) -> Vec<String> {
    let mut labels = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ScenarioEvent::ActionDone { action, .. } = event {
            labels.push(action.name.unwrap_or(action.type_name));
        }
    }
    labels
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
fn timed_actions_fire_in_declaration_order_as_position_advances() {
    let mut h = harness(
        r#"
- action: set-vars
  playback-time: 2.0
  checkpoint: 1
- action: eos
  playback-time: 5.0
"#,
    );

    h.scenario.tick();
    assert!(finished(&h.events).is_empty());
    assert!(!h.pipeline.eos_sent());

    h.pipeline.set_position(2.5);
    h.scenario.tick();
    assert_eq!(finished(&h.events), vec!["set-vars"]);
    assert!(!h.pipeline.eos_sent());

    h.pipeline.set_position(5.0);
    h.scenario.tick();
    assert_eq!(finished(&h.events), vec!["eos"]);
    assert!(h.pipeline.eos_sent());
    assert!(h.scenario.is_done());
    assert_eq!(h.reporter.reports().len(), 0);
}

#[test]
fn reverse_rate_waits_for_position_to_fall_below_the_trigger() {
    let mut h = harness(
        r#"
- action: set-vars
  playback-time: 5.0
  checkpoint: 1
"#,
    );
    h.pipeline.set_rate(-1.0);

    h.pipeline.set_position(10.0);
    h.scenario.tick();
    assert!(finished(&h.events).is_empty());

    h.pipeline.set_position(4.0);
    h.scenario.tick();
    assert_eq!(finished(&h.events), vec!["set-vars"]);
}

#[test]
fn repeat_runs_an_action_back_to_back() {
    let mut h = harness(
        r#"
- action: set-vars
  repeat: 3
  marker: yes
- action: eos
"#,
    );
    h.scenario.tick();
    assert_eq!(
        finished(&h.events),
        vec!["set-vars", "set-vars", "set-vars", "eos"]
    );
}

#[test]
fn foreach_expands_into_one_sub_action_per_value() {
    let mut h = harness(
        r#"
- action: foreach
  n:
    start: 0
    stop: 6
    step: 2
  actions:
    - action: set-vars
      current: "$(n)"
"#,
    );
    h.scenario.tick();
    // The foreach itself completes, then its three instances run.
    assert_eq!(
        finished(&h.events),
        vec!["foreach", "set-vars", "set-vars", "set-vars"]
    );
    assert!(h.scenario.is_done());
}

#[test]
fn seek_completes_only_once_every_sink_reports_its_token() {
    let mut h = harness(
        r#"
- action: seek
  playback-time: 0.0
  start: 12.0
- action: set-vars
  marker: yes
"#,
    );
    let handle = h.scenario.handle();
    handle.post_message(PipelineMessage::ElementAdded {
        name: "sink-a".to_string(),
        is_sink: true,
    });
    handle.post_message(PipelineMessage::ElementAdded {
        name: "sink-b".to_string(),
        is_sink: true,
    });

    h.scenario.tick();
    assert!(finished(&h.events).is_empty());
    let seeks = h.pipeline.sent_seeks();
    assert_eq!(seeks.len(), 1);
    assert_eq!(seeks[0].start, Some(ClockTime::from_secs_f64(12.0)));
    let token = seeks[0].seqnum;

    // One sink applying the segment is not enough.
    handle.post_message(PipelineMessage::SegmentObserved {
        sink: "sink-a".to_string(),
        token,
        segment: segment(12.0),
    });
    h.scenario.tick();
    assert!(finished(&h.events).is_empty());

    handle.post_message(PipelineMessage::SegmentObserved {
        sink: "sink-b".to_string(),
        token,
        segment: segment(12.0),
    });
    h.scenario.tick();
    assert_eq!(finished(&h.events), vec!["seek", "set-vars"]);
    assert_eq!(h.reporter.reports().len(), 0);
}

#[test]
fn refused_seek_is_reported_and_does_not_block_the_queue() {
    let mut h = harness(
        r#"
- action: seek
  start: 12.0
- action: set-vars
  marker: yes
"#,
    );
    h.pipeline.inner.lock().unwrap().refuse_seeks = true;
    h.scenario.tick();
    assert_eq!(finished(&h.events), vec!["seek", "set-vars"]);
    assert_eq!(h.reporter.count(IssueId::SeekNotHandled), 1);
}

#[test]
fn timed_out_seek_is_not_completed_by_a_newer_seeks_token() {
    let mut h = harness(
        r#"
- action: seek
  start: 5.0
  timeout: 0.0
- action: seek
  start: 10.0
- action: set-vars
  marker: yes
"#,
    );
    let handle = h.scenario.handle();
    handle.post_message(PipelineMessage::ElementAdded {
        name: "sink".to_string(),
        is_sink: true,
    });

    // The zero timeout forces the first seek out of the way; the second
    // then goes to the pipeline with its own token.
    h.scenario.tick();
    std::thread::sleep(std::time::Duration::from_millis(2));
    h.scenario.tick();
    assert_eq!(finished(&h.events), vec!["seek"]);
    assert_eq!(h.reporter.count(IssueId::ActionTimeout), 1);
    let seeks = h.pipeline.sent_seeks();
    assert_eq!(seeks.len(), 2);

    // The sink only ever applies the newer seek. That completes the
    // second action and must not touch the superseded one.
    handle.post_message(PipelineMessage::SegmentObserved {
        sink: "sink".to_string(),
        token: seeks[1].seqnum,
        segment: segment(10.0),
    });
    h.scenario.tick();
    assert_eq!(finished(&h.events), vec!["seek", "set-vars"]);
    assert_eq!(h.reporter.count(IssueId::ActionTimeout), 1);
    assert!(h.scenario.is_done());
}

#[test]
fn eos_reports_actions_that_never_got_to_run() {
    let mut h = harness(
        r#"
- action: set-vars
  playback-time: 5.0
  checkpoint: 1
- action: seek
  playback-time: 8.0
  start: 0.0
  optional: true
"#,
    );
    h.pipeline.set_position(1.0);
    h.scenario.handle().post_message(PipelineMessage::Eos);
    h.scenario.tick();

    assert_eq!(h.reporter.count(IssueId::ActionEndedEarly), 1);
    // Only the non-optional set-vars counts against the scenario.
    let not_ended: Vec<_> = h
        .reporter
        .reports()
        .into_iter()
        .filter(|r| r.issue == IssueId::ScenarioNotEnded)
        .collect();
    assert_eq!(not_ended.len(), 1);
    assert!(not_ended[0].message.contains("set-vars"));
    assert!(!not_ended[0].message.contains("seek"));
    assert_eq!(h.pipeline.state(), PipelineState::Null);
}

#[test]
fn pipeline_error_stops_the_scenario_unless_allowed() {
    let mut h = harness(
        r#"
- action: set-vars
  playback-time: 5.0
  checkpoint: 1
"#,
    );
    h.scenario.handle().post_message(PipelineMessage::Error {
        message: "internal data stream error".to_string(),
    });
    h.scenario.tick();
    assert_eq!(h.reporter.count(IssueId::ScenarioNotEnded), 1);
    assert_eq!(h.pipeline.state(), PipelineState::Null);
}

#[test]
fn allowed_errors_do_not_stop_the_scenario() {
    let mut h = harness(
        r#"
- action: meta
  allow-errors: true
- action: set-vars
  playback-time: 5.0
  checkpoint: 1
"#,
    );
    h.scenario.handle().post_message(PipelineMessage::Error {
        message: "decoder hiccup".to_string(),
    });
    h.scenario.tick();
    assert_eq!(h.reporter.count(IssueId::ScenarioNotEnded), 0);
    h.pipeline.set_position(6.0);
    h.scenario.tick();
    assert_eq!(finished(&h.events), vec!["set-vars"]);
}

#[test]
fn buffering_gates_execution_until_full() {
    let mut h = harness(
        r#"
- action: set-vars
  checkpoint: 1
"#,
    );
    let handle = h.scenario.handle();
    handle.post_message(PipelineMessage::Buffering { percent: 30 });
    h.scenario.tick();
    assert!(finished(&h.events).is_empty());

    handle.post_message(PipelineMessage::Buffering { percent: 100 });
    h.scenario.tick();
    assert_eq!(finished(&h.events), vec!["set-vars"]);
}

#[test]
fn set_property_before_any_action_waits_for_its_element() {
    let mut h = harness(
        r#"
- action: set-property
  target: demux
  property: latency
  value: 40
"#,
    );
    h.scenario.tick();
    assert!(finished(&h.events).is_empty());
    assert_eq!(h.scenario.pending_actions().len(), 1);

    h.scenario.handle().post_message(PipelineMessage::ElementAdded {
        name: "demux".to_string(),
        is_sink: false,
    });
    h.scenario.tick();
    assert_eq!(finished(&h.events), vec!["set-property"]);
    assert_eq!(
        h.pipeline.get_property("demux", "latency"),
        Some(Value::from(40))
    );
}

#[test]
fn wait_for_signal_blocks_until_the_application_fires_it() {
    let mut h = harness(
        r#"
- action: wait
  signal-name: manual-step
- action: set-vars
  marker: yes
"#,
    );
    h.scenario.tick();
    assert!(finished(&h.events).is_empty());

    h.scenario.handle().signal("manual-step");
    h.scenario.tick();
    assert_eq!(finished(&h.events), vec!["wait", "set-vars"]);
}

#[test]
fn one_signal_releases_waits_in_request_order() {
    let mut h = harness(
        r#"
- action: wait
  name: background
  signal-name: go
  non-blocking: true
- action: wait
  name: gate
  signal-name: go
- action: set-vars
  marker: yes
"#,
    );
    h.scenario.tick();
    assert!(finished(&h.events).is_empty());

    h.scenario.handle().signal("go");
    h.scenario.tick();
    // The blocking wait is released before the background one and their
    // completions apply in that order.
    assert_eq!(
        finished_labels(&h.events),
        vec!["gate", "background", "set-vars"]
    );
}

#[test]
fn wait_check_subaction_runs_once_the_wait_elapses() {
    let mut h = harness(
        r#"
- action: wait
  signal-name: verify-now
  check:
    action: check-position
    expected-position: 0.0
    tolerance: 1.0
"#,
    );
    h.scenario.tick();
    assert!(finished(&h.events).is_empty());

    h.scenario.handle().signal("verify-now");
    h.scenario.tick();
    assert_eq!(finished(&h.events), vec!["wait", "check-position"]);
    assert_eq!(h.reporter.reports().len(), 0);
}

#[test]
fn unknown_as_config_declaration_is_parked_not_fatal() {
    let mut h = harness(
        r#"
- action: mystery-tweaks
  as-config: true
  level: 3
- action: set-vars
  checkpoint: 1
"#,
    );
    h.scenario.tick();
    assert_eq!(finished(&h.events), vec!["set-vars"]);
}

#[test]
fn wait_for_message_matches_expected_fields() {
    let mut h = harness(
        r#"
- action: wait
  message-type: buffering
  expected-values:
    percent: 100
- action: set-vars
  marker: yes
"#,
    );
    let handle = h.scenario.handle();
    h.scenario.tick();
    assert!(finished(&h.events).is_empty());

    handle.post_message(PipelineMessage::Buffering { percent: 100 });
    h.scenario.tick();
    // Matching the wait also clears the buffering gate from that message.
    assert_eq!(finished(&h.events), vec!["wait", "set-vars"]);
}

#[test]
fn trailing_optional_actions_do_not_hold_the_scenario_open() {
    let mut h = harness(
        r#"
- action: set-vars
  checkpoint: 1
- action: seek
  playback-time: 50.0
  start: 0.0
  optional: true
"#,
    );
    h.scenario.tick();
    assert_eq!(finished(&h.events), vec!["set-vars"]);
    assert!(h.scenario.is_done());
}

#[test]
fn expression_trigger_uses_the_stream_duration() {
    let mut h = harness(
        r#"
- action: eos
  playback-time: "duration / 2"
"#,
    );
    // Duration is 60s, so the trigger sits at 30s.
    h.pipeline.set_position(29.0);
    h.scenario.tick();
    assert!(finished(&h.events).is_empty());

    h.pipeline.set_position(30.5);
    h.scenario.tick();
    assert_eq!(finished(&h.events), vec!["eos"]);
}

#[test]
fn unknown_action_type_fails_at_load() {
    let pipeline = FakePipeline::new();
    let reporter = Arc::new(CollectingReporter::new());
    let err = Scenario::from_source(
        pipeline as Arc<dyn Pipeline>,
        reporter as Arc<dyn Reporter>,
        "- action: teleport\n",
    )
    .unwrap_err();
    assert!(err.to_string().contains("teleport"));
}

#[test]
fn missing_mandatory_parameter_fails_at_load() {
    let pipeline = FakePipeline::new();
    let reporter = Arc::new(CollectingReporter::new());
    assert!(Scenario::from_source(
        pipeline as Arc<dyn Pipeline>,
        reporter as Arc<dyn Reporter>,
        "- action: seek\n  playback-time: 1.0\n",
    )
    .is_err());
}

#[test]
fn foreach_with_two_iterator_fields_fails_at_load() {
    let pipeline = FakePipeline::new();
    let reporter = Arc::new(CollectingReporter::new());
    let source = r#"
- action: foreach
  i: [1, 2]
  j: [3, 4]
  actions:
    - action: set-vars
      v: "$(i)"
"#;
    assert!(Scenario::from_source(
        pipeline as Arc<dyn Pipeline>,
        reporter as Arc<dyn Reporter>,
        source,
    )
    .is_err());
}

#[test]
fn meta_after_an_action_fails_at_load() {
    let pipeline = FakePipeline::new();
    let reporter = Arc::new(CollectingReporter::new());
    let source = "- action: set-vars\n  v: 1\n- action: meta\n  name: late\n";
    assert!(Scenario::from_source(
        pipeline as Arc<dyn Pipeline>,
        reporter as Arc<dyn Reporter>,
        source,
    )
    .is_err());
}

#[test]
fn pending_actions_snapshot_reflects_queue_state() {
    let h = harness(
        r#"
- action: set-vars
  playback-time: 5.0
  checkpoint: 1
"#,
    );
    let pending = h.scenario.pending_actions();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].type_name, "set-vars");
    assert_eq!(pending[0].state, ActionState::None);
}
