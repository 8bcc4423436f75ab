//! The scenario engine: loading, the execution loop and its context types.
//!
//! A [`Scenario`] owns the action queues and all execution state. It is
//! single-threaded by construction: other threads talk to it exclusively
//! through the [`ScenarioHandle`] channel, and the embedding drives it by
//! calling [`Scenario::tick`] from one place. The channel hand-off is the
//! only synchronization there is, so trigger evaluation, completion and
//! queue surgery all happen on the driving thread with nothing to lock.

mod exec;

use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_yaml::Mapping;

use crate::action::{ActionInstance, ActionSnapshot};
use crate::config::ScenarioConfig;
use crate::declaration::Declaration;
use crate::error::{PipecheckError, Result};
use crate::expression::VarTable;
use crate::iteration;
use crate::pipeline::{Pipeline, PipelineMessage};
use crate::registry;
use crate::report::{IssueId, Report, Reporter};
use crate::tracker::SeekTracker;
use crate::types::{ClockTime, PipelineState, StateChangeResult};

// ---------------------------------------------------------------------------
// Loop plumbing
// ---------------------------------------------------------------------------

/// Inbound events, from the pipeline or from foreign threads.
#[derive(Debug)]
pub enum LoopEvent {
    Message(PipelineMessage),
    /// An async action finished; completion is applied on the loop.
    RequestDone { seq: u64 },
    /// An application signal, for `wait: { signal-name: ... }`.
    Signal { name: String },
}

/// Outbound progress events for the embedding.
#[derive(Debug, Clone)]
pub enum ScenarioEvent {
    ActionDone {
        action: ActionSnapshot,
        duration: Option<Duration>,
    },
    Done,
}

/// Clonable, thread-safe-to-hand-out entry point into the scenario loop.
#[derive(Clone)]
pub struct ScenarioHandle {
    tx: Sender<LoopEvent>,
}

impl ScenarioHandle {
    pub fn post_message(&self, message: PipelineMessage) {
        let _ = self.tx.send(LoopEvent::Message(message));
    }

    /// Mark an async action as finished. The action only transitions on
    /// the next loop turn; calling this twice for one action is a
    /// programming error.
    pub fn request_done(&self, seq: u64) {
        let _ = self.tx.send(LoopEvent::RequestDone { seq });
    }

    pub fn signal(&self, name: &str) {
        let _ = self.tx.send(LoopEvent::Signal {
            name: name.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum WaitKind {
    Until(Instant),
    Message {
        message_type: String,
        expected: Option<Mapping>,
    },
    Signal {
        name: String,
    },
}

/// A blocking wait registered by the head action.
#[derive(Debug)]
pub struct PendingWait {
    pub action_seq: u64,
    pub kind: WaitKind,
}

/// Scheduler state the executors are allowed to touch.
#[derive(Default)]
pub struct Control {
    pub target_state: Option<PipelineState>,
    /// A state change is in flight; gates the queue.
    pub changing_state: bool,
    /// An async state change awaits its `AsyncDone`; gates the queue.
    pub needs_async_done: bool,
    /// Set by the `stop` action; the scheduler winds down after it.
    pub stop_requested: bool,
    /// When a `pause` with a duration should resume playing.
    pub resume_playing_at: Option<Instant>,
    /// Async state-change action waiting for its target state.
    pub state_target_action: Option<(u64, PipelineState)>,
    pub wait: Option<PendingWait>,
    /// Non-blocking signal waits, by action and signal name.
    pub signal_waits: Vec<(u64, String)>,
}

/// What an executor sees while running.
pub struct ExecContext<'a> {
    pub pipeline: &'a dyn Pipeline,
    pub reporter: &'a dyn Reporter,
    pub vars: &'a mut VarTable,
    pub tracker: &'a mut SeekTracker,
    pub control: &'a mut Control,
}

impl ExecContext<'_> {
    /// Report an execution fault on `action` and return the matching
    /// result for the scheduler.
    pub fn fail(
        &self,
        action: &ActionInstance,
        reason: impl Into<String>,
    ) -> crate::registry::ExecResult {
        self.reporter.report(
            Report::new(IssueId::ActionExecutionError, reason)
                .for_action(action.seq, &action.type_name),
        );
        crate::registry::ExecResult::ErrorReported
    }
}

/// What a custom prepare hook sees.
pub struct PrepareContext<'a> {
    pub vars: &'a mut VarTable,
    pub reporter: &'a dyn Reporter,
    /// Sequence allocator for instances the hook creates.
    pub next_seq: &'a mut u64,
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

pub struct Scenario {
    config: ScenarioConfig,
    pipeline: Arc<dyn Pipeline>,
    reporter: Arc<dyn Reporter>,
    pending: VecDeque<ActionInstance>,
    non_blocking: Vec<ActionInstance>,
    /// `CAN_EXECUTE_ON_ADDITION` actions waiting for their element.
    deferred: Vec<ActionInstance>,
    tracker: SeekTracker,
    vars: VarTable,
    control: Control,
    tx: Sender<LoopEvent>,
    rx: Receiver<LoopEvent>,
    events_tx: Sender<ScenarioEvent>,
    events_rx: Option<Receiver<ScenarioEvent>>,
    /// Completions requested this turn, applied in order.
    completion_queue: VecDeque<u64>,
    position: Option<ClockTime>,
    duration: Option<ClockTime>,
    buffering: bool,
    got_eos: bool,
    dropped: u64,
    position_issue_active: bool,
    latency_reported: bool,
    done_emitted: bool,
    stopped: bool,
    next_seq: u64,
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario").finish_non_exhaustive()
    }
}

impl Scenario {
    /// Validate declarations and build the scenario. Config actions run
    /// here, before anything touches the pipeline. Every structural
    /// fault is fatal at this point.
    pub fn load(
        pipeline: Arc<dyn Pipeline>,
        reporter: Arc<dyn Reporter>,
        declarations: Vec<Declaration>,
    ) -> Result<Scenario> {
        registry::init()?;

        let mut config = ScenarioConfig::default();
        let mut pending: VecDeque<ActionInstance> = VecDeque::new();
        let mut deferred: Vec<ActionInstance> = Vec::new();
        let mut next_seq: u64 = 1;

        for decl in &declarations {
            if decl.action == "meta" || decl.action == "description" {
                if !pending.is_empty() || !deferred.is_empty() {
                    return Err(PipecheckError::MalformedScenario(
                        "the meta record must come before any action".to_string(),
                    ));
                }
                config = ScenarioConfig::from_params(&decl.params)?;
                continue;
            }

            let Some(ty) = registry::lookup(&decl.action)? else {
                if decl.params.get_bool("as-config").unwrap_or(false) {
                    // Parked until a config-capable type of that name
                    // registers.
                    registry::queue_config(decl.clone())?;
                    continue;
                }
                if decl.params.get_bool("optional-action-type").unwrap_or(false) {
                    tracing::warn!(action = decl.action, "skipping unknown optional action type");
                    continue;
                }
                return Err(PipecheckError::UnknownActionType(decl.action.clone()));
            };

            let as_config = decl.params.get_bool("as-config").unwrap_or(false);
            if ty.flags.config || as_config {
                let hook = ty
                    .config_execute
                    .as_ref()
                    .ok_or_else(|| PipecheckError::NotConfigurable(ty.name.clone()))?;
                hook.execute_config(&decl.params)?;
                continue;
            }

            if decl.action == "foreach" {
                iteration::validate_foreach(&decl.action, &decl.params)?;
            }

            let seq = next_seq;
            next_seq += 1;
            let action = ActionInstance::from_declaration(decl, &ty, seq)?;

            let on_addition = ty.flags.can_execute_on_addition
                && action.playback_time.is_none()
                && action.on_message.is_none()
                && pending.is_empty();
            if on_addition {
                deferred.push(action);
            } else {
                pending.push_back(action);
            }
        }

        if config.is_config && (!pending.is_empty() || !deferred.is_empty()) {
            return Err(PipecheckError::MalformedScenario(
                "a config scenario cannot contain runtime actions".to_string(),
            ));
        }

        let (tx, rx) = channel();
        let (events_tx, events_rx) = channel();
        tracing::info!(
            name = config.name.as_deref().unwrap_or("unnamed"),
            actions = pending.len(),
            deferred = deferred.len(),
            "scenario loaded"
        );
        Ok(Scenario {
            config,
            pipeline,
            reporter,
            pending,
            non_blocking: Vec::new(),
            deferred,
            tracker: SeekTracker::new(),
            vars: VarTable::new(),
            control: Control::default(),
            tx,
            rx,
            events_tx,
            events_rx: Some(events_rx),
            completion_queue: VecDeque::new(),
            position: None,
            duration: None,
            buffering: false,
            got_eos: false,
            dropped: 0,
            position_issue_active: false,
            latency_reported: false,
            done_emitted: false,
            stopped: false,
            next_seq,
        })
    }

    /// Parse and load in one go.
    pub fn from_source(
        pipeline: Arc<dyn Pipeline>,
        reporter: Arc<dyn Reporter>,
        source: &str,
    ) -> Result<Scenario> {
        let declarations = crate::declaration::parse_str(source)?;
        Scenario::load(pipeline, reporter, declarations)
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn handle(&self) -> ScenarioHandle {
        ScenarioHandle {
            tx: self.tx.clone(),
        }
    }

    /// The progress event stream. Can only be taken once.
    pub fn take_events(&mut self) -> Option<Receiver<ScenarioEvent>> {
        self.events_rx.take()
    }

    /// Drive the pipeline to the scenario's initial state, unless the
    /// scenario handles states itself.
    pub fn attach(&mut self) -> Result<()> {
        if self.config.is_config {
            return Ok(());
        }
        let Some(state) = self.config.initial_state() else {
            return Ok(());
        };
        self.control.target_state = Some(state);
        match self.pipeline.set_state(state) {
            StateChangeResult::Failure => {
                self.reporter.report(Report::new(
                    IssueId::StateChangeFailure,
                    format!("pipeline refused initial transition to {state}"),
                ));
            }
            StateChangeResult::Async => {
                self.control.changing_state = true;
                self.control.needs_async_done = true;
            }
            StateChangeResult::Success => {}
        }
        Ok(())
    }

    /// Snapshots of every action not yet done, in queue order.
    pub fn pending_actions(&self) -> Vec<ActionSnapshot> {
        self.pending
            .iter()
            .chain(self.non_blocking.iter())
            .chain(self.deferred.iter())
            .map(ActionSnapshot::from)
            .collect()
    }

    /// True once only optional actions (or nothing) remain.
    pub fn is_done(&self) -> bool {
        self.done_emitted
    }

    pub fn got_eos(&self) -> bool {
        self.got_eos
    }

    /// Drop everything still queued without running completions.
    pub fn teardown(&mut self) {
        self.stopped = true;
        self.pending.clear();
        self.non_blocking.clear();
        self.deferred.clear();
        self.completion_queue.clear();
        self.control.wait = None;
        self.control.signal_waits.clear();
    }
}
