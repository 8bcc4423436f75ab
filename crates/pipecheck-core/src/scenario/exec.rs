//! The scenario scheduler: event processing, trigger evaluation and
//! action dispatch.

use std::time::Instant;

use serde_yaml::Value;

use crate::action::{ActionInstance, ActionSnapshot, ActionState, TimeSpec};
use crate::error::PipecheckError;
use crate::expression;
use crate::iteration;
use crate::pipeline::PipelineMessage;
use crate::registry::{self, ExecResult, PrepareOutcome};
use crate::report::{IssueId, Report};
use crate::tracker::SegmentOutcome;
use crate::types::{ClockTime, PipelineState};

use super::{ExecContext, LoopEvent, PendingWait, PrepareContext, Scenario, ScenarioEvent, WaitKind};

/// Slack allowed on position sanity checks.
const POSITION_TOLERANCE: ClockTime = ClockTime(100_000_000);

enum Prepared {
    Continue,
    Finished(ActionState),
    Replaced(Vec<ActionInstance>),
}

impl Scenario {
    /// One turn of the scenario loop: drain inbound events, run timers,
    /// then try to advance the action queue. The embedding calls this on
    /// its `action-execution-interval`.
    pub fn tick(&mut self) {
        if self.stopped {
            while self.rx.try_recv().is_ok() {}
            return;
        }
        while let Ok(event) = self.rx.try_recv() {
            self.process_event(event);
            if self.stopped {
                return;
            }
        }
        self.apply_completions();
        self.process_timers();
        self.check_position_sanity();
        self.execute_next(None);
        self.apply_completions();
        self.check_scenario_done();
    }

    fn process_event(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Message(message) => self.handle_message(message),
            LoopEvent::RequestDone { seq } => self.request_completion(seq),
            LoopEvent::Signal { name } => self.handle_signal(&name),
        }
    }

    // -----------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------

    fn handle_message(&mut self, message: PipelineMessage) {
        self.check_wait_message(&message);
        match &message {
            PipelineMessage::Eos => {
                self.handle_end(None);
                return;
            }
            PipelineMessage::Error { message: text } => {
                let text = text.clone();
                self.handle_end(Some(&text));
                return;
            }
            PipelineMessage::StateChanged { old, new, pending } => {
                let reached = pending.is_none();
                if *old == PipelineState::Paused && *new == PipelineState::Ready {
                    self.tracker.reset();
                }
                if reached {
                    self.complete_settled_async(*new);
                    if self.control.changing_state && self.control.target_state == Some(*new) {
                        self.control.changing_state = false;
                    }
                    if *new == PipelineState::Playing {
                        self.check_latency();
                    }
                }
            }
            PipelineMessage::AsyncDone => {
                self.control.needs_async_done = false;
                self.control.changing_state = false;
                self.complete_settled_async(self.pipeline.current_state());
            }
            PipelineMessage::Buffering { percent } => {
                self.buffering = *percent < 100;
            }
            PipelineMessage::Qos { dropped } => {
                self.dropped = self.dropped.max(*dropped);
            }
            PipelineMessage::LatencyChanged => self.check_latency(),
            PipelineMessage::SegmentObserved {
                sink,
                token,
                segment,
            } => match self.tracker.observe_segment(sink, *token, *segment) {
                SegmentOutcome::InconsistentTokens { token } => {
                    self.reporter.report(Report::new(
                        IssueId::SeekInvalidSeqnum,
                        format!(
                            "sinks disagree on segment token {token} with no seek in flight"
                        ),
                    ));
                }
                SegmentOutcome::Matched {
                    action_seq,
                    flushing: false,
                    newly: true,
                } => {
                    // Non-flushing seeks are applied the moment every
                    // sink agrees; flushing ones also wait for the
                    // pipeline state to settle.
                    if self.action_state(action_seq) == Some(ActionState::Async) {
                        self.request_completion(action_seq);
                    }
                }
                _ => {}
            },
            PipelineMessage::ElementAdded { name, is_sink } => {
                if *is_sink {
                    self.tracker.add_sink(name);
                }
                let name = name.clone();
                self.run_deferred(&name);
            }
            PipelineMessage::ElementRemoved { name } => {
                self.tracker.remove_sink(name);
            }
        }
        self.execute_next(Some(&message));
    }

    /// Complete the async state-change action and any flushing seek once
    /// the pipeline has settled in `state`.
    fn complete_settled_async(&mut self, state: PipelineState) {
        if let Some(seq) = self.tracker.current_flushing_action() {
            if self.action_state(seq) == Some(ActionState::Async) {
                self.request_completion(seq);
            }
        }
        if let Some((seq, target)) = self.control.state_target_action {
            if state == target {
                self.control.state_target_action = None;
                self.request_completion(seq);
            }
        }
    }

    fn check_wait_message(&mut self, message: &PipelineMessage) {
        let matched = match &self.control.wait {
            Some(PendingWait {
                action_seq,
                kind:
                    WaitKind::Message {
                        message_type,
                        expected,
                    },
            }) if message_type == message.type_name() => {
                let fields_match = expected.as_ref().is_none_or(|mapping| {
                    mapping.iter().all(|(key, want)| {
                        key.as_str()
                            .and_then(|k| message.field(k))
                            .is_some_and(|got| got == *want)
                    })
                });
                fields_match.then_some(*action_seq)
            }
            _ => None,
        };
        if let Some(seq) = matched {
            self.control.wait = None;
            self.request_completion(seq);
        }
    }

    fn handle_signal(&mut self, name: &str) {
        let blocking = match &self.control.wait {
            Some(PendingWait {
                action_seq,
                kind: WaitKind::Signal { name: wanted },
            }) if wanted == name => Some(*action_seq),
            _ => None,
        };
        if let Some(seq) = blocking {
            self.control.wait = None;
            self.request_completion(seq);
        }
        let mut fired = Vec::new();
        self.control.signal_waits.retain(|(seq, wanted)| {
            if wanted == name {
                fired.push(*seq);
                false
            } else {
                true
            }
        });
        for seq in fired {
            self.request_completion(seq);
        }
    }

    // -----------------------------------------------------------------
    // End of stream and errors
    // -----------------------------------------------------------------

    fn handle_end(&mut self, error: Option<&str>) {
        match error {
            None => {
                self.got_eos = true;
                if self.config.ignore_eos {
                    tracing::debug!("ignoring end-of-stream");
                    return;
                }
            }
            Some(text) => {
                if self.config.allow_errors {
                    tracing::debug!(message = text, "tolerating pipeline error");
                    // An error can swallow the completion of an async
                    // state change; unblock the queue.
                    if self.control.needs_async_done || self.control.changing_state {
                        self.control.needs_async_done = false;
                        self.control.changing_state = false;
                        let head = self.pending.front().map(|a| (a.seq, a.state));
                        if let Some((seq, ActionState::Async)) = head {
                            self.request_completion(seq);
                        }
                    }
                    return;
                }
                tracing::error!(message = text, "pipeline error, stopping scenario");
            }
        }

        self.apply_completions();
        if error.is_none() {
            // Give message-triggered actions their shot at the EOS.
            self.execute_next(Some(&PipelineMessage::Eos));
            self.apply_completions();
        }

        if error.is_none() {
            let ended_early = self.pending.iter().find(|a| {
                a.state == ActionState::None && a.playback_time.is_some() && !a.optional
            });
            if let Some(action) = ended_early {
                self.reporter.report(
                    Report::new(
                        IssueId::ActionEndedEarly,
                        format!("stream ended before {action} could trigger"),
                    )
                    .for_action(action.seq, &action.type_name),
                );
            }
        }
        self.tracker.clear_pending();
        self.stop();
    }

    /// Wind the scenario down: report what never ran, run the final
    /// bookkeeping checks, drop the queues and bring the pipeline to
    /// null.
    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let leftovers: Vec<String> = self
            .pending
            .iter()
            .chain(self.deferred.iter())
            .filter(|a| a.state == ActionState::None && !a.optional)
            .filter(|a| !self.no_execution_not_fatal(&a.type_name))
            .map(|a| a.to_string())
            .collect();
        if !leftovers.is_empty() {
            self.reporter.report(Report::new(
                IssueId::ScenarioNotEnded,
                format!(
                    "{} action(s) were never executed: {}",
                    leftovers.len(),
                    leftovers.join(", ")
                ),
            ));
        }

        if let Some(max) = self.config.max_dropped {
            if self.dropped > max {
                self.reporter.report(Report::new(
                    IssueId::TooManyBuffersDropped,
                    format!("{} buffers dropped, at most {max} allowed", self.dropped),
                ));
            }
        }

        self.pending.clear();
        self.non_blocking.clear();
        self.deferred.clear();
        self.completion_queue.clear();
        self.control.wait = None;
        self.control.signal_waits.clear();
        let _ = self.pipeline.set_state(PipelineState::Null);
        tracing::info!("scenario stopped");
        self.check_scenario_done();
    }

    fn no_execution_not_fatal(&self, type_name: &str) -> bool {
        registry::lookup(type_name)
            .ok()
            .flatten()
            .is_some_and(|ty| ty.flags.no_execution_not_fatal)
    }

    fn check_scenario_done(&mut self) {
        if self.done_emitted {
            return;
        }
        let all_optional = self
            .pending
            .iter()
            .chain(self.non_blocking.iter())
            .chain(self.deferred.iter())
            .all(|a| a.optional);
        if all_optional {
            self.done_emitted = true;
            tracing::info!("scenario done");
            let _ = self.events_tx.send(ScenarioEvent::Done);
        }
    }

    // -----------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------

    fn action_state(&self, seq: u64) -> Option<ActionState> {
        self.pending
            .iter()
            .chain(self.non_blocking.iter())
            .find(|a| a.seq == seq)
            .map(|a| a.state)
    }

    /// First half of the two-phase completion: flag the action and queue
    /// it; the state transition happens in [`Self::apply_completions`]
    /// on the loop. Idempotent per action.
    fn request_completion(&mut self, seq: u64) {
        let Some(action) = self
            .pending
            .iter_mut()
            .chain(self.non_blocking.iter_mut())
            .find(|a| a.seq == seq)
        else {
            tracing::debug!(seq, "completion requested for an action no longer queued");
            return;
        };
        if action.completion_requested {
            return;
        }
        action.completion_requested = true;
        self.completion_queue.push_back(seq);
    }

    fn apply_completions(&mut self) {
        while let Some(seq) = self.completion_queue.pop_front() {
            let action = if let Some(pos) = self.pending.iter().position(|a| a.seq == seq) {
                self.pending.remove(pos)
            } else if let Some(pos) = self.non_blocking.iter().position(|a| a.seq == seq) {
                Some(self.non_blocking.remove(pos))
            } else {
                None
            };
            let Some(action) = action else { continue };
            let state = match action.state {
                ActionState::Error => ActionState::Error,
                ActionState::ErrorReported => ActionState::ErrorReported,
                _ => ActionState::Ok,
            };
            if state == ActionState::Ok && action.type_name == "wait" {
                self.queue_followup_check(&action);
            }
            self.complete(action, state);
        }
    }

    /// Final half of completion: record the outcome, emit the progress
    /// event, raise the report for plain `Error` outcomes.
    fn complete(&mut self, mut action: ActionInstance, state: ActionState) {
        debug_assert!(action.state != ActionState::Done, "action completed twice");
        action.state = state;
        action.execution_duration = action.started_at.map(|t| t.elapsed());
        if state == ActionState::Error {
            self.reporter.report(
                Report::new(IssueId::ActionExecutionError, format!("{action} failed"))
                    .for_action(action.seq, &action.type_name),
            );
        }
        tracing::info!(action = %action, state = ?state, "action finished");
        let snapshot = ActionSnapshot::from(&action);
        action.state = ActionState::Done;
        let _ = self.events_tx.send(ScenarioEvent::ActionDone {
            action: snapshot,
            duration: action.execution_duration,
        });
    }

    /// A `wait` may carry a `check` sub-action that runs once the wait
    /// elapses.
    fn queue_followup_check(&mut self, action: &ActionInstance) {
        let Some(Value::Mapping(mapping)) = action.params.get("check") else {
            return;
        };
        let mut mapping = mapping.clone();
        let type_name = match mapping.remove("action") {
            Some(Value::String(name)) => name,
            _ => {
                self.reporter.report(
                    Report::new(
                        IssueId::ActionExecutionError,
                        "'check' needs an 'action' field",
                    )
                    .for_action(action.seq, &action.type_name),
                );
                return;
            }
        };
        let ty = match registry::lookup(&type_name) {
            Ok(Some(ty)) => ty,
            _ => {
                self.reporter.report(
                    Report::new(
                        IssueId::ActionExecutionError,
                        format!("unknown 'check' action type '{type_name}'"),
                    )
                    .for_action(action.seq, &action.type_name),
                );
                return;
            }
        };
        let mut decl = crate::declaration::Declaration::new(
            type_name,
            crate::params::ActionParams::new(mapping),
        );
        decl.index = action.lineno;
        let seq = self.next_seq;
        self.next_seq += 1;
        match ActionInstance::from_declaration(&decl, &ty, seq) {
            Ok(instance) => self.pending.push_front(instance),
            Err(err) => {
                self.reporter.report(
                    Report::new(IssueId::ActionExecutionError, err.to_string())
                        .for_action(action.seq, &action.type_name),
                );
            }
        }
    }

    // -----------------------------------------------------------------
    // Timers and periodic checks
    // -----------------------------------------------------------------

    fn process_timers(&mut self) {
        let now = Instant::now();
        if let Some(at) = self.control.resume_playing_at {
            if now >= at {
                self.control.resume_playing_at = None;
                self.control.target_state = Some(PipelineState::Playing);
                match self.pipeline.set_state(PipelineState::Playing) {
                    crate::types::StateChangeResult::Failure => {
                        self.reporter.report(Report::new(
                            IssueId::StateChangeFailure,
                            "resuming playback after pause failed",
                        ));
                    }
                    crate::types::StateChangeResult::Async => {
                        self.control.changing_state = true;
                    }
                    crate::types::StateChangeResult::Success => {}
                }
            }
        }
        let elapsed_wait = match &self.control.wait {
            Some(PendingWait {
                action_seq,
                kind: WaitKind::Until(at),
            }) if now >= *at => Some(*action_seq),
            _ => None,
        };
        if let Some(seq) = elapsed_wait {
            self.control.wait = None;
            self.request_completion(seq);
        }
    }

    fn refresh_vars(&mut self) {
        self.position = self.pipeline.position();
        self.duration = self.pipeline.duration();
        match self.position {
            Some(p) => self.vars.set_f64("position", p.as_secs_f64()),
            None => self.vars.unset("position"),
        }
        match self.duration {
            Some(d) => self.vars.set_f64("duration", d.as_secs_f64()),
            None => self.vars.unset("duration"),
        }
    }

    fn check_position_sanity(&mut self) {
        if self.config.ignore_invalid_positions || self.got_eos {
            return;
        }
        let Some(position) = self.pipeline.position() else {
            return;
        };
        if self.pipeline.current_state() < PipelineState::Paused {
            return;
        }
        let mut issue = None;
        if let Some(duration) = self.pipeline.duration() {
            if position > duration.saturating_add(POSITION_TOLERANCE) {
                issue = Some((
                    IssueId::PositionSuperiorToDuration,
                    format!("position {position} is past the duration {duration}"),
                ));
            }
        }
        if issue.is_none() && !self.tracker.has_pending_seeks() {
            let (start, stop) = self.tracker.segment_bounds();
            if position.saturating_add(POSITION_TOLERANCE) < start {
                issue = Some((
                    IssueId::PositionOutOfSegment,
                    format!("position {position} is before the segment start {start}"),
                ));
            } else if let Some(stop) = stop {
                if position > stop.saturating_add(POSITION_TOLERANCE) {
                    issue = Some((
                        IssueId::PositionOutOfSegment,
                        format!("position {position} is past the segment stop {stop}"),
                    ));
                }
            }
        }
        match issue {
            Some((id, message)) => {
                if !self.position_issue_active {
                    self.position_issue_active = true;
                    self.reporter.report(Report::new(id, message));
                }
            }
            None => self.position_issue_active = false,
        }
    }

    fn check_latency(&mut self) {
        let Some(max) = self.config.max_latency_time() else {
            return;
        };
        let Some(latency) = self.pipeline.query_latency() else {
            return;
        };
        if latency > max && !self.latency_reported {
            self.latency_reported = true;
            self.reporter.report(Report::new(
                IssueId::LatencyTooHigh,
                format!("pipeline latency {latency} exceeds the allowed {max}"),
            ));
        }
    }

    // -----------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------

    /// Advance the head of the queue as far as it will go. `message` is
    /// set when called on a bus message, for `on-message` triggers.
    fn execute_next(&mut self, message: Option<&PipelineMessage>) {
        loop {
            if self.stopped
                || self.buffering
                || self.control.changing_state
                || self.control.needs_async_done
            {
                return;
            }
            self.refresh_vars();
            let Some(head) = self.pending.front() else {
                return;
            };

            match head.state {
                ActionState::None => {}
                ActionState::Async => {
                    let timed_out = match (head.started_at, head.timeout) {
                        (Some(started), Some(timeout)) => started.elapsed() > timeout,
                        _ => false,
                    };
                    if !timed_out {
                        return;
                    }
                    let seq = head.seq;
                    self.reporter.report(
                        Report::new(
                            IssueId::ActionTimeout,
                            format!("{head} did not complete within its timeout"),
                        )
                        .for_action(seq, &head.type_name),
                    );
                    let wait_for_head = matches!(
                        &self.control.wait,
                        Some(PendingWait { action_seq, .. }) if *action_seq == seq
                    );
                    if wait_for_head {
                        self.control.wait = None;
                    }
                    self.request_completion(seq);
                    self.apply_completions();
                    continue;
                }
                ActionState::InProgress => {}
                _ => return,
            }

            if head.state == ActionState::None {
                if let Some(expected) = &head.on_message {
                    let fired = message.is_some_and(|m| m.type_name() == expected);
                    if !fired {
                        return;
                    }
                } else if let Some(spec) = &head.playback_time {
                    let trigger = match spec {
                        TimeSpec::Time(t) => *t,
                        TimeSpec::Expr(expr) => {
                            match expression::evaluate_with_vars(expr, &self.vars) {
                                Ok(secs) => ClockTime::from_secs_f64(secs.max(0.0)),
                                Err(PipecheckError::UndefinedVariable(_)) => {
                                    // Most likely `duration` is not known
                                    // yet; try again next turn.
                                    return;
                                }
                                Err(err) => {
                                    let action = self
                                        .pending
                                        .pop_front()
                                        .map(|mut a| {
                                            self.reporter.report(
                                                Report::new(
                                                    IssueId::ActionExecutionError,
                                                    format!(
                                                        "cannot resolve trigger time: {err}"
                                                    ),
                                                )
                                                .for_action(a.seq, &a.type_name),
                                            );
                                            a.state = ActionState::ErrorReported;
                                            a
                                        });
                                    if let Some(action) = action {
                                        self.complete(action, ActionState::ErrorReported);
                                    }
                                    continue;
                                }
                            }
                        }
                    };
                    if self.got_eos {
                        // The stream is over; an unreached trigger will
                        // never fire. Left queued for the final report.
                        return;
                    }
                    let Some(position) = self.position else {
                        return;
                    };
                    let reached = if self.pipeline.playback_rate() < 0.0 {
                        position <= trigger
                    } else {
                        position >= trigger
                    };
                    if !reached {
                        return;
                    }
                }
            }

            // Past the trigger; take ownership of the head and run it.
            let Some(mut action) = self.pending.pop_front() else {
                return;
            };
            if !action.prepared {
                match self.prepare_action(&mut action) {
                    Prepared::Continue => {}
                    Prepared::Finished(state) => {
                        self.complete(action, state);
                        continue;
                    }
                    Prepared::Replaced(instances) => {
                        for instance in instances.into_iter().rev() {
                            self.pending.push_front(instance);
                        }
                        self.complete(action, ActionState::Ok);
                        continue;
                    }
                }
            }

            if action.state == ActionState::None {
                action.started_at = Some(Instant::now());
                tracing::info!(action = %action, "executing");
            }
            action.state = ActionState::InProgress;

            let ty = match registry::lookup(&action.type_name) {
                Ok(Some(ty)) => ty,
                _ => {
                    self.complete(action, ActionState::Error);
                    continue;
                }
            };
            let Some(executor) = ty.execute.clone() else {
                self.complete(action, ActionState::Ok);
                continue;
            };

            let result = {
                let mut ctx = ExecContext {
                    pipeline: self.pipeline.as_ref(),
                    reporter: self.reporter.as_ref(),
                    vars: &mut self.vars,
                    tracker: &mut self.tracker,
                    control: &mut self.control,
                };
                executor.execute(&mut ctx, &mut action)
            };

            match result {
                ExecResult::Ok => {
                    let stop_requested = std::mem::take(&mut self.control.stop_requested);
                    self.complete(action, ActionState::Ok);
                    if stop_requested {
                        self.stop();
                        return;
                    }
                }
                ExecResult::Error => {
                    self.complete(action, ActionState::Error);
                }
                ExecResult::ErrorReported => {
                    self.complete(action, ActionState::ErrorReported);
                }
                ExecResult::Async => {
                    action.state = ActionState::Async;
                    self.pending.push_front(action);
                    return;
                }
                ExecResult::NonBlocking => {
                    action.state = ActionState::NonBlocking;
                    self.non_blocking.push(action);
                }
                ExecResult::InProgress => {
                    action.state = ActionState::InProgress;
                    self.pending.push_front(action);
                    return;
                }
            }
        }
    }

    /// Default preparation: expand `repeat`, substitute variables into
    /// string parameters and resolve declared time parameters. Types
    /// with a custom prepare hook replace all of this.
    fn prepare_action(&mut self, action: &mut ActionInstance) -> Prepared {
        action.prepared = true;

        let ty = match registry::lookup(&action.type_name) {
            Ok(Some(ty)) => ty,
            _ => return Prepared::Finished(ActionState::Error),
        };

        if let Some(preparer) = ty.prepare.clone() {
            let mut ctx = PrepareContext {
                vars: &mut self.vars,
                reporter: self.reporter.as_ref(),
                next_seq: &mut self.next_seq,
            };
            return match preparer.prepare(&mut ctx, action) {
                Ok(PrepareOutcome::Continue) => Prepared::Continue,
                Ok(PrepareOutcome::Done) => Prepared::Finished(ActionState::Ok),
                Ok(PrepareOutcome::Expanded(instances)) => Prepared::Replaced(instances),
                Err(err) => {
                    self.reporter.report(
                        Report::new(IssueId::ActionExecutionError, err.to_string())
                            .for_action(action.seq, &action.type_name),
                    );
                    Prepared::Finished(ActionState::ErrorReported)
                }
            };
        }

        if action.repeat_total == 0 {
            match iteration::repeat_count(action, &self.vars) {
                Ok(Some(count)) => {
                    let copies = iteration::expand_repeat(action, count, &mut self.next_seq);
                    // The head was popped, so the copies go to the very
                    // front, right behind it.
                    for (offset, copy) in copies.into_iter().enumerate() {
                        self.pending.insert(offset, copy);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    self.reporter.report(
                        Report::new(IssueId::ActionExecutionError, err.to_string())
                            .for_action(action.seq, &action.type_name),
                    );
                    return Prepared::Finished(ActionState::ErrorReported);
                }
            }
        }

        let string_fields: Vec<(String, String)> = action
            .params
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.to_string(), s.to_string())))
            .collect();
        for (key, raw) in string_fields {
            match expression::substitute_variables(&raw, &self.vars, false) {
                Ok(substituted) => {
                    if substituted != raw {
                        action.params.set(key, Value::String(substituted));
                    }
                }
                Err(err) => {
                    self.reporter.report(
                        Report::new(IssueId::ActionExecutionError, err.to_string())
                            .for_action(action.seq, &action.type_name),
                    );
                    return Prepared::Finished(ActionState::ErrorReported);
                }
            }
        }

        for parameter in &ty.parameters {
            if !parameter.is_time {
                continue;
            }
            let is_string = action
                .params
                .get(&parameter.name)
                .is_some_and(Value::is_string);
            if !is_string {
                continue;
            }
            match action
                .params
                .resolve_clocktime(&action.type_name, &parameter.name, &self.vars)
            {
                Ok(Some(t)) => action
                    .params
                    .set(parameter.name.clone(), Value::from(t.as_secs_f64())),
                Ok(None) => action.params.set(parameter.name.clone(), Value::from(-1.0)),
                Err(err) => {
                    self.reporter.report(
                        Report::new(IssueId::ActionExecutionError, err.to_string())
                            .for_action(action.seq, &action.type_name),
                    );
                    return Prepared::Finished(ActionState::ErrorReported);
                }
            }
        }

        Prepared::Continue
    }

    /// Execute deferred on-addition actions targeting a newly added
    /// element.
    fn run_deferred(&mut self, element: &str) {
        let mut ready = Vec::new();
        self.deferred.retain(|action| {
            let matches = action
                .params
                .get_str("target")
                .is_none_or(|target| target == element);
            if matches {
                ready.push(action.clone());
                false
            } else {
                true
            }
        });
        for mut action in ready {
            if !action.prepared {
                match self.prepare_action(&mut action) {
                    Prepared::Continue => {}
                    Prepared::Finished(state) => {
                        self.complete(action, state);
                        continue;
                    }
                    Prepared::Replaced(_) => {
                        // Expansion makes no sense out of queue order.
                        self.complete(action, ActionState::Error);
                        continue;
                    }
                }
            }
            action.started_at = Some(Instant::now());
            action.state = ActionState::InProgress;
            tracing::info!(action = %action, element, "executing on element addition");
            let ty = match registry::lookup(&action.type_name) {
                Ok(Some(ty)) => ty,
                _ => {
                    self.complete(action, ActionState::Error);
                    continue;
                }
            };
            let Some(executor) = ty.execute.clone() else {
                self.complete(action, ActionState::Ok);
                continue;
            };
            let result = {
                let mut ctx = ExecContext {
                    pipeline: self.pipeline.as_ref(),
                    reporter: self.reporter.as_ref(),
                    vars: &mut self.vars,
                    tracker: &mut self.tracker,
                    control: &mut self.control,
                };
                executor.execute(&mut ctx, &mut action)
            };
            match result {
                ExecResult::Ok => self.complete(action, ActionState::Ok),
                ExecResult::Error => self.complete(action, ActionState::Error),
                ExecResult::ErrorReported => {
                    self.complete(action, ActionState::ErrorReported)
                }
                ExecResult::Async | ExecResult::NonBlocking | ExecResult::InProgress => {
                    action.state = ActionState::NonBlocking;
                    self.non_blocking.push(action);
                }
            }
        }
    }
}
