use std::time::Instant;

use crate::action::ActionInstance;
use crate::registry::{ExecResult, Execute};
use crate::report::{IssueId, Report};
use crate::scenario::ExecContext;
use crate::types::{PipelineState, StateChangeResult};

fn change_state(
    ctx: &mut ExecContext<'_>,
    action: &ActionInstance,
    target: PipelineState,
) -> ExecResult {
    tracing::info!(target_state = %target, "requesting state change");
    ctx.control.target_state = Some(target);
    match ctx.pipeline.set_state(target) {
        StateChangeResult::Failure => {
            ctx.reporter.report(
                Report::new(
                    IssueId::StateChangeFailure,
                    format!("pipeline refused to go to {target}"),
                )
                .for_action(action.seq, &action.type_name),
            );
            ExecResult::ErrorReported
        }
        StateChangeResult::Success => ExecResult::Ok,
        StateChangeResult::Async => {
            ctx.control.changing_state = true;
            ctx.control.state_target_action = Some((action.seq, target));
            ExecResult::Async
        }
    }
}

pub(crate) struct PlayExec;

impl Execute for PlayExec {
    fn execute(&self, ctx: &mut ExecContext<'_>, action: &mut ActionInstance) -> ExecResult {
        change_state(ctx, action, PipelineState::Playing)
    }
}

pub(crate) struct PauseExec;

impl Execute for PauseExec {
    fn execute(&self, ctx: &mut ExecContext<'_>, action: &mut ActionInstance) -> ExecResult {
        let duration = match action.params.resolve_clocktime("pause", "duration", ctx.vars) {
            Ok(duration) => duration,
            Err(err) => return ctx.fail(action, err.to_string()),
        };
        if let Some(duration) = duration {
            ctx.control.resume_playing_at = Some(Instant::now() + duration.to_duration());
        }
        change_state(ctx, action, PipelineState::Paused)
    }
}

pub(crate) struct SetStateExec;

impl Execute for SetStateExec {
    fn execute(&self, ctx: &mut ExecContext<'_>, action: &mut ActionInstance) -> ExecResult {
        let Some(spec) = action.params.get_str("state") else {
            return ctx.fail(action, "missing 'state'");
        };
        match PipelineState::parse(spec) {
            Some(state) => change_state(ctx, action, state),
            None => ctx.fail(action, format!("unknown state '{spec}'")),
        }
    }
}

pub(crate) struct StopExec;

impl Execute for StopExec {
    fn execute(&self, ctx: &mut ExecContext<'_>, _action: &mut ActionInstance) -> ExecResult {
        ctx.control.stop_requested = true;
        ExecResult::Ok
    }
}

pub(crate) struct EosExec;

impl Execute for EosExec {
    fn execute(&self, ctx: &mut ExecContext<'_>, action: &mut ActionInstance) -> ExecResult {
        if ctx.pipeline.send_eos() {
            ExecResult::Ok
        } else {
            ctx.fail(action, "pipeline refused the end-of-stream event")
        }
    }
}
