use crate::action::ActionInstance;
use crate::registry::{ExecResult, Execute};
use crate::report::{IssueId, Report};
use crate::scenario::ExecContext;
use crate::types::ClockTime;

/// Parameter names `set-vars` must not treat as variables.
const NON_VARIABLE_FIELDS: &[&str] = &["playback-time", "on-message", "name", "timeout", "repeat", "optional"];

pub(crate) struct SetVarsExec;

impl Execute for SetVarsExec {
    fn execute(&self, ctx: &mut ExecContext<'_>, action: &mut ActionInstance) -> ExecResult {
        for (name, value) in action.params.iter() {
            if NON_VARIABLE_FIELDS.contains(&name) {
                continue;
            }
            tracing::debug!(name, ?value, "setting scenario variable");
            ctx.vars.set(name, value.clone());
        }
        ExecResult::Ok
    }
}

pub(crate) struct SetPropertyExec;

impl Execute for SetPropertyExec {
    fn execute(&self, ctx: &mut ExecContext<'_>, action: &mut ActionInstance) -> ExecResult {
        let (Some(target), Some(property), Some(value)) = (
            action.params.get_str("target"),
            action.params.get_str("property"),
            action.params.get("value"),
        ) else {
            return ctx.fail(action, "set-property needs 'target', 'property' and 'value'");
        };
        tracing::info!(target, property, "setting property");
        match ctx.pipeline.set_property(target, property, value) {
            Ok(()) => ExecResult::Ok,
            Err(reason) => ctx.fail(
                action,
                format!("setting {target}.{property} failed: {reason}"),
            ),
        }
    }
}

pub(crate) struct CheckPropertyExec;

impl Execute for CheckPropertyExec {
    fn execute(&self, ctx: &mut ExecContext<'_>, action: &mut ActionInstance) -> ExecResult {
        let (Some(target), Some(property), Some(expected)) = (
            action.params.get_str("target"),
            action.params.get_str("property"),
            action.params.get("value"),
        ) else {
            return ctx.fail(action, "check-property needs 'target', 'property' and 'value'");
        };
        let actual = ctx.pipeline.get_property(target, property);
        if actual.as_ref() == Some(expected) {
            return ExecResult::Ok;
        }
        ctx.reporter.report(
            Report::new(
                IssueId::CheckFailed,
                format!("{target}.{property} is {actual:?}, expected {expected:?}"),
            )
            .for_action(action.seq, &action.type_name),
        );
        ExecResult::ErrorReported
    }
}

pub(crate) struct CheckPositionExec;

impl Execute for CheckPositionExec {
    fn execute(&self, ctx: &mut ExecContext<'_>, action: &mut ActionInstance) -> ExecResult {
        let expected = match action
            .params
            .resolve_clocktime("check-position", "expected-position", ctx.vars)
        {
            Ok(Some(expected)) => expected,
            Ok(None) => return ctx.fail(action, "'expected-position' resolved to no position"),
            Err(err) => return ctx.fail(action, err.to_string()),
        };
        let tolerance = match action
            .params
            .resolve_clocktime("check-position", "tolerance", ctx.vars)
        {
            Ok(tolerance) => tolerance.unwrap_or(ClockTime::from_millis(100)),
            Err(err) => return ctx.fail(action, err.to_string()),
        };
        let Some(position) = ctx.pipeline.position() else {
            return ctx.fail(action, "pipeline position unknown");
        };
        let delta = if position > expected {
            position.saturating_sub(expected)
        } else {
            expected.saturating_sub(position)
        };
        if delta <= tolerance {
            return ExecResult::Ok;
        }
        ctx.reporter.report(
            Report::new(
                IssueId::CheckFailed,
                format!("position is {position}, expected {expected} (tolerance {tolerance})"),
            )
            .for_action(action.seq, &action.type_name),
        );
        ExecResult::ErrorReported
    }
}
