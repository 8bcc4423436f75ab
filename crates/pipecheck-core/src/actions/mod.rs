//! Built-in action types.

mod props;
mod seek;
mod states;
mod wait;

use crate::action::ActionInstance;
use crate::error::Result;
use crate::iteration;
use crate::registry::{
    ActionParameter, ActionType, ActionTypeFlags, Prepare, PrepareOutcome, Rank, Registry,
};
use crate::scenario::PrepareContext;

struct ForeachPrepare;

impl Prepare for ForeachPrepare {
    fn prepare(
        &self,
        ctx: &mut PrepareContext<'_>,
        action: &mut ActionInstance,
    ) -> Result<PrepareOutcome> {
        let expanded = iteration::expand_foreach(action, ctx.next_seq)?;
        tracing::debug!(
            foreach = %action,
            count = expanded.len(),
            "expanded foreach into sub-actions"
        );
        Ok(PrepareOutcome::Expanded(expanded))
    }
}

pub(crate) fn register_builtins(registry: &mut Registry) -> Result<()> {
    registry.register(
        ActionType::new(
            "meta",
            "core",
            "Scenario description and configuration record",
        )
        .with_rank(Rank::Primary),
    )?;
    registry.register(
        ActionType::new("description", "core", "Alias of 'meta'").with_rank(Rank::Primary),
    )?;

    registry.register(
        ActionType::new("seek", "core", "Send a seek to the pipeline")
            .with_rank(Rank::Primary)
            .with_parameters(vec![
                ActionParameter::new("start", "Seek target position").mandatory().time(),
                ActionParameter::new("stop", "End of the played range").time(),
                ActionParameter::new("rate", "Playback rate to seek with"),
                ActionParameter::new("flags", "Seek flags, e.g. flush+accurate"),
            ])
            .with_flags(ActionTypeFlags {
                asynchronous: true,
                can_be_optional: true,
                ..Default::default()
            })
            .with_executor(seek::SeekExec),
    )?;

    registry.register(
        ActionType::new("play", "core", "Set the pipeline to playing")
            .with_rank(Rank::Primary)
            .with_flags(ActionTypeFlags {
                asynchronous: true,
                can_be_optional: true,
                ..Default::default()
            })
            .with_executor(states::PlayExec),
    )?;
    registry.register(
        ActionType::new("pause", "core", "Pause the pipeline, optionally for a duration")
            .with_rank(Rank::Primary)
            .with_parameters(vec![ActionParameter::new(
                "duration",
                "Automatically resume playing after this long",
            )
            .time()])
            .with_flags(ActionTypeFlags {
                asynchronous: true,
                can_be_optional: true,
                needs_clock: true,
                ..Default::default()
            })
            .with_executor(states::PauseExec),
    )?;
    registry.register(
        ActionType::new("set-state", "core", "Drive the pipeline to a given state")
            .with_rank(Rank::Primary)
            .with_parameters(vec![ActionParameter::new(
                "state",
                "Target state: null, ready, paused or playing",
            )
            .mandatory()])
            .with_flags(ActionTypeFlags {
                asynchronous: true,
                can_be_optional: true,
                ..Default::default()
            })
            .with_executor(states::SetStateExec),
    )?;
    registry.register(
        ActionType::new("stop", "core", "Wind the scenario down and stop the pipeline")
            .with_rank(Rank::Primary)
            .with_flags(ActionTypeFlags {
                no_execution_not_fatal: true,
                ..Default::default()
            })
            .with_executor(states::StopExec),
    )?;
    registry.register(
        ActionType::new("eos", "core", "Send end-of-stream to the pipeline")
            .with_rank(Rank::Primary)
            .with_executor(states::EosExec),
    )?;

    registry.register(
        ActionType::new("wait", "core", "Wait for a duration, a message or a signal")
            .with_rank(Rank::Primary)
            .with_parameters(vec![
                ActionParameter::new("duration", "How long to wait").time(),
                ActionParameter::new("message-type", "Message to wait for"),
                ActionParameter::new("expected-values", "Fields the message must carry"),
                ActionParameter::new("signal-name", "Application signal to wait for"),
                ActionParameter::new("non-blocking", "Let later actions run meanwhile"),
                ActionParameter::new("check", "Action to run once the wait elapses"),
            ])
            .with_flags(ActionTypeFlags {
                asynchronous: true,
                non_blocking: true,
                can_be_optional: true,
                needs_clock: true,
                ..Default::default()
            })
            .with_executor(wait::WaitExec),
    )?;

    registry.register(
        ActionType::new("set-vars", "core", "Define scenario variables")
            .with_rank(Rank::Primary)
            .with_flags(ActionTypeFlags {
                doesnt_need_pipeline: true,
                ..Default::default()
            })
            .with_executor(props::SetVarsExec),
    )?;
    registry.register(
        ActionType::new("set-property", "core", "Set an element property")
            .with_rank(Rank::Primary)
            .with_parameters(vec![
                ActionParameter::new("target", "Element to set the property on").mandatory(),
                ActionParameter::new("property", "Property name").mandatory(),
                ActionParameter::new("value", "Value to set").mandatory(),
            ])
            .with_flags(ActionTypeFlags {
                can_execute_on_addition: true,
                can_be_optional: true,
                ..Default::default()
            })
            .with_executor(props::SetPropertyExec),
    )?;
    registry.register(
        ActionType::new("check-property", "core", "Verify an element property value")
            .with_rank(Rank::Primary)
            .with_parameters(vec![
                ActionParameter::new("target", "Element to read the property from").mandatory(),
                ActionParameter::new("property", "Property name").mandatory(),
                ActionParameter::new("value", "Expected value").mandatory(),
            ])
            .with_flags(ActionTypeFlags {
                check: true,
                can_be_optional: true,
                ..Default::default()
            })
            .with_executor(props::CheckPropertyExec),
    )?;
    registry.register(
        ActionType::new("check-position", "core", "Verify the reported playback position")
            .with_rank(Rank::Primary)
            .with_parameters(vec![
                ActionParameter::new("expected-position", "Position the pipeline must report")
                    .mandatory()
                    .time(),
                ActionParameter::new("tolerance", "Accepted deviation").time(),
            ])
            .with_flags(ActionTypeFlags {
                check: true,
                can_be_optional: true,
                ..Default::default()
            })
            .with_executor(props::CheckPositionExec),
    )?;

    registry.register(
        ActionType::new("foreach", "core", "Instantiate sub-actions per iterator value")
            .with_rank(Rank::Primary)
            .with_parameters(vec![ActionParameter::new(
                "actions",
                "Sub-action declarations to instantiate",
            )
            .mandatory()])
            .with_preparer(ForeachPrepare),
    )?;

    Ok(())
}
