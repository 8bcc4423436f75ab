use std::time::Instant;

use serde_yaml::Value;

use crate::action::ActionInstance;
use crate::registry::{ExecResult, Execute};
use crate::scenario::{ExecContext, PendingWait, WaitKind};

pub(crate) struct WaitExec;

impl Execute for WaitExec {
    fn execute(&self, ctx: &mut ExecContext<'_>, action: &mut ActionInstance) -> ExecResult {
        let non_blocking = action.params.get_bool("non-blocking").unwrap_or(false);

        if let Some(name) = action.params.get_str("signal-name") {
            tracing::info!(signal = name, non_blocking, "waiting for signal");
            if non_blocking {
                ctx.control
                    .signal_waits
                    .push((action.seq, name.to_string()));
                return ExecResult::NonBlocking;
            }
            ctx.control.wait = Some(PendingWait {
                action_seq: action.seq,
                kind: WaitKind::Signal {
                    name: name.to_string(),
                },
            });
            return ExecResult::Async;
        }

        if let Some(message_type) = action.params.get_str("message-type") {
            let expected = match action.params.get("expected-values") {
                None => None,
                Some(Value::Mapping(mapping)) => Some(mapping.clone()),
                Some(other) => {
                    return ctx.fail(
                        action,
                        format!("'expected-values' must be a mapping, got {other:?}"),
                    )
                }
            };
            tracing::info!(message_type, "waiting for message");
            ctx.control.wait = Some(PendingWait {
                action_seq: action.seq,
                kind: WaitKind::Message {
                    message_type: message_type.to_string(),
                    expected,
                },
            });
            return ExecResult::Async;
        }

        let duration = match action.params.resolve_clocktime("wait", "duration", ctx.vars) {
            Ok(Some(duration)) => duration,
            Ok(None) => {
                return ctx.fail(action, "wait needs 'duration', 'message-type' or 'signal-name'")
            }
            Err(err) => return ctx.fail(action, err.to_string()),
        };
        tracing::info!(duration = %duration, "waiting");
        ctx.control.wait = Some(PendingWait {
            action_seq: action.seq,
            kind: WaitKind::Until(Instant::now() + duration.to_duration()),
        });
        ExecResult::Async
    }
}
