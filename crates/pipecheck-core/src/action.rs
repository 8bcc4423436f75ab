//! Action instances and their lifecycle state.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_yaml::Value;

use crate::error::{PipecheckError, Result};
use crate::expression;
use crate::params::ActionParams;
use crate::registry::ActionType;
use crate::types::ClockTime;

/// Lifecycle of one action instance.
///
/// `Ok`, `Error` and `ErrorReported` are terminal execution outcomes; the
/// scheduler still runs its completion pass afterwards and only then moves
/// the action to `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    /// Not dispatched yet.
    None,
    /// Dispatched; `execute` asked to be called again.
    InProgress,
    /// In flight, blocking the queue until completed.
    Async,
    /// In flight without blocking the queue.
    NonBlocking,
    Ok,
    Error,
    ErrorReported,
    Done,
}

/// A `playback-time` value: either resolved at load, or an expression
/// deferred until `position`/`duration` are known.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeSpec {
    Time(ClockTime),
    Expr(String),
}

/// One executable step of a scenario.
#[derive(Debug, Clone)]
pub struct ActionInstance {
    pub type_name: String,
    /// Optional user label from the `name` parameter.
    pub name: Option<String>,
    /// Position in the execution order, unique within a scenario.
    pub seq: u64,
    pub params: ActionParams,
    pub playback_time: Option<TimeSpec>,
    /// Message type name that triggers this action instead of a time.
    pub on_message: Option<String>,
    pub timeout: Option<Duration>,
    pub optional: bool,
    /// Which repetition this instance is, when expanded from `repeat`
    /// or `foreach`.
    pub repeat_index: u32,
    pub repeat_total: u32,
    /// Iterator variable and value this instance was expanded with.
    pub iter_var: Option<String>,
    pub iter_value: Option<Value>,
    pub state: ActionState,
    /// Set once completion has been requested, to catch double completion.
    pub(crate) completion_requested: bool,
    pub(crate) prepared: bool,
    pub(crate) started_at: Option<Instant>,
    pub(crate) execution_duration: Option<Duration>,
    /// Declaration index in the scenario file, for diagnostics.
    pub lineno: usize,
}

impl ActionInstance {
    /// Build an instance from a raw declaration, validated against its
    /// registered type. Structural faults here fail the whole load.
    pub fn from_declaration(
        decl: &crate::declaration::Declaration,
        ty: &ActionType,
        seq: u64,
    ) -> Result<ActionInstance> {
        for parameter in &ty.parameters {
            if parameter.mandatory && !decl.params.contains(&parameter.name) {
                return Err(PipecheckError::MissingParameter {
                    action: ty.name.clone(),
                    parameter: parameter.name.clone(),
                });
            }
        }

        let playback_time = match decl.params.get("playback-time") {
            None => None,
            Some(Value::Number(n)) => {
                let secs = n.as_f64().unwrap_or(-1.0);
                if secs < 0.0 {
                    return Err(PipecheckError::InvalidParameter {
                        action: ty.name.clone(),
                        parameter: "playback-time".to_string(),
                        reason: "must not be negative".to_string(),
                    });
                }
                Some(TimeSpec::Time(ClockTime::from_secs_f64(secs)))
            }
            Some(Value::String(s)) => {
                expression::check_syntax_lenient(s)?;
                Some(TimeSpec::Expr(s.clone()))
            }
            Some(other) => {
                return Err(PipecheckError::InvalidParameter {
                    action: ty.name.clone(),
                    parameter: "playback-time".to_string(),
                    reason: format!("expected a time or expression, got {other:?}"),
                })
            }
        };

        let on_message = decl.params.get_str("on-message").map(str::to_string);

        let optional = decl.params.get_bool("optional").unwrap_or(false);
        if optional && !ty.flags.can_be_optional {
            return Err(PipecheckError::InvalidParameter {
                action: ty.name.clone(),
                parameter: "optional".to_string(),
                reason: "this action type cannot be optional".to_string(),
            });
        }

        let timeout = decl
            .params
            .get_f64("timeout")
            .map(Duration::from_secs_f64);

        Ok(ActionInstance {
            type_name: ty.name.clone(),
            name: decl.params.get_str("name").map(str::to_string),
            seq,
            params: decl.params.clone(),
            playback_time,
            on_message,
            timeout,
            optional,
            repeat_index: 0,
            repeat_total: 0,
            iter_var: None,
            iter_value: None,
            state: ActionState::None,
            completion_requested: false,
            prepared: false,
            started_at: None,
            execution_duration: None,
            lineno: decl.index,
        })
    }

    /// True once the action reached a terminal execution outcome.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            ActionState::Ok | ActionState::Error | ActionState::ErrorReported | ActionState::Done
        )
    }

    pub fn failed(&self) -> bool {
        matches!(self.state, ActionState::Error | ActionState::ErrorReported)
    }

    /// Wall-clock time between dispatch and completion, once done.
    pub fn execution_duration(&self) -> Option<Duration> {
        self.execution_duration
    }
}

impl fmt::Display for ActionInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} '{}' (action #{})", self.type_name, name, self.seq),
            None => write!(f, "{} (action #{})", self.type_name, self.seq),
        }?;
        if self.repeat_total > 0 {
            write!(f, " [{}/{}]", self.repeat_index + 1, self.repeat_total)?;
        }
        Ok(())
    }
}

/// Read-only view of an action for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct ActionSnapshot {
    pub seq: u64,
    pub type_name: String,
    pub name: Option<String>,
    pub state: ActionState,
    pub optional: bool,
}

impl From<&ActionInstance> for ActionSnapshot {
    fn from(action: &ActionInstance) -> ActionSnapshot {
        ActionSnapshot {
            seq: action.seq,
            type_name: action.type_name.clone(),
            name: action.name.clone(),
            state: action.state,
            optional: action.optional,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::Declaration;
    use crate::registry::{ActionParameter, ActionTypeFlags};

    fn decl(action: &str, yaml: &str) -> Declaration {
        Declaration::new(action, ActionParams::new(serde_yaml::from_str(yaml).unwrap()))
    }

    fn seek_type() -> ActionType {
        ActionType::new("seek", "core", "seek the pipeline")
            .with_parameters(vec![
                ActionParameter::new("start", "target position").mandatory().time(),
            ])
            .with_flags(ActionTypeFlags {
                asynchronous: true,
                can_be_optional: true,
                ..Default::default()
            })
    }

    #[test]
    fn builds_instance_with_numeric_playback_time() {
        let d = decl("seek", "playback-time: 2.5\nstart: 0.0");
        let a = ActionInstance::from_declaration(&d, &seek_type(), 1).unwrap();
        assert_eq!(
            a.playback_time,
            Some(TimeSpec::Time(ClockTime::from_secs_f64(2.5)))
        );
        assert_eq!(a.state, ActionState::None);
        assert!(!a.optional);
    }

    #[test]
    fn keeps_expression_playback_time_unresolved() {
        let d = decl("seek", "playback-time: \"duration / 2\"\nstart: 0.0");
        let a = ActionInstance::from_declaration(&d, &seek_type(), 1).unwrap();
        assert_eq!(a.playback_time, Some(TimeSpec::Expr("duration / 2".into())));
    }

    #[test]
    fn rejects_bad_playback_time_expression_at_load() {
        let d = decl("seek", "playback-time: \"duration /\"\nstart: 0.0");
        assert!(ActionInstance::from_declaration(&d, &seek_type(), 1).is_err());
    }

    #[test]
    fn missing_mandatory_parameter_is_fatal() {
        let d = decl("seek", "playback-time: 1.0");
        let err = ActionInstance::from_declaration(&d, &seek_type(), 1).unwrap_err();
        assert!(matches!(
            err,
            PipecheckError::MissingParameter { parameter, .. } if parameter == "start"
        ));
    }

    #[test]
    fn optional_requires_capability() {
        let ty = ActionType::new("stop", "core", "stop");
        let d = decl("stop", "optional: true");
        assert!(ActionInstance::from_declaration(&d, &ty, 1).is_err());
    }

    #[test]
    fn display_includes_repeat_position() {
        let d = decl("seek", "start: 0.0");
        let mut a = ActionInstance::from_declaration(&d, &seek_type(), 7).unwrap();
        a.repeat_index = 1;
        a.repeat_total = 3;
        assert_eq!(a.to_string(), "seek (action #7) [2/3]");
    }
}
