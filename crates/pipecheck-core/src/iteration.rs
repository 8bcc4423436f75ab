//! `foreach` and `repeat` expansion.
//!
//! A `foreach` action carries exactly one iterator field plus an `actions`
//! list; it expands, in place, into one instance of each sub-action per
//! iterator value and never executes itself. A `repeat` parameter on any
//! action splices `N - 1` copies right after the original so the action
//! runs `N` times back to back.

use serde_yaml::{Mapping, Value};

use crate::action::ActionInstance;
use crate::declaration::Declaration;
use crate::error::{PipecheckError, Result};
use crate::expression::{self, VarTable};
use crate::params::ActionParams;
use crate::registry;

/// Parameter names that can never be iterator fields.
const RESERVED_FIELDS: &[&str] = &[
    "actions",
    "playback-time",
    "on-message",
    "repeat",
    "optional",
    "optional-action-type",
    "name",
    "timeout",
];

#[derive(Debug, Clone, PartialEq)]
pub enum IterationSource {
    /// Integer range `{start, stop, step}`, stop exclusive. Both bounds
    /// must be multiples of the step.
    Range { start: i64, stop: i64, step: i64 },
    /// Explicit list of values.
    List(Vec<Value>),
}

impl IterationSource {
    pub fn values(&self) -> Vec<Value> {
        match self {
            IterationSource::Range { start, stop, step } => {
                let mut out = Vec::new();
                let mut v = *start;
                while v < *stop {
                    out.push(Value::from(v));
                    v += step;
                }
                out
            }
            IterationSource::List(values) => values.clone(),
        }
    }
}

fn range_from_mapping(action: &str, field: &str, mapping: &Mapping) -> Result<IterationSource> {
    let malformed = |reason: String| PipecheckError::MalformedIterator {
        action: action.to_string(),
        reason,
    };
    let int = |key: &str| -> Result<Option<i64>> {
        match mapping.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| malformed(format!("'{field}.{key}' must be an integer"))),
        }
    };
    let start = int("start")?.ok_or_else(|| malformed(format!("'{field}' lacks 'start'")))?;
    let stop = int("stop")?.ok_or_else(|| malformed(format!("'{field}' lacks 'stop'")))?;
    let step = int("step")?.unwrap_or(1);
    if step <= 0 {
        return Err(malformed(format!("'{field}.step' must be positive")));
    }
    if start % step != 0 || stop % step != 0 {
        return Err(malformed(format!(
            "'{field}' bounds must be multiples of the step ({step})"
        )));
    }
    Ok(IterationSource::Range { start, stop, step })
}

/// Find the single iterator field of a `foreach` action. More than one
/// candidate is a structural fault.
pub fn find_iterator(
    action: &str,
    params: &ActionParams,
) -> Result<Option<(String, IterationSource)>> {
    let mut found: Option<(String, IterationSource)> = None;
    for (name, value) in params.iter() {
        if RESERVED_FIELDS.contains(&name) {
            continue;
        }
        let source = match value {
            Value::Sequence(items) => IterationSource::List(items.clone()),
            Value::Mapping(mapping) => range_from_mapping(action, name, mapping)?,
            _ => continue,
        };
        if let Some((first, _)) = &found {
            return Err(PipecheckError::MalformedIterator {
                action: action.to_string(),
                reason: format!("both '{first}' and '{name}' declare iteration values"),
            });
        }
        found = Some((name.to_string(), source));
    }
    Ok(found)
}

/// Load-time validation of a `foreach` declaration: exactly one iterator
/// field and a non-empty `actions` list.
pub fn validate_foreach(action: &str, params: &ActionParams) -> Result<()> {
    if find_iterator(action, params)?.is_none() {
        return Err(PipecheckError::MalformedIterator {
            action: action.to_string(),
            reason: "no iterator field declared".to_string(),
        });
    }
    match params.get("actions") {
        Some(Value::Sequence(items)) if !items.is_empty() => Ok(()),
        _ => Err(PipecheckError::MalformedIterator {
            action: action.to_string(),
            reason: "'actions' must be a non-empty list".to_string(),
        }),
    }
}

/// Substitute `$(name)` references recursively through a value, leaving
/// names absent from `vars` untouched for later resolution.
fn substitute_value(value: &Value, vars: &VarTable) -> Result<Value> {
    match value {
        Value::String(s) => {
            expression::substitute_variables(s, vars, true).map(Value::String)
        }
        Value::Sequence(items) => items
            .iter()
            .map(|v| substitute_value(v, vars))
            .collect::<Result<Vec<_>>>()
            .map(Value::Sequence),
        Value::Mapping(mapping) => {
            let mut out = Mapping::new();
            for (k, v) in mapping {
                out.insert(k.clone(), substitute_value(v, vars)?);
            }
            Ok(Value::Mapping(out))
        }
        other => Ok(other.clone()),
    }
}

/// Expand a `foreach` into the instances that replace it.
pub fn expand_foreach(
    action: &ActionInstance,
    next_seq: &mut u64,
) -> Result<Vec<ActionInstance>> {
    let (var, source) = find_iterator(&action.type_name, &action.params)?.ok_or_else(|| {
        PipecheckError::MalformedIterator {
            action: action.type_name.clone(),
            reason: "no iterator field declared".to_string(),
        }
    })?;
    let Some(Value::Sequence(bodies)) = action.params.get("actions") else {
        return Err(PipecheckError::MalformedIterator {
            action: action.type_name.clone(),
            reason: "'actions' must be a list".to_string(),
        });
    };

    let values = source.values();
    let total = values.len() as u32;
    let mut expanded = Vec::with_capacity(values.len() * bodies.len());
    for (index, iter_value) in values.iter().enumerate() {
        let mut locals = VarTable::new();
        locals.set(var.clone(), iter_value.clone());
        for body in bodies {
            let Value::Mapping(mapping) = substitute_value(body, &locals)? else {
                return Err(PipecheckError::MalformedIterator {
                    action: action.type_name.clone(),
                    reason: "'actions' entries must be mappings".to_string(),
                });
            };
            let mut mapping = mapping;
            let type_name = match mapping.remove("action") {
                Some(Value::String(name)) => name,
                _ => {
                    return Err(PipecheckError::MalformedIterator {
                        action: action.type_name.clone(),
                        reason: "'actions' entries need an 'action' field".to_string(),
                    })
                }
            };
            let ty = registry::lookup(&type_name)?
                .ok_or_else(|| PipecheckError::UnknownActionType(type_name.clone()))?;
            let decl = Declaration {
                action: type_name,
                params: ActionParams::new(mapping),
                index: action.lineno,
            };
            let seq = *next_seq;
            *next_seq += 1;
            let mut instance = ActionInstance::from_declaration(&decl, &ty, seq)?;
            instance.repeat_index = index as u32;
            instance.repeat_total = total;
            instance.iter_var = Some(var.clone());
            instance.iter_value = Some(iter_value.clone());
            expanded.push(instance);
        }
    }
    Ok(expanded)
}

/// Resolve the `repeat` parameter, which may be a literal count or an
/// expression over scenario variables.
pub fn repeat_count(action: &ActionInstance, vars: &VarTable) -> Result<Option<u32>> {
    let Some(count) = action
        .params
        .resolve_f64(&action.type_name, "repeat", vars)?
    else {
        return Ok(None);
    };
    if count < 1.0 || count.fract() != 0.0 {
        return Err(PipecheckError::InvalidParameter {
            action: action.type_name.clone(),
            parameter: "repeat".to_string(),
            reason: format!("must be a positive integer, got {count}"),
        });
    }
    Ok(Some(count as u32))
}

/// Mark `action` as the first of `count` repetitions and build the
/// remaining copies to splice in right after it.
pub fn expand_repeat(
    action: &mut ActionInstance,
    count: u32,
    next_seq: &mut u64,
) -> Vec<ActionInstance> {
    action.repeat_index = 0;
    action.repeat_total = count;
    let mut copies = Vec::with_capacity(count.saturating_sub(1) as usize);
    for index in 1..count {
        let mut copy = action.clone();
        copy.seq = *next_seq;
        *next_seq += 1;
        copy.repeat_index = index;
        copy.prepared = false;
        copies.push(copy);
    }
    copies
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(yaml: &str) -> ActionParams {
        ActionParams::new(serde_yaml::from_str(yaml).unwrap())
    }

    #[test]
    fn range_iterator_yields_multiples() {
        let p = params("pos:\n  start: 0\n  stop: 60\n  step: 20\nactions: []");
        let (name, source) = find_iterator("foreach", &p).unwrap().unwrap();
        assert_eq!(name, "pos");
        assert_eq!(
            source.values(),
            vec![Value::from(0), Value::from(20), Value::from(40)]
        );
    }

    #[test]
    fn range_bounds_must_be_step_multiples() {
        let p = params("pos:\n  start: 0\n  stop: 50\n  step: 20");
        assert!(matches!(
            find_iterator("foreach", &p),
            Err(PipecheckError::MalformedIterator { .. })
        ));
    }

    #[test]
    fn two_iterator_fields_are_rejected() {
        let p = params("rate: [0.5, 2.0]\npos: [1, 2]");
        let err = find_iterator("foreach", &p).unwrap_err();
        assert!(matches!(err, PipecheckError::MalformedIterator { .. }));
    }

    #[test]
    fn validate_requires_iterator_and_actions() {
        assert!(validate_foreach("foreach", &params("actions:\n- action: stop")).is_err());
        assert!(validate_foreach("foreach", &params("rate: [1, 2]\nactions: []")).is_err());
        assert!(
            validate_foreach("foreach", &params("rate: [1, 2]\nactions:\n- action: stop")).is_ok()
        );
    }

    #[test]
    fn foreach_substitutes_only_the_iterator_variable() {
        crate::registry::init().unwrap();
        let decl = Declaration::new(
            "foreach",
            params(
                "rate: [0.5, 2.0]\nactions:\n- action: set-vars\n  speed: \"$(rate)\"\n  label: \"$(global)\"",
            ),
        );
        let ty = registry::lookup("foreach").unwrap().unwrap();
        let foreach = ActionInstance::from_declaration(&decl, &ty, 1).unwrap();
        let mut next_seq = 100;
        let expanded = expand_foreach(&foreach, &mut next_seq).unwrap();
        assert_eq!(expanded.len(), 2);
        assert_eq!(expanded[0].params.get_str("speed"), Some("0.5"));
        assert_eq!(expanded[0].params.get_str("label"), Some("$(global)"));
        assert_eq!(expanded[1].params.get_str("speed"), Some("2.0"));
        assert_eq!(expanded[0].repeat_total, 2);
        assert_eq!(expanded[1].repeat_index, 1);
        assert_eq!(expanded[0].iter_var.as_deref(), Some("rate"));
        assert_eq!(next_seq, 102);
    }

    #[test]
    fn repeat_count_accepts_expressions() {
        crate::registry::init().unwrap();
        let decl = Declaration::new("eos", params("repeat: \"rounds * 2\""));
        let ty = registry::lookup("eos").unwrap().unwrap();
        let action = ActionInstance::from_declaration(&decl, &ty, 1).unwrap();
        let mut vars = VarTable::new();
        vars.set_f64("rounds", 2.0);
        assert_eq!(repeat_count(&action, &vars).unwrap(), Some(4));
    }

    #[test]
    fn repeat_expansion_builds_remaining_copies() {
        crate::registry::init().unwrap();
        let decl = Declaration::new("eos", params("repeat: 3"));
        let ty = registry::lookup("eos").unwrap().unwrap();
        let mut action = ActionInstance::from_declaration(&decl, &ty, 1).unwrap();
        let mut next_seq = 50;
        let copies = expand_repeat(&mut action, 3, &mut next_seq);
        assert_eq!(action.repeat_index, 0);
        assert_eq!(action.repeat_total, 3);
        assert_eq!(copies.len(), 2);
        assert_eq!(copies[0].seq, 50);
        assert_eq!(copies[1].repeat_index, 2);
        assert_eq!(next_seq, 52);
    }
}
