//! Typed access to the free-form parameter record of a scenario action.

use serde_yaml::{Mapping, Value};

use crate::error::{PipecheckError, Result};
use crate::expression::{self, VarTable};
use crate::types::ClockTime;

/// The key/value fields of one action declaration, minus the `action`
/// discriminant itself. Field order from the scenario file is preserved,
/// which matters for `foreach` iterator detection.
#[derive(Debug, Clone, Default)]
pub struct ActionParams {
    fields: Mapping,
}

impl ActionParams {
    pub fn new(fields: Mapping) -> ActionParams {
        ActionParams { fields }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(Value::String(name.into()), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .filter_map(|(k, v)| k.as_str().map(|k| (k, v)))
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_u32(&self, name: &str) -> Option<u32> {
        self.get(name).and_then(Value::as_u64).map(|v| v as u32)
    }

    /// Numeric field that may be a literal or an expression string over
    /// scenario variables.
    pub fn resolve_f64(&self, action: &str, name: &str, vars: &VarTable) -> Result<Option<f64>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) => expression::evaluate_with_vars(s, vars).map(Some),
            Some(other) => Err(PipecheckError::InvalidParameter {
                action: action.to_string(),
                parameter: name.to_string(),
                reason: format!("expected a number or expression, got {other:?}"),
            }),
        }
    }

    /// Time-valued field in seconds. Negative values and the literal
    /// string `none` mean "no time", matching how scenarios express an
    /// open-ended seek stop position.
    pub fn resolve_clocktime(
        &self,
        action: &str,
        name: &str,
        vars: &VarTable,
    ) -> Result<Option<ClockTime>> {
        if let Some("none") = self.get_str(name) {
            return Ok(None);
        }
        match self.resolve_f64(action, name, vars)? {
            None => Ok(None),
            Some(secs) if secs < 0.0 => Ok(None),
            Some(secs) => Ok(Some(ClockTime::from_secs_f64(secs))),
        }
    }

    pub fn into_mapping(self) -> Mapping {
        self.fields
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_from_yaml(yaml: &str) -> ActionParams {
        ActionParams::new(serde_yaml::from_str(yaml).unwrap())
    }

    #[test]
    fn reads_plain_scalars() {
        let p = params_from_yaml("start: 1.5\nflags: flush\noptional: true\nrepeat: 4");
        assert_eq!(p.get_f64("start"), Some(1.5));
        assert_eq!(p.get_str("flags"), Some("flush"));
        assert_eq!(p.get_bool("optional"), Some(true));
        assert_eq!(p.get_u32("repeat"), Some(4));
        assert!(p.get("missing").is_none());
    }

    #[test]
    fn resolves_expression_fields() {
        let p = params_from_yaml("start: \"duration / 2\"");
        let mut vars = VarTable::new();
        vars.set_f64("duration", 10.0);
        let t = p.resolve_clocktime("seek", "start", &vars).unwrap().unwrap();
        assert_eq!(t, ClockTime::from_secs_f64(5.0));
    }

    #[test]
    fn negative_and_none_times_resolve_to_nothing() {
        let vars = VarTable::new();
        let p = params_from_yaml("stop: -1.0");
        assert!(p.resolve_clocktime("seek", "stop", &vars).unwrap().is_none());
        let p = params_from_yaml("stop: none");
        assert!(p.resolve_clocktime("seek", "stop", &vars).unwrap().is_none());
    }

    #[test]
    fn non_numeric_time_field_is_rejected() {
        let vars = VarTable::new();
        let p = params_from_yaml("start: [1, 2]");
        assert!(p.resolve_clocktime("seek", "start", &vars).is_err());
    }

    #[test]
    fn iteration_preserves_declaration_order() {
        let p = params_from_yaml("zeta: 1\nalpha: 2");
        let keys: Vec<&str> = p.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }
}
