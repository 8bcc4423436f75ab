//! Parsing of scenario files into raw action declarations.
//!
//! A scenario file is a YAML sequence of records. Every record names its
//! action type under the `action` key; all other keys are parameters:
//!
//! ```yaml
//! - action: meta
//!   target-state: playing
//! - action: seek
//!   playback-time: 2.0
//!   start: 0.0
//!   flags: flush+accurate
//! ```

use serde_yaml::Value;

use crate::error::{PipecheckError, Result};
use crate::params::ActionParams;

/// One raw record from a scenario file, not yet validated against the
/// registry.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub action: String,
    pub params: ActionParams,
    /// Position in the file, for diagnostics.
    pub index: usize,
}

impl Declaration {
    pub fn new(action: impl Into<String>, params: ActionParams) -> Declaration {
        Declaration {
            action: action.into(),
            params,
            index: 0,
        }
    }
}

/// Parse a scenario document into its declarations.
pub fn parse_str(source: &str) -> Result<Vec<Declaration>> {
    let docs: Vec<Value> = serde_yaml::from_str(source)?;
    let mut declarations = Vec::with_capacity(docs.len());
    for (index, value) in docs.into_iter().enumerate() {
        let Value::Mapping(mut mapping) = value else {
            return Err(PipecheckError::MalformedScenario(format!(
                "entry {index} is not a mapping"
            )));
        };
        let action = match mapping.remove("action") {
            Some(Value::String(name)) => name,
            Some(other) => {
                return Err(PipecheckError::MalformedScenario(format!(
                    "entry {index} has a non-string 'action' field: {other:?}"
                )))
            }
            None => {
                return Err(PipecheckError::MalformedScenario(format!(
                    "entry {index} is missing the 'action' field"
                )))
            }
        };
        declarations.push(Declaration {
            action,
            params: ActionParams::new(mapping),
            index,
        });
    }
    Ok(declarations)
}

pub fn parse_file(path: &std::path::Path) -> Result<Vec<Declaration>> {
    let source = std::fs::read_to_string(path)?;
    parse_str(&source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sequence_of_action_records() {
        let decls = parse_str(
            "- action: meta\n  target-state: paused\n- action: seek\n  playback-time: 1.0\n  start: 0.0\n",
        )
        .unwrap();
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].action, "meta");
        assert_eq!(decls[1].action, "seek");
        assert_eq!(decls[1].params.get_f64("playback-time"), Some(1.0));
        assert_eq!(decls[1].index, 1);
    }

    #[test]
    fn rejects_record_without_action_field() {
        let err = parse_str("- playback-time: 1.0\n").unwrap_err();
        assert!(matches!(err, PipecheckError::MalformedScenario(_)));
    }

    #[test]
    fn rejects_non_mapping_entries() {
        assert!(parse_str("- just-a-string\n").is_err());
    }

    #[test]
    fn parses_a_scenario_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pause.yaml");
        std::fs::write(&path, "- action: pause\n  playback-time: 2.0\n").unwrap();
        let decls = parse_file(&path).unwrap();
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].action, "pause");
    }

    #[test]
    fn missing_file_surfaces_the_io_error() {
        let err = parse_file(std::path::Path::new("/nonexistent/scenario.yaml")).unwrap_err();
        assert!(matches!(err, PipecheckError::Io(_)));
    }
}
