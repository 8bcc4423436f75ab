//! Scenario-level configuration, from the leading `meta` record.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::params::ActionParams;
use crate::types::{ClockTime, PipelineState};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ScenarioConfig {
    pub name: Option<String>,
    pub summary: Option<String>,
    /// The scenario only configures the process; it has no runtime
    /// actions and never attaches to a pipeline.
    pub is_config: bool,
    /// The scenario drives pipeline states itself; the engine must not
    /// force an initial transition.
    pub handles_states: bool,
    /// Initial state to drive the pipeline to. Defaults to `playing`
    /// unless `handles-states` is set.
    pub target_state: Option<PipelineState>,
    /// Keep executing after end-of-stream instead of winding down.
    pub ignore_eos: bool,
    /// Pipeline error messages are expected and not fatal.
    pub allow_errors: bool,
    /// Skip the per-tick position-within-segment sanity check.
    pub ignore_invalid_positions: bool,
    /// Upper bound on reported pipeline latency, in seconds.
    pub max_latency: Option<f64>,
    /// Upper bound on QoS-dropped buffers over the whole run.
    pub max_dropped: Option<u64>,
    /// How often the embedding should drive the scheduler, in
    /// milliseconds.
    pub action_execution_interval: u64,
    /// Drive the scheduler on every loop turn rather than on the
    /// interval.
    pub actions_on_idle: bool,
}

impl Default for ScenarioConfig {
    fn default() -> ScenarioConfig {
        ScenarioConfig {
            name: None,
            summary: None,
            is_config: false,
            handles_states: false,
            target_state: None,
            ignore_eos: false,
            allow_errors: false,
            ignore_invalid_positions: false,
            max_latency: None,
            max_dropped: None,
            action_execution_interval: 10,
            actions_on_idle: false,
        }
    }
}

impl ScenarioConfig {
    pub fn from_params(params: &ActionParams) -> Result<ScenarioConfig> {
        let value = serde_yaml::Value::Mapping(params.clone().into_mapping());
        Ok(serde_yaml::from_value(value)?)
    }

    /// State the engine drives the pipeline to when attaching, if any.
    pub fn initial_state(&self) -> Option<PipelineState> {
        match (self.target_state, self.handles_states) {
            (Some(state), _) => Some(state),
            (None, true) => None,
            (None, false) => Some(PipelineState::Playing),
        }
    }

    pub fn max_latency_time(&self) -> Option<ClockTime> {
        self.max_latency.map(ClockTime::from_secs_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> Result<ScenarioConfig> {
        ScenarioConfig::from_params(&ActionParams::new(serde_yaml::from_str(yaml).unwrap()))
    }

    #[test]
    fn defaults_drive_pipeline_to_playing() {
        let cfg = config("{}").unwrap();
        assert_eq!(cfg.initial_state(), Some(PipelineState::Playing));
        assert!(!cfg.ignore_eos);
        assert_eq!(cfg.action_execution_interval, 10);
    }

    #[test]
    fn handles_states_suppresses_initial_transition() {
        let cfg = config("handles-states: true").unwrap();
        assert_eq!(cfg.initial_state(), None);
    }

    #[test]
    fn explicit_target_state_wins() {
        let cfg = config("target-state: paused\nhandles-states: true").unwrap();
        assert_eq!(cfg.initial_state(), Some(PipelineState::Paused));
    }

    #[test]
    fn latency_budget_converts_to_clock_time() {
        let cfg = config("max-latency: 0.25").unwrap();
        assert_eq!(cfg.max_latency_time(), Some(ClockTime::from_millis(250)));
    }

    #[test]
    fn unknown_meta_fields_are_fatal() {
        assert!(config("target-staet: paused").is_err());
    }
}
