use thiserror::Error;

/// Faults raised while loading or validating a scenario. These are fatal:
/// a scenario carrying one of them never starts executing. Runtime faults
/// (a seek the pipeline refuses, a timed-out action) go through the
/// [`crate::report::Reporter`] instead and do not abort the run.
#[derive(Debug, Error)]
pub enum PipecheckError {
    #[error("action registry not initialized: call registry::init() first")]
    RegistryNotInitialized,

    #[error("unknown action type: {0}")]
    UnknownActionType(String),

    #[error("missing mandatory parameter '{parameter}' for action '{action}'")]
    MissingParameter { action: String, parameter: String },

    #[error("invalid value for parameter '{parameter}' of action '{action}': {reason}")]
    InvalidParameter {
        action: String,
        parameter: String,
        reason: String,
    },

    #[error("malformed iterator on action '{action}': {reason}")]
    MalformedIterator { action: String, reason: String },

    #[error("invalid expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("malformed scenario: {0}")]
    MalformedScenario(String),

    #[error("action '{0}' cannot run as a config action")]
    NotConfigurable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, PipecheckError>;
