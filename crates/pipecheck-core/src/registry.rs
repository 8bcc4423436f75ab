//! Process-wide action type registry.
//!
//! All action types live in one shared registry so plugins and embedders
//! can add their own types or override the built-in ones. Overriding is
//! rank-gated: a registration only shadows an existing type when its rank
//! is at least as high, and the shadowed type stays reachable through
//! [`ActionType::overridden`]. An outranked registration is not a fault;
//! the call simply hands back the type already in use.

use std::sync::{Arc, Mutex};

use crate::action::ActionInstance;
use crate::actions;
use crate::declaration::Declaration;
use crate::error::{PipecheckError, Result};
use crate::params::ActionParams;
use crate::scenario::{ExecContext, PrepareContext};

// ---------------------------------------------------------------------------
// Action type model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rank {
    None = 0,
    Marginal = 64,
    Secondary = 128,
    Primary = 256,
}

/// Declared parameter of an action type. Mandatory parameters are
/// enforced at scenario load; time parameters get expression resolution
/// during the default prepare step.
#[derive(Debug, Clone)]
pub struct ActionParameter {
    pub name: String,
    pub description: String,
    pub mandatory: bool,
    pub is_time: bool,
}

impl ActionParameter {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> ActionParameter {
        ActionParameter {
            name: name.into(),
            description: description.into(),
            mandatory: false,
            is_time: false,
        }
    }

    pub fn mandatory(mut self) -> ActionParameter {
        self.mandatory = true;
        self
    }

    pub fn time(mut self) -> ActionParameter {
        self.is_time = true;
        self
    }
}

/// Capability flags of an action type.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionTypeFlags {
    /// Completion arrives later through the loop, not from `execute`.
    pub asynchronous: bool,
    /// May stay in flight while later actions run.
    pub non_blocking: bool,
    /// Executes at load time, before the pipeline runs.
    pub config: bool,
    /// May run as soon as its target element appears, ahead of its turn.
    pub can_execute_on_addition: bool,
    /// Accepts the `optional` parameter.
    pub can_be_optional: bool,
    /// Verifies state rather than mutating it.
    pub check: bool,
    /// Needs a running clock; refused in config-only scenarios.
    pub needs_clock: bool,
    /// Skipping it at teardown is not a `ScenarioNotEnded` fault.
    pub no_execution_not_fatal: bool,
    pub doesnt_need_pipeline: bool,
}

/// What `execute` reports back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecResult {
    /// Finished synchronously.
    Ok,
    /// Still running; blocks the queue until something calls it done.
    Async,
    /// Still running but later actions may proceed.
    NonBlocking,
    /// Keep calling `execute` on subsequent scheduler passes.
    InProgress,
    /// Failed; the scheduler raises the report.
    Error,
    /// Failed and the executor already reported the fault itself.
    ErrorReported,
}

/// What `prepare` tells the scheduler to do with the action.
#[derive(Debug)]
pub enum PrepareOutcome {
    /// Go ahead and execute.
    Continue,
    /// The action is complete without executing (e.g. it only expanded
    /// into other actions).
    Done,
    /// Replace the action with these instances, spliced in place.
    Expanded(Vec<ActionInstance>),
}

pub trait Execute: Send + Sync {
    fn execute(&self, ctx: &mut ExecContext<'_>, action: &mut ActionInstance) -> ExecResult;
}

pub trait Prepare: Send + Sync {
    fn prepare(
        &self,
        ctx: &mut PrepareContext<'_>,
        action: &mut ActionInstance,
    ) -> Result<PrepareOutcome>;
}

/// Load-time execution hook for `config`-flagged types. Runs without a
/// pipeline or scenario.
pub trait ConfigExecute: Send + Sync {
    fn execute_config(&self, params: &ActionParams) -> Result<()>;
}

pub struct ActionType {
    pub name: String,
    /// Who provides the implementation, e.g. `core` for built-ins.
    pub implementer_namespace: String,
    pub description: String,
    pub parameters: Vec<ActionParameter>,
    pub flags: ActionTypeFlags,
    pub rank: Rank,
    /// The type this registration shadowed, if any.
    pub overridden: Option<Arc<ActionType>>,
    pub(crate) execute: Option<Arc<dyn Execute>>,
    pub(crate) prepare: Option<Arc<dyn Prepare>>,
    pub(crate) config_execute: Option<Arc<dyn ConfigExecute>>,
}

impl std::fmt::Debug for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionType")
            .field("name", &self.name)
            .field("namespace", &self.implementer_namespace)
            .field("rank", &self.rank)
            .finish()
    }
}

impl ActionType {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        description: impl Into<String>,
    ) -> ActionType {
        ActionType {
            name: name.into(),
            implementer_namespace: namespace.into(),
            description: description.into(),
            parameters: Vec::new(),
            flags: ActionTypeFlags::default(),
            rank: Rank::Marginal,
            overridden: None,
            execute: None,
            prepare: None,
            config_execute: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<ActionParameter>) -> ActionType {
        self.parameters = parameters;
        self
    }

    pub fn with_flags(mut self, flags: ActionTypeFlags) -> ActionType {
        self.flags = flags;
        self
    }

    pub fn with_rank(mut self, rank: Rank) -> ActionType {
        self.rank = rank;
        self
    }

    pub fn with_executor(mut self, execute: impl Execute + 'static) -> ActionType {
        self.execute = Some(Arc::new(execute));
        self
    }

    pub fn with_preparer(mut self, prepare: impl Prepare + 'static) -> ActionType {
        self.prepare = Some(Arc::new(prepare));
        self
    }

    pub fn with_config_executor(mut self, config: impl ConfigExecute + 'static) -> ActionType {
        self.config_execute = Some(Arc::new(config));
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ActionParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct Registry {
    types: Vec<Arc<ActionType>>,
    pending_configs: Vec<Declaration>,
}

impl Registry {
    pub(crate) fn register(&mut self, mut ty: ActionType) -> Result<Arc<ActionType>> {
        let registered = if let Some(pos) = self.types.iter().position(|t| t.name == ty.name) {
            let existing = self.types[pos].clone();
            if ty.rank < existing.rank {
                // Outranked; the caller gets the type that stays in use.
                tracing::debug!(name = ty.name, "keeping higher-ranked registration");
                return Ok(existing);
            }
            ty.overridden = Some(existing);
            self.types[pos] = Arc::new(ty);
            self.types[pos].clone()
        } else {
            let registered = Arc::new(ty);
            self.types.push(registered.clone());
            registered
        };
        self.run_pending_configs(&registered)?;
        Ok(registered)
    }

    fn run_pending_configs(&mut self, ty: &Arc<ActionType>) -> Result<()> {
        if !ty.flags.config {
            return Ok(());
        }
        let (matching, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_configs)
            .into_iter()
            .partition(|d| d.action == ty.name);
        self.pending_configs = rest;
        for decl in matching {
            let hook = ty
                .config_execute
                .as_ref()
                .ok_or_else(|| PipecheckError::NotConfigurable(ty.name.clone()))?;
            hook.execute_config(&decl.params)?;
        }
        Ok(())
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Arc<ActionType>> {
        self.types.iter().find(|t| t.name == name).cloned()
    }

    pub(crate) fn list(&self) -> Vec<Arc<ActionType>> {
        self.types.clone()
    }

    pub(crate) fn queue_config(&mut self, decl: Declaration) {
        self.pending_configs.push(decl);
    }
}

static REGISTRY: Mutex<Option<Registry>> = Mutex::new(None);

fn poisoned() -> PipecheckError {
    PipecheckError::RegistryNotInitialized
}

/// Initialize the registry and register the built-in action types.
/// Idempotent; every entry point that needs the registry calls it.
pub fn init() -> Result<()> {
    let mut guard = REGISTRY.lock().map_err(|_| poisoned())?;
    if guard.is_none() {
        let mut registry = Registry::default();
        actions::register_builtins(&mut registry)?;
        *guard = Some(registry);
    }
    Ok(())
}

/// Tear the registry down, dropping every registered type and any pending
/// config declarations. Mainly for embedders that want a clean slate.
pub fn deinit() -> Result<()> {
    let mut guard = REGISTRY.lock().map_err(|_| poisoned())?;
    *guard = None;
    Ok(())
}

pub fn register(ty: ActionType) -> Result<Arc<ActionType>> {
    let mut guard = REGISTRY.lock().map_err(|_| poisoned())?;
    guard.as_mut().ok_or_else(poisoned)?.register(ty)
}

pub fn lookup(name: &str) -> Result<Option<Arc<ActionType>>> {
    let guard = REGISTRY.lock().map_err(|_| poisoned())?;
    Ok(guard.as_ref().ok_or_else(poisoned)?.lookup(name))
}

pub fn list() -> Result<Vec<Arc<ActionType>>> {
    let guard = REGISTRY.lock().map_err(|_| poisoned())?;
    Ok(guard.as_ref().ok_or_else(poisoned)?.list())
}

/// Park a config declaration whose action type is not registered yet.
/// It executes the moment a matching `config`-flagged type arrives.
pub fn queue_config(decl: Declaration) -> Result<()> {
    let mut guard = REGISTRY.lock().map_err(|_| poisoned())?;
    guard.as_mut().ok_or_else(poisoned)?.queue_config(decl);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[test]
    fn init_registers_builtin_types() {
        init().unwrap();
        let seek = lookup("seek").unwrap().unwrap();
        assert!(seek.flags.asynchronous);
        assert!(seek.parameter("start").is_some_and(|p| p.mandatory));
        assert!(lookup("no-such-type").unwrap().is_none());
    }

    #[test]
    fn higher_rank_overrides_and_chains() {
        init().unwrap();
        struct Noop;
        impl Execute for Noop {
            fn execute(&self, _: &mut ExecContext<'_>, _: &mut ActionInstance) -> ExecResult {
                ExecResult::Ok
            }
        }
        register(
            ActionType::new("override-probe", "test", "probe")
                .with_rank(Rank::Secondary)
                .with_executor(Noop),
        )
        .unwrap();

        // An outranked registration is a no-op returning the type in use.
        let low = register(
            ActionType::new("override-probe", "test", "lower")
                .with_rank(Rank::Marginal)
                .with_executor(Noop),
        )
        .unwrap();
        assert_eq!(low.description, "probe");
        assert_eq!(
            lookup("override-probe").unwrap().unwrap().description,
            "probe"
        );

        let high = register(
            ActionType::new("override-probe", "test", "higher")
                .with_rank(Rank::Primary)
                .with_executor(Noop),
        )
        .unwrap();
        assert_eq!(high.description, "higher");
        assert_eq!(
            high.overridden.as_ref().map(|t| t.description.as_str()),
            Some("probe")
        );
        assert_eq!(
            lookup("override-probe").unwrap().unwrap().rank,
            Rank::Primary
        );
    }

    #[test]
    fn queued_config_runs_when_type_registers() {
        init().unwrap();
        static RAN: AtomicBool = AtomicBool::new(false);
        struct Recorder;
        impl ConfigExecute for Recorder {
            fn execute_config(&self, params: &ActionParams) -> Result<()> {
                assert_eq!(params.get_str("knob"), Some("on"));
                RAN.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
        let mut params = ActionParams::default();
        params.set("knob", serde_yaml::Value::from("on"));
        queue_config(Declaration::new("late-config-probe", params)).unwrap();
        assert!(!RAN.load(Ordering::SeqCst));

        register(
            ActionType::new("late-config-probe", "test", "config probe")
                .with_flags(ActionTypeFlags {
                    config: true,
                    ..Default::default()
                })
                .with_config_executor(Recorder),
        )
        .unwrap();
        assert!(RAN.load(Ordering::SeqCst));
    }

    #[test]
    fn queued_config_runs_when_an_override_brings_the_config_hook() {
        init().unwrap();
        static RAN: AtomicBool = AtomicBool::new(false);
        struct Recorder;
        impl ConfigExecute for Recorder {
            fn execute_config(&self, _: &ActionParams) -> Result<()> {
                RAN.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
        register(ActionType::new("config-after-override", "test", "plain")).unwrap();
        queue_config(Declaration::new(
            "config-after-override",
            ActionParams::default(),
        ))
        .unwrap();
        assert!(!RAN.load(Ordering::SeqCst));

        register(
            ActionType::new("config-after-override", "test", "with config")
                .with_rank(Rank::Secondary)
                .with_flags(ActionTypeFlags {
                    config: true,
                    ..Default::default()
                })
                .with_config_executor(Recorder),
        )
        .unwrap();
        assert!(RAN.load(Ordering::SeqCst));
    }
}
