//! Install and upgrade controllers
//!
//! A controller owns one workflow: its state machine, its status stores and
//! the step collaborators. Every action runs inside the guarded operation
//! envelope. Short actions run inline; long ones are accepted once the
//! workflow has entered their running state and then finish in a spawned
//! task that reports through the matching store.

mod app_config;
mod install;
mod upgrade;

pub use app_config::{AppConfigItem, AppConfigSchema, ItemKind};
pub use install::InstallController;
pub use upgrade::UpgradeController;

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::WorkflowConfig;
use crate::envelope::{OperationError, RunningOperation};
use crate::statemachine::{State, StateMachineError};
use crate::steps::PreflightRunner;
use crate::store::{PreflightStore, StatusRecord, StatusTracking};
use crate::types::{PreflightScope, ValidationError};
use crate::workflows::{Mode, Target};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Operation(#[from] OperationError),
    #[error("{scope} preflight checks failed and cannot be ignored")]
    BypassNotAllowed { scope: PreflightScope },
    #[error("{action} is not supported for {mode} on {target}")]
    Unsupported {
        action: &'static str,
        mode: Mode,
        target: Target,
    },
}

impl From<StateMachineError> for ControllerError {
    fn from(err: StateMachineError) -> Self {
        ControllerError::Operation(err.into())
    }
}

impl ControllerError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControllerError::Operation(err) if err.is_busy() || err.is_invalid_transition())
    }

    /// Rejected input, as opposed to a failure while acting on it
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            ControllerError::Operation(err) => err.downcast_ref::<ValidationError>(),
            _ => None,
        }
    }
}

/// Settings shared by both controllers
#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    pub target: Target,
    pub airgap: bool,
    pub allow_ignore_host_preflights: bool,
    pub allow_ignore_app_preflights: bool,
}

impl From<&WorkflowConfig> for ControllerOptions {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            target: config.target,
            airgap: config.airgap,
            allow_ignore_host_preflights: config.allow_ignore_host_preflights,
            allow_ignore_app_preflights: config.allow_ignore_app_preflights,
        }
    }
}

/// How a background action describes itself in its store
pub(crate) struct StepLabels {
    pub running: &'static str,
    pub succeeded: &'static str,
    pub failed: &'static str,
}

/// Decide whether a request may skip failed preflights.
///
/// Returns `Ok(true)` when the workflow sits in `failed_state` and skipping
/// was both requested and allowed.
pub(crate) fn check_bypass<S: State>(
    current: &S,
    failed_state: &S,
    scope: PreflightScope,
    requested: bool,
    allowed: bool,
) -> Result<bool, ControllerError> {
    if current != failed_state {
        return Ok(false);
    }
    if requested && allowed {
        info!(scope = %scope, "Ignoring failed preflight checks");
        Ok(true)
    } else {
        Err(ControllerError::BypassNotAllowed { scope })
    }
}

/// Finish a started operation in the background, reporting into `store`.
///
/// The store is marked running before this returns and marked done before
/// the workflow settles and releases its lock.
pub(crate) fn spawn_step<S, T, F, Fut>(
    running: RunningOperation<S>,
    store: Arc<T>,
    labels: StepLabels,
    op: F,
) -> StatusRecord
where
    S: State,
    T: StatusTracking + Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    store.set_running(labels.running);
    let accepted = store.status();
    info!(operation.id = %running.operation_id(), step = labels.running, "Step accepted");

    tokio::spawn(async move {
        let report = |result: &Result<(), OperationError>| match result {
            Ok(()) => store.set_succeeded(labels.succeeded),
            Err(err) => store.set_failed(&format!("{}: {err}", labels.failed)),
        };
        // the outcome is already in the store and the log
        let _ = running.run_reported(op, report).await;
    });
    accepted
}

/// Run preflight checks in the background.
///
/// Checks that ran but reported failures settle in `checks_failed`; checks
/// that could not run settle in the operation's failure state.
pub(crate) fn spawn_preflights<S: State>(
    running: RunningOperation<S>,
    scope: PreflightScope,
    runner: Arc<dyn PreflightRunner>,
    store: Arc<PreflightStore>,
    cancel: CancellationToken,
    states: (S, S),
) -> StatusRecord {
    let (checks_passed, checks_failed) = states;
    store.clear();
    store.set_titles(runner.titles(scope));
    store.set_running(&format!("Running {scope} preflight checks"));
    let accepted = store.status();
    info!(operation.id = %running.operation_id(), scope = %scope, "Preflights accepted");

    tokio::spawn(async move {
        let op = || async {
            let output = runner.run(cancel, scope).await?;
            let failed = output.has_failures();
            store.set_output(Some(output));
            let state = if failed { checks_failed } else { checks_passed };
            anyhow::Ok((failed, state))
        };
        let report = |result: &Result<bool, OperationError>| match result {
            Ok(false) => store.set_succeeded(&format!("{scope} preflight checks passed")),
            Ok(true) => {
                warn!(scope = %scope, "Preflight checks reported failures");
                store.set_failed(&format!("{scope} preflight checks failed"))
            }
            Err(err) => store.set_failed(&format!("{scope} preflight checks did not complete: {err}")),
        };
        let _ = running.run_settled_reported(op, report).await;
    });
    accepted
}
