//! Long running workflow steps
//!
//! Controllers never talk to a cluster directly. Each step of a workflow is
//! delegated to one of the collaborators below, which receive a cancellation
//! token they are expected to honour and a store to report progress into.
//! [`CommandSteps`] implements all of them by running configured commands.

mod command;

pub use command::CommandSteps;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::store::{AirgapStore, AppStore, InfraStore};
use crate::types::{AppRelease, ConfigValues, InstallationConfig, PreflightOutput, PreflightScope};

/// Runs host or app readiness checks.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PreflightRunner: Send + Sync {
    /// Titles of the checks `run` will report on, known before running.
    fn titles(&self, scope: PreflightScope) -> Vec<String>;

    /// Run the checks. Failing checks are reported in the output, an `Err`
    /// means the checks could not be executed at all.
    async fn run(
        &self,
        cancel: CancellationToken,
        scope: PreflightScope,
    ) -> anyhow::Result<PreflightOutput>;
}

/// Provisions or upgrades the cluster infrastructure.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InfraManager: Send + Sync {
    async fn install(
        &self,
        cancel: CancellationToken,
        config: &InstallationConfig,
        store: &InfraStore,
    ) -> anyhow::Result<()>;

    async fn upgrade(&self, cancel: CancellationToken, store: &InfraStore) -> anyhow::Result<()>;
}

/// Loads the images and artifacts of an airgap bundle.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AirgapProcessor: Send + Sync {
    async fn process(&self, cancel: CancellationToken, store: &AirgapStore) -> anyhow::Result<()>;
}

/// Deploys the application.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AppDeployer: Send + Sync {
    async fn install(
        &self,
        cancel: CancellationToken,
        values: &ConfigValues,
        store: &AppStore,
    ) -> anyhow::Result<AppRelease>;

    async fn upgrade(
        &self,
        cancel: CancellationToken,
        values: &ConfigValues,
        store: &AppStore,
    ) -> anyhow::Result<AppRelease>;
}

/// The collaborators a controller delegates to
#[derive(Clone)]
pub struct Steps {
    pub preflights: Arc<dyn PreflightRunner>,
    pub infra: Arc<dyn InfraManager>,
    pub airgap: Arc<dyn AirgapProcessor>,
    pub app: Arc<dyn AppDeployer>,
}

impl Steps {
    /// Use one implementation for every step.
    pub fn uniform<T>(steps: Arc<T>) -> Self
    where
        T: PreflightRunner + InfraManager + AirgapProcessor + AppDeployer + 'static,
    {
        Self {
            preflights: steps.clone(),
            infra: steps.clone(),
            airgap: steps.clone(),
            app: steps,
        }
    }
}

impl std::fmt::Debug for Steps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Steps").finish_non_exhaustive()
    }
}
