// Install workflow controller

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{
    check_bypass, spawn_preflights, spawn_step, AppConfigSchema, ControllerError, ControllerOptions,
    StepLabels,
};
use crate::envelope::{GuardedOperation, OperationStates};
use crate::statemachine::{StateMachine, TransitionRecord};
use crate::steps::Steps;
use crate::store::{
    AirgapStore, AppStore, ConfigStore, InfraStore, InstallationStore, PreflightStore,
    StatusRecord, StatusTracking,
};
use crate::types::{ConfigValues, InstallationConfig, PreflightScope};
use crate::workflows::{install_table, InstallState, Mode, Target};

use InstallState::*;

/// Drives a fresh installation.
pub struct InstallController {
    options: ControllerOptions,
    engine: Arc<StateMachine<InstallState>>,
    schema: AppConfigSchema,
    steps: Steps,
    cancel: CancellationToken,
    config: Arc<ConfigStore>,
    installation: Arc<InstallationStore>,
    host_preflights: Arc<PreflightStore>,
    infra: Arc<InfraStore>,
    airgap: Arc<AirgapStore>,
    app_preflights: Arc<PreflightStore>,
    app: Arc<AppStore>,
}

impl InstallController {
    pub fn new(
        options: ControllerOptions,
        schema: AppConfigSchema,
        steps: Steps,
        cancel: CancellationToken,
    ) -> Self {
        let table = install_table(options.target, options.airgap);
        info!(
            target = %options.target,
            airgap = options.airgap,
            transitions = table.len(),
            "Creating install controller"
        );
        Self {
            engine: Arc::new(StateMachine::new(New, table)),
            options,
            schema,
            steps,
            cancel,
            config: Arc::new(ConfigStore::new()),
            installation: Arc::new(InstallationStore::with_result(InstallationConfig::default())),
            host_preflights: Arc::new(PreflightStore::new()),
            infra: Arc::new(InfraStore::new()),
            airgap: Arc::new(AirgapStore::new()),
            app_preflights: Arc::new(PreflightStore::new()),
            app: Arc::new(AppStore::new()),
        }
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    pub fn current_state(&self) -> InstallState {
        self.engine.current_state()
    }

    pub fn last_transition(&self) -> Option<TransitionRecord<InstallState>> {
        self.engine.last_transition()
    }

    pub fn is_busy(&self) -> bool {
        self.engine.is_lock_acquired()
    }

    fn unsupported(&self, action: &'static str) -> ControllerError {
        ControllerError::Unsupported {
            action,
            mode: Mode::Install,
            target: self.options.target,
        }
    }

    fn require_linux(&self, action: &'static str) -> Result<(), ControllerError> {
        match self.options.target {
            Target::Linux => Ok(()),
            Target::Kubernetes => Err(self.unsupported(action)),
        }
    }

    /// Current values with schema defaults filled in.
    pub fn app_config_values(&self) -> ConfigValues {
        self.schema
            .resolve(&self.config.result().unwrap_or_default())
    }

    pub fn app_config_schema(&self) -> &AppConfigSchema {
        &self.schema
    }

    /// Merge `patch` into the stored values. Values that fail validation are
    /// not stored and leave the workflow in `ApplicationConfigurationFailed`.
    pub async fn patch_app_config_values(
        &self,
        patch: ConfigValues,
    ) -> Result<ConfigValues, ControllerError> {
        let states = OperationStates::new(
            ApplicationConfiguring,
            ApplicationConfigured,
            ApplicationConfigurationFailed,
        );
        let running = GuardedOperation::acquire(&self.engine, states)?.start()?;
        self.config.set_running("Applying application configuration");

        let result = running
            .run(|| async {
                let merged =
                    AppConfigSchema::merge(&self.config.result().unwrap_or_default(), patch);
                self.schema.validate(&merged)?;
                self.config.set_result(Some(merged));
                anyhow::Ok(self.app_config_values())
            })
            .await;

        match &result {
            Ok(_) => self.config.set_succeeded("Application configuration applied"),
            Err(err) => self.config.set_failed(&err.to_string()),
        }
        Ok(result?)
    }

    pub fn app_config_status(&self) -> StatusRecord {
        self.config.status()
    }

    /// Validate and store the installation settings.
    pub async fn configure_installation(
        &self,
        installation: InstallationConfig,
    ) -> Result<InstallationConfig, ControllerError> {
        let states = OperationStates::new(
            InstallationConfiguring,
            InstallationConfigured,
            InstallationConfigurationFailed,
        );
        let running = GuardedOperation::acquire(&self.engine, states)?.start()?;
        self.installation.set_running("Configuring installation");

        let result = running
            .run(|| async {
                installation.validate()?;
                self.installation.set_result(Some(installation.clone()));
                anyhow::Ok(installation)
            })
            .await;

        match &result {
            Ok(_) => self.installation.set_succeeded("Installation configured"),
            Err(err) => self.installation.set_failed(&err.to_string()),
        }
        Ok(result?)
    }

    pub fn installation_config(&self) -> InstallationConfig {
        self.installation.result().unwrap_or_default()
    }

    pub fn installation_status(&self) -> StatusRecord {
        self.installation.status()
    }

    pub fn run_host_preflights(&self) -> Result<StatusRecord, ControllerError> {
        self.require_linux("host preflights")?;
        let states = OperationStates::new(
            HostPreflightsRunning,
            HostPreflightsSucceeded,
            HostPreflightsExecutionFailed,
        );
        let running = GuardedOperation::acquire(&self.engine, states)?.start()?;

        Ok(spawn_preflights(
            running,
            PreflightScope::Host,
            Arc::clone(&self.steps.preflights),
            Arc::clone(&self.host_preflights),
            self.cancel.child_token(),
            (HostPreflightsSucceeded, HostPreflightsFailed),
        ))
    }

    pub fn host_preflights(&self) -> Arc<PreflightStore> {
        Arc::clone(&self.host_preflights)
    }

    /// Install the cluster infrastructure. Failed host preflights are only
    /// skipped when `ignore_host_preflights` is set and allowed.
    pub fn setup_infra(&self, ignore_host_preflights: bool) -> Result<StatusRecord, ControllerError> {
        let bypass = check_bypass(
            &self.engine.current_state(),
            &HostPreflightsFailed,
            PreflightScope::Host,
            ignore_host_preflights,
            self.options.allow_ignore_host_preflights,
        )?;
        let states = OperationStates::new(
            InfrastructureInstalling,
            InfrastructureInstalled,
            InfrastructureInstallFailed,
        );
        let guarded = GuardedOperation::acquire(&self.engine, states)?;
        if bypass {
            guarded.transition(HostPreflightsFailedBypassed)?;
        }
        let running = guarded.start()?;

        self.infra.clear();
        let infra = Arc::clone(&self.steps.infra);
        let store = Arc::clone(&self.infra);
        let installation = self.installation_config();
        let cancel = self.cancel.child_token();

        Ok(spawn_step(
            running,
            Arc::clone(&self.infra),
            StepLabels {
                running: "Installing infrastructure",
                succeeded: "Infrastructure installed",
                failed: "Infrastructure installation failed",
            },
            move || async move { infra.install(cancel, &installation, &store).await },
        ))
    }

    pub fn infra(&self) -> Arc<InfraStore> {
        Arc::clone(&self.infra)
    }

    pub fn process_airgap(&self) -> Result<StatusRecord, ControllerError> {
        if self.options.target != Target::Linux || !self.options.airgap {
            return Err(self.unsupported("airgap processing"));
        }
        let states =
            OperationStates::new(AirgapProcessing, AirgapProcessed, AirgapProcessingFailed);
        let running = GuardedOperation::acquire(&self.engine, states)?.start()?;

        self.airgap.clear();
        let processor = Arc::clone(&self.steps.airgap);
        let store = Arc::clone(&self.airgap);
        let cancel = self.cancel.child_token();

        Ok(spawn_step(
            running,
            Arc::clone(&self.airgap),
            StepLabels {
                running: "Processing airgap bundle",
                succeeded: "Airgap bundle processed",
                failed: "Airgap processing failed",
            },
            move || async move { processor.process(cancel, &store).await },
        ))
    }

    pub fn airgap(&self) -> Arc<AirgapStore> {
        Arc::clone(&self.airgap)
    }

    pub fn run_app_preflights(&self) -> Result<StatusRecord, ControllerError> {
        let states = OperationStates::new(
            AppPreflightsRunning,
            AppPreflightsSucceeded,
            AppPreflightsExecutionFailed,
        );
        let running = GuardedOperation::acquire(&self.engine, states)?.start()?;

        Ok(spawn_preflights(
            running,
            PreflightScope::App,
            Arc::clone(&self.steps.preflights),
            Arc::clone(&self.app_preflights),
            self.cancel.child_token(),
            (AppPreflightsSucceeded, AppPreflightsFailed),
        ))
    }

    pub fn app_preflights(&self) -> Arc<PreflightStore> {
        Arc::clone(&self.app_preflights)
    }

    pub fn install_app(&self, ignore_app_preflights: bool) -> Result<StatusRecord, ControllerError> {
        let bypass = check_bypass(
            &self.engine.current_state(),
            &AppPreflightsFailed,
            PreflightScope::App,
            ignore_app_preflights,
            self.options.allow_ignore_app_preflights,
        )?;
        let states = OperationStates::new(AppInstalling, Succeeded, AppInstallFailed);
        let guarded = GuardedOperation::acquire(&self.engine, states)?;
        if bypass {
            guarded.transition(AppPreflightsFailedBypassed)?;
        }
        let running = guarded.start()?;

        self.app.clear();
        let deployer = Arc::clone(&self.steps.app);
        let store = Arc::clone(&self.app);
        let values = self.app_config_values();
        let cancel = self.cancel.child_token();

        Ok(spawn_step(
            running,
            Arc::clone(&self.app),
            StepLabels {
                running: "Installing application",
                succeeded: "Application installed",
                failed: "Application installation failed",
            },
            move || async move {
                let release = deployer.install(cancel, &values, &store).await?;
                info!(app = %release.name, version = %release.version, "Application installed");
                store.set_release(Some(release));
                anyhow::Ok(())
            },
        ))
    }

    pub fn app(&self) -> Arc<AppStore> {
        Arc::clone(&self.app)
    }

    /// Cancel in-flight steps. Each settles in its failure state once its
    /// collaborator returns.
    pub fn shutdown(&self) {
        info!(state = %self.current_state(), "Shutting down install controller");
        self.cancel.cancel();
    }
}
