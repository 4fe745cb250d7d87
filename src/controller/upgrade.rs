// Upgrade workflow controller

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
    AirgapStore, AppStore, ConfigStore, InfraStore, PreflightStore, StatusRecord, StatusTracking,
};
use crate::types::{ConfigValues, PreflightScope};
use crate::workflows::{upgrade_table, Mode, Target, UpgradeState};

use UpgradeState::*;

/// Drives an upgrade of an existing installation.
pub struct UpgradeController {
    options: ControllerOptions,
    engine: Arc<StateMachine<UpgradeState>>,
    schema: AppConfigSchema,
    steps: Steps,
    cancel: CancellationToken,
    config: Arc<ConfigStore>,
    airgap: Arc<AirgapStore>,
    infra: Arc<InfraStore>,
    app_preflights: Arc<PreflightStore>,
    app: Arc<AppStore>,
}

impl UpgradeController {
    pub fn new(
        options: ControllerOptions,
        schema: AppConfigSchema,
        steps: Steps,
        cancel: CancellationToken,
    ) -> Self {
        let table = upgrade_table(options.target, options.airgap);
        info!(
            target = %options.target,
            airgap = options.airgap,
            transitions = table.len(),
            "Creating upgrade controller"
        );
        Self {
            engine: Arc::new(StateMachine::new(New, table)),
            options,
            schema,
            steps,
            cancel,
            config: Arc::new(ConfigStore::new()),
            airgap: Arc::new(AirgapStore::new()),
            infra: Arc::new(InfraStore::new()),
            app_preflights: Arc::new(PreflightStore::new()),
            app: Arc::new(AppStore::new()),
        }
    }

    /// Start from the values of the running installation.
    pub fn with_current_values(self, values: ConfigValues) -> Self {
        self.config.set_result(Some(values));
        self
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    pub fn current_state(&self) -> UpgradeState {
        self.engine.current_state()
    }

    pub fn last_transition(&self) -> Option<TransitionRecord<UpgradeState>> {
        self.engine.last_transition()
    }

    pub fn is_busy(&self) -> bool {
        self.engine.is_lock_acquired()
    }

    fn unsupported(&self, action: &'static str) -> ControllerError {
        ControllerError::Unsupported {
            action,
            mode: Mode::Upgrade,
            target: self.options.target,
        }
    }

    pub fn app_config_values(&self) -> ConfigValues {
        self.schema
            .resolve(&self.config.result().unwrap_or_default())
    }

    pub fn app_config_schema(&self) -> &AppConfigSchema {
        &self.schema
    }

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

    pub fn upgrade_infra(&self) -> Result<StatusRecord, ControllerError> {
        if self.options.target != Target::Linux {
            return Err(self.unsupported("infrastructure upgrade"));
        }
        let states = OperationStates::new(
            InfrastructureUpgrading,
            InfrastructureUpgraded,
            InfrastructureUpgradeFailed,
        );
        let running = GuardedOperation::acquire(&self.engine, states)?.start()?;

        self.infra.clear();
        let infra = Arc::clone(&self.steps.infra);
        let store = Arc::clone(&self.infra);
        let cancel = self.cancel.child_token();

        Ok(spawn_step(
            running,
            Arc::clone(&self.infra),
            StepLabels {
                running: "Upgrading infrastructure",
                succeeded: "Infrastructure upgraded",
                failed: "Infrastructure upgrade failed",
            },
            move || async move { infra.upgrade(cancel, &store).await },
        ))
    }

    pub fn infra(&self) -> Arc<InfraStore> {
        Arc::clone(&self.infra)
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

    pub fn upgrade_app(&self, ignore_app_preflights: bool) -> Result<StatusRecord, ControllerError> {
        let bypass = check_bypass(
            &self.engine.current_state(),
            &AppPreflightsFailed,
            PreflightScope::App,
            ignore_app_preflights,
            self.options.allow_ignore_app_preflights,
        )?;
        let states = OperationStates::new(AppUpgrading, Succeeded, AppUpgradeFailed);
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
                running: "Upgrading application",
                succeeded: "Application upgraded",
                failed: "Application upgrade failed",
            },
            move || async move {
                let release = deployer.upgrade(cancel, &values, &store).await?;
                info!(app = %release.name, version = %release.version, "Application upgraded");
                store.set_release(Some(release));
                anyhow::Ok(())
            },
        ))
    }

    pub fn app(&self) -> Arc<AppStore> {
        Arc::clone(&self.app)
    }

    pub fn shutdown(&self) {
        info!(state = %self.current_state(), "Shutting down upgrade controller");
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{AppConfigItem, ItemKind};
    use crate::steps::{MockAirgapProcessor, MockAppDeployer, MockInfraManager, MockPreflightRunner};
    use crate::store::LogSink;
    use crate::store::Status;
    use crate::types::{AppRelease, PreflightOutput, PreflightRecord};
    use serde_json::json;
    use std::time::Duration;

    fn schema() -> AppConfigSchema {
        AppConfigSchema::new(vec![AppConfigItem {
            name: "replicas".to_string(),
            kind: ItemKind::Number,
            required: true,
            default: Some(json!(1)),
        }])
    }

    fn release(version: &str) -> AppRelease {
        AppRelease {
            name: "shop".to_string(),
            version: version.to_string(),
            deployed_at: chrono::Utc::now(),
        }
    }

    async fn wait_for(controller: &UpgradeController, state: UpgradeState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while controller.current_state() != state || controller.is_busy() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("stuck in {} waiting for {state}", controller.current_state()));
    }

    fn steps(
        preflights: MockPreflightRunner,
        infra: MockInfraManager,
        airgap: MockAirgapProcessor,
        app: MockAppDeployer,
    ) -> Steps {
        Steps {
            preflights: Arc::new(preflights),
            infra: Arc::new(infra),
            airgap: Arc::new(airgap),
            app: Arc::new(app),
        }
    }

    #[tokio::test]
    async fn test_airgap_linux_upgrade_reaches_succeeded() {
        let mut preflights = MockPreflightRunner::new();
        preflights.expect_titles().returning(|_| Vec::new());
        preflights
            .expect_run()
            .withf(|_, scope| *scope == PreflightScope::App)
            .returning(|_, _| Ok(PreflightOutput::default()));
        let mut infra = MockInfraManager::new();
        infra.expect_upgrade().times(1).returning(|_, _| Ok(()));
        let mut airgap = MockAirgapProcessor::new();
        airgap.expect_process().times(1).returning(|_, store| {
            store.add_log("loaded 12 images");
            Ok(())
        });
        let mut app = MockAppDeployer::new();
        app.expect_upgrade().times(1).returning(|_, values, _| {
            assert_eq!(values["replicas"], json!(3));
            Ok(release("2.0.0"))
        });

        let options = ControllerOptions {
            airgap: true,
            ..ControllerOptions::default()
        };
        let controller = UpgradeController::new(
            options,
            schema(),
            steps(preflights, infra, airgap, app),
            CancellationToken::new(),
        )
        .with_current_values(ConfigValues::from([("replicas".to_string(), json!(2))]));

        let values = controller
            .patch_app_config_values(ConfigValues::from([("replicas".to_string(), json!(3))]))
            .await
            .unwrap();
        assert_eq!(values["replicas"], json!(3));

        // infrastructure waits for the bundle
        assert!(controller.upgrade_infra().unwrap_err().is_conflict());

        controller.process_airgap().unwrap();
        wait_for(&controller, AirgapProcessed).await;
        assert!(controller.airgap().logs().contains("12 images"));

        controller.upgrade_infra().unwrap();
        wait_for(&controller, InfrastructureUpgraded).await;

        controller.run_app_preflights().unwrap();
        wait_for(&controller, AppPreflightsSucceeded).await;

        controller.upgrade_app(false).unwrap();
        wait_for(&controller, Succeeded).await;
        assert_eq!(controller.app().release().unwrap().version, "2.0.0");
        assert_eq!(controller.app().status().state, Status::Succeeded);
    }

    #[tokio::test]
    async fn test_kubernetes_upgrade_with_app_preflight_bypass() {
        let mut preflights = MockPreflightRunner::new();
        preflights.expect_titles().returning(|_| vec!["Ingress".to_string()]);
        preflights.expect_run().returning(|_, _| {
            Ok(PreflightOutput {
                fail: vec![PreflightRecord {
                    title: "Ingress".to_string(),
                    message: "no ingress class".to_string(),
                }],
                ..PreflightOutput::default()
            })
        });
        let mut app = MockAppDeployer::new();
        app.expect_upgrade()
            .times(1)
            .returning(|_, _, _| Ok(release("2.1.0")));

        let options = ControllerOptions {
            target: Target::Kubernetes,
            allow_ignore_app_preflights: true,
            ..ControllerOptions::default()
        };
        let controller = UpgradeController::new(
            options,
            schema(),
            steps(preflights, MockInfraManager::new(), MockAirgapProcessor::new(), app),
            CancellationToken::new(),
        );

        assert!(matches!(
            controller.upgrade_infra(),
            Err(ControllerError::Unsupported { .. })
        ));

        controller
            .patch_app_config_values(ConfigValues::new())
            .await
            .unwrap();
        controller.run_app_preflights().unwrap();
        wait_for(&controller, AppPreflightsFailed).await;
        assert_eq!(controller.app_preflights().titles(), vec!["Ingress"]);

        assert!(matches!(
            controller.upgrade_app(false),
            Err(ControllerError::BypassNotAllowed { .. })
        ));
        controller.upgrade_app(true).unwrap();
        wait_for(&controller, Succeeded).await;
    }

    #[tokio::test]
    async fn test_failed_app_upgrade_settles_in_failure_state() {
        let mut preflights = MockPreflightRunner::new();
        preflights.expect_titles().returning(|_| Vec::new());
        preflights
            .expect_run()
            .returning(|_, _| Ok(PreflightOutput::default()));
        let mut app = MockAppDeployer::new();
        app.expect_upgrade()
            .returning(|_, _, _| Err(anyhow::anyhow!("helm release is locked")));

        let options = ControllerOptions {
            target: Target::Kubernetes,
            ..ControllerOptions::default()
        };
        let controller = UpgradeController::new(
            options,
            schema(),
            steps(preflights, MockInfraManager::new(), MockAirgapProcessor::new(), app),
            CancellationToken::new(),
        );
        controller
            .patch_app_config_values(ConfigValues::new())
            .await
            .unwrap();
        controller.run_app_preflights().unwrap();
        wait_for(&controller, AppPreflightsSucceeded).await;

        controller.upgrade_app(false).unwrap();
        wait_for(&controller, AppUpgradeFailed).await;
        let status = controller.app().status();
        assert_eq!(status.state, Status::Failed);
        assert!(status.description.contains("helm release is locked"));
        assert!(controller.app().release().is_none());
    }
}
