// Step collaborators backed by configured shell commands

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AirgapProcessor, AppDeployer, InfraManager, PreflightRunner};
use crate::config::StepsConfig;
use crate::store::{AirgapStore, AppStore, InfraStore, LogSink, StatusRecord};
use crate::types::{
    AppRelease, ConfigValues, InstallationConfig, PreflightOutput, PreflightRecord, PreflightScope,
};

const ENV_CONFIG_VALUES: &str = "CLUSTER_INSTALLER_CONFIG_VALUES";
const ENV_INSTALLATION: &str = "CLUSTER_INSTALLER_INSTALLATION";
const ENV_PREFLIGHT_SCOPE: &str = "CLUSTER_INSTALLER_PREFLIGHT_SCOPE";

/// What a finished command left behind
#[derive(Debug)]
struct CommandOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

/// Runs every workflow step as `<shell> -c <command>`.
///
/// Output lines are copied into the step's store while the command runs.
/// Cancelling the token kills the command.
#[derive(Debug, Clone)]
pub struct CommandSteps {
    config: StepsConfig,
}

impl CommandSteps {
    pub fn new(config: StepsConfig) -> Self {
        Self { config }
    }

    async fn run_command(
        &self,
        step: &str,
        command: &str,
        env: &[(&str, String)],
        cancel: &CancellationToken,
        sink: Option<&dyn LogSink>,
    ) -> Result<CommandOutput> {
        info!(step = step, command = command, "Running step command");

        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to start {step} command"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("{step} command has no stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("{step} command has no stderr"))?;

        let collect = async {
            let (captured_out, captured_err) =
                tokio::try_join!(drain_lines(stdout, sink), drain_lines(stderr, sink))?;
            let status = child.wait().await?;
            Ok::<_, anyhow::Error>(CommandOutput {
                status,
                stdout: captured_out,
                stderr: captured_err,
            })
        };

        let finished = tokio::select! {
            output = collect => Some(output),
            _ = cancel.cancelled() => None,
        };

        match finished {
            Some(output) => {
                let output = output.with_context(|| format!("Failed to run {step} command"))?;
                debug!(step = step, status = %output.status, "Step command exited");
                Ok(output)
            }
            None => {
                warn!(step = step, "Step cancelled, killing command");
                if let Err(err) = child.kill().await {
                    warn!(step = step, error = %err, "Failed to kill step command");
                }
                bail!("{step} was cancelled")
            }
        }
    }

    /// Run a step that only needs to succeed.
    async fn run_step(
        &self,
        step: &str,
        command: Option<&String>,
        env: &[(&str, String)],
        cancel: &CancellationToken,
        sink: &dyn LogSink,
    ) -> Result<()> {
        let Some(command) = command else {
            info!(step = step, "No command configured, skipping step");
            sink.add_log(&format!("No command configured for {step}, skipping"));
            return Ok(());
        };

        let output = self.run_command(step, command, env, cancel, Some(sink)).await?;
        if !output.status.success() {
            bail!("{step} command failed with {}", output.status);
        }
        Ok(())
    }

    fn preflight_command(&self, scope: PreflightScope) -> Option<&String> {
        match scope {
            PreflightScope::Host => self.config.host_preflights.as_ref(),
            PreflightScope::App => self.config.app_preflights.as_ref(),
        }
    }

    fn preflight_title(scope: PreflightScope) -> String {
        match scope {
            PreflightScope::Host => "Host preflight checks".to_string(),
            PreflightScope::App => "Application preflight checks".to_string(),
        }
    }

    fn release(&self) -> AppRelease {
        AppRelease {
            name: self.config.app_name.clone(),
            version: self.config.app_version.clone(),
            deployed_at: Utc::now(),
        }
    }

    async fn run_infra(
        &self,
        step: &str,
        command: Option<&String>,
        env: &[(&str, String)],
        cancel: CancellationToken,
        store: &InfraStore,
    ) -> Result<()> {
        let components: Vec<&str> = self
            .config
            .infra_components
            .iter()
            .map(String::as_str)
            .collect();
        store.register_components(&components);
        for name in &components {
            store.set_component_status(name, StatusRecord::running(step));
        }

        let result = self.run_step(step, command, env, &cancel, store).await;
        for name in &components {
            let status = match &result {
                Ok(()) => StatusRecord::succeeded(step),
                Err(err) => StatusRecord::failed(err.to_string()),
            };
            store.set_component_status(name, status);
        }
        result
    }
}

/// Copy `reader` into `sink` line by line and return everything read.
///
/// Bytes that are not valid UTF-8 are replaced rather than failing the step.
async fn drain_lines<R>(reader: R, sink: Option<&dyn LogSink>) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut captured = String::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(captured);
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(['\n', '\r']);
        if let Some(sink) = sink {
            sink.add_log(line);
        }
        captured.push_str(line);
        captured.push('\n');
    }
}

/// Read the checks reported by a preflight command.
///
/// JSON on stdout wins; otherwise the exit code decides between a single
/// passing or failing check.
fn parse_preflight_output(title: String, output: &CommandOutput) -> PreflightOutput {
    if let Ok(parsed) = serde_json::from_str::<PreflightOutput>(output.stdout.trim()) {
        return parsed;
    }

    if output.status.success() {
        PreflightOutput {
            pass: vec![PreflightRecord {
                title,
                message: "Checks passed".to_string(),
            }],
            ..PreflightOutput::default()
        }
    } else {
        let detail = output
            .stdout
            .lines()
            .chain(output.stderr.lines())
            .rfind(|line| !line.trim().is_empty())
            .unwrap_or("no output")
            .to_string();
        PreflightOutput {
            fail: vec![PreflightRecord {
                title,
                message: format!("Checks failed with {}: {detail}", output.status),
            }],
            ..PreflightOutput::default()
        }
    }
}

#[async_trait]
impl PreflightRunner for CommandSteps {
    fn titles(&self, scope: PreflightScope) -> Vec<String> {
        match self.preflight_command(scope) {
            Some(_) => vec![Self::preflight_title(scope)],
            None => Vec::new(),
        }
    }

    async fn run(&self, cancel: CancellationToken, scope: PreflightScope) -> Result<PreflightOutput> {
        let step = format!("{scope} preflights");
        let Some(command) = self.preflight_command(scope) else {
            info!(step = %step, "No command configured, skipping step");
            return Ok(PreflightOutput::default());
        };

        let env = [(ENV_PREFLIGHT_SCOPE, scope.to_string())];
        let output = self.run_command(&step, command, &env, &cancel, None).await?;
        Ok(parse_preflight_output(Self::preflight_title(scope), &output))
    }
}

#[async_trait]
impl InfraManager for CommandSteps {
    async fn install(
        &self,
        cancel: CancellationToken,
        config: &InstallationConfig,
        store: &InfraStore,
    ) -> Result<()> {
        let env = [(ENV_INSTALLATION, serde_json::to_string(config)?)];
        self.run_infra(
            "infrastructure install",
            self.config.infra_install.as_ref(),
            &env,
            cancel,
            store,
        )
        .await
    }

    async fn upgrade(&self, cancel: CancellationToken, store: &InfraStore) -> Result<()> {
        self.run_infra(
            "infrastructure upgrade",
            self.config.infra_upgrade.as_ref(),
            &[],
            cancel,
            store,
        )
        .await
    }
}

#[async_trait]
impl AirgapProcessor for CommandSteps {
    async fn process(&self, cancel: CancellationToken, store: &AirgapStore) -> Result<()> {
        self.run_step(
            "airgap processing",
            self.config.airgap_process.as_ref(),
            &[],
            &cancel,
            store,
        )
        .await
    }
}

#[async_trait]
impl AppDeployer for CommandSteps {
    async fn install(
        &self,
        cancel: CancellationToken,
        values: &ConfigValues,
        store: &AppStore,
    ) -> Result<AppRelease> {
        let env = [(ENV_CONFIG_VALUES, serde_json::to_string(values)?)];
        self.run_step(
            "app install",
            self.config.app_install.as_ref(),
            &env,
            &cancel,
            store,
        )
        .await?;
        Ok(self.release())
    }

    async fn upgrade(
        &self,
        cancel: CancellationToken,
        values: &ConfigValues,
        store: &AppStore,
    ) -> Result<AppRelease> {
        let env = [(ENV_CONFIG_VALUES, serde_json::to_string(values)?)];
        self.run_step(
            "app upgrade",
            self.config.app_upgrade.as_ref(),
            &env,
            &cancel,
            store,
        )
        .await?;
        Ok(self.release())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Status;
    use std::time::Duration;

    fn steps(config: StepsConfig) -> CommandSteps {
        CommandSteps::new(config)
    }

    #[tokio::test]
    async fn test_unconfigured_step_is_skipped() {
        let steps = steps(StepsConfig::default());
        let store = AirgapStore::new();
        steps
            .process(CancellationToken::new(), &store)
            .await
            .unwrap();
        assert!(store.logs().contains("skipping"));

        let output = PreflightRunner::run(&steps, CancellationToken::new(), PreflightScope::Host)
            .await
            .unwrap();
        assert_eq!(output, PreflightOutput::default());
        assert!(steps.titles(PreflightScope::Host).is_empty());
    }

    #[tokio::test]
    async fn test_command_output_is_logged() {
        let steps = steps(StepsConfig {
            app_install: Some("echo deploying; echo warning >&2".to_string()),
            app_name: "shop".to_string(),
            app_version: "1.2.3".to_string(),
            ..StepsConfig::default()
        });
        let store = AppStore::new();
        let release = AppDeployer::install(&steps, CancellationToken::new(), &ConfigValues::new(), &store)
            .await
            .unwrap();
        assert_eq!(release.name, "shop");
        assert_eq!(release.version, "1.2.3");
        let logs = store.logs();
        assert!(logs.contains("deploying"));
        assert!(logs.contains("warning"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_does_not_fail_step() {
        let steps = steps(StepsConfig {
            airgap_process: Some("printf 'loading \\377 image\\n'; echo done; exit 0".to_string()),
            ..StepsConfig::default()
        });
        let store = AirgapStore::new();
        steps
            .process(CancellationToken::new(), &store)
            .await
            .unwrap();

        let logs = store.logs();
        assert!(logs.contains("loading \u{FFFD} image"));
        assert!(logs.contains("done"));
    }

    #[tokio::test]
    async fn test_config_values_are_passed_to_command() {
        let steps = steps(StepsConfig {
            app_install: Some(format!("echo \"${ENV_CONFIG_VALUES}\"")),
            ..StepsConfig::default()
        });
        let store = AppStore::new();
        let values = ConfigValues::from([("replicas".to_string(), serde_json::json!(3))]);
        AppDeployer::install(&steps, CancellationToken::new(), &values, &store)
            .await
            .unwrap();
        assert!(store.logs().contains(r#"{"replicas":3}"#));
    }

    #[tokio::test]
    async fn test_failing_infra_marks_components_failed() {
        let steps = steps(StepsConfig {
            infra_install: Some("exit 3".to_string()),
            infra_components: vec!["runtime".to_string()],
            ..StepsConfig::default()
        });
        let store = InfraStore::new();
        let err = InfraManager::install(
            &steps,
            CancellationToken::new(),
            &InstallationConfig::default(),
            &store,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("infrastructure install command failed"));
        assert_eq!(store.components()[0].status.state, Status::Failed);
    }

    #[tokio::test]
    async fn test_preflight_json_output_is_parsed() {
        let steps = steps(StepsConfig {
            host_preflights: Some(
                r#"echo '{"pass":[{"title":"Memory","message":"ok"}],"fail":[{"title":"Disk","message":"full"}]}'"#
                    .to_string(),
            ),
            ..StepsConfig::default()
        });
        let output = PreflightRunner::run(&steps, CancellationToken::new(), PreflightScope::Host)
            .await
            .unwrap();
        assert_eq!(output.titles(), vec!["Memory", "Disk"]);
        assert!(output.has_failures());
    }

    #[tokio::test]
    async fn test_preflight_exit_code_maps_to_checks() {
        let steps = steps(StepsConfig {
            app_preflights: Some("echo 'port 443 in use' >&2; exit 1".to_string()),
            ..StepsConfig::default()
        });
        let output = PreflightRunner::run(&steps, CancellationToken::new(), PreflightScope::App)
            .await
            .unwrap();
        assert_eq!(output.fail.len(), 1);
        assert!(output.fail[0].message.contains("port 443 in use"));
        assert_eq!(steps.titles(PreflightScope::App), vec!["Application preflight checks"]);
    }

    #[tokio::test]
    async fn test_cancellation_kills_command() {
        let steps = steps(StepsConfig {
            airgap_process: Some("sleep 30".to_string()),
            ..StepsConfig::default()
        });
        let store = AirgapStore::new();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = steps.process(cancel, &store).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
