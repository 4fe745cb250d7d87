use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::controller::AppConfigSchema;
use crate::workflows::{Mode, Target};

/// Config file looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "cluster-installer.toml";

/// Prefix of environment variable overrides, e.g.
/// `CLUSTER_INSTALLER_WORKFLOW__TARGET=kubernetes`
pub const ENV_PREFIX: &str = "CLUSTER_INSTALLER";

/// Main configuration structure for the installer
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InstallerConfig {
    /// HTTP API settings
    pub server: ServerConfig,
    /// Which workflow runs and what it may skip
    pub workflow: WorkflowConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
    /// Commands backing each workflow step
    pub steps: StepsConfig,
    /// Application config items accepted by the config endpoints
    #[serde(default)]
    pub app_config: AppConfigSchema,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address the API listens on
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:30080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WorkflowConfig {
    pub mode: Mode,
    pub target: Target,
    /// Installing from an airgap bundle (Linux only)
    pub airgap: bool,
    /// Allow infrastructure setup to proceed past failed host preflights
    pub allow_ignore_host_preflights: bool,
    /// Allow the app install or upgrade to proceed past failed app preflights
    pub allow_ignore_app_preflights: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level, overridden by `RUST_LOG`
    pub log_level: String,
    /// Emit JSON log lines instead of human readable ones
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

/// Shell commands run for each step. Unset steps are skipped.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepsConfig {
    /// Shell used to run commands as `<shell> -c <command>`
    pub shell: String,
    pub working_dir: Option<PathBuf>,
    pub host_preflights: Option<String>,
    pub app_preflights: Option<String>,
    pub infra_install: Option<String>,
    pub infra_upgrade: Option<String>,
    pub airgap_process: Option<String>,
    pub app_install: Option<String>,
    pub app_upgrade: Option<String>,
    /// Infrastructure components reported while infra commands run
    pub infra_components: Vec<String>,
    pub app_name: String,
    pub app_version: String,
}

impl Default for StepsConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            working_dir: None,
            host_preflights: None,
            app_preflights: None,
            infra_install: None,
            infra_upgrade: None,
            airgap_process: None,
            app_install: None,
            app_upgrade: None,
            infra_components: vec!["runtime".to_string(), "storage".to_string()],
            app_name: "app".to_string(),
            app_version: "0.0.0".to_string(),
        }
    }
}

impl InstallerConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. The config file at `path`, or `cluster-installer.toml` if present
    /// 3. Environment variables (prefixed with CLUSTER_INSTALLER_)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`InstallerConfig::load`], reading overrides from `env` instead of
    /// the process environment when given.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let defaults = Config::try_from(&Self::default())?;
        let mut builder = Config::builder().add_source(defaults);

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).required(true));
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                builder = builder.add_source(File::with_name(DEFAULT_CONFIG_FILE));
            }
            None => {}
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("steps.infra_components")
                .source(env),
        );

        let config = builder
            .build()
            .context("Failed to read installer configuration")?;
        let installer_config: InstallerConfig = config
            .try_deserialize()
            .context("Invalid installer configuration")?;
        installer_config.validate()?;

        tracing::debug!(
            mode = %installer_config.workflow.mode,
            target = %installer_config.workflow.target,
            airgap = installer_config.workflow.airgap,
            "Configuration loaded"
        );
        Ok(installer_config)
    }

    /// Reject combinations the workflows cannot run.
    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;

        if self.workflow.airgap && self.workflow.target == Target::Kubernetes {
            bail!("airgap installations are only supported on linux targets");
        }

        let mut names = HashSet::new();
        for item in &self.app_config.items {
            if item.name.is_empty() {
                bail!("app config items must have a name");
            }
            if !names.insert(item.name.as_str()) {
                bail!("duplicate app config item {:?}", item.name);
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address {:?}", self.server.bind))
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}
