// Configuration layering: defaults, then the config file, then environment

use cluster_installer::config::InstallerConfig;
use cluster_installer::controller::ItemKind;
use cluster_installer::workflows::{Mode, Target};
use serde_json::json;
use std::fs;
use tempfile::TempDir;

const LINUX_AIRGAP: &str = r#"
[server]
bind = "0.0.0.0:31000"

[workflow]
mode = "install"
target = "linux"
airgap = true
allow_ignore_host_preflights = true

[steps]
host_preflights = "./checks.sh host"
infra_install = "./infra.sh install"
infra_components = ["runtime", "storage", "registry"]
app_name = "shop"
app_version = "1.4.2"

[[app_config.items]]
name = "hostname"
required = true

[[app_config.items]]
name = "replicas"
kind = "number"
default = 2
"#;

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("cluster-installer.toml");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_file_values_override_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, LINUX_AIRGAP);

    let config = InstallerConfig::load_with_env(Some(&path), Some(config::Map::new())).unwrap();

    assert_eq!(config.bind_addr().unwrap().port(), 31000);
    assert_eq!(config.workflow.mode, Mode::Install);
    assert!(config.workflow.airgap);
    assert!(config.workflow.allow_ignore_host_preflights);
    assert!(!config.workflow.allow_ignore_app_preflights);
    assert_eq!(config.steps.infra_components, vec!["runtime", "storage", "registry"]);
    assert_eq!(config.steps.app_version, "1.4.2");
    // untouched sections keep their defaults
    assert_eq!(config.steps.shell, "sh");
    assert_eq!(config.observability.log_level, "info");

    let items = &config.app_config.items;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].kind, ItemKind::Text);
    assert!(items[0].required);
    assert_eq!(items[1].kind, ItemKind::Number);
    assert_eq!(items[1].default, Some(json!(2)));
}

#[test]
fn test_environment_overrides_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, LINUX_AIRGAP);
    let env = config::Map::from([
        ("CLUSTER_INSTALLER_SERVER__BIND".to_string(), "127.0.0.1:32000".to_string()),
        ("CLUSTER_INSTALLER_OBSERVABILITY__JSON".to_string(), "true".to_string()),
        (
            "CLUSTER_INSTALLER_STEPS__INFRA_COMPONENTS".to_string(),
            "runtime,network".to_string(),
        ),
    ]);

    let config = InstallerConfig::load_with_env(Some(&path), Some(env)).unwrap();

    assert_eq!(config.server.bind, "127.0.0.1:32000");
    assert!(config.observability.json);
    assert_eq!(config.steps.infra_components, vec!["runtime", "network"]);
    assert_eq!(config.steps.app_name, "shop");
}

#[test]
fn test_airgap_kubernetes_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "[workflow]\ntarget = \"kubernetes\"\nairgap = true\n",
    );

    let err = InstallerConfig::load_with_env(Some(&path), Some(config::Map::new())).unwrap_err();
    assert!(format!("{err:#}").contains("airgap"));
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    assert!(InstallerConfig::load_with_env(Some(&path), Some(config::Map::new())).is_err());
}

#[test]
fn test_saved_config_loads_back() {
    let dir = TempDir::new().unwrap();
    let mut original = InstallerConfig::default();
    original.workflow.mode = Mode::Upgrade;
    original.workflow.target = Target::Kubernetes;
    original.steps.app_upgrade = Some("helm upgrade shop ./chart".to_string());

    let path = dir.path().join("saved.toml");
    original.save_to_file(&path).unwrap();
    let loaded = InstallerConfig::load_with_env(Some(&path), Some(config::Map::new())).unwrap();

    assert_eq!(loaded.workflow.mode, Mode::Upgrade);
    assert_eq!(loaded.workflow.target, Target::Kubernetes);
    assert_eq!(loaded.steps.app_upgrade.as_deref(), Some("helm upgrade shop ./chart"));
}
