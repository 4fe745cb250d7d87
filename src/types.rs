// Payload types shared by the stores, the step collaborators and the API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use thiserror::Error;

/// Application config values keyed by item name
pub type ConfigValues = BTreeMap<String, serde_json::Value>;

/// One rejected field of a submitted configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed: {}", join_errors(.errors))]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    /// `Ok(())` when no field was rejected
    pub fn check(errors: Vec<FieldError>) -> Result<(), ValidationError> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { errors })
        }
    }
}

/// Which set of preflight checks to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreflightScope {
    Host,
    App,
}

impl fmt::Display for PreflightScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreflightScope::Host => write!(f, "host"),
            PreflightScope::App => write!(f, "app"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightRecord {
    pub title: String,
    pub message: String,
}

/// Results of one preflight run, grouped by outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightOutput {
    #[serde(default)]
    pub pass: Vec<PreflightRecord>,
    #[serde(default)]
    pub warn: Vec<PreflightRecord>,
    #[serde(default)]
    pub fail: Vec<PreflightRecord>,
}

impl PreflightOutput {
    pub fn has_failures(&self) -> bool {
        !self.fail.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warn.is_empty()
    }

    pub fn titles(&self) -> Vec<String> {
        self.pass
            .iter()
            .chain(&self.warn)
            .chain(&self.fail)
            .map(|record| record.title.clone())
            .collect()
    }
}

/// Host-level settings for a Linux installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationConfig {
    pub data_directory: PathBuf,
    pub admin_console_port: u16,
    #[serde(default)]
    pub pod_cidr: Option<String>,
    #[serde(default)]
    pub service_cidr: Option<String>,
    #[serde(default)]
    pub http_proxy: Option<String>,
    #[serde(default)]
    pub https_proxy: Option<String>,
    #[serde(default)]
    pub no_proxy: Option<String>,
}

impl Default for InstallationConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("/var/lib/cluster-installer"),
            admin_console_port: 30000,
            pod_cidr: Some("10.244.0.0/16".to_string()),
            service_cidr: Some("10.96.0.0/12".to_string()),
            http_proxy: None,
            https_proxy: None,
            no_proxy: None,
        }
    }
}

impl InstallationConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        if !self.data_directory.is_absolute() {
            errors.push(FieldError::new("dataDirectory", "must be an absolute path"));
        }
        if self.admin_console_port == 0 {
            errors.push(FieldError::new("adminConsolePort", "must be greater than 0"));
        }
        for (field, cidr) in [("podCidr", &self.pod_cidr), ("serviceCidr", &self.service_cidr)] {
            if let Some(cidr) = cidr {
                if let Err(message) = parse_ipv4_cidr(cidr) {
                    errors.push(FieldError::new(field, message));
                }
            }
        }
        if let (Some(pod), Some(service)) = (&self.pod_cidr, &self.service_cidr) {
            if let (Ok(pod), Ok(service)) = (parse_ipv4_cidr(pod), parse_ipv4_cidr(service)) {
                if cidrs_overlap(pod, service) {
                    errors.push(FieldError::new("serviceCidr", "overlaps with podCidr"));
                }
            }
        }

        ValidationError::check(errors)
    }
}

fn parse_ipv4_cidr(cidr: &str) -> Result<(Ipv4Addr, u8), String> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| format!("{cidr:?} is not in address/prefix form"))?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| format!("{addr:?} is not an IPv4 address"))?;
    let prefix: u8 = prefix
        .parse()
        .ok()
        .filter(|p| *p <= 32)
        .ok_or_else(|| format!("{prefix:?} is not a prefix length between 0 and 32"))?;
    Ok((addr, prefix))
}

fn cidrs_overlap(a: (Ipv4Addr, u8), b: (Ipv4Addr, u8)) -> bool {
    let prefix = a.1.min(b.1);
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    };
    (u32::from(a.0) & mask) == (u32::from(b.0) & mask)
}

/// Lifecycle status of one infrastructure component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub name: String,
    pub status: crate::store::StatusRecord,
}

/// What was deployed by an app install or upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRelease {
    pub name: String,
    pub version: String,
    pub deployed_at: DateTime<Utc>,
}
