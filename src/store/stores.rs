// Stores for the sub-workflows that carry more than a single result

use super::{Field, StatusRecord, StatusTracking};
use crate::types::{AppRelease, ComponentStatus, PreflightOutput};

/// Keep roughly this much log output per store
const MAX_LOG_BYTES: usize = 64 * 1024;

/// Destination for progress output written by long running steps.
pub trait LogSink: Send + Sync {
    fn add_log(&self, line: &str);
}

#[derive(Debug, Default)]
struct LogBuffer {
    text: Field<String>,
}

impl LogBuffer {
    fn append(&self, line: &str) {
        self.text.update(|text| {
            text.push_str(line.trim_end_matches('\n'));
            text.push('\n');
            if text.len() > MAX_LOG_BYTES {
                let mut cut = text.len() - MAX_LOG_BYTES;
                while !text.is_char_boundary(cut) {
                    cut += 1;
                }
                text.drain(..cut);
            }
        });
    }

    fn get(&self) -> String {
        self.text.get()
    }

    fn clear(&self) {
        self.text.set(String::new());
    }
}

/// Host or app preflight results
#[derive(Debug, Default)]
pub struct PreflightStore {
    status: Field<StatusRecord>,
    titles: Field<Vec<String>>,
    output: Field<Option<PreflightOutput>>,
}

impl PreflightStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn titles(&self) -> Vec<String> {
        self.titles.get()
    }

    pub fn set_titles(&self, titles: Vec<String>) {
        self.titles.set(titles);
    }

    pub fn output(&self) -> Option<PreflightOutput> {
        self.output.get()
    }

    pub fn set_output(&self, output: Option<PreflightOutput>) {
        self.output.set(output);
    }

    pub fn clear(&self) {
        self.status.set(StatusRecord::default());
        self.titles.set(Vec::new());
        self.output.set(None);
    }
}

impl StatusTracking for PreflightStore {
    fn status_field(&self) -> &Field<StatusRecord> {
        &self.status
    }
}

/// Infrastructure install or upgrade progress
#[derive(Debug, Default)]
pub struct InfraStore {
    status: Field<StatusRecord>,
    components: Field<Vec<ComponentStatus>>,
    logs: LogBuffer,
}

impl InfraStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the components in the order they will be processed.
    pub fn register_components(&self, names: &[&str]) {
        self.components.set(
            names
                .iter()
                .map(|name| ComponentStatus {
                    name: (*name).to_string(),
                    status: StatusRecord::pending(""),
                })
                .collect(),
        );
    }

    /// Update one component, adding it when it was not registered.
    pub fn set_component_status(&self, name: &str, status: StatusRecord) {
        self.components.update(|components| {
            match components.iter_mut().find(|c| c.name == name) {
                Some(component) => component.status = status,
                None => components.push(ComponentStatus {
                    name: name.to_string(),
                    status,
                }),
            }
        });
    }

    pub fn components(&self) -> Vec<ComponentStatus> {
        self.components.get()
    }

    pub fn logs(&self) -> String {
        self.logs.get()
    }

    pub fn clear(&self) {
        self.status.set(StatusRecord::default());
        self.components.set(Vec::new());
        self.logs.clear();
    }
}

impl StatusTracking for InfraStore {
    fn status_field(&self) -> &Field<StatusRecord> {
        &self.status
    }
}

impl LogSink for InfraStore {
    fn add_log(&self, line: &str) {
        self.logs.append(line);
    }
}

/// Airgap bundle processing progress
#[derive(Debug, Default)]
pub struct AirgapStore {
    status: Field<StatusRecord>,
    logs: LogBuffer,
}

impl AirgapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs(&self) -> String {
        self.logs.get()
    }

    pub fn clear(&self) {
        self.status.set(StatusRecord::default());
        self.logs.clear();
    }
}

impl StatusTracking for AirgapStore {
    fn status_field(&self) -> &Field<StatusRecord> {
        &self.status
    }
}

impl LogSink for AirgapStore {
    fn add_log(&self, line: &str) {
        self.logs.append(line);
    }
}

/// App install or upgrade progress and the resulting release
#[derive(Debug, Default)]
pub struct AppStore {
    status: Field<StatusRecord>,
    release: Field<Option<AppRelease>>,
    logs: LogBuffer,
}

impl AppStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self) -> Option<AppRelease> {
        self.release.get()
    }

    pub fn set_release(&self, release: Option<AppRelease>) {
        self.release.set(release);
    }

    pub fn logs(&self) -> String {
        self.logs.get()
    }

    pub fn clear(&self) {
        self.status.set(StatusRecord::default());
        self.release.set(None);
        self.logs.clear();
    }
}

impl StatusTracking for AppStore {
    fn status_field(&self) -> &Field<StatusRecord> {
        &self.status
    }
}

impl LogSink for AppStore {
    fn add_log(&self, line: &str) {
        self.logs.append(line);
    }
}
