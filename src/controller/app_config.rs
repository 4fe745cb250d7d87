// Application config schema and value validation

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ConfigValues, FieldError, ValidationError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[default]
    Text,
    Bool,
    Number,
}

impl ItemKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            ItemKind::Text => value.is_string(),
            ItemKind::Bool => value.is_boolean(),
            ItemKind::Number => value.is_number(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            ItemKind::Text => "text",
            ItemKind::Bool => "a boolean",
            ItemKind::Number => "a number",
        }
    }
}

/// One configurable application setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfigItem {
    pub name: String,
    #[serde(default)]
    pub kind: ItemKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

/// The settings an application accepts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfigSchema {
    #[serde(default)]
    pub items: Vec<AppConfigItem>,
}

impl AppConfigSchema {
    pub fn new(items: Vec<AppConfigItem>) -> Self {
        Self { items }
    }

    fn item(&self, name: &str) -> Option<&AppConfigItem> {
        self.items.iter().find(|item| item.name == name)
    }

    /// Apply `patch` onto `current`. A `null` in the patch removes the value.
    pub fn merge(current: &ConfigValues, patch: ConfigValues) -> ConfigValues {
        let mut merged = current.clone();
        for (name, value) in patch {
            if value.is_null() {
                merged.remove(&name);
            } else {
                merged.insert(name, value);
            }
        }
        merged
    }

    /// Defaults overlaid with `values`.
    pub fn resolve(&self, values: &ConfigValues) -> ConfigValues {
        let mut resolved: ConfigValues = self
            .items
            .iter()
            .filter_map(|item| Some((item.name.clone(), item.default.clone()?)))
            .collect();
        resolved.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        resolved
    }

    pub fn validate(&self, values: &ConfigValues) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        for (name, value) in values {
            match self.item(name) {
                None => errors.push(FieldError::new(name, "is not a known config item")),
                Some(item) if !item.kind.accepts(value) => errors.push(FieldError::new(
                    name,
                    format!("must be {}", item.kind.name()),
                )),
                Some(_) => {}
            }
        }

        for item in self.items.iter().filter(|item| item.required) {
            let missing = match values.get(&item.name).or(item.default.as_ref()) {
                None => true,
                Some(Value::String(text)) => text.trim().is_empty(),
                Some(_) => false,
            };
            if missing {
                errors.push(FieldError::new(&item.name, "is required"));
            }
        }

        ValidationError::check(errors)
    }
}
