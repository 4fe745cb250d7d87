// Workflow definitions: state enums and the transition tables of the
// install and upgrade workflows for each deployment target

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::statemachine::{State, TransitionTable};

/// Declare a workflow state enum with `Display`, serde and an `ALL` listing.
macro_rules! workflow_states {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$variant_meta:meta])* $variant:ident),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
        )]
        $vis enum $name {
            $($(#[$variant_meta])* $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub mod install;
pub mod upgrade;

pub use install::{install_table, InstallState};
pub use upgrade::{upgrade_table, UpgradeState};

/// Where the application is being installed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Bare Linux hosts: the installer also provisions the cluster
    #[default]
    Linux,
    /// An existing Kubernetes cluster
    Kubernetes,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Linux => write!(f, "linux"),
            Target::Kubernetes => write!(f, "kubernetes"),
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(Target::Linux),
            "kubernetes" | "k8s" => Ok(Target::Kubernetes),
            other => Err(format!("unknown target {other:?}, expected linux or kubernetes")),
        }
    }
}

/// Which lifecycle workflow a controller runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Install,
    Upgrade,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Install => write!(f, "install"),
            Mode::Upgrade => write!(f, "upgrade"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "install" => Ok(Mode::Install),
            "upgrade" => Ok(Mode::Upgrade),
            other => Err(format!("unknown mode {other:?}, expected install or upgrade")),
        }
    }
}

/// Render a table as `Target <- Predecessor, ...` lines in `order`.
///
/// States listed in `order` without a table entry are skipped.
pub fn describe_table<S: State + Ord>(table: &TransitionTable<S>, order: &[S]) -> String {
    let mut lines = Vec::new();
    for target in order {
        let Some(predecessors) = table.predecessors(target) else {
            continue;
        };
        let mut from: Vec<&S> = predecessors.iter().collect();
        from.sort();
        let from: Vec<String> = from.iter().map(ToString::to_string).collect();
        lines.push(format!("{target} <- {}", from.join(", ")));
    }
    lines.join("\n")
}
