// Upgrade workflow states and transition tables

use super::Target;
use crate::statemachine::TransitionTable;

workflow_states! {
    /// States of an upgrade of an existing installation.
    pub enum UpgradeState {
        New,
        ApplicationConfiguring,
        ApplicationConfigured,
        ApplicationConfigurationFailed,
        AirgapProcessing,
        AirgapProcessed,
        AirgapProcessingFailed,
        InfrastructureUpgrading,
        InfrastructureUpgraded,
        InfrastructureUpgradeFailed,
        AppPreflightsRunning,
        AppPreflightsSucceeded,
        AppPreflightsFailed,
        AppPreflightsExecutionFailed,
        AppPreflightsFailedBypassed,
        AppUpgrading,
        Succeeded,
        AppUpgradeFailed,
    }
}

/// Transition table of the upgrade workflow for `target`.
pub fn upgrade_table(target: Target, airgap: bool) -> TransitionTable<UpgradeState> {
    match target {
        Target::Linux => linux_table(airgap),
        Target::Kubernetes => kubernetes_table(),
    }
}

fn linux_table(airgap: bool) -> TransitionTable<UpgradeState> {
    use UpgradeState::*;

    let mut reconfigurable = vec![New, ApplicationConfigured, ApplicationConfigurationFailed];
    if airgap {
        reconfigurable.extend([AirgapProcessed, AirgapProcessingFailed]);
    }

    let mut entries = vec![
        (ApplicationConfiguring, reconfigurable),
        (ApplicationConfigured, vec![ApplicationConfiguring]),
        (ApplicationConfigurationFailed, vec![ApplicationConfiguring]),
    ];

    let infra_entry = if airgap {
        entries.extend([
            (AirgapProcessing, vec![ApplicationConfigured, AirgapProcessingFailed]),
            (AirgapProcessed, vec![AirgapProcessing]),
            (AirgapProcessingFailed, vec![AirgapProcessing]),
        ]);
        AirgapProcessed
    } else {
        ApplicationConfigured
    };

    entries.extend([
        (InfrastructureUpgrading, vec![infra_entry]),
        (InfrastructureUpgraded, vec![InfrastructureUpgrading]),
        (InfrastructureUpgradeFailed, vec![InfrastructureUpgrading]),
    ]);
    entries.extend(app_entries(vec![InfrastructureUpgraded]));
    TransitionTable::new(entries)
}

fn kubernetes_table() -> TransitionTable<UpgradeState> {
    use UpgradeState::*;

    let mut entries = vec![
        (
            ApplicationConfiguring,
            vec![
                New,
                ApplicationConfigured,
                ApplicationConfigurationFailed,
                AppPreflightsSucceeded,
                AppPreflightsFailed,
                AppPreflightsExecutionFailed,
            ],
        ),
        (ApplicationConfigured, vec![ApplicationConfiguring]),
        (ApplicationConfigurationFailed, vec![ApplicationConfiguring]),
    ];
    entries.extend(app_entries(vec![ApplicationConfigured]));
    TransitionTable::new(entries)
}

fn app_entries(entry: Vec<UpgradeState>) -> Vec<(UpgradeState, Vec<UpgradeState>)> {
    use UpgradeState::*;

    let mut preflight_from = entry;
    preflight_from.extend([
        AppPreflightsSucceeded,
        AppPreflightsFailed,
        AppPreflightsExecutionFailed,
    ]);

    vec![
        (AppPreflightsRunning, preflight_from),
        (AppPreflightsSucceeded, vec![AppPreflightsRunning]),
        (AppPreflightsFailed, vec![AppPreflightsRunning]),
        (AppPreflightsExecutionFailed, vec![AppPreflightsRunning]),
        (AppPreflightsFailedBypassed, vec![AppPreflightsFailed]),
        (
            AppUpgrading,
            vec![AppPreflightsSucceeded, AppPreflightsFailedBypassed],
        ),
        (Succeeded, vec![AppUpgrading]),
        (AppUpgradeFailed, vec![AppUpgrading]),
    ]
}
