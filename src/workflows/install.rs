// Install workflow states and transition tables

use super::Target;
use crate::statemachine::TransitionTable;

workflow_states! {
    /// States of a fresh installation.
    pub enum InstallState {
        New,
        ApplicationConfiguring,
        ApplicationConfigured,
        ApplicationConfigurationFailed,
        InstallationConfiguring,
        InstallationConfigured,
        InstallationConfigurationFailed,
        HostPreflightsRunning,
        HostPreflightsSucceeded,
        HostPreflightsFailed,
        HostPreflightsExecutionFailed,
        HostPreflightsFailedBypassed,
        InfrastructureInstalling,
        InfrastructureInstalled,
        InfrastructureInstallFailed,
        AirgapProcessing,
        AirgapProcessed,
        AirgapProcessingFailed,
        AppPreflightsRunning,
        AppPreflightsSucceeded,
        AppPreflightsFailed,
        AppPreflightsExecutionFailed,
        AppPreflightsFailedBypassed,
        AppInstalling,
        Succeeded,
        AppInstallFailed,
    }
}

/// Transition table of the install workflow for `target`.
///
/// Airgap processing only exists on Linux with an airgap bundle; when present
/// it must complete before app preflights can run.
pub fn install_table(target: Target, airgap: bool) -> TransitionTable<InstallState> {
    match target {
        Target::Linux => linux_table(airgap),
        Target::Kubernetes => kubernetes_table(),
    }
}

fn linux_table(airgap: bool) -> TransitionTable<InstallState> {
    use InstallState::*;

    // configuration may change until infrastructure installation starts
    let reconfigurable = vec![
        New,
        ApplicationConfigured,
        ApplicationConfigurationFailed,
        InstallationConfigured,
        InstallationConfigurationFailed,
        HostPreflightsSucceeded,
        HostPreflightsFailed,
        HostPreflightsExecutionFailed,
    ];

    let mut entries = vec![
        (ApplicationConfiguring, reconfigurable),
        (ApplicationConfigured, vec![ApplicationConfiguring]),
        (ApplicationConfigurationFailed, vec![ApplicationConfiguring]),
        (
            InstallationConfiguring,
            vec![
                ApplicationConfigured,
                InstallationConfigured,
                InstallationConfigurationFailed,
                HostPreflightsSucceeded,
                HostPreflightsFailed,
                HostPreflightsExecutionFailed,
            ],
        ),
        (InstallationConfigured, vec![InstallationConfiguring]),
        (InstallationConfigurationFailed, vec![InstallationConfiguring]),
        (
            HostPreflightsRunning,
            vec![
                InstallationConfigured,
                HostPreflightsSucceeded,
                HostPreflightsFailed,
                HostPreflightsExecutionFailed,
            ],
        ),
        (HostPreflightsSucceeded, vec![HostPreflightsRunning]),
        (HostPreflightsFailed, vec![HostPreflightsRunning]),
        (HostPreflightsExecutionFailed, vec![HostPreflightsRunning]),
        (HostPreflightsFailedBypassed, vec![HostPreflightsFailed]),
        (
            InfrastructureInstalling,
            vec![HostPreflightsSucceeded, HostPreflightsFailedBypassed],
        ),
        (InfrastructureInstalled, vec![InfrastructureInstalling]),
        (InfrastructureInstallFailed, vec![InfrastructureInstalling]),
    ];

    let app_preflights_entry = if airgap {
        entries.extend([
            (AirgapProcessing, vec![InfrastructureInstalled, AirgapProcessingFailed]),
            (AirgapProcessed, vec![AirgapProcessing]),
            (AirgapProcessingFailed, vec![AirgapProcessing]),
        ]);
        AirgapProcessed
    } else {
        InfrastructureInstalled
    };

    entries.extend(app_entries(app_preflights_entry));
    TransitionTable::new(entries)
}

fn kubernetes_table() -> TransitionTable<InstallState> {
    use InstallState::*;

    let mut entries = vec![
        (
            ApplicationConfiguring,
            vec![
                New,
                ApplicationConfigured,
                ApplicationConfigurationFailed,
                InstallationConfigured,
                InstallationConfigurationFailed,
            ],
        ),
        (ApplicationConfigured, vec![ApplicationConfiguring]),
        (ApplicationConfigurationFailed, vec![ApplicationConfiguring]),
        (
            InstallationConfiguring,
            vec![
                ApplicationConfigured,
                InstallationConfigured,
                InstallationConfigurationFailed,
            ],
        ),
        (InstallationConfigured, vec![InstallationConfiguring]),
        (InstallationConfigurationFailed, vec![InstallationConfiguring]),
        (InfrastructureInstalling, vec![InstallationConfigured]),
        (InfrastructureInstalled, vec![InfrastructureInstalling]),
        (InfrastructureInstallFailed, vec![InfrastructureInstalling]),
    ];
    entries.extend(app_entries(InfrastructureInstalled));
    TransitionTable::new(entries)
}

/// App preflights and app installation, entered from `entry`.
fn app_entries(entry: InstallState) -> Vec<(InstallState, Vec<InstallState>)> {
    use InstallState::*;

    vec![
        (
            AppPreflightsRunning,
            vec![
                entry,
                AppPreflightsSucceeded,
                AppPreflightsFailed,
                AppPreflightsExecutionFailed,
            ],
        ),
        (AppPreflightsSucceeded, vec![AppPreflightsRunning]),
        (AppPreflightsFailed, vec![AppPreflightsRunning]),
        (AppPreflightsExecutionFailed, vec![AppPreflightsRunning]),
        (AppPreflightsFailedBypassed, vec![AppPreflightsFailed]),
        (
            AppInstalling,
            vec![AppPreflightsSucceeded, AppPreflightsFailedBypassed],
        ),
        (Succeeded, vec![AppInstalling]),
        (AppInstallFailed, vec![AppInstalling]),
    ]
}
