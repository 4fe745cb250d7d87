// Cluster Installer Library - guarded install and upgrade workflows
// This exposes the core components for testing and integration

pub mod statemachine;
pub mod envelope;
pub mod store;
pub mod types;
pub mod workflows;
pub mod steps;
pub mod controller;
pub mod api;
pub mod telemetry;
pub mod observability;
pub mod config;
pub mod shutdown;

// Re-export key types for easy access
pub use statemachine::{Lock, State, StateMachine, StateMachineError, TransitionRecord, TransitionTable};
pub use envelope::{run_guarded, GuardedOperation, OperationError, OperationStates, RunningOperation};
pub use store::{Status, StatusRecord, StatusStore, StatusTracking};
pub use workflows::{install_table, upgrade_table, InstallState, Mode, Target, UpgradeState};
pub use steps::{AirgapProcessor, AppDeployer, CommandSteps, InfraManager, PreflightRunner, Steps};
pub use controller::{ControllerError, ControllerOptions, InstallController, UpgradeController};
pub use telemetry::{init_telemetry, shutdown_telemetry, generate_correlation_id};
pub use observability::{operation_metrics, create_operation_span, OperationMetrics, OperationTimer};
pub use config::InstallerConfig;
pub use shutdown::ShutdownCoordinator;
