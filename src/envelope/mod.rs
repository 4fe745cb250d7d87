//! Guarded operation envelope
//!
//! Wraps a unit of work so that it
//! - only starts when it wins the state machine lock,
//! - moves the workflow through an in-progress state,
//! - always settles in a success or failure state, and
//! - always releases the lock, even when the work returns an error, panics,
//!   or its future is dropped before completion.
//!
//! ```ignore
//! let states = OperationStates::new(Running, Succeeded, Failed);
//! run_guarded(&engine, states, || async { do_work().await }).await?;
//! ```

mod guard;
pub(crate) mod panic;

pub use guard::{run_guarded, GuardedOperation, OperationStates, RunningOperation};

use thiserror::Error;

use crate::statemachine::StateMachineError;

#[derive(Debug, Error)]
pub enum OperationError {
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),
    #[error("{0:#}")]
    Failed(anyhow::Error),
    #[error("operation panicked: {message}")]
    Panicked { message: String, backtrace: String },
}

impl OperationError {
    pub fn is_busy(&self) -> bool {
        matches!(self, OperationError::StateMachine(StateMachineError::Busy))
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(
            self,
            OperationError::StateMachine(StateMachineError::InvalidTransition { .. })
        )
    }

    /// Look for a typed error inside a failed operation's error chain.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        match self {
            OperationError::Failed(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}
