use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

use super::{panic, OperationError};
use crate::observability::{create_operation_span, operation_metrics, OperationTimer};
use crate::statemachine::{Lock, State, StateMachine, StateMachineError};
use crate::telemetry::generate_correlation_id;

/// The three states an operation moves through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStates<S> {
    pub running: S,
    pub succeeded: S,
    pub failed: S,
}

impl<S> OperationStates<S> {
    pub fn new(running: S, succeeded: S, failed: S) -> Self {
        Self {
            running,
            succeeded,
            failed,
        }
    }
}

/// Drop guard that settles the workflow and releases the lock.
///
/// Unless [`Finalizer::succeed`] was called the operation is treated as
/// failed, which covers returned errors, panics and cancelled futures alike.
struct Finalizer<S: State> {
    engine: Arc<StateMachine<S>>,
    lock: Option<Lock>,
    succeeded: S,
    failed: S,
    settled: Option<S>,
    operation_id: String,
}

impl<S: State> Finalizer<S> {
    fn succeed(&mut self, state: Option<S>) {
        self.settled = Some(state.unwrap_or_else(|| self.succeeded.clone()));
    }

    fn lock(&self) -> Option<&Lock> {
        self.lock.as_ref()
    }
}

impl<S: State> Drop for Finalizer<S> {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        let target = self.settled.take().unwrap_or_else(|| self.failed.clone());

        if let Err(err) = self.engine.transition(&lock, target.clone()) {
            error!(
                operation.id = %self.operation_id,
                target = %target,
                current = %self.engine.current_state(),
                error = %err,
                "Failed to settle operation state"
            );
        }
        self.engine.release(&lock);
    }
}

/// An operation that holds the lock but has not entered its running state yet.
pub struct GuardedOperation<S: State> {
    finalizer: Finalizer<S>,
    running: S,
}

impl<S: State> GuardedOperation<S> {
    /// Take the engine's lock. Fails fast when another operation holds it;
    /// the engine is untouched in that case.
    pub fn acquire(
        engine: &Arc<StateMachine<S>>,
        states: OperationStates<S>,
    ) -> Result<Self, OperationError> {
        let lock = engine.acquire_lock().inspect_err(|_| {
            operation_metrics().record_rejected();
        })?;

        Ok(Self {
            finalizer: Finalizer {
                engine: Arc::clone(engine),
                lock: Some(lock),
                succeeded: states.succeeded,
                failed: states.failed,
                settled: None,
                operation_id: generate_correlation_id(),
            },
            running: states.running,
        })
    }

    /// Perform an extra transition under the lock before the operation starts.
    pub fn transition(&self, target: S) -> Result<(), OperationError> {
        match self.finalizer.lock() {
            Some(lock) => Ok(self.finalizer.engine.transition(lock, target)?),
            None => Err(StateMachineError::InvalidLock.into()),
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.finalizer.operation_id
    }

    /// Enter the running state. On failure the lock is released on return and
    /// the operation never runs.
    pub fn start(self) -> Result<RunningOperation<S>, OperationError> {
        if let Err(err) = self.transition(self.running.clone()) {
            operation_metrics().record_rejected();
            return Err(err);
        }
        operation_metrics().record_started();
        Ok(RunningOperation {
            finalizer: self.finalizer,
            running: self.running,
        })
    }
}

/// An operation in its running state, ready to execute its logic.
///
/// The future returned by [`RunningOperation::run`] owns everything it needs
/// and can be handed to `tokio::spawn`.
pub struct RunningOperation<S: State> {
    finalizer: Finalizer<S>,
    running: S,
}

impl<S: State> RunningOperation<S> {
    pub fn operation_id(&self) -> &str {
        &self.finalizer.operation_id
    }

    /// Run `op` and settle in the success state when it returns `Ok`.
    pub async fn run<F, Fut, T>(self, op: F) -> Result<T, OperationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.run_reported(op, |_| {}).await
    }

    /// Like [`RunningOperation::run`], handing the outcome to `report` while
    /// the lock is still held.
    pub async fn run_reported<F, Fut, T, R>(self, op: F, report: R) -> Result<T, OperationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
        R: FnOnce(&Result<T, OperationError>),
    {
        self.execute(async move { op().await.map(|value| (value, None)) }, report)
            .await
    }

    /// Run `op`, which picks the state to settle in when it succeeds.
    pub async fn run_settled<F, Fut, T>(self, op: F) -> Result<T, OperationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<(T, S)>>,
    {
        self.run_settled_reported(op, |_| {}).await
    }

    pub async fn run_settled_reported<F, Fut, T, R>(
        self,
        op: F,
        report: R,
    ) -> Result<T, OperationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<(T, S)>>,
        R: FnOnce(&Result<T, OperationError>),
    {
        self.execute(
            async move { op().await.map(|(value, state)| (value, Some(state))) },
            report,
        )
        .await
    }

    async fn execute<Fut, T, R>(mut self, fut: Fut, report: R) -> Result<T, OperationError>
    where
        Fut: Future<Output = anyhow::Result<(T, Option<S>)>>,
        R: FnOnce(&Result<T, OperationError>),
    {
        panic::install_hook();
        let operation = self.running.to_string();
        let span = create_operation_span(&operation, &self.finalizer.operation_id);
        let timer = OperationTimer::new(&operation);

        let outcome = AssertUnwindSafe(fut).catch_unwind().instrument(span).await;
        let result = match outcome {
            Ok(Ok((value, settle))) => {
                operation_metrics().record_succeeded();
                self.finalizer.succeed(settle);
                Ok(value)
            }
            Ok(Err(err)) => {
                operation_metrics().record_failed();
                warn!(
                    operation.id = %self.finalizer.operation_id,
                    error = %format!("{err:#}"),
                    "Operation failed"
                );
                Err(OperationError::Failed(err))
            }
            Err(payload) => {
                operation_metrics().record_panicked();
                let message = panic::panic_message(payload.as_ref());
                let backtrace = panic::take_backtrace().unwrap_or_default();
                error!(
                    operation.id = %self.finalizer.operation_id,
                    panic = %message,
                    backtrace = %backtrace,
                    "Operation panicked, settling in failure state"
                );
                Err(OperationError::Panicked { message, backtrace })
            }
        };

        // report, then settle and release, before handing the result back
        report(&result);
        drop(self.finalizer);
        timer.finish();
        info!(operation = %operation, success = result.is_ok(), "Guarded operation finished");
        result
    }
}

/// Acquire, enter `states.running`, run `op`, settle, release.
pub async fn run_guarded<S, F, Fut, T>(
    engine: &Arc<StateMachine<S>>,
    states: OperationStates<S>,
    op: F,
) -> Result<T, OperationError>
where
    S: State,
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    GuardedOperation::acquire(engine, states)?
        .start()?
        .run(op)
        .await
}
