// State machine engine with exclusive, non-blocking lock discipline

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

use super::table::{State, TransitionTable};

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateMachineError {
    #[error("state machine is busy: another operation is in progress")]
    Busy,
    #[error("invalid lock: the lock is stale, released or belongs to another state machine")]
    InvalidLock,
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// Exclusive ownership token handed out by [`StateMachine::acquire_lock`].
///
/// A lock is only valid for the engine that issued it and only until it is
/// released. Not `Clone`.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an unreleased lock keeps the state machine busy"]
pub struct Lock {
    engine_id: u64,
    generation: u64,
}

impl Lock {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Record of the most recent successful transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRecord<S> {
    pub from: S,
    pub to: S,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner<S> {
    current: S,
    held: Option<u64>,
    next_generation: u64,
    last_transition: Option<TransitionRecord<S>>,
}

/// Holds one workflow's current state and gates every change behind a lock.
///
/// The internal mutex is only held for the duration of a read or a single
/// mutation, never for the lifetime of a [`Lock`], so readers are never
/// blocked by a long running operation.
#[derive(Debug)]
pub struct StateMachine<S: State> {
    id: u64,
    table: TransitionTable<S>,
    inner: Mutex<Inner<S>>,
}

impl<S: State> StateMachine<S> {
    pub fn new(initial: S, table: TransitionTable<S>) -> Self {
        Self {
            id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
            table,
            inner: Mutex::new(Inner {
                current: initial,
                held: None,
                next_generation: 1,
                last_transition: None,
            }),
        }
    }

    // Every critical section leaves Inner consistent, so a poisoned mutex is safe to reuse.
    fn inner(&self) -> MutexGuard<'_, Inner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Try to take the lock. Fails immediately with [`StateMachineError::Busy`]
    /// when another lock is outstanding; it never waits.
    pub fn acquire_lock(&self) -> Result<Lock, StateMachineError> {
        let mut inner = self.inner();
        if inner.held.is_some() {
            debug!(engine = self.id, "Lock acquisition rejected, state machine busy");
            return Err(StateMachineError::Busy);
        }
        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner.held = Some(generation);
        debug!(engine = self.id, generation, "Lock acquired");
        Ok(Lock {
            engine_id: self.id,
            generation,
        })
    }

    /// Move to `target` if `lock` is current and the table allows the edge.
    ///
    /// On any error the current state is left untouched.
    pub fn transition(&self, lock: &Lock, target: S) -> Result<(), StateMachineError> {
        let mut inner = self.inner();
        if !self.is_current(&inner, lock) {
            return Err(StateMachineError::InvalidLock);
        }
        if !self.table.allows(&inner.current, &target) {
            return Err(StateMachineError::InvalidTransition {
                from: inner.current.to_string(),
                to: target.to_string(),
            });
        }

        let from = std::mem::replace(&mut inner.current, target.clone());
        info!(
            engine = self.id,
            from = %from,
            to = %target,
            "State transition"
        );
        inner.last_transition = Some(TransitionRecord {
            from,
            to: target,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Release `lock` if it is still the current one. Releasing twice, or
    /// releasing a superseded lock, does nothing.
    pub fn release(&self, lock: &Lock) {
        let mut inner = self.inner();
        if self.is_current(&inner, lock) {
            inner.held = None;
            debug!(engine = self.id, generation = lock.generation, "Lock released");
        }
    }

    pub fn current_state(&self) -> S {
        self.inner().current.clone()
    }

    pub fn is_lock_acquired(&self) -> bool {
        self.inner().held.is_some()
    }

    pub fn last_transition(&self) -> Option<TransitionRecord<S>> {
        self.inner().last_transition.clone()
    }

    /// Whether the table would allow moving from the current state to `target`.
    ///
    /// This is advisory only: the state may change before a lock is taken.
    pub fn can_transition(&self, target: &S) -> bool {
        self.table.allows(&self.inner().current, target)
    }

    pub fn table(&self) -> &TransitionTable<S> {
        &self.table
    }

    fn is_current(&self, inner: &Inner<S>, lock: &Lock) -> bool {
        lock.engine_id == self.id && inner.held == Some(lock.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};

    fn machine() -> StateMachine<&'static str> {
        StateMachine::new(
            "new",
            TransitionTable::new([
                ("running", vec!["new", "failed"]),
                ("done", vec!["running"]),
                ("failed", vec!["running"]),
            ]),
        )
    }

    #[test]
    fn test_acquire_is_exclusive_until_release() {
        let sm = machine();
        let lock = sm.acquire_lock().unwrap();
        assert!(sm.is_lock_acquired());
        assert_eq!(sm.acquire_lock(), Err(StateMachineError::Busy));

        sm.release(&lock);
        assert!(!sm.is_lock_acquired());
        let next = sm.acquire_lock().unwrap();
        assert!(next.generation() > lock.generation());
        sm.release(&next);
    }

    #[test]
    fn test_legal_transitions_under_one_lock() {
        let sm = machine();
        let lock = sm.acquire_lock().unwrap();
        sm.transition(&lock, "running").unwrap();
        sm.transition(&lock, "done").unwrap();
        sm.release(&lock);

        assert_eq!(sm.current_state(), "done");
        let record = sm.last_transition().unwrap();
        assert_eq!(record.from, "running");
        assert_eq!(record.to, "done");
    }

    #[test]
    fn test_invalid_transition_leaves_state_unchanged() {
        let sm = machine();
        let lock = sm.acquire_lock().unwrap();
        let err = sm.transition(&lock, "done").unwrap_err();
        assert_eq!(
            err,
            StateMachineError::InvalidTransition {
                from: "new".to_string(),
                to: "done".to_string()
            }
        );
        assert_eq!(sm.current_state(), "new");
        assert!(sm.last_transition().is_none());

        assert!(sm.transition(&lock, "nowhere").is_err());
        assert_eq!(sm.current_state(), "new");
        sm.release(&lock);
    }

    #[test]
    fn test_transition_without_current_lock_fails() {
        let sm = machine();
        let stale = sm.acquire_lock().unwrap();
        sm.release(&stale);

        assert_eq!(
            sm.transition(&stale, "running"),
            Err(StateMachineError::InvalidLock)
        );

        let current = sm.acquire_lock().unwrap();
        // a stale lock can neither transition nor release the current holder
        assert_eq!(
            sm.transition(&stale, "running"),
            Err(StateMachineError::InvalidLock)
        );
        sm.release(&stale);
        assert!(sm.is_lock_acquired());
        assert_eq!(sm.current_state(), "new");

        sm.release(&current);
        sm.release(&current);
        assert!(!sm.is_lock_acquired());
    }

    #[test]
    fn test_foreign_lock_is_rejected() {
        let first = machine();
        let second = machine();
        let foreign = first.acquire_lock().unwrap();
        let own = second.acquire_lock().unwrap();

        // both are the first generation of their engine
        assert_eq!(foreign.generation(), own.generation());
        assert_eq!(
            second.transition(&foreign, "running"),
            Err(StateMachineError::InvalidLock)
        );
        second.release(&foreign);
        assert!(second.is_lock_acquired());

        second.release(&own);
        first.release(&foreign);
    }

    #[test]
    fn test_reads_do_not_wait_for_lock_holder() {
        let sm = machine();
        let lock = sm.acquire_lock().unwrap();
        sm.transition(&lock, "running").unwrap();
        assert_eq!(sm.current_state(), "running");
        assert!(sm.can_transition(&"done"));
        assert!(!sm.can_transition(&"running"));
        sm.release(&lock);
    }

    #[test]
    fn test_concurrent_acquire_has_single_winner() {
        let sm = Arc::new(machine());
        let winners = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let sm = Arc::clone(&sm);
                let winners = Arc::clone(&winners);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    if let Ok(lock) = sm.acquire_lock() {
                        winners.fetch_add(1, Ordering::SeqCst);
                        // dropping the token does not release it
                        let _ = lock;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(sm.is_lock_acquired());
    }
}
