//! Session state machine.
//!
//! The session decides which caller operations are legal. Every check and
//! transition happens under one short-held mutex; no pipeline work ever runs
//! while it is held.
//!
//! Finishing a compile also marks the calling thread as the one delivering
//! the completion to listeners. `reset()` from any other thread waits until
//! that delivery ends, so a stale completion never reaches listeners after
//! the next run has started.

use crate::errors::UsageError;
use serde::{Deserialize, Serialize};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Lifecycle state of a compiler session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Accepting compilation units.
    #[default]
    Idle,
    /// A compile run is in flight.
    Compiling,
    /// The last compile finished; `reset()` is required before the next one.
    AwaitingReset,
}

impl SessionState {
    pub fn is_compiling(&self) -> bool {
        matches!(self, Self::Compiling)
    }

    /// True once `compile()` was called and `reset()` has not been since.
    pub fn needs_reset(&self) -> bool {
        matches!(self, Self::Compiling | Self::AwaitingReset)
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: SessionState,
    /// Bumped by every reset; tasks from an older epoch must not publish.
    epoch: u64,
    /// Thread emitting the completion event of the last run, if any.
    delivering: Option<ThreadId>,
}

/// Guards the session state and the reset epoch.
#[derive(Debug, Default)]
pub struct Session {
    inner: Mutex<Inner>,
    delivered: Condvar,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The guarded data is two plain values; a panic cannot leave it torn.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    pub fn is_compiling(&self) -> bool {
        self.state().is_compiling()
    }

    pub fn needs_reset(&self) -> bool {
        self.state().needs_reset()
    }

    /// Run `schedule` while the session is known to be idle.
    ///
    /// The closure runs under the session lock, so whatever it registers is
    /// visible to the next `begin_compile` call. It must not block.
    pub fn while_idle<T>(&self, schedule: impl FnOnce(u64) -> T) -> Result<T, UsageError> {
        let inner = self.lock();
        match inner.state {
            SessionState::Idle => Ok(schedule(inner.epoch)),
            SessionState::Compiling | SessionState::AwaitingReset => {
                Err(UsageError::AddAfterCompile)
            }
        }
    }

    /// Transition `Idle → Compiling`; `prepare` runs under the lock right
    /// after the transition and receives the current epoch.
    pub fn begin_compile<T>(&self, prepare: impl FnOnce(u64) -> T) -> Result<T, UsageError> {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Idle => {
                inner.state = SessionState::Compiling;
                Ok(prepare(inner.epoch))
            }
            SessionState::Compiling | SessionState::AwaitingReset => {
                Err(UsageError::AlreadyCompiling)
            }
        }
    }

    /// Transition `Compiling → AwaitingReset`. Called once by the pipeline.
    ///
    /// Keep the returned guard alive while the completion event is emitted.
    #[must_use = "dropping the guard ends completion delivery"]
    pub fn finish_compile(&self) -> CompletionDelivery<'_> {
        let mut inner = self.lock();
        if inner.state.is_compiling() {
            inner.state = SessionState::AwaitingReset;
            inner.delivering = Some(thread::current().id());
        }
        CompletionDelivery { session: self }
    }

    /// Transition any non-compiling state back to `Idle`; `clear` runs under
    /// the lock with the new epoch.
    ///
    /// Blocks while another thread is still delivering the last completion.
    /// A listener of that completion may reset from inside the callback.
    pub fn reset(&self, clear: impl FnOnce(u64)) -> Result<(), UsageError> {
        let current = thread::current().id();
        let mut inner = self.lock();
        while inner.delivering.is_some_and(|id| id != current) {
            inner = self
                .delivered
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if inner.state.is_compiling() {
            return Err(UsageError::ResetDuringCompile);
        }
        inner.epoch += 1;
        inner.state = SessionState::Idle;
        clear(inner.epoch);
        Ok(())
    }

    /// Run `read` only when no compile is in flight.
    pub fn inspect<T>(&self, read: impl FnOnce() -> T) -> Result<T, UsageError> {
        let inner = self.lock();
        if inner.state.is_compiling() {
            return Err(UsageError::InspectDuringCompile);
        }
        Ok(read())
    }

    fn end_delivery(&self) {
        self.lock().delivering = None;
        self.delivered.notify_all();
    }
}

/// Marks a completion delivery in progress; ends it when dropped.
#[derive(Debug)]
pub struct CompletionDelivery<'a> {
    session: &'a Session,
}

impl Drop for CompletionDelivery<'_> {
    fn drop(&mut self) {
        self.session.end_delivery();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_session_is_idle() {
        let session = Session::new();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.is_compiling());
        assert!(!session.needs_reset());
        assert_eq!(session.epoch(), 0);
    }

    #[test]
    fn test_full_lifecycle() {
        let session = Session::new();
        session.while_idle(|_| ()).unwrap();

        session.begin_compile(|_| ()).unwrap();
        assert!(session.is_compiling());
        assert!(session.needs_reset());

        drop(session.finish_compile());
        assert_eq!(session.state(), SessionState::AwaitingReset);
        assert!(session.needs_reset());

        session.reset(|_| ()).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.needs_reset());
        assert_eq!(session.epoch(), 1);
    }

    #[test]
    fn test_add_rejected_after_compile() {
        let session = Session::new();
        session.begin_compile(|_| ()).unwrap();
        let mut scheduled = false;
        let err = session.while_idle(|_| scheduled = true).unwrap_err();
        assert_eq!(err, UsageError::AddAfterCompile);
        assert!(!scheduled);

        drop(session.finish_compile());
        assert_eq!(
            session.while_idle(|_| ()).unwrap_err(),
            UsageError::AddAfterCompile
        );
    }

    #[test]
    fn test_second_compile_rejected() {
        let session = Session::new();
        session.begin_compile(|_| ()).unwrap();
        assert_eq!(
            session.begin_compile(|_| ()).unwrap_err(),
            UsageError::AlreadyCompiling
        );
        drop(session.finish_compile());
        assert_eq!(
            session.begin_compile(|_| ()).unwrap_err(),
            UsageError::AlreadyCompiling
        );
    }

    #[test]
    fn test_reset_and_inspect_rejected_while_compiling() {
        let session = Session::new();
        session.begin_compile(|_| ()).unwrap();

        let mut cleared = false;
        assert_eq!(
            session.reset(|_| cleared = true).unwrap_err(),
            UsageError::ResetDuringCompile
        );
        assert!(!cleared);
        assert_eq!(
            session.inspect(|| ()).unwrap_err(),
            UsageError::InspectDuringCompile
        );
        assert!(session.is_compiling());
        assert_eq!(session.epoch(), 0);
    }

    #[test]
    fn test_reset_from_idle_bumps_epoch() {
        let session = Session::new();
        let mut seen = 0;
        session.reset(|epoch| seen = epoch).unwrap();
        assert_eq!(seen, 1);
        assert_eq!(session.while_idle(|epoch| epoch).unwrap(), 1);
    }

    #[test]
    fn test_finish_without_compile_is_noop() {
        let session = Session::new();
        drop(session.finish_compile());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_reset_waits_for_completion_delivery() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;

        let session = Arc::new(Session::new());
        session.begin_compile(|_| ()).unwrap();
        let delivery = session.finish_compile();

        let done = Arc::new(AtomicBool::new(false));
        let resetter = {
            let session = Arc::clone(&session);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                session.reset(|_| ()).unwrap();
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!done.load(Ordering::SeqCst));
        assert_eq!(session.state(), SessionState::AwaitingReset);

        drop(delivery);
        resetter.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_delivering_thread_may_reset() {
        let session = Session::new();
        session.begin_compile(|_| ()).unwrap();
        let delivery = session.finish_compile();

        session.reset(|_| ()).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        drop(delivery);
        assert_eq!(session.epoch(), 1);
    }
}
