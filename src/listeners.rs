//! Listener bus for compile checkpoints.
//!
//! Four checkpoints fire per compile, in order, on the coordinator task:
//! after the parse+define barrier, after the reference barrier, after the
//! type-check barrier and once the pipeline has completed. The bus takes a
//! snapshot of its listeners at every checkpoint, so a listener registered
//! mid-compile sees every checkpoint fired after registration and none
//! fired before it.

use crate::pipeline::CompileSummary;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, broadcast};

/// Events emitted at pipeline checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompilerEvent {
    /// Every parse+define task has finished.
    ParseDefineCompleted { units: usize },
    /// Every reference task has finished.
    ReferenceCompleted { units: usize },
    /// Every type-check task has finished.
    TypeCheckCompleted { units: usize, found_error: bool },
    /// The pipeline reached its terminal state; the session is no longer compiling.
    CompilingCompleted { summary: Box<CompileSummary> },
}

impl CompilerEvent {
    pub fn is_completion(&self) -> bool {
        matches!(self, CompilerEvent::CompilingCompleted { .. })
    }
}

/// Observer of compile checkpoints.
pub trait CompilerListener: Send + Sync {
    fn on_event(&self, event: &CompilerEvent);
}

impl<F> CompilerListener for F
where
    F: Fn(&CompilerEvent) + Send + Sync,
{
    fn on_event(&self, event: &CompilerEvent) {
        self(event)
    }
}

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Registry of listeners plus a broadcast channel for async subscribers.
pub struct ListenerBus {
    listeners: RwLock<Vec<Arc<dyn CompilerListener>>>,
    events: broadcast::Sender<CompilerEvent>,
}

impl ListenerBus {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            listeners: RwLock::new(Vec::new()),
            events,
        }
    }

    pub fn register(&self, listener: Arc<dyn CompilerListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CompilerEvent> {
        self.events.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Call every listener synchronously in registration order, then
    /// broadcast the event.
    pub fn emit(&self, event: CompilerEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            listener.on_event(&event);
        }
        // No subscribers is fine.
        self.events.send(event).ok();
    }
}

impl Default for ListenerBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener that counts completed compiles and lets callers wait for them.
#[derive(Default)]
pub struct CompletionLatch {
    completed: Mutex<usize>,
    condvar: std::sync::Condvar,
    notify: Notify,
    last: Mutex<Option<CompileSummary>>,
}

impl CompletionLatch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of `CompilingCompleted` events seen so far.
    pub fn completed(&self) -> usize {
        *self.completed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Summary carried by the most recent completion.
    pub fn last_summary(&self) -> Option<CompileSummary> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Block until `count` compiles have completed or `timeout` elapses.
    /// Returns whether the count was reached.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut completed = self.completed.lock().unwrap_or_else(PoisonError::into_inner);
        while *completed < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .condvar
                .wait_timeout(completed, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            completed = guard;
        }
        true
    }

    /// Block until the first compile has completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_for(1, timeout)
    }

    /// Wait asynchronously until `count` compiles have completed.
    pub async fn wait(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.completed() >= count {
                return;
            }
            notified.await;
        }
    }
}

impl CompilerListener for CompletionLatch {
    fn on_event(&self, event: &CompilerEvent) {
        let CompilerEvent::CompilingCompleted { summary } = event else {
            return;
        };
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some((**summary).clone());
        let mut completed = self.completed.lock().unwrap_or_else(PoisonError::into_inner);
        *completed += 1;
        self.condvar.notify_all();
        self.notify.notify_waiters();
    }
}
