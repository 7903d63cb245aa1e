//! Thread-safe sink for failure records.
//!
//! Tasks of one stage append concurrently; nothing reads the log while a
//! stage is running except the error observers, which are called with each
//! record as it is accepted.

use crate::errors::CompilerError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Observer notified of every accepted failure record.
pub trait ErrorLogger: Send + Sync {
    fn log(&self, error: &CompilerError);
}

impl<F> ErrorLogger for F
where
    F: Fn(&CompilerError) + Send + Sync,
{
    fn log(&self, error: &CompilerError) {
        self(error)
    }
}

#[derive(Default)]
struct Records {
    epoch: u64,
    entries: Vec<Arc<CompilerError>>,
}

/// Ordered, append-only list of failure records with a sticky error flag.
#[derive(Default)]
pub struct ErrorLog {
    records: Mutex<Records>,
    found_error: AtomicBool,
    observers: RwLock<Vec<Arc<dyn ErrorLogger>>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an observer. Observers are called in registration order.
    pub fn register(&self, logger: Arc<dyn ErrorLogger>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(logger);
    }

    /// Append a record produced during `epoch`.
    ///
    /// Records from an epoch that a reset has already closed are dropped.
    /// Returns whether the record was accepted.
    pub fn log(&self, epoch: u64, error: CompilerError) -> bool {
        let error = Arc::new(error);
        {
            let mut records = self.records();
            if records.epoch != epoch {
                tracing::debug!(
                    stale_epoch = epoch,
                    current_epoch = records.epoch,
                    error = %error,
                    "Discarding failure record from before reset"
                );
                return false;
            }
            records.entries.push(error.clone());
            self.found_error.store(true, Ordering::SeqCst);
        }

        tracing::warn!(
            unit = error.unit().unwrap_or("-"),
            stage = error.stage().map(|s| s.to_string()).unwrap_or_default(),
            "{}",
            error
        );

        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.log(&error);
        }
        true
    }

    /// Sticky flag: set by the first accepted record, cleared only by `clear`.
    pub fn has_errors(&self) -> bool {
        self.found_error.load(Ordering::SeqCst)
    }

    /// Snapshot of the records in the order they were accepted.
    pub fn entries(&self) -> Vec<Arc<CompilerError>> {
        self.records().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.records().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record, clear the flag and start accepting `epoch`.
    /// Observers stay registered.
    pub fn clear(&self, epoch: u64) {
        let mut records = self.records();
        records.entries.clear();
        records.epoch = epoch;
        self.found_error.store(false, Ordering::SeqCst);
    }
}
