//! Phase pipeline coordinator.
//!
//! Parse+define tasks are spawned as units are added. A compile run is one
//! coordinator task that joins every task of a stage before fanning out the
//! next one. The coordinator itself never holds a worker permit.

use crate::collaborators::{
    Definer, Language, Parsed, Parser, Resolver, TokenCursor, TranslatorFactory, TypeChecker,
};
use crate::error_log::ErrorLog;
use crate::errors::{CompilerError, PipelineFailure, Stage};
use crate::listeners::{CompilerEvent, ListenerBus};
use crate::pipeline::registry::{
    CompilationUnit, SharedUnit, TranslationKey, TranslationTable, UnitRegistry, lock_unit,
};
use crate::pipeline::state::{CompileOutcome, CompileSummary, PipelineState};
use crate::pool::PoolHandle;
use crate::session::Session;
use crate::source::SourceInput;
use chrono::Utc;
use futures::future::join_all;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, trace};
use uuid::Uuid;

/// The external collaborators a pipeline drives.
pub struct Collaborators<L: Language> {
    pub parser: Arc<dyn Parser<L>>,
    pub definer: Arc<dyn Definer<L>>,
    pub resolver: Arc<dyn Resolver<L>>,
    pub type_checker: Arc<dyn TypeChecker<L>>,
    pub translators: Vec<Arc<dyn TranslatorFactory<L>>>,
}

impl<L: Language> Clone for Collaborators<L> {
    fn clone(&self) -> Self {
        Self {
            parser: Arc::clone(&self.parser),
            definer: Arc::clone(&self.definer),
            resolver: Arc::clone(&self.resolver),
            type_checker: Arc::clone(&self.type_checker),
            translators: self.translators.clone(),
        }
    }
}

enum ParseOutcome<L: Language> {
    Registered(CompilationUnit<L>),
    Failed(CompilerError),
    /// A reset happened before the task got a worker.
    Stale,
}

/// Shared state of a compiler session and the stages that operate on it.
pub struct Pipeline<L: Language> {
    collaborators: Collaborators<L>,
    pool: PoolHandle,
    session: Session,
    registry: UnitRegistry<L>,
    translations: TranslationTable,
    errors: ErrorLog,
    listeners: ListenerBus,
    /// Parse+define tasks spawned since the last compile or reset.
    pending: Mutex<Vec<JoinHandle<()>>>,
    last_summary: Mutex<Option<CompileSummary>>,
}

impl<L: Language> Pipeline<L> {
    pub fn new(collaborators: Collaborators<L>, pool: PoolHandle) -> Self {
        Self {
            collaborators,
            pool,
            session: Session::new(),
            registry: UnitRegistry::new(),
            translations: TranslationTable::new(),
            errors: ErrorLog::new(),
            listeners: ListenerBus::new(),
            pending: Mutex::new(Vec::new()),
            last_summary: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn registry(&self) -> &UnitRegistry<L> {
        &self.registry
    }

    pub fn translations(&self) -> &TranslationTable {
        &self.translations
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    pub fn listeners(&self) -> &ListenerBus {
        &self.listeners
    }

    pub fn collaborators(&self) -> &Collaborators<L> {
        &self.collaborators
    }

    pub fn last_summary(&self) -> Option<CompileSummary> {
        lock(&self.last_summary).clone()
    }

    /// Error log records or errors the type checker found on its own.
    pub fn found_error(&self) -> bool {
        self.errors.has_errors() || self.collaborators.type_checker.has_found_error()
    }

    /// Spawn the parse+define task of one unit and track it for the next
    /// compile's entry barrier. Call only while the session is idle.
    pub fn schedule_unit(self: &Arc<Self>, epoch: u64, id: String, source: SourceInput) {
        let core = Arc::clone(self);
        let task = self.pool.spawn(async move {
            let worker = Arc::clone(&core);
            let unit_id = id.clone();
            let outcome = core
                .pool
                .run(move || Ok(worker.parse_and_define(epoch, unit_id, source)))
                .await;

            match outcome {
                Ok(ParseOutcome::Registered(unit)) => {
                    trace!(unit = %id, "Unit parsed and defined");
                    core.registry.insert(epoch, unit);
                }
                Ok(ParseOutcome::Failed(record)) => {
                    core.errors.log(epoch, record);
                }
                Ok(ParseOutcome::Stale) => {
                    debug!(unit = %id, "Skipping parse of unit added before reset");
                }
                Err(err) => {
                    core.errors.log(
                        epoch,
                        CompilerError::Parse {
                            unit: id,
                            source: err.into_cause(),
                        },
                    );
                }
            }
        });
        lock(&self.pending).push(task);
    }

    fn parse_and_define(&self, epoch: u64, id: String, source: SourceInput) -> ParseOutcome<L> {
        if self.session.epoch() != epoch {
            return ParseOutcome::Stale;
        }

        let text = match source.read_to_string() {
            Ok(text) => text,
            Err(source) => return ParseOutcome::Failed(CompilerError::Parse { unit: id, source }),
        };
        let Parsed {
            mut tree,
            mut cursor,
        } = match self.collaborators.parser.parse(&text) {
            Ok(parsed) => parsed,
            Err(source) => return ParseOutcome::Failed(CompilerError::Parse { unit: id, source }),
        };
        if let Err(source) = self
            .collaborators
            .definer
            .enrich_with_definitions(&mut tree, &mut cursor)
        {
            return ParseOutcome::Failed(CompilerError::Definition { unit: id, source });
        }
        ParseOutcome::Registered(CompilationUnit::new(id, tree, cursor))
    }

    /// Hand over the parse+define tasks the next compile must wait for.
    pub fn take_pending(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *lock(&self.pending))
    }

    /// Clear every per-session structure for `epoch`. Runs under the session lock.
    pub fn clear(&self, epoch: u64) {
        // Tasks still draining keep running; their writes are rejected by epoch.
        lock(&self.pending).clear();
        self.registry.clear(epoch);
        self.errors.clear(epoch);
        self.translations.clear();
        *lock(&self.last_summary) = None;
        self.collaborators.type_checker.reset();
    }

    /// Drive one compile run to completion.
    pub async fn run(self: Arc<Self>, epoch: u64, parse_tasks: Vec<JoinHandle<()>>) {
        let run_id = Uuid::new_v4();
        let span = info_span!("compile", %run_id);
        self.execute(run_id, epoch, parse_tasks).instrument(span).await
    }

    async fn execute(self: &Arc<Self>, run_id: Uuid, epoch: u64, parse_tasks: Vec<JoinHandle<()>>) {
        let started_at = Utc::now();
        let mut state = PipelineState::Start;
        info!(pending_units = parse_tasks.len(), "Compilation started");

        advance(&mut state, PipelineState::ParseDefine);
        self.barrier(Stage::ParseDefine, epoch, parse_tasks).await;
        self.listeners.emit(CompilerEvent::ParseDefineCompleted {
            units: self.registry.len(),
        });

        let outcome = self.run_stages(&mut state, epoch).await;
        advance(&mut state, PipelineState::Completed);

        let summary = CompileSummary::finished(
            run_id,
            started_at,
            outcome,
            self.registry.len(),
            self.translations.len(),
            self.errors.len(),
            self.found_error(),
        );
        *lock(&self.last_summary) = Some(summary.clone());
        // Resets from other threads wait until listeners have seen the event.
        let _delivering = self.session.finish_compile();

        info!(
            outcome = ?summary.outcome,
            units = summary.units,
            translations = summary.translations,
            errors = summary.errors,
            duration_ms = summary.duration.as_millis() as u64,
            "Compilation completed"
        );
        self.listeners.emit(CompilerEvent::CompilingCompleted {
            summary: Box::new(summary),
        });
    }

    async fn run_stages(self: &Arc<Self>, state: &mut PipelineState, epoch: u64) -> CompileOutcome {
        let units = self.registry.snapshot();
        if units.is_empty() {
            self.log_no_units(epoch);
            return CompileOutcome::NoUnits;
        }

        advance(state, PipelineState::Reference);
        let resolver = Arc::clone(&self.collaborators.resolver);
        self.unit_stage(
            Stage::Reference,
            epoch,
            &units,
            move |tree: &mut L::Tree, cursor: &mut L::Cursor| {
                resolver.enrich_with_references(tree, cursor)
            },
            |unit, source| CompilerError::Reference { unit, source },
        )
        .await;
        self.listeners.emit(CompilerEvent::ReferenceCompleted { units: units.len() });

        let units = self.registry.snapshot();
        if units.is_empty() {
            self.log_no_units(epoch);
            return CompileOutcome::NoUnits;
        }

        advance(state, PipelineState::TypeCheck);
        let checker = Arc::clone(&self.collaborators.type_checker);
        self.unit_stage(
            Stage::TypeCheck,
            epoch,
            &units,
            move |tree: &mut L::Tree, cursor: &mut L::Cursor| {
                checker.do_type_checking(tree, cursor)
            },
            |unit, source| CompilerError::TypeCheck { unit, source },
        )
        .await;
        let found_error = self.found_error();
        self.listeners.emit(CompilerEvent::TypeCheckCompleted {
            units: units.len(),
            found_error,
        });

        if found_error {
            advance(state, PipelineState::SkipTranslate);
            self.errors.log(epoch, PipelineFailure::TranslationAborted.into());
            return CompileOutcome::TranslationSkipped;
        }
        if self.collaborators.translators.is_empty() {
            advance(state, PipelineState::SkipTranslate);
            self.errors.log(epoch, PipelineFailure::NoTranslators.into());
            return CompileOutcome::TranslationSkipped;
        }

        advance(state, PipelineState::Translate);
        self.translate_stage(epoch, &units).await;
        CompileOutcome::Translated
    }

    fn log_no_units(&self, epoch: u64) {
        debug!("Unit registry is empty, skipping remaining stages");
        self.errors.log(epoch, PipelineFailure::NoCompilationUnits.into());
    }

    /// Run `step` once per unit and wait for all of them.
    async fn unit_stage<F>(
        self: &Arc<Self>,
        stage: Stage,
        epoch: u64,
        units: &[(String, SharedUnit<L>)],
        step: F,
        record: fn(String, anyhow::Error) -> CompilerError,
    ) where
        F: Fn(&mut L::Tree, &mut L::Cursor) -> anyhow::Result<()> + Clone + Send + Sync + 'static,
    {
        debug!(stage = %stage, tasks = units.len(), "Fanning out stage");
        let tasks = units
            .iter()
            .map(|(id, unit)| {
                let core = Arc::clone(self);
                let id = id.clone();
                let unit = Arc::clone(unit);
                let step = step.clone();
                self.pool.spawn(async move {
                    let outcome = core
                        .pool
                        .run(move || {
                            let mut guard = lock_unit(&unit);
                            let CompilationUnit { tree, cursor, .. } = &mut *guard;
                            step(tree, cursor)
                        })
                        .await;
                    match outcome {
                        Ok(()) => trace!(unit = %id, stage = %stage, "Stage task finished"),
                        Err(err) => {
                            core.errors.log(epoch, record(id, err.into_cause()));
                        }
                    }
                })
            })
            .collect();
        self.barrier(stage, epoch, tasks).await;
    }

    /// One task per (translator kind, unit) pair.
    async fn translate_stage(self: &Arc<Self>, epoch: u64, units: &[(String, SharedUnit<L>)]) {
        let factories = &self.collaborators.translators;
        debug!(
            stage = %Stage::Translate,
            tasks = factories.len() * units.len(),
            "Fanning out stage"
        );

        let mut tasks = Vec::with_capacity(factories.len() * units.len());
        for factory in factories {
            for (id, unit) in units {
                let core = Arc::clone(self);
                let factory = Arc::clone(factory);
                let id = id.clone();
                let unit = Arc::clone(unit);
                tasks.push(self.pool.spawn(async move {
                    let kind = factory.kind().to_string();
                    let outcome = core
                        .pool
                        .run(move || {
                            let mut translator = factory.build()?;
                            let mut guard = lock_unit(&unit);
                            let CompilationUnit { tree, cursor, .. } = &mut *guard;
                            cursor.rewind();
                            translator.translate(tree, cursor)
                        })
                        .await;
                    match outcome {
                        Ok(text) => {
                            trace!(unit = %id, translator = %kind, "Unit translated");
                            core.translations.insert(TranslationKey::new(id, kind), text);
                        }
                        Err(err) => {
                            core.errors.log(
                                epoch,
                                CompilerError::Translation {
                                    unit: id,
                                    translator: kind,
                                    source: err.into_cause(),
                                },
                            );
                        }
                    }
                }));
            }
        }
        self.barrier(Stage::Translate, epoch, tasks).await;
    }

    /// Wait for every task of `stage`, whatever its outcome.
    async fn barrier(&self, stage: Stage, epoch: u64, tasks: Vec<JoinHandle<()>>) {
        let count = tasks.len();
        for joined in join_all(tasks).await {
            if let Err(join_err) = joined {
                self.errors.log(
                    epoch,
                    PipelineFailure::TaskLost {
                        stage,
                        message: join_err.to_string(),
                    }
                    .into(),
                );
            }
        }
        debug!(stage = %stage, tasks = count, "Stage barrier reached");
    }
}

fn advance(state: &mut PipelineState, next: PipelineState) {
    debug_assert!(
        state.can_transition_to(next),
        "invalid pipeline transition {state} -> {next}"
    );
    debug!(from = %state, to = %next, "Pipeline state transition");
    *state = next;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
