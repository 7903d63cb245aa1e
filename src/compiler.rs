//! Caller-facing compiler session.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use unitforge::compiler::Compiler;
//! use unitforge::lang::{PhpTranslatorFactory, ScriptLanguage, ScriptParser, SemanticAnalyzer};
//! use unitforge::listeners::CompletionLatch;
//!
//! # fn example() -> anyhow::Result<()> {
//! let compiler = Compiler::<ScriptLanguage>::builder()
//!     .parser(Arc::new(ScriptParser))
//!     .semantic(Arc::new(SemanticAnalyzer::new()))
//!     .translator(Arc::new(PhpTranslatorFactory))
//!     .workers(4)
//!     .build()?;
//!
//! let latch = CompletionLatch::new();
//! compiler.register_compiler_listener(latch.clone());
//! compiler.add_compilation_unit("main", "int $a = 1;")?;
//! compiler.compile()?;
//! latch.wait_timeout(Duration::from_secs(10));
//!
//! for (key, text) in compiler.translations()? {
//!     println!("{key}:\n{text}");
//! }
//! # Ok(())
//! # }
//! ```

use crate::collaborators::{
    Definer, Language, Parser, Resolver, TranslatorFactory, TypeChecker,
};
use crate::config::CompilerConfig;
use crate::error_log::ErrorLogger;
use crate::errors::{CompilerError, UsageError};
use crate::listeners::{CompilerEvent, CompilerListener};
use crate::pipeline::{Collaborators, CompileSummary, Pipeline, TranslationKey};
use crate::pool::WorkerPool;
use crate::session::SessionState;
use crate::source::SourceInput;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

/// A compiler session over the toolchain `L`.
///
/// Every method returns immediately. `compile` starts the pipeline in the
/// background; completion is observed through a listener or `subscribe`.
pub struct Compiler<L: Language> {
    core: Arc<Pipeline<L>>,
    pool: WorkerPool,
}

impl<L: Language> Compiler<L> {
    pub fn builder() -> CompilerBuilder<L> {
        CompilerBuilder::new()
    }

    /// Schedule parse+define of a unit right away.
    ///
    /// Only legal while idle; after `compile` the unit is rejected and never
    /// scheduled until `reset` is called.
    pub fn add_compilation_unit(
        &self,
        id: impl Into<String>,
        source: impl Into<SourceInput>,
    ) -> Result<(), UsageError> {
        let id = id.into();
        let source = source.into();
        self.core
            .session()
            .while_idle(|epoch| self.core.schedule_unit(epoch, id, source))
    }

    /// Add a file as a unit whose id is its path.
    pub fn add_file(&self, path: impl AsRef<Path>) -> Result<(), UsageError> {
        let path = path.as_ref();
        self.add_compilation_unit(path.display().to_string(), SourceInput::file(path))
    }

    pub fn add_file_with_encoding(
        &self,
        path: impl AsRef<Path>,
        encoding: &str,
    ) -> Result<(), UsageError> {
        let path = path.as_ref();
        self.add_compilation_unit(
            path.display().to_string(),
            SourceInput::file(path).with_encoding(encoding),
        )
    }

    /// Start compiling every unit added since the last reset.
    pub fn compile(&self) -> Result<(), UsageError> {
        let core = Arc::clone(&self.core);
        let (epoch, parse_tasks) = self
            .core
            .session()
            .begin_compile(|epoch| (epoch, core.take_pending()))?;
        self.pool.handle().spawn(core.run(epoch, parse_tasks));
        Ok(())
    }

    /// Forget every unit, error and translation and accept units again.
    ///
    /// Waits for the completion event of the last run to reach every
    /// listener first, unless called from one of those listeners.
    pub fn reset(&self) -> Result<(), UsageError> {
        self.core.session().reset(|epoch| self.core.clear(epoch))?;
        tracing::debug!("Compiler reset");
        Ok(())
    }

    pub fn is_compiling(&self) -> bool {
        self.core.session().is_compiling()
    }

    /// True once `compile` was called and `reset` has not been since.
    pub fn needs_a_reset(&self) -> bool {
        self.core.session().needs_reset()
    }

    pub fn state(&self) -> SessionState {
        self.core.session().state()
    }

    pub fn has_found_error(&self) -> Result<bool, UsageError> {
        self.core.session().inspect(|| self.core.found_error())
    }

    /// Failure records in the order they were logged.
    pub fn errors(&self) -> Result<Vec<Arc<CompilerError>>, UsageError> {
        self.core.session().inspect(|| self.core.errors().entries())
    }

    pub fn translations(&self) -> Result<BTreeMap<TranslationKey, String>, UsageError> {
        self.core
            .session()
            .inspect(|| self.core.translations().snapshot())
    }

    pub fn translation(&self, unit: &str, translator: &str) -> Result<Option<String>, UsageError> {
        self.core
            .session()
            .inspect(|| self.core.translations().get(unit, translator))
    }

    /// Translations of one unit keyed by translator kind.
    pub fn translations_for(&self, unit: &str) -> Result<BTreeMap<String, String>, UsageError> {
        self.core
            .session()
            .inspect(|| self.core.translations().for_unit(unit))
    }

    /// Ids of the units that survived parse+define.
    pub fn units(&self) -> Result<Vec<String>, UsageError> {
        self.core.session().inspect(|| self.core.registry().ids())
    }

    /// Listeners registered mid-compile only see checkpoints fired afterwards.
    pub fn register_compiler_listener(&self, listener: Arc<dyn CompilerListener>) {
        self.core.listeners().register(listener);
    }

    pub fn register_error_logger(&self, logger: Arc<dyn ErrorLogger>) {
        self.core.errors().register(logger);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CompilerEvent> {
        self.core.listeners().subscribe()
    }

    /// Summary of the last completed compile, cleared by `reset`.
    pub fn last_summary(&self) -> Option<CompileSummary> {
        self.core.last_summary()
    }

    pub fn workers(&self) -> usize {
        self.pool.workers()
    }

    pub fn translator_kinds(&self) -> Vec<String> {
        self.core
            .collaborators()
            .translators
            .iter()
            .map(|factory| factory.kind().to_string())
            .collect()
    }
}

/// Assembles a [`Compiler`] from its collaborators.
pub struct CompilerBuilder<L: Language> {
    parser: Option<Arc<dyn Parser<L>>>,
    definer: Option<Arc<dyn Definer<L>>>,
    resolver: Option<Arc<dyn Resolver<L>>>,
    type_checker: Option<Arc<dyn TypeChecker<L>>>,
    translators: Vec<Arc<dyn TranslatorFactory<L>>>,
    workers: Option<usize>,
    runtime: Option<Handle>,
}

impl<L: Language> CompilerBuilder<L> {
    pub fn new() -> Self {
        Self {
            parser: None,
            definer: None,
            resolver: None,
            type_checker: None,
            translators: Vec::new(),
            workers: None,
            runtime: None,
        }
    }

    pub fn parser(mut self, parser: Arc<dyn Parser<L>>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn definer(mut self, definer: Arc<dyn Definer<L>>) -> Self {
        self.definer = Some(definer);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn Resolver<L>>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn type_checker(mut self, type_checker: Arc<dyn TypeChecker<L>>) -> Self {
        self.type_checker = Some(type_checker);
        self
    }

    /// Use one analyser for definitions, references and type checking.
    pub fn semantic<T>(self, analyzer: Arc<T>) -> Self
    where
        T: Definer<L> + Resolver<L> + TypeChecker<L> + 'static,
    {
        self.definer(analyzer.clone())
            .resolver(analyzer.clone())
            .type_checker(analyzer)
    }

    /// Add a translator kind. Every kind translates every unit.
    pub fn translator(mut self, factory: Arc<dyn TranslatorFactory<L>>) -> Self {
        self.translators.push(factory);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Size the pool from configuration.
    pub fn config(self, config: &CompilerConfig) -> Self {
        self.workers(config.effective_workers())
    }

    /// Run on an existing runtime instead of a dedicated one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<Compiler<L>> {
        let collaborators = Collaborators {
            parser: self.parser.context("No parser configured")?,
            definer: self.definer.context("No definer configured")?,
            resolver: self.resolver.context("No reference resolver configured")?,
            type_checker: self.type_checker.context("No type checker configured")?,
            translators: self.translators,
        };
        let workers = self
            .workers
            .unwrap_or_else(|| CompilerConfig::default().effective_workers());
        let pool = match self.runtime {
            Some(handle) => WorkerPool::from_handle(handle, workers),
            None => WorkerPool::new(workers)?,
        };

        tracing::debug!(
            workers = pool.workers(),
            translators = collaborators.translators.len(),
            "Built compiler"
        );

        Ok(Compiler {
            core: Arc::new(Pipeline::new(collaborators, pool.handle().clone())),
            pool,
        })
    }
}

impl<L: Language> Default for CompilerBuilder<L> {
    fn default() -> Self {
        Self::new()
    }
}
