//! Interfaces of the external collaborators the pipeline drives.
//!
//! The orchestrator never looks inside a syntax tree or cursor; a
//! [`Language`] names the concrete types and every collaborator is written
//! against it. One object may implement several collaborator traits (a
//! semantic analyser usually implements [`Definer`], [`Resolver`] and
//! [`TypeChecker`] together).

use anyhow::Result;

/// Rewindable cursor over the tokens or tree nodes of a unit.
pub trait TokenCursor {
    /// Move back to the start of the stream.
    fn rewind(&mut self);
}

/// Binds the opaque tree and cursor types used by a toolchain.
pub trait Language: Send + Sync + 'static {
    type Tree: Send + 'static;
    type Cursor: TokenCursor + Send + 'static;
}

/// Output of a successful parse.
pub struct Parsed<L: Language> {
    pub tree: L::Tree,
    pub cursor: L::Cursor,
}

impl<L: Language> Parsed<L> {
    pub fn new(tree: L::Tree, cursor: L::Cursor) -> Self {
        Self { tree, cursor }
    }
}

pub trait Parser<L: Language>: Send + Sync {
    fn parse(&self, source: &str) -> Result<Parsed<L>>;
}

pub trait Definer<L: Language>: Send + Sync {
    fn enrich_with_definitions(&self, tree: &mut L::Tree, cursor: &mut L::Cursor) -> Result<()>;
}

pub trait Resolver<L: Language>: Send + Sync {
    fn enrich_with_references(&self, tree: &mut L::Tree, cursor: &mut L::Cursor) -> Result<()>;
}

pub trait TypeChecker<L: Language>: Send + Sync {
    fn do_type_checking(&self, tree: &mut L::Tree, cursor: &mut L::Cursor) -> Result<()>;

    /// Errors the checker found on its own, without failing a call.
    fn has_found_error(&self) -> bool;

    /// Forget everything learned in the previous session.
    fn reset(&self);
}

/// Translates one unit. A fresh instance is built for every unit.
pub trait Translator<L: Language>: Send {
    fn translate(&mut self, tree: &L::Tree, cursor: &mut L::Cursor) -> Result<String>;
}

pub trait TranslatorFactory<L: Language>: Send + Sync {
    /// Identifies the output this factory's translators produce.
    fn kind(&self) -> &str;

    fn build(&self) -> Result<Box<dyn Translator<L>>>;
}
