//! Per-unit artifacts and translated output shared across pipeline tasks.

use crate::collaborators::Language;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Artifacts of one successfully parsed and defined unit.
pub struct CompilationUnit<L: Language> {
    pub id: String,
    pub tree: L::Tree,
    pub cursor: L::Cursor,
}

impl<L: Language> CompilationUnit<L> {
    pub fn new(id: impl Into<String>, tree: L::Tree, cursor: L::Cursor) -> Self {
        Self {
            id: id.into(),
            tree,
            cursor,
        }
    }
}

/// A registered unit. Stage tasks lock it for the length of one collaborator call.
pub type SharedUnit<L> = Arc<Mutex<CompilationUnit<L>>>;

/// Lock a unit, recovering it if a collaborator panicked while holding it.
pub fn lock_unit<L: Language>(unit: &SharedUnit<L>) -> MutexGuard<'_, CompilationUnit<L>> {
    unit.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Registered<L: Language> {
    epoch: u64,
    units: BTreeMap<String, SharedUnit<L>>,
}

/// Units that survived parse+define, keyed by id.
///
/// Writes carry the session epoch they were produced in; a write from an
/// epoch closed by `reset` is dropped.
pub struct UnitRegistry<L: Language> {
    inner: Mutex<Registered<L>>,
}

impl<L: Language> UnitRegistry<L> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Registered {
                epoch: 0,
                units: BTreeMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registered<L>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `unit`, replacing any unit with the same id.
    /// Returns false when `epoch` is stale.
    pub fn insert(&self, epoch: u64, unit: CompilationUnit<L>) -> bool {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            tracing::debug!(
                unit = %unit.id,
                stale_epoch = epoch,
                current_epoch = inner.epoch,
                "Discarding unit parsed before reset"
            );
            return false;
        }
        let id = unit.id.clone();
        if inner
            .units
            .insert(id.clone(), Arc::new(Mutex::new(unit)))
            .is_some()
        {
            tracing::debug!(unit = %id, "Replaced previously registered unit");
        }
        true
    }

    /// Registered units in id order.
    pub fn snapshot(&self) -> Vec<(String, SharedUnit<L>)> {
        self.lock()
            .units
            .iter()
            .map(|(id, unit)| (id.clone(), Arc::clone(unit)))
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.lock().units.keys().cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().units.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every unit and start accepting writes for `epoch`.
    pub fn clear(&self, epoch: u64) {
        let mut inner = self.lock();
        inner.units.clear();
        inner.epoch = epoch;
    }
}

impl<L: Language> Default for UnitRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

/// Key of one translation: which unit, translated by which translator kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TranslationKey {
    pub unit: String,
    pub translator: String,
}

impl TranslationKey {
    pub fn new(unit: impl Into<String>, translator: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            translator: translator.into(),
        }
    }
}

impl fmt::Display for TranslationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.unit, self.translator)
    }
}

/// Translated output, written only by the translate stage.
#[derive(Default)]
pub struct TranslationTable {
    entries: Mutex<BTreeMap<TranslationKey, String>>,
}

impl TranslationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<TranslationKey, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, key: TranslationKey, text: String) {
        self.lock().insert(key, text);
    }

    pub fn get(&self, unit: &str, translator: &str) -> Option<String> {
        self.lock()
            .get(&TranslationKey::new(unit, translator))
            .cloned()
    }

    /// Every translation of `unit`, keyed by translator kind.
    pub fn for_unit(&self, unit: &str) -> BTreeMap<String, String> {
        self.lock()
            .iter()
            .filter(|(key, _)| key.unit == unit)
            .map(|(key, text)| (key.translator.clone(), text.clone()))
            .collect()
    }

    pub fn snapshot(&self) -> BTreeMap<TranslationKey, String> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::TokenCursor;

    struct Toy;
    struct ToyCursor(usize);

    impl TokenCursor for ToyCursor {
        fn rewind(&mut self) {
            self.0 = 0;
        }
    }

    impl Language for Toy {
        type Tree = String;
        type Cursor = ToyCursor;
    }

    fn unit(id: &str, tree: &str) -> CompilationUnit<Toy> {
        CompilationUnit::new(id, tree.to_string(), ToyCursor(3))
    }

    #[test]
    fn test_duplicate_id_overwrites() {
        let registry = UnitRegistry::<Toy>::new();
        assert!(registry.insert(0, unit("a", "first")));
        assert!(registry.insert(0, unit("a", "second")));
        assert_eq!(registry.len(), 1);

        let snapshot = registry.snapshot();
        assert_eq!(lock_unit(&snapshot[0].1).tree, "second");
    }

    #[test]
    fn test_snapshot_is_in_id_order() {
        let registry = UnitRegistry::<Toy>::new();
        for id in ["c", "a", "b"] {
            registry.insert(0, unit(id, id));
        }
        assert_eq!(registry.ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_clear_rejects_stale_writes() {
        let registry = UnitRegistry::<Toy>::new();
        registry.insert(0, unit("a", "x"));
        registry.clear(1);
        assert!(registry.is_empty());

        assert!(!registry.insert(0, unit("late", "x")));
        assert!(!registry.contains("late"));
        assert!(registry.insert(1, unit("b", "x")));
        assert!(registry.contains("b"));
    }

    #[test]
    fn test_poisoned_unit_is_recovered() {
        let registry = UnitRegistry::<Toy>::new();
        registry.insert(0, unit("a", "tree"));
        let (_, shared) = registry.snapshot().remove(0);

        let poisoner = Arc::clone(&shared);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("collaborator panicked");
        })
        .join();

        assert!(shared.is_poisoned());
        let mut guard = lock_unit(&shared);
        guard.cursor.rewind();
        assert_eq!(guard.cursor.0, 0);
    }

    #[test]
    fn test_translation_kinds_do_not_collide() {
        let table = TranslationTable::new();
        table.insert(TranslationKey::new("a", "php"), "<?php".into());
        table.insert(TranslationKey::new("a", "js"), "// js".into());
        table.insert(TranslationKey::new("b", "php"), "<?php b".into());

        assert_eq!(table.len(), 3);
        assert_eq!(table.get("a", "js").as_deref(), Some("// js"));
        let for_a = table.for_unit("a");
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a["php"], "<?php");

        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn test_translation_key_display() {
        assert_eq!(TranslationKey::new("main", "php").to_string(), "main [php]");
    }
}
