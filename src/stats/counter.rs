use crate::identity::IdentityResolver;
use crate::language::LanguageRegistry;
use crate::model::UserCounts;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity x language table of line counters.
///
/// Every cell exists from construction on; aggregation only ever increments
/// existing cells, so no locking is needed. Reads are meaningful once the
/// run's completion barrier has fired.
#[derive(Debug)]
pub struct CounterStore {
    languages: usize,
    cells: Box<[AtomicU64]>,
}

impl CounterStore {
    pub fn new(identities: usize, languages: usize) -> Self {
        let cells = (0..identities * languages).map(|_| AtomicU64::new(0)).collect();
        Self { languages, cells }
    }

    pub fn for_run(resolver: &IdentityResolver, registry: &LanguageRegistry) -> Self {
        Self::new(resolver.len(), registry.len())
    }

    /// A zeroed store with the same shape.
    pub fn empty_like(&self) -> Self {
        Self::new(self.identities(), self.languages)
    }

    /// Adds every cell of `delta` into this store.
    pub fn absorb(&self, delta: &CounterStore) {
        assert_eq!(self.cells.len(), delta.cells.len(), "counter stores differ in shape");
        for (cell, add) in self.cells.iter().zip(delta.cells.iter()) {
            let n = add.load(Ordering::Relaxed);
            if n > 0 {
                cell.fetch_add(n, Ordering::Relaxed);
            }
        }
    }

    fn cell(&self, identity: usize, language: usize) -> &AtomicU64 {
        assert!(language < self.languages, "language {language} was not pre-allocated");
        &self.cells[identity * self.languages + language]
    }

    pub fn increment(&self, identity: usize, language: usize, amount: u64) {
        if amount == 0 {
            return;
        }
        self.cell(identity, language).fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get(&self, identity: usize, language: usize) -> u64 {
        self.cell(identity, language).load(Ordering::Relaxed)
    }

    /// Per-language counts and total for one identity.
    pub fn identity_snapshot(&self, identity: usize, registry: &LanguageRegistry) -> UserCounts {
        let mut counts = UserCounts::default();
        for language in registry.languages() {
            let n = self.get(identity, language.id);
            counts.per_lang.insert(language.name.clone(), n);
            counts.total += n;
        }
        counts
    }

    pub fn per_language(&self, registry: &LanguageRegistry) -> BTreeMap<String, u64> {
        let identities = self.identities();
        registry
            .languages()
            .iter()
            .map(|language| {
                let sum = (0..identities).map(|identity| self.get(identity, language.id)).sum();
                (language.name.clone(), sum)
            })
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.cells.iter().map(|cell| cell.load(Ordering::Relaxed)).sum()
    }

    fn identities(&self) -> usize {
        if self.languages == 0 {
            0
        } else {
            self.cells.len() / self.languages
        }
    }
}
