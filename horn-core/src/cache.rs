/// Call-variant answer table.
///
/// The cache key is a goal after deep-walking and canonical variable
/// renumbering, so two calls that are variants of each other share an
/// entry. Stored answers are the reified argument tuples of every
/// solution; a hit replays them through unification.
///
/// Any knowledge-base mutation invalidates the whole table and bumps
/// the generation, and inserts from queries running against an older
/// snapshot are dropped.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::terms::TermList;

#[derive(Clone, Debug, Default)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    generation: AtomicU64,
    entries: Mutex<HashMap<String, Arc<Vec<TermList>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The generation observed by a snapshot. Inserts carry it back so
    /// answers computed against a stale snapshot never land.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn lookup(&self, key: &str) -> Option<Arc<Vec<TermList>>> {
        let entries = self.inner.entries.lock().unwrap();
        match entries.get(key) {
            Some(answers) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                Some(answers.clone())
            }
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store answers computed at `generation`; dropped if a mutation
    /// has invalidated the table since.
    pub fn insert(&self, generation: u64, key: String, answers: Vec<TermList>) {
        let mut entries = self.inner.entries.lock().unwrap();
        if self.inner.generation.load(Ordering::SeqCst) == generation {
            entries.insert(key, Arc::new(answers));
        }
    }

    /// Clear all entries. Called by every knowledge-base mutator.
    pub fn invalidate(&self) {
        let mut entries = self.inner.entries.lock().unwrap();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        entries.clear();
    }

    pub fn hits(&self) -> u64 {
        self.inner.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.inner.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
