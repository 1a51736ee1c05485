use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::cache::QueryCache;
use crate::error::{malformed_clause, HornResult};
use crate::numerics::MOST_POSITIVE_EXACT_FLOAT;
use crate::terms::{Symbol, Term, TermList, Value, Variable};

/// A rule: head parameters plus body goals. Facts are stored separately
/// as bare argument tuples.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: Symbol,
    pub params: TermList,
    pub body: Vec<Term>,
    pub id: u64,
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.params == other.params && self.body == other.body
    }
}

impl Rule {
    /// Rename every variable in the head and body to a fresh id,
    /// keeping names for presentation. Recursive and concurrent uses of
    /// one clause must never share variables.
    pub fn renamed_apart(&self) -> Self {
        let mut renames: HashMap<u64, Variable> = HashMap::new();
        let mut rename = |t: &Term| -> Term {
            if let Value::Variable(v) = t.value() {
                let fresh = renames.entry(v.id).or_insert_with(|| v.renamed()).clone();
                Term::new_fresh(Value::Variable(fresh))
            } else {
                t.clone()
            }
        };
        Self {
            name: self.name.clone(),
            params: self
                .params
                .iter()
                .map(|p| p.cloned_map_replace(&mut rename))
                .collect(),
            body: self
                .body
                .iter()
                .map(|g| g.cloned_map_replace(&mut rename))
                .collect(),
            id: self.id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Assert,
    Retract,
    AddRule,
    Clear,
    Import,
}

/// One committed knowledge-base change, as appended to the history log
/// and delivered to watchers.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub predicate: Option<Symbol>,
    pub args: Option<TermList>,
    pub timestamp_ms: u64,
}

impl ChangeRecord {
    fn new(kind: ChangeKind, predicate: Option<Symbol>, args: Option<TermList>) -> Self {
        Self {
            kind,
            predicate,
            args,
            timestamp_ms: now_ms(),
        }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

const MAX_ID: u64 = (MOST_POSITIVE_EXACT_FLOAT - 1) as u64;

/// Monotonic id source. Each knowledge base owns one for clause and
/// source ids, each tracer one for node ids. Ids reach the browser
/// visualizer as JSON numbers, so the counter stays below 2^53 to
/// survive coercion to an IEEE-754 double.
#[derive(Clone, Debug)]
pub struct Counter {
    next: Arc<AtomicU64>,
}

impl Default for Counter {
    fn default() -> Self {
        Self {
            next: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Counter {
    #[cfg(test)]
    fn with_start(start: u64) -> Self {
        Self {
            next: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn next(&self) -> u64 {
        loop {
            let id = self.next.fetch_add(1, Ordering::SeqCst);
            if id < MAX_ID {
                return id;
            }
            // Ran off the exactly-representable range: move the counter
            // back to the start and take another turn.
            let _ = self
                .next
                .compare_exchange(id + 1, 1, Ordering::SeqCst, Ordering::SeqCst);
        }
    }
}

/// Best-effort statistics counters. `queries` is bumped from the read
/// path, so all of these are atomic rather than lock-guarded.
#[derive(Debug, Default)]
pub struct Stats {
    pub queries: AtomicU64,
    pub facts_asserted: AtomicU64,
    pub facts_retracted: AtomicU64,
    pub rules_added: AtomicU64,
}

impl Stats {
    fn reset(&self) {
        self.queries.store(0, Ordering::Relaxed);
        self.facts_asserted.store(0, Ordering::Relaxed);
        self.facts_retracted.store(0, Ordering::Relaxed);
        self.rules_added.store(0, Ordering::Relaxed);
    }
}

/// The transactional store: facts per predicate (an insertion-ordered
/// set), rules per predicate (insertion order is search order), the
/// append-only history log, the query cache, and counters.
///
/// The engine guards this with an RwLock; mutators take the write lock,
/// queries run against a `KbSnapshot` so later mutations never leak
/// into a stream that is already being consumed.
pub struct KnowledgeBase {
    facts: HashMap<Symbol, Arc<Vec<TermList>>>,
    rules: HashMap<Symbol, Arc<Vec<Arc<Rule>>>>,
    history: Vec<ChangeRecord>,
    tabled: HashSet<Symbol>,
    pub cache: QueryCache,
    pub stats: Stats,
    id_counter: Counter,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self {
            facts: HashMap::new(),
            rules: HashMap::new(),
            history: Vec::new(),
            tabled: HashSet::new(),
            cache: QueryCache::new(),
            stats: Stats::default(),
            id_counter: Counter::default(),
        }
    }

    /// Return a monotonically increasing integer ID.
    pub fn new_id(&self) -> u64 {
        self.id_counter.next()
    }

    /// Add a fact. The fact set per predicate collapses duplicates, but
    /// a duplicate assert still appends a history record; callers see
    /// every attempt in the log.
    pub fn assert_fact(&mut self, predicate: Symbol, args: TermList) -> ChangeRecord {
        let entry = self
            .facts
            .entry(predicate.clone())
            .or_insert_with(|| Arc::new(Vec::new()));
        if !entry.contains(&args) {
            Arc::make_mut(entry).push(args.clone());
        }
        self.stats.facts_asserted.fetch_add(1, Ordering::Relaxed);
        self.cache.invalidate();
        let record = ChangeRecord::new(ChangeKind::Assert, Some(predicate), Some(args));
        self.history.push(record.clone());
        record
    }

    /// Remove a fact. Retracting a fact that is not present is an
    /// idempotent no-op: nothing is committed and nothing is logged.
    pub fn retract_fact(&mut self, predicate: &Symbol, args: &TermList) -> Option<ChangeRecord> {
        let entry = self.facts.get_mut(predicate)?;
        let index = entry.iter().position(|fact| fact == args)?;
        Arc::make_mut(entry).remove(index);
        if entry.is_empty() {
            self.facts.remove(predicate);
        }
        self.stats.facts_retracted.fetch_add(1, Ordering::Relaxed);
        self.cache.invalidate();
        let record = ChangeRecord::new(
            ChangeKind::Retract,
            Some(predicate.clone()),
            Some(args.clone()),
        );
        self.history.push(record.clone());
        Some(record)
    }

    /// Append a rule. Rule order within a predicate is the order of
    /// addition; resolution tries them in that order.
    pub fn add_rule(
        &mut self,
        name: Symbol,
        params: TermList,
        body: Vec<Term>,
    ) -> HornResult<ChangeRecord> {
        validate_body(&body)?;
        let rule = Arc::new(Rule {
            name: name.clone(),
            params: params.clone(),
            body,
            id: self.new_id(),
        });
        let entry = self
            .rules
            .entry(name.clone())
            .or_insert_with(|| Arc::new(Vec::new()));
        Arc::make_mut(entry).push(rule);
        self.stats.rules_added.fetch_add(1, Ordering::Relaxed);
        self.cache.invalidate();
        let record = ChangeRecord::new(ChangeKind::AddRule, Some(name), Some(params));
        self.history.push(record.clone());
        Ok(record)
    }

    /// Empty facts, rules and history and reset the counters. The fresh
    /// history starts with the clear record itself.
    pub fn clear(&mut self) -> ChangeRecord {
        self.facts.clear();
        self.rules.clear();
        self.history.clear();
        self.tabled.clear();
        self.stats.reset();
        self.cache.invalidate();
        let record = ChangeRecord::new(ChangeKind::Clear, None, None);
        self.history.push(record.clone());
        record
    }

    /// Atomically replace the whole store, as `import` requires. Rules
    /// arrive as `(params, body)` pairs and get fresh clause ids here.
    pub fn replace_all(
        &mut self,
        facts: HashMap<Symbol, Vec<TermList>>,
        rules: HashMap<Symbol, Vec<(TermList, Vec<Term>)>>,
    ) -> HornResult<ChangeRecord> {
        for clauses in rules.values() {
            for (_, body) in clauses {
                validate_body(body)?;
            }
        }
        self.facts = facts
            .into_iter()
            .filter(|(_, tuples)| !tuples.is_empty())
            .map(|(predicate, tuples)| (predicate, Arc::new(tuples)))
            .collect();
        self.rules = rules
            .into_iter()
            .filter(|(_, clauses)| !clauses.is_empty())
            .map(|(predicate, clauses)| {
                let clauses = clauses
                    .into_iter()
                    .map(|(params, body)| {
                        Arc::new(Rule {
                            name: predicate.clone(),
                            params,
                            body,
                            id: self.id_counter.next(),
                        })
                    })
                    .collect();
                (predicate, Arc::new(clauses))
            })
            .collect();
        self.cache.invalidate();
        let record = ChangeRecord::new(ChangeKind::Import, None, None);
        self.history.push(record.clone());
        Ok(record)
    }

    /// Mark a predicate for call-variant tabling.
    pub fn table(&mut self, predicate: Symbol) {
        self.tabled.insert(predicate);
    }

    pub fn untable(&mut self, predicate: &Symbol) {
        self.tabled.remove(predicate);
    }

    pub fn facts_of(&self, predicate: &Symbol) -> Option<Arc<Vec<TermList>>> {
        self.facts.get(predicate).cloned()
    }

    pub fn rules_of(&self, predicate: &Symbol) -> Option<Arc<Vec<Arc<Rule>>>> {
        self.rules.get(predicate).cloned()
    }

    pub fn facts(&self) -> &HashMap<Symbol, Arc<Vec<TermList>>> {
        &self.facts
    }

    pub fn rules(&self) -> &HashMap<Symbol, Arc<Vec<Arc<Rule>>>> {
        &self.rules
    }

    pub fn history(&self, limit: Option<usize>) -> Vec<ChangeRecord> {
        match limit {
            Some(limit) if limit < self.history.len() => {
                self.history[self.history.len() - limit..].to_vec()
            }
            _ => self.history.clone(),
        }
    }

    pub fn total_facts(&self) -> usize {
        self.facts.values().map(|tuples| tuples.len()).sum()
    }

    pub fn total_rules(&self) -> usize {
        self.rules.values().map(|rules| rules.len()).sum()
    }

    pub fn predicates(&self) -> Vec<Symbol> {
        let mut predicates: Vec<_> = self.facts.keys().chain(self.rules.keys()).cloned().collect();
        predicates.sort();
        predicates.dedup();
        predicates
    }

    /// A consistent view of the store for one query. Cheap: clones the
    /// predicate maps of `Arc`s, not the clauses themselves.
    pub fn snapshot(&self) -> KbSnapshot {
        KbSnapshot {
            facts: self.facts.clone(),
            rules: self.rules.clone(),
            tabled: self.tabled.clone(),
            cache: self.cache.clone(),
            cache_generation: self.cache.generation(),
        }
    }
}

fn validate_body(body: &[Term]) -> HornResult<()> {
    for goal in body {
        match goal.value() {
            Value::Compound(_) | Value::Atom(_) => {}
            _ => {
                return malformed_clause(
                    "body goals must be compound terms or atoms",
                    Some(goal.clone()),
                )
            }
        }
    }
    Ok(())
}

/// What the resolver sees: an immutable view of facts and rules taken
/// at first access, plus the cache handle for tabled calls.
#[derive(Clone)]
pub struct KbSnapshot {
    facts: HashMap<Symbol, Arc<Vec<TermList>>>,
    rules: HashMap<Symbol, Arc<Vec<Arc<Rule>>>>,
    tabled: HashSet<Symbol>,
    pub cache: QueryCache,
    pub cache_generation: u64,
}

impl KbSnapshot {
    pub fn facts_of(&self, predicate: &Symbol) -> Option<Arc<Vec<TermList>>> {
        self.facts.get(predicate).cloned()
    }

    pub fn rules_of(&self, predicate: &Symbol) -> Option<Arc<Vec<Arc<Rule>>>> {
        self.rules.get(predicate).cloned()
    }

    pub fn is_tabled(&self, predicate: &Symbol) -> bool {
        self.tabled.contains(predicate)
    }
}
