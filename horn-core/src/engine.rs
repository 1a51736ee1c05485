use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc, Mutex, RwLock};
use std::thread;

use serde::Serialize;

use crate::error::HornResult;
use crate::kb::{ChangeRecord, KnowledgeBase, Rule};
use crate::messages::{Message, MessageQueue};
use crate::parser;
use crate::query::{query_variables, Query, QueryOpts};
use crate::resolver::{resolve_goal, solve, CutBarrier, Goal, QueryCtx};
use crate::sources::Source;
use crate::terms::{Symbol, Term, TermList};
use crate::trace::{
    Spy, SpyCounts, SpyRecord, TraceEvent, TraceNode, TraceTreeExport, Tracer,
};
use crate::wire::{export_kb, import_payload, KbExport};

pub type WatchFn = Arc<dyn Fn(&ChangeRecord) + Send + Sync>;

/// Aggregate statistics reported by `stats()`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub total_facts: usize,
    pub total_rules: usize,
    pub predicates: usize,
    pub queries: u64,
    pub facts_asserted: u64,
    pub facts_retracted: u64,
    pub rules_added: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// The `{log, tree, stats}` snapshot taken after a traced query.
#[derive(Debug, Clone, Serialize)]
pub struct TraceReport {
    pub log: Vec<TraceEvent>,
    pub tree: TraceTreeExport,
    pub stats: TraceStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceStats {
    pub nodes: usize,
    pub events: usize,
    pub max_depth: usize,
}

/// The engine facade: a knowledge base behind an RwLock, the per-query
/// tracer, the spy registry, the diagnostics queue and the watcher
/// delivery thread. Each instance is fully isolated, so tests can run
/// with their own engines side by side.
pub struct Horn {
    pub kb: Arc<RwLock<KnowledgeBase>>,
    messages: MessageQueue,
    tracer: Arc<Mutex<Tracer>>,
    spy: Arc<Mutex<Spy>>,
    watchers: Arc<Mutex<HashMap<String, WatchFn>>>,
    notify_tx: mpsc::Sender<ChangeRecord>,
}

impl Default for Horn {
    fn default() -> Self {
        Self::new()
    }
}

impl Horn {
    pub fn new() -> Self {
        let watchers: Arc<Mutex<HashMap<String, WatchFn>>> = Arc::new(Mutex::new(HashMap::new()));
        let (notify_tx, notify_rx) = mpsc::channel::<ChangeRecord>();

        // Watchers run on their own thread, after commit, outside every
        // lock the mutators hold. A slow watcher delays other watchers,
        // never the store. The thread exits when the engine drops.
        let thread_watchers = watchers.clone();
        thread::spawn(move || {
            for record in notify_rx {
                let callbacks: Vec<WatchFn> =
                    thread_watchers.lock().unwrap().values().cloned().collect();
                for callback in callbacks {
                    callback(&record);
                }
            }
        });

        Self {
            kb: Arc::new(RwLock::new(KnowledgeBase::new())),
            messages: MessageQueue::new(),
            tracer: Arc::new(Mutex::new(Tracer::new())),
            spy: Arc::new(Mutex::new(Spy::new())),
            watchers,
            notify_tx,
        }
    }

    fn notify(&self, record: ChangeRecord) {
        // The receiver only disappears when the engine is dropping.
        let _ = self.notify_tx.send(record);
    }

    /// Load a Prolog-like program text: facts and rules, `.`-terminated.
    pub fn load_str(&self, src: &str) -> HornResult<()> {
        let source = Arc::new(Source::new(src));
        let clauses = {
            let kb = self.kb.read().unwrap();
            let src_id = kb.new_id();
            drop(kb);
            parser::parse_program(src_id, &source)?
        };

        let mut records = vec![];
        {
            let mut kb = self.kb.write().unwrap();
            for clause in clauses {
                if clause.body.is_empty() {
                    records.push(kb.assert_fact(clause.name, clause.params));
                } else {
                    records.push(kb.add_rule(clause.name, clause.params, clause.body)?);
                }
            }
        }
        for record in records {
            self.notify(record);
        }
        Ok(())
    }

    pub fn assert_fact(&self, predicate: Symbol, args: TermList) -> HornResult<()> {
        let record = self.kb.write().unwrap().assert_fact(predicate, args);
        self.notify(record);
        Ok(())
    }

    /// Retracting an absent fact is an acknowledged no-op.
    pub fn retract_fact(&self, predicate: &Symbol, args: &TermList) -> HornResult<()> {
        let record = self.kb.write().unwrap().retract_fact(predicate, args);
        if let Some(record) = record {
            self.notify(record);
        }
        Ok(())
    }

    pub fn add_rule(
        &self,
        predicate: Symbol,
        params: TermList,
        body: Vec<Term>,
    ) -> HornResult<()> {
        let record = self.kb.write().unwrap().add_rule(predicate, params, body)?;
        self.notify(record);
        Ok(())
    }

    pub fn clear(&self) -> HornResult<()> {
        let record = self.kb.write().unwrap().clear();
        self.notify(record);
        Ok(())
    }

    /// Mark a predicate for call-variant tabling.
    pub fn table(&self, predicate: Symbol) {
        self.kb.write().unwrap().table(predicate);
    }

    pub fn untable(&self, predicate: &Symbol) {
        self.kb.write().unwrap().untable(predicate);
    }

    /// Snapshot of the fact store, optionally restricted to one predicate.
    pub fn facts(&self, predicate: Option<&Symbol>) -> HashMap<Symbol, Vec<TermList>> {
        let kb = self.kb.read().unwrap();
        kb.facts()
            .iter()
            .filter(|(name, _)| predicate.map_or(true, |p| p == *name))
            .map(|(name, tuples)| (name.clone(), tuples.as_ref().clone()))
            .collect()
    }

    /// Snapshot of the rule store, optionally restricted to one predicate.
    pub fn rules(&self, predicate: Option<&Symbol>) -> HashMap<Symbol, Vec<Rule>> {
        let kb = self.kb.read().unwrap();
        kb.rules()
            .iter()
            .filter(|(name, _)| predicate.map_or(true, |p| p == *name))
            .map(|(name, rules)| {
                let rules = rules.iter().map(|r| r.as_ref().clone()).collect();
                (name.clone(), rules)
            })
            .collect()
    }

    pub fn history(&self, limit: Option<usize>) -> Vec<ChangeRecord> {
        self.kb.read().unwrap().history(limit)
    }

    pub fn stats(&self) -> EngineStats {
        let kb = self.kb.read().unwrap();
        EngineStats {
            total_facts: kb.total_facts(),
            total_rules: kb.total_rules(),
            predicates: kb.predicates().len(),
            queries: kb.stats.queries.load(Ordering::Relaxed),
            facts_asserted: kb.stats.facts_asserted.load(Ordering::Relaxed),
            facts_retracted: kb.stats.facts_retracted.load(Ordering::Relaxed),
            rules_added: kb.stats.rules_added.load(Ordering::Relaxed),
            cache_hits: kb.cache.hits(),
            cache_misses: kb.cache.misses(),
        }
    }

    /// Run a query given as already-parsed goal terms. The solution
    /// stream works off a snapshot taken here; concurrent mutations do
    /// not change answers already being streamed.
    pub fn query(&self, goals: Vec<Term>, opts: QueryOpts) -> Query {
        let snapshot = {
            let kb = self.kb.read().unwrap();
            kb.stats.queries.fetch_add(1, Ordering::Relaxed);
            kb.snapshot()
        };
        let trace = if opts.trace {
            self.tracer.lock().unwrap().clear();
            Some(self.tracer.clone())
        } else {
            None
        };
        let ctx = QueryCtx::new(snapshot, trace, self.spy.clone(), self.messages.clone());

        let variables = query_variables(&goals);
        let goal = Goal::Conj(goals.iter().map(resolve_goal).collect());
        // The top-level barrier is the clause boundary for a bare cut in
        // the query itself: it commits the query, never escapes.
        let solutions = solve(
            &goal,
            &ctx,
            &CutBarrier::new(),
            &crate::bindings::Bindings::new(),
        );
        Query::new(solutions, variables, opts.limit)
    }

    /// Parse and run a query text such as `ancestor(tom, ?d)`.
    pub fn query_str(&self, src: &str, opts: QueryOpts) -> HornResult<Query> {
        let source = Arc::new(Source::new(src));
        let src_id = self.kb.read().unwrap().new_id();
        let goals = parser::parse_query(src_id, &source)?;
        Ok(self.query(goals, opts))
    }

    pub fn export(&self) -> KbExport {
        export_kb(&self.kb.read().unwrap())
    }

    /// Atomically replace the whole knowledge base with an export
    /// payload. Round-trips with `export` are value-preserving.
    pub fn import(&self, payload: &KbExport) -> HornResult<()> {
        let (facts, rules) = import_payload(payload);
        let record = self.kb.write().unwrap().replace_all(facts, rules)?;
        self.notify(record);
        Ok(())
    }

    pub fn watch<F>(&self, id: &str, callback: F)
    where
        F: Fn(&ChangeRecord) + Send + Sync + 'static,
    {
        self.watchers
            .lock()
            .unwrap()
            .insert(id.to_string(), Arc::new(callback));
    }

    pub fn unwatch(&self, id: &str) {
        self.watchers.lock().unwrap().remove(id);
    }

    pub fn next_message(&self) -> Option<Message> {
        self.messages.next()
    }

    // Tracer surface.

    pub fn clear_trace(&self) {
        self.tracer.lock().unwrap().clear();
    }

    pub fn trace_log(&self) -> Vec<TraceEvent> {
        self.tracer.lock().unwrap().events().to_vec()
    }

    pub fn trace_tree(&self) -> Vec<TraceNode> {
        self.tracer.lock().unwrap().nodes().to_vec()
    }

    pub fn export_trace_tree(&self) -> TraceTreeExport {
        self.tracer.lock().unwrap().export_tree()
    }

    pub fn trace_report(&self) -> TraceReport {
        let tracer = self.tracer.lock().unwrap();
        let nodes = tracer.nodes();
        TraceReport {
            log: tracer.events().to_vec(),
            tree: tracer.export_tree(),
            stats: TraceStats {
                nodes: nodes.len(),
                events: tracer.events().len(),
                max_depth: nodes.iter().map(|n| n.depth).max().unwrap_or(0),
            },
        }
    }

    /// Cap the traced tree depth for subsequent queries.
    pub fn set_trace_depth_cap(&self, cap: usize) {
        self.tracer.lock().unwrap().set_depth_cap(cap);
    }

    // Spy surface.

    pub fn spy(&self, predicate: Symbol) {
        self.spy.lock().unwrap().spy(predicate);
    }

    pub fn nospy(&self, predicate: &Symbol) {
        self.spy.lock().unwrap().nospy(predicate);
    }

    pub fn nospy_all(&self) {
        self.spy.lock().unwrap().nospy_all();
    }

    pub fn spy_points(&self) -> Vec<Symbol> {
        self.spy.lock().unwrap().points()
    }

    pub fn spy_log(&self) -> Vec<SpyRecord> {
        self.spy.lock().unwrap().log().to_vec()
    }

    pub fn spy_stats(&self) -> HashMap<Symbol, SpyCounts> {
        self.spy.lock().unwrap().stats().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    fn family() -> Horn {
        let horn = Horn::new();
        horn.load_str(
            r#"
            parent(tom, mary). parent(tom, bob).
            parent(mary, ann). parent(mary, pat).
            parent(bob, jim). parent(bob, liz).
            ancestor(X, Y) :- parent(X, Y).
            ancestor(X, Z) :- parent(X, Y), ancestor(Y, Z).
            "#,
        )
        .unwrap();
        horn
    }

    fn answer_atoms(query: Query, name: &str) -> Vec<String> {
        query
            .map(|answer| match answer[name].value() {
                crate::terms::Value::Atom(a) => a.0.clone(),
                other => panic!("expected atom, got {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_load_and_query() {
        let horn = family();
        let query = horn
            .query_str("ancestor(tom, ?d)", QueryOpts::default())
            .unwrap();
        assert_eq!(
            answer_atoms(query, "d"),
            vec!["mary", "bob", "ann", "pat", "jim", "liz"]
        );
    }

    #[test]
    fn test_query_limit() {
        let horn = family();
        let query = horn
            .query_str(
                "ancestor(tom, ?d)",
                QueryOpts {
                    limit: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(query.count(), 2);
    }

    #[test]
    fn test_stats() {
        let horn = family();
        let _ = horn
            .query_str("parent(tom, ?x)", QueryOpts::default())
            .unwrap()
            .count();
        let stats = horn.stats();
        assert_eq!(stats.total_facts, 6);
        assert_eq!(stats.total_rules, 2);
        assert_eq!(stats.facts_asserted, 6);
        assert_eq!(stats.rules_added, 2);
        assert_eq!(stats.queries, 1);
        assert!(stats.predicates >= 2);
    }

    #[test]
    fn test_export_import_round_trip() {
        let horn = family();
        let payload = horn.export();

        let other = Horn::new();
        other.import(&payload).unwrap();
        assert_eq!(other.stats().total_facts, 6);
        assert_eq!(other.stats().total_rules, 2);

        // The imported rules still resolve.
        let query = other
            .query_str("ancestor(tom, ?d)", QueryOpts::default())
            .unwrap();
        assert_eq!(query.count(), 6);
    }

    #[test]
    fn test_watchers_observe_commits() {
        let horn = Horn::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        horn.watch("count", move |_| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        });

        horn.assert_fact(sym!("p"), terms![1]).unwrap();
        horn.assert_fact(sym!("p"), terms![2]).unwrap();

        // Delivery is asynchronous; give the notifier thread a moment.
        for _ in 0..50 {
            if seen.load(AtomicOrdering::SeqCst) == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 2);

        horn.unwatch("count");
        horn.assert_fact(sym!("p"), terms![3]).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 2);
    }

    #[test]
    fn test_snapshot_isolation_for_streaming_queries() {
        let horn = family();
        let mut query = horn
            .query_str("parent(?x, ?y)", QueryOpts::default())
            .unwrap();

        // Consume two answers, then mutate.
        assert!(query.next().is_some());
        assert!(query.next().is_some());
        horn.assert_fact(sym!("parent"), terms![atom!("new1"), atom!("new2")])
            .unwrap();

        // The in-flight stream still sees exactly the original six.
        assert_eq!(query.count(), 4);

        // A fresh query sees seven.
        let fresh = horn
            .query_str("parent(?x, ?y)", QueryOpts::default())
            .unwrap();
        assert_eq!(fresh.count(), 7);
    }

    #[test]
    fn test_traced_query_produces_report() {
        let horn = family();
        let query = horn
            .query_str(
                "parent(tom, ?x)",
                QueryOpts {
                    trace: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(query.count(), 2);

        let report = horn.trace_report();
        assert!(report.stats.nodes >= 1);
        assert!(report.stats.events >= 2);
        assert_eq!(report.tree.nodes.len(), report.stats.nodes);
    }

    #[test]
    fn test_spy_independent_of_trace() {
        let horn = family();
        horn.spy(sym!("parent"));
        let query = horn
            .query_str("parent(tom, ?x)", QueryOpts::default())
            .unwrap();
        assert_eq!(query.count(), 2);

        let stats = horn.spy_stats();
        let counts = stats.get(&sym!("parent")).unwrap();
        assert_eq!(counts.calls, 1);
        assert_eq!(counts.exits, 2);
        assert!(!horn.spy_log().is_empty());

        horn.nospy_all();
        assert!(horn.spy_points().is_empty());
    }

    #[test]
    fn test_malformed_rule_is_rejected() {
        let horn = Horn::new();
        let err = horn
            .add_rule(sym!("p"), terms![1], terms![2])
            .unwrap_err();
        assert!(err.kind().starts_with("RuntimeError::MalformedClause"));
        assert_eq!(horn.stats().total_rules, 0);
    }
}
