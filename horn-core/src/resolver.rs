/// Turn goal terms into lazy streams of substitutions.
///
/// A goal is a function from a substitution to a stream of extended
/// substitutions; here that is an enum plus `solve`, which returns a
/// boxed iterator. Everything is demand-driven: pulling one answer
/// advances the search just far enough to produce it, and dropping the
/// iterator abandons the branch.
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use crate::bindings::{Bindings, Reifier};
use crate::builtins;
use crate::formatting::ToText;
use crate::kb::{KbSnapshot, Rule};
use crate::messages::{Message, MessageQueue};
use crate::terms::{Compound, Symbol, Term, TermList, Value, Variable};
use crate::trace::{EventKind, Spy, Tracer};
use crate::unify::{unify, unify_all};

pub type Solutions = Box<dyn Iterator<Item = Bindings>>;

/// Everything one query run needs: the KB snapshot taken at first
/// access, the optional tracer, the spy registry and the diagnostics
/// queue. Per-query by construction, so concurrent traced queries
/// cannot cross-contaminate.
pub struct QueryCtx {
    pub snapshot: KbSnapshot,
    pub trace: Option<Arc<Mutex<Tracer>>>,
    pub spy: Arc<Mutex<Spy>>,
    pub messages: MessageQueue,
    /// Table keys currently being materialized; recursive variants fall
    /// back to plain resolution instead of looping.
    tabling_in_progress: RefCell<HashSet<String>>,
}

impl QueryCtx {
    pub fn new(
        snapshot: KbSnapshot,
        trace: Option<Arc<Mutex<Tracer>>>,
        spy: Arc<Mutex<Spy>>,
        messages: MessageQueue,
    ) -> Rc<Self> {
        Rc::new(Self {
            snapshot,
            trace,
            spy,
            messages,
            tabling_in_progress: RefCell::new(HashSet::new()),
        })
    }
}

/// The cut signal. One barrier is created per clause boundary (and one
/// for the query top level); when a `Cut` goal is asked to backtrack it
/// sets the flag, and every stream guarded by the same barrier stops.
#[derive(Clone, Debug, Default)]
pub struct CutBarrier(Rc<Cell<bool>>);

impl CutBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cut(&self) {
        self.0.set(true);
    }

    pub fn is_cut(&self) -> bool {
        self.0.get()
    }
}

#[derive(Clone, Debug)]
pub enum Goal {
    /// Resolve a predicate call against built-ins, then facts, then
    /// rules. Built-ins shadow knowledge-base entries of the same name;
    /// that is a deliberate choice, so `member/2` always means the
    /// built-in even if the KB defines its own.
    Call(Term),
    Unify(Term, Term),
    Conj(Vec<Goal>),
    Disj(Vec<Goal>),
    /// Negation as failure: succeeds with the input substitution when
    /// the inner goal has no solutions. No bindings escape.
    Not(Box<Goal>),
    Once(Box<Goal>),
    /// Soft cut: the first clause whose test yields any solution
    /// commits, and the body runs for every test solution.
    Conda(Vec<(Goal, Goal)>),
    /// Like `Conda`, but only the first solution of the committed test
    /// is kept.
    Condu(Vec<(Goal, Goal)>),
    /// If-then-else: commits to the first solution of the condition.
    Ite(Box<Goal>, Box<Goal>, Box<Goal>),
    Cut,
    True,
    Fail,
}

/// Build a goal from a body or query term. Control constructs get
/// their combinator; everything else is a call.
pub fn resolve_goal(term: &Term) -> Goal {
    match term.value() {
        Value::Atom(a) => match a.0.as_str() {
            "!" => Goal::Cut,
            "true" => Goal::True,
            "fail" | "false" => Goal::Fail,
            _ => Goal::Call(term.clone()),
        },
        Value::Compound(c) => match (c.functor.0.as_str(), c.args.len()) {
            (",", 2) => Goal::Conj(vec![resolve_goal(&c.args[0]), resolve_goal(&c.args[1])]),
            (";", 2) => Goal::Disj(vec![resolve_goal(&c.args[0]), resolve_goal(&c.args[1])]),
            ("not", 1) => Goal::Not(Box::new(resolve_goal(&c.args[0]))),
            ("once", 1) => Goal::Once(Box::new(resolve_goal(&c.args[0]))),
            ("if", 3) => Goal::Ite(
                Box::new(resolve_goal(&c.args[0])),
                Box::new(resolve_goal(&c.args[1])),
                Box::new(resolve_goal(&c.args[2])),
            ),
            ("=", 2) => Goal::Unify(c.args[0].clone(), c.args[1].clone()),
            _ => Goal::Call(term.clone()),
        },
        // A variable goal may be bound to a callable by solve time.
        Value::Variable(_) => Goal::Call(term.clone()),
        _ => Goal::Fail,
    }
}

/// Allocate fresh variables and build a goal over them.
pub fn fresh<F>(names: &[&str], build: F) -> Goal
where
    F: FnOnce(&[Term]) -> Goal,
{
    let vars: Vec<Term> = names
        .iter()
        .map(|name| Term::new_fresh(Value::Variable(Variable::fresh(name))))
        .collect();
    build(&vars)
}

/// Rename every variable in `terms` to a fresh id, consistently across
/// the slice. Used by answer replay and `copy_term/2`.
pub fn rename_apart(terms: &[Term]) -> Vec<Term> {
    let mut renames: HashMap<u64, Variable> = HashMap::new();
    let mut rename = |t: &Term| -> Term {
        if let Value::Variable(v) = t.value() {
            let fresh = renames.entry(v.id).or_insert_with(|| v.renamed()).clone();
            Term::new_fresh(Value::Variable(fresh))
        } else {
            t.clone()
        }
    };
    terms
        .iter()
        .map(|t| t.cloned_map_replace(&mut rename))
        .collect()
}

pub fn solve(goal: &Goal, ctx: &Rc<QueryCtx>, barrier: &CutBarrier, bindings: &Bindings) -> Solutions {
    match goal {
        Goal::True => Box::new(std::iter::once(bindings.clone())),
        Goal::Fail => Box::new(std::iter::empty()),
        Goal::Cut => Box::new(CutStream {
            barrier: barrier.clone(),
            bindings: Some(bindings.clone()),
        }),
        Goal::Unify(left, right) => Box::new(unify(left, right, bindings).into_iter()),
        Goal::Conj(goals) => solve_conj(goals, ctx, barrier, bindings),
        Goal::Disj(goals) => solve_disj(goals, ctx, barrier, bindings),
        Goal::Not(inner) => solve_not(inner, ctx, bindings),
        Goal::Once(inner) => {
            // An opaque scope: a cut inside is local to it.
            Box::new(solve(inner, ctx, &CutBarrier::new(), bindings).take(1))
        }
        Goal::Conda(clauses) => solve_soft_cut(clauses, false, ctx, barrier, bindings),
        Goal::Condu(clauses) => solve_soft_cut(clauses, true, ctx, barrier, bindings),
        Goal::Ite(cond, then, els) => solve_ite(cond, then, els, ctx, barrier, bindings),
        Goal::Call(term) => solve_call(term, ctx, bindings),
    }
}

/// Succeed once; prune the enclosing clause when backtracked past.
struct CutStream {
    barrier: CutBarrier,
    bindings: Option<Bindings>,
}

impl Iterator for CutStream {
    type Item = Bindings;

    fn next(&mut self) -> Option<Bindings> {
        match self.bindings.take() {
            Some(bindings) => Some(bindings),
            None => {
                self.barrier.cut();
                None
            }
        }
    }
}

/// A stream that dies as soon as its barrier is cut.
struct Guard<I> {
    barrier: CutBarrier,
    inner: I,
}

impl<I: Iterator<Item = Bindings>> Iterator for Guard<I> {
    type Item = Bindings;

    fn next(&mut self) -> Option<Bindings> {
        if self.barrier.is_cut() {
            None
        } else {
            self.inner.next()
        }
    }
}

fn solve_conj(
    goals: &[Goal],
    ctx: &Rc<QueryCtx>,
    barrier: &CutBarrier,
    bindings: &Bindings,
) -> Solutions {
    let mut stream: Solutions = Box::new(std::iter::once(bindings.clone()));
    for goal in goals {
        let goal = goal.clone();
        let ctx = ctx.clone();
        let inner_barrier = barrier.clone();
        stream = Box::new(Guard {
            barrier: barrier.clone(),
            inner: stream.flat_map(move |b| Guard {
                barrier: inner_barrier.clone(),
                inner: solve(&goal, &ctx, &inner_barrier, &b),
            }),
        });
    }
    stream
}

struct DisjStream {
    remaining: std::vec::IntoIter<Goal>,
    current: Option<Solutions>,
    ctx: Rc<QueryCtx>,
    barrier: CutBarrier,
    bindings: Bindings,
}

impl Iterator for DisjStream {
    type Item = Bindings;

    fn next(&mut self) -> Option<Bindings> {
        loop {
            if self.barrier.is_cut() {
                return None;
            }
            if let Some(current) = &mut self.current {
                if let Some(bindings) = current.next() {
                    return Some(bindings);
                }
                self.current = None;
            }
            let goal = self.remaining.next()?;
            self.current = Some(solve(&goal, &self.ctx, &self.barrier, &self.bindings));
        }
    }
}

fn solve_disj(
    goals: &[Goal],
    ctx: &Rc<QueryCtx>,
    barrier: &CutBarrier,
    bindings: &Bindings,
) -> Solutions {
    Box::new(DisjStream {
        remaining: goals.to_vec().into_iter(),
        current: None,
        ctx: ctx.clone(),
        barrier: barrier.clone(),
        bindings: bindings.clone(),
    })
}

fn solve_not(inner: &Goal, ctx: &Rc<QueryCtx>, bindings: &Bindings) -> Solutions {
    let inner = inner.clone();
    let ctx = ctx.clone();
    let bindings = bindings.clone();
    let mut decided = false;
    Box::new(std::iter::from_fn(move || {
        if decided {
            return None;
        }
        decided = true;
        let mut stream = solve(&inner, &ctx, &CutBarrier::new(), &bindings);
        match stream.next() {
            Some(_) => None,
            None => Some(bindings.clone()),
        }
    }))
}

fn solve_ite(
    cond: &Goal,
    then: &Goal,
    els: &Goal,
    ctx: &Rc<QueryCtx>,
    barrier: &CutBarrier,
    bindings: &Bindings,
) -> Solutions {
    let (cond, then, els) = (cond.clone(), then.clone(), els.clone());
    let ctx = ctx.clone();
    let barrier = barrier.clone();
    let bindings = bindings.clone();
    let mut branch: Option<Solutions> = None;
    Box::new(std::iter::from_fn(move || {
        if branch.is_none() {
            let mut cond_stream = solve(&cond, &ctx, &CutBarrier::new(), &bindings);
            branch = Some(match cond_stream.next() {
                Some(cond_bindings) => solve(&then, &ctx, &barrier, &cond_bindings),
                None => solve(&els, &ctx, &barrier, &bindings),
            });
        }
        branch.as_mut().and_then(|stream| stream.next())
    }))
}

struct SoftCutStream {
    clauses: std::vec::IntoIter<(Goal, Goal)>,
    committed: Option<Solutions>,
    keep_one: bool,
    ctx: Rc<QueryCtx>,
    barrier: CutBarrier,
    bindings: Bindings,
    done: bool,
}

impl Iterator for SoftCutStream {
    type Item = Bindings;

    fn next(&mut self) -> Option<Bindings> {
        if let Some(committed) = &mut self.committed {
            return committed.next();
        }
        if self.done {
            return None;
        }
        loop {
            let (test, body) = match self.clauses.next() {
                Some(clause) => clause,
                None => {
                    self.done = true;
                    return None;
                }
            };
            let mut test_stream = solve(&test, &self.ctx, &CutBarrier::new(), &self.bindings);
            if let Some(first) = test_stream.next() {
                let test_solutions: Solutions = if self.keep_one {
                    Box::new(std::iter::once(first))
                } else {
                    Box::new(std::iter::once(first).chain(test_stream))
                };
                let ctx = self.ctx.clone();
                let barrier = self.barrier.clone();
                let stream: Solutions = Box::new(
                    test_solutions.flat_map(move |b| solve(&body, &ctx, &barrier, &b)),
                );
                self.committed = Some(stream);
                return self.committed.as_mut().and_then(|s| s.next());
            }
        }
    }
}

fn solve_soft_cut(
    clauses: &[(Goal, Goal)],
    keep_one: bool,
    ctx: &Rc<QueryCtx>,
    barrier: &CutBarrier,
    bindings: &Bindings,
) -> Solutions {
    Box::new(SoftCutStream {
        clauses: clauses.to_vec().into_iter(),
        committed: None,
        keep_one,
        ctx: ctx.clone(),
        barrier: barrier.clone(),
        bindings: bindings.clone(),
        done: false,
    })
}

fn solve_call(term: &Term, ctx: &Rc<QueryCtx>, bindings: &Bindings) -> Solutions {
    let walked = bindings.walk(term);
    let (functor, args) = match walked.value() {
        Value::Compound(Compound { functor, args }) => (functor.clone(), args.clone()),
        Value::Atom(a) => (a.clone(), vec![]),
        _ => return Box::new(std::iter::empty()),
    };

    let trace_node = ctx.trace.as_ref().and_then(|tracer| {
        let deep_args: TermList = args.iter().map(|a| bindings.walk_deep(a)).collect();
        tracer.lock().unwrap().on_call(functor.clone(), deep_args)
    });
    let spied = ctx.spy.lock().unwrap().is_spied(&functor);

    let base: Solutions = if let Some(stream) = builtins::solve_builtin(&functor, &args, ctx, bindings)
    {
        stream
    } else if ctx.snapshot.is_tabled(&functor) {
        solve_tabled(&functor, &args, ctx, bindings)
    } else {
        solve_clauses(&functor, &args, ctx, bindings)
    };

    let stream: Solutions = if spied {
        let deep_args: TermList = args.iter().map(|a| bindings.walk_deep(a)).collect();
        Box::new(SpyStream::open(base, ctx.clone(), functor, deep_args))
    } else {
        base
    };

    match (&ctx.trace, trace_node) {
        (Some(tracer), Some(node)) => Box::new(TraceStream {
            inner: stream,
            tracer: tracer.clone(),
            node,
            yielded: 0,
            exhausted: false,
        }),
        _ => stream,
    }
}

/// All clauses of one predicate: facts first, in snapshot order, then
/// rules in insertion order, each renamed apart before use.
fn solve_clauses(
    functor: &Symbol,
    args: &[Term],
    ctx: &Rc<QueryCtx>,
    bindings: &Bindings,
) -> Solutions {
    let fact_stream = FactStream {
        facts: ctx.snapshot.facts_of(functor),
        index: 0,
        args: args.to_vec(),
        bindings: bindings.clone(),
    };
    let rule_stream = RuleStream {
        rules: ctx.snapshot.rules_of(functor),
        index: 0,
        args: args.to_vec(),
        bindings: bindings.clone(),
        ctx: ctx.clone(),
        current: None,
        current_barrier: None,
        done: false,
    };
    Box::new(fact_stream.chain(rule_stream))
}

struct FactStream {
    facts: Option<Arc<Vec<TermList>>>,
    index: usize,
    args: TermList,
    bindings: Bindings,
}

impl Iterator for FactStream {
    type Item = Bindings;

    fn next(&mut self) -> Option<Bindings> {
        let facts = self.facts.as_ref()?;
        while let Some(tuple) = facts.get(self.index) {
            self.index += 1;
            if tuple.len() == self.args.len() {
                if let Some(bindings) = unify_all(&self.args, tuple, &self.bindings) {
                    return Some(bindings);
                }
            }
        }
        None
    }
}

struct RuleStream {
    rules: Option<Arc<Vec<Arc<Rule>>>>,
    index: usize,
    args: TermList,
    bindings: Bindings,
    ctx: Rc<QueryCtx>,
    current: Option<Solutions>,
    current_barrier: Option<CutBarrier>,
    done: bool,
}

impl Iterator for RuleStream {
    type Item = Bindings;

    fn next(&mut self) -> Option<Bindings> {
        loop {
            if let Some(current) = &mut self.current {
                if let Some(bindings) = current.next() {
                    return Some(bindings);
                }
                self.current = None;
                // A cut fired inside the clause body: the remaining
                // alternatives of this predicate are pruned.
                if self
                    .current_barrier
                    .take()
                    .map_or(false, |barrier| barrier.is_cut())
                {
                    self.done = true;
                }
            }
            if self.done {
                return None;
            }
            let rules = self.rules.as_ref()?;
            let rule = rules.get(self.index)?.clone();
            self.index += 1;
            if rule.params.len() != self.args.len() {
                continue;
            }
            let renamed = rule.renamed_apart();
            if let Some(bindings) = unify_all(&self.args, &renamed.params, &self.bindings) {
                let barrier = CutBarrier::new();
                let body: Vec<Goal> = renamed.body.iter().map(resolve_goal).collect();
                self.current_barrier = Some(barrier.clone());
                self.current = Some(solve_conj(&body, &self.ctx, &barrier, &bindings));
            }
        }
    }
}

/// Replay or build a call-variant table entry.
fn solve_tabled(
    functor: &Symbol,
    args: &[Term],
    ctx: &Rc<QueryCtx>,
    bindings: &Bindings,
) -> Solutions {
    let call = Term::from(Value::Compound(Compound {
        functor: functor.clone(),
        args: args.to_vec(),
    }));
    let key = Reifier::new(bindings).reify(&call).to_text();

    if let Some(answers) = ctx.snapshot.cache.lookup(&key) {
        return replay(answers, args, bindings);
    }

    // A recursive use of the variant being materialized resolves
    // plainly; true fixpoint tabling is out of scope.
    if !ctx.tabling_in_progress.borrow_mut().insert(key.clone()) {
        return solve_clauses(functor, args, ctx, bindings);
    }

    let solutions: Vec<Bindings> = solve_clauses(functor, args, ctx, bindings).collect();
    ctx.tabling_in_progress.borrow_mut().remove(&key);
    let answers: Vec<TermList> = solutions
        .iter()
        .map(|b| args.iter().map(|a| b.walk_deep(a)).collect())
        .collect();
    ctx.snapshot
        .cache
        .insert(ctx.snapshot.cache_generation, key, answers.clone());
    replay(Arc::new(answers), args, bindings)
}

fn replay(answers: Arc<Vec<TermList>>, args: &[Term], bindings: &Bindings) -> Solutions {
    let args = args.to_vec();
    let bindings = bindings.clone();
    let mut index = 0;
    Box::new(std::iter::from_fn(move || {
        while let Some(tuple) = answers.get(index) {
            index += 1;
            // Stored answers may contain variables; keep replays apart.
            let renamed = rename_apart(tuple);
            if let Some(extended) = unify_all(&args, &renamed, &bindings) {
                return Some(extended);
            }
        }
        None
    }))
}

/// Records CALL at open, EXIT per yield, FAIL at exhaustion, REDO on
/// re-pull, into the engine-wide spy log.
struct SpyStream {
    inner: Solutions,
    ctx: Rc<QueryCtx>,
    goal: Symbol,
    args: TermList,
    yielded: u64,
    exhausted: bool,
}

impl SpyStream {
    fn open(inner: Solutions, ctx: Rc<QueryCtx>, goal: Symbol, args: TermList) -> Self {
        let stream = Self {
            inner,
            ctx,
            goal,
            args,
            yielded: 0,
            exhausted: false,
        };
        stream.record(EventKind::Call);
        stream
    }

    fn record(&self, event: EventKind) {
        self.ctx
            .spy
            .lock()
            .unwrap()
            .record(event, self.goal.clone(), self.args.clone());
        self.ctx.messages.push(Message::print(format!(
            "SPY {:?}: {}({})",
            event,
            self.goal.0,
            self.args
                .iter()
                .map(|a| a.to_text())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }
}

impl Iterator for SpyStream {
    type Item = Bindings;

    fn next(&mut self) -> Option<Bindings> {
        if self.exhausted {
            return None;
        }
        if self.yielded > 0 {
            self.record(EventKind::Redo);
        }
        match self.inner.next() {
            Some(bindings) => {
                self.yielded += 1;
                self.record(EventKind::Exit);
                Some(bindings)
            }
            None => {
                self.exhausted = true;
                self.record(EventKind::Fail);
                None
            }
        }
    }
}

/// Feeds the per-query tracer: nested calls made while this stream is
/// being pulled become children of its node.
struct TraceStream {
    inner: Solutions,
    tracer: Arc<Mutex<Tracer>>,
    node: u64,
    yielded: u64,
    exhausted: bool,
}

impl Iterator for TraceStream {
    type Item = Bindings;

    fn next(&mut self) -> Option<Bindings> {
        if self.exhausted {
            return None;
        }
        {
            let mut tracer = self.tracer.lock().unwrap();
            if self.yielded > 0 {
                tracer.on_redo(self.node);
            }
            tracer.push_parent(self.node);
        }
        // The lock is not held while the inner stream runs; nested
        // traced calls need it.
        let item = self.inner.next();
        let mut tracer = self.tracer.lock().unwrap();
        tracer.pop_parent(self.node);
        match &item {
            Some(_) => {
                self.yielded += 1;
                tracer.on_yield(self.node);
            }
            None => {
                self.exhausted = true;
                tracer.on_exhausted(self.node, self.yielded > 0);
            }
        }
        item
    }
}
