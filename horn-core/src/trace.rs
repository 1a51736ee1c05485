use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::formatting::ToText;
use crate::kb::{now_ms, Counter};
use crate::terms::{Symbol, TermList};

/// Calls nested deeper than this run without trace wrapping.
pub const DEFAULT_DEPTH_CAP: usize = 50;

/// Result counts on trace nodes stop incrementing here; the counts are
/// for display, not bookkeeping.
pub const RESULT_COUNT_CAP: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Pending,
    Success,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Call,
    Exit,
    Fail,
    Redo,
}

/// One attempted goal in the inference tree.
#[derive(Debug, Clone, Serialize)]
pub struct TraceNode {
    pub id: u64,
    pub predicate: Symbol,
    /// Arguments as they looked at call time, deep-walked.
    pub args: TermList,
    pub parent: Option<u64>,
    pub depth: usize,
    pub status: TraceStatus,
    /// Incremented on each yield, capped, stamped at exit.
    pub results: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub kind: EventKind,
    pub goal: Symbol,
    pub args: TermList,
    pub depth: usize,
    pub timestamp_ms: u64,
    pub node_id: u64,
}

/// Export shape consumed by the browser visualizer.
#[derive(Debug, Clone, Serialize)]
pub struct TraceTreeExport {
    pub nodes: Vec<ExportNode>,
    pub links: Vec<ExportLink>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportNode {
    pub id: u64,
    pub label: String,
    pub args: Vec<String>,
    pub status: TraceStatus,
    pub depth: usize,
    pub parent: Option<u64>,
    pub results: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportLink {
    pub source: u64,
    pub target: u64,
    pub label: String,
}

/// Per-query trace collector. The engine clears it when a traced query
/// starts; the resolver feeds it through `on_call`/`on_yield`/
/// `on_exhausted` while the solution stream is pulled.
#[derive(Debug, Default)]
pub struct Tracer {
    nodes: Vec<TraceNode>,
    index: HashMap<u64, usize>,
    events: Vec<TraceEvent>,
    stack: Vec<u64>,
    depth_cap: Option<usize>,
    counter: Counter,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.index.clear();
        self.events.clear();
        self.stack.clear();
    }

    pub fn set_depth_cap(&mut self, cap: usize) {
        self.depth_cap = Some(cap);
    }

    fn cap(&self) -> usize {
        self.depth_cap.unwrap_or(DEFAULT_DEPTH_CAP)
    }

    /// Open a node for a call about to run. Returns `None` when the
    /// tree is already at the depth cap; the goal then runs unwrapped.
    pub fn on_call(&mut self, predicate: Symbol, args: TermList) -> Option<u64> {
        let depth = self.stack.len();
        if depth >= self.cap() {
            return None;
        }
        let id = self.counter.next();
        let node = TraceNode {
            id,
            predicate: predicate.clone(),
            args: args.clone(),
            parent: self.stack.last().copied(),
            depth,
            status: TraceStatus::Pending,
            results: 0,
        };
        self.index.insert(id, self.nodes.len());
        self.nodes.push(node);
        self.log(EventKind::Call, predicate, args, depth, id);
        Some(id)
    }

    /// Enter a node's dynamic extent: nested calls made while pulling
    /// its stream become its children.
    pub fn push_parent(&mut self, id: u64) {
        self.stack.push(id);
    }

    pub fn pop_parent(&mut self, id: u64) {
        debug_assert_eq!(self.stack.last(), Some(&id));
        self.stack.pop();
    }

    pub fn on_redo(&mut self, id: u64) {
        if let Some(node) = self.node(id) {
            let (goal, args, depth) = (node.predicate.clone(), node.args.clone(), node.depth);
            self.log(EventKind::Redo, goal, args, depth, id);
        }
    }

    /// A solution came out of the node's stream.
    pub fn on_yield(&mut self, id: u64) {
        if let Some(node) = self.node_mut(id) {
            if node.results < RESULT_COUNT_CAP {
                node.results += 1;
            }
        }
    }

    /// The node's stream is exhausted; stamp the final status.
    pub fn on_exhausted(&mut self, id: u64, succeeded: bool) {
        let entry = match self.node_mut(id) {
            Some(node) => {
                node.status = if succeeded {
                    TraceStatus::Success
                } else {
                    TraceStatus::Fail
                };
                (node.predicate.clone(), node.args.clone(), node.depth)
            }
            None => return,
        };
        let kind = if succeeded {
            EventKind::Exit
        } else {
            EventKind::Fail
        };
        self.log(kind, entry.0, entry.1, entry.2, id);
    }

    fn log(&mut self, kind: EventKind, goal: Symbol, args: TermList, depth: usize, node_id: u64) {
        self.events.push(TraceEvent {
            kind,
            goal,
            args,
            depth,
            timestamp_ms: now_ms(),
            node_id,
        });
    }

    fn node(&self, id: u64) -> Option<&TraceNode> {
        self.index.get(&id).map(|i| &self.nodes[*i])
    }

    fn node_mut(&mut self, id: u64) -> Option<&mut TraceNode> {
        let i = *self.index.get(&id)?;
        Some(&mut self.nodes[i])
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn nodes(&self) -> &[TraceNode] {
        &self.nodes
    }

    /// Flatten the parent-linked tree into the `{nodes, links}` shape
    /// the visualizer renders.
    pub fn export_tree(&self) -> TraceTreeExport {
        let nodes = self
            .nodes
            .iter()
            .map(|n| ExportNode {
                id: n.id,
                label: n.predicate.0.clone(),
                args: n.args.iter().map(|a| a.to_text()).collect(),
                status: n.status,
                depth: n.depth,
                parent: n.parent,
                results: n.results,
            })
            .collect();
        let links = self
            .nodes
            .iter()
            .filter_map(|n| {
                n.parent.map(|parent| ExportLink {
                    source: parent,
                    target: n.id,
                    label: "call".to_string(),
                })
            })
            .collect();
        TraceTreeExport { nodes, links }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SpyRecord {
    pub event: EventKind,
    pub goal: Symbol,
    pub args: TermList,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SpyCounts {
    pub calls: u64,
    pub exits: u64,
    pub fails: u64,
    pub redos: u64,
}

/// Per-predicate debug triggers, independent of general tracing. A
/// spied predicate logs every CALL/EXIT/FAIL/REDO it sees, with
/// per-event counts.
#[derive(Debug, Default)]
pub struct Spy {
    points: HashSet<Symbol>,
    log: Vec<SpyRecord>,
    stats: HashMap<Symbol, SpyCounts>,
}

impl Spy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spy(&mut self, predicate: Symbol) {
        self.points.insert(predicate);
    }

    pub fn nospy(&mut self, predicate: &Symbol) {
        self.points.remove(predicate);
    }

    pub fn nospy_all(&mut self) {
        self.points.clear();
    }

    pub fn is_spied(&self, predicate: &Symbol) -> bool {
        self.points.contains(predicate)
    }

    pub fn points(&self) -> Vec<Symbol> {
        let mut points: Vec<_> = self.points.iter().cloned().collect();
        points.sort();
        points
    }

    pub fn record(&mut self, event: EventKind, goal: Symbol, args: TermList) {
        let counts = self.stats.entry(goal.clone()).or_default();
        match event {
            EventKind::Call => counts.calls += 1,
            EventKind::Exit => counts.exits += 1,
            EventKind::Fail => counts.fails += 1,
            EventKind::Redo => counts.redos += 1,
        }
        self.log.push(SpyRecord {
            event,
            goal,
            args,
            timestamp_ms: now_ms(),
        });
    }

    pub fn log(&self) -> &[SpyRecord] {
        &self.log
    }

    pub fn stats(&self) -> &HashMap<Symbol, SpyCounts> {
        &self.stats
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
        self.stats.clear();
    }
}
