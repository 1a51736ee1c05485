use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::numerics::Numeric;
use super::sources::SourceInfo;

/// A symbolic constant. Atoms, predicate names and functors are all
/// symbols, compared by value.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }
}

static NEXT_VAR_ID: AtomicU64 = AtomicU64::new(1);

/// A logic variable. Identity is the `id`; the `name` is only for
/// presentation. Two variables with the same name but different ids are
/// distinct, and every textual occurrence of a variable within one
/// clause or query shares one id.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Variable {
    pub name: String,
    pub id: u64,
}

impl Variable {
    /// Allocate a variable with a fresh process-unique id.
    pub fn fresh<T: AsRef<str>>(name: T) -> Self {
        Self {
            name: name.as_ref().to_string(),
            id: NEXT_VAR_ID.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Same printable name, new identity. Used when a clause is renamed
    /// apart before resolution.
    pub fn renamed(&self) -> Self {
        Self::fresh(&self.name)
    }
}

pub type TermList = Vec<Term>;

/// A list with a fixed prefix and an optional open tail, so `[H|T]`
/// patterns unify structurally. A closed list has `rest: None`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct List {
    pub elements: TermList,
    pub rest: Option<Box<Term>>,
}

impl List {
    pub fn new(elements: TermList) -> Self {
        Self {
            elements,
            rest: None,
        }
    }

    pub fn with_rest(elements: TermList, rest: Term) -> Self {
        Self {
            elements,
            rest: Some(Box::new(rest)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.rest.is_none()
    }
}

/// A compound term: functor plus ordered arguments.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Compound {
    pub functor: Symbol,
    pub args: TermList,
}

impl Compound {
    pub fn new(functor: Symbol, args: TermList) -> Self {
        Self { functor, args }
    }
}

/// Map keys are restricted to atoms and integers so maps have a
/// canonical ordering.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum MapKey {
    Atom(Symbol),
    Int(i64),
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Value {
    Atom(Symbol),
    Number(Numeric),
    String(String),
    Variable(Variable),
    List(List),
    Compound(Compound),
    Map(BTreeMap<MapKey, Term>),
}

impl Value {
    pub fn as_atom(&self) -> Option<&Symbol> {
        match self {
            Value::Atom(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Value::Variable(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Numeric> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_compound(&self) -> Option<&Compound> {
        match self {
            Value::Compound(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_ground(&self) -> bool {
        match self {
            Value::Variable(_) => false,
            Value::Atom(_) | Value::Number(_) | Value::String(_) => true,
            Value::List(List { elements, rest }) => {
                elements.iter().all(|t| t.is_ground())
                    && rest.as_ref().map_or(true, |r| r.is_ground())
            }
            Value::Compound(Compound { args, .. }) => args.iter().all(|t| t.is_ground()),
            Value::Map(fields) => fields.values().all(|t| t.is_ground()),
        }
    }
}

/// A term: shared immutable value plus provenance.
#[derive(Debug, Clone)]
pub struct Term {
    /// Information about where the term was created from
    source_info: SourceInfo,

    /// The actual underlying value
    value: Arc<Value>,
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Term {}

impl Hash for Term {
    /// Hash just the value, not source information.
    fn hash<H>(&self, state: &mut H)
    where
        H: Hasher,
    {
        self.value().hash(state)
    }
}

impl From<Value> for Term {
    fn from(value: Value) -> Self {
        Self {
            source_info: SourceInfo::Api,
            value: Arc::new(value),
        }
    }
}

impl Term {
    /// Creates a new term from the parser
    pub fn new_from_parser(src_id: u64, left: usize, right: usize, value: Value) -> Self {
        Self {
            source_info: SourceInfo::Parser {
                src_id,
                left,
                right,
            },
            value: Arc::new(value),
        }
    }

    /// Creates a new term from a test value
    pub fn new_from_test(value: Value) -> Self {
        Self {
            source_info: SourceInfo::Test,
            value: Arc::new(value),
        }
    }

    /// Creates a term produced by clause renaming
    pub fn new_fresh(value: Value) -> Self {
        Self {
            source_info: SourceInfo::Fresh,
            value: Arc::new(value),
        }
    }

    /// Create a new Term, cloning the source info of `self`
    /// but with the new `value`
    pub fn clone_with_value(&self, value: Value) -> Self {
        Self {
            source_info: self.source_info.clone(),
            value: Arc::new(value),
        }
    }

    /// Replace the `value` of self
    pub fn replace_value(&mut self, value: Value) {
        self.value = Arc::new(value);
    }

    /// Convenience wrapper around map_replace that clones the
    /// term before running `map_replace`, to return the new value
    pub fn cloned_map_replace<F>(&self, f: &mut F) -> Self
    where
        F: FnMut(&Term) -> Term,
    {
        let mut term = self.clone();
        term.map_replace(f);
        term
    }

    /// Visits every term in the tree, replaces the node with the evaluation of `f` on the node
    /// and then recurses to the children
    pub fn map_replace<F>(&mut self, f: &mut F)
    where
        F: FnMut(&Term) -> Term,
    {
        *self = f(self);
        let mut value = self.value().clone();
        match value {
            Value::Atom(_) | Value::Number(_) | Value::String(_) | Value::Variable(_) => {}
            Value::List(List {
                ref mut elements,
                ref mut rest,
            }) => {
                elements.iter_mut().for_each(|t| t.map_replace(f));
                if let Some(rest) = rest {
                    rest.map_replace(f);
                }
            }
            Value::Compound(Compound { ref mut args, .. }) => {
                args.iter_mut().for_each(|a| a.map_replace(f))
            }
            Value::Map(ref mut fields) => {
                fields.iter_mut().for_each(|(_, v)| v.map_replace(f))
            }
        };
        self.replace_value(value);
    }

    /// Get a reference to the underlying data of this term
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is_ground(&self) -> bool {
        self.value().is_ground()
    }

    /// Get a set of all the variables used within a term.
    pub fn variables(&self, vars: &mut HashSet<Variable>) {
        self.cloned_map_replace(&mut |term| {
            if let Value::Variable(v) = term.value() {
                vars.insert(v.clone());
            }
            term.clone()
        });
    }

    pub fn offset(&self) -> usize {
        if let SourceInfo::Parser { left, .. } = self.source_info {
            left
        } else {
            0
        }
    }

    pub fn span(&self) -> Option<(usize, usize)> {
        if let SourceInfo::Parser { left, right, .. } = self.source_info {
            Some((left, right))
        } else {
            None
        }
    }

    pub fn get_source_id(&self) -> Option<u64> {
        if let SourceInfo::Parser { src_id, .. } = self.source_info {
            Some(src_id)
        } else {
            None
        }
    }
}
