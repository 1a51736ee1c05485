use std::collections::{HashMap, HashSet};

use crate::bindings::Reifier;
use crate::resolver::Solutions;
use crate::terms::{Term, Value, Variable};

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOpts {
    pub trace: bool,
    pub limit: Option<usize>,
}

/// A running query: a lazy stream of answers. Each answer maps the
/// query's named variables to reified terms. Dropping the query
/// abandons the search; that is the only cancellation mechanism and the
/// only one needed.
pub struct Query {
    solutions: Solutions,
    variables: Vec<Variable>,
    remaining: Option<usize>,
}

impl Query {
    pub(crate) fn new(solutions: Solutions, variables: Vec<Variable>, limit: Option<usize>) -> Self {
        Self {
            solutions,
            variables,
            remaining: limit,
        }
    }

    /// The named variables this query reports, in first-occurrence order.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }
}

impl Iterator for Query {
    type Item = HashMap<String, Term>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        let bindings = self.solutions.next()?;
        if let Some(remaining) = &mut self.remaining {
            *remaining -= 1;
        }
        // One reifier per answer, so shared unbound variables get the
        // same `_n` name across all reported variables.
        let mut reifier = Reifier::new(&bindings);
        let answer = self
            .variables
            .iter()
            .map(|v| {
                let term = Term::from(Value::Variable(v.clone()));
                (v.name.clone(), reifier.reify(&term))
            })
            .collect();
        Some(answer)
    }
}

/// Collect the named variables of the goal list, in first-occurrence
/// order, one entry per distinct id. Anonymous `_` variables are not
/// reported.
pub(crate) fn query_variables(goals: &[Term]) -> Vec<Variable> {
    let mut seen = HashSet::new();
    let mut ordered = vec![];
    for goal in goals {
        goal.cloned_map_replace(&mut |term| {
            if let Value::Variable(v) = term.value() {
                if v.name != "_" && seen.insert(v.id) {
                    ordered.push(v.clone());
                }
            }
            term.clone()
        });
    }
    ordered
}
