/// Manage substitution state during resolution.
///
/// A `Bindings` value maps variable ids to terms. Each resolution branch
/// owns an immutable snapshot; extending produces a new value, so
/// backtracking is just dropping the extension and resuming from the
/// parent. No cycle is ever stored: `extend` runs the occurs check.
use std::collections::HashMap;

use crate::terms::{Compound, List, Term, TermList, Value, Variable};

#[derive(Clone, Debug, Default)]
pub struct Bindings {
    map: HashMap<u64, Term>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Look up the direct image of a variable, without chasing chains.
    pub fn lookup(&self, variable: &Variable) -> Option<&Term> {
        self.map.get(&variable.id)
    }

    /// If `term` is a variable bound here, follow the chain of bindings
    /// until a non-variable or an unbound variable is reached.
    pub fn walk(&self, term: &Term) -> Term {
        let mut current = term.clone();
        loop {
            let next = match current.value() {
                Value::Variable(v) => self.map.get(&v.id).cloned(),
                _ => None,
            };
            match next {
                Some(t) => current = t,
                None => return current,
            }
        }
    }

    /// Splice a bound rest into the fixed prefix: `[1 | T]` with
    /// `T ↦ [2, 3]` resolves to `[1, 2, 3]`. An unbound rest stays.
    pub fn resolve_list(&self, list: &List) -> List {
        let mut elements = list.elements.clone();
        let mut rest = list.rest.clone();
        while let Some(tail) = rest {
            let walked = self.walk(&tail);
            match walked.value() {
                Value::List(inner) => {
                    elements.extend(inner.elements.iter().cloned());
                    rest = inner.rest.clone();
                }
                _ => return List::with_rest(elements, walked.clone()),
            }
        }
        List::new(elements)
    }

    /// Deep walk: produce a term with every discoverable binding inlined.
    pub fn walk_deep(&self, term: &Term) -> Term {
        let walked = self.walk(term);
        match walked.value() {
            Value::List(list) => {
                let list = self.resolve_list(list);
                let elements = list.elements.iter().map(|i| self.walk_deep(i)).collect();
                let rest = list
                    .rest
                    .as_ref()
                    .map(|r| Box::new(self.walk_deep(r)));
                walked.clone_with_value(Value::List(List { elements, rest }))
            }
            Value::Compound(Compound { functor, args }) => {
                let args = args.iter().map(|a| self.walk_deep(a)).collect();
                walked.clone_with_value(Value::Compound(Compound {
                    functor: functor.clone(),
                    args,
                }))
            }
            Value::Map(fields) => {
                let fields = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.walk_deep(v)))
                    .collect();
                walked.clone_with_value(Value::Map(fields))
            }
            _ => walked,
        }
    }

    /// The fully resolved elements of a closed list, or `None` when the
    /// term is not a list or still has an open tail. List built-ins
    /// operate on what this returns.
    pub fn walk_list(&self, term: &Term) -> Option<TermList> {
        match self.walk(term).value() {
            Value::List(list) => {
                let resolved = self.resolve_list(list);
                resolved.is_closed().then(|| resolved.elements)
            }
            _ => None,
        }
    }

    /// True if `variable` occurs anywhere inside `term` under this
    /// substitution.
    pub fn occurs(&self, variable: &Variable, term: &Term) -> bool {
        let walked = self.walk(term);
        match walked.value() {
            Value::Variable(v) => v.id == variable.id,
            Value::List(List { elements, rest }) => {
                elements.iter().any(|i| self.occurs(variable, i))
                    || rest.as_ref().map_or(false, |r| self.occurs(variable, r))
            }
            Value::Compound(Compound { args, .. }) => {
                args.iter().any(|a| self.occurs(variable, a))
            }
            Value::Map(fields) => fields.values().any(|v| self.occurs(variable, v)),
            _ => false,
        }
    }

    /// Bind `variable` to `term` in a new substitution. Returns `None`
    /// when the binding would create a cycle.
    pub fn extend(&self, variable: &Variable, term: Term) -> Option<Bindings> {
        if self.occurs(variable, &term) {
            return None;
        }
        let mut map = self.map.clone();
        map.insert(variable.id, term);
        Some(Bindings { map })
    }
}

/// Names still-unbound variables `_0`, `_1`, … in first-encounter order
/// while deep-walking, so the same terminal substitution always reifies
/// to the same output.
pub struct Reifier<'a> {
    bindings: &'a Bindings,
    names: HashMap<u64, String>,
}

impl<'a> Reifier<'a> {
    pub fn new(bindings: &'a Bindings) -> Self {
        Self {
            bindings,
            names: HashMap::new(),
        }
    }

    pub fn reify(&mut self, term: &Term) -> Term {
        let walked = self.bindings.walk(term);
        match walked.value() {
            Value::Variable(v) => {
                let next = self.names.len();
                let name = self
                    .names
                    .entry(v.id)
                    .or_insert_with(|| format!("_{}", next))
                    .clone();
                walked.clone_with_value(Value::Variable(Variable { name, id: v.id }))
            }
            Value::List(list) => {
                let list = self.bindings.resolve_list(list);
                let elements = list.elements.iter().map(|i| self.reify(i)).collect();
                let rest = list.rest.as_ref().map(|r| Box::new(self.reify(r)));
                walked.clone_with_value(Value::List(List { elements, rest }))
            }
            Value::Compound(Compound { functor, args }) => {
                let args = args.iter().map(|a| self.reify(a)).collect();
                walked.clone_with_value(Value::Compound(Compound {
                    functor: functor.clone(),
                    args,
                }))
            }
            Value::Map(fields) => {
                let fields = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.reify(v)))
                    .collect();
                walked.clone_with_value(Value::Map(fields))
            }
            _ => walked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terms::Variable;

    #[test]
    fn test_walk_follows_chains() {
        let x = Variable::fresh("x");
        let y = Variable::fresh("y");
        let bindings = Bindings::new()
            .extend(&x, Term::from(Value::Variable(y.clone())))
            .unwrap()
            .extend(&y, term!(1))
            .unwrap();

        let walked = bindings.walk(&Term::from(Value::Variable(x)));
        assert_eq!(walked, term!(1));
    }

    #[test]
    fn test_walk_deep_inlines_structures() {
        let x = Variable::fresh("x");
        let xt = Term::from(Value::Variable(x.clone()));
        let bindings = Bindings::new().extend(&x, term!(2)).unwrap();

        let t = term!(call!("f", [1, xt]));
        assert_eq!(bindings.walk_deep(&t), term!(call!("f", [1, 2])));
    }

    #[test]
    fn test_extend_occurs_check() {
        let x = Variable::fresh("x");
        let xt = Term::from(Value::Variable(x.clone()));

        // x -> [x] must fail
        let list = term!(value!([xt.clone()]));
        assert!(Bindings::new().extend(&x, list).is_none());

        // x -> x must fail too
        assert!(Bindings::new().extend(&x, xt).is_none());
    }

    #[test]
    fn test_reify_names_in_encounter_order() {
        let x = Variable::fresh("x");
        let y = Variable::fresh("y");
        let t = term!(call!(
            "f",
            [
                Term::from(Value::Variable(x.clone())),
                Term::from(Value::Variable(y)),
                Term::from(Value::Variable(x))
            ]
        ));

        let bindings = Bindings::new();
        let mut reifier = Reifier::new(&bindings);
        let reified = reifier.reify(&t);
        let args = match reified.value() {
            Value::Compound(c) => &c.args,
            _ => panic!("expected compound"),
        };
        assert_eq!(args[0].value().as_variable().unwrap().name, "_0");
        assert_eq!(args[1].value().as_variable().unwrap().name, "_1");
        assert_eq!(args[2].value().as_variable().unwrap().name, "_0");

        // Reifying again produces identical output.
        let again = Reifier::new(&bindings).reify(&t);
        assert_eq!(reified, again);
    }
}
