/// Two-way unification. Produces the most general unifier as an
/// extended substitution, or `None` — failure is a value that drives
/// backtracking, never an error.
use crate::bindings::Bindings;
use crate::terms::{List, Term, Value};

pub fn unify(left: &Term, right: &Term, bindings: &Bindings) -> Option<Bindings> {
    let left = bindings.walk(left);
    let right = bindings.walk(right);
    match (left.value(), right.value()) {
        // Same variable on both sides; nothing to record.
        (Value::Variable(l), Value::Variable(r)) if l.id == r.id => Some(bindings.clone()),

        // Bind the left variable to the right term. Direction does not
        // affect correctness; keeping it fixed keeps traces stable.
        (Value::Variable(l), _) => bindings.extend(l, right.clone()),
        (_, Value::Variable(r)) => bindings.extend(r, left.clone()),

        (Value::Atom(a), Value::Atom(b)) if a == b => Some(bindings.clone()),
        (Value::Number(a), Value::Number(b)) if a == b => Some(bindings.clone()),
        (Value::String(a), Value::String(b)) if a == b => Some(bindings.clone()),

        (Value::List(a), Value::List(b)) => unify_lists(a, b, bindings),

        (Value::Compound(a), Value::Compound(b))
            if a.functor == b.functor && a.args.len() == b.args.len() =>
        {
            unify_all(&a.args, &b.args, bindings)
        }

        (Value::Map(a), Value::Map(b)) if a.len() == b.len() => {
            let mut bindings = bindings.clone();
            for (key, left_value) in a {
                let right_value = b.get(key)?;
                bindings = unify(left_value, right_value, &bindings)?;
            }
            Some(bindings)
        }

        _ => None,
    }
}

/// Unify two lists element-wise. An open tail (`[H|T]` style) absorbs
/// the other side's remaining elements.
fn unify_lists(left: &List, right: &List, bindings: &Bindings) -> Option<Bindings> {
    let left = bindings.resolve_list(left);
    let right = bindings.resolve_list(right);
    let prefix = left.elements.len().min(right.elements.len());

    match (&left.rest, &right.rest) {
        (None, None) if left.elements.len() != right.elements.len() => None,
        _ if left.elements.len() > right.elements.len() && right.rest.is_none() => None,
        _ if right.elements.len() > left.elements.len() && left.rest.is_none() => None,
        _ => {
            let bindings = unify_all(
                &left.elements[..prefix],
                &right.elements[..prefix],
                bindings,
            )?;
            // Whichever side ran out of fixed elements unifies its rest
            // with the remainder of the other.
            let left_remainder = remainder(&left, prefix);
            let right_remainder = remainder(&right, prefix);
            match (left_remainder, right_remainder) {
                (None, None) => Some(bindings),
                (Some(rest), None) => {
                    let tail = Term::from(Value::List(List {
                        elements: right.elements[prefix..].to_vec(),
                        rest: right.rest.clone(),
                    }));
                    unify(&rest, &tail, &bindings)
                }
                (None, Some(rest)) => {
                    let tail = Term::from(Value::List(List {
                        elements: left.elements[prefix..].to_vec(),
                        rest: left.rest.clone(),
                    }));
                    unify(&tail, &rest, &bindings)
                }
                (Some(left_rest), Some(right_rest)) => {
                    unify(&left_rest, &right_rest, &bindings)
                }
            }
        }
    }
}

/// The rest term of a side whose fixed elements are exhausted at
/// `prefix`, if it has one.
fn remainder(list: &List, prefix: usize) -> Option<Term> {
    if list.elements.len() == prefix {
        list.rest.as_deref().cloned()
    } else {
        None
    }
}

/// Unify two sequences element-wise, threading the substitution.
/// The caller has already checked the lengths match.
pub fn unify_all(lefts: &[Term], rights: &[Term], bindings: &Bindings) -> Option<Bindings> {
    debug_assert_eq!(lefts.len(), rights.len());
    let mut bindings = bindings.clone();
    for (left, right) in lefts.iter().zip(rights) {
        bindings = unify(left, right, &bindings)?;
    }
    Some(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terms::{MapKey, Variable};

    fn var_term(v: &Variable) -> Term {
        Term::from(Value::Variable(v.clone()))
    }

    #[test]
    fn test_ground_unification() {
        let b = Bindings::new();
        assert!(unify(&term!(atom!("a")), &term!(atom!("a")), &b).is_some());
        assert!(unify(&term!(atom!("a")), &term!(atom!("b")), &b).is_none());
        assert!(unify(&term!(1), &term!(1), &b).is_some());
        assert!(unify(&term!(1), &term!(2), &b).is_none());
        assert!(unify(&term!("s"), &term!("s"), &b).is_some());
        assert!(unify(&term!("s"), &term!(atom!("s")), &b).is_none());
    }

    #[test]
    fn test_variable_binding() {
        let x = Variable::fresh("x");
        let b = unify(&var_term(&x), &term!(42), &Bindings::new()).unwrap();
        assert_eq!(b.walk(&var_term(&x)), term!(42));

        // Symmetric.
        let y = Variable::fresh("y");
        let b = unify(&term!(42), &var_term(&y), &Bindings::new()).unwrap();
        assert_eq!(b.walk(&var_term(&y)), term!(42));
    }

    #[test]
    fn test_unification_soundness() {
        // If unify succeeds, both sides walk to the same term.
        let x = Variable::fresh("x");
        let y = Variable::fresh("y");
        let left = term!(call!("f", [var_term(&x), 2]));
        let right = term!(call!("f", [1, var_term(&y)]));
        let b = unify(&left, &right, &Bindings::new()).unwrap();
        assert_eq!(b.walk_deep(&left), b.walk_deep(&right));
    }

    #[test]
    fn test_compound_mismatch() {
        let b = Bindings::new();
        assert!(unify(
            &term!(call!("f", [1])),
            &term!(call!("g", [1])),
            &b
        )
        .is_none());
        assert!(unify(
            &term!(call!("f", [1])),
            &term!(call!("f", [1, 2])),
            &b
        )
        .is_none());
    }

    #[test]
    fn test_list_elementwise() {
        let x = Variable::fresh("x");
        let b = unify(
            &term!(value!([1, var_term(&x), 3])),
            &term!(value!([1, 2, 3])),
            &Bindings::new(),
        )
        .unwrap();
        assert_eq!(b.walk(&var_term(&x)), term!(2));

        assert!(unify(
            &term!(value!([1, 2])),
            &term!(value!([1, 2, 3])),
            &Bindings::new()
        )
        .is_none());
    }

    #[test]
    fn test_map_pointwise() {
        let x = Variable::fresh("x");
        let left = term!(btreemap! {
            MapKey::Atom(sym!("name")) => term!("ann"),
            MapKey::Atom(sym!("age")) => var_term(&x),
        });
        let right = term!(btreemap! {
            MapKey::Atom(sym!("name")) => term!("ann"),
            MapKey::Atom(sym!("age")) => term!(7),
        });
        let b = unify(&left, &right, &Bindings::new()).unwrap();
        assert_eq!(b.walk(&var_term(&x)), term!(7));

        // Different key sets never unify.
        let other = term!(btreemap! {
            MapKey::Atom(sym!("name")) => term!("ann"),
        });
        assert!(unify(&left, &other, &Bindings::new()).is_none());
    }

    #[test]
    fn test_occurs_check() {
        let x = Variable::fresh("x");
        let containing = term!(value!([var_term(&x)]));
        assert!(unify(&var_term(&x), &containing, &Bindings::new()).is_none());
        assert!(unify(&containing, &var_term(&x), &Bindings::new()).is_none());
    }
}
