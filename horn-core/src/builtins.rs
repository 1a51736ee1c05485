/// Built-in predicates, dispatched on name and arity before the
/// knowledge base is consulted. Built-ins inspect their arguments
/// through `walk`/`walk_deep` and yield zero or more extended
/// substitutions; unbound operands and arithmetic domain errors fail
/// the branch silently instead of raising.
use std::cmp::Ordering;
use std::rc::Rc;

use crate::bindings::Bindings;
use crate::numerics::Numeric;
use crate::resolver::{rename_apart, resolve_goal, solve, CutBarrier, QueryCtx, Solutions};
use crate::terms::{List, Symbol, Term, TermList, Value, Variable};
use crate::unify::unify;

pub fn solve_builtin(
    functor: &Symbol,
    args: &[Term],
    ctx: &Rc<QueryCtx>,
    bindings: &Bindings,
) -> Option<Solutions> {
    let stream: Solutions = match (functor.0.as_str(), args.len()) {
        ("true", 0) => Box::new(std::iter::once(bindings.clone())),
        ("fail", 0) | ("false", 0) => Box::new(std::iter::empty()),
        ("repeat", 0) => Box::new(std::iter::repeat(bindings.clone())),

        ("=", 2) => Box::new(unify(&args[0], &args[1], bindings).into_iter()),
        ("==", 2) => boolean(
            bindings,
            bindings.walk_deep(&args[0]) == bindings.walk_deep(&args[1]),
        ),
        ("\\==", 2) => boolean(
            bindings,
            bindings.walk_deep(&args[0]) != bindings.walk_deep(&args[1]),
        ),

        ("is", 2) => is_2(args, bindings),
        ("<", 2) => compare(args, bindings, |o| o == Ordering::Less),
        (">", 2) => compare(args, bindings, |o| o == Ordering::Greater),
        ("=<", 2) => compare(args, bindings, |o| o != Ordering::Greater),
        (">=", 2) => compare(args, bindings, |o| o != Ordering::Less),
        ("=:=", 2) => compare(args, bindings, |o| o == Ordering::Equal),
        ("=\\=", 2) => compare(args, bindings, |o| o != Ordering::Equal),

        ("member", 2) => member_2(args, bindings),
        ("append", 3) => append_3(args, bindings),
        ("length", 2) => length_2(args, bindings),
        ("nth", 3) => nth_3(args, bindings),
        ("reverse", 2) => reverse_2(args, bindings),
        ("first", 2) => first_2(args, bindings),
        ("rest", 2) => rest_2(args, bindings),
        ("cons", 3) => cons_3(args, bindings),
        ("empty", 1) => boolean(
            bindings,
            bindings.walk_list(&args[0]).map_or(false, |l| l.is_empty()),
        ),
        ("non_empty", 1) => boolean(
            bindings,
            bindings.walk_list(&args[0]).map_or(false, |l| !l.is_empty()),
        ),

        ("number", 1) => boolean(
            bindings,
            matches!(bindings.walk(&args[0]).value(), Value::Number(_)),
        ),
        ("integer", 1) => boolean(
            bindings,
            matches!(
                bindings.walk(&args[0]).value(),
                Value::Number(Numeric::Integer(_))
            ),
        ),
        ("atom", 1) => boolean(
            bindings,
            matches!(bindings.walk(&args[0]).value(), Value::Atom(_)),
        ),
        ("is_list", 1) => boolean(bindings, bindings.walk_list(&args[0]).is_some()),
        ("var", 1) => boolean(
            bindings,
            matches!(bindings.walk(&args[0]).value(), Value::Variable(_)),
        ),
        ("nonvar", 1) => boolean(
            bindings,
            !matches!(bindings.walk(&args[0]).value(), Value::Variable(_)),
        ),
        ("ground", 1) => boolean(bindings, bindings.walk_deep(&args[0]).is_ground()),

        ("findall", 3) => findall_3(args, ctx, bindings),
        ("between", 3) => between_3(args, bindings),
        ("copy_term", 2) => copy_term_2(args, bindings),

        // These normally become combinators in `resolve_goal`; they are
        // kept here so a goal bound through a variable still works.
        ("not", 1) => solve(
            &crate::resolver::Goal::Not(Box::new(resolve_goal(&bindings.walk(&args[0])))),
            ctx,
            &CutBarrier::new(),
            bindings,
        ),
        ("once", 1) => solve(
            &crate::resolver::Goal::Once(Box::new(resolve_goal(&bindings.walk(&args[0])))),
            ctx,
            &CutBarrier::new(),
            bindings,
        ),
        ("if", 3) => solve(
            &crate::resolver::Goal::Ite(
                Box::new(resolve_goal(&bindings.walk(&args[0]))),
                Box::new(resolve_goal(&bindings.walk(&args[1]))),
                Box::new(resolve_goal(&bindings.walk(&args[2]))),
            ),
            ctx,
            &CutBarrier::new(),
            bindings,
        ),

        _ => return None,
    };
    Some(stream)
}

fn boolean(bindings: &Bindings, condition: bool) -> Solutions {
    if condition {
        Box::new(std::iter::once(bindings.clone()))
    } else {
        Box::new(std::iter::empty())
    }
}

/// Evaluate an arithmetic expression tree. Every operand must be a
/// ground number; anything else, and any domain error, evaluates to
/// `None`.
pub fn eval_arith(term: &Term, bindings: &Bindings) -> Option<Numeric> {
    let walked = bindings.walk(term);
    match walked.value() {
        Value::Number(n) => Some(*n),
        Value::Compound(c) => {
            let arg = |i: usize| eval_arith(&c.args[i], bindings);
            match (c.functor.0.as_str(), c.args.len()) {
                ("+", 2) => arg(0)? + arg(1)?,
                ("-", 2) => arg(0)? - arg(1)?,
                ("*", 2) => arg(0)? * arg(1)?,
                ("/", 2) => arg(0)? / arg(1)?,
                ("mod", 2) => arg(0)?.modulo(arg(1)?),
                ("rem", 2) => arg(0)? % arg(1)?,
                ("min", 2) => arg(0)?.min_of(arg(1)?),
                ("max", 2) => arg(0)?.max_of(arg(1)?),
                ("pow", 2) => arg(0)?.pow(arg(1)?),
                ("abs", 1) => arg(0)?.abs(),
                ("sqrt", 1) => arg(0)?.sqrt(),
                ("floor", 1) => arg(0)?.floor(),
                ("ceil", 1) => arg(0)?.ceil(),
                ("round", 1) => arg(0)?.round(),
                ("-", 1) => Numeric::Integer(0) - arg(0)?,
                ("+", 1) => arg(0),
                _ => None,
            }
        }
        _ => None,
    }
}

fn is_2(args: &[Term], bindings: &Bindings) -> Solutions {
    match eval_arith(&args[1], bindings) {
        Some(result) => Box::new(
            unify(&args[0], &Term::from(Value::Number(result)), bindings).into_iter(),
        ),
        None => Box::new(std::iter::empty()),
    }
}

fn compare<F>(args: &[Term], bindings: &Bindings, check: F) -> Solutions
where
    F: Fn(Ordering) -> bool,
{
    let ordering = match (eval_arith(&args[0], bindings), eval_arith(&args[1], bindings)) {
        (Some(left), Some(right)) => left.partial_cmp(&right),
        _ => None,
    };
    match ordering {
        Some(ordering) if check(ordering) => Box::new(std::iter::once(bindings.clone())),
        _ => Box::new(std::iter::empty()),
    }
}

fn member_2(args: &[Term], bindings: &Bindings) -> Solutions {
    let element = args[0].clone();
    let items = match bindings.walk_list(&args[1]) {
        Some(items) => items,
        None => return Box::new(std::iter::empty()),
    };
    let bindings = bindings.clone();
    Box::new(
        items
            .into_iter()
            .filter_map(move |item| unify(&element, &item, &bindings)),
    )
}

fn append_3(args: &[Term], bindings: &Bindings) -> Solutions {
    // Both inputs known: build the concatenation.
    if let (Some(front_items), Some(back_items)) = (
        bindings.walk_list(&args[0]),
        bindings.walk_list(&args[1]),
    ) {
        let mut joined = front_items;
        joined.extend(back_items);
        return Box::new(
            unify(
                &Term::from(Value::List(List::new(joined))),
                &args[2],
                bindings,
            )
            .into_iter(),
        );
    }

    // Whole list known: enumerate every split point.
    if let Some(items) = bindings.walk_list(&args[2]) {
        let front = args[0].clone();
        let back = args[1].clone();
        let bindings = bindings.clone();
        let mut split = 0;
        return Box::new(std::iter::from_fn(move || {
            while split <= items.len() {
                let head = Term::from(Value::List(List::new(items[..split].to_vec())));
                let tail = Term::from(Value::List(List::new(items[split..].to_vec())));
                split += 1;
                if let Some(b) = unify(&front, &head, &bindings) {
                    if let Some(b) = unify(&back, &tail, &b) {
                        return Some(b);
                    }
                }
            }
            None
        }));
    }

    Box::new(std::iter::empty())
}

fn length_2(args: &[Term], bindings: &Bindings) -> Solutions {
    if let Some(items) = bindings.walk_list(&args[0]) {
        let n = Term::from(Value::Number(Numeric::Integer(items.len() as i64)));
        return Box::new(unify(&args[1], &n, bindings).into_iter());
    }
    match bindings.walk(&args[0]).value() {
        Value::Variable(_) => match bindings.walk(&args[1]).value() {
            // Known length: build a list of fresh variables.
            Value::Number(Numeric::Integer(n)) if *n >= 0 => {
                let items: TermList = (0..*n)
                    .map(|_| Term::new_fresh(Value::Variable(Variable::fresh("_"))))
                    .collect();
                let list_term = Term::from(Value::List(List::new(items)));
                Box::new(unify(&args[0], &list_term, bindings).into_iter())
            }
            // Both open: enumerate lengths from zero.
            Value::Variable(_) => {
                let list_arg = args[0].clone();
                let len_arg = args[1].clone();
                let bindings = bindings.clone();
                let mut n: i64 = 0;
                Box::new(std::iter::from_fn(move || {
                    let items: TermList = (0..n)
                        .map(|_| Term::new_fresh(Value::Variable(Variable::fresh("_"))))
                        .collect();
                    let list_term = Term::from(Value::List(List::new(items)));
                    let len_term = Term::from(Value::Number(Numeric::Integer(n)));
                    n += 1;
                    unify(&list_arg, &list_term, &bindings)
                        .and_then(|b| unify(&len_arg, &len_term, &b))
                }))
            }
            _ => Box::new(std::iter::empty()),
        },
        _ => Box::new(std::iter::empty()),
    }
}

/// Zero-based indexing, matching the rest of the list tooling.
fn nth_3(args: &[Term], bindings: &Bindings) -> Solutions {
    let items = match bindings.walk_list(&args[1]) {
        Some(items) => items,
        None => return Box::new(std::iter::empty()),
    };
    match bindings.walk(&args[0]).value() {
        Value::Number(Numeric::Integer(n)) => {
            let n = *n;
            if n < 0 || n as usize >= items.len() {
                return Box::new(std::iter::empty());
            }
            Box::new(unify(&args[2], &items[n as usize], bindings).into_iter())
        }
        Value::Variable(_) => {
            let index_arg = args[0].clone();
            let element_arg = args[2].clone();
            let bindings = bindings.clone();
            let mut index = 0;
            Box::new(std::iter::from_fn(move || {
                while index < items.len() {
                    let i = Term::from(Value::Number(Numeric::Integer(index as i64)));
                    let item = items[index].clone();
                    index += 1;
                    if let Some(b) = unify(&index_arg, &i, &bindings) {
                        if let Some(b) = unify(&element_arg, &item, &b) {
                            return Some(b);
                        }
                    }
                }
                None
            }))
        }
        _ => Box::new(std::iter::empty()),
    }
}

fn reverse_2(args: &[Term], bindings: &Bindings) -> Solutions {
    if let Some(items) = bindings.walk_list(&args[0]) {
        let reversed: TermList = items.into_iter().rev().collect();
        return Box::new(
            unify(
                &Term::from(Value::List(List::new(reversed))),
                &args[1],
                bindings,
            )
            .into_iter(),
        );
    }
    if let Some(items) = bindings.walk_list(&args[1]) {
        let reversed: TermList = items.into_iter().rev().collect();
        return Box::new(
            unify(
                &args[0],
                &Term::from(Value::List(List::new(reversed))),
                bindings,
            )
            .into_iter(),
        );
    }
    Box::new(std::iter::empty())
}

fn first_2(args: &[Term], bindings: &Bindings) -> Solutions {
    match bindings.walk_list(&args[0]) {
        Some(items) if !items.is_empty() => {
            Box::new(unify(&args[1], &items[0], bindings).into_iter())
        }
        _ => Box::new(std::iter::empty()),
    }
}

fn rest_2(args: &[Term], bindings: &Bindings) -> Solutions {
    match bindings.walk_list(&args[0]) {
        Some(items) if !items.is_empty() => {
            let tail = Term::from(Value::List(List::new(items[1..].to_vec())));
            Box::new(unify(&args[1], &tail, bindings).into_iter())
        }
        _ => Box::new(std::iter::empty()),
    }
}

fn cons_3(args: &[Term], bindings: &Bindings) -> Solutions {
    if let Some(items) = bindings.walk_list(&args[1]) {
        let mut consed = vec![args[0].clone()];
        consed.extend(items);
        return Box::new(
            unify(
                &Term::from(Value::List(List::new(consed))),
                &args[2],
                bindings,
            )
            .into_iter(),
        );
    }
    // Decompose a known result instead.
    if let Some(items) = bindings.walk_list(&args[2]) {
        if items.is_empty() {
            return Box::new(std::iter::empty());
        }
        let rest = Term::from(Value::List(List::new(items[1..].to_vec())));
        return Box::new(
            unify(&args[0], &items[0], bindings)
                .and_then(|b| unify(&args[1], &rest, &b))
                .into_iter(),
        );
    }
    Box::new(std::iter::empty())
}

/// Run the goal to exhaustion, collecting the deep-walked template per
/// solution. Always succeeds exactly once, with the (possibly empty)
/// list bound to the third argument.
fn findall_3(args: &[Term], ctx: &Rc<QueryCtx>, bindings: &Bindings) -> Solutions {
    let template = args[0].clone();
    let goal_term = args[1].clone();
    let out = args[2].clone();
    let ctx = ctx.clone();
    let bindings = bindings.clone();
    let mut decided = false;
    Box::new(std::iter::from_fn(move || {
        if decided {
            return None;
        }
        decided = true;
        let goal = resolve_goal(&bindings.walk(&goal_term));
        let collected: TermList = solve(&goal, &ctx, &CutBarrier::new(), &bindings)
            .map(|solution| {
                let instance = solution.walk_deep(&template);
                rename_apart(std::slice::from_ref(&instance)).remove(0)
            })
            .collect();
        unify(&out, &Term::from(Value::List(List::new(collected))), &bindings)
    }))
}

fn between_3(args: &[Term], bindings: &Bindings) -> Solutions {
    let low = match bindings.walk(&args[0]).value().as_number() {
        Some(Numeric::Integer(low)) => low,
        _ => return Box::new(std::iter::empty()),
    };
    let high = match bindings.walk(&args[1]).value().as_number() {
        Some(Numeric::Integer(high)) => high,
        _ => return Box::new(std::iter::empty()),
    };
    match bindings.walk(&args[2]).value() {
        Value::Number(n) => boolean(
            bindings,
            *n >= Numeric::Integer(low) && *n <= Numeric::Integer(high),
        ),
        Value::Variable(_) => {
            let x = args[2].clone();
            let bindings = bindings.clone();
            let mut current = low;
            Box::new(std::iter::from_fn(move || {
                while current <= high {
                    let candidate = Term::from(Value::Number(Numeric::Integer(current)));
                    current += 1;
                    if let Some(b) = unify(&x, &candidate, &bindings) {
                        return Some(b);
                    }
                }
                None
            }))
        }
        _ => Box::new(std::iter::empty()),
    }
}

fn copy_term_2(args: &[Term], bindings: &Bindings) -> Solutions {
    let original = bindings.walk_deep(&args[0]);
    let copy = rename_apart(std::slice::from_ref(&original)).remove(0);
    Box::new(unify(&args[1], &copy, bindings).into_iter())
}
