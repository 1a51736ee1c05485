/// Helper macros to build terms concisely, used heavily by tests and
/// occasionally by the engine itself.
use std::collections::BTreeMap;

use crate::terms::*;

#[macro_export]
macro_rules! value {
    ([$($args:expr),* , @rest $rest:expr]) => {
        $crate::terms::Value::List($crate::terms::List::with_rest(
            vec![$(term!($args)),*],
            term!($rest),
        ))
    };
    ([$($args:expr),* $(,)?]) => {
        $crate::terms::Value::List($crate::terms::List::new(vec![
            $(term!($args)),*
        ]))
    };
    ($arg:expr) => {
        $crate::macros::TestHelper::<$crate::terms::Value>::from($arg).0
    };
}

#[macro_export]
macro_rules! values {
    ($($args:expr),*) => {
        vec![$(value!($args)),*]
    };
}

#[macro_export]
macro_rules! term {
    ($($expr:tt)*) => {
        $crate::macros::TestHelper::<$crate::terms::Term>::from(value!($($expr)*)).0
    };
}

#[macro_export]
macro_rules! terms {
    ($($args:expr),* $(,)?) => {
        vec![$(term!($args)),*]
    };
}

#[macro_export]
macro_rules! sym {
    ($arg:expr) => {
        $crate::macros::TestHelper::<$crate::terms::Symbol>::from($arg).0
    };
}

#[macro_export]
macro_rules! atom {
    ($arg:expr) => {
        $crate::terms::Value::Atom(sym!($arg))
    };
}

/// A fresh variable term. Every expansion allocates a new id, so two
/// `var!("x")` occurrences are distinct variables; share ids by binding
/// the expansion to a local first.
#[macro_export]
macro_rules! var {
    ($arg:expr) => {
        $crate::terms::Term::from($crate::terms::Value::Variable(
            $crate::terms::Variable::fresh($arg),
        ))
    };
}

#[macro_export]
macro_rules! string {
    ($arg:expr) => {
        $crate::terms::Value::String($arg.into())
    };
}

#[macro_export]
macro_rules! call {
    ($name:expr) => {
        $crate::terms::Compound {
            functor: sym!($name),
            args: vec![],
        }
    };
    ($name:expr, [$($args:expr),* $(,)?]) => {
        $crate::terms::Compound {
            functor: sym!($name),
            args: vec![
                $(term!($args)),*
            ],
        }
    };
}

/// Special struct which is way more eager at implementing `From`
/// for a bunch of things, so that in the macros we can use `TestHelper<Term>::from`
/// and try and convert things as often as possible.
pub struct TestHelper<T>(pub T);

impl<T> From<T> for TestHelper<T> {
    fn from(other: T) -> Self {
        Self(other)
    }
}

impl From<Value> for TestHelper<Term> {
    fn from(other: Value) -> Self {
        Self(Term::from(other))
    }
}

impl<S: AsRef<str>> From<S> for TestHelper<Symbol> {
    fn from(other: S) -> Self {
        Self(Symbol(other.as_ref().to_string()))
    }
}

impl From<i64> for TestHelper<Value> {
    fn from(other: i64) -> Self {
        Self(Value::Number(other.into()))
    }
}

impl From<f64> for TestHelper<Value> {
    fn from(other: f64) -> Self {
        Self(Value::Number(other.into()))
    }
}

impl From<&str> for TestHelper<Value> {
    fn from(other: &str) -> Self {
        Self(Value::String(other.to_string()))
    }
}

impl From<String> for TestHelper<Value> {
    fn from(other: String) -> Self {
        Self(Value::String(other))
    }
}

impl From<Compound> for TestHelper<Value> {
    fn from(other: Compound) -> Self {
        Self(Value::Compound(other))
    }
}

impl From<Variable> for TestHelper<Value> {
    fn from(other: Variable) -> Self {
        Self(Value::Variable(other))
    }
}

impl From<Term> for TestHelper<Value> {
    fn from(other: Term) -> Self {
        Self(other.value().clone())
    }
}

impl From<BTreeMap<MapKey, Term>> for TestHelper<Value> {
    fn from(other: BTreeMap<MapKey, Term>) -> Self {
        Self(Value::Map(other))
    }
}

impl From<TermList> for TestHelper<Value> {
    fn from(other: TermList) -> Self {
        Self(Value::List(List::new(other)))
    }
}

impl From<List> for TestHelper<Value> {
    fn from(other: List) -> Self {
        Self(Value::List(other))
    }
}

impl<'a, T> From<&'a T> for TestHelper<Value>
where
    T: Clone + Into<TestHelper<Value>>,
{
    fn from(other: &'a T) -> Self {
        other.clone().into()
    }
}
