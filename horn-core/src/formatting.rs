//! # Formatting
//!
//! Two forms of formatting:
//!
//! 1. Debug strings: verbose, auto-derived from the fmt::Debug trait
//! 2. Text strings: the same syntax the parser accepts, used for the
//!    REPL, trace labels and cache keys
use std::fmt;

use crate::kb::Rule;
use crate::lexer::OPERATOR_CHARS;
use crate::terms::{Compound, List, MapKey, Symbol, Term, Value, Variable};

pub trait ToText {
    fn to_text(&self) -> String;
}

impl<T: fmt::Display> ToText for T {
    fn to_text(&self) -> String {
        self.to_string()
    }
}

/// True when the atom can be printed without quotes and the lexer reads
/// the bare form back as the same symbol.
fn is_plain_atom(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        // Operator atoms stay bare: `!`, `<`, `=:=` and friends. A
        // leading ':' lexes as a colon, so those need quotes.
        Some(c) if c != ':' => name.chars().all(|c| OPERATOR_CHARS.contains(c)),
        _ => false,
    }
}

fn write_atom(f: &mut fmt::Formatter, name: &str) -> fmt::Result {
    if is_plain_atom(name) {
        write!(f, "{}", name)
    } else {
        write!(f, "'{}'", name.escape_debug())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_atom(f, &self.0)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Names that already read as variables print bare; everything
        // else gets the `?` marker the parser accepts.
        let reads_as_var = self
            .name
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_uppercase() || c == '_');
        if reads_as_var {
            write!(f, "{}", self.name)
        } else {
            write!(f, "?{}", self.name)
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MapKey::Atom(s) => write!(f, "{}", s),
            MapKey::Int(i) => write!(f, "{}", i),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Atom(s) => write!(f, "{}", s),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Variable(v) => write!(f, "{}", v),
            Value::List(List { elements, rest }) => {
                write!(f, "[")?;
                for (i, item) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                if let Some(rest) = rest {
                    write!(f, " | {}", rest)?;
                }
                write!(f, "]")
            }
            Value::Compound(Compound { functor, args }) => {
                write!(f, "{}(", functor)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Value::Map(fields) => {
                write!(f, "{{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ")")?;
        if !self.body.is_empty() {
            write!(f, " :- ")?;
            for (i, goal) in self.body.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", goal)?;
            }
        }
        write!(f, ".")
    }
}
