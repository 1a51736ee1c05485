/// The tagged wire representation shared with the browser visualizer
/// and the REST layer. Every term serializes to `{t: "...", ...}`;
/// `Term`'s `Serialize`/`Deserialize` impls go through this type, so
/// everything that embeds terms (trace events, change records, export
/// payloads) speaks the same format.
///
/// Variable identity does not survive the wire: a wire variable is just
/// a name. Conversion back allocates fresh ids, and rule import relinks
/// same-named variables clause-wide.
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::kb::{now_ms, KnowledgeBase};
use crate::numerics::Numeric;
use crate::terms::{Compound, List, MapKey, Symbol, Term, TermList, Value, Variable};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t")]
pub enum WireTerm {
    #[serde(rename = "atom")]
    Atom { v: String },
    #[serde(rename = "num")]
    Num { v: Numeric },
    #[serde(rename = "str")]
    Str { v: String },
    #[serde(rename = "var")]
    Var { name: String },
    #[serde(rename = "list")]
    List {
        items: Vec<WireTerm>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        rest: Option<Box<WireTerm>>,
    },
    #[serde(rename = "compound")]
    Compound { head: String, args: Vec<WireTerm> },
    #[serde(rename = "map")]
    Map { entries: Vec<(WireKey, WireTerm)> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum WireKey {
    Int(i64),
    Atom(String),
}

impl From<&Term> for WireTerm {
    fn from(term: &Term) -> Self {
        match term.value() {
            Value::Atom(s) => WireTerm::Atom { v: s.0.clone() },
            Value::Number(n) => WireTerm::Num { v: *n },
            Value::String(s) => WireTerm::Str { v: s.clone() },
            Value::Variable(v) => WireTerm::Var {
                name: v.name.clone(),
            },
            Value::List(List { elements, rest }) => WireTerm::List {
                items: elements.iter().map(WireTerm::from).collect(),
                rest: rest.as_ref().map(|r| Box::new(WireTerm::from(&**r))),
            },
            Value::Compound(Compound { functor, args }) => WireTerm::Compound {
                head: functor.0.clone(),
                args: args.iter().map(WireTerm::from).collect(),
            },
            Value::Map(fields) => WireTerm::Map {
                entries: fields
                    .iter()
                    .map(|(key, value)| {
                        let key = match key {
                            MapKey::Atom(s) => WireKey::Atom(s.0.clone()),
                            MapKey::Int(i) => WireKey::Int(*i),
                        };
                        (key, WireTerm::from(value))
                    })
                    .collect(),
            },
        }
    }
}

impl WireTerm {
    /// Rebuild a term, sharing variables by name through `vars` so one
    /// conversion scope (a term, or a whole imported clause) keeps its
    /// variables linked.
    pub fn to_term(&self, vars: &mut HashMap<String, Variable>) -> Term {
        let value = match self {
            WireTerm::Atom { v } => Value::Atom(Symbol(v.clone())),
            WireTerm::Num { v } => Value::Number(*v),
            WireTerm::Str { v } => Value::String(v.clone()),
            WireTerm::Var { name } => {
                let variable = if name == "_" {
                    Variable::fresh("_")
                } else {
                    vars.entry(name.clone())
                        .or_insert_with(|| Variable::fresh(name))
                        .clone()
                };
                Value::Variable(variable)
            }
            WireTerm::List { items, rest } => Value::List(List {
                elements: items.iter().map(|i| i.to_term(vars)).collect(),
                rest: rest.as_ref().map(|r| Box::new(r.to_term(vars))),
            }),
            WireTerm::Compound { head, args } => Value::Compound(Compound {
                functor: Symbol(head.clone()),
                args: args.iter().map(|a| a.to_term(vars)).collect(),
            }),
            WireTerm::Map { entries } => {
                let fields: BTreeMap<MapKey, Term> = entries
                    .iter()
                    .map(|(key, value)| {
                        let key = match key {
                            WireKey::Atom(s) => MapKey::Atom(Symbol(s.clone())),
                            WireKey::Int(i) => MapKey::Int(*i),
                        };
                        (key, value.to_term(vars))
                    })
                    .collect();
                Value::Map(fields)
            }
        };
        Term::from(value)
    }
}

impl Serialize for Term {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        WireTerm::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Term {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = WireTerm::deserialize(deserializer)?;
        Ok(wire.to_term(&mut HashMap::new()))
    }
}

/// A whole knowledge base on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbExport {
    pub facts: BTreeMap<String, Vec<TermList>>,
    pub rules: BTreeMap<String, Vec<RuleExport>>,
    pub exported_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleExport {
    pub params: TermList,
    pub body: Vec<Term>,
}

pub fn export_kb(kb: &KnowledgeBase) -> KbExport {
    let facts = kb
        .facts()
        .iter()
        .map(|(predicate, tuples)| (predicate.0.clone(), tuples.as_ref().clone()))
        .collect();
    let rules = kb
        .rules()
        .iter()
        .map(|(predicate, rules)| {
            let rules = rules
                .iter()
                .map(|rule| RuleExport {
                    params: rule.params.clone(),
                    body: rule.body.clone(),
                })
                .collect();
            (predicate.0.clone(), rules)
        })
        .collect();
    KbExport {
        facts,
        rules,
        exported_at: now_ms(),
    }
}

/// Convert an export payload back into store contents. Same-named
/// variables within one rule are relinked to a single fresh variable,
/// since wire variables carry only names.
pub fn import_payload(
    export: &KbExport,
) -> (
    HashMap<Symbol, Vec<TermList>>,
    HashMap<Symbol, Vec<(TermList, Vec<Term>)>>,
) {
    let facts = export
        .facts
        .iter()
        .map(|(predicate, tuples)| (Symbol(predicate.clone()), tuples.clone()))
        .collect();
    let rules = export
        .rules
        .iter()
        .map(|(predicate, rules)| {
            let rules = rules
                .iter()
                .map(|rule| relink_clause(&rule.params, &rule.body))
                .collect();
            (Symbol(predicate.clone()), rules)
        })
        .collect();
    (facts, rules)
}

/// Give every distinct variable name in the clause one shared identity.
fn relink_clause(params: &[Term], body: &[Term]) -> (TermList, Vec<Term>) {
    let mut by_name: HashMap<String, Variable> = HashMap::new();
    let mut relink = |t: &Term| -> Term {
        if let Value::Variable(v) = t.value() {
            if v.name == "_" {
                return t.clone();
            }
            let shared = by_name
                .entry(v.name.clone())
                .or_insert_with(|| Variable::fresh(&v.name))
                .clone();
            t.clone_with_value(Value::Variable(shared))
        } else {
            t.clone()
        }
    };
    let params = params
        .iter()
        .map(|p| p.cloned_map_replace(&mut relink))
        .collect();
    let body = body
        .iter()
        .map(|g| g.cloned_map_replace(&mut relink))
        .collect();
    (params, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shapes() {
        let term = term!(call!("f", [atom!("a"), 1, "s", value!([1, 2])]));
        let json = serde_json::to_value(&term).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "t": "compound",
                "head": "f",
                "args": [
                    {"t": "atom", "v": "a"},
                    {"t": "num", "v": 1},
                    {"t": "str", "v": "s"},
                    {"t": "list", "items": [{"t": "num", "v": 1}, {"t": "num", "v": 2}]},
                ],
            })
        );
    }

    #[test]
    fn test_variable_wire_shape() {
        let term = Term::from(Value::Variable(Variable::fresh("x")));
        let json = serde_json::to_value(&term).unwrap();
        assert_eq!(json, serde_json::json!({"t": "var", "name": "x"}));
    }

    #[test]
    fn test_term_round_trip() {
        let term = term!(call!(
            "f",
            [
                atom!("a"),
                2.5,
                value!([1, atom!("b")]),
                term!(btreemap! {
                    MapKey::Atom(sym!("k")) => term!(1),
                    MapKey::Int(2) => term!("two"),
                })
            ]
        ));
        let json = serde_json::to_string(&term).unwrap();
        let back: Term = serde_json::from_str(&json).unwrap();
        assert_eq!(term, back);
    }

    #[test]
    fn test_round_trip_relinks_variables_within_a_term() {
        let x = var!("x");
        let term = term!(call!("f", [x.clone(), x]));
        let json = serde_json::to_string(&term).unwrap();
        let back: Term = serde_json::from_str(&json).unwrap();
        match back.value() {
            Value::Compound(c) => {
                let a = c.args[0].value().as_variable().unwrap();
                let b = c.args[1].value().as_variable().unwrap();
                assert_eq!(a.id, b.id);
                assert_eq!(a.name, "x");
            }
            other => panic!("expected compound, got {:?}", other),
        }
    }

    #[test]
    fn test_open_list_wire() {
        let t = var!("T");
        let term = term!(value!([1, @rest t]));
        let json = serde_json::to_value(&term).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "t": "list",
                "items": [{"t": "num", "v": 1}],
                "rest": {"t": "var", "name": "T"},
            })
        );
    }
}
