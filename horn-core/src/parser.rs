use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{HornResult, ParseError, ParseErrorKind};
use crate::lexer::{Lexer, Spanned, Token};
use crate::sources::Source;
use crate::terms::{Compound, List, MapKey, Symbol, Term, TermList, Value, Variable};

/// One parsed program line. A fact is a clause with an empty body.
#[derive(Debug, Clone)]
pub struct Clause {
    pub name: Symbol,
    pub params: TermList,
    pub body: Vec<Term>,
}

/// Parse a whole program: clauses and facts, each terminated by `.`.
pub fn parse_program(src_id: u64, source: &Arc<Source>) -> HornResult<Vec<Clause>> {
    let mut parser = Parser::new(src_id, source)?;
    let mut clauses = vec![];
    while !parser.at_eof() {
        clauses.push(parser.parse_clause()?);
        // Each clause opens a fresh variable scope.
        parser.vars.clear();
    }
    Ok(clauses)
}

/// Parse a query: a comma/semicolon goal expression with an optional
/// trailing `.`. All goals share one variable scope, so the same `?x`
/// in two goals is one variable.
pub fn parse_query(src_id: u64, source: &Arc<Source>) -> HornResult<Vec<Term>> {
    let mut parser = Parser::new(src_id, source)?;
    let goals = parser.parse_body()?;
    if parser.peek_is(&Token::Dot) {
        parser.advance();
    }
    parser.expect_eof()?;
    Ok(goals)
}

/// Parse a single term, for API convenience and tests.
pub fn parse_term(src_id: u64, source: &Arc<Source>) -> HornResult<Term> {
    let mut parser = Parser::new(src_id, source)?;
    let term = parser.parse_term()?;
    parser.expect_eof()?;
    Ok(term)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    src_id: u64,
    source: Arc<Source>,
    vars: HashMap<String, Variable>,
}

impl Parser {
    fn new(src_id: u64, source: &Arc<Source>) -> HornResult<Self> {
        let tokens = Lexer::new(&source.src)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|kind| ParseError {
                kind,
                source: source.clone(),
            })?;
        Ok(Self {
            tokens,
            pos: 0,
            src_id,
            source: source.clone(),
            vars: HashMap::new(),
        })
    }

    fn error<T>(&self, kind: ParseErrorKind) -> HornResult<T> {
        Err(ParseError {
            kind,
            source: self.source.clone(),
        }
        .into())
    }

    fn unexpected<T>(&self) -> HornResult<T> {
        match self.tokens.get(self.pos) {
            Some((loc, token, _)) => self.error(ParseErrorKind::UnrecognizedToken {
                token: token.describe(),
                loc: *loc,
            }),
            None => self.error(ParseErrorKind::UnrecognizedEOF {
                loc: self.source.src.len(),
            }),
        }
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn expect_eof(&self) -> HornResult<()> {
        match self.tokens.get(self.pos) {
            None => Ok(()),
            Some((loc, token, _)) => self.error(ParseErrorKind::ExtraToken {
                token: token.describe(),
                loc: *loc,
            }),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t, _)| t)
    }

    fn peek_is(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let spanned = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        spanned
    }

    fn expect(&mut self, expected: &Token) -> HornResult<Spanned> {
        if self.peek_is(expected) {
            Ok(self.advance().expect("peeked"))
        } else {
            self.unexpected()
        }
    }

    fn variable(&mut self, name: String) -> Term {
        // `_` is always anonymous; every occurrence is fresh.
        let variable = if name == "_" {
            Variable::fresh("_")
        } else {
            self.vars
                .entry(name.clone())
                .or_insert_with(|| Variable::fresh(&name))
                .clone()
        };
        Value::Variable(variable).into()
    }

    fn parse_clause(&mut self) -> HornResult<Clause> {
        let (name, params) = self.parse_head()?;
        let body = if self.peek_is(&Token::Define) {
            self.advance();
            self.parse_body()?
        } else {
            vec![]
        };
        self.expect(&Token::Dot)?;
        Ok(Clause { name, params, body })
    }

    fn parse_head(&mut self) -> HornResult<(Symbol, TermList)> {
        match self.advance() {
            Some((_, Token::Symbol(name), _)) => {
                let params = if self.peek_is(&Token::LP) {
                    self.advance();
                    let params = self.parse_term_list(&Token::RP)?;
                    self.expect(&Token::RP)?;
                    params
                } else {
                    vec![]
                };
                Ok((Symbol(name), params))
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                self.unexpected()
            }
        }
    }

    /// A body is a `;`-disjunction of `,`-conjunctions; the top-level
    /// conjunction is flattened into a goal list.
    fn parse_body(&mut self) -> HornResult<Vec<Term>> {
        let term = self.parse_disjunction()?;
        Ok(flatten_conjunction(term))
    }

    fn parse_disjunction(&mut self) -> HornResult<Term> {
        let left = self.parse_conjunction()?;
        if self.peek_is(&Token::Semi) {
            self.advance();
            let right = self.parse_disjunction()?;
            Ok(Value::Compound(Compound {
                functor: Symbol::new(";"),
                args: vec![left, right],
            })
            .into())
        } else {
            Ok(left)
        }
    }

    fn parse_conjunction(&mut self) -> HornResult<Term> {
        let mut goals = vec![self.parse_term()?];
        while self.peek_is(&Token::Comma) {
            self.advance();
            goals.push(self.parse_term()?);
        }
        let mut term = goals.pop().expect("at least one goal");
        while let Some(previous) = goals.pop() {
            term = Value::Compound(Compound {
                functor: Symbol::new(","),
                args: vec![previous, term],
            })
            .into();
        }
        Ok(term)
    }

    fn parse_term(&mut self) -> HornResult<Term> {
        match self.advance() {
            Some((left, Token::Integer(i), right)) => Ok(Term::new_from_parser(
                self.src_id,
                left,
                right,
                Value::Number(i.into()),
            )),
            Some((left, Token::Float(f), right)) => Ok(Term::new_from_parser(
                self.src_id,
                left,
                right,
                Value::Number(f.into()),
            )),
            Some((left, Token::Str(s), right)) => Ok(Term::new_from_parser(
                self.src_id,
                left,
                right,
                Value::String(s),
            )),
            Some((_, Token::Variable(name), _)) => Ok(self.variable(name)),
            Some((left, Token::Symbol(name), _)) => {
                if self.peek_is(&Token::LP) {
                    self.advance();
                    let args = self.parse_term_list(&Token::RP)?;
                    let (_, _, right) = self.expect(&Token::RP)?;
                    Ok(Term::new_from_parser(
                        self.src_id,
                        left,
                        right,
                        Value::Compound(Compound {
                            functor: Symbol(name),
                            args,
                        }),
                    ))
                } else {
                    Ok(Term::new_from_parser(
                        self.src_id,
                        left,
                        left + name.len(),
                        Value::Atom(Symbol(name)),
                    ))
                }
            }
            Some((left, Token::LB, _)) => self.parse_list(left),
            Some((left, Token::LCB, _)) => self.parse_map(left),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                self.unexpected()
            }
        }
    }

    fn parse_term_list(&mut self, terminator: &Token) -> HornResult<TermList> {
        let mut terms = vec![];
        if self.peek_is(terminator) {
            return Ok(terms);
        }
        loop {
            terms.push(self.parse_term()?);
            if self.peek_is(&Token::Comma) {
                self.advance();
            } else {
                return Ok(terms);
            }
        }
    }

    fn parse_list(&mut self, left: usize) -> HornResult<Term> {
        if self.peek_is(&Token::RB) {
            let (_, _, right) = self.expect(&Token::RB)?;
            return Ok(Term::new_from_parser(
                self.src_id,
                left,
                right,
                Value::List(List::new(vec![])),
            ));
        }
        let mut elements = vec![self.parse_term()?];
        let mut rest = None;
        loop {
            if self.peek_is(&Token::Comma) {
                self.advance();
                elements.push(self.parse_term()?);
            } else if self.peek_is(&Token::Bar) {
                self.advance();
                rest = Some(self.parse_term()?);
                break;
            } else {
                break;
            }
        }
        let (_, _, right) = self.expect(&Token::RB)?;
        let list = match rest {
            Some(rest) => List::with_rest(elements, rest),
            None => List::new(elements),
        };
        Ok(Term::new_from_parser(
            self.src_id,
            left,
            right,
            Value::List(list),
        ))
    }

    fn parse_map(&mut self, left: usize) -> HornResult<Term> {
        let mut fields = BTreeMap::new();
        if !self.peek_is(&Token::RCB) {
            loop {
                let (key_loc, key) = match self.advance() {
                    Some((loc, Token::Symbol(name), _)) => (loc, MapKey::Atom(Symbol(name))),
                    Some((loc, Token::Integer(i), _)) => (loc, MapKey::Int(i)),
                    _ => {
                        self.pos = self.pos.saturating_sub(1);
                        return self.unexpected();
                    }
                };
                self.expect(&Token::Colon)?;
                let value = self.parse_term()?;
                if fields.insert(key.clone(), value).is_some() {
                    return self.error(ParseErrorKind::DuplicateKey {
                        key: match key {
                            MapKey::Atom(s) => s.0,
                            MapKey::Int(i) => i.to_string(),
                        },
                        loc: key_loc,
                    });
                }
                if self.peek_is(&Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let (_, _, right) = self.expect(&Token::RCB)?;
        Ok(Term::new_from_parser(
            self.src_id,
            left,
            right,
            Value::Map(fields),
        ))
    }
}

fn flatten_conjunction(term: Term) -> Vec<Term> {
    match term.value() {
        Value::Compound(Compound { functor, args })
            if functor.0 == "," && args.len() == 2 =>
        {
            let mut goals = vec![args[0].clone()];
            goals.extend(flatten_conjunction(args[1].clone()));
            goals
        }
        _ => vec![term],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(src: &str) -> Arc<Source> {
        Arc::new(Source::new(src))
    }

    #[test]
    fn test_parse_facts() {
        let clauses = parse_program(0, &source("parent(tom, mary). parent(tom, bob).")).unwrap();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].name, sym!("parent"));
        assert_eq!(
            clauses[0].params,
            terms![atom!("tom"), atom!("mary")]
        );
        assert!(clauses[0].body.is_empty());
    }

    #[test]
    fn test_parse_rule_shares_variables() {
        let clauses =
            parse_program(0, &source("ancestor(X, Z) :- parent(X, Y), ancestor(Y, Z).")).unwrap();
        let clause = &clauses[0];
        assert_eq!(clause.body.len(), 2);

        let head_x = clause.params[0].value().as_variable().unwrap();
        let body_x = match clause.body[0].value() {
            Value::Compound(c) => c.args[0].value().as_variable().unwrap(),
            other => panic!("expected compound, got {:?}", other),
        };
        assert_eq!(head_x.id, body_x.id);
    }

    #[test]
    fn test_variable_scopes_are_per_clause() {
        let clauses = parse_program(0, &source("p(X). q(X).")).unwrap();
        let first = clauses[0].params[0].value().as_variable().unwrap().id;
        let second = clauses[1].params[0].value().as_variable().unwrap().id;
        assert_ne!(first, second);
    }

    #[test]
    fn test_query_marker_variables() {
        let goals = parse_query(0, &source("ancestor(tom, ?d), parent(?d, ?g)")).unwrap();
        assert_eq!(goals.len(), 2);
        let d1 = match goals[0].value() {
            Value::Compound(c) => c.args[1].value().as_variable().unwrap().clone(),
            _ => panic!(),
        };
        let d2 = match goals[1].value() {
            Value::Compound(c) => c.args[0].value().as_variable().unwrap().clone(),
            _ => panic!(),
        };
        // The same ?d across goals is one variable.
        assert_eq!(d1.id, d2.id);
        assert_eq!(d1.name, "d");
    }

    #[test]
    fn test_parse_lists_and_tails() {
        let term = parse_term(0, &source("[1, 2 | T]")).unwrap();
        match term.value() {
            Value::List(list) => {
                assert_eq!(list.elements, terms![1, 2]);
                assert!(matches!(
                    list.rest.as_ref().unwrap().value(),
                    Value::Variable(v) if v.name == "T"
                ));
            }
            other => panic!("expected list, got {:?}", other),
        }

        let term = parse_term(0, &source("[]")).unwrap();
        assert_eq!(term, term!(value!([])));
    }

    #[test]
    fn test_parse_map_term() {
        let term = parse_term(0, &source("{name: \"ann\", age: 7}")).unwrap();
        match term.value() {
            Value::Map(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(
                    fields.get(&MapKey::Atom(sym!("age"))).unwrap(),
                    &term!(7)
                );
            }
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_disjunction_and_cut() {
        let clauses =
            parse_program(0, &source("p(X) :- q(X), ! ; r(X).")).unwrap();
        // The single body goal is the disjunction.
        assert_eq!(clauses[0].body.len(), 1);
        match clauses[0].body[0].value() {
            Value::Compound(c) => {
                assert_eq!(c.functor, sym!(";"));
                // Left branch is the conjunction (q(X), !).
                match c.args[0].value() {
                    Value::Compound(conj) => assert_eq!(conj.functor, sym!(",")),
                    other => panic!("expected conjunction, got {:?}", other),
                }
            }
            other => panic!("expected disjunction, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_functional_arithmetic() {
        let goals = parse_query(0, &source("is(?s, +(2, 3))")).unwrap();
        match goals[0].value() {
            Value::Compound(c) => {
                assert_eq!(c.functor, sym!("is"));
                match c.args[1].value() {
                    Value::Compound(plus) => {
                        assert_eq!(plus.functor, sym!("+"));
                        assert_eq!(plus.args, terms![2, 3]);
                    }
                    other => panic!("expected +, got {:?}", other),
                }
            }
            other => panic!("expected is/2, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_comparison_operator_calls() {
        let goals = parse_query(0, &source("=:=(?a, 2), =\\=(?a, 3)")).unwrap();
        assert_eq!(goals.len(), 2);
        match goals[0].value() {
            Value::Compound(c) => {
                assert_eq!(c.functor, sym!("=:="));
                assert_eq!(c.args.len(), 2);
                assert_eq!(c.args[1], term!(2));
            }
            other => panic!("expected =:= call, got {:?}", other),
        }
        match goals[1].value() {
            Value::Compound(c) => assert_eq!(c.functor, sym!("=\\=")),
            other => panic!("expected =\\= call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        use crate::error::ParseErrorKind;

        assert!(parse_program(0, &source("p(")).is_err());
        assert!(parse_program(0, &source("p(a) q(b).")).is_err());
        assert!(parse_query(0, &source("p(a)) extra")).is_err());

        let err = parse_term(0, &source("{a: 1, a: 2}")).unwrap_err();
        assert!(matches!(
            err.unwrap_parse(),
            ParseErrorKind::DuplicateKey { key, .. } if key == "a"
        ));
    }
}
