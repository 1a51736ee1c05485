use std::{iter::Peekable, str::CharIndices};

use crate::error::ParseErrorKind;

pub type SrcPos = (usize, usize);

// Take a location in a string and return the row and column.
pub fn loc_to_pos(src: &str, loc: usize) -> SrcPos {
    let mut row = 0;
    let mut col = 0;
    for (i, c) in src.char_indices() {
        if i >= loc {
            break;
        }
        if c == '\n' {
            row += 1;
            col = 0;
        } else {
            col += 1;
        }
    }
    (row, col)
}

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Integer(i64),
    Float(f64),
    Str(String),
    /// An atom or operator name; also used for functors.
    Symbol(String),
    /// `?name`, `Name` or `_`.
    Variable(String),
    LP,     // (
    RP,     // )
    LB,     // [
    RB,     // ]
    LCB,    // {
    RCB,    // }
    Comma,  // ,
    Dot,    // .
    Colon,  // :
    Semi,   // ;
    Bar,    // |
    Define, // :-
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Integer(i) => i.to_string(),
            Token::Float(f) => f.to_string(),
            Token::Str(s) => format!("{:?}", s),
            Token::Symbol(s) => s.clone(),
            Token::Variable(v) => v.clone(),
            Token::LP => "(".to_string(),
            Token::RP => ")".to_string(),
            Token::LB => "[".to_string(),
            Token::RB => "]".to_string(),
            Token::LCB => "{".to_string(),
            Token::RCB => "}".to_string(),
            Token::Comma => ",".to_string(),
            Token::Dot => ".".to_string(),
            Token::Colon => ":".to_string(),
            Token::Semi => ";".to_string(),
            Token::Bar => "|".to_string(),
            Token::Define => ":-".to_string(),
        }
    }
}

pub type Spanned = (usize, Token, usize);

/// Characters an operator symbol may contain, `=:=` included. A ':'
/// never starts a token here: the explicit ':' arm below wins, so a
/// leading colon still lexes as `Colon` or `Define`.
pub const OPERATOR_CHARS: &str = "+-*/\\=<>!&@#^~:";

pub struct Lexer<'source> {
    src: &'source str,
    chars: Peekable<CharIndices<'source>>,
}

impl<'source> Lexer<'source> {
    pub fn new(src: &'source str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.chars.peek() {
                Some((_, c)) if c.is_whitespace() => {
                    self.chars.next();
                }
                Some((_, '%')) => {
                    // Line comment.
                    for (_, c) in self.chars.by_ref() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn take_while<F>(&mut self, buf: &mut String, pred: F) -> usize
    where
        F: Fn(char) -> bool,
    {
        let mut end = self.src.len();
        while let Some((i, c)) = self.chars.peek() {
            if pred(*c) {
                buf.push(*c);
                self.chars.next();
            } else {
                end = *i;
                break;
            }
        }
        end
    }

    fn lex_number(&mut self, start: usize, negative: bool) -> Result<Spanned, ParseErrorKind> {
        let mut buf = String::new();
        if negative {
            buf.push('-');
        }
        let mut end = self.take_while(&mut buf, |c| c.is_ascii_digit());
        let mut is_float = false;
        // A '.' is part of the number only when a digit follows,
        // otherwise it terminates the clause.
        let mut lookahead = self.chars.clone();
        if let Some((_, '.')) = lookahead.next() {
            if matches!(lookahead.next(), Some((_, c)) if c.is_ascii_digit()) {
                is_float = true;
                buf.push('.');
                self.chars.next();
                end = self.take_while(&mut buf, |c| c.is_ascii_digit());
            }
        }
        if is_float {
            match buf.parse::<f64>() {
                Ok(f) => Ok((start, Token::Float(f), end)),
                Err(_) => Err(ParseErrorKind::InvalidFloat {
                    token: buf,
                    loc: start,
                }),
            }
        } else {
            match buf.parse::<i64>() {
                Ok(i) => Ok((start, Token::Integer(i), end)),
                Err(_) => Err(ParseErrorKind::IntegerOverflow {
                    token: buf,
                    loc: start,
                }),
            }
        }
    }

    fn lex_quoted(
        &mut self,
        start: usize,
        delimiter: char,
    ) -> Result<(String, usize), ParseErrorKind> {
        let mut buf = String::new();
        loop {
            match self.chars.next() {
                Some((i, c)) if c == delimiter => return Ok((buf, i + 1)),
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, 'n')) => buf.push('\n'),
                    Some((_, 't')) => buf.push('\t'),
                    Some((_, 'r')) => buf.push('\r'),
                    Some((_, '0')) => buf.push('\0'),
                    Some((_, c)) => buf.push(c),
                    None => return Err(ParseErrorKind::UnrecognizedEOF { loc: self.src.len() }),
                },
                Some((_, '\n')) => {
                    return Err(ParseErrorKind::InvalidTokenCharacter {
                        token: buf,
                        c: '\n',
                        loc: start,
                    })
                }
                Some((_, c)) => buf.push(c),
                None => return Err(ParseErrorKind::UnrecognizedEOF { loc: self.src.len() }),
            }
        }
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = Result<Spanned, ParseErrorKind>;

    fn next(&mut self) -> Option<Self::Item> {
        self.skip_trivia();
        let (start, c) = *self.chars.peek()?;
        let spanned = match c {
            '(' => self.single(Token::LP),
            ')' => self.single(Token::RP),
            '[' => self.single(Token::LB),
            ']' => self.single(Token::RB),
            '{' => self.single(Token::LCB),
            '}' => self.single(Token::RCB),
            ',' => self.single(Token::Comma),
            ';' => self.single(Token::Semi),
            '|' => self.single(Token::Bar),
            '.' => self.single(Token::Dot),
            ':' => {
                self.chars.next();
                if matches!(self.chars.peek(), Some((_, '-'))) {
                    self.chars.next();
                    Ok((start, Token::Define, start + 2))
                } else {
                    Ok((start, Token::Colon, start + 1))
                }
            }
            '?' => {
                self.chars.next();
                let mut buf = String::new();
                let end =
                    self.take_while(&mut buf, |c| c.is_ascii_alphanumeric() || c == '_');
                if buf.is_empty() {
                    Err(ParseErrorKind::InvalidTokenCharacter {
                        token: "?".to_string(),
                        c: '?',
                        loc: start,
                    })
                } else {
                    Ok((start, Token::Variable(buf), end))
                }
            }
            '\'' => {
                self.chars.next();
                self.lex_quoted(start, '\'')
                    .map(|(name, end)| (start, Token::Symbol(name), end))
            }
            '"' => {
                self.chars.next();
                self.lex_quoted(start, '"')
                    .map(|(s, end)| (start, Token::Str(s), end))
            }
            c if c.is_ascii_digit() => self.lex_number(start, false),
            '-' => {
                self.chars.next();
                if matches!(self.chars.peek(), Some((_, d)) if d.is_ascii_digit()) {
                    self.lex_number(start, true)
                } else {
                    let mut buf = String::from("-");
                    let end = self.take_while(&mut buf, |c| OPERATOR_CHARS.contains(c));
                    Ok((start, Token::Symbol(buf), end))
                }
            }
            c if c.is_ascii_lowercase() => {
                let mut buf = String::new();
                let end =
                    self.take_while(&mut buf, |c| c.is_ascii_alphanumeric() || c == '_');
                Ok((start, Token::Symbol(buf), end))
            }
            c if c.is_ascii_uppercase() || c == '_' => {
                let mut buf = String::new();
                let end =
                    self.take_while(&mut buf, |c| c.is_ascii_alphanumeric() || c == '_');
                Ok((start, Token::Variable(buf), end))
            }
            c if OPERATOR_CHARS.contains(c) => {
                let mut buf = String::new();
                let end = self.take_while(&mut buf, |c| OPERATOR_CHARS.contains(c));
                Ok((start, Token::Symbol(buf), end))
            }
            c => {
                self.chars.next();
                Err(ParseErrorKind::InvalidTokenCharacter {
                    token: c.to_string(),
                    c,
                    loc: start,
                })
            }
        };
        Some(spanned)
    }
}

impl<'source> Lexer<'source> {
    fn single(&mut self, token: Token) -> Result<Spanned, ParseErrorKind> {
        let (start, _) = self.chars.next().expect("peeked");
        Ok((start, token, start + 1))
    }
}
