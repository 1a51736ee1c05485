use std::{fmt, sync::Arc};

use indoc::formatdoc;
use serde::Serialize;
use strum_macros::AsRefStr;

use super::lexer::loc_to_pos;
use super::sources::Source;
use super::terms::Term;

pub type HornResult<T> = Result<T, HornError>;

/// API-level errors only. Goal failure is never represented here: a
/// failed goal is an empty solution stream.
#[derive(Debug, Clone, Serialize)]
pub enum ErrorKind {
    Parse(ParseError),
    Runtime(RuntimeError),
    Operational(OperationalError),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "{}", e),
            Self::Runtime(e) => write!(f, "{}", e),
            Self::Operational(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HornError(pub ErrorKind);

impl std::error::Error for HornError {}

impl fmt::Display for HornError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl HornError {
    pub fn kind(&self) -> String {
        use ErrorKind::*;
        match &self.0 {
            Parse(p) => "ParseError::".to_string() + p.kind.as_ref(),
            Runtime(r) => "RuntimeError::".to_string() + r.as_ref(),
            Operational(o) => "OperationalError::".to_string() + o.as_ref(),
        }
    }
}

#[cfg(test)]
impl HornError {
    pub fn unwrap_parse(self) -> ParseErrorKind {
        match self.0 {
            ErrorKind::Parse(ParseError { kind, .. }) => kind,
            e => panic!("Expected ErrorKind::Parse; was: {}", e),
        }
    }

    pub fn unwrap_runtime(self) -> RuntimeError {
        match self.0 {
            ErrorKind::Runtime(e) => e,
            e => panic!("Expected ErrorKind::Runtime; was: {}", e),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(transparent)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    #[serde(skip_serializing)]
    pub source: Arc<Source>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(loc) = self.kind.loc() {
            let (row, col) = loc_to_pos(&self.source.src, loc);
            write!(f, " at line {}, column {}", row + 1, col + 1)?;
            if let Some(ref filename) = self.source.filename {
                write!(f, " of file {}", filename)?;
            }
        }
        Ok(())
    }
}

impl From<ParseError> for HornError {
    fn from(err: ParseError) -> Self {
        Self(ErrorKind::Parse(err))
    }
}

#[derive(AsRefStr, Clone, Debug, Serialize)]
pub enum ParseErrorKind {
    IntegerOverflow {
        token: String,
        loc: usize,
    },
    InvalidFloat {
        token: String,
        loc: usize,
    },
    InvalidTokenCharacter {
        token: String,
        c: char,
        loc: usize,
    },
    #[allow(clippy::upper_case_acronyms)]
    UnrecognizedEOF {
        loc: usize,
    },
    UnrecognizedToken {
        token: String,
        loc: usize,
    },
    ExtraToken {
        token: String,
        loc: usize,
    },
    DuplicateKey {
        key: String,
        loc: usize,
    },
}

impl ParseErrorKind {
    fn loc(&self) -> Option<usize> {
        match self {
            Self::IntegerOverflow { loc, .. }
            | Self::InvalidFloat { loc, .. }
            | Self::InvalidTokenCharacter { loc, .. }
            | Self::UnrecognizedEOF { loc }
            | Self::UnrecognizedToken { loc, .. }
            | Self::ExtraToken { loc, .. }
            | Self::DuplicateKey { loc, .. } => Some(*loc),
        }
    }
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::IntegerOverflow { token, .. } => {
                write!(f, "'{}' caused an integer overflow", token.escape_debug())
            }
            Self::InvalidFloat { token, .. } => write!(
                f,
                "{} was parsed as a float, but is invalid",
                token.escape_debug()
            ),
            Self::InvalidTokenCharacter { token, c, .. } => write!(
                f,
                "'{}' is not a valid character. Found in {}",
                c.escape_debug(),
                token.escape_debug()
            ),
            Self::UnrecognizedEOF { .. } => write!(
                f,
                "hit the end of the input unexpectedly. Did you forget a period"
            ),
            Self::UnrecognizedToken { token, .. } => write!(
                f,
                "did not expect to find the token '{}'",
                token.escape_debug()
            ),
            Self::ExtraToken { token, .. } => write!(
                f,
                "did not expect to find the token '{}'",
                token.escape_debug()
            ),
            Self::DuplicateKey { key, .. } => {
                write!(f, "Duplicate map key: {}", key)
            }
        }
    }
}

#[derive(AsRefStr, Clone, Debug, Serialize)]
pub enum RuntimeError {
    /// A rule whose head or body does not have the expected shape was
    /// rejected. The knowledge base is left untouched.
    MalformedClause {
        msg: String,
        /// Term where the error arose, when known.
        term: Option<Term>,
    },
    /// An import payload did not describe a valid knowledge base.
    InvalidImport {
        msg: String,
    },
}

impl From<RuntimeError> for HornError {
    fn from(err: RuntimeError) -> Self {
        Self(ErrorKind::Runtime(err))
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MalformedClause { msg, term } => {
                if let Some(term) = term {
                    let msg = formatdoc!(
                        r#"Malformed clause: {msg}
                        The offending term is: {term}

                        A rule head is a predicate atom applied to argument terms,
                        and every body goal must be a compound term or an atom."#,
                        msg = msg,
                        term = term,
                    );
                    write!(f, "{}", msg)
                } else {
                    write!(f, "Malformed clause: {}", msg)
                }
            }
            Self::InvalidImport { msg } => write!(f, "Invalid import payload: {}", msg),
        }
    }
}

#[derive(AsRefStr, Clone, Debug, Serialize)]
pub enum OperationalError {
    /// An invariant has been broken internally.
    InvalidState { msg: String },
    /// Wire (de)serialization failed.
    Serialization { msg: String },
}

impl From<OperationalError> for HornError {
    fn from(err: OperationalError) -> Self {
        Self(ErrorKind::Operational(err))
    }
}

impl fmt::Display for OperationalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidState { msg } => write!(f, "Invalid state: {}", msg),
            Self::Serialization { msg } => write!(f, "Serialization error: {}", msg),
        }
    }
}

pub(crate) fn malformed_clause<T, U>(msg: T, term: Option<Term>) -> HornResult<U>
where
    T: AsRef<str>,
{
    let msg = msg.as_ref().into();
    Err(RuntimeError::MalformedClause { msg, term }.into())
}
