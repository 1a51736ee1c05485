use serde::{Deserialize, Serialize};

/// Where a term came from. Only parser-built terms carry positions.
#[derive(Debug, Clone)]
pub enum SourceInfo {
    Parser {
        src_id: u64,

        /// Location of the term within the source text
        left: usize,
        right: usize,
    },

    /// Renamed apart while consulting a clause
    Fresh,

    /// Handed in through the engine API
    Api,

    /// Created for a test
    Test,
}

impl SourceInfo {
    pub fn api() -> Self {
        Self::Api
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub filename: Option<String>,
    pub src: String,
}

impl Source {
    pub fn new<T: AsRef<str>>(src: T) -> Self {
        Self {
            filename: None,
            src: src.as_ref().into(),
        }
    }

    pub fn new_with_name<T: AsRef<str>, U: AsRef<str>>(filename: T, src: U) -> Self {
        Self {
            filename: Some(filename.as_ref().into()),
            src: src.as_ref().into(),
        }
    }
}
