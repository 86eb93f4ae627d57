use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
/// Errors raised while loading tables or disambiguating reads
pub enum Error {
    #[error("Could not read/write {path}: {source}")]
    /// File could not be opened, read or written
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed record in {path} at line {line}: {reason}")]
    /// A data row does not have the expected shape
    MalformedRecord {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("'{name}' is missing from the {table} table")]
    /// Species/taxonomy tables are not mutually consistent
    ConfigurationInconsistency { name: String, table: &'static str },
    #[error("Read {read_id} in sample {sample} has no consensus at any rank (candidates: {candidates})")]
    /// Narrowest-unique-rank placement exhausted every rank
    UnresolvableAmbiguity {
        sample: String,
        read_id: String,
        candidates: String,
    },
    #[error("{0} read(s) could not be placed at any rank")]
    /// Strict mode: at least one read stayed ambiguous
    UnresolvedReads(usize),
    #[error("Read {read_id} in sample {sample} lost all candidate species")]
    /// Subset removal emptied a candidate list
    EmptyCandidates { sample: String, read_id: String },
    #[error("Invalid configuration: {0}")]
    /// Configuration value out of range
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Error::MalformedRecord {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }
}
