use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Fatal errors. Every variant that touches the filesystem carries the path
/// it was working on.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: {reason}", path.display())]
    Format {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("failed to load model from {}: {source}", path.display())]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: candle_core::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Write {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Error::Format {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown language selector `{0}` (expected `en` or `es`)")]
    UnknownLanguage(String),

    #[error("unknown experiment `{0}`")]
    UnknownExperiment(String),

    #[error("model index {index} is out of range for `{language}` (expected 0..={max})")]
    ModelIndexOutOfRange {
        language: &'static str,
        index: usize,
        max: usize,
    },

    #[error("experiment `{experiment}` was not run for `{language}`")]
    ExperimentUnavailable {
        language: &'static str,
        experiment: &'static str,
    },

    #[error("{role} file does not exist: {}", path.display())]
    MissingPath { role: &'static str, path: PathBuf },

    #[error("unsupported model file {}: {reason}", path.display())]
    UnsupportedModel { path: PathBuf, reason: String },

    #[error("unknown-token fallback index {index} is outside a vocabulary of {size} entries")]
    FallbackOutOfRange { index: usize, size: usize },

    #[error("invalid unknown-token fallback `{0}` (expected `first`, `last` or an index)")]
    InvalidFallback(String),

    #[error("invalid log base `{0}` (expected `bits` or `nats`)")]
    InvalidLogBase(String),

    #[error("invalid guess values `{0}` (expected `none`, `probs`, `scores` or `ratios`)")]
    InvalidGuessValues(String),
}

/// Per-sentence failures. These never abort a run: the sentence is logged and
/// skipped.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("sentence is empty")]
    EmptySentence,

    #[error("sentence has {0} token(s) and no boundary marker, nothing to predict")]
    TooShort(usize),

    #[error("token index {index} is outside the model vocabulary of {size}")]
    TokenOutOfRange { index: u32, size: usize },

    #[error("model returned {got} for {expected}")]
    ShapeMismatch { expected: String, got: String },

    #[error("model forward pass failed: {0}")]
    Backend(#[from] candle_core::Error),
}
