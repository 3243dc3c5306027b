//! Per-word surprisal of pretrained recurrent language models.
//!
//! A run resolves a model, a vocabulary and a stimulus file
//! ([`config`]), loads the vocabulary ([`vocab`]), splits and encodes each
//! sentence ([`tokenizer`]), scores it with a causal model ([`scoring`],
//! [`model`]) and appends the result to a measure file ([`writer`]).
//! [`pipeline`] drives those steps over a file and [`summary`] averages the
//! critical-word surprisal of finished runs.

pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod scoring;
pub mod summary;
pub mod tokenizer;
pub mod vocab;
pub mod writer;

pub use error::{ConfigError, Error, InferenceError, Result};
pub use model::{BigramModel, LanguageModel, RnnLanguageModel};
pub use pipeline::{score_file, RunSummary};
pub use scoring::{LogBase, ScoringEngine, ScoringOptions, SurprisalResult, WordMeasure};
pub use tokenizer::{EncodedSentence, Sentence, Tokenizer, TokenizerOptions};
pub use vocab::{TokenId, UnkFallback, UnkPolicy, Vocabulary};
pub use writer::{GuessValues, OutputFormat, OutputMode, ResultWriter};
