//! Word-level tokenization matching the convention the models were trained
//! with: tokens are whitespace separated and looked up case-sensitively.
//! Lowercasing, punctuation splitting and number collapsing are opt-in.

use crate::vocab::{TokenId, Vocabulary};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

pub const NUM_TOKEN: &str = "<num>";

lazy_static! {
    static ref PUNCTUATION_PATTERN: Regex = Regex::new(r#"([,;:.!?¿¡()<>=\"'`])"#).unwrap();
    static ref NUMBER_PATTERN: Regex = Regex::new(r"^[-+]?[0-9]+([.,][0-9]+)*$").unwrap();
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenizerOptions {
    pub lowercase: bool,
    pub split_punctuation: bool,
    pub collapse_numbers: bool,
}

/// One line of a stimulus file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sentence {
    pub id: usize,
    pub text: String,
    pub words: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedSentence {
    pub ids: Vec<TokenId>,
    /// Word positions that were replaced by the unknown index.
    pub oov: Vec<usize>,
}

impl EncodedSentence {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

pub struct Tokenizer<'v> {
    vocab: &'v Vocabulary,
    options: TokenizerOptions,
}

impl<'v> Tokenizer<'v> {
    pub fn new(vocab: &'v Vocabulary, options: TokenizerOptions) -> Self {
        Tokenizer { vocab, options }
    }

    /// Splits a raw line into surface tokens.
    pub fn split(&self, text: &str) -> Vec<String> {
        if self.options.split_punctuation {
            PUNCTUATION_PATTERN
                .replace_all(text, " $0 ")
                .split_whitespace()
                .map(str::to_string)
                .collect()
        } else {
            text.split_whitespace().map(str::to_string).collect()
        }
    }

    pub fn sentence(&self, id: usize, text: &str) -> Sentence {
        Sentence {
            id,
            text: text.trim().to_string(),
            words: self.split(text),
        }
    }

    /// Maps each word to its vocabulary index. Every substitution with the
    /// unknown index is logged and recorded in `oov`.
    pub fn encode(&self, sentence: &Sentence) -> EncodedSentence {
        let mut ids = Vec::with_capacity(sentence.words.len());
        let mut oov = Vec::new();
        for (pos, word) in sentence.words.iter().enumerate() {
            match self.lookup(word) {
                Some(id) => ids.push(id),
                None => {
                    warn!(
                        sentid = sentence.id,
                        sentpos = pos,
                        "out-of-vocabulary token `{}` replaced by index {}",
                        word,
                        self.vocab.unk()
                    );
                    ids.push(self.vocab.unk());
                    oov.push(pos);
                }
            }
        }
        EncodedSentence { ids, oov }
    }

    fn lookup(&self, word: &str) -> Option<TokenId> {
        let normalized;
        let word = if self.options.lowercase {
            normalized = word.to_lowercase();
            normalized.as_str()
        } else {
            word
        };
        if self.options.collapse_numbers && NUMBER_PATTERN.is_match(word) {
            if let Some(id) = self.vocab.get(NUM_TOKEN) {
                return Some(id);
            }
        }
        self.vocab.get(word)
    }
}
