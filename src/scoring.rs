//! Per-word complexity measures from a causal language model.

use crate::error::{ConfigError, InferenceError};
use crate::model::LanguageModel;
use crate::tokenizer::{EncodedSentence, Sentence};
use crate::vocab::{TokenId, Vocabulary};
use std::f64::consts::LN_2;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_BOUNDARY: &str = "<eos>";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogBase {
    /// log2, the unit the attachment analyses are reported in.
    #[default]
    Bits,
    Nats,
}

impl LogBase {
    fn from_nats(self, value: f64) -> f64 {
        match self {
            LogBase::Bits => value / LN_2,
            LogBase::Nats => value,
        }
    }
}

impl FromStr for LogBase {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bits" | "2" | "log2" => Ok(LogBase::Bits),
            "nats" | "e" | "ln" => Ok(LogBase::Nats),
            _ => Err(ConfigError::InvalidLogBase(s.to_string())),
        }
    }
}

impl fmt::Display for LogBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogBase::Bits => f.write_str("bits"),
            LogBase::Nats => f.write_str("nats"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScoringOptions {
    pub log_base: LogBase,
    /// Restrict measures to the `k` most likely words (0 = whole vocabulary).
    pub beam: usize,
    /// Number of top guesses to report per word.
    pub guesses: usize,
}

impl ScoringOptions {
    /// Drops a beam that covers the whole vocabulary and caps the guess count
    /// at its size.
    pub fn for_vocabulary(self, vocab_size: usize) -> ScoringOptions {
        ScoringOptions {
            beam: if self.beam >= vocab_size { 0 } else { self.beam },
            guesses: self.guesses.min(vocab_size),
            ..self
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Guess {
    pub word: String,
    /// Natural-log probability under the (beam-restricted) distribution.
    pub logprob: f64,
}

/// Measures for one word. `None` means the word had no left context.
#[derive(Clone, Debug, PartialEq)]
pub struct WordMeasure {
    pub word: String,
    pub sentpos: usize,
    pub surprisal: Option<f64>,
    pub entropy: Option<f64>,
    pub entropy_reduction: Option<f64>,
    pub guesses: Vec<Guess>,
}

impl WordMeasure {
    /// Word length in characters.
    pub fn wlen(&self) -> usize {
        self.word.chars().count()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SurprisalResult {
    pub sentid: usize,
    pub text: String,
    pub words: Vec<WordMeasure>,
    /// Mean negative log-likelihood (nats, full vocabulary) over all scored
    /// targets, including the closing boundary.
    pub loss: f64,
    pub targets: usize,
}

pub struct ScoringEngine<'a, M: LanguageModel + ?Sized> {
    model: &'a M,
    vocab: &'a Vocabulary,
    boundary: Option<TokenId>,
    options: ScoringOptions,
}

impl<'a, M: LanguageModel + ?Sized> ScoringEngine<'a, M> {
    /// `boundary` is looked up in the vocabulary; when present every sentence
    /// is wrapped in it so the first word is conditioned on a sentence start.
    pub fn new(
        model: &'a M,
        vocab: &'a Vocabulary,
        boundary: Option<&str>,
        options: ScoringOptions,
    ) -> Self {
        ScoringEngine {
            model,
            vocab,
            boundary: boundary.and_then(|b| vocab.get(b)),
            options,
        }
    }

    pub fn boundary(&self) -> Option<TokenId> {
        self.boundary
    }

    pub fn options(&self) -> &ScoringOptions {
        &self.options
    }

    pub fn score(
        &self,
        sentence: &Sentence,
        encoded: &EncodedSentence,
    ) -> Result<SurprisalResult, InferenceError> {
        if encoded.is_empty() {
            return Err(InferenceError::EmptySentence);
        }
        let offset = usize::from(self.boundary.is_some());
        let mut seq = Vec::with_capacity(encoded.len() + 2 * offset);
        seq.extend(self.boundary);
        seq.extend_from_slice(&encoded.ids);
        seq.extend(self.boundary);
        if seq.len() < 2 {
            return Err(InferenceError::TooShort(encoded.len()));
        }

        let vocab_size = self.model.vocab_size();
        if let Some(&index) = seq.iter().find(|&&t| t as usize >= vocab_size) {
            return Err(InferenceError::TokenOutOfRange {
                index,
                size: vocab_size,
            });
        }

        let rows = self.model.predict(&seq[..seq.len() - 1])?;
        if rows.len() != seq.len() - 1 {
            return Err(InferenceError::ShapeMismatch {
                expected: format!("{} rows", seq.len() - 1),
                got: format!("{} rows", rows.len()),
            });
        }
        if let Some(row) = rows.iter().find(|r| r.len() != vocab_size) {
            return Err(InferenceError::ShapeMismatch {
                expected: format!("{vocab_size} columns"),
                got: format!("{} columns", row.len()),
            });
        }

        let mut total_nll = 0.;
        let mut measures: Vec<Option<(f64, f64, Vec<Guess>)>> = vec![None; encoded.len()];
        for (t, row) in rows.iter().enumerate() {
            let target = seq[t + 1] as usize;
            total_nll -= row[target] as f64;
            let dist = self.restrict(row);
            let nll = -dist[target];

            // position of the target among the sentence's words
            let Some(word_pos) = (t + 1).checked_sub(offset).filter(|&p| p < encoded.len()) else {
                continue;
            };
            measures[word_pos] = Some((
                self.options.log_base.from_nats(nll),
                self.options.log_base.from_nats(entropy(&dist)),
                self.guesses(&dist),
            ));
        }

        let mut words = Vec::with_capacity(encoded.len());
        let mut prev_entropy = None;
        for (pos, (word, measure)) in sentence.words.iter().zip(measures).enumerate() {
            let (surprisal, entropy, guesses) = match measure {
                Some((s, h, g)) => (Some(s), Some(h), g),
                None => (None, None, Vec::new()),
            };
            let entropy_reduction = match (prev_entropy, entropy) {
                (Some(prev), Some(cur)) => Some(f64::max(0., prev - cur)),
                (None, Some(_)) => Some(0.),
                (_, None) => None,
            };
            prev_entropy = entropy;
            words.push(WordMeasure {
                word: word.clone(),
                sentpos: pos,
                surprisal,
                entropy,
                entropy_reduction,
                guesses,
            });
        }

        Ok(SurprisalResult {
            sentid: sentence.id,
            text: sentence.text.clone(),
            words,
            loss: total_nll / rows.len() as f64,
            targets: rows.len(),
        })
    }

    /// Natural-log distribution as f64, renormalized over the beam if one is
    /// set. Entries outside the beam become `-inf`.
    fn restrict(&self, row: &[f32]) -> Vec<f64> {
        let dist: Vec<f64> = row.iter().map(|&lp| lp as f64).collect();
        let k = self.options.beam;
        if k == 0 || k >= dist.len() {
            return dist;
        }
        let order = ranked(&dist);
        let beam = &order[..k];
        let max = dist[beam[0]];
        let log_z = max + beam.iter().map(|&i| (dist[i] - max).exp()).sum::<f64>().ln();
        let mut restricted = vec![f64::NEG_INFINITY; dist.len()];
        for &i in beam {
            restricted[i] = dist[i] - log_z;
        }
        restricted
    }

    fn guesses(&self, dist: &[f64]) -> Vec<Guess> {
        if self.options.guesses == 0 {
            return Vec::new();
        }
        ranked(dist)
            .into_iter()
            .take(self.options.guesses)
            .map(|i| Guess {
                word: self.vocab.word(i as TokenId).unwrap_or("<?>").to_string(),
                logprob: dist[i],
            })
            .collect()
    }
}

/// Indices sorted by descending log-probability, ties by index.
fn ranked(dist: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..dist.len()).collect();
    order.sort_by(|&a, &b| dist[b].total_cmp(&dist[a]).then(a.cmp(&b)));
    order
}

/// Entropy in nats, ignoring zero-probability entries.
fn entropy(dist: &[f64]) -> f64 {
    -dist
        .iter()
        .filter(|lp| lp.is_finite())
        .map(|&lp| lp.exp() * lp)
        .sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BigramModel;
    use crate::tokenizer::{Tokenizer, TokenizerOptions};
    use crate::vocab::UnkPolicy;

    /// Next-token distribution depends only on the previous token:
    /// after token `i` the next token is `i + 1` with probability 1/2, the
    /// rest is spread evenly.
    struct Successor {
        size: usize,
    }

    impl LanguageModel for Successor {
        fn vocab_size(&self) -> usize {
            self.size
        }

        fn predict(&self, tokens: &[TokenId]) -> Result<Vec<Vec<f32>>, InferenceError> {
            let rest = 0.5 / (self.size - 1) as f32;
            Ok(tokens
                .iter()
                .map(|&t| {
                    let next = (t as usize + 1) % self.size;
                    (0..self.size)
                        .map(|i| if i == next { 0.5f32.ln() } else { rest.ln() })
                        .collect()
                })
                .collect())
        }
    }

    fn vocab(tokens: &[&str]) -> Vocabulary {
        Vocabulary::from_tokens(tokens.iter().copied(), &UnkPolicy::default()).unwrap()
    }

    fn score<M: LanguageModel>(
        model: &M,
        vocab: &Vocabulary,
        boundary: Option<&str>,
        options: ScoringOptions,
        text: &str,
    ) -> Result<SurprisalResult, InferenceError> {
        let tok = Tokenizer::new(vocab, TokenizerOptions::default());
        let sentence = tok.sentence(0, text);
        let encoded = tok.encode(&sentence);
        ScoringEngine::new(model, vocab, boundary, options).score(&sentence, &encoded)
    }

    #[test]
    fn first_word_has_no_context_without_boundary() {
        let v = vocab(&["the", "dog", "barked", "<unk>"]);
        let model = Successor { size: 4 };
        let result = score(&model, &v, None, ScoringOptions::default(), "the dog barked loudly").unwrap();

        assert_eq!(result.words.len(), 4);
        assert_eq!(result.words[0].surprisal, None);
        assert_eq!(result.words[0].entropy_reduction, None);
        // the -> dog -> barked -> <unk> follow the successor chain: p = 1/2
        for w in &result.words[1..] {
            assert!((w.surprisal.unwrap() - 1.0).abs() < 1e-6);
        }
        assert_eq!(result.words[3].word, "loudly");
        assert_eq!(result.words[1].entropy_reduction, Some(0.));
        assert_eq!(result.targets, 3);
    }

    #[test]
    fn boundary_gives_every_word_a_context() {
        let v = vocab(&["<eos>", "the", "dog", "<unk>"]);
        let model = Successor { size: 4 };
        let result = score(&model, &v, Some("<eos>"), ScoringOptions::default(), "the dog cat").unwrap();
        assert_eq!(result.words.len(), 3);
        // every step follows the successor chain, including <unk> -> <eos>
        for w in &result.words {
            assert!((w.surprisal.unwrap() - 1.0).abs() < 1e-6);
        }
        // closing boundary is scored for the loss but not reported
        assert_eq!(result.targets, 4);
        assert!((result.loss - std::f64::consts::LN_2).abs() < 1e-6);
    }

    #[test]
    fn nats_and_entropy() {
        let v = vocab(&["<eos>", "a", "b", "c", "<unk>"]);
        let model = Successor { size: 5 };
        let options = ScoringOptions {
            log_base: LogBase::Nats,
            ..ScoringOptions::default()
        };
        let result = score(&model, &v, Some("<eos>"), options, "a b").unwrap();
        let s = result.words[0].surprisal.unwrap();
        assert!((s - std::f64::consts::LN_2).abs() < 1e-6);

        let q = 0.5f64 / 4.;
        let h = -(0.5 * 0.5f64.ln() + 4. * q * q.ln());
        assert!((result.words[0].entropy.unwrap() - h).abs() < 1e-6);
        assert_eq!(result.words[1].entropy_reduction, Some(0.));
    }

    #[test]
    fn beam_renormalizes_over_top_k() {
        let v = vocab(&["<eos>", "a", "b", "c", "<unk>"]);
        let model = Successor { size: 5 };
        let options = ScoringOptions {
            beam: 2,
            ..ScoringOptions::default()
        };
        let result = score(&model, &v, Some("<eos>"), options, "a c").unwrap();
        // beam after <eos> = {a (0.5), <eos> (0.125, lowest index tie)}: p(a) = 0.8
        let expected = -(0.8f64).log2();
        assert!((result.words[0].surprisal.unwrap() - expected).abs() < 1e-6);
        // c is outside the beam after a
        assert_eq!(result.words[1].surprisal, Some(f64::INFINITY));
    }

    #[test]
    fn guesses_are_ranked() {
        let v = vocab(&["<eos>", "a", "b", "c", "<unk>"]);
        let model = Successor { size: 5 };
        let options = ScoringOptions {
            guesses: 2,
            ..ScoringOptions::default()
        };
        let result = score(&model, &v, Some("<eos>"), options, "a b").unwrap();
        let guesses = &result.words[1].guesses;
        assert_eq!(guesses.len(), 2);
        assert_eq!(guesses[0].word, "b");
        assert!((guesses[0].logprob.exp() - 0.5).abs() < 1e-6);
        assert_eq!(guesses[1].word, "<eos>");
    }

    #[test]
    fn options_fit_the_vocabulary() {
        let options = ScoringOptions {
            beam: 100_000,
            guesses: 9,
            ..ScoringOptions::default()
        };
        let fitted = options.for_vocabulary(5);
        assert_eq!(fitted.beam, 0);
        assert_eq!(fitted.guesses, 5);

        let options = ScoringOptions {
            beam: 3,
            ..ScoringOptions::default()
        };
        assert_eq!(options.clone().for_vocabulary(5), options);
    }

    #[test]
    fn malformed_sentences_are_errors() {
        let v = vocab(&["a", "b", "<unk>"]);
        let model = Successor { size: 3 };
        assert!(matches!(
            score(&model, &v, None, ScoringOptions::default(), "   "),
            Err(InferenceError::EmptySentence)
        ));
        assert!(matches!(
            score(&model, &v, None, ScoringOptions::default(), "a"),
            Err(InferenceError::TooShort(1))
        ));
        let small = Successor { size: 2 };
        assert!(matches!(
            score(&small, &v, None, ScoringOptions::default(), "a <unk>"),
            Err(InferenceError::TokenOutOfRange { index: 2, size: 2 })
        ));
    }

    #[test]
    fn deterministic_and_causal_with_an_rnn() {
        let v = vocab(&["<eos>", "the", "nephew", "of", "teachers", "was", "were"]);
        let model = crate::model::rnn::tests::tiny_lstm(7);
        let opts = ScoringOptions::default;

        let a = score(&model, &v, Some("<eos>"), opts(), "the nephew of teachers was").unwrap();
        let b = score(&model, &v, Some("<eos>"), opts(), "the nephew of teachers was").unwrap();
        assert_eq!(a, b);

        let c = score(&model, &v, Some("<eos>"), opts(), "the nephew of teachers were").unwrap();
        for (x, y) in a.words[..4].iter().zip(&c.words[..4]) {
            let (sx, sy) = (x.surprisal.unwrap(), y.surprisal.unwrap());
            assert!((sx - sy).abs() < 1e-5);
        }
        assert_ne!(a.words[4].surprisal, c.words[4].surprisal);
    }

    #[test]
    fn bigram_backend_scores_known_continuations_lower() {
        let v = vocab(&["the", "dog", "barked", "<unk>"]);
        let unigrams = [("the", 0.25), ("dog", 0.25), ("barked", 0.25), ("<unk>", 0.25)]
            .into_iter()
            .map(|(w, p)| (w.to_string(), p))
            .collect();
        let bigrams = [("the dog", 1.0), ("dog barked", 1.0)]
            .into_iter()
            .map(|(w, p)| (w.to_string(), p))
            .collect();
        let model = BigramModel::from_tables(&v, &unigrams, &bigrams);

        let expected = score(&model, &v, None, ScoringOptions::default(), "the dog barked").unwrap();
        let odd = score(&model, &v, None, ScoringOptions::default(), "the barked dog").unwrap();
        assert!(expected.words[1].surprisal.unwrap() < odd.words[1].surprisal.unwrap());
        assert!(expected.loss < odd.loss);
    }
}
