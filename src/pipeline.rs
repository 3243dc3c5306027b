//! Streams a sentence file through tokenizer, scoring engine and writer.

use crate::error::{Error, Result};
use crate::model::LanguageModel;
use crate::scoring::ScoringEngine;
use crate::tokenizer::Tokenizer;
use crate::writer::ResultWriter;
use std::path::Path;
use tokio::fs::File as AsyncFile;
use tokio::io::AsyncBufReadExt;
use tracing::{debug, info, warn};

/// OOV share above which a run is reported as a likely vocabulary/stimulus
/// mismatch.
const MISMATCH_OOV_RATE: f64 = 0.5;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub sentences: usize,
    pub skipped: usize,
    pub words: usize,
    pub oov: usize,
    /// Sum of per-sentence mean losses, in nats.
    pub total_loss: f64,
}

impl RunSummary {
    pub fn scored(&self) -> usize {
        self.sentences - self.skipped
    }

    /// Mean per-sentence loss.
    pub fn loss(&self) -> Option<f64> {
        match self.scored() {
            0 => None,
            n => Some(self.total_loss / n as f64),
        }
    }

    pub fn perplexity(&self) -> Option<f64> {
        self.loss().map(f64::exp)
    }

    pub fn oov_rate(&self) -> f64 {
        if self.words == 0 {
            0.
        } else {
            self.oov as f64 / self.words as f64
        }
    }

    pub fn merge(&mut self, other: &RunSummary) {
        self.sentences += other.sentences;
        self.skipped += other.skipped;
        self.words += other.words;
        self.oov += other.oov;
        self.total_loss += other.total_loss;
    }
}

/// Scores every non-blank line of `sentences_path` in order. Sentences that
/// fail inference are logged and skipped; I/O failures abort.
pub async fn score_file<M>(
    engine: &ScoringEngine<'_, M>,
    tokenizer: &Tokenizer<'_>,
    sentences_path: &Path,
    writer: &mut ResultWriter,
) -> Result<RunSummary>
where
    M: LanguageModel + ?Sized,
{
    let start_time = std::time::Instant::now();
    let file = AsyncFile::open(sentences_path)
        .await
        .map_err(|e| Error::io(sentences_path, e))?;
    let reader = tokio::io::BufReader::new(file);
    let mut lines = reader.lines();
    let mut summary = RunSummary::default();

    info!(
        "Scoring {} -> {}",
        sentences_path.display(),
        writer.path().display()
    );
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| Error::io(sentences_path, e))?
    {
        if line.trim().is_empty() {
            continue;
        }
        let sentence = tokenizer.sentence(summary.sentences, &line);
        summary.sentences += 1;

        let encoded = tokenizer.encode(&sentence);
        summary.words += encoded.len();
        summary.oov += encoded.oov.len();

        match engine.score(&sentence, &encoded) {
            Ok(result) => {
                debug!(sentid = sentence.id, loss = result.loss, "scored");
                summary.total_loss += result.loss;
                writer.write(&result).await?;
            }
            Err(e) => {
                warn!(
                    sentid = sentence.id,
                    "skipping sentence `{}` from {}: {e}",
                    sentence.text,
                    sentences_path.display()
                );
                summary.skipped += 1;
            }
        }
    }

    info!(
        "Scored {} of {} sentences from {} in {:.2?}",
        summary.scored(),
        summary.sentences,
        sentences_path.display(),
        start_time.elapsed()
    );
    Ok(summary)
}

/// Warns when most tokens were unknown, which usually means the vocabulary
/// and the stimuli are in different languages. Returns the OOV rate when it
/// crossed that line.
pub fn check_vocabulary_fit(
    summary: &RunSummary,
    vocab_path: &Path,
    sentences_path: &Path,
) -> Option<f64> {
    let rate = summary.oov_rate();
    if summary.words > 0 && rate > MISMATCH_OOV_RATE {
        warn!(
            "{:.0}% of tokens in {} are missing from {}; check that vocabulary and stimuli match",
            rate * 100.,
            sentences_path.display(),
            vocab_path.display()
        );
        return Some(rate);
    }
    if summary.oov > 0 {
        info!(
            "{} of {} tokens were out of vocabulary",
            summary.oov, summary.words
        );
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceError;
    use crate::scoring::ScoringOptions;
    use crate::tokenizer::TokenizerOptions;
    use crate::vocab::{TokenId, UnkPolicy, Vocabulary};
    use crate::writer::OutputFormat;
    use tempdir::TempDir;

    /// Uniform model that refuses sequences containing token 0.
    struct Picky {
        size: usize,
    }

    impl LanguageModel for Picky {
        fn vocab_size(&self) -> usize {
            self.size
        }

        fn predict(&self, tokens: &[TokenId]) -> std::result::Result<Vec<Vec<f32>>, InferenceError> {
            if tokens.contains(&0) {
                return Err(InferenceError::ShapeMismatch {
                    expected: "no zeros".to_string(),
                    got: "zero".to_string(),
                });
            }
            let lp = -(self.size as f32).ln();
            Ok(tokens.iter().map(|_| vec![lp; self.size]).collect())
        }
    }

    #[tokio::test]
    async fn failures_are_skipped_and_order_is_kept() {
        let dir = TempDir::new("pipeline").unwrap();
        let sentences = dir.path().join("stimuli");
        std::fs::write(&sentences, "b c\n\na b\nc b d\nb\n").unwrap();
        let output = dir.path().join("out");

        let vocab = Vocabulary::from_tokens(["a", "b", "c", "<unk>"], &UnkPolicy::default()).unwrap();
        let model = Picky { size: 4 };
        let engine = ScoringEngine::new(&model, &vocab, None, ScoringOptions::default());
        let tokenizer = Tokenizer::new(&vocab, TokenizerOptions::default());
        let mut writer = ResultWriter::create(&output, OutputFormat::default())
            .await
            .unwrap();

        let summary = score_file(&engine, &tokenizer, &sentences, &mut writer)
            .await
            .unwrap();
        assert_eq!(summary.sentences, 4);
        // "a b" hits the model error, "b" is too short
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.words, 8);
        assert_eq!(summary.oov, 1);
        assert!((summary.perplexity().unwrap() - 4.).abs() < 1e-4);

        let contents = std::fs::read_to_string(&output).unwrap();
        let ids: Vec<&str> = contents
            .lines()
            .skip(1)
            .map(|l| l.split(' ').nth(1).unwrap())
            .collect();
        assert_eq!(ids, vec!["0", "0", "2", "2", "2"]);
    }

    #[tokio::test]
    async fn missing_sentence_file_names_the_path() {
        let dir = TempDir::new("pipeline").unwrap();
        let vocab = Vocabulary::from_tokens(["a", "<unk>"], &UnkPolicy::default()).unwrap();
        let model = Picky { size: 2 };
        let engine = ScoringEngine::new(&model, &vocab, None, ScoringOptions::default());
        let tokenizer = Tokenizer::new(&vocab, TokenizerOptions::default());
        let mut writer = ResultWriter::create(dir.path().join("out"), OutputFormat::default())
            .await
            .unwrap();

        let missing = dir.path().join("es_extension_stimuli");
        let err = score_file(&engine, &tokenizer, &missing, &mut writer)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("es_extension_stimuli"));
    }

    #[test]
    fn mostly_unknown_stimuli_are_flagged() {
        let vocab = Path::new("models/en_models/vocab.txt");
        let stimuli = Path::new("stimuli/es_replication_stimuli");
        let run = |words, oov| RunSummary {
            sentences: 1,
            words,
            oov,
            ..RunSummary::default()
        };
        assert_eq!(check_vocabulary_fit(&run(10, 8), vocab, stimuli), Some(0.8));
        assert_eq!(check_vocabulary_fit(&run(10, 5), vocab, stimuli), None);
        assert_eq!(check_vocabulary_fit(&run(10, 0), vocab, stimuli), None);
        assert_eq!(check_vocabulary_fit(&run(0, 0), vocab, stimuli), None);
    }

    #[test]
    fn summary_merge_and_rates() {
        let mut total = RunSummary::default();
        assert_eq!(total.perplexity(), None);
        total.merge(&RunSummary {
            sentences: 2,
            skipped: 0,
            words: 4,
            oov: 3,
            total_loss: 2.,
        });
        total.merge(&RunSummary {
            sentences: 3,
            skipped: 1,
            words: 4,
            oov: 1,
            total_loss: 2.,
        });
        assert_eq!(total.scored(), 4);
        assert_eq!(total.loss(), Some(1.));
        assert!((total.oov_rate() - 0.5).abs() < 1e-12);
    }
}
