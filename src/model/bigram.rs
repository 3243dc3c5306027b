use super::LanguageModel;
use crate::error::{Error, InferenceError, Result};
use crate::vocab::{TokenId, Vocabulary};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs::File as AsyncFile;
use tokio::io::AsyncBufReadExt;
use tracing::{debug, info};

const BIGRAM_WEIGHT: f64 = 0.8;
const UNIGRAM_WEIGHT: f64 = 0.2;
const FLOOR: f64 = 1e-6;

/// Interpolated bigram model over a fixed vocabulary:
/// `p(w | prev) ∝ 0.8 p(prev w) + 0.2 p(w) + 1e-6`.
pub struct BigramModel {
    unigrams: Vec<f64>,
    successors: HashMap<TokenId, Vec<(TokenId, f64)>>,
}

impl BigramModel {
    /// Builds the model from word-keyed tables. Bigram keys are `"w1 w2"`.
    /// Entries that mention words outside the vocabulary are dropped.
    pub fn from_tables(
        vocab: &Vocabulary,
        unigrams: &HashMap<String, f64>,
        bigrams: &HashMap<String, f64>,
    ) -> BigramModel {
        let mut uni = vec![0.; vocab.len()];
        let mut dropped = 0;
        for (word, prob) in unigrams {
            match vocab.get(word) {
                Some(id) => uni[id as usize] = *prob,
                None => dropped += 1,
            }
        }

        let mut successors: HashMap<TokenId, Vec<(TokenId, f64)>> = HashMap::new();
        for (pair, prob) in bigrams {
            let mut split = pair.splitn(2, ' ');
            let first = split.next().and_then(|w| vocab.get(w));
            let second = split.next().and_then(|w| vocab.get(w));
            match (first, second) {
                (Some(a), Some(b)) => successors.entry(a).or_default().push((b, *prob)),
                _ => dropped += 1,
            }
        }
        if dropped > 0 {
            debug!("dropped {dropped} n-gram entries outside the vocabulary");
        }

        BigramModel {
            unigrams: uni,
            successors,
        }
    }

    async fn load_hashmap_from_file(path: &Path) -> Result<HashMap<String, f64>> {
        let mut hashmap = HashMap::new();
        let file = AsyncFile::open(path).await.map_err(|e| Error::io(path, e))?;
        let reader = tokio::io::BufReader::new(file);
        let mut lines = reader.lines();

        let mut line_no = 0;
        while let Some(line) = lines.next_line().await.map_err(|e| Error::io(path, e))? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let mut split = line.trim_end().rsplitn(2, ' ');
            let prob = split.next().unwrap_or("");
            let prob = prob
                .parse::<f64>()
                .map_err(|e| Error::format(path, line_no, format!("bad probability `{prob}`: {e}")))?;
            let word = split
                .next()
                .ok_or_else(|| Error::format(path, line_no, "missing n-gram"))?
                .to_string();
            hashmap.insert(word, prob);
        }

        Ok(hashmap)
    }

    /// Loads a model from unigram and bigram files with the format
    /// `word prob` and `word1 word2 prob`, one entry per line.
    pub async fn from_files<P>(
        vocab: &Vocabulary,
        unigrams_filename: P,
        bigrams_filename: P,
    ) -> Result<BigramModel>
    where
        P: AsRef<Path>,
    {
        let start_time = std::time::Instant::now();
        let (unigrams_path, bigrams_path) = (unigrams_filename.as_ref(), bigrams_filename.as_ref());
        info!(
            "Loading bigram model from files: {} and {}",
            unigrams_path.display(),
            bigrams_path.display()
        );

        let (unigrams, bigrams) = tokio::try_join!(
            BigramModel::load_hashmap_from_file(unigrams_path),
            BigramModel::load_hashmap_from_file(bigrams_path)
        )?;

        let model = BigramModel::from_tables(vocab, &unigrams, &bigrams);
        info!("Loaded bigram model in {:.2?}", start_time.elapsed());
        Ok(model)
    }

    fn distribution(&self, prev: TokenId) -> Vec<f32> {
        let mut scores: Vec<f64> = self
            .unigrams
            .iter()
            .map(|u| UNIGRAM_WEIGHT * u + FLOOR)
            .collect();
        if let Some(next) = self.successors.get(&prev) {
            for &(id, prob) in next {
                scores[id as usize] += BIGRAM_WEIGHT * prob;
            }
        }
        let log_total = scores.iter().sum::<f64>().ln();
        scores.iter().map(|s| (s.ln() - log_total) as f32).collect()
    }
}

impl LanguageModel for BigramModel {
    fn vocab_size(&self) -> usize {
        self.unigrams.len()
    }

    fn predict(&self, tokens: &[TokenId]) -> Result<Vec<Vec<f32>>, InferenceError> {
        tokens
            .iter()
            .map(|&id| {
                if (id as usize) < self.unigrams.len() {
                    Ok(self.distribution(id))
                } else {
                    Err(InferenceError::TokenOutOfRange {
                        index: id,
                        size: self.unigrams.len(),
                    })
                }
            })
            .collect()
    }
}
