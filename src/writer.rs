//! Appends results to the output file one sentence at a time. Each sentence
//! block is written, flushed and synced before the next sentence is scored,
//! so an interrupted run leaves whole blocks for every finished sentence.

use crate::error::{ConfigError, Error, Result};
use crate::scoring::{Guess, SurprisalResult};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs::File as AsyncFile;
use tokio::io::AsyncWriteExt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// One row per word.
    #[default]
    Words,
    /// One `text:loss` line per sentence.
    Sentences,
}

/// What follows each guessed word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GuessValues {
    /// Nothing, only the guessed words.
    #[default]
    None,
    /// Probability renormalized over the reported guesses (`gprob`).
    Probs,
    /// Log-probability (`gscore`).
    Scores,
    /// Log-probability relative to the best guess (`gratio`).
    Ratios,
}

impl GuessValues {
    fn column(self) -> Option<&'static str> {
        match self {
            GuessValues::None => None,
            GuessValues::Probs => Some("gprob"),
            GuessValues::Scores => Some("gscore"),
            GuessValues::Ratios => Some("gratio"),
        }
    }

    fn values(self, guesses: &[Guess]) -> Vec<f64> {
        match self {
            GuessValues::None => Vec::new(),
            GuessValues::Probs => {
                let total: f64 = guesses.iter().map(|g| g.logprob.exp()).sum();
                guesses.iter().map(|g| g.logprob.exp() / total).collect()
            }
            GuessValues::Scores => guesses.iter().map(|g| g.logprob).collect(),
            GuessValues::Ratios => {
                let best = guesses.first().map_or(f64::NAN, |g| g.logprob);
                guesses.iter().map(|g| g.logprob / best).collect()
            }
        }
    }
}

impl FromStr for GuessValues {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(GuessValues::None),
            "probs" => Ok(GuessValues::Probs),
            "scores" => Ok(GuessValues::Scores),
            "ratios" => Ok(GuessValues::Ratios),
            _ => Err(ConfigError::InvalidGuessValues(s.to_string())),
        }
    }
}

impl fmt::Display for GuessValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GuessValues::None => "none",
            GuessValues::Probs => "probs",
            GuessValues::Scores => "scores",
            GuessValues::Ratios => "ratios",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputFormat {
    pub mode: OutputMode,
    pub separator: String,
    pub header: bool,
    /// Guess columns per row.
    pub guesses: usize,
    pub guess_values: GuessValues,
    /// Beam size, shown as a suffix on the complexity columns when set.
    pub beam: usize,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat {
            mode: OutputMode::Words,
            separator: " ".to_string(),
            header: true,
            guesses: 0,
            guess_values: GuessValues::None,
            beam: 0,
        }
    }
}

impl OutputFormat {
    pub fn header(&self) -> Option<String> {
        if !self.header || self.mode == OutputMode::Sentences {
            return None;
        }
        let suffix = if self.beam > 0 {
            self.beam.to_string()
        } else {
            String::new()
        };
        let mut columns = vec![
            "word".to_string(),
            "sentid".to_string(),
            "sentpos".to_string(),
            "wlen".to_string(),
            format!("surp{suffix}"),
            format!("entropy{suffix}"),
            format!("entred{suffix}"),
        ];
        for i in 0..self.guesses {
            columns.push(format!("guess{i}"));
            if let Some(column) = self.guess_values.column() {
                columns.push(format!("{column}{i}"));
            }
        }
        Some(columns.join(&self.separator))
    }

    /// Formats the whole block for one sentence, newline terminated.
    pub fn format(&self, result: &SurprisalResult) -> String {
        if self.mode == OutputMode::Sentences {
            return format!("{}:{}\n", result.text, result.loss);
        }

        let mut out = String::new();
        for w in &result.words {
            let mut fields = vec![
                w.word.clone(),
                result.sentid.to_string(),
                w.sentpos.to_string(),
                w.wlen().to_string(),
                value(w.surprisal),
                value(w.entropy),
                value(w.entropy_reduction),
            ];
            let values = self.guess_values.values(&w.guesses);
            for i in 0..self.guesses {
                match w.guesses.get(i) {
                    Some(g) => fields.push(g.word.clone()),
                    None => fields.push("NA".to_string()),
                }
                if self.guess_values != GuessValues::None {
                    match values.get(i) {
                        Some(v) => fields.push(format!("{v:.3}")),
                        None => fields.push("NaN".to_string()),
                    }
                }
            }
            out.push_str(&fields.join(&self.separator));
            out.push('\n');
        }
        out
    }
}

fn value(v: Option<f64>) -> String {
    match v {
        Some(v) => v.to_string(),
        None => "NaN".to_string(),
    }
}

pub struct ResultWriter {
    path: PathBuf,
    file: AsyncFile,
    format: OutputFormat,
    sentences: usize,
}

impl ResultWriter {
    /// Creates (or truncates) `path`, creating parent directories, and writes
    /// the header.
    pub async fn create<P>(path: P, format: OutputFormat) -> Result<ResultWriter>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::write(parent, e))?;
        }
        let file = AsyncFile::create(&path)
            .await
            .map_err(|e| Error::write(&path, e))?;
        let mut writer = ResultWriter {
            path,
            file,
            format,
            sentences: 0,
        };
        if let Some(header) = writer.format.header() {
            writer.append(format!("{header}\n")).await?;
        }
        Ok(writer)
    }

    pub async fn write(&mut self, result: &SurprisalResult) -> Result<()> {
        let block = self.format.format(result);
        self.append(block).await?;
        self.sentences += 1;
        Ok(())
    }

    async fn append(&mut self, block: String) -> Result<()> {
        self.file
            .write_all(block.as_bytes())
            .await
            .map_err(|e| Error::write(&self.path, e))?;
        self.file
            .flush()
            .await
            .map_err(|e| Error::write(&self.path, e))?;
        self.file
            .sync_data()
            .await
            .map_err(|e| Error::write(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sentences_written(&self) -> usize {
        self.sentences
    }
}
