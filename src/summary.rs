//! Condition means over measure files.
//!
//! Stimuli come in items of four consecutive sentences that differ only in
//! attachment and number:
//!
//! ```text
//! Andrew had dinner yesterday with the nephew of the teachers that was
//! Andrew had dinner yesterday with the nephews of the teacher that was
//! Andrew had dinner yesterday with the nephew of the teachers that were
//! Andrew had dinner yesterday with the nephews of the teacher that were
//! ```
//!
//! The critical measure is the surprisal of each sentence's final word.

use crate::config::{Experiment, Language};
use crate::error::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DEFAULT_SENTID_COLUMN: usize = 1;
const DEFAULT_SURP_COLUMN: usize = 4;

/// Final-word surprisals of one four-sentence item, in stimulus order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Item {
    pub high_sg: f64,
    pub low_sg: f64,
    pub low_pl: f64,
    pub high_pl: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConditionMeans {
    pub items: usize,
    pub high_sg: f64,
    pub low_sg: f64,
    pub high_pl: f64,
    pub low_pl: f64,
}

impl ConditionMeans {
    pub fn from_items(items: &[Item]) -> Option<ConditionMeans> {
        if items.is_empty() {
            return None;
        }
        let n = items.len() as f64;
        let mean = |f: fn(&Item) -> f64| items.iter().map(f).sum::<f64>() / n;
        Some(ConditionMeans {
            items: items.len(),
            high_sg: mean(|i| i.high_sg),
            low_sg: mean(|i| i.low_sg),
            high_pl: mean(|i| i.high_pl),
            low_pl: mean(|i| i.low_pl),
        })
    }
}

impl fmt::Display for ConditionMeans {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\tHIGH SG: {}", self.high_sg)?;
        writeln!(f, "\tLOW SG: {}", self.low_sg)?;
        writeln!(f, "\tHIGH PL: {}", self.high_pl)?;
        write!(f, "\tLOW PL: {}", self.low_pl)
    }
}

/// Surprisal of the last word of every sentence in a measure file, in file
/// order. Column positions and the separator come from the header when there
/// is one; headerless files are split on whitespace.
pub fn final_word_surprisals(contents: &str, path: &Path) -> Result<Vec<f64>> {
    let mut lines = contents.lines().enumerate().peekable();
    let (mut sentid_col, mut surp_col) = (DEFAULT_SENTID_COLUMN, DEFAULT_SURP_COLUMN);
    let mut separator = None;
    if let Some(&(_, first)) = lines.peek() {
        if let Some(sep) = header_separator(first) {
            separator = sep;
            let columns = fields(first, separator);
            sentid_col = position(&columns, "sentid").unwrap_or(sentid_col);
            surp_col = columns
                .iter()
                .position(|c| c.starts_with("surp"))
                .unwrap_or(surp_col);
            lines.next();
        }
    }

    let mut finals = Vec::new();
    let mut current: Option<(&str, f64)> = None;
    for (i, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields = fields(line, separator);
        let (Some(&sentid), Some(surp)) = (fields.get(sentid_col), fields.get(surp_col)) else {
            return Err(Error::format(path, i + 1, "too few columns"));
        };
        let surp = surp
            .parse::<f64>()
            .map_err(|e| Error::format(path, i + 1, format!("bad surprisal `{surp}`: {e}")))?;
        match current {
            Some((id, _)) if id != sentid => {
                finals.extend(current.map(|(_, s)| s));
                current = Some((sentid, surp));
            }
            _ => current = Some((sentid, surp)),
        }
    }
    finals.extend(current.map(|(_, s)| s));
    Ok(finals)
}

/// Recognizes a `word{sep}sentid...` header. The inner option is the
/// separator, `None` when it is whitespace.
fn header_separator(line: &str) -> Option<Option<&str>> {
    let rest = line.strip_prefix("word")?;
    let sep = &rest[..rest.find("sentid")?];
    if sep.is_empty() {
        None
    } else if sep.trim().is_empty() {
        Some(None)
    } else {
        Some(Some(sep))
    }
}

fn fields<'a>(line: &'a str, separator: Option<&str>) -> Vec<&'a str> {
    match separator {
        Some(sep) => line.split(sep).map(str::trim).collect(),
        None => line.split_whitespace().collect(),
    }
}

fn position(columns: &[&str], name: &str) -> Option<usize> {
    columns.iter().position(|c| *c == name)
}

/// Groups final-word surprisals into items of four. A trailing partial item
/// is dropped.
pub fn items(finals: &[f64]) -> Vec<Item> {
    finals
        .chunks_exact(4)
        .map(|c| Item {
            high_sg: c[0],
            low_sg: c[1],
            low_pl: c[2],
            high_pl: c[3],
        })
        .collect()
}

/// Measure files of one experiment under `results/{LANG}/`, sorted.
pub async fn measure_files(
    results_dir: &Path,
    language: Language,
    experiment: Experiment,
) -> Result<Vec<PathBuf>> {
    let dir = results_dir.join(language.results_dir());
    let suffix = format!("_{experiment}_measures");
    let mut entries = tokio::fs::read_dir(&dir)
        .await
        .map_err(|e| Error::io(&dir, e))?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| Error::io(&dir, e))? {
        let name = entry.file_name();
        if name.to_string_lossy().ends_with(&suffix) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Condition means of one experiment over every model's measure file.
pub async fn compile(
    results_dir: &Path,
    language: Language,
    experiment: Experiment,
) -> Result<Option<ConditionMeans>> {
    let files = measure_files(results_dir, language, experiment).await?;
    let mut all = Vec::new();
    for path in &files {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        let finals = final_word_surprisals(&contents, path)?;
        if finals.len() % 4 != 0 {
            warn!(
                "{} has {} sentences, dropping the incomplete last item",
                path.display(),
                finals.len()
            );
        }
        all.extend(items(&finals));
    }
    info!(
        "{language} {experiment}: {} items from {} files",
        all.len(),
        files.len()
    );
    Ok(ConditionMeans::from_items(&all))
}
