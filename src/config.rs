//! Maps a language selector and model index onto the project's file layout.
//!
//! ```text
//! models/{lang}_models/{stem}.safetensors
//! models/{lang}_models/vocab.txt
//! stimuli/{lang}_{experiment}_stimuli
//! results/{LANG}/{lang}_{index}_{experiment}_measures
//! ```

use crate::error::ConfigError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const EN_MODELS: [&str; 5] = [
    "hidden650_batch128_dropout0.2_lr20.0",
    "en_hidden650_batch128_dropout0.2_lr20_1",
    "en_hidden650_batch128_dropout0.2_lr20_2",
    "en_hidden650_batch128_dropout0.2_lr20_3",
    "en_hidden650_batch128_dropout0.2_lr20_4",
];

const ES_MODELS: [&str; 5] = [
    "es_hidden650_batch64_dropout0.2_lr20_0",
    "es_hidden650_batch64_dropout0.2_lr20_1",
    "es_hidden650_batch64_dropout0.2_lr20_2",
    "es_hidden650_batch64_dropout0.2_lr20_3",
    "es_hidden650_batch64_dropout0.2_lr20_4",
];

pub const MODEL_EXTENSION: &str = "safetensors";
pub const VOCAB_FILE: &str = "vocab.txt";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Language {
    En,
    Es,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
        }
    }

    /// Upper-case directory name used under `results/`.
    pub fn results_dir(self) -> &'static str {
        match self {
            Language::En => "EN",
            Language::Es => "ES",
        }
    }

    pub fn model_stems(self) -> &'static [&'static str] {
        match self {
            Language::En => &EN_MODELS,
            Language::Es => &ES_MODELS,
        }
    }

    pub fn experiments(self) -> &'static [Experiment] {
        match self {
            Language::En => &[
                Experiment::Replication,
                Experiment::Extension,
                Experiment::ImplicitCausality,
                Experiment::RelativeClause,
            ],
            Language::Es => &[Experiment::Replication, Experiment::Extension],
        }
    }
}

impl FromStr for Language {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "es" => Ok(Language::Es),
            _ => Err(ConfigError::UnknownLanguage(s.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Stimulus sets. `ic` and `rc` exist for English only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Experiment {
    Replication,
    Extension,
    ImplicitCausality,
    RelativeClause,
}

impl Experiment {
    pub fn name(self) -> &'static str {
        match self {
            Experiment::Replication => "replication",
            Experiment::Extension => "extension",
            Experiment::ImplicitCausality => "ic",
            Experiment::RelativeClause => "rc",
        }
    }
}

impl FromStr for Experiment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replication" => Ok(Experiment::Replication),
            "extension" => Ok(Experiment::Extension),
            "ic" => Ok(Experiment::ImplicitCausality),
            "rc" => Ok(Experiment::RelativeClause),
            _ => Err(ConfigError::UnknownExperiment(s.to_string())),
        }
    }
}

impl fmt::Display for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub model: PathBuf,
    pub vocab: PathBuf,
    pub sentences: PathBuf,
    pub output: PathBuf,
}

/// Resolves paths for one (language, model, experiment) job below `root`.
///
/// The model, vocabulary and sentence files must exist; the output path is
/// only computed.
pub fn resolve(
    root: &Path,
    language: Language,
    model_index: usize,
    experiment: Experiment,
) -> Result<ResolvedPaths, ConfigError> {
    let paths = layout(root, language, model_index, experiment)?;
    require("model", &paths.model)?;
    require("vocabulary", &paths.vocab)?;
    require("sentence", &paths.sentences)?;
    Ok(paths)
}

/// Same as [`resolve`] without touching the filesystem.
pub fn layout(
    root: &Path,
    language: Language,
    model_index: usize,
    experiment: Experiment,
) -> Result<ResolvedPaths, ConfigError> {
    let stems = language.model_stems();
    let stem = stems
        .get(model_index)
        .ok_or(ConfigError::ModelIndexOutOfRange {
            language: language.code(),
            index: model_index,
            max: stems.len() - 1,
        })?;
    if !language.experiments().contains(&experiment) {
        return Err(ConfigError::ExperimentUnavailable {
            language: language.code(),
            experiment: experiment.name(),
        });
    }

    let lang = language.code();
    let model_dir = root.join("models").join(format!("{lang}_models"));
    Ok(ResolvedPaths {
        model: model_dir.join(format!("{stem}.{MODEL_EXTENSION}")),
        vocab: model_dir.join(VOCAB_FILE),
        sentences: root
            .join("stimuli")
            .join(format!("{lang}_{experiment}_stimuli")),
        output: root
            .join("results")
            .join(language.results_dir())
            .join(format!("{lang}_{model_index}_{experiment}_measures")),
    })
}

/// Fails with [`ConfigError::MissingPath`] unless `path` is a file.
pub fn require(role: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConfigError::MissingPath {
            role,
            path: path.to_path_buf(),
        })
    }
}
