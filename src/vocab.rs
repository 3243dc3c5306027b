use crate::error::{ConfigError, Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::fs::File as AsyncFile;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};

pub type TokenId = u32;

pub const DEFAULT_UNK: &str = "<unk>";

/// Index used for unknown tokens when the vocabulary has no explicit marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnkFallback {
    First,
    #[default]
    Last,
    Index(usize),
}

impl FromStr for UnkFallback {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" => Ok(UnkFallback::First),
            "last" => Ok(UnkFallback::Last),
            _ => s
                .parse::<usize>()
                .map(UnkFallback::Index)
                .map_err(|_| ConfigError::InvalidFallback(s.to_string())),
        }
    }
}

impl fmt::Display for UnkFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnkFallback::First => f.write_str("first"),
            UnkFallback::Last => f.write_str("last"),
            UnkFallback::Index(i) => write!(f, "{i}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnkPolicy {
    pub marker: String,
    pub fallback: UnkFallback,
}

impl Default for UnkPolicy {
    fn default() -> Self {
        UnkPolicy {
            marker: DEFAULT_UNK.to_string(),
            fallback: UnkFallback::default(),
        }
    }
}

/// Closed token table. The index of a token is its line number in the
/// vocabulary file.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    index: HashMap<String, TokenId>,
    words: Vec<String>,
    unk: TokenId,
    has_unk_marker: bool,
}

impl Vocabulary {
    /// Builds a vocabulary from tokens in index order.
    ///
    /// Duplicate or empty tokens are rejected with their 1-based position as
    /// the error line, since either would break the index/line mapping.
    pub fn from_tokens<I, S>(tokens: I, policy: &UnkPolicy) -> Result<Vocabulary, VocabError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index = HashMap::new();
        let mut words = Vec::new();
        for token in tokens {
            let token: String = token.into();
            let line = words.len() + 1;
            if token.is_empty() {
                return Err(VocabError::Empty { line });
            }
            if let Some(&first) = index.get(&token) {
                return Err(VocabError::Duplicate {
                    line,
                    token,
                    first: first as usize + 1,
                });
            }
            index.insert(token.clone(), words.len() as TokenId);
            words.push(token);
        }
        if words.is_empty() {
            return Err(VocabError::NoTokens);
        }

        let (unk, has_unk_marker) = match index.get(&policy.marker) {
            Some(&id) => (id, true),
            None => {
                let id = match policy.fallback {
                    UnkFallback::First => 0,
                    UnkFallback::Last => words.len() - 1,
                    UnkFallback::Index(i) if i < words.len() => i,
                    UnkFallback::Index(i) => {
                        return Err(VocabError::Config(ConfigError::FallbackOutOfRange {
                            index: i,
                            size: words.len(),
                        }))
                    }
                };
                (id as TokenId, false)
            }
        };

        Ok(Vocabulary {
            index,
            words,
            unk,
            has_unk_marker,
        })
    }

    /// Loads a vocabulary file: one token per line.
    pub async fn load<P>(path: P, policy: &UnkPolicy) -> Result<Vocabulary>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let start_time = std::time::Instant::now();

        let file = AsyncFile::open(path).await.map_err(|e| Error::io(path, e))?;
        let reader = tokio::io::BufReader::new(file);
        let mut lines = reader.lines();
        let mut tokens = Vec::new();
        while let Some(line) = lines.next_line().await.map_err(|e| Error::io(path, e))? {
            tokens.push(line.trim_end_matches('\r').to_string());
        }

        let vocab = Vocabulary::from_tokens(tokens, policy).map_err(|e| e.at(path))?;
        if !vocab.has_unk_marker {
            warn!(
                "{} has no `{}` entry; unknown tokens map to index {} (`{}`, fallback {})",
                path.display(),
                policy.marker,
                vocab.unk,
                vocab.words[vocab.unk as usize],
                policy.fallback
            );
        }
        info!(
            "Loaded {} tokens from {} in {:.2?}",
            vocab.len(),
            path.display(),
            start_time.elapsed()
        );
        Ok(vocab)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn get(&self, token: &str) -> Option<TokenId> {
        self.index.get(token).copied()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.index.contains_key(token)
    }

    pub fn word(&self, id: TokenId) -> Option<&str> {
        self.words.get(id as usize).map(String::as_str)
    }

    pub fn unk(&self) -> TokenId {
        self.unk
    }

    /// Whether the unknown index came from an explicit marker rather than the
    /// fallback.
    pub fn has_unk_marker(&self) -> bool {
        self.has_unk_marker
    }

    /// Index of `token`, or the unknown index.
    pub fn lookup(&self, token: &str) -> TokenId {
        self.get(token).unwrap_or(self.unk)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VocabError {
    #[error("vocabulary has no tokens")]
    NoTokens,
    #[error("empty token")]
    Empty { line: usize },
    #[error("duplicate token `{token}` (first seen on line {first})")]
    Duplicate {
        line: usize,
        token: String,
        first: usize,
    },
    #[error(transparent)]
    Config(ConfigError),
}

impl VocabError {
    fn at(self, path: &Path) -> Error {
        match self {
            VocabError::Config(e) => Error::format(path, 0, e.to_string()),
            VocabError::NoTokens => Error::format(path, 0, "vocabulary has no tokens"),
            VocabError::Empty { line } => Error::format(path, line, "empty token"),
            e @ VocabError::Duplicate { line, .. } => Error::format(path, line, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn vocab(tokens: &[&str]) -> Vocabulary {
        Vocabulary::from_tokens(tokens.iter().copied(), &UnkPolicy::default()).unwrap()
    }

    #[test]
    fn index_is_line_ordinal() {
        let v = vocab(&["the", "dog", "barked", "<unk>"]);
        for (i, token) in ["the", "dog", "barked", "<unk>"].iter().enumerate() {
            assert_eq!(v.get(token), Some(i as TokenId));
            assert_eq!(v.word(i as TokenId), Some(*token));
        }
        assert_eq!(v.unk(), 3);
        assert!(v.has_unk_marker());
        assert_eq!(v.lookup("loudly"), 3);
    }

    #[test]
    fn fallback_when_marker_missing() {
        let tokens = ["a", "b", "c"];
        let first = UnkPolicy {
            fallback: UnkFallback::First,
            ..UnkPolicy::default()
        };
        let v = Vocabulary::from_tokens(tokens, &first).unwrap();
        assert_eq!(v.unk(), 0);
        assert!(!v.has_unk_marker());

        let v = Vocabulary::from_tokens(tokens, &UnkPolicy::default()).unwrap();
        assert_eq!(v.unk(), 2);

        let explicit = UnkPolicy {
            fallback: UnkFallback::Index(1),
            ..UnkPolicy::default()
        };
        assert_eq!(Vocabulary::from_tokens(tokens, &explicit).unwrap().unk(), 1);

        let bad = UnkPolicy {
            fallback: UnkFallback::Index(3),
            ..UnkPolicy::default()
        };
        assert!(matches!(
            Vocabulary::from_tokens(tokens, &bad),
            Err(VocabError::Config(ConfigError::FallbackOutOfRange { index: 3, size: 3 }))
        ));
    }

    #[test]
    fn custom_marker() {
        let policy = UnkPolicy {
            marker: "UNK".to_string(),
            fallback: UnkFallback::First,
        };
        let v = Vocabulary::from_tokens(["x", "UNK", "<unk>"], &policy).unwrap();
        assert_eq!(v.unk(), 1);
    }

    #[test]
    fn rejects_duplicates_and_blanks() {
        assert!(matches!(
            Vocabulary::from_tokens(["a", "b", "a"], &UnkPolicy::default()),
            Err(VocabError::Duplicate { line: 3, first: 1, .. })
        ));
        assert!(matches!(
            Vocabulary::from_tokens(["a", "", "b"], &UnkPolicy::default()),
            Err(VocabError::Empty { line: 2 })
        ));
        assert!(matches!(
            Vocabulary::from_tokens(Vec::<String>::new(), &UnkPolicy::default()),
            Err(VocabError::NoTokens)
        ));
    }

    #[test]
    fn parse_fallback() {
        assert_eq!("first".parse::<UnkFallback>().unwrap(), UnkFallback::First);
        assert_eq!("last".parse::<UnkFallback>().unwrap(), UnkFallback::Last);
        assert_eq!("7".parse::<UnkFallback>().unwrap(), UnkFallback::Index(7));
        assert!("middle".parse::<UnkFallback>().is_err());
    }

    #[tokio::test]
    async fn load_from_file() {
        let dir = TempDir::new("vocab").unwrap();
        let path = dir.path().join("vocab.txt");
        std::fs::write(&path, "<eos>\nthe\r\ndog\n<unk>\n").unwrap();

        let v = Vocabulary::load(&path, &UnkPolicy::default()).await.unwrap();
        assert_eq!(v.len(), 4);
        assert_eq!(v.get("the"), Some(1));
        assert_eq!(v.get("dog"), Some(2));
        assert_eq!(v.unk(), 3);
    }

    #[tokio::test]
    async fn load_errors_carry_the_path() {
        let dir = TempDir::new("vocab").unwrap();
        let missing = dir.path().join("nope.txt");
        let err = Vocabulary::load(&missing, &UnkPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(err.to_string().contains("nope.txt"));

        let dup = dir.path().join("dup.txt");
        std::fs::write(&dup, "a\nb\nb\n").unwrap();
        let err = Vocabulary::load(&dup, &UnkPolicy::default())
            .await
            .unwrap_err();
        match err {
            Error::Format { line, path, .. } => {
                assert_eq!(line, 3);
                assert_eq!(path, dup);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn bad_fallback_names_the_vocabulary() {
        let dir = TempDir::new("vocab").unwrap();
        let path = dir.path().join("es_vocab.txt");
        std::fs::write(&path, "hola\nadios\n").unwrap();
        let policy = UnkPolicy {
            fallback: UnkFallback::Index(5),
            ..UnkPolicy::default()
        };

        let err = Vocabulary::load(&path, &policy).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("es_vocab.txt"), "{msg}");
        assert!(msg.contains("fallback index 5"), "{msg}");
    }
}
