use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use surprisal::config::{self, Experiment, Language};
use surprisal::model::{load_network, select_device};
use surprisal::pipeline::check_vocabulary_fit;
use surprisal::scoring::DEFAULT_BOUNDARY;
use surprisal::vocab::DEFAULT_UNK;
use surprisal::{
    score_file, summary, BigramModel, GuessValues, LanguageModel, LogBase, OutputFormat, OutputMode,
    ResultWriter, RunSummary, ScoringEngine, ScoringOptions, Tokenizer, TokenizerOptions,
    UnkFallback, UnkPolicy, Vocabulary,
};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "surprisal", version)]
#[command(about = "Per-word surprisal of recurrent language models on attachment stimuli")]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score the stimuli of a language with one of its trained models
    Run {
        /// Language selector: en or es
        language: Language,

        /// Model index (0-4)
        model: usize,

        /// Experiments to run; all experiments of the language by default
        #[arg(short, long = "experiment")]
        experiments: Vec<Experiment>,

        /// Project root holding models/, stimuli/ and results/
        #[arg(long, env = "SURPRISAL_ROOT", default_value = ".")]
        root: PathBuf,

        #[command(flatten)]
        scoring: ScoreArgs,
    },

    /// Score a sentence file with explicitly given model and vocabulary
    Eval {
        /// Vocabulary file, one token per line
        #[arg(long)]
        vocab: PathBuf,

        /// Sentence file, one whitespace-tokenized sentence per line
        #[arg(long)]
        sentences: PathBuf,

        /// Output measure file
        #[arg(long)]
        output: PathBuf,

        /// Recurrent model weights (.safetensors)
        #[arg(long, required_unless_present = "unigrams", conflicts_with = "unigrams")]
        model: Option<PathBuf>,

        /// Unigram table (`word prob`) for the bigram model
        #[arg(long, requires = "bigrams")]
        unigrams: Option<PathBuf>,

        /// Bigram table (`word1 word2 prob`) for the bigram model
        #[arg(long, requires = "unigrams")]
        bigrams: Option<PathBuf>,

        #[command(flatten)]
        scoring: ScoreArgs,
    },

    /// Average the final-word surprisal of each attachment condition
    Compile {
        /// Directory holding EN/ and ES/ measure files
        #[arg(long, default_value = "results")]
        results: PathBuf,

        /// Only compile this language
        #[arg(long)]
        lang: Option<Language>,
    },
}

#[derive(Args, Debug)]
struct ScoreArgs {
    /// Run on a CUDA device if one is available
    #[arg(long)]
    cuda: bool,

    /// Suppress the aggregate loss/perplexity report
    #[arg(long)]
    nopp: bool,

    /// Write one loss per sentence instead of per-word measures
    #[arg(long)]
    sentences_only: bool,

    /// Do not write the column header
    #[arg(long)]
    no_header: bool,

    /// Column separator
    #[arg(long, default_value = " ")]
    sep: String,

    /// Unit of surprisal and entropy: bits or nats
    #[arg(long, default_value = "bits")]
    log_base: LogBase,

    /// Compute measures over the top n words only (0 = whole vocabulary)
    #[arg(long, default_value_t = 0)]
    complexn: usize,

    /// Report the n most likely next words for each word
    #[arg(long, default_value_t = 0)]
    guess: usize,

    /// Value printed after each guess: none, probs, scores or ratios
    #[arg(long, default_value = "none")]
    guess_values: GuessValues,

    /// Unknown-token marker in the vocabulary
    #[arg(long, default_value = DEFAULT_UNK)]
    unk: String,

    /// Index for unknown tokens when the marker is absent: first, last or a number
    #[arg(long, default_value = "last")]
    unk_fallback: UnkFallback,

    /// Sentence boundary marker; sentences are wrapped in it when the vocabulary has it
    #[arg(long, default_value = DEFAULT_BOUNDARY)]
    eos: String,

    /// Lowercase words before lookup
    #[arg(long)]
    lowercase: bool,

    /// Split punctuation off words before lookup
    #[arg(long)]
    split_punctuation: bool,

    /// Map numbers to <num> when the vocabulary has it
    #[arg(long)]
    collapse_numbers: bool,
}

impl ScoreArgs {
    fn unk_policy(&self) -> UnkPolicy {
        UnkPolicy {
            marker: self.unk.clone(),
            fallback: self.unk_fallback,
        }
    }

    fn tokenizer_options(&self) -> TokenizerOptions {
        TokenizerOptions {
            lowercase: self.lowercase,
            split_punctuation: self.split_punctuation,
            collapse_numbers: self.collapse_numbers,
        }
    }

    fn scoring_options(&self) -> ScoringOptions {
        ScoringOptions {
            log_base: self.log_base,
            beam: self.complexn,
            guesses: self.guess,
        }
    }

    /// The beam suffix and guess count follow the fitted scoring options.
    fn output_format(&self, scoring: &ScoringOptions) -> OutputFormat {
        OutputFormat {
            mode: if self.sentences_only {
                OutputMode::Sentences
            } else {
                OutputMode::Words
            },
            separator: self.sep.clone(),
            header: !self.no_header,
            guesses: scoring.guesses,
            guess_values: self.guess_values,
            beam: scoring.beam,
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (false, 0) => Level::INFO,
        (false, 1) => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();
}

fn ensure_compatible(
    vocab: &Vocabulary,
    vocab_path: &Path,
    model: &dyn LanguageModel,
    model_path: &Path,
) -> Result<()> {
    if vocab.len() != model.vocab_size() {
        bail!(
            "vocabulary {} has {} tokens but model {} predicts {}",
            vocab_path.display(),
            vocab.len(),
            model_path.display(),
            model.vocab_size()
        );
    }
    Ok(())
}

async fn score_job(
    model: &dyn LanguageModel,
    vocab: &Vocabulary,
    sentences: &Path,
    output: &Path,
    args: &ScoreArgs,
) -> Result<RunSummary> {
    let tokenizer = Tokenizer::new(vocab, args.tokenizer_options());
    let options = args.scoring_options().for_vocabulary(vocab.len());
    let format = args.output_format(&options);
    let engine = ScoringEngine::new(model, vocab, Some(args.eos.as_str()), options);
    if engine.boundary().is_none() {
        warn!(
            "vocabulary has no `{}`; the first word of each sentence is reported without context",
            args.eos
        );
    }
    let mut writer = ResultWriter::create(output, format).await?;
    let summary = score_file(&engine, &tokenizer, sentences, &mut writer).await?;
    Ok(summary)
}

fn report(label: &str, summary: &RunSummary, nopp: bool) {
    if summary.skipped > 0 {
        warn!(
            "{label}: {} of {} sentences were skipped",
            summary.skipped, summary.sentences
        );
    }
    if nopp {
        return;
    }
    match (summary.loss(), summary.perplexity()) {
        (Some(loss), Some(ppl)) => {
            println!("{}", "=".repeat(89));
            println!(
                "| End of testing {label} | test loss {:5.2} | test ppl {:8.2}",
                loss, ppl
            );
            println!("{}", "=".repeat(89));
        }
        _ => println!("| End of testing {label} | no sentences scored"),
    }
}

async fn run(
    root: &Path,
    language: Language,
    model_index: usize,
    experiments: Vec<Experiment>,
    args: &ScoreArgs,
) -> Result<()> {
    let experiments = if experiments.is_empty() {
        language.experiments().to_vec()
    } else {
        experiments
    };
    // every path is checked before anything is loaded
    let jobs = experiments
        .iter()
        .map(|&e| config::resolve(root, language, model_index, e))
        .collect::<Result<Vec<_>, _>>()?;
    let Some(first) = jobs.first() else {
        bail!("no experiments selected");
    };

    let vocab = Vocabulary::load(&first.vocab, &args.unk_policy()).await?;
    let device = select_device(args.cuda);
    let model = load_network(&first.model, &device)?;
    ensure_compatible(&vocab, &first.vocab, &model, &first.model)?;

    for (experiment, paths) in experiments.iter().zip(&jobs) {
        let summary = score_job(&model, &vocab, &paths.sentences, &paths.output, args)
            .await
            .with_context(|| format!("{language} model {model_index}, {experiment}"))?;
        check_vocabulary_fit(&summary, &paths.vocab, &paths.sentences);
        report(&format!("{language}_{model_index}_{experiment}"), &summary, args.nopp);
    }
    Ok(())
}

async fn eval(
    vocab_path: &Path,
    sentences: &Path,
    output: &Path,
    model_path: Option<&Path>,
    tables: Option<(&Path, &Path)>,
    args: &ScoreArgs,
) -> Result<()> {
    config::require("vocabulary", vocab_path)?;
    config::require("sentence", sentences)?;
    let vocab = Vocabulary::load(vocab_path, &args.unk_policy()).await?;

    let (model, model_label): (Box<dyn LanguageModel>, PathBuf) = match (model_path, tables) {
        (Some(path), _) => {
            config::require("model", path)?;
            let device = select_device(args.cuda);
            let model = load_network(path, &device)?;
            (Box::new(model) as Box<dyn LanguageModel>, path.to_path_buf())
        }
        (None, Some((unigrams, bigrams))) => {
            if args.cuda {
                info!("the bigram model always runs on the CPU");
            }
            let model = BigramModel::from_files(&vocab, unigrams, bigrams).await?;
            (Box::new(model) as Box<dyn LanguageModel>, unigrams.to_path_buf())
        }
        (None, None) => bail!("either --model or --unigrams/--bigrams is required"),
    };
    ensure_compatible(&vocab, vocab_path, model.as_ref(), &model_label)?;

    let summary = score_job(model.as_ref(), &vocab, sentences, output, args).await?;
    check_vocabulary_fit(&summary, vocab_path, sentences);
    report(&sentences.display().to_string(), &summary, args.nopp);
    Ok(())
}

async fn compile(results: &Path, lang: Option<Language>) -> Result<()> {
    let languages = match lang {
        Some(language) => vec![language],
        None => vec![Language::En, Language::Es],
    };
    for language in languages {
        if lang.is_none() && !results.join(language.results_dir()).is_dir() {
            warn!(
                "no {} results under {}",
                language.results_dir(),
                results.display()
            );
            continue;
        }
        for &experiment in language.experiments() {
            println!("{language} {experiment}");
            match summary::compile(results, language, experiment).await? {
                Some(means) => println!("{means}"),
                None => println!("\tno complete items"),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Run {
            language,
            model,
            experiments,
            root,
            scoring,
        } => run(&root, language, model, experiments, &scoring).await,
        Command::Eval {
            vocab,
            sentences,
            output,
            model,
            unigrams,
            bigrams,
            scoring,
        } => {
            let tables = unigrams.as_deref().zip(bigrams.as_deref());
            eval(
                &vocab,
                &sentences,
                &output,
                model.as_deref(),
                tables,
                &scoring,
            )
            .await
        }
        Command::Compile { results, lang } => compile(&results, lang).await,
    }
}
