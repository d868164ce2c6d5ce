//! scode - code free-text survey answers from the command line
//!
//! # Input
//! A JSON batch file (or `-` for stdin):
//! `{"questions": [{"name": "P12", "answers": [1, "esgoto", null], "codebook": ["1 | Saúde"]}]}`
//!
//! # Output (via stdout)
//! JSON with one result per question: per-answer assignments, the final
//! codebook, new codes, statistics and the discovery report. Logs and the
//! human-readable summary go to stderr (`RUST_LOG=info` to see them).

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use survey_coder::cache::{CachedService, DiskCache};
use survey_coder::canon::{canonicalize, correct, normalize};
use survey_coder::config::resolve_config;
use survey_coder::question::classify_question;
use survey_coder::{
    CoderError, CodingEngine, CompletionService, EngineConfig, OpenAiService, QuestionInput, QuestionOutcome,
    Result,
};
use tracing::{debug, error, info, warn};

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser)]
#[command(name = "scode")]
#[command(about = "Assign category codes to free-text survey answers")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Code every question of a batch file
    Code(CodeArgs),

    /// Show the corrected, normalized and canonical forms of each text
    Canon {
        /// Texts to canonicalize
        #[arg(required = true)]
        texts: Vec<String>,
    },

    /// Print the detected type of each question without coding it
    Kind {
        /// Batch file, or `-` for stdin
        input: PathBuf,
    },
}

#[derive(Args)]
struct CodeArgs {
    /// Batch file, or `-` for stdin
    input: PathBuf,

    /// Config file (default: <config dir>/survey-coder/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Always call the completion service, ignoring cached responses
    #[arg(long)]
    no_cache: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

// ============================================================================
// Batch I/O
// ============================================================================

#[derive(Debug, Deserialize)]
struct BatchInput {
    questions: Vec<QuestionInput>,
}

#[derive(Serialize)]
struct BatchOutput {
    generated_at: String,
    model: String,
    results: Vec<QuestionResult>,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum QuestionResult {
    Coded(QuestionOutcome),
    Failed { name: String, error: String },
}

fn read_batch(path: &Path) -> Result<BatchInput> {
    let content = if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        fs::read_to_string(path)?
    };

    serde_json::from_str(&content).map_err(|e| CoderError::Input(format!("{}: {}", path.display(), e)))
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        error!("Error: {}", e);
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Code(args) => run_code(&args),
        Commands::Canon { texts } => run_canon(&texts),
        Commands::Kind { input } => run_kind(&input),
    }
}

fn run_code(args: &CodeArgs) -> Result<()> {
    let config = resolve_config(args.config.as_deref())?;
    let batch = read_batch(&args.input)?;
    info!("Loaded {} questions from {}", batch.questions.len(), args.input.display());

    let service = OpenAiService::from_config(&config)?;

    match open_cache(&config, args.no_cache) {
        Some(cache) => {
            let engine = CodingEngine::new(CachedService::new(service, cache), config);
            let outcome = code_all(&engine, &batch, args.pretty);
            info!("{} completion responses served from cache", engine.service().hits());
            outcome
        }
        None => code_all(&CodingEngine::new(service, config), &batch, args.pretty),
    }
}

fn open_cache(config: &EngineConfig, disabled: bool) -> Option<DiskCache> {
    if disabled {
        debug!("Response cache disabled by flag");
        return None;
    }
    let dir = config.cache_dir.as_ref()?;
    match DiskCache::open(dir) {
        Ok(cache) => {
            debug!("Response cache at {:?}", dir);
            Some(cache)
        }
        Err(e) => {
            warn!("Cannot open response cache at {:?}: {}", dir, e);
            None
        }
    }
}

/// Code the batch, print the results, and fail if any question hit a fatal
/// error (the JSON is still printed first).
fn code_all<S: CompletionService>(engine: &CodingEngine<S>, batch: &BatchInput, pretty: bool) -> Result<()> {
    let mut fatal: Option<CoderError> = None;
    let mut results = Vec::with_capacity(batch.questions.len());

    for (input, result) in batch.questions.iter().zip(engine.code_batch(&batch.questions)) {
        match result {
            Ok(outcome) => {
                log_summary(&outcome);
                results.push(QuestionResult::Coded(outcome));
            }
            Err(e) => {
                warn!("{} {}: {}", "✗".red(), input.name.bold(), e);
                results.push(QuestionResult::Failed {
                    name: input.name.clone(),
                    error: e.to_string(),
                });
                if e.is_fatal() && fatal.is_none() {
                    fatal = Some(e);
                }
            }
        }
    }

    let output = BatchOutput {
        generated_at: chrono::Local::now().to_rfc3339(),
        model: engine.config().model.clone(),
        results,
    };
    print_json(&output, pretty)?;

    match fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn log_summary(outcome: &QuestionOutcome) {
    let stats = &outcome.statistics;
    let unmatched = if stats.unmatched == 0 {
        "0 unmatched".green()
    } else {
        format!("{} unmatched", stats.unmatched).red()
    };
    info!(
        "{} {} [{}] - {} answers, {} codes ({} new), {}",
        "✓".green(),
        outcome.name.bold(),
        outcome.question_type.as_str(),
        outcome.assignments.len(),
        stats.total_codes,
        stats.new_codes,
        unmatched
    );
    if outcome.discovery.auto_coded > 0 {
        info!(
            "  {} answers auto-coded after retry",
            outcome.discovery.auto_coded.to_string().yellow()
        );
    }
}

fn run_canon(texts: &[String]) -> Result<()> {
    for text in texts {
        let line = serde_json::json!({
            "input": text,
            "corrected": correct(text),
            "normalized": normalize(text),
            "canonical": canonicalize(text),
        });
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}

fn run_kind(input: &Path) -> Result<()> {
    let batch = read_batch(input)?;
    for question in &batch.questions {
        let line = serde_json::json!({
            "name": question.name,
            "question_type": classify_question(&question.answers),
            "answers": question.answers.len(),
        });
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
