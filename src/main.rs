#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! # grademate
//! ## Introduction
//!
//! Grades free-text answers against a reference answer and flags answers
//! that are near copies of each other.
//!
//! ## Models
//!
//! Models are fetched from the Hugging Face hub on first use. Set
//! `GRADEMATE_MODEL_DIR` to read them from a local directory instead. Other
//! settings are listed in `Config::from_env`.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use bpaf::*;
use dotenvy::dotenv;
use grademate::{
    Config, Dispatcher, Embedder, Pipeline, PlagiarismChecker, TextExtractor,
    evaluator::{Evaluator, scale_score},
    plagiarism::PeerMatch,
    store::{JsonFileStore, PostgrestStore, SubmissionStore},
};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Panel, Style, Width, object::Rows},
};
use tracing::metadata::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, util::SubscriberInitExt};
use uuid::Uuid;

/// Text given inline or as a file to read.
#[derive(Debug, Clone)]
enum Source {
    /// Literal text.
    Text(String),
    /// A text, PDF or image file.
    File(PathBuf),
}

/// Where `process` reads and writes records.
#[derive(Debug, Clone)]
enum Backend {
    /// A JSON store file.
    Json(PathBuf),
    /// The Supabase project configured in the environment.
    Postgrest,
}

/// Top-level CLI commands.
#[derive(Debug, Clone)]
enum Cmd {
    /// Score one answer
    Evaluate {
        /// Reference answer
        reference: Source,
        /// Candidate answer
        answer:    Source,
        /// Scale to report the score on
        max_score: Option<f64>,
    },
    /// Print the text of a file
    Extract(PathBuf),
    /// Compare one answer with its peers
    Plagiarism {
        /// Candidate answer file
        candidate: PathBuf,
        /// Peer answer files
        peers:     Vec<PathBuf>,
        /// Similarity threshold
        threshold: Option<f64>,
    },
    /// Run the submission pipeline
    Process {
        /// Record storage
        backend: Backend,
        /// Submissions to process
        ids:     Vec<Uuid>,
    },
}

/// Parse the command line arguments and return a `Cmd` enum
fn options() -> Cmd {
    /// parses inline text or a file for the given flag pair
    fn source(
        name: &'static str,
        file_name: &'static str,
        what: &'static str,
    ) -> impl Parser<Source> {
        let text = long(name)
            .help(what)
            .argument::<String>("TEXT")
            .map(Source::Text);
        let file = long(file_name)
            .help("Read it from a text, PDF or image file")
            .argument::<PathBuf>("PATH")
            .map(Source::File);
        construct!([text, file])
    }

    /// parses a file name
    fn f(help: &'static str) -> impl Parser<PathBuf> {
        positional::<PathBuf>("FILE").help(help)
    }

    let reference = source("reference", "reference-file", "Reference answer text");
    let answer = source("answer", "answer-file", "Candidate answer text");
    let max_score = long("max-score")
        .help("Report the score on this scale instead of 0-10")
        .argument::<f64>("SCORE")
        .optional();
    let evaluate = construct!(Cmd::Evaluate {
        reference,
        answer,
        max_score
    })
    .to_options()
    .command("evaluate")
    .help("Score an answer against a reference answer");

    let file = f("PDF or image file");
    let extract = construct!(Cmd::Extract(file))
        .to_options()
        .command("extract")
        .help("Extract text from a PDF or a photo of handwriting");

    let candidate = f("Candidate answer file");
    let peers = long("peer")
        .help("Peer answer file, may be repeated")
        .argument::<PathBuf>("FILE")
        .many();
    let threshold = long("threshold")
        .help("Similarity above which answers count as copies")
        .argument::<f64>("THRESHOLD")
        .optional();
    let plagiarism = construct!(Cmd::Plagiarism {
        candidate,
        peers,
        threshold
    })
    .to_options()
    .command("plagiarism")
    .help("Check an answer against its peers");

    let json = long("store")
        .help("JSON store file")
        .argument::<PathBuf>("FILE")
        .map(Backend::Json);
    let rest = long("postgrest")
        .help("Use the Supabase project from SUPABASE_URL and SUPABASE_ANON_KEY")
        .req_flag(Backend::Postgrest);
    let backend = construct!([json, rest]);
    let ids = positional::<Uuid>("ID")
        .help("Submission id")
        .some("at least one submission id is required");
    let process = construct!(Cmd::Process { backend, ids })
        .to_options()
        .command("process")
        .help("Extract, grade, screen and persist submissions");

    let cmd = construct!([evaluate, extract, plagiarism, process]);

    cmd.to_options()
        .descr("Automated grading of free-text answers")
        .run()
}

/// One row of the `process` summary.
#[derive(Tabled)]
struct ProcessRow {
    #[tabled(rename = "Submission")]
    /// Submission id.
    id:          String,
    #[tabled(rename = "Status")]
    /// Final status or the error that aborted the run.
    status:      String,
    #[tabled(rename = "Score")]
    /// Score on the assignment's scale.
    score:       String,
    #[tabled(rename = "Plagiarized")]
    /// Whether the answer was rejected.
    plagiarized: bool,
}

/// One row of the `plagiarism` summary.
#[derive(Tabled)]
struct PeerRow {
    #[tabled(rename = "Peer")]
    /// Peer file.
    peer:    String,
    #[tabled(rename = "Verdict")]
    /// Outcome for this peer.
    verdict: String,
}

/// Describes what the plagiarism scan made of the peer at `index`.
fn peer_verdict(found: Option<PeerMatch>, index: usize, text: &str) -> String {
    match found {
        Some(hit) if hit.peer_index == index => {
            format!("match ({:.1}%)", hit.similarity * 100.0)
        }
        Some(hit) if hit.peer_index < index => String::from("not checked"),
        _ if text.trim().is_empty() => String::from("skipped (blank)"),
        _ => String::from("below threshold"),
    }
}

/// Reads answer text from a plain text file, or extracts it from a PDF or
/// image.
async fn read_text(extractor: &TextExtractor, path: &Path) -> Result<String> {
    let is_plain = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "txt" | "md"));

    if is_plain {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Could not read {}", path.display()))
    } else {
        extractor
            .extract_text(path)
            .await
            .with_context(|| format!("Could not extract text from {}", path.display()))
    }
}

/// Resolves a [`Source`] into text.
async fn resolve(extractor: &TextExtractor, source: Source) -> Result<String> {
    match source {
        Source::Text(text) => Ok(text),
        Source::File(path) => read_text(extractor, &path).await,
    }
}

/// Prints `table` with the house style.
fn print_table(table: &mut Table, title: &str) {
    eprintln!(
        "{}",
        table
            .with(Panel::header(title))
            .with(Modify::new(Rows::new(1..)).with(Width::wrap(48).keep_words(true)))
            .with(
                Modify::new(Rows::first())
                    .with(Alignment::center())
                    .with(Alignment::center_vertical()),
            )
            .with(Style::modern())
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let fmt = fmt::layer()
        .without_time()
        .with_file(false)
        .with_line_number(false);
    let filter_layer = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("GRADEMATE_LOG")
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(fmt)
        .with(filter_layer)
        .init();

    let cmd = options();
    let config = Config::from_env();
    let embedder = Arc::new(Embedder::from_config(&config));
    let extractor = Arc::new(TextExtractor::from_config(&config));

    match cmd {
        Cmd::Evaluate {
            reference,
            answer,
            max_score,
        } => {
            let reference = resolve(&extractor, reference).await?;
            let answer = resolve(&extractor, answer).await?;
            let mut evaluation = Evaluator::new(embedder).evaluate(&reference, &answer).await;
            let title = match max_score {
                Some(max) => {
                    evaluation.score = scale_score(evaluation.score, max);
                    format!("Evaluation (out of {max})")
                }
                None => String::from("Evaluation (out of 10)"),
            };
            print_table(&mut Table::new([evaluation]), &title);
        }
        Cmd::Extract(path) => {
            let text = extractor.extract_text(&path).await?;
            println!("{text}");
        }
        Cmd::Plagiarism {
            candidate,
            peers,
            threshold,
        } => {
            let threshold = threshold.unwrap_or(config.plagiarism_threshold());
            let candidate_text = read_text(&extractor, &candidate).await?;
            let mut peer_texts = Vec::with_capacity(peers.len());
            for peer in &peers {
                peer_texts.push(read_text(&extractor, peer).await?);
            }

            let found = PlagiarismChecker::new(embedder)
                .check(&candidate_text, &peer_texts, threshold)
                .await?;
            let rows = peers
                .iter()
                .zip(&peer_texts)
                .enumerate()
                .map(|(index, (peer, text))| PeerRow {
                    peer:    peer.display().to_string(),
                    verdict: peer_verdict(found, index, text),
                });
            let title = if found.is_some() {
                format!("Plagiarism detected (threshold {threshold})")
            } else {
                format!("No plagiarism (threshold {threshold})")
            };
            print_table(&mut Table::new(rows), &title);
        }
        Cmd::Process { backend, ids } => {
            let store: Arc<dyn SubmissionStore> = match backend {
                Backend::Json(path) => Arc::new(JsonFileStore::open(&path).await?),
                Backend::Postgrest => {
                    let env = config.supabase().context(
                        "SUPABASE_URL and SUPABASE_ANON_KEY must be set to use --postgrest.",
                    )?;
                    Arc::new(PostgrestStore::new(env))
                }
            };

            let pipeline = Arc::new(Pipeline::new(
                store,
                extractor,
                embedder,
                config.plagiarism_threshold(),
            ));
            let outcomes = Dispatcher::new(pipeline, config.workers())
                .run_all(ids)
                .await;

            let failures = outcomes.iter().filter(|(_, o)| o.is_err()).count();
            let rows = outcomes.into_iter().map(|(id, outcome)| match outcome {
                Ok(report) => ProcessRow {
                    id:          id.to_string(),
                    status:      report.submission.status.to_string(),
                    score:       format!("{:.2}", report.submission.score),
                    plagiarized: report.submission.plagiarized,
                },
                Err(err) => ProcessRow {
                    id:          id.to_string(),
                    status:      format!("{:#}", anyhow::Error::new(err)),
                    score:       String::from("-"),
                    plagiarized: false,
                },
            });
            print_table(&mut Table::new(rows), "Processed submissions");

            if failures > 0 {
                anyhow::bail!("{failures} submission(s) could not be processed");
            }
        }
    }

    Ok(())
}
