use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use readalong::{
    AlignerConfig, AlignmentStage, AudioFile, BookAligner, BookAlignerBuilder, ChapterText,
    FileTranscription, Granularity, ProgressObserver, ReportMeta,
};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[path = "alignment_report/json_report_formatter.rs"]
mod json_report_formatter;

use json_report_formatter::AlignmentDump;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GranularityChoice {
    Word,
    Segment,
    Phrase,
}

impl GranularityChoice {
    fn granularity(self) -> Granularity {
        match self {
            Self::Word => Granularity::Word,
            Self::Segment => Granularity::Segment,
            Self::Phrase => Granularity::Phrase,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "alignment_report")]
#[command(about = "Align an ebook to its audiobook transcript and write a quality report")]
struct Args {
    /// JSON job file: audio files, per-file transcriptions and chapters.
    #[arg(long, env = "READALONG_REPORT_JOB")]
    job: PathBuf,
    /// Optional JSON aligner config; missing fields keep their defaults.
    #[arg(long, env = "READALONG_REPORT_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "READALONG_REPORT_OUT")]
    out: Option<PathBuf>,
    /// Also write the full sentence (and word) alignment here.
    #[arg(long, env = "READALONG_REPORT_ALIGNMENT_OUT")]
    alignment_out: Option<PathBuf>,
    /// Run word alignment at this granularity.
    #[arg(long, env = "READALONG_REPORT_GRANULARITY", value_enum)]
    granularity: Option<GranularityChoice>,
    #[arg(long, env = "READALONG_REPORT_LOW_RESOURCE", default_value_t = false)]
    low_resource: bool,
    #[arg(long, env = "READALONG_REPORT_THREADS")]
    threads: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct BookJob {
    audio_files: Vec<AudioFile>,
    transcriptions: Vec<FileTranscription>,
    chapters: Vec<ChapterText>,
}

/// Drives one progress bar, restarting it whenever the stage changes.
#[derive(Clone)]
struct BarProgress {
    bar: ProgressBar,
    stage: Arc<Mutex<Option<AlignmentStage>>>,
}

impl BarProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
        );
        bar.set_message("starting...");
        Self {
            bar,
            stage: Arc::new(Mutex::new(None)),
        }
    }
}

impl ProgressObserver for BarProgress {
    fn on_progress(&self, stage: AlignmentStage, delta: usize, total: usize) {
        let mut current = self
            .stage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *current != Some(stage) {
            *current = Some(stage);
            self.bar.reset();
            self.bar.set_length(total as u64);
            self.bar.set_message(stage.as_str());
        }
        self.bar.inc(delta as u64);
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(message) = run() {
        eprintln!("{message}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = Args::parse();
    let repo_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let started = Instant::now();

    let job_path = resolve_path(&repo_root, &args.job);
    require_path_exists(&job_path, "Missing alignment job file.")?;
    let job = load_job(&job_path)?;

    let mut config = match args.config.as_ref() {
        Some(path) => {
            let path = resolve_path(&repo_root, path);
            AlignerConfig::load(&path)
                .map_err(|err| format!("Failed to load config '{}': {err}", path.display()))?
        }
        None => AlignerConfig::default(),
    };
    if args.low_resource {
        config.execution.low_resource = true;
    }
    if args.threads.is_some() {
        config.execution.max_parallel_chapters = args.threads;
    }
    if let Some(choice) = args.granularity {
        config.words.granularity = choice.granularity();
    }

    let progress = BarProgress::new();
    let aligner = build_aligner(config, progress.clone())?;

    let audio_file_count = job.audio_files.len();
    let book = aligner
        .align_book(job.audio_files, &job.transcriptions, &job.chapters)
        .map_err(|err| format!("Book alignment failed: {err}"))?;
    let words = args.granularity.map(|_| aligner.align_words(&book));
    progress.bar.finish_and_clear();

    let meta = ReportMeta {
        generated_at: Utc::now().to_rfc3339(),
        audio_file_count,
        granularity: args
            .granularity
            .map(|choice| choice.granularity().as_str().to_string()),
    };
    let report = aligner
        .report(&book, words.as_deref(), meta)
        .map_err(|err| format!("Failed to build report: {err}"))?;

    let out_path = resolve_out_path(&repo_root, args.out.as_ref());
    json_report_formatter::write_report(&out_path, &report)?;
    println!("{}", out_path.display());

    if let Some(path) = args.alignment_out.as_ref() {
        let path = resolve_path(&repo_root, path);
        json_report_formatter::write_alignment(
            &path,
            &AlignmentDump {
                book: &book,
                words: words.as_deref(),
            },
        )?;
        println!("{}", path.display());
    }

    tracing::info!(
        chapters = report.aggregates.counts.chapters,
        missing_chapters = report.aggregates.counts.missing_chapters,
        alignment_score = format!("{:.3}", report.aggregates.alignment_score),
        elapsed_secs = format!("{:.2}", started.elapsed().as_secs_f64()),
        "report: done"
    );
    Ok(())
}

fn build_aligner(
    config: AlignerConfig,
    progress: BarProgress,
) -> Result<BookAligner, String> {
    BookAlignerBuilder::new(config)
        .with_progress(Box::new(progress))
        .build()
        .map_err(|err| format!("Failed to build BookAligner: {err}"))
}

fn load_job(path: &Path) -> Result<BookJob, String> {
    let data = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read job file '{}': {err}", path.display()))?;
    serde_json::from_str(&data)
        .map_err(|err| format!("Failed to parse job file '{}': {err}", path.display()))
}

fn resolve_out_path(repo_root: &Path, out: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = out {
        return resolve_path(repo_root, path);
    }

    let run_id = Utc::now().format("%Y%m%dT%H%M%SZ");
    repo_root
        .join("target")
        .join("alignment_reports")
        .join(format!("alignment-report-{run_id}.json"))
}

fn resolve_path(repo_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        repo_root.join(path)
    }
}

fn require_path_exists(path: &Path, message: &str) -> Result<(), String> {
    if path.exists() {
        return Ok(());
    }
    Err(format!("{message} Missing path: {}", path.display()))
}
