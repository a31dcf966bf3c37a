use std::env;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use libtest_mimic::{Arguments, Failed, Trial};
use readalong::{
    AlignerConfig, AudioFile, BookAlignment, BookAlignerBuilder, ChapterText, FileTranscription,
    MatchKind,
};
use serde::Deserialize;

const DEFAULT_DELTA_SECS: f64 = 0.05;
const SUITE_NAME: &str = "book_alignment_matches_reference_within_delta";

/// One book: collaborator inputs plus the expected sentence spans.
#[derive(Debug, Deserialize)]
struct ReferenceBook {
    id: String,
    audio_files: Vec<AudioFile>,
    transcriptions: Vec<FileTranscription>,
    chapters: Vec<ChapterText>,
    #[serde(default)]
    config: Option<AlignerConfig>,
    expected: Vec<ExpectedChapter>,
}

#[derive(Debug, Deserialize)]
struct ExpectedChapter {
    spine_index: usize,
    #[serde(default)]
    is_missing_chapter: bool,
    #[serde(default)]
    sentences: Vec<ExpectedSentence>,
}

#[derive(Debug, Deserialize)]
struct ExpectedSentence {
    sentence_index: usize,
    #[serde(default)]
    kind: Option<MatchKind>,
    #[serde(default)]
    start: Option<f64>,
    #[serde(default)]
    end: Option<f64>,
    #[serde(default)]
    audio_file: Option<usize>,
}

fn main() {
    let args = Arguments::from_args();
    let repo_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let delta_secs = env_f64("READALONG_IT_DELTA_SECS", DEFAULT_DELTA_SECS);

    let books = match load_all_books(&repo_root.join("test-data").join("books")) {
        Ok(books) => books,
        Err(err) => {
            run_setup_failure(&args, err);
            return;
        }
    };
    if books.is_empty() {
        run_setup_failure(
            &args,
            "No reference books found under test-data/books.".to_string(),
        );
        return;
    }

    let tests = books
        .into_iter()
        .map(|book| {
            let test_name = format!("{SUITE_NAME}::book::{}", book.id);
            Trial::test(test_name, move || {
                run_reference_book(&book, delta_secs).map_err(Failed::from)
            })
        })
        .collect();

    libtest_mimic::run(&args, tests).exit();
}

fn run_setup_failure(args: &Arguments, message: String) {
    let test = Trial::test(format!("{SUITE_NAME}::setup"), move || {
        Err(Failed::from(message))
    });
    libtest_mimic::run(args, vec![test]).exit();
}

fn run_reference_book(book: &ReferenceBook, delta_secs: f64) -> Result<(), String> {
    let config = book.config.clone().unwrap_or_default();
    let aligner = BookAlignerBuilder::new(config)
        .build()
        .map_err(|err| format!("{}: failed to build aligner: {err}", book.id))?;
    let aligned = aligner
        .align_book(book.audio_files.clone(), &book.transcriptions, &book.chapters)
        .map_err(|err| format!("{}: align_book() failed: {err}", book.id))?;

    check_contiguity(book, &aligned)?;
    compare_alignment(book, &aligned, delta_secs)
}

fn check_contiguity(book: &ReferenceBook, aligned: &BookAlignment) -> Result<(), String> {
    for chapter in &aligned.chapters {
        for pair in chapter.sentences.windows(2) {
            let (prev, next) = (&pair[0].span, &pair[1].span);
            if prev.start > prev.end {
                return Err(format!(
                    "{}: chapter {} sentence {} ends before it starts",
                    book.id, chapter.spine_index, pair[0].sentence_index
                ));
            }
            if prev.audio_file == next.audio_file && (prev.end - next.start).abs() > 1e-9 {
                return Err(format!(
                    "{}: chapter {} sentences {} and {} do not touch ({:.3} vs {:.3})",
                    book.id,
                    chapter.spine_index,
                    pair[0].sentence_index,
                    pair[1].sentence_index,
                    prev.end,
                    next.start
                ));
            }
        }
    }
    Ok(())
}

fn compare_alignment(
    book: &ReferenceBook,
    aligned: &BookAlignment,
    delta_secs: f64,
) -> Result<(), String> {
    for expected in &book.expected {
        let chapter = aligned
            .chapters
            .iter()
            .find(|chapter| chapter.spine_index == expected.spine_index)
            .ok_or_else(|| format!("{}: chapter {} not in output", book.id, expected.spine_index))?;

        if chapter.is_missing_chapter != expected.is_missing_chapter {
            return Err(format!(
                "{}: chapter {} missing flag mismatch (expected {}, got {})",
                book.id, expected.spine_index, expected.is_missing_chapter, chapter.is_missing_chapter
            ));
        }

        for want in &expected.sentences {
            let got = chapter
                .sentences
                .iter()
                .find(|sentence| sentence.sentence_index == want.sentence_index)
                .ok_or_else(|| {
                    format!(
                        "{}: chapter {} sentence {} not resolved",
                        book.id, expected.spine_index, want.sentence_index
                    )
                })?;
            let label = format!(
                "{}: chapter {} sentence {}",
                book.id, expected.spine_index, want.sentence_index
            );

            if let Some(kind) = want.kind {
                if got.kind != kind {
                    return Err(format!(
                        "{label}: kind mismatch (expected {}, got {})",
                        kind.as_str(),
                        got.kind.as_str()
                    ));
                }
            }
            if let Some(audio_file) = want.audio_file {
                if got.span.audio_file != audio_file {
                    return Err(format!(
                        "{label}: audio file mismatch (expected {audio_file}, got {})",
                        got.span.audio_file
                    ));
                }
            }
            for (what, expected_secs, actual_secs) in [
                ("start", want.start, got.span.start),
                ("end", want.end, got.span.end),
            ] {
                if let Some(expected_secs) = expected_secs {
                    let diff = (actual_secs - expected_secs).abs();
                    if diff > delta_secs {
                        return Err(format!(
                            "{label}: {what} off by {diff:.3}s (expected {expected_secs:.3}, got {actual_secs:.3}, delta {delta_secs:.3})"
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

fn load_all_books(dir: &Path) -> Result<Vec<ReferenceBook>, String> {
    require_path_exists(dir, "Missing reference book directory.")?;
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|err| format!("Failed to list '{}': {err}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();
    paths.iter().map(|path| load_book(path)).collect()
}

fn load_book(path: &Path) -> Result<ReferenceBook, String> {
    let file = File::open(path)
        .map_err(|err| format!("Failed to open fixture '{}': {err}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|err| format!("Failed to parse fixture '{}': {err}", path.display()))
}

fn require_path_exists(path: &Path, message: &str) -> Result<(), String> {
    if path.exists() {
        return Ok(());
    }
    Err(format!("{message} Missing path: {}", path.display()))
}

fn env_f64(name: &str, default: f64) -> f64 {
    match env::var(name) {
        Ok(value) => value.trim().parse::<f64>().unwrap_or_else(|err| {
            panic!(
                "Invalid value for {}='{}' (expected f64): {}",
                name, value, err
            )
        }),
        Err(_) => default,
    }
}
