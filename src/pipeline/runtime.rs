use std::ops::Range;

use rayon::prelude::*;

use crate::alignment::locator::{ChapterLocator, ClaimedRange, LocateStrategy, UsedOffsets};
use crate::alignment::normalize::matching_form;
use crate::alignment::refine::{
    join_chapter_boundaries, ChapterBounds, GapRefiner, RefineSummary, TimePoint,
};
use crate::alignment::report::{build_report, AlignmentReport, ReportMeta};
use crate::alignment::sentence_matcher::SentenceMatcher;
use crate::alignment::transcript::Transcript;
use crate::alignment::words::WordAligner;
use crate::config::AlignerConfig;
use crate::error::AlignmentError;
use crate::pipeline::traits::{
    AlignmentStage, ProgressObserver, SpokenLengthEstimator, WordGrouper,
};
use crate::types::{
    AudioFile, BookAlignment, ChapterAlignment, ChapterKind, ChapterText, FileTranscription,
    SkippedSentence, WordAlignment,
};

/// Book-level aligner: locates and matches every chapter against one
/// transcript, refines the result and optionally aligns words.
pub struct BookAligner {
    config: AlignerConfig,
    pool: Option<rayon::ThreadPool>,
    progress: Box<dyn ProgressObserver>,
    spoken_length: Box<dyn SpokenLengthEstimator>,
    word_grouper: Box<dyn WordGrouper>,
}

pub(crate) struct BookAlignerParts {
    pub config: AlignerConfig,
    pub pool: Option<rayon::ThreadPool>,
    pub progress: Box<dyn ProgressObserver>,
    pub spoken_length: Box<dyn SpokenLengthEstimator>,
    pub word_grouper: Box<dyn WordGrouper>,
}

/// Read-only collaborators of the locate and retry passes.
struct ChapterPass<'a> {
    transcript: &'a Transcript,
    locator: ChapterLocator<'a>,
    matcher: SentenceMatcher<'a>,
    used: UsedOffsets,
}

struct ChapterAttempt {
    alignment: ChapterAlignment,
    /// Exclusion window the attempt searched.
    bounds: Range<usize>,
    matchable: bool,
}

fn is_droppable(form: &str) -> bool {
    !form.chars().any(char::is_alphanumeric)
}

impl BookAligner {
    pub(crate) fn from_parts(parts: BookAlignerParts) -> Self {
        Self {
            config: parts.config,
            pool: parts.pool,
            progress: parts.progress,
            spoken_length: parts.spoken_length,
            word_grouper: parts.word_grouper,
        }
    }

    pub fn config(&self) -> &AlignerConfig {
        &self.config
    }

    /// Align every chapter to the transcript built from `transcriptions`.
    ///
    /// Chapters are returned in spine order. Chapters that cannot be located
    /// come back with `is_missing_chapter` set; only structurally invalid
    /// input is an error.
    pub fn align_book(
        &self,
        audio_files: Vec<AudioFile>,
        transcriptions: &[FileTranscription],
        chapters: &[ChapterText],
    ) -> Result<BookAlignment, AlignmentError> {
        let mut ordered: Vec<&ChapterText> = chapters.iter().collect();
        ordered.sort_by_key(|chapter| chapter.spine_index);
        if let Some(pair) = ordered
            .windows(2)
            .find(|pair| pair[0].spine_index == pair[1].spine_index)
        {
            return Err(AlignmentError::invalid_input(format!(
                "spine index {} is used by more than one chapter",
                pair[0].spine_index
            )));
        }

        let transcript = Transcript::build(audio_files, transcriptions)?;
        if transcript.is_empty() {
            tracing::warn!(
                chapters = ordered.len(),
                "aligner: transcript is empty; every chapter will be missing"
            );
        }

        let pass = ChapterPass {
            transcript: &transcript,
            locator: ChapterLocator::new(&transcript, &self.config.locator, &self.config.index),
            matcher: SentenceMatcher::new(&transcript, &self.config.matcher),
            used: UsedOffsets::new(ordered.len()),
        };

        let mut attempts = self.locate_chapters(&pass, &ordered);
        self.retry_missing(&pass, &ordered, &mut attempts);

        let mut aligned: Vec<ChapterAlignment> =
            attempts.into_iter().map(|attempt| attempt.alignment).collect();
        self.refine_chapters(&transcript, &mut aligned);

        Ok(BookAlignment { chapters: aligned })
    }

    /// Word- or phrase-level timing for every sentence, one entry per chapter.
    pub fn align_words(&self, book: &BookAlignment) -> Vec<Vec<WordAlignment>> {
        let aligner = WordAligner::new(
            &self.config.words,
            self.spoken_length.as_ref(),
            self.word_grouper.as_ref(),
        );
        let positions: Vec<usize> = (0..book.chapters.len()).collect();
        let total = positions.len();
        let words = self.run_chapters(&positions, |position| {
            let words = aligner.align_chapter(&book.chapters[position]);
            self.progress
                .on_progress(AlignmentStage::AlignWords, 1, total);
            words
        });
        tracing::info!(
            chapters = total,
            sentences = words.iter().map(Vec::len).sum::<usize>(),
            granularity = self.config.words.granularity.as_str(),
            "aligner: word alignment complete"
        );
        words
    }

    pub fn report(
        &self,
        book: &BookAlignment,
        words: Option<&[Vec<WordAlignment>]>,
        meta: ReportMeta,
    ) -> Result<AlignmentReport, AlignmentError> {
        build_report(book, words, meta)
    }

    /// Run `work` for every position, on the pool when one is configured.
    /// Results come back in `positions` order.
    fn run_chapters<T, F>(&self, positions: &[usize], work: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Send + Sync,
    {
        match &self.pool {
            Some(pool) => pool.install(|| positions.par_iter().map(|&p| work(p)).collect()),
            None => positions.iter().map(|&p| work(p)).collect(),
        }
    }

    /// First pass: body chapters in parallel, then front and back matter
    /// inside whatever the body left unclaimed.
    fn locate_chapters(&self, pass: &ChapterPass<'_>, chapters: &[&ChapterText]) -> Vec<ChapterAttempt> {
        let total = chapters.len();
        let strategy = pass.locator.default_strategy();
        let (body, matter): (Vec<usize>, Vec<usize>) =
            (0..total).partition(|&position| chapters[position].kind == ChapterKind::Body);

        let mut slots: Vec<Option<ChapterAttempt>> = (0..total).map(|_| None).collect();
        for phase in [body, matter] {
            let results = self.run_chapters(&phase, |position| {
                let attempt = self.attempt_chapter(pass, chapters[position], position, strategy);
                self.progress
                    .on_progress(AlignmentStage::LocateChapters, 1, total);
                attempt
            });
            for (position, attempt) in phase.into_iter().zip(results) {
                slots[position] = Some(attempt);
            }
        }
        let attempts: Vec<ChapterAttempt> = slots.into_iter().flatten().collect();

        tracing::info!(
            chapters = total,
            strategy = strategy.as_str(),
            missing = attempts
                .iter()
                .filter(|attempt| attempt.alignment.is_missing_chapter)
                .count(),
            "aligner: located chapters"
        );
        attempts
    }

    /// Second pass, sequential: retry missing chapters inside the bounds the
    /// located chapters now leave them.
    fn retry_missing(
        &self,
        pass: &ChapterPass<'_>,
        chapters: &[&ChapterText],
        attempts: &mut [ChapterAttempt],
    ) {
        let missing: Vec<usize> = (0..attempts.len())
            .filter(|&i| attempts[i].alignment.is_missing_chapter && attempts[i].matchable)
            .collect();
        let total = missing.len();
        let default_strategy = pass.locator.default_strategy();
        let mut recovered = 0;

        for position in missing {
            let bounds = pass.used.bounds(position, pass.transcript.char_len());
            let unchanged =
                bounds == attempts[position].bounds && default_strategy == LocateStrategy::Scan;
            if !unchanged {
                let attempt =
                    self.attempt_chapter(pass, chapters[position], position, LocateStrategy::Scan);
                if !attempt.alignment.is_missing_chapter {
                    recovered += 1;
                    tracing::debug!(
                        spine_index = attempt.alignment.spine_index,
                        bounds_start = bounds.start,
                        bounds_end = bounds.end,
                        "aligner: missing chapter recovered on retry"
                    );
                }
                attempts[position] = attempt;
            }
            self.progress
                .on_progress(AlignmentStage::RetryChapters, 1, total);
        }

        if total > 0 {
            tracing::info!(
                retried = total,
                recovered,
                "aligner: retried missing chapters"
            );
        }
    }

    /// Third pass, sequential: each chapter is refined against its
    /// neighbors' resolved edges, then chapter boundaries are joined.
    fn refine_chapters(&self, transcript: &Transcript, chapters: &mut [ChapterAlignment]) {
        let refiner = GapRefiner::new(transcript, &self.config.refine, self.spoken_length.as_ref());
        let total = chapters.len();
        let mut totals = RefineSummary::default();

        for position in 0..total {
            let bounds = neighbor_bounds(chapters, position);
            let summary = refiner.refine_chapter(&mut chapters[position], bounds);
            totals.interpolated += summary.interpolated;
            totals.recovered += summary.recovered;
            totals.rebuilt += summary.rebuilt;
            totals.shared_split += summary.shared_split;
            self.progress
                .on_progress(AlignmentStage::RefineChapters, 1, total);
        }
        join_chapter_boundaries(chapters, transcript);

        tracing::info!(
            chapters = total,
            interpolated = totals.interpolated,
            recovered = totals.recovered,
            rebuilt = totals.rebuilt,
            shared_split = totals.shared_split,
            "aligner: refined chapters"
        );
    }

    fn attempt_chapter(
        &self,
        pass: &ChapterPass<'_>,
        chapter: &ChapterText,
        position: usize,
        strategy: LocateStrategy,
    ) -> ChapterAttempt {
        let forms: Vec<String> = chapter
            .sentences
            .iter()
            .map(|sentence| matching_form(sentence))
            .collect();
        let bounds = pass.used.bounds(position, pass.transcript.char_len());
        let mut alignment = ChapterAlignment::empty(chapter);

        if forms.iter().all(|form| is_droppable(form)) {
            tracing::debug!(
                spine_index = chapter.spine_index,
                sentences = forms.len(),
                "aligner: chapter has no matchable text"
            );
            alignment.dropped = (0..forms.len()).collect();
            return ChapterAttempt {
                alignment,
                bounds,
                matchable: false,
            };
        }

        let outcome = pass
            .locator
            .locate(&forms, bounds.clone(), strategy)
            .map(|location| pass.matcher.match_chapter(chapter, &forms, location, bounds.end));

        match outcome {
            Some(outcome) if !outcome.sentences.is_empty() => {
                let start = outcome.start_offset.unwrap_or(bounds.start);
                let end = outcome.end_offset.max(start);
                pass.used.claim(position, ClaimedRange { start, end });
                tracing::debug!(
                    spine_index = chapter.spine_index,
                    matched = outcome.sentences.len(),
                    skipped = outcome.skipped.len(),
                    dropped = outcome.dropped.len(),
                    start,
                    end,
                    "aligner: chapter matched"
                );
                alignment.sentences = outcome.sentences;
                alignment.skipped = outcome.skipped;
                alignment.dropped = outcome.dropped;
                alignment.transcript_range = Some(start..end);
            }
            _ => {
                tracing::debug!(
                    spine_index = chapter.spine_index,
                    bounds_start = bounds.start,
                    bounds_end = bounds.end,
                    "aligner: chapter missing"
                );
                mark_missing(&mut alignment, chapter, &forms);
            }
        }

        ChapterAttempt {
            alignment,
            bounds,
            matchable: true,
        }
    }
}

fn mark_missing(alignment: &mut ChapterAlignment, chapter: &ChapterText, forms: &[String]) {
    alignment.is_missing_chapter = true;
    alignment.sentences.clear();
    alignment.transcript_range = None;
    alignment.dropped = (0..forms.len()).filter(|&i| is_droppable(&forms[i])).collect();
    alignment.skipped = (0..forms.len())
        .filter(|&i| !is_droppable(&forms[i]))
        .map(|i| SkippedSentence {
            sentence_index: i,
            text: chapter.sentences[i].clone(),
        })
        .collect();
}

/// End of the nearest earlier chapter with sentences and start of the
/// nearest later chapter's first text match.
fn neighbor_bounds(chapters: &[ChapterAlignment], position: usize) -> ChapterBounds {
    let prev_end = chapters[..position]
        .iter()
        .rev()
        .find_map(|chapter| chapter.sentences.last())
        .map(|sentence| TimePoint {
            audio_file: sentence.span.audio_file,
            time: sentence.span.end,
        });
    let next_start = chapters[position + 1..]
        .iter()
        .find_map(|chapter| {
            chapter
                .sentences
                .iter()
                .find(|sentence| sentence.kind.is_text_match())
        })
        .map(|sentence| TimePoint {
            audio_file: sentence.span.audio_file,
            time: sentence.span.start,
        });
    ChapterBounds {
        prev_end,
        next_start,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::pipeline::builder::BookAlignerBuilder;
    use crate::types::{AsrSegment, AsrToken, MatchKind};

    const WORD_SECS: f64 = 0.3;

    /// Whole-word tokens at a fixed pace, one segment per file.
    fn book_audio(files: &[&str]) -> (Vec<AudioFile>, Vec<FileTranscription>) {
        let mut audio_files = Vec::new();
        let mut transcriptions = Vec::new();
        let mut file_start = 0.0;
        for (audio_file, text) in files.iter().enumerate() {
            let tokens: Vec<AsrToken> = text
                .split_whitespace()
                .enumerate()
                .map(|(i, word)| AsrToken {
                    text: word.to_string(),
                    start: i as f64 * WORD_SECS,
                    end: (i + 1) as f64 * WORD_SECS,
                    voice_length: None,
                    confidence: Some(0.9),
                    refined: None,
                })
                .collect();
            let duration = tokens.len() as f64 * WORD_SECS;
            audio_files.push(AudioFile {
                id: format!("part{audio_file}"),
                start: file_start,
                end: file_start + duration,
            });
            file_start += duration;
            transcriptions.push(FileTranscription {
                audio_file,
                segments: vec![AsrSegment {
                    text: text.to_string(),
                    start: 0.0,
                    end: duration,
                    tokens,
                }],
            });
        }
        (audio_files, transcriptions)
    }

    fn chapter(spine_index: usize, kind: ChapterKind, sentences: &[&str]) -> ChapterText {
        ChapterText {
            spine_index,
            title: None,
            sentences: sentences.iter().map(|s| s.to_string()).collect(),
            kind,
        }
    }

    fn aligner(low_resource: bool) -> BookAligner {
        let mut config = AlignerConfig::default();
        config.execution.low_resource = low_resource;
        config.execution.max_parallel_chapters = Some(2);
        BookAlignerBuilder::new(config)
            .build()
            .expect("default aligner builds")
    }

    #[derive(Default)]
    struct CountingProgress {
        located: AtomicUsize,
        refined: AtomicUsize,
    }

    impl ProgressObserver for Arc<CountingProgress> {
        fn on_progress(&self, stage: AlignmentStage, delta: usize, _total: usize) {
            match stage {
                AlignmentStage::LocateChapters => self.located.fetch_add(delta, Ordering::SeqCst),
                AlignmentStage::RefineChapters => self.refined.fetch_add(delta, Ordering::SeqCst),
                _ => 0,
            };
        }
    }

    #[test]
    fn chapters_come_back_in_spine_order() {
        let (audio, transcriptions) = book_audio(&[
            "call me ishmael some years ago never mind how long precisely",
            "it was a bright cold day in april and the clocks were striking thirteen",
        ]);
        let chapters = vec![
            chapter(
                7,
                ChapterKind::Body,
                &["It was a bright cold day in April.", "And the clocks were striking thirteen."],
            ),
            chapter(
                3,
                ChapterKind::Body,
                &["Call me Ishmael.", "Some years ago, never mind how long precisely."],
            ),
        ];
        for low_resource in [true, false] {
            let book = aligner(low_resource)
                .align_book(audio.clone(), &transcriptions, &chapters)
                .expect("book aligns");
            let spines: Vec<usize> = book.chapters.iter().map(|c| c.spine_index).collect();
            assert_eq!(spines, vec![3, 7]);
            assert!(book.chapters.iter().all(|c| !c.is_missing_chapter));
            assert_eq!(book.chapters[1].sentences[0].span.audio_file, 1);
            assert_eq!(book.chapters[0].sentences[0].kind, MatchKind::Exact);
        }
    }

    #[test]
    fn duplicate_spine_index_is_rejected() {
        let (audio, transcriptions) = book_audio(&["call me ishmael"]);
        let chapters = vec![
            chapter(1, ChapterKind::Body, &["Call me Ishmael."]),
            chapter(1, ChapterKind::Body, &["Call me Ishmael."]),
        ];
        let err = aligner(true)
            .align_book(audio, &transcriptions, &chapters)
            .unwrap_err();
        assert!(matches!(err, AlignmentError::InvalidInput { .. }));
    }

    #[test]
    fn chapter_without_text_is_dropped_not_missing() {
        let (audio, transcriptions) = book_audio(&["call me ishmael"]);
        let chapters = vec![
            chapter(0, ChapterKind::FrontMatter, &["* * *", "~"]),
            chapter(1, ChapterKind::Body, &["Call me Ishmael."]),
        ];
        let book = aligner(true)
            .align_book(audio, &transcriptions, &chapters)
            .expect("book aligns");
        let front = &book.chapters[0];
        assert!(!front.is_missing_chapter);
        assert_eq!(front.dropped, vec![0, 1]);
        assert!(front.sentences.is_empty());
    }

    #[test]
    fn missing_chapter_lists_every_sentence_as_skipped() {
        let (audio, transcriptions) = book_audio(&["call me ishmael some years ago"]);
        let chapters = vec![
            chapter(0, ChapterKind::Body, &["Call me Ishmael.", "Some years ago."]),
            chapter(
                1,
                ChapterKind::Body,
                &["Quantum chromodynamics describes gluons.", "...", "Nothing here was read aloud."],
            ),
        ];
        let book = aligner(true)
            .align_book(audio, &transcriptions, &chapters)
            .expect("book aligns");
        let missing = &book.chapters[1];
        assert!(missing.is_missing_chapter);
        assert_eq!(missing.matched_count(), 0);
        assert_eq!(missing.dropped, vec![1]);
        let skipped: Vec<usize> = missing.skipped.iter().map(|s| s.sentence_index).collect();
        assert_eq!(skipped, vec![0, 2]);
    }

    #[test]
    fn progress_sees_every_chapter_once_per_pass() {
        let (audio, transcriptions) = book_audio(&["call me ishmael some years ago"]);
        let chapters = vec![
            chapter(0, ChapterKind::Body, &["Call me Ishmael."]),
            chapter(1, ChapterKind::Body, &["Some years ago."]),
        ];
        let progress = Arc::new(CountingProgress::default());
        let aligner = BookAlignerBuilder::new(AlignerConfig::default())
            .with_progress(Box::new(progress.clone()))
            .build()
            .expect("aligner builds");
        aligner
            .align_book(audio, &transcriptions, &chapters)
            .expect("book aligns");
        assert_eq!(progress.located.load(Ordering::SeqCst), 2);
        assert_eq!(progress.refined.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn word_alignment_covers_every_sentence() {
        let (audio, transcriptions) = book_audio(&["call me ishmael some years ago"]);
        let chapters = vec![chapter(
            0,
            ChapterKind::Body,
            &["Call me Ishmael.", "Some years ago."],
        )];
        let aligner = aligner(false);
        let book = aligner
            .align_book(audio, &transcriptions, &chapters)
            .expect("book aligns");
        let words = aligner.align_words(&book);
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].len(), 2);
        assert_eq!(words[0][0].words.len(), 3);
        assert_eq!(words[0][1].words.len(), 3);
    }

    #[test]
    fn neighbor_bounds_skip_empty_chapters() {
        let (audio, transcriptions) = book_audio(&["call me ishmael some years ago"]);
        let chapters = vec![
            chapter(0, ChapterKind::Body, &["Call me Ishmael."]),
            chapter(1, ChapterKind::Body, &["..."]),
            chapter(2, ChapterKind::Body, &["Some years ago."]),
        ];
        let book = aligner(true)
            .align_book(audio, &transcriptions, &chapters)
            .expect("book aligns");
        let bounds = neighbor_bounds(&book.chapters, 1);
        let prev = bounds.prev_end.expect("previous chapter edge");
        let next = bounds.next_start.expect("next chapter edge");
        assert_eq!(prev.time, book.chapters[0].sentences[0].span.end);
        assert_eq!(next.time, book.chapters[2].sentences[0].span.start);
    }
}
