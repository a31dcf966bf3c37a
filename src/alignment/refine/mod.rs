//! Turns a chapter's matched and skipped sentences into contiguous,
//! non-overlapping spans.

use std::collections::HashSet;

use crate::alignment::transcript::Transcript;
use crate::config::RefineConfig;
use crate::pipeline::traits::SpokenLengthEstimator;
use crate::types::{ChapterAlignment, MatchKind, SentenceMatch, SentenceSpan};

mod interpolation;
mod rebuild;

/// A resolved time point on one audio file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimePoint {
    pub audio_file: usize,
    pub time: f64,
}

/// Neighboring chapters' resolved edges, used as anchors for runs at the
/// start or end of a chapter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChapterBounds {
    pub prev_end: Option<TimePoint>,
    pub next_start: Option<TimePoint>,
}

/// Counts of what a refine pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefineSummary {
    pub interpolated: usize,
    pub recovered: usize,
    pub rebuilt: usize,
    pub shared_split: usize,
}

pub struct GapRefiner<'a> {
    transcript: &'a Transcript,
    config: &'a RefineConfig,
    spoken: &'a dyn SpokenLengthEstimator,
}

impl<'a> GapRefiner<'a> {
    pub fn new(
        transcript: &'a Transcript,
        config: &'a RefineConfig,
        spoken: &'a dyn SpokenLengthEstimator,
    ) -> Self {
        Self {
            transcript,
            config,
            spoken,
        }
    }

    /// Interpolate, backfill, rebuild, split shared spans and enforce contiguity.
    ///
    /// Chapters without a single text match are left untouched.
    pub fn refine_chapter(
        &self,
        chapter: &mut ChapterAlignment,
        bounds: ChapterBounds,
    ) -> RefineSummary {
        let mut summary = RefineSummary::default();
        if chapter.matched_count() == 0 {
            return summary;
        }

        let mut entries = std::mem::take(&mut chapter.sentences);
        for skipped in &chapter.skipped {
            if entries
                .iter()
                .any(|entry| entry.sentence_index == skipped.sentence_index)
            {
                continue;
            }
            entries.push(SentenceMatch {
                sentence_index: skipped.sentence_index,
                text: skipped.text.clone(),
                span: SentenceSpan {
                    start: 0.0,
                    end: 0.0,
                    audio_file: 0,
                    tokens: Vec::new(),
                },
                matched_text: String::new(),
                kind: MatchKind::Interpolated,
                shared_timestamp: false,
                rebuilt: false,
            });
        }
        entries.sort_by_key(|entry| entry.sentence_index);

        summary.interpolated = self.interpolate(&mut entries, bounds);
        summary.recovered = self.backfill(&mut entries);
        summary.rebuilt = self.rebuild(&mut entries);
        summary.shared_split = self.split_shared(&mut entries);
        enforce_contiguity(&mut entries);

        chapter.sentences = entries;
        tracing::debug!(
            spine_index = chapter.spine_index,
            interpolated = summary.interpolated,
            recovered = summary.recovered,
            rebuilt = summary.rebuilt,
            shared_split = summary.shared_split,
            "refine: chapter refined"
        );
        summary
    }

    fn weight(&self, text: &str) -> f64 {
        f64::from(self.spoken.estimate(text).max(1.0))
    }

    /// Split runs of shared-timestamp sentences proportionally to spoken length.
    fn split_shared(&self, entries: &mut [SentenceMatch]) -> usize {
        let mut split = 0;
        let mut i = 0;
        while i < entries.len() {
            let mut j = i + 1;
            while j < entries.len()
                && entries[j].shared_timestamp
                && entries[j].span.audio_file == entries[i].span.audio_file
                && entries[j].span.start == entries[i].span.start
                && entries[j].span.end == entries[i].span.end
            {
                j += 1;
            }
            if j - i > 1 {
                let start = entries[i].span.start;
                let duration = entries[i].span.duration();
                let weights: Vec<f64> = entries[i..j].iter().map(|e| self.weight(&e.text)).collect();
                let total: f64 = weights.iter().sum();
                let mut acc = 0.0;
                for (entry, weight) in entries[i..j].iter_mut().zip(&weights) {
                    entry.span.start = start + duration * acc / total;
                    acc += weight;
                    entry.span.end = start + duration * acc / total;
                }
                split += j - i - 1;
            }
            i = j;
        }
        split
    }
}

/// Close gaps and overlaps between consecutive sentences sharing an audio file.
pub(crate) fn enforce_contiguity(entries: &mut [SentenceMatch]) {
    for entry in entries.iter_mut() {
        if entry.span.end < entry.span.start {
            entry.span.end = entry.span.start;
        }
    }
    for i in 1..entries.len() {
        let (head, tail) = entries.split_at_mut(i);
        let prev = &mut head[i - 1].span;
        let next = &mut tail[0].span;
        if prev.audio_file != next.audio_file {
            continue;
        }
        if prev.end < next.start {
            prev.end = next.start;
        } else if prev.end > next.start {
            let boundary = prev.start.max(next.start);
            prev.end = boundary;
            next.start = boundary;
            if next.end < next.start {
                next.end = next.start;
            }
        }
    }
}

/// Join chapter edges: the last sentence of a chapter runs to the first
/// sentence of the next chapter on the same file, or to the end of its file.
pub fn join_chapter_boundaries(chapters: &mut [ChapterAlignment], transcript: &Transcript) {
    let with_sentences: Vec<usize> = (0..chapters.len())
        .filter(|&i| !chapters[i].sentences.is_empty())
        .collect();
    for (position, &current) in with_sentences.iter().enumerate() {
        let next_first = with_sentences
            .get(position + 1)
            .and_then(|&next| chapters[next].sentences.first())
            .map(|first| (first.span.audio_file, first.span.start, first.span.end));

        let Some(last) = chapters[current].sentences.last_mut() else {
            continue;
        };
        match next_first {
            Some((audio_file, start, _)) if audio_file == last.span.audio_file => {
                if last.span.end <= start {
                    last.span.end = start;
                } else {
                    let boundary = last.span.start.max(start);
                    last.span.end = boundary;
                    if let Some(&next) = with_sentences.get(position + 1) {
                        if let Some(first) = chapters[next].sentences.first_mut() {
                            first.span.start = boundary;
                            first.span.end = first.span.end.max(boundary);
                        }
                    }
                }
            }
            _ => {
                let file_end = transcript.file_duration(last.span.audio_file);
                last.span.end = last.span.end.max(file_end);
            }
        }
    }
}

/// Token indices owned by text-matched sentences.
fn claimed_tokens(entries: &[SentenceMatch]) -> HashSet<usize> {
    entries
        .iter()
        .filter(|entry| entry.kind.is_text_match())
        .flat_map(|entry| entry.span.tokens.iter())
        .filter(|token| token.is_real())
        .map(|token| token.index)
        .collect()
}
