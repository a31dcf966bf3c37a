use std::ops::Range;

use crate::alignment::fuzzy;
use crate::alignment::locator::ChapterLocation;
use crate::alignment::text_match;
use crate::alignment::transcript::Transcript;
use crate::config::MatcherConfig;
use crate::types::{ChapterText, MatchKind, SentenceMatch, SentenceSpan, SkippedSentence, TokenKind};

/// Result of walking one chapter forward through the transcript.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub sentences: Vec<SentenceMatch>,
    pub skipped: Vec<SkippedSentence>,
    pub dropped: Vec<usize>,
    /// Offset where the first matched sentence begins.
    pub start_offset: Option<usize>,
    /// Offset just past the last matched sentence.
    pub end_offset: usize,
}

/// Consecutive failures that triggered window advances.
#[derive(Debug, Clone, Copy)]
struct StuckRun {
    first_sentence: usize,
    cursor: usize,
    advances: usize,
}

pub struct SentenceMatcher<'a> {
    transcript: &'a Transcript,
    config: &'a MatcherConfig,
}

impl<'a> SentenceMatcher<'a> {
    pub fn new(transcript: &'a Transcript, config: &'a MatcherConfig) -> Self {
        Self { transcript, config }
    }

    /// Match `chapter` sentence by sentence, starting at `location` and never
    /// reading past `limit`.
    ///
    /// `forms` holds the matching form of every chapter sentence.
    pub fn match_chapter(
        &self,
        chapter: &ChapterText,
        forms: &[String],
        location: ChapterLocation,
        limit: usize,
    ) -> MatchOutcome {
        let limit = limit.min(self.transcript.char_len());
        let queries: Vec<Vec<char>> = forms.iter().map(|form| form.chars().collect()).collect();
        let is_dropped: Vec<bool> = forms
            .iter()
            .map(|form| !form.chars().any(char::is_alphanumeric))
            .collect();

        let mut outcome = MatchOutcome {
            dropped: (0..forms.len()).filter(|&i| is_dropped[i]).collect(),
            end_offset: location.offset,
            ..MatchOutcome::default()
        };
        let skip = |outcome: &mut MatchOutcome, index: usize| {
            outcome.skipped.push(SkippedSentence {
                sentence_index: index,
                text: chapter.sentences.get(index).cloned().unwrap_or_default(),
            });
        };

        for index in 0..location.sentence_index.min(forms.len()) {
            if !is_dropped[index] {
                skip(&mut outcome, index);
            }
        }

        let mut cursor = location.offset;
        let mut pending: Vec<usize> = Vec::new();
        let mut drift = 0usize;
        let mut stuck: Option<StuckRun> = None;
        let mut i = location.sentence_index;

        while i < forms.len() {
            if is_dropped[i] {
                i += 1;
                continue;
            }
            if cursor >= limit {
                break;
            }

            let query = &queries[i];
            let found = self
                .find(query, cursor, limit, drift)
                .and_then(|(range, kind)| self.build_span(range.clone()).map(|span| (range, kind, span)));

            if let Some((range, kind, span)) = found {
                for index in pending.drain(..) {
                    skip(&mut outcome, index);
                }
                stuck = None;
                drift = 0;
                tracing::debug!(
                    sentence_index = i,
                    kind = kind.as_str(),
                    start = format!("{:.3}", span.start),
                    end = format!("{:.3}", span.end),
                    "matcher: sentence matched"
                );
                self.push_match(&mut outcome, chapter, i, range.clone(), kind, span);
                outcome.start_offset.get_or_insert(range.start);
                outcome.end_offset = range.end;
                cursor = range.end;
                i += 1;
                continue;
            }

            pending.push(i);
            drift += 1;
            i += 1;

            let short_query = query.len() < self.config.short_query_chars;
            if pending.len() < self.config.max_consecutive_failures && !short_query {
                continue;
            }

            let run = stuck.get_or_insert(StuckRun {
                first_sentence: pending[0],
                cursor,
                advances: 0,
            });
            let next = self.transcript.next_sentence_start(cursor);
            if run.advances < self.config.max_window_advances && next < limit {
                run.advances += 1;
                tracing::debug!(
                    first_sentence = run.first_sentence,
                    advances = run.advances,
                    cursor = next,
                    "matcher: advancing window"
                );
                cursor = next;
                i = run.first_sentence;
                pending.clear();
            } else {
                tracing::debug!(
                    first_sentence = run.first_sentence,
                    skipped = pending.len(),
                    "matcher: abandoning stuck sentences"
                );
                cursor = run.cursor;
                stuck = None;
                for index in pending.drain(..) {
                    skip(&mut outcome, index);
                }
            }
        }

        for index in pending.drain(..) {
            skip(&mut outcome, index);
        }
        // Sentences never reached because the window ran out.
        let resolved: std::collections::HashSet<usize> = outcome
            .sentences
            .iter()
            .map(|s| s.sentence_index)
            .chain(outcome.skipped.iter().map(|s| s.sentence_index))
            .collect();
        for index in 0..forms.len() {
            if !is_dropped[index] && !resolved.contains(&index) {
                skip(&mut outcome, index);
            }
        }
        outcome.skipped.sort_by_key(|s| s.sentence_index);
        for skipped in &outcome.skipped {
            tracing::debug!(
                sentence_index = skipped.sentence_index,
                "matcher: sentence skipped"
            );
        }
        outcome
    }

    /// Candidate windows starting at `cursor`, small to large, snapped to
    /// transcript sentence boundaries.
    fn windows(&self, query_len: usize, cursor: usize, limit: usize) -> Vec<Range<usize>> {
        let ceiling = self
            .config
            .window_ceiling(query_len)
            .max(query_len + query_len / 2);
        let mut windows: Vec<Range<usize>> = Vec::with_capacity(3);
        for factor in self.config.window_factors() {
            let size = ((query_len as f64 * factor).ceil() as usize).min(ceiling);
            let end = self
                .transcript
                .sentence_start_at_or_after(cursor + size)
                .min(cursor + ceiling)
                .min(limit);
            if windows.last().map_or(true, |last| last.end < end) {
                windows.push(cursor..end);
            }
        }
        windows
    }

    fn fuzzy_budget(&self, query_len: usize, drift: usize) -> usize {
        let base = (self.config.fuzzy_ratio * query_len as f64).floor() as usize;
        (base / (drift + 1)).max(1)
    }

    /// Absolute char range and match kind for one query.
    fn find(
        &self,
        query: &[char],
        cursor: usize,
        limit: usize,
        drift: usize,
    ) -> Option<(Range<usize>, MatchKind)> {
        let windows = self.windows(query.len(), cursor, limit);
        let chars = self.transcript.chars();

        let first = windows.first()?;
        if let Some(found) = text_match::match_text(&chars[first.clone()], query) {
            let range = cursor + found.range.start..cursor + found.range.end;
            return Some((range, found.kind));
        }

        let k = self.fuzzy_budget(query.len(), drift);
        if k + 1 > query.len() {
            return None;
        }
        windows.iter().find_map(|window| {
            fuzzy::find_best(query, &chars[window.clone()], k).map(|found| {
                (
                    window.start + found.start..window.start + found.end,
                    MatchKind::Nearest,
                )
            })
        })
    }

    /// Tokens backing a matched char range, extended over attached punctuation.
    fn build_span(&self, range: Range<usize>) -> Option<SentenceSpan> {
        let tokens = self.transcript.tokens();
        let mut token_range = self.transcript.token_range(range);
        while let Some(next) = tokens.get(token_range.end) {
            let attached = next.kind == TokenKind::Punctuation
                && token_range.end > 0
                && tokens[token_range.end - 1].end_offset == next.start_offset;
            if !attached {
                break;
            }
            token_range.end += 1;
        }
        if token_range.is_empty() {
            return None;
        }

        let slice = &tokens[token_range];
        let first_file = slice[0].audio_file;
        let audio_file = if slice.iter().all(|t| t.audio_file == first_file) {
            first_file
        } else {
            let mut counts: Vec<(usize, usize)> = Vec::new();
            for token in slice {
                match counts.iter_mut().find(|(file, _)| *file == token.audio_file) {
                    Some((_, count)) => *count += 1,
                    None => counts.push((token.audio_file, 1)),
                }
            }
            let chosen = counts
                .iter()
                .max_by_key(|(_, count)| *count)
                .map(|(file, _)| *file)
                .unwrap_or(first_file);
            tracing::warn!(
                first_token = slice[0].index,
                audio_file = chosen,
                "matcher: sentence spans two audio files"
            );
            chosen
        };

        let owned: Vec<_> = slice
            .iter()
            .filter(|t| t.audio_file == audio_file)
            .cloned()
            .collect();
        let start = owned.first()?.start;
        let end = owned.iter().map(|t| t.end).fold(start, f64::max);
        Some(SentenceSpan {
            start,
            end,
            audio_file,
            tokens: owned,
        })
    }

    fn push_match(
        &self,
        outcome: &mut MatchOutcome,
        chapter: &ChapterText,
        sentence_index: usize,
        range: Range<usize>,
        kind: MatchKind,
        mut span: SentenceSpan,
    ) {
        let mut shared_timestamp = false;
        if let Some(prev) = outcome.sentences.last_mut() {
            if let (Some(prev_last), Some(first)) =
                (prev.span.last_token_index(), span.first_token_index())
            {
                if first <= prev_last {
                    // Token indices may skip tokens left on another audio file.
                    span.tokens.retain(|token| token.index > prev_last);
                    match span.tokens.first() {
                        Some(fresh) => {
                            span.start = fresh.start.max(prev.span.end);
                            span.end = span.end.max(span.start);
                        }
                        None => {
                            span = prev.span.clone();
                            shared_timestamp = true;
                        }
                    }
                }
            }

            let adjacent = prev.sentence_index + 1 == sentence_index;
            if adjacent && !shared_timestamp && prev.span.audio_file == span.audio_file {
                let gap = span.start - prev.span.end;
                if gap > 0.0 {
                    let boundary = self
                        .segment_boundary(&prev.span, &span)
                        .unwrap_or(prev.span.end + gap / 2.0);
                    prev.span.end = boundary;
                    span.start = boundary;
                } else if gap < 0.0 {
                    prev.span.end = span.start.max(prev.span.start);
                    span.start = prev.span.end;
                }
            }
        }

        outcome.sentences.push(SentenceMatch {
            sentence_index,
            text: chapter
                .sentences
                .get(sentence_index)
                .cloned()
                .unwrap_or_default(),
            span,
            matched_text: self.transcript.slice(range),
            kind,
            shared_timestamp,
            rebuilt: false,
        });
    }

    /// Start of the next ASR segment when the two spans sit in different
    /// segments and that start falls inside the gap.
    fn segment_boundary(&self, prev: &SentenceSpan, next: &SentenceSpan) -> Option<f64> {
        let prev_segment = prev.tokens.iter().rev().find(|t| t.is_real())?.segment;
        let next_segment = next.tokens.iter().find(|t| t.is_real())?.segment;
        if prev_segment == next_segment {
            return None;
        }
        let start = self.transcript.segments().get(next_segment)?.start;
        (start > prev.end && start <= next.start).then_some(start)
    }
}
