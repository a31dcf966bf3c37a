use std::ops::Range;

use super::{claimed_tokens, ChapterBounds, GapRefiner, TimePoint};
use crate::types::{MatchKind, SentenceMatch, TranscriptToken};

/// One side of an unmatched run: a matched sentence or a neighboring chapter.
#[derive(Debug, Clone, Copy)]
enum Edge {
    Entry(usize),
    Chapter(TimePoint),
}

impl GapRefiner<'_> {
    pub(super) fn interpolate(&self, entries: &mut [SentenceMatch], bounds: ChapterBounds) -> usize {
        let pace = self.observed_pace(entries);
        let mut filled = 0;
        let mut i = 0;
        while i < entries.len() {
            if entries[i].kind != MatchKind::Interpolated {
                i += 1;
                continue;
            }
            let mut end = i;
            while end < entries.len() && entries[end].kind == MatchKind::Interpolated {
                end += 1;
            }
            if self.fill_run(entries, i..end, bounds, pace) {
                filled += end - i;
            }
            i = end;
        }
        filled
    }

    /// Seconds per unit of spoken length over the text-matched sentences.
    fn observed_pace(&self, entries: &[SentenceMatch]) -> Option<f64> {
        let (seconds, weight) = entries
            .iter()
            .filter(|entry| entry.kind.is_text_match())
            .fold((0.0, 0.0), |(seconds, weight), entry| {
                (seconds + entry.span.duration(), weight + self.weight(&entry.text))
            });
        (seconds > 0.0 && weight > 0.0).then(|| seconds / weight)
    }

    fn global(&self, point: TimePoint) -> f64 {
        self.transcript.global_time(point.audio_file, point.time)
    }

    fn local(&self, audio_file: usize, global: f64) -> f64 {
        let start = self.transcript.global_time(audio_file, 0.0);
        (global - start).clamp(0.0, self.transcript.file_duration(audio_file))
    }

    fn fill_run(
        &self,
        entries: &mut [SentenceMatch],
        run: Range<usize>,
        bounds: ChapterBounds,
        pace: Option<f64>,
    ) -> bool {
        let left = match run.start.checked_sub(1) {
            Some(index) => Some(Edge::Entry(index)),
            None => bounds.prev_end.map(Edge::Chapter),
        };
        let right = if run.end < entries.len() {
            Some(Edge::Entry(run.end))
        } else {
            bounds.next_start.map(Edge::Chapter)
        };

        let weights: Vec<f64> = entries[run.clone()]
            .iter()
            .map(|entry| self.weight(&entry.text))
            .collect();
        let total_weight: f64 = weights.iter().sum();
        let open_len = pace.map(|pace| self.config.open_run_stretch * pace * total_weight);

        let (gap_start, gap_end) = match (left, right) {
            (Some(Edge::Entry(l)), Some(Edge::Entry(r))) => self.closed_gap(entries, l, r),
            (Some(Edge::Entry(l)), right) => {
                let span = &entries[l].span;
                let start = self.global(TimePoint {
                    audio_file: span.audio_file,
                    time: span.end,
                });
                let limit = match right {
                    Some(Edge::Chapter(point)) => self.global(point),
                    _ => self.transcript.global_time(
                        span.audio_file,
                        self.transcript.file_duration(span.audio_file),
                    ),
                };
                let end = open_len.map_or(limit, |len| (start + len).min(limit));
                (start, end.max(start))
            }
            (left, Some(Edge::Entry(r))) => {
                let span = &entries[r].span;
                let end = self.global(TimePoint {
                    audio_file: span.audio_file,
                    time: span.start,
                });
                let limit = match left {
                    Some(Edge::Chapter(point)) => self.global(point),
                    _ => self.transcript.global_time(span.audio_file, 0.0),
                };
                let start = open_len.map_or(limit, |len| (end - len).max(limit));
                (start.min(end), end)
            }
            _ => return false,
        };

        let available = gap_end - gap_start;
        let mut acc = 0.0;
        for (entry, weight) in entries[run.clone()].iter_mut().zip(&weights) {
            let start = gap_start + available * acc / total_weight;
            acc += weight;
            let end = gap_start + available * acc / total_weight;
            let (audio_file, local_start, local_end) = self.place(start, end);
            entry.span.audio_file = audio_file;
            entry.span.start = local_start;
            entry.span.end = local_end;
            entry.span.tokens = vec![TranscriptToken::synthetic(audio_file, local_start, local_end)];
        }
        tracing::debug!(
            first_sentence = entries[run.start].sentence_index,
            sentences = run.len(),
            gap_start = format!("{:.3}", gap_start),
            gap_end = format!("{:.3}", gap_end),
            "refine: interpolated run"
        );
        true
    }

    /// Gap between two matched sentences, claiming room from the longer one
    /// when there is none.
    ///
    /// A gap that crosses an audio-file boundary is kept on the file with more
    /// room. When that room is under `min_gap_secs`, only half of the whole
    /// gap is claimed.
    fn closed_gap(&self, entries: &mut [SentenceMatch], left: usize, right: usize) -> (f64, f64) {
        let left_span = &entries[left].span;
        let right_span = &entries[right].span;
        let start = self.global(TimePoint {
            audio_file: left_span.audio_file,
            time: left_span.end,
        });
        let end = self.global(TimePoint {
            audio_file: right_span.audio_file,
            time: right_span.start,
        });
        if end > start && left_span.audio_file != right_span.audio_file {
            return self.cross_file_gap(left_span.audio_file, right_span.audio_file, start, end);
        }
        if end > start {
            return (start, end);
        }

        let need = self.config.min_gap_secs;
        let keep = self.config.min_donor_share;
        if left_span.duration() >= right_span.duration() {
            let af = left_span.audio_file;
            let floor = self.global(TimePoint {
                audio_file: af,
                time: left_span.start + left_span.duration() * keep,
            });
            let donor_end = (end - need).max(floor).min(end);
            entries[left].span.end = self.local(af, donor_end).max(entries[left].span.start);
            tracing::debug!(
                sentence_index = entries[left].sentence_index,
                claimed = format!("{:.3}", end - donor_end),
                "refine: shrank left donor"
            );
            (donor_end, end)
        } else {
            let af = right_span.audio_file;
            let ceiling = self.global(TimePoint {
                audio_file: af,
                time: right_span.end - right_span.duration() * keep,
            });
            let donor_start = (start + need).min(ceiling).max(start);
            entries[right].span.start = self.local(af, donor_start).min(entries[right].span.end);
            tracing::debug!(
                sentence_index = entries[right].sentence_index,
                claimed = format!("{:.3}", donor_start - start),
                "refine: shrank right donor"
            );
            (start, donor_start)
        }
    }

    fn cross_file_gap(&self, left_file: usize, right_file: usize, start: f64, end: f64) -> (f64, f64) {
        let left_file_end = self.global(TimePoint {
            audio_file: left_file,
            time: self.transcript.file_duration(left_file),
        });
        let right_file_start = self.global(TimePoint {
            audio_file: right_file,
            time: 0.0,
        });
        let tail = (left_file_end - start).max(0.0);
        let head = (end - right_file_start).max(0.0);
        let room = tail.max(head);
        let claimed = if room >= self.config.min_gap_secs {
            room
        } else {
            ((end - start) / 2.0).min(room)
        };
        tracing::debug!(
            left_file,
            right_file,
            tail = format!("{:.3}", tail),
            head = format!("{:.3}", head),
            claimed = format!("{:.3}", claimed),
            "refine: gap crosses audio files"
        );
        if tail >= head {
            (start, start + claimed)
        } else {
            (end - claimed, end)
        }
    }

    /// Map a whole-book interval to one audio file, keeping the larger share
    /// when it crosses a file boundary.
    fn place(&self, start: f64, end: f64) -> (usize, f64, f64) {
        let (start_file, local_start) = self.transcript.locate_global(start);
        let (end_file, local_end) = self.transcript.locate_global(end);
        if start_file == end_file {
            return (start_file, local_start, local_end.max(local_start));
        }
        let start_share = self.transcript.file_duration(start_file) - local_start;
        let end_share = local_end;
        if start_share >= end_share {
            (
                start_file,
                local_start,
                self.transcript.file_duration(start_file),
            )
        } else {
            (end_file, 0.0, local_end)
        }
    }

    /// Give interpolated sentences the unclaimed real tokens inside their window.
    pub(super) fn backfill(&self, entries: &mut [SentenceMatch]) -> usize {
        let mut claimed = claimed_tokens(entries);
        let tokens = self.transcript.tokens();
        let mut recovered = 0;
        for entry in entries
            .iter_mut()
            .filter(|entry| entry.kind == MatchKind::Interpolated)
        {
            let span = &entry.span;
            if span.end <= span.start {
                continue;
            }
            let file_range = self.transcript.file_token_range(span.audio_file);
            let file_tokens = &tokens[file_range];
            let from = file_tokens.partition_point(|t| (t.start + t.end) / 2.0 < span.start);
            let found: Vec<TranscriptToken> = file_tokens[from..]
                .iter()
                .take_while(|t| (t.start + t.end) / 2.0 < span.end)
                .filter(|t| !claimed.contains(&t.index))
                .cloned()
                .collect();
            let (Some(first), Some(last)) = (found.first(), found.last()) else {
                continue;
            };
            entry.matched_text = self.transcript.slice(first.start_offset..last.end_offset);
            claimed.extend(found.iter().map(|t| t.index));
            tracing::debug!(
                sentence_index = entry.sentence_index,
                tokens = found.len(),
                "refine: recovered transcript tokens"
            );
            entry.span.tokens = found;
            entry.kind = MatchKind::Recoverable;
            recovered += 1;
        }
        recovered
    }
}
