use std::ops::RangeInclusive;

use super::GapRefiner;
use crate::types::{SentenceMatch, SentenceSpan};

/// Time covered by the span's real tokens, ignoring boundary adjustments.
fn raw_extent(span: &SentenceSpan) -> (f64, f64) {
    let mut real = span.tokens.iter().filter(|t| t.is_real());
    match real.next() {
        Some(first) => real.fold((first.start, first.end), |(start, end), t| {
            (start.min(t.start), end.max(t.end))
        }),
        None => (span.start, span.end),
    }
}

fn word_count(text: &str) -> usize {
    text.split_whitespace()
        .filter(|word| word.chars().any(char::is_alphanumeric))
        .count()
}

impl GapRefiner<'_> {
    fn is_suspicious(&self, entry: &SentenceMatch) -> bool {
        if !entry.kind.is_text_match() || entry.shared_timestamp {
            return false;
        }
        let words = word_count(&entry.text);
        let (start, end) = raw_extent(&entry.span);
        words > 0 && (end - start) / (words as f64) < self.config.suspicious_secs_per_word
    }

    /// Redistribute runs of implausibly fast sentences across the room between
    /// their reliable neighbors.
    ///
    /// Interpolated or shared-timestamp sentences between a run and its
    /// nearest reliable neighbor are redistributed along with the run.
    pub(super) fn rebuild(&self, entries: &mut [SentenceMatch]) -> usize {
        let suspicious: Vec<bool> = entries.iter().map(|e| self.is_suspicious(e)).collect();
        let passable = |entry: &SentenceMatch| entry.shared_timestamp || !entry.kind.is_text_match();

        let mut rebuilt = 0;
        let mut i = 0;
        while i < entries.len() {
            if !suspicious[i] {
                i += 1;
                continue;
            }
            let mut last = i;
            let mut k = i + 1;
            while k < entries.len() && (suspicious[k] || passable(&entries[k])) {
                if suspicious[k] {
                    last = k;
                }
                k += 1;
            }
            let left = (0..i).rev().find(|&l| !suspicious[l] && !passable(&entries[l]));
            let right = (k < entries.len()).then_some(k);
            let first = left.map_or(i, |l| l + 1);
            let end = right.map_or(last, |r| r - 1);
            if self.rebuild_run(entries, &suspicious, first..=end, left, right) {
                rebuilt += end - first + 1;
            }
            i = last + 1;
        }
        rebuilt
    }

    fn rebuild_run(
        &self,
        entries: &mut [SentenceMatch],
        suspicious: &[bool],
        run: RangeInclusive<usize>,
        left: Option<usize>,
        right: Option<usize>,
    ) -> bool {
        let (first, last) = (*run.start(), *run.end());
        let audio_file = entries[first].span.audio_file;
        let same_file = entries[run.clone()]
            .iter()
            .chain(left.map(|l| &entries[l]))
            .chain(right.map(|r| &entries[r]))
            .all(|entry| entry.span.audio_file == audio_file);
        if !same_file {
            tracing::debug!(
                first_sentence = entries[first].sentence_index,
                "refine: suspicious run crosses audio files, kept as matched"
            );
            return false;
        }

        let (run_start, run_end) = run
            .clone()
            .filter(|&index| suspicious[index])
            .map(|index| raw_extent(&entries[index].span))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(start, end), (s, e)| {
                (start.min(s), end.max(e))
            });

        let window_start = left
            .map(|l| {
                let span = &entries[l].span;
                span.tokens
                    .iter()
                    .rev()
                    .find(|t| t.is_real())
                    .map_or(span.end, |t| t.end)
            })
            .unwrap_or(run_start);
        let window_end = right
            .map(|r| {
                let span = &entries[r].span;
                span.tokens
                    .iter()
                    .find(|t| t.is_real())
                    .map_or(span.start, |t| t.start)
            })
            .unwrap_or(run_end);

        if window_end - window_start <= (run_end - run_start) + f64::EPSILON {
            return false;
        }

        let weights: Vec<f64> = entries[first..=last]
            .iter()
            .map(|e| self.weight(&e.text))
            .collect();
        let total: f64 = weights.iter().sum();
        let available = window_end - window_start;
        let mut acc = 0.0;
        for (entry, weight) in entries[first..=last].iter_mut().zip(&weights) {
            entry.span.start = window_start + available * acc / total;
            acc += weight;
            entry.span.end = window_start + available * acc / total;
            entry.rebuilt = true;
            for token in entry.span.tokens.iter_mut() {
                token.is_rebuilt = true;
            }
        }
        if let Some(l) = left {
            entries[l].span.end = window_start.max(entries[l].span.start);
        }
        if let Some(r) = right {
            entries[r].span.start = window_end.min(entries[r].span.end);
        }

        tracing::debug!(
            first_sentence = entries[first].sentence_index,
            sentences = last - first + 1,
            window_start = format!("{:.3}", window_start),
            window_end = format!("{:.3}", window_end),
            "refine: rebuilt suspicious run"
        );
        true
    }
}
