use std::ops::Range;

use super::word_key;
use crate::config::WordAlignConfig;
use crate::types::{PhraseGroup, TranscriptToken, WordTiming};

/// Prepositions, articles and conjunctions that read better at the start of
/// the following group.
const FUNCTION_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "nor", "so", "yet", "if", "as", "than", "of", "to",
    "in", "on", "at", "by", "for", "with", "from", "into", "onto", "upon", "over", "under",
    "about", "after", "before", "through",
];

fn is_function_word(word: &str) -> bool {
    let key = word_key(word);
    FUNCTION_WORDS.contains(&key.as_str())
}

fn ends_clause(word: &WordTiming) -> bool {
    word.word
        .chars()
        .last()
        .is_some_and(|c| matches!(c, ',' | ';' | ':' | '.' | '!' | '?'))
}

fn reliable(word: &WordTiming, config: &WordAlignConfig) -> bool {
    !word.interpolated
        && word.duration() >= config.unreliable_duration_secs
        && word.confidence.map_or(true, |c| c >= config.low_confidence)
}

fn range_secs(words: &[WordTiming], range: &Range<usize>) -> f64 {
    match (words.get(range.start), range.end.checked_sub(1).and_then(|i| words.get(i))) {
        (Some(first), Some(last)) => (last.end - first.start).max(0.0),
        _ => 0.0,
    }
}

pub(super) fn make_group(
    words: &[WordTiming],
    tokens: &[TranscriptToken],
    range: Range<usize>,
) -> PhraseGroup {
    let slice = &words[range.clone()];
    let text = slice
        .iter()
        .map(|w| w.word.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let token_range = match (slice.first(), slice.last()) {
        (Some(first), Some(last)) => first.tokens.start..last.tokens.end.max(first.tokens.start),
        _ => 0..0,
    };
    let token_text = tokens
        .get(token_range)
        .unwrap_or_default()
        .iter()
        .filter(|t| t.is_real())
        .cloned()
        .reduce(|acc, t| acc.merge(&t))
        .map(|t| t.text)
        .unwrap_or_default();

    PhraseGroup {
        text,
        token_text,
        start: slice.first().map_or(0.0, |w| w.start),
        end: slice.iter().map(|w| w.end).fold(0.0, f64::max),
        any_interpolated: slice.iter().any(|w| w.interpolated),
        any_rebuilt: slice.iter().any(|w| w.rebuilt),
        words: range,
    }
}

/// One group per ASR segment. Words without tokens stay with the group
/// they follow.
pub(super) fn by_segment(words: &[WordTiming], tokens: &[TranscriptToken]) -> Vec<PhraseGroup> {
    let segment_of = |w: &WordTiming| {
        tokens
            .get(w.tokens.clone())
            .and_then(|owned| owned.iter().find(|t| t.is_real()))
            .map(|t| t.segment)
    };
    let mut ranges: Vec<Range<usize>> = Vec::new();
    let mut current = 0..1;
    let mut current_segment = segment_of(&words[0]);
    for (i, word) in words.iter().enumerate().skip(1) {
        match segment_of(word) {
            Some(segment) if current_segment.is_some_and(|s| s != segment) => {
                ranges.push(current);
                current = i..i + 1;
                current_segment = Some(segment);
            }
            segment => {
                current.end = i + 1;
                current_segment = current_segment.or(segment);
            }
        }
    }
    ranges.push(current);
    ranges
        .into_iter()
        .map(|range| make_group(words, tokens, range))
        .collect()
}

/// Heuristic phrase grouping for highlight playback.
pub(super) fn by_phrase(
    words: &[WordTiming],
    tokens: &[TranscriptToken],
    config: &WordAlignConfig,
) -> Vec<PhraseGroup> {
    let mut ranges = initial_groups(words, config);
    merge_short_groups(words, &mut ranges, config.min_highlight_secs);
    shift_function_words(words, &mut ranges, config.min_highlight_secs);
    ranges
        .into_iter()
        .map(|range| make_group(words, tokens, range))
        .collect()
}

fn initial_groups(words: &[WordTiming], config: &WordAlignConfig) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut current = 0..1;
    let mut boosted = !reliable(&words[0], config);
    let mut reliable_streak = 0;

    for i in 1..words.len() {
        let (prev, word) = (&words[i - 1], &words[i]);
        let word_reliable = reliable(word, config);
        if !word_reliable {
            boosted = true;
            reliable_streak = 0;
        } else if boosted {
            reliable_streak += 1;
            if reliable_streak >= config.reliable_words_to_unboost {
                boosted = false;
                reliable_streak = 0;
            }
        }

        let pause = if boosted {
            config.boosted_pause_secs
        } else {
            config.pause_secs
        };
        let mandatory = !word_reliable || !reliable(prev, config);
        let blocked = ends_clause(prev) && !(prev.duration() > 0.0 && word.duration() > 0.0);
        let gap = word.start - prev.end;
        let grown = word.end - words[current.start].start;
        let merge =
            !blocked && (mandatory || (gap <= pause && grown <= config.max_group_secs));

        if merge {
            current.end = i + 1;
        } else {
            ranges.push(current);
            current = i..i + 1;
        }
    }
    ranges.push(current);
    ranges
}

/// Fold every group shorter than `min_secs` into the neighbor that brings it
/// closest to `min_secs`.
fn merge_short_groups(words: &[WordTiming], ranges: &mut Vec<Range<usize>>, min_secs: f64) {
    let mut i = 0;
    while i < ranges.len() && ranges.len() > 1 {
        if range_secs(words, &ranges[i]) >= min_secs {
            i += 1;
            continue;
        }
        let left = i
            .checked_sub(1)
            .map(|l| range_secs(words, &(ranges[l].start..ranges[i].end)));
        let right = ranges
            .get(i + 1)
            .map(|r| range_secs(words, &(ranges[i].start..r.end)));
        let into_left = match (left, right) {
            (Some(l), Some(r)) => (l - min_secs).abs() <= (r - min_secs).abs(),
            (Some(_), None) => true,
            _ => false,
        };
        if into_left {
            ranges[i - 1].end = ranges[i].end;
            ranges.remove(i);
            i -= 1;
        } else {
            ranges[i].end = ranges[i + 1].end;
            ranges.remove(i + 1);
        }
    }
}

fn shift_function_words(words: &[WordTiming], ranges: &mut [Range<usize>], min_secs: f64) {
    for i in 0..ranges.len().saturating_sub(1) {
        let group = ranges[i].clone();
        if group.len() < 2 {
            continue;
        }
        let last = group.end - 1;
        if !is_function_word(&words[last].word) || ends_clause(&words[last]) {
            continue;
        }
        let shrunk = group.start..last;
        let grown = last..ranges[i + 1].end;
        if range_secs(words, &shrunk) >= min_secs && range_secs(words, &grown) >= min_secs {
            ranges[i] = shrunk;
            ranges[i + 1] = grown;
        }
    }
}
