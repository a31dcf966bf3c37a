//! Cheap, prefix-anchored stages of the sentence cascade.
//!
//! Every stage anchors the query at the start of the window; the window is
//! expected to begin at the matcher cursor. Ranges are char offsets into the window.

use std::ops::Range;

use crate::alignment::normalize::is_sentence_terminal;
use crate::types::MatchKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMatch {
    pub range: Range<usize>,
    pub kind: MatchKind,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric()
}

fn ends_on_boundary(window: &[char], end: usize) -> bool {
    end >= window.len() || !is_word_char(window[end]) || end == 0 || !is_word_char(window[end - 1])
}

fn skip_space(window: &[char]) -> usize {
    window.iter().take_while(|c| c.is_whitespace()).count()
}

fn skip_non_word(text: &[char]) -> usize {
    text.iter().take_while(|c| !is_word_char(**c)).count()
}

fn trim_trailing_terminal(query: &[char]) -> &[char] {
    let mut end = query.len();
    while end > 0 && (is_sentence_terminal(query[end - 1]) || query[end - 1].is_whitespace()) {
        end -= 1;
    }
    &query[..end]
}

fn trim_trailing_non_word(query: &[char]) -> &[char] {
    let mut end = query.len();
    while end > 0 && !is_word_char(query[end - 1]) {
        end -= 1;
    }
    &query[..end]
}

/// `window[from..]` starts with `query`, or with `query` minus its trailing
/// sentence terminal, and ends on a word boundary.
fn prefix_at(window: &[char], from: usize, query: &[char]) -> Option<Range<usize>> {
    let mut trimmed_end = query.len();
    while trimmed_end > 0 && query[trimmed_end - 1].is_whitespace() {
        trimmed_end -= 1;
    }
    let trimmed = &query[..trimmed_end];
    for candidate in [trimmed, trim_trailing_terminal(trimmed)] {
        if candidate.is_empty() {
            continue;
        }
        let end = from + candidate.len();
        if window.len() >= end
            && &window[from..end] == candidate
            && ends_on_boundary(window, end)
        {
            return Some(from..end);
        }
    }
    None
}

/// Window starts (after whitespace) with the query verbatim.
pub fn exact(window: &[char], query: &[char]) -> Option<Range<usize>> {
    prefix_at(window, skip_space(window), query)
}

/// Leading punctuation of both sides is ignored.
pub fn trimmed_leading(window: &[char], query: &[char]) -> Option<Range<usize>> {
    let query = &query[skip_non_word(query)..];
    prefix_at(window, skip_non_word(window), query)
}

/// Leading and trailing punctuation of both sides is ignored.
pub fn ignoring_ends_punctuation(window: &[char], query: &[char]) -> Option<Range<usize>> {
    let query = trim_trailing_non_word(&query[skip_non_word(query)..]);
    if query.is_empty() {
        return None;
    }
    let from = skip_non_word(window);
    let end = from + query.len();
    (window.len() >= end && &window[from..end] == query && ends_on_boundary(window, end))
        .then_some(from..end)
}

/// Walk both sides char by char, skipping punctuation and whitespace on
/// either side; word characters must agree exactly.
///
/// The range starts at the first word character of the window.
pub fn ignoring_all_punctuation(window: &[char], query: &[char]) -> Option<Range<usize>> {
    let mut i = skip_non_word(window);
    let start = i;
    let mut j = 0;
    let mut end = None;
    loop {
        while j < query.len() && !is_word_char(query[j]) {
            j += 1;
        }
        if j == query.len() {
            break;
        }
        while i < window.len() && !is_word_char(window[i]) {
            i += 1;
        }
        if i == window.len() || window[i] != query[j] {
            return None;
        }
        i += 1;
        j += 1;
        end = Some(i);
    }
    let end = end?;
    ends_on_boundary(window, end).then_some(start..end)
}

/// First cascade stage that matches, cheapest first.
pub fn match_text(window: &[char], query: &[char]) -> Option<TextMatch> {
    let stages: [(MatchKind, fn(&[char], &[char]) -> Option<Range<usize>>); 4] = [
        (MatchKind::Exact, exact),
        (MatchKind::TrimmedLeading, trimmed_leading),
        (
            MatchKind::IgnoringEndsPunctuation,
            ignoring_ends_punctuation,
        ),
        (MatchKind::IgnoringAllPunctuation, ignoring_all_punctuation),
    ];
    stages.into_iter().find_map(|(kind, stage)| {
        stage(window, query).map(|range| TextMatch { range, kind })
    })
}
