//! Bounded edit-distance substring search.
//!
//! The needle is cut into `max_dist + 1` equal pieces. Any occurrence within
//! `max_dist` edits leaves at least one piece untouched, so every exact hit of
//! a piece (Horspool) seeds a banded expansion to the left and right of it.

use std::collections::HashMap;
use std::ops::Range;

/// Best approximate occurrence, as char offsets into the haystack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuzzyMatch {
    pub start: usize,
    pub end: usize,
    pub distance: usize,
}

impl FuzzyMatch {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

const UNREACHABLE: usize = usize::MAX / 2;

/// Lowest-distance substring of `haystack` within `max_dist` edits of `needle`.
///
/// Each piece is only searched where a match that fits the haystack could
/// place it. Ties keep the leftmost start.
///
/// # Panics
///
/// Panics when `max_dist + 1 > needle.len()`: the needle cannot be split into
/// enough non-empty pieces, which is a caller bug.
pub fn find_best(needle: &[char], haystack: &[char], max_dist: usize) -> Option<FuzzyMatch> {
    search(needle, haystack, max_dist, |offset, piece_len| {
        let right_len = needle.len() - offset - piece_len;
        let last_end = haystack
            .len()
            .saturating_sub(right_len.saturating_sub(max_dist));
        offset.saturating_sub(max_dist)..last_end
    })
}

/// Like [`find_best`], for a match expected to start near `expected_start`.
///
/// Each piece is searched within `max_dist` chars of where it would sit if
/// the match began exactly at `expected_start`.
///
/// # Panics
///
/// Same contract as [`find_best`].
pub fn find_best_near(
    needle: &[char],
    haystack: &[char],
    max_dist: usize,
    expected_start: usize,
) -> Option<FuzzyMatch> {
    search(needle, haystack, max_dist, |offset, piece_len| {
        let expected = expected_start + offset;
        expected.saturating_sub(max_dist)..expected + max_dist + piece_len
    })
}

/// Pigeonhole search; `band(offset, piece_len)` bounds where the piece at
/// `offset` in the needle may occur in the haystack.
fn search(
    needle: &[char],
    haystack: &[char],
    max_dist: usize,
    band: impl Fn(usize, usize) -> Range<usize>,
) -> Option<FuzzyMatch> {
    assert!(
        max_dist + 1 <= needle.len(),
        "fuzzy: max_dist + 1 ({}) exceeds needle length ({})",
        max_dist + 1,
        needle.len()
    );
    if haystack.len() + max_dist < needle.len() {
        return None;
    }

    let pieces = max_dist + 1;
    let piece_len = needle.len() / pieces;
    let mut best: Option<FuzzyMatch> = None;

    for piece_index in 0..pieces {
        let offset = piece_index * piece_len;
        let piece = &needle[offset..offset + piece_len];
        let left_pattern: Vec<char> = needle[..offset].iter().rev().copied().collect();
        let right_pattern = &needle[offset + piece_len..];

        let range = band(offset, piece_len);
        let lo = range.start.min(haystack.len());
        let hi = range.end.min(haystack.len());
        if hi < lo + piece_len {
            continue;
        }

        for hit in horspool_find_all(piece, &haystack[lo..hi]).into_iter().map(|hit| lo + hit) {
            // Equal distances stay in play so a later, further-left
            // candidate can still win the tie.
            let budget = match best {
                Some(found) if found.distance == 0 => return best,
                Some(found) => found.distance,
                None => max_dist,
            };

            let left_from = hit.saturating_sub(left_pattern.len() + budget);
            let left_text: Vec<char> = haystack[left_from..hit].iter().rev().copied().collect();
            let Some((left_dist, left_used)) = extend(&left_pattern, &left_text, budget) else {
                continue;
            };

            let right_from = hit + piece_len;
            let right_to = (right_from + right_pattern.len() + budget - left_dist).min(haystack.len());
            let Some((right_dist, right_used)) = extend(
                right_pattern,
                &haystack[right_from..right_to],
                budget - left_dist,
            ) else {
                continue;
            };

            let candidate = FuzzyMatch {
                start: hit - left_used,
                end: right_from + right_used,
                distance: left_dist + right_dist,
            };
            let better = match best {
                None => true,
                Some(found) => {
                    (candidate.distance, candidate.start) < (found.distance, found.start)
                }
            };
            if better {
                best = Some(candidate);
            }
        }
    }
    best
}

/// Convenience wrapper over `str` returning char offsets.
///
/// # Panics
///
/// Same contract as [`find_best`].
pub fn find_best_str(needle: &str, haystack: &str, max_dist: usize) -> Option<FuzzyMatch> {
    let needle: Vec<char> = needle.chars().collect();
    let haystack: Vec<char> = haystack.chars().collect();
    find_best(&needle, &haystack, max_dist)
}

/// Align all of `pattern` against a prefix of `text` (free end in `text`)
/// within a diagonal band of width `max`.
///
/// Returns the distance and how many text chars were consumed.
fn extend(pattern: &[char], text: &[char], max: usize) -> Option<(usize, usize)> {
    let rows = pattern.len();
    if rows == 0 {
        return Some((0, 0));
    }
    let cols = text.len().min(rows + max);
    let mut prev: Vec<usize> = (0..=cols)
        .map(|j| if j <= max { j } else { UNREACHABLE })
        .collect();
    let mut cur = vec![UNREACHABLE; cols + 1];

    for i in 1..=rows {
        cur.fill(UNREACHABLE);
        if i <= max {
            cur[0] = i;
        }
        let lo = i.saturating_sub(max).max(1);
        let hi = (i + max).min(cols);
        let mut row_min = cur[0];
        for j in lo..=hi {
            let substitution = prev[j - 1] + usize::from(pattern[i - 1] != text[j - 1]);
            let deletion = prev[j] + 1;
            let insertion = cur[j - 1] + 1;
            let value = substitution.min(deletion).min(insertion);
            cur[j] = value;
            row_min = row_min.min(value);
        }
        if row_min > max {
            return None;
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    let mut best: Option<(usize, usize)> = None;
    for (j, &dist) in prev.iter().enumerate() {
        if dist > max {
            continue;
        }
        let better = match best {
            None => true,
            Some((best_dist, best_j)) => {
                dist < best_dist
                    || (dist == best_dist && rows.abs_diff(j) < rows.abs_diff(best_j))
            }
        };
        if better {
            best = Some((dist, j));
        }
    }
    best
}

/// Every start offset of `pattern` in `text` (Boyer-Moore-Horspool).
pub fn horspool_find_all(pattern: &[char], text: &[char]) -> Vec<usize> {
    let m = pattern.len();
    if m == 0 || m > text.len() {
        return Vec::new();
    }
    let mut shift: HashMap<char, usize> = HashMap::with_capacity(m);
    for (i, &c) in pattern[..m - 1].iter().enumerate() {
        shift.insert(c, m - 1 - i);
    }

    let mut hits = Vec::new();
    let mut pos = 0;
    while pos + m <= text.len() {
        let window = &text[pos..pos + m];
        if window == pattern {
            hits.push(pos);
        }
        let last = text[pos + m - 1];
        pos += shift.get(&last).copied().unwrap_or(m);
    }
    hits
}

#[cfg(test)]
mod tests {
    use strsim::generic_levenshtein;

    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn horspool_finds_overlapping_hits() {
        assert_eq!(horspool_find_all(&chars("aa"), &chars("aaaa")), vec![0, 1, 2]);
        assert_eq!(
            horspool_find_all(&chars("me"), &chars("call me ishmael me")),
            vec![5, 16]
        );
        assert!(horspool_find_all(&chars("zz"), &chars("call me")).is_empty());
    }

    #[test]
    fn exact_occurrence_has_zero_distance() {
        let found = find_best_str("ishmael", "call me ishmael today", 2).expect("match");
        assert_eq!(found.distance, 0);
        assert_eq!((found.start, found.end), (8, 15));
    }

    #[test]
    fn tolerates_substitution_and_deletion() {
        let found = find_best_str("it was a bright day", "and it was a brite day then", 3)
            .expect("match");
        assert!(found.distance <= 3);
        let haystack = chars("and it was a brite day then");
        let matched = &haystack[found.start..found.end];
        assert!(generic_levenshtein(&matched.to_vec(), &chars("it was a bright day")) <= found.distance);
    }

    #[test]
    fn rejects_when_over_budget() {
        assert_eq!(find_best_str("completely other", "call me ishmael", 2), None);
    }

    #[test]
    fn prefers_lowest_distance_candidate() {
        let found = find_best_str("bright day", "brigt dax ... bright dae", 2).expect("match");
        assert_eq!(found.distance, 1);
        assert_eq!(found.start, 14);
    }

    #[test]
    #[should_panic(expected = "exceeds needle length")]
    fn panics_when_budget_exceeds_needle() {
        let _ = find_best_str("ab", "abc", 2);
    }

    #[test]
    fn equal_distance_tie_keeps_leftmost_start() {
        // The right copy is reached first through the first piece.
        let found = find_best_str("abcdef", "abxdef zzzzzzz abcdey", 1).expect("match");
        assert_eq!(found.distance, 1);
        assert_eq!(found.start, 0);
    }

    #[test]
    fn near_search_ignores_copies_outside_the_band() {
        let needle = chars("call me ishmael");
        let haystack = chars("call me ishmael. later, call me ishmail.");
        let anywhere = find_best(&needle, &haystack, 1).expect("match");
        assert_eq!((anywhere.start, anywhere.distance), (0, 0));

        let near = find_best_near(&needle, &haystack, 1, 24).expect("match");
        assert_eq!((near.start, near.distance), (24, 1));
        assert_eq!(find_best_near(&needle, &haystack, 1, 60), None);
    }
}
