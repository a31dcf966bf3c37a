use std::ops::Range;

use crate::pipeline::traits::SpokenLengthEstimator;
use crate::types::{Anchor, SentenceSpan, TokenKind, TranscriptToken, WordTiming};

/// Timing decided for one word before token ownership is settled.
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    start: f64,
    end: f64,
    /// First span token this word claims.
    claim: Option<usize>,
    interpolated: bool,
}

/// Anchor boundary from raw token times, averaged with the secondary timing
/// signal when both ends carry one. The result only ever narrows the raw
/// boundary.
pub(super) fn anchor_bounds(first: &TranscriptToken, last: &TranscriptToken) -> (f64, f64) {
    let (raw_start, raw_end) = (first.start, last.end.max(first.start));
    let (Some(a), Some(b)) = (first.refined, last.refined) else {
        return (raw_start, raw_end);
    };
    let start = ((raw_start + a.start) / 2.0).max(raw_start);
    let end = ((raw_end + b.end) / 2.0).min(raw_end);
    if start <= end {
        (start, end)
    } else {
        (raw_start, raw_end)
    }
}

/// Split `total` items across `weights` proportionally, rounding with the
/// largest-remainder method. Ties go to the lower index.
pub(super) fn largest_remainder(total: usize, weights: &[f64]) -> Vec<usize> {
    if weights.is_empty() {
        return Vec::new();
    }
    let sum: f64 = weights.iter().map(|w| w.max(0.0)).sum();
    let weights: Vec<f64> = if sum > 0.0 {
        weights.iter().map(|w| w.max(0.0) / sum).collect()
    } else {
        vec![1.0 / weights.len() as f64; weights.len()]
    };

    let quotas: Vec<f64> = weights.iter().map(|w| w * total as f64).collect();
    let mut counts: Vec<usize> = quotas.iter().map(|q| q.floor() as usize).collect();
    let assigned: usize = counts.iter().sum();
    let mut order: Vec<usize> = (0..quotas.len()).collect();
    order.sort_by(|&a, &b| {
        let fa = quotas[a] - quotas[a].floor();
        let fb = quotas[b] - quotas[b].floor();
        fb.total_cmp(&fa).then(a.cmp(&b))
    });
    for &i in order.iter().cycle().take(total.saturating_sub(assigned)) {
        counts[i] += 1;
    }
    counts
}

fn is_waypoint(token: &TranscriptToken) -> bool {
    token.is_real() && !matches!(token.kind, TokenKind::Punctuation | TokenKind::Missing)
}

fn spread_evenly(slots: &mut [Slot], start: f64, end: f64) {
    let step = (end - start).max(0.0) / slots.len().max(1) as f64;
    for (k, slot) in slots.iter_mut().enumerate() {
        slot.start = start + step * k as f64;
        slot.end = start + step * (k + 1) as f64;
        slot.interpolated = true;
    }
}

/// Place the unanchored words of one gap between two fixed times.
fn fill_gap(
    slots: &mut [Slot],
    gap_start: f64,
    gap_end: f64,
    tokens: &[TranscriptToken],
    token_range: Range<usize>,
) {
    if slots.is_empty() {
        return;
    }
    let gap_end = gap_end.max(gap_start);
    let waypoints: Vec<usize> = token_range.filter(|&t| is_waypoint(&tokens[t])).collect();

    if waypoints.is_empty() {
        spread_evenly(slots, gap_start, gap_end);
        return;
    }

    if waypoints.len() == slots.len() {
        for (slot, &t) in slots.iter_mut().zip(&waypoints) {
            let start = tokens[t].start.clamp(gap_start, gap_end);
            slot.start = start;
            slot.end = tokens[t].end.clamp(start, gap_end);
            slot.claim = Some(t);
            slot.interpolated = false;
        }
        return;
    }

    // Each waypoint owns the sub-interval up to the next one.
    let mut bounds = Vec::with_capacity(waypoints.len() + 1);
    bounds.push(gap_start);
    let mut floor = gap_start;
    for &t in &waypoints[1..] {
        floor = tokens[t].start.clamp(floor, gap_end);
        bounds.push(floor);
    }
    bounds.push(gap_end);
    let weights: Vec<f64> = bounds.windows(2).map(|w| w[1] - w[0]).collect();
    let counts = largest_remainder(slots.len(), &weights);

    let mut next = 0;
    for (i, &count) in counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let bucket = &mut slots[next..next + count];
        spread_evenly(bucket, bounds[i], bounds[i + 1]);
        bucket[0].claim = Some(waypoints[i]);
        next += count;
    }
}

/// Token ranges for every word. Ranges are contiguous, in order, and cover
/// every span token exactly once. Unclaimed tokens go to the preceding word,
/// or to the following one at the start of the span.
fn ownership(claims: &[Option<usize>], token_count: usize) -> Vec<Range<usize>> {
    let mut ranges = vec![0..0; claims.len()];
    if claims.is_empty() {
        return ranges;
    }

    let mut claimed: Vec<(usize, usize)> = Vec::new();
    for (word, claim) in claims.iter().enumerate() {
        if let Some(start) = *claim {
            if start < token_count && claimed.last().map_or(true, |&(_, prev)| start > prev) {
                claimed.push((word, start));
            }
        }
    }
    if claimed.is_empty() {
        claimed.push((0, 0));
    }

    for (k, &(word, start)) in claimed.iter().enumerate() {
        let start = if k == 0 { 0 } else { start };
        let end = claimed.get(k + 1).map_or(token_count, |&(_, next)| next);
        ranges[word] = start..end;
    }
    let mut cursor = 0;
    for range in ranges.iter_mut() {
        if range.is_empty() && range.start == 0 && cursor > 0 {
            *range = cursor..cursor;
        }
        cursor = range.end.max(cursor);
    }
    ranges
}

/// Time every word of a sentence from its anchors, filling the gaps between
/// them from waypoints or evenly.
pub(super) fn fill(
    words: &[String],
    tokens: &[TranscriptToken],
    anchors: &[Anchor],
    span: &SentenceSpan,
    rebuilt: bool,
    estimator: &dyn SpokenLengthEstimator,
) -> Vec<WordTiming> {
    if words.is_empty() {
        return Vec::new();
    }
    let mut slots = vec![Slot::default(); words.len()];
    let clamp = |t: f64| t.clamp(span.start, span.end.max(span.start));

    for anchor in anchors {
        let first = &tokens[anchor.token_start];
        let last = &tokens[anchor.token_start + anchor.token_count - 1];
        let (start, end) = anchor_bounds(first, last);
        let (start, end) = (clamp(start), clamp(end));
        let wi = anchor.word_index;
        if anchor.word_count == 1 {
            slots[wi] = Slot {
                start,
                end,
                claim: Some(anchor.token_start),
                interpolated: false,
            };
            continue;
        }
        // Two book words folded onto the same tokens: share by spoken length.
        let w0 = f64::from(estimator.estimate(&words[wi]).max(f32::EPSILON));
        let w1 = f64::from(estimator.estimate(&words[wi + 1]).max(f32::EPSILON));
        let split = start + (end - start) * w0 / (w0 + w1);
        slots[wi] = Slot {
            start,
            end: split,
            claim: Some(anchor.token_start),
            interpolated: false,
        };
        slots[wi + 1] = Slot {
            start: split,
            end,
            claim: (anchor.token_count > 1).then(|| anchor.token_start + anchor.token_count - 1),
            interpolated: false,
        };
    }

    if rebuilt || (anchors.is_empty() && !tokens.iter().any(is_waypoint)) {
        let claims: Vec<Option<usize>> = slots.iter().map(|s| s.claim).collect();
        spread_evenly(&mut slots, span.start, span.end);
        for (slot, claim) in slots.iter_mut().zip(claims) {
            slot.claim = claim;
        }
    } else {
        let mut word_cursor = 0;
        let mut token_cursor = 0;
        let mut time_cursor = span.start;
        for anchor in anchors {
            let gap_end = slots[anchor.word_index].start;
            fill_gap(
                &mut slots[word_cursor..anchor.word_index],
                time_cursor,
                gap_end,
                tokens,
                token_cursor..anchor.token_start,
            );
            word_cursor = anchor.word_index + anchor.word_count;
            token_cursor = anchor.token_start + anchor.token_count;
            time_cursor = slots[word_cursor - 1].end;
        }
        fill_gap(
            &mut slots[word_cursor..],
            time_cursor,
            span.end,
            tokens,
            token_cursor..tokens.len(),
        );
    }

    let claims: Vec<Option<usize>> = slots.iter().map(|s| s.claim).collect();
    let ranges = ownership(&claims, tokens.len());

    let mut prev_end = span.start;
    words
        .iter()
        .zip(slots)
        .zip(ranges)
        .map(|((word, slot), range)| {
            let owned = &tokens[range.clone()];
            let start = clamp(slot.start.max(prev_end));
            let end = clamp(slot.end).max(start);
            prev_end = end;
            let confidence = owned
                .iter()
                .filter_map(|t| t.confidence)
                .fold(None, |acc: Option<f32>, c| Some(acc.map_or(c, |a| a.min(c))));
            WordTiming {
                word: word.clone(),
                start,
                end,
                tokens: range,
                interpolated: slot.interpolated,
                rebuilt: rebuilt || owned.iter().any(|t| t.is_rebuilt),
                confidence,
            }
        })
        .collect()
}
