use strsim::levenshtein;

use crate::config::WordAlignConfig;
use crate::types::Anchor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Word,
    Token,
}

impl Side {
    fn flip(self) -> Self {
        match self {
            Side::Word => Side::Token,
            Side::Token => Side::Word,
        }
    }
}

/// Edit distance between two keys when they are close enough to be the
/// same word.
///
/// A shorter key that is a strict prefix of the longer one is also accepted
/// when the leftover tail fits in `trailing_slack`.
pub(super) fn keys_match(word: &str, token: &str, config: &WordAlignConfig) -> Option<usize> {
    if word.is_empty() || token.is_empty() {
        return None;
    }
    let a: Vec<char> = word.chars().collect();
    let b: Vec<char> = token.chars().collect();
    let longer = a.len().max(b.len());
    let shorter = a.len().min(b.len());
    let distance = levenshtein(word, token);
    let budget = (config.match_ratio * longer as f64).floor() as usize;
    if distance <= budget {
        return Some(distance);
    }

    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let trailing_ok = prefix == shorter
        && shorter >= config.min_trailing_len
        && longer - shorter <= config.trailing_slack;
    trailing_ok.then_some(distance)
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    word_count: usize,
    token_count: usize,
    distance: usize,
}

/// Best pairing starting at the two cursors: one word against
/// 1..=`max_merge_tokens` tokens, or two words folded onto a single token.
/// Lowest distance wins, then the fewest merged units.
fn best_at(
    words: &[String],
    tokens: &[String],
    wi: usize,
    ti: usize,
    config: &WordAlignConfig,
) -> Option<Candidate> {
    if wi >= words.len() || ti >= tokens.len() || tokens[ti].is_empty() {
        return None;
    }
    let mut best: Option<Candidate> = None;
    for word_count in 1..=2 {
        if wi + word_count > words.len() || words[wi..wi + word_count].iter().any(String::is_empty) {
            break;
        }
        let word: String = words[wi..wi + word_count].concat();
        let max_tokens = if word_count == 1 {
            config.max_merge_tokens.max(1)
        } else {
            1
        };
        for token_count in 1..=max_tokens {
            if ti + token_count > tokens.len() {
                break;
            }
            let token: String = tokens[ti..ti + token_count].concat();
            let Some(distance) = keys_match(&word, &token, config) else {
                continue;
            };
            let candidate = Candidate {
                word_count,
                token_count,
                distance,
            };
            let better = best.map_or(true, |b| {
                (distance, word_count + token_count) < (b.distance, b.word_count + b.token_count)
            });
            if better {
                best = Some(candidate);
            }
        }
    }
    best
}

/// Walk book words and span tokens in lock-step and record the pairs that
/// verifiably match. Keys are pre-normalized with `word_key`; empty keys
/// (punctuation, synthetic tokens) never anchor.
pub(super) fn build_anchors(
    words: &[String],
    tokens: &[String],
    config: &WordAlignConfig,
) -> Vec<Anchor> {
    let mut anchors = Vec::new();
    let (mut wi, mut ti) = (0, 0);
    let mut last_skip: Option<Side> = None;
    let mut same_side_run = 0;

    while wi < words.len() && ti < tokens.len() {
        if words[wi].is_empty() {
            wi += 1;
            continue;
        }
        if tokens[ti].is_empty() {
            ti += 1;
            continue;
        }

        if let Some(found) = best_at(words, tokens, wi, ti, config) {
            anchors.push(Anchor {
                word_index: wi,
                word_count: found.word_count,
                token_start: ti,
                token_count: found.token_count,
                distance: found.distance,
            });
            wi += found.word_count;
            ti += found.token_count;
            last_skip = None;
            same_side_run = 0;
            continue;
        }

        let word_reach =
            (1..=config.lookahead).find(|&j| best_at(words, tokens, wi + j, ti, config).is_some());
        let token_reach =
            (1..=config.lookahead).find(|&j| best_at(words, tokens, wi, ti + j, config).is_some());
        let mut side = match (word_reach, token_reach) {
            (Some(w), Some(t)) if w < t => Side::Word,
            (Some(w), Some(t)) if t < w => Side::Token,
            (Some(_), None) => Side::Word,
            (None, Some(_)) => Side::Token,
            _ => last_skip.map_or(Side::Token, Side::flip),
        };
        if last_skip == Some(side) && same_side_run >= config.max_same_side_skips {
            side = side.flip();
        }

        tracing::trace!(
            word_index = wi,
            token_index = ti,
            side = ?side,
            "words: skipped unmatched position"
        );
        match side {
            Side::Word => wi += 1,
            Side::Token => ti += 1,
        }
        if last_skip == Some(side) {
            same_side_run += 1;
        } else {
            last_skip = Some(side);
            same_side_run = 1;
        }
    }
    anchors
}
