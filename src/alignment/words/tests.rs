use super::anchors::{build_anchors, keys_match};
use super::gap_fill::{anchor_bounds, largest_remainder};
use super::{group_words, sentence_words, word_key, WordAligner};
use crate::config::{Granularity, WordAlignConfig};
use crate::pipeline::defaults::{CharWeightEstimator, DefaultWordGrouper};
use crate::types::{
    MatchKind, SentenceMatch, SentenceSpan, TokenKind, TokenTiming, TranscriptToken, WordAlignment,
    WordTiming,
};

fn keys(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| word_key(w)).collect()
}

/// Tokens laid out one after another, one space apart in the transcript.
fn tokens(specs: &[(&str, f64, f64)]) -> Vec<TranscriptToken> {
    let mut offset = 0;
    specs
        .iter()
        .enumerate()
        .map(|(index, (text, start, end))| {
            let len = text.chars().count();
            let token = TranscriptToken {
                text: text.to_string(),
                start: *start,
                end: *end,
                audio_file: 0,
                index,
                segment: 0,
                start_offset: offset,
                end_offset: offset + len,
                kind: TokenKind::Other,
                voice_length: len as f32,
                confidence: Some(0.9),
                refined: None,
                is_interpolated: false,
                is_rebuilt: false,
            };
            offset += len + 1;
            token
        })
        .collect()
}

fn sentence(text: &str, tokens: Vec<TranscriptToken>, start: f64, end: f64) -> SentenceMatch {
    SentenceMatch {
        sentence_index: 0,
        text: text.to_string(),
        span: SentenceSpan {
            start,
            end,
            audio_file: 0,
            tokens,
        },
        matched_text: String::new(),
        kind: MatchKind::Exact,
        shared_timestamp: false,
        rebuilt: false,
    }
}

fn align(sentence: &SentenceMatch, config: &WordAlignConfig) -> WordAlignment {
    WordAligner::new(config, &CharWeightEstimator, &DefaultWordGrouper).align_sentence(sentence)
}

fn word(text: &str, start: f64, end: f64) -> WordTiming {
    WordTiming {
        word: text.to_string(),
        start,
        end,
        tokens: 0..0,
        interpolated: false,
        rebuilt: false,
        confidence: Some(0.9),
    }
}

fn phrase_bounds(words: &[WordTiming]) -> Vec<std::ops::Range<usize>> {
    group_words(words, &[], &WordAlignConfig::default())
        .into_iter()
        .map(|g| g.words)
        .collect()
}

fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
}

#[test]
fn lockstep_words_anchor_one_to_one() {
    let config = WordAlignConfig::default();
    let anchors = build_anchors(
        &keys(&["Call", "me", "Ishmael."]),
        &keys(&["call", "me", "ishmael."]),
        &config,
    );
    assert_eq!(anchors.len(), 3);
    for (i, anchor) in anchors.iter().enumerate() {
        assert_eq!(anchor.word_index, i);
        assert_eq!(anchor.token_start, i);
        assert_eq!(anchor.token_count, 1);
        assert_eq!(anchor.distance, 0);
    }
}

#[test]
fn subword_tokens_merge_into_one_anchor() {
    let config = WordAlignConfig::default();
    let anchors = build_anchors(&keys(&["ishmael"]), &keys(&["ish", "ma", "el"]), &config);
    assert_eq!(anchors.len(), 1);
    assert_eq!(anchors[0].token_count, 3);
    assert_eq!(anchors[0].distance, 0);
}

#[test]
fn split_book_word_folds_two_words() {
    let config = WordAlignConfig::default();
    let anchors = build_anchors(&keys(&["to", "day"]), &keys(&["today"]), &config);
    assert_eq!(anchors.len(), 1);
    assert_eq!(anchors[0].word_count, 2);
    assert_eq!(anchors[0].token_count, 1);
}

#[test]
fn trailing_leniency_only_covers_suffixes() {
    let config = WordAlignConfig::default();
    assert_eq!(keys_match("sail", "sailed", &config), Some(2));
    assert_eq!(keys_match("sail", "soiled", &config), None);
    assert_eq!(keys_match("a", "i", &config), None);
    assert_eq!(keys_match("ishmaels", "ishmael", &config), Some(1));
}

#[test]
fn extra_token_is_skipped() {
    let config = WordAlignConfig::default();
    let anchors = build_anchors(
        &keys(&["call", "me", "ishmael"]),
        &keys(&["call", "um", "me", "ishmael"]),
        &config,
    );
    let starts: Vec<usize> = anchors.iter().map(|a| a.token_start).collect();
    assert_eq!(starts, vec![0, 2, 3]);
}

#[test]
fn missing_book_word_is_skipped() {
    let config = WordAlignConfig::default();
    let anchors = build_anchors(
        &keys(&["call", "me", "mister", "ishmael"]),
        &keys(&["call", "me", "ishmael"]),
        &config,
    );
    let words: Vec<usize> = anchors.iter().map(|a| a.word_index).collect();
    assert_eq!(words, vec![0, 1, 3]);
}

#[test]
fn unmatchable_sequences_terminate_without_anchors() {
    let config = WordAlignConfig::default();
    let anchors = build_anchors(
        &keys(&["alpha", "beta", "gamma", "delta", "epsilon"]),
        &keys(&["qqq", "www", "zzz", "xxx", "vvv", "kkk"]),
        &config,
    );
    assert!(anchors.is_empty());
}

#[test]
fn sentence_words_spell_numbers() {
    assert_eq!(
        sentence_words("In 1851 he sailed."),
        vec!["In", "one", "thousand", "eight", "hundred", "fifty-one", "he", "sailed."]
    );
}

#[test]
fn words_and_tokens_are_conserved() {
    let config = WordAlignConfig::default();
    let toks = tokens(&[
        ("call", 0.0, 0.3),
        ("me", 0.3, 0.6),
        ("ishmael,", 0.6, 0.9),
        ("said", 0.9, 1.2),
        ("uh", 1.2, 1.5),
        ("the", 1.5, 1.8),
        ("old", 1.8, 2.1),
        ("sailor.", 2.1, 2.4),
    ]);
    let s = sentence("Call me Ishmael, said the old sailor.", toks, 0.0, 2.4);
    let result = align(&s, &config);

    assert_eq!(result.words.len(), 7);
    let grouped: usize = result.groups.iter().map(|g| g.word_count()).sum();
    assert_eq!(grouped, 7);

    let mut cursor = 0;
    for w in &result.words {
        assert_eq!(w.tokens.start, cursor);
        cursor = w.tokens.end;
    }
    assert_eq!(cursor, 8);
    // The filler token belongs to the word before it.
    assert_eq!(result.words[3].tokens, 3..5);

    let mut next_word = 0;
    for group in &result.groups {
        assert_eq!(group.words.start, next_word);
        next_word = group.words.end;
    }
    assert_eq!(next_word, 7);

    let covered: Vec<&str> = result.groups.iter().map(|g| g.token_text.as_str()).collect();
    assert_eq!(covered.join(" "), "call me ishmael, said uh the old sailor.");
}

#[test]
fn unanchored_word_takes_single_waypoint() {
    let config = WordAlignConfig::default();
    let toks = tokens(&[
        ("call", 0.0, 0.3),
        ("me", 0.3, 0.6),
        ("mistah", 0.6, 0.9),
        ("ishmael.", 0.9, 1.2),
    ]);
    let s = sentence("Call me mister Ishmael.", toks, 0.0, 1.2);
    let result = align(&s, &config);
    assert_eq!(result.anchors.len(), 3);
    let mister = &result.words[2];
    assert_close(mister.start, 0.6);
    assert_close(mister.end, 0.9);
    assert_eq!(mister.tokens, 2..3);
    assert!(!mister.interpolated);
}

#[test]
fn gap_without_waypoints_is_spread_evenly() {
    let config = WordAlignConfig::default();
    let toks = tokens(&[("call", 0.0, 0.3)]);
    let s = sentence("Call me Ishmael.", toks, 0.0, 0.9);
    let result = align(&s, &config);
    assert_eq!(result.words[2].word, "Ishmael.");
    assert_close(result.words[1].start, 0.3);
    assert_close(result.words[1].end, 0.6);
    assert_close(result.words[2].start, 0.6);
    assert_close(result.words[2].end, 0.9);
    assert!(result.words[1].interpolated && result.words[2].interpolated);
    assert_eq!(result.words[0].tokens, 0..1);
    assert!(result.words[1].tokens.is_empty());
}

#[test]
fn waypoints_bucket_words_by_duration() {
    let config = WordAlignConfig::default();
    let toks = tokens(&[
        ("call", 0.0, 0.3),
        ("qqq", 0.3, 0.6),
        ("www", 0.6, 1.5),
        ("me", 1.5, 1.8),
    ]);
    let s = sentence("Call alpha beta gamma me", toks, 0.0, 1.8);
    let result = align(&s, &config);
    assert_eq!(result.anchors.len(), 2);

    let w = &result.words;
    assert_close(w[1].start, 0.3);
    assert_close(w[1].end, 0.6);
    assert_close(w[2].start, 0.6);
    assert_close(w[2].end, 1.05);
    assert_close(w[3].start, 1.05);
    assert_close(w[3].end, 1.5);
    assert_eq!(w[1].tokens, 1..2);
    assert_eq!(w[2].tokens, 2..3);
    assert!(w[3].tokens.is_empty());
    assert_eq!(w[4].tokens, 3..4);
}

#[test]
fn largest_remainder_rounds_by_fraction() {
    assert_eq!(largest_remainder(5, &[1.0, 1.0, 2.0]), vec![1, 1, 3]);
    assert_eq!(largest_remainder(3, &[0.0, 0.0]), vec![2, 1]);
    assert_eq!(largest_remainder(4, &[1.0, 1.0]), vec![2, 2]);
}

#[test]
fn refined_timing_only_narrows() {
    let mut toks = tokens(&[("word", 1.0, 2.0)]);
    toks[0].refined = Some(TokenTiming {
        start: 0.8,
        end: 1.8,
    });
    let (start, end) = anchor_bounds(&toks[0], &toks[0]);
    assert_close(start, 1.0);
    assert_close(end, 1.9);

    toks[0].refined = Some(TokenTiming {
        start: 1.2,
        end: 2.4,
    });
    let (start, end) = anchor_bounds(&toks[0], &toks[0]);
    assert_close(start, 1.1);
    assert_close(end, 2.0);
}

#[test]
fn interpolated_sentence_spreads_words() {
    let config = WordAlignConfig::default();
    let mut s = sentence(
        "It was dark.",
        vec![TranscriptToken::synthetic(0, 1.0, 2.5)],
        1.0,
        2.5,
    );
    s.kind = MatchKind::Interpolated;
    let result = align(&s, &config);
    assert!(result.anchors.is_empty());
    assert_eq!(result.words.len(), 3);
    assert_close(result.words[0].end, 1.5);
    assert_close(result.words[2].end, 2.5);
    assert!(result.words.iter().all(|w| w.interpolated));
    assert_eq!(result.words[0].tokens, 0..1);
    assert_eq!(result.words[2].tokens, 1..1);
}

#[test]
fn long_pause_splits_phrase() {
    let words = vec![
        word("call", 0.0, 0.3),
        word("me", 0.3, 0.6),
        word("ishmael", 1.5, 1.8),
    ];
    assert_eq!(phrase_bounds(&words), vec![0..2, 2..3]);
}

#[test]
fn unreliable_words_always_merge() {
    let words = vec![
        word("call", 0.0, 0.3),
        word("me", 0.3, 0.3),
        word("ishmael", 1.2, 1.5),
    ];
    assert_eq!(phrase_bounds(&words), vec![0..3]);
}

#[test]
fn clause_punctuation_blocks_zero_length_merge() {
    let words = vec![
        word("ishmael,", 0.0, 0.3),
        word("said", 0.3, 0.3),
        word("he", 0.3, 0.6),
    ];
    assert_eq!(phrase_bounds(&words), vec![0..1, 1..3]);

    let words = vec![
        word("ishmael", 0.0, 0.3),
        word("said", 0.3, 0.3),
        word("he", 0.3, 0.6),
    ];
    assert_eq!(phrase_bounds(&words), vec![0..3]);
}

#[test]
fn group_duration_is_capped() {
    let words: Vec<WordTiming> = ["one", "two", "three", "four", "five", "six"]
        .iter()
        .enumerate()
        .map(|(i, w)| word(w, i as f64 * 0.4, (i + 1) as f64 * 0.4))
        .collect();
    assert_eq!(phrase_bounds(&words), vec![0..3, 3..6]);
}

#[test]
fn short_group_joins_closest_neighbor() {
    let words = vec![
        word("call", 0.0, 0.3),
        word("me", 0.3, 0.6),
        word("oh", 1.2, 1.3),
        word("ishmael", 2.5, 2.8),
    ];
    assert_eq!(phrase_bounds(&words), vec![0..3, 3..4]);
}

#[test]
fn trailing_function_word_moves_to_next_group() {
    let words = vec![
        word("he", 0.0, 0.3),
        word("sailed", 0.3, 0.7),
        word("into", 0.7, 0.9),
        word("port", 1.4, 1.8),
        word("today", 1.8, 2.2),
    ];
    assert_eq!(phrase_bounds(&words), vec![0..2, 2..5]);
}

#[test]
fn segment_granularity_follows_asr_segments() {
    let mut toks = tokens(&[("call", 0.0, 0.3), ("me", 0.3, 0.6), ("ishmael.", 0.9, 1.2)]);
    toks[2].segment = 1;
    let mut words = vec![
        word("call", 0.0, 0.3),
        word("me", 0.3, 0.6),
        word("ishmael.", 0.9, 1.2),
    ];
    for (i, w) in words.iter_mut().enumerate() {
        w.tokens = i..i + 1;
    }
    let config = WordAlignConfig {
        granularity: Granularity::Segment,
        ..WordAlignConfig::default()
    };
    let groups = group_words(&words, &toks, &config);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].text, "call me");
    assert_eq!(groups[0].token_text, "call me");
    assert_eq!(groups[1].words, 2..3);
}

#[test]
fn word_granularity_keeps_every_word() {
    let config = WordAlignConfig {
        granularity: Granularity::Word,
        ..WordAlignConfig::default()
    };
    let words = vec![word("call", 0.0, 0.3), word("me", 0.3, 0.31)];
    let groups = group_words(&words, &[], &config);
    assert_eq!(groups.len(), 2);
    assert!(groups.iter().all(|g| g.word_count() == 1));
}
