//! Cheap voice-length proxy: summed per-char weights, with pauses for punctuation.

const LETTER_WEIGHT: f32 = 1.0;
const SPACE_WEIGHT: f32 = 0.3;
const CLAUSE_PAUSE_WEIGHT: f32 = 2.0;
const SENTENCE_PAUSE_WEIGHT: f32 = 3.0;
const DASH_WEIGHT: f32 = 1.0;

pub fn char_weight(c: char) -> f32 {
    match c {
        c if c.is_alphanumeric() => LETTER_WEIGHT,
        c if c.is_whitespace() => SPACE_WEIGHT,
        ',' | ';' | ':' => CLAUSE_PAUSE_WEIGHT,
        '.' | '!' | '?' => SENTENCE_PAUSE_WEIGHT,
        '-' => DASH_WEIGHT,
        _ => 0.0,
    }
}

/// Summed weight of `text`; never zero for text with letters.
pub fn estimate(text: &str) -> f32 {
    text.trim().chars().map(char_weight).sum()
}

/// Estimate with a floor so that empty or punctuation-only text still gets a share.
pub fn estimate_or_min(text: &str) -> f32 {
    estimate(text).max(LETTER_WEIGHT)
}
