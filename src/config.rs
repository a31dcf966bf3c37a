use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AlignmentError;

/// Highlight unit produced by the word aligner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Word,
    /// One group per ASR recognition segment.
    Segment,
    #[default]
    Phrase,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [Granularity::Word, Granularity::Segment, Granularity::Phrase];

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Word => "word",
            Granularity::Segment => "segment",
            Granularity::Phrase => "phrase",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|granularity| granularity.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Words per n-gram key.
    pub ngram_size: usize,
    /// Transcripts longer than this (in chars) are located through the index.
    pub indexed_threshold_chars: usize,
}

impl IndexConfig {
    pub const DEFAULT_NGRAM_SIZE: usize = 5;
    pub const DEFAULT_INDEXED_THRESHOLD_CHARS: usize = 20_000;
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            ngram_size: Self::DEFAULT_NGRAM_SIZE,
            indexed_threshold_chars: Self::DEFAULT_INDEXED_THRESHOLD_CHARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Sentences per query chunk.
    pub chunk_sentences: usize,
    /// Sentence stride between successive query chunks.
    pub stride_sentences: usize,
    /// Max edit distance as a share of the chunk length.
    pub max_distance_ratio: f64,
    pub scan_window_chars: usize,
    /// Query chunks tried inside one scan window.
    pub scan_max_chunks: usize,
    /// Transcript sentences searched on either side of an index hit.
    pub refine_sentence_radius: usize,
    /// Extra chars around an index candidate handed to the fuzzy matcher.
    pub candidate_slack_chars: usize,
    /// Chapter sentences tried before the chapter is declared missing.
    pub max_probe_sentences: usize,
    /// Shorter chunks tried once no full-size chunk clears the threshold.
    /// Zero disables the fallback.
    pub fallback_max_chunks: usize,
    /// Fallback chunks shorter than this are never tried.
    pub min_fallback_chunk_chars: usize,
}

impl LocatorConfig {
    pub const DEFAULT_CHUNK_SENTENCES: usize = 6;
    pub const DEFAULT_STRIDE_SENTENCES: usize = 3;
    pub const DEFAULT_MAX_DISTANCE_RATIO: f64 = 0.10;
    pub const DEFAULT_SCAN_WINDOW_CHARS: usize = 5_000;
    pub const DEFAULT_SCAN_MAX_CHUNKS: usize = 12;
    pub const DEFAULT_REFINE_SENTENCE_RADIUS: usize = 6;
    pub const DEFAULT_CANDIDATE_SLACK_CHARS: usize = 64;
    pub const DEFAULT_MAX_PROBE_SENTENCES: usize = 60;
    pub const DEFAULT_FALLBACK_MAX_CHUNKS: usize = 36;
    pub const DEFAULT_MIN_FALLBACK_CHUNK_CHARS: usize = 12;
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            chunk_sentences: Self::DEFAULT_CHUNK_SENTENCES,
            stride_sentences: Self::DEFAULT_STRIDE_SENTENCES,
            max_distance_ratio: Self::DEFAULT_MAX_DISTANCE_RATIO,
            scan_window_chars: Self::DEFAULT_SCAN_WINDOW_CHARS,
            scan_max_chunks: Self::DEFAULT_SCAN_MAX_CHUNKS,
            refine_sentence_radius: Self::DEFAULT_REFINE_SENTENCE_RADIUS,
            candidate_slack_chars: Self::DEFAULT_CANDIDATE_SLACK_CHARS,
            max_probe_sentences: Self::DEFAULT_MAX_PROBE_SENTENCES,
            fallback_max_chunks: Self::DEFAULT_FALLBACK_MAX_CHUNKS,
            min_fallback_chunk_chars: Self::DEFAULT_MIN_FALLBACK_CHUNK_CHARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Window sizes as multiples of the query length, tried in order.
    pub small_window_factor: f64,
    pub medium_window_factor: f64,
    pub large_window_factor: f64,
    /// Hard window ceiling in chars.
    pub max_window_chars: usize,
    /// Queries shorter than this use `short_query_window_chars` as ceiling.
    pub short_query_chars: usize,
    pub short_query_window_chars: usize,
    /// Fuzzy tolerance as a share of the query length, before drift tightening.
    pub fuzzy_ratio: f64,
    /// Consecutive failures before the window is advanced.
    pub max_consecutive_failures: usize,
    /// Window advances before a stuck run is abandoned.
    pub max_window_advances: usize,
}

impl MatcherConfig {
    pub const DEFAULT_SMALL_WINDOW_FACTOR: f64 = 1.5;
    pub const DEFAULT_MEDIUM_WINDOW_FACTOR: f64 = 3.0;
    pub const DEFAULT_LARGE_WINDOW_FACTOR: f64 = 7.0;
    pub const DEFAULT_MAX_WINDOW_CHARS: usize = 3_000;
    pub const DEFAULT_SHORT_QUERY_CHARS: usize = 30;
    pub const DEFAULT_SHORT_QUERY_WINDOW_CHARS: usize = 400;
    pub const DEFAULT_FUZZY_RATIO: f64 = 0.25;
    pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: usize = 3;
    pub const DEFAULT_MAX_WINDOW_ADVANCES: usize = 8;

    pub(crate) fn window_factors(&self) -> [f64; 3] {
        [
            self.small_window_factor,
            self.medium_window_factor,
            self.large_window_factor,
        ]
    }

    pub(crate) fn window_ceiling(&self, query_chars: usize) -> usize {
        if query_chars < self.short_query_chars {
            self.short_query_window_chars
        } else {
            self.max_window_chars
        }
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            small_window_factor: Self::DEFAULT_SMALL_WINDOW_FACTOR,
            medium_window_factor: Self::DEFAULT_MEDIUM_WINDOW_FACTOR,
            large_window_factor: Self::DEFAULT_LARGE_WINDOW_FACTOR,
            max_window_chars: Self::DEFAULT_MAX_WINDOW_CHARS,
            short_query_chars: Self::DEFAULT_SHORT_QUERY_CHARS,
            short_query_window_chars: Self::DEFAULT_SHORT_QUERY_WINDOW_CHARS,
            fuzzy_ratio: Self::DEFAULT_FUZZY_RATIO,
            max_consecutive_failures: Self::DEFAULT_MAX_CONSECUTIVE_FAILURES,
            max_window_advances: Self::DEFAULT_MAX_WINDOW_ADVANCES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    /// Gap claimed when interpolation finds no room between anchors.
    pub min_gap_secs: f64,
    /// Donor anchors keep at least this share of their duration.
    pub min_donor_share: f64,
    /// Runs faster than this (seconds per word) are rebuilt.
    pub suspicious_secs_per_word: f64,
    /// Cap on edge runs, as a multiple of the chapter's observed pace.
    pub open_run_stretch: f64,
}

impl RefineConfig {
    pub const DEFAULT_MIN_GAP_SECS: f64 = 0.25;
    pub const DEFAULT_MIN_DONOR_SHARE: f64 = 0.5;
    pub const DEFAULT_SUSPICIOUS_SECS_PER_WORD: f64 = 0.1;
    pub const DEFAULT_OPEN_RUN_STRETCH: f64 = 1.5;
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            min_gap_secs: Self::DEFAULT_MIN_GAP_SECS,
            min_donor_share: Self::DEFAULT_MIN_DONOR_SHARE,
            suspicious_secs_per_word: Self::DEFAULT_SUSPICIOUS_SECS_PER_WORD,
            open_run_stretch: Self::DEFAULT_OPEN_RUN_STRETCH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WordAlignConfig {
    pub granularity: Granularity,
    /// Max edit distance between a word and its tokens, as a share of the longer string.
    pub match_ratio: f64,
    /// Extra trailing chars tolerated when one side is a prefix of the other.
    pub trailing_slack: usize,
    /// Shortest prefix eligible for trailing leniency.
    pub min_trailing_len: usize,
    /// Transcript tokens merged when comparing against one word.
    pub max_merge_tokens: usize,
    /// Steps explored on each side before choosing which cursor to skip.
    pub lookahead: usize,
    /// Consecutive same-side skips before the side is flipped.
    pub max_same_side_skips: usize,
    pub pause_secs: f64,
    /// Pause tolerance while timing looks unreliable.
    pub boosted_pause_secs: f64,
    /// Consecutive reliable words needed to leave the boosted mode.
    pub reliable_words_to_unboost: usize,
    pub unreliable_duration_secs: f64,
    pub low_confidence: f32,
    pub max_group_secs: f64,
    pub min_highlight_secs: f64,
}

impl WordAlignConfig {
    pub const DEFAULT_MATCH_RATIO: f64 = 0.25;
    pub const DEFAULT_TRAILING_SLACK: usize = 2;
    pub const DEFAULT_MIN_TRAILING_LEN: usize = 3;
    pub const DEFAULT_MAX_MERGE_TOKENS: usize = 3;
    pub const DEFAULT_LOOKAHEAD: usize = 4;
    pub const DEFAULT_MAX_SAME_SIDE_SKIPS: usize = 3;
    pub const DEFAULT_PAUSE_SECS: f64 = 0.3;
    pub const DEFAULT_BOOSTED_PAUSE_SECS: f64 = 0.6;
    pub const DEFAULT_RELIABLE_WORDS_TO_UNBOOST: usize = 2;
    pub const DEFAULT_UNRELIABLE_DURATION_SECS: f64 = 0.02;
    pub const DEFAULT_LOW_CONFIDENCE: f32 = 0.5;
    pub const DEFAULT_MAX_GROUP_SECS: f64 = 1.5;
    pub const DEFAULT_MIN_HIGHLIGHT_SECS: f64 = 0.19;
}

impl Default for WordAlignConfig {
    fn default() -> Self {
        Self {
            granularity: Granularity::default(),
            match_ratio: Self::DEFAULT_MATCH_RATIO,
            trailing_slack: Self::DEFAULT_TRAILING_SLACK,
            min_trailing_len: Self::DEFAULT_MIN_TRAILING_LEN,
            max_merge_tokens: Self::DEFAULT_MAX_MERGE_TOKENS,
            lookahead: Self::DEFAULT_LOOKAHEAD,
            max_same_side_skips: Self::DEFAULT_MAX_SAME_SIDE_SKIPS,
            pause_secs: Self::DEFAULT_PAUSE_SECS,
            boosted_pause_secs: Self::DEFAULT_BOOSTED_PAUSE_SECS,
            reliable_words_to_unboost: Self::DEFAULT_RELIABLE_WORDS_TO_UNBOOST,
            unreliable_duration_secs: Self::DEFAULT_UNRELIABLE_DURATION_SECS,
            low_confidence: Self::DEFAULT_LOW_CONFIDENCE,
            max_group_secs: Self::DEFAULT_MAX_GROUP_SECS,
            min_highlight_secs: Self::DEFAULT_MIN_HIGHLIGHT_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Run every pass on the calling thread.
    pub low_resource: bool,
    /// Worker pool size for the parallel passes; `None` uses rayon's default.
    pub max_parallel_chapters: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignerConfig {
    pub index: IndexConfig,
    pub locator: LocatorConfig,
    pub matcher: MatcherConfig,
    pub refine: RefineConfig,
    pub words: WordAlignConfig,
    pub execution: ExecutionConfig,
}

impl AlignerConfig {
    pub fn load(path: &Path) -> Result<Self, AlignmentError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| AlignmentError::io("read aligner config", e))?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| AlignmentError::json("parse aligner config", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AlignmentError> {
        if self.index.ngram_size == 0 {
            return Err(AlignmentError::invalid_input("index.ngram_size must be > 0"));
        }
        if self.locator.chunk_sentences == 0 || self.locator.stride_sentences == 0 {
            return Err(AlignmentError::invalid_input(
                "locator.chunk_sentences and locator.stride_sentences must be > 0",
            ));
        }
        if self.locator.scan_window_chars == 0 || self.locator.scan_max_chunks == 0 {
            return Err(AlignmentError::invalid_input(
                "locator.scan_window_chars and locator.scan_max_chunks must be > 0",
            ));
        }
        check_ratio("locator.max_distance_ratio", self.locator.max_distance_ratio)?;
        check_ratio("matcher.fuzzy_ratio", self.matcher.fuzzy_ratio)?;
        check_ratio("words.match_ratio", self.words.match_ratio)?;
        check_ratio("refine.min_donor_share", self.refine.min_donor_share)?;

        let [small, medium, large] = self.matcher.window_factors();
        if !(small > 0.0 && small < medium && medium < large) {
            return Err(AlignmentError::invalid_input(format!(
                "matcher window factors must be positive and increasing, got {small}, {medium}, {large}"
            )));
        }
        if self.matcher.max_window_chars == 0 || self.matcher.short_query_window_chars == 0 {
            return Err(AlignmentError::invalid_input(
                "matcher window ceilings must be > 0",
            ));
        }
        if self.matcher.max_consecutive_failures == 0 {
            return Err(AlignmentError::invalid_input(
                "matcher.max_consecutive_failures must be > 0",
            ));
        }

        check_positive("refine.min_gap_secs", self.refine.min_gap_secs)?;
        check_positive(
            "refine.suspicious_secs_per_word",
            self.refine.suspicious_secs_per_word,
        )?;
        if !(self.refine.open_run_stretch >= 1.0) {
            return Err(AlignmentError::invalid_input(
                "refine.open_run_stretch must be >= 1.0",
            ));
        }

        let words = &self.words;
        if !(1..=3).contains(&words.max_merge_tokens) {
            return Err(AlignmentError::invalid_input(
                "words.max_merge_tokens must be in 1..=3",
            ));
        }
        if words.lookahead == 0 || words.max_same_side_skips == 0 {
            return Err(AlignmentError::invalid_input(
                "words.lookahead and words.max_same_side_skips must be > 0",
            ));
        }
        check_positive("words.pause_secs", words.pause_secs)?;
        if words.boosted_pause_secs < words.pause_secs {
            return Err(AlignmentError::invalid_input(
                "words.boosted_pause_secs must be >= words.pause_secs",
            ));
        }
        check_positive("words.max_group_secs", words.max_group_secs)?;
        if !(words.min_highlight_secs >= 0.0 && words.min_highlight_secs < words.max_group_secs) {
            return Err(AlignmentError::invalid_input(
                "words.min_highlight_secs must be in [0, words.max_group_secs)",
            ));
        }

        if self.execution.max_parallel_chapters == Some(0) {
            return Err(AlignmentError::invalid_input(
                "execution.max_parallel_chapters must be > 0 when set",
            ));
        }
        Ok(())
    }
}

fn check_ratio(name: &str, value: f64) -> Result<(), AlignmentError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(AlignmentError::invalid_input(format!(
            "{name} must be in (0, 1], got {value}"
        )))
    }
}

fn check_positive(name: &str, value: f64) -> Result<(), AlignmentError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(AlignmentError::invalid_input(format!(
            "{name} must be > 0, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligner_config_default_validates() {
        let config = AlignerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.index.ngram_size, IndexConfig::DEFAULT_NGRAM_SIZE);
        assert_eq!(config.locator.scan_window_chars, 5_000);
        assert_eq!(config.words.granularity, Granularity::Phrase);
        assert!(!config.execution.low_resource);
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let json = r#"{
            "matcher": { "max_window_advances": 2 },
            "words": { "granularity": "word" },
            "execution": { "low_resource": true }
        }"#;
        let config: AlignerConfig = serde_json::from_str(json).expect("valid config json");
        assert_eq!(config.matcher.max_window_advances, 2);
        assert_eq!(
            config.matcher.fuzzy_ratio,
            MatcherConfig::DEFAULT_FUZZY_RATIO
        );
        assert_eq!(config.words.granularity, Granularity::Word);
        assert_eq!(config.words.pause_secs, WordAlignConfig::DEFAULT_PAUSE_SECS);
        assert!(config.execution.low_resource);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_increasing_window_factors() {
        let mut config = AlignerConfig::default();
        config.matcher.medium_window_factor = 1.0;
        let err = config.validate().expect_err("factors out of order");
        assert!(err.to_string().contains("window factors"));
    }

    #[test]
    fn validate_rejects_zero_ngram_and_bad_ratio() {
        let mut config = AlignerConfig::default();
        config.index.ngram_size = 0;
        assert!(config.validate().is_err());

        let mut config = AlignerConfig::default();
        config.locator.max_distance_ratio = 1.5;
        assert!(config.validate().is_err());

        let mut config = AlignerConfig::default();
        config.execution.max_parallel_chapters = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn window_ceiling_shrinks_for_short_queries() {
        let matcher = MatcherConfig::default();
        assert_eq!(matcher.window_ceiling(10), 400);
        assert_eq!(matcher.window_ceiling(120), 3_000);
    }

    #[test]
    fn granularity_parse_is_case_insensitive() {
        assert_eq!(Granularity::parse("Phrase"), Some(Granularity::Phrase));
        assert_eq!(Granularity::parse(" segment "), Some(Granularity::Segment));
        assert_eq!(Granularity::parse("line"), None);
    }

    #[test]
    fn load_reports_missing_file_as_io() {
        let err = AlignerConfig::load(Path::new("/nonexistent/readalong.json"))
            .expect_err("missing file");
        assert!(matches!(err, AlignmentError::Io { .. }));
    }
}
