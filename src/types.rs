use std::ops::Range;

use serde::{Deserialize, Serialize};

/// One contiguous audio segment of the audiobook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFile {
    pub id: String,
    /// Offset of the first sample within the whole audiobook, in seconds.
    pub start: f64,
    /// Offset one past the last sample within the whole audiobook, in seconds.
    pub end: f64,
}

impl AudioFile {
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Secondary timing signal for an ASR token (for example a DTW refinement).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenTiming {
    pub start: f64,
    pub end: f64,
}

/// Token as emitted by the speech-recognition collaborator. Times are seconds
/// relative to the start of the owning audio file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsrToken {
    pub text: String,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub voice_length: Option<f32>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub refined: Option<TokenTiming>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsrSegment {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub tokens: Vec<AsrToken>,
}

/// All recognized segments of one audio file, in playback order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTranscription {
    /// Index into the audio file inventory.
    pub audio_file: usize,
    pub segments: Vec<AsrSegment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterKind {
    FrontMatter,
    #[default]
    Body,
    BackMatter,
}

impl ChapterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChapterKind::FrontMatter => "front_matter",
            ChapterKind::Body => "body",
            ChapterKind::BackMatter => "back_matter",
        }
    }
}

/// Sentence-tokenized text of one book chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterText {
    pub spine_index: usize,
    #[serde(default)]
    pub title: Option<String>,
    pub sentences: Vec<String>,
    #[serde(default)]
    pub kind: ChapterKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    SentenceBegin,
    SentenceEnd,
    /// No alphanumeric content.
    Punctuation,
    /// Timing was absent or unusable in the ASR output.
    Missing,
    Other,
}

/// One entry of the transcript token timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptToken {
    /// Normalized, lower-cased token text as it appears in the transcript string.
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub audio_file: usize,
    /// Global 0-based position in the timeline.
    pub index: usize,
    /// Global ASR segment index.
    pub segment: usize,
    /// Char offset range into the transcript string.
    pub start_offset: usize,
    pub end_offset: usize,
    pub kind: TokenKind,
    pub voice_length: f32,
    pub confidence: Option<f32>,
    pub refined: Option<TokenTiming>,
    pub is_interpolated: bool,
    pub is_rebuilt: bool,
}

impl TranscriptToken {
    /// Placeholder token covering a window that has no real transcript text.
    pub fn synthetic(audio_file: usize, start: f64, end: f64) -> Self {
        Self {
            text: String::new(),
            start,
            end,
            audio_file,
            index: usize::MAX,
            segment: usize::MAX,
            start_offset: usize::MAX,
            end_offset: usize::MAX,
            kind: TokenKind::Missing,
            voice_length: 0.0,
            confidence: None,
            refined: None,
            is_interpolated: true,
            is_rebuilt: false,
        }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    pub fn is_real(&self) -> bool {
        !self.is_interpolated && self.index != usize::MAX
    }

    /// Merge two tokens into one covering both.
    ///
    /// Tokens are ordered by timeline index first, so `a.merge(&b) == b.merge(&a)`
    /// and merging is associative over every field it touches.
    pub fn merge(&self, other: &Self) -> Self {
        let (first, second) = if (other.index, other.start_offset) < (self.index, self.start_offset)
        {
            (other, self)
        } else {
            (self, other)
        };

        let mut text = first.text.clone();
        if !text.is_empty() && !second.text.is_empty() && second.start_offset > first.end_offset {
            text.push(' ');
        }
        text.push_str(&second.text);

        let kind = if second.kind == TokenKind::SentenceEnd {
            TokenKind::SentenceEnd
        } else {
            first.kind
        };
        let confidence = match (first.confidence, second.confidence) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let refined = match (first.refined, second.refined) {
            (Some(a), Some(b)) => Some(TokenTiming {
                start: a.start.min(b.start),
                end: a.end.max(b.end),
            }),
            (a, b) => a.or(b),
        };

        Self {
            text,
            start: first.start.min(second.start),
            end: first.end.max(second.end),
            audio_file: first.audio_file,
            index: first.index,
            segment: first.segment.min(second.segment),
            start_offset: first.start_offset.min(second.start_offset),
            end_offset: first.end_offset.max(second.end_offset),
            kind,
            voice_length: first.voice_length + second.voice_length,
            confidence,
            refined,
            is_interpolated: first.is_interpolated || second.is_interpolated,
            is_rebuilt: first.is_rebuilt || second.is_rebuilt,
        }
    }
}

/// Time range `[start, end)` on one audio file backing a sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceSpan {
    pub start: f64,
    pub end: f64,
    pub audio_file: usize,
    pub tokens: Vec<TranscriptToken>,
}

impl SentenceSpan {
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    pub fn is_interpolated(&self) -> bool {
        self.tokens.iter().all(|token| !token.is_real())
    }

    pub fn first_token_index(&self) -> Option<usize> {
        self.tokens.iter().find(|t| t.is_real()).map(|t| t.index)
    }

    pub fn last_token_index(&self) -> Option<usize> {
        self.tokens.iter().rev().find(|t| t.is_real()).map(|t| t.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    TrimmedLeading,
    IgnoringEndsPunctuation,
    IgnoringAllPunctuation,
    /// Fuzzy (bounded edit distance) match.
    Nearest,
    Interpolated,
    /// Interpolated, then backfilled with unclaimed real transcript tokens.
    Recoverable,
}

impl MatchKind {
    pub const ALL: [MatchKind; 7] = [
        MatchKind::Exact,
        MatchKind::TrimmedLeading,
        MatchKind::IgnoringEndsPunctuation,
        MatchKind::IgnoringAllPunctuation,
        MatchKind::Nearest,
        MatchKind::Interpolated,
        MatchKind::Recoverable,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::TrimmedLeading => "trimmed_leading",
            MatchKind::IgnoringEndsPunctuation => "ignoring_ends_punctuation",
            MatchKind::IgnoringAllPunctuation => "ignoring_all_punctuation",
            MatchKind::Nearest => "nearest",
            MatchKind::Interpolated => "interpolated",
            MatchKind::Recoverable => "recoverable",
        }
    }

    /// True when the sentence was found in the transcript text itself.
    pub fn is_text_match(self) -> bool {
        !matches!(self, MatchKind::Interpolated | MatchKind::Recoverable)
    }
}

/// A chapter sentence bound to a span of audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceMatch {
    /// Position of the sentence within its chapter.
    pub sentence_index: usize,
    pub text: String,
    pub span: SentenceSpan,
    /// Transcript substring the sentence matched (empty when interpolated).
    pub matched_text: String,
    pub kind: MatchKind,
    /// The span was reused from the previous sentence (both live in one ASR token).
    pub shared_timestamp: bool,
    /// The span was redistributed by the rebuild pass.
    pub rebuilt: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSentence {
    pub sentence_index: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterAlignment {
    pub spine_index: usize,
    pub title: Option<String>,
    pub kind: ChapterKind,
    /// Number of sentences supplied for the chapter.
    pub sentence_count: usize,
    /// Resolved sentences in chapter order.
    pub sentences: Vec<SentenceMatch>,
    /// Sentences the matcher could not place (before refinement fills them in).
    pub skipped: Vec<SkippedSentence>,
    /// Sentences ignored because they carry no matchable text.
    pub dropped: Vec<usize>,
    pub is_missing_chapter: bool,
    /// Transcript char range the chapter claimed.
    pub transcript_range: Option<Range<usize>>,
}

impl ChapterAlignment {
    pub(crate) fn empty(chapter: &ChapterText) -> Self {
        Self {
            spine_index: chapter.spine_index,
            title: chapter.title.clone(),
            kind: chapter.kind,
            sentence_count: chapter.sentences.len(),
            sentences: Vec::new(),
            skipped: Vec::new(),
            dropped: Vec::new(),
            is_missing_chapter: false,
            transcript_range: None,
        }
    }

    pub fn matched_count(&self) -> usize {
        self.sentences
            .iter()
            .filter(|sentence| sentence.kind.is_text_match())
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookAlignment {
    /// Chapters in spine order.
    pub chapters: Vec<ChapterAlignment>,
}

/// Verified correspondence between book word(s) and 1-3 consecutive transcript tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub word_index: usize,
    /// Book words folded into this anchor (1 or 2).
    pub word_count: usize,
    /// Index into the span's token slice.
    pub token_start: usize,
    pub token_count: usize,
    pub distance: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
    /// Span tokens owned by this word (may be empty for gap-filled words).
    pub tokens: Range<usize>,
    pub interpolated: bool,
    pub rebuilt: bool,
    pub confidence: Option<f32>,
}

impl WordTiming {
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// A run of words merged into one highlight unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseGroup {
    /// Range into `WordAlignment::words`.
    pub words: Range<usize>,
    pub text: String,
    pub token_text: String,
    pub start: f64,
    pub end: f64,
    pub any_interpolated: bool,
    pub any_rebuilt: bool,
}

impl PhraseGroup {
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordAlignment {
    pub sentence_index: usize,
    pub audio_file: usize,
    pub words: Vec<WordTiming>,
    pub anchors: Vec<Anchor>,
    pub groups: Vec<PhraseGroup>,
}
