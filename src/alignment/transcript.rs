use std::borrow::Cow;
use std::ops::Range;
use std::sync::OnceLock;

use crate::alignment::ngram_index::NgramIndex;
use crate::alignment::normalize::{is_punctuation_only, is_sentence_terminal, matching_form};
use crate::alignment::spoken_length;
use crate::config::IndexConfig;
use crate::error::AlignmentError;
use crate::types::{AudioFile, FileTranscription, TokenKind, TranscriptToken};

/// One ASR recognition segment, as a token range of the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    pub audio_file: usize,
    pub start: f64,
    pub end: f64,
    pub tokens: Range<usize>,
}

/// Whole-book transcript: one normalized string plus its token timeline.
///
/// Read-only once built; the n-gram index is computed on first use.
#[derive(Debug)]
pub struct Transcript {
    text: String,
    chars: Vec<char>,
    tokens: Vec<TranscriptToken>,
    segments: Vec<SegmentInfo>,
    sentences: Vec<Range<usize>>,
    audio_files: Vec<AudioFile>,
    ngram_index: OnceLock<NgramIndex>,
}

/// Word spacing convention of one ASR segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Spacing {
    /// Tokens carry a leading space when they start a word.
    Subword,
    /// Every token is a whole word.
    Word,
}

impl Transcript {
    /// Normalize and concatenate per-file transcriptions in playback order.
    pub fn build(
        audio_files: Vec<AudioFile>,
        transcriptions: &[FileTranscription],
    ) -> Result<Self, AlignmentError> {
        validate_audio_files(&audio_files)?;

        let mut ordered: Vec<&FileTranscription> = transcriptions.iter().collect();
        ordered.sort_by_key(|transcription| transcription.audio_file);
        for pair in ordered.windows(2) {
            if pair[0].audio_file == pair[1].audio_file {
                return Err(AlignmentError::invalid_input(format!(
                    "audio file {} has more than one transcription",
                    pair[0].audio_file
                )));
            }
        }

        let mut text = String::new();
        let mut offset = 0usize;
        let mut tokens: Vec<TranscriptToken> = Vec::new();
        let mut segments: Vec<SegmentInfo> = Vec::new();
        let mut dropped_empty = 0usize;
        let mut clamped = 0usize;

        for transcription in ordered {
            let audio_file = transcription.audio_file;
            let Some(file) = audio_files.get(audio_file) else {
                return Err(AlignmentError::invalid_input(format!(
                    "transcription references unknown audio file {audio_file} ({} known)",
                    audio_files.len()
                )));
            };
            let file_duration = file.duration();
            let mut last_end = 0.0f64;

            for segment in &transcription.segments {
                let spacing = detect_spacing(segment.tokens.iter().map(|t| t.text.as_str()));
                let first_token = tokens.len();
                let mut sentence_open = false;

                for (position, asr) in segment.tokens.iter().enumerate() {
                    let normalized = matching_form(asr.text.trim());
                    let normalized = normalized.trim();
                    if normalized.is_empty() {
                        dropped_empty += 1;
                        continue;
                    }
                    let punctuation = is_punctuation_only(normalized);
                    let starts_word = position == 0
                        || tokens.len() == first_token
                        || match spacing {
                            Spacing::Word => true,
                            Spacing::Subword => asr.text.starts_with(char::is_whitespace),
                        };
                    if !text.is_empty() && starts_word && !punctuation {
                        text.push(' ');
                        offset += 1;
                    }
                    let start_offset = offset;
                    text.push_str(normalized);
                    offset += normalized.chars().count();

                    let timing_usable = asr.start.is_finite()
                        && asr.end.is_finite()
                        && asr.start >= 0.0
                        && asr.end >= asr.start;
                    let (start, end) = if timing_usable {
                        let mut start = asr.start;
                        if start < last_end {
                            clamped += 1;
                            start = last_end;
                        }
                        let end = asr.end.max(start);
                        (start, end)
                    } else {
                        (last_end, last_end)
                    };
                    let (start, end) = if file_duration > 0.0 {
                        (start.min(file_duration), end.min(file_duration))
                    } else {
                        (start, end)
                    };
                    last_end = end;

                    let kind = if !timing_usable {
                        TokenKind::Missing
                    } else if punctuation {
                        TokenKind::Punctuation
                    } else if normalized.ends_with(is_sentence_terminal) {
                        TokenKind::SentenceEnd
                    } else if !sentence_open {
                        TokenKind::SentenceBegin
                    } else {
                        TokenKind::Other
                    };
                    sentence_open = !normalized.ends_with(is_sentence_terminal);

                    let refined = asr
                        .refined
                        .filter(|r| r.start.is_finite() && r.end.is_finite() && r.end >= r.start);
                    tokens.push(TranscriptToken {
                        text: normalized.to_string(),
                        start,
                        end,
                        audio_file,
                        index: tokens.len(),
                        segment: segments.len(),
                        start_offset,
                        end_offset: offset,
                        kind,
                        voice_length: asr
                            .voice_length
                            .filter(|v| v.is_finite() && *v > 0.0)
                            .unwrap_or_else(|| spoken_length::estimate_or_min(normalized)),
                        confidence: asr.confidence,
                        refined,
                        is_interpolated: false,
                        is_rebuilt: false,
                    });
                }

                if tokens.len() > first_token {
                    let seg_start = tokens[first_token].start;
                    let seg_end = tokens[tokens.len() - 1].end;
                    segments.push(SegmentInfo {
                        audio_file,
                        start: if segment.start.is_finite() {
                            segment.start.max(0.0).min(seg_start)
                        } else {
                            seg_start
                        },
                        end: if segment.end.is_finite() {
                            segment.end.max(seg_end)
                        } else {
                            seg_end
                        },
                        tokens: first_token..tokens.len(),
                    });
                }
            }
        }

        if clamped > 0 {
            tracing::warn!(clamped, "transcript: clamped non-monotonic token times");
        }
        if dropped_empty > 0 {
            tracing::debug!(dropped_empty, "transcript: dropped empty tokens");
        }

        let chars: Vec<char> = text.chars().collect();
        let sentences = split_sentences(&tokens, &segments, chars.len());
        tracing::info!(
            chars = chars.len(),
            tokens = tokens.len(),
            segments = segments.len(),
            sentences = sentences.len(),
            audio_files = audio_files.len(),
            "transcript: built"
        );

        Ok(Self {
            text,
            chars,
            tokens,
            segments,
            sentences,
            audio_files,
            ngram_index: OnceLock::new(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn char_len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn tokens(&self) -> &[TranscriptToken] {
        &self.tokens
    }

    pub fn segments(&self) -> &[SegmentInfo] {
        &self.segments
    }

    pub fn audio_files(&self) -> &[AudioFile] {
        &self.audio_files
    }

    /// Transcript sentence char ranges, in order.
    pub fn sentences(&self) -> &[Range<usize>] {
        &self.sentences
    }

    pub fn slice(&self, range: Range<usize>) -> String {
        let end = range.end.min(self.chars.len());
        let start = range.start.min(end);
        self.chars[start..end].iter().collect()
    }

    /// N-gram index over the whole transcript. The default size is cached.
    pub fn ngram_index(&self, ngram_size: usize) -> Cow<'_, NgramIndex> {
        if ngram_size == IndexConfig::DEFAULT_NGRAM_SIZE {
            Cow::Borrowed(
                self.ngram_index
                    .get_or_init(|| NgramIndex::build(&self.text, ngram_size)),
            )
        } else {
            match self.ngram_index.get() {
                Some(index) if index.ngram_size() == ngram_size => Cow::Borrowed(index),
                _ => Cow::Owned(NgramIndex::build(&self.text, ngram_size)),
            }
        }
    }

    /// First token whose end offset lies past `offset`.
    pub fn token_index_at(&self, offset: usize) -> Option<usize> {
        let index = self.tokens.partition_point(|token| token.end_offset <= offset);
        (index < self.tokens.len()).then_some(index)
    }

    /// Token index range covering the char range.
    pub fn token_range(&self, range: Range<usize>) -> Range<usize> {
        let start = self.tokens.partition_point(|token| token.end_offset <= range.start);
        let end = self.tokens.partition_point(|token| token.start_offset < range.end);
        start..end.max(start)
    }

    /// Transcript sentence containing `offset` (the last one for offsets past the end).
    pub fn sentence_index_at(&self, offset: usize) -> usize {
        self.sentences
            .partition_point(|sentence| sentence.start <= offset)
            .saturating_sub(1)
    }

    /// Start offset of transcript sentence `index`, or the text length past the end.
    pub fn sentence_start(&self, index: usize) -> usize {
        self.sentences
            .get(index)
            .map(|sentence| sentence.start)
            .unwrap_or(self.chars.len())
    }

    /// Start of the first transcript sentence beginning strictly after `offset`.
    pub fn next_sentence_start(&self, offset: usize) -> usize {
        let index = self.sentences.partition_point(|sentence| sentence.start <= offset);
        self.sentence_start(index)
    }

    /// Smallest sentence start at or after `offset`.
    pub fn sentence_start_at_or_after(&self, offset: usize) -> usize {
        let index = self.sentences.partition_point(|sentence| sentence.start < offset);
        self.sentence_start(index)
    }

    pub fn file_token_range(&self, audio_file: usize) -> Range<usize> {
        let start = self.tokens.partition_point(|token| token.audio_file < audio_file);
        let end = self.tokens.partition_point(|token| token.audio_file <= audio_file);
        start..end
    }

    pub fn file_duration(&self, audio_file: usize) -> f64 {
        self.audio_files
            .get(audio_file)
            .map(AudioFile::duration)
            .unwrap_or(0.0)
    }

    /// Position of a file-relative time on the whole-book timeline.
    pub fn global_time(&self, audio_file: usize, time: f64) -> f64 {
        self.audio_files
            .get(audio_file)
            .map(|file| file.start + time)
            .unwrap_or(time)
    }

    /// Audio file containing a whole-book time, with the file-relative time.
    pub fn locate_global(&self, time: f64) -> (usize, f64) {
        let index = self
            .audio_files
            .partition_point(|file| file.start <= time)
            .saturating_sub(1);
        match self.audio_files.get(index) {
            Some(file) => (index, (time - file.start).clamp(0.0, file.duration())),
            None => (0, time.max(0.0)),
        }
    }

    pub fn segment_of(&self, token_index: usize) -> Option<&SegmentInfo> {
        self.tokens
            .get(token_index)
            .and_then(|token| self.segments.get(token.segment))
    }
}

fn validate_audio_files(audio_files: &[AudioFile]) -> Result<(), AlignmentError> {
    for (index, file) in audio_files.iter().enumerate() {
        if !(file.start.is_finite() && file.end.is_finite()) || file.end < file.start {
            return Err(AlignmentError::invalid_input(format!(
                "audio file {index} ({}) has an invalid range {}..{}",
                file.id, file.start, file.end
            )));
        }
    }
    for (index, pair) in audio_files.windows(2).enumerate() {
        if pair[1].start < pair[0].end {
            return Err(AlignmentError::invalid_input(format!(
                "audio files {} and {} overlap or are out of order",
                index,
                index + 1
            )));
        }
    }
    Ok(())
}

fn detect_spacing<'a>(texts: impl Iterator<Item = &'a str>) -> Spacing {
    let leading_space = texts.skip(1).any(|text| text.starts_with(char::is_whitespace));
    if leading_space {
        Spacing::Subword
    } else {
        Spacing::Word
    }
}

fn split_sentences(
    tokens: &[TranscriptToken],
    segments: &[SegmentInfo],
    text_len: usize,
) -> Vec<Range<usize>> {
    let mut starts: Vec<usize> = Vec::new();
    let mut new_sentence = true;
    let mut segment = usize::MAX;
    for token in tokens {
        if token.segment != segment {
            segment = token.segment;
            new_sentence = true;
        }
        if new_sentence && token.kind != TokenKind::Punctuation {
            if starts.last() != Some(&token.start_offset) {
                starts.push(token.start_offset);
            }
            new_sentence = false;
        }
        if token.text.ends_with(is_sentence_terminal) {
            new_sentence = true;
        }
    }
    debug_assert!(segments.is_empty() || !starts.is_empty());
    if starts.is_empty() && text_len > 0 {
        starts.push(0);
    }
    if let Some(first) = starts.first_mut() {
        *first = 0;
    }
    let mut sentences = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text_len);
        sentences.push(start..end);
    }
    sentences
}
