use crate::alignment::normalize::normalize;
use crate::config::{Granularity, WordAlignConfig};
use crate::pipeline::traits::{SpokenLengthEstimator, WordGrouper};
use crate::types::{
    ChapterAlignment, PhraseGroup, SentenceMatch, TranscriptToken, WordAlignment, WordTiming,
};

mod anchors;
mod gap_fill;
mod phrases;
#[cfg(test)]
mod tests;

/// Comparison key for a word or token: lowercase alphanumerics only.
pub(crate) fn word_key(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Book words of a sentence, after number spelling so they line up with
/// the normalized transcript.
pub fn sentence_words(text: &str) -> Vec<String> {
    normalize(text)
        .text
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Merge timed words into highlight groups at the configured granularity.
pub fn group_words(
    words: &[WordTiming],
    tokens: &[TranscriptToken],
    config: &WordAlignConfig,
) -> Vec<PhraseGroup> {
    if words.is_empty() {
        return Vec::new();
    }
    match config.granularity {
        Granularity::Word => (0..words.len())
            .map(|i| phrases::make_group(words, tokens, i..i + 1))
            .collect(),
        Granularity::Segment => phrases::by_segment(words, tokens),
        Granularity::Phrase => phrases::by_phrase(words, tokens, config),
    }
}

/// Sub-sentence aligner: anchors book words on the span's tokens, fills
/// the rest and groups the result.
pub struct WordAligner<'a> {
    config: &'a WordAlignConfig,
    estimator: &'a dyn SpokenLengthEstimator,
    grouper: &'a dyn WordGrouper,
}

impl<'a> WordAligner<'a> {
    pub fn new(
        config: &'a WordAlignConfig,
        estimator: &'a dyn SpokenLengthEstimator,
        grouper: &'a dyn WordGrouper,
    ) -> Self {
        Self {
            config,
            estimator,
            grouper,
        }
    }

    pub fn align_chapter(&self, chapter: &ChapterAlignment) -> Vec<WordAlignment> {
        chapter
            .sentences
            .iter()
            .map(|sentence| self.align_sentence(sentence))
            .collect()
    }

    pub fn align_sentence(&self, sentence: &SentenceMatch) -> WordAlignment {
        let words = sentence_words(&sentence.text);
        let tokens = &sentence.span.tokens;
        let word_keys: Vec<String> = words.iter().map(|w| word_key(w)).collect();
        let token_keys: Vec<String> = tokens
            .iter()
            .map(|t| if t.is_real() { word_key(&t.text) } else { String::new() })
            .collect();

        let anchors = anchors::build_anchors(&word_keys, &token_keys, self.config);
        let timings = gap_fill::fill(
            &words,
            tokens,
            &anchors,
            &sentence.span,
            sentence.rebuilt,
            self.estimator,
        );
        let groups = self.grouper.group_words(&timings, tokens, self.config);

        tracing::debug!(
            sentence_index = sentence.sentence_index,
            words = timings.len(),
            anchors = anchors.len(),
            groups = groups.len(),
            "words: aligned sentence"
        );

        WordAlignment {
            sentence_index: sentence.sentence_index,
            audio_file: sentence.span.audio_file,
            words: timings,
            anchors,
            groups,
        }
    }
}
