use crate::alignment::spoken_length;
use crate::alignment::words::group_words;
use crate::config::WordAlignConfig;
use crate::pipeline::traits::{AlignmentStage, ProgressObserver, SpokenLengthEstimator, WordGrouper};
use crate::types::{PhraseGroup, TranscriptToken, WordTiming};

pub struct NoopProgress;

impl ProgressObserver for NoopProgress {
    fn on_progress(&self, _stage: AlignmentStage, _delta: usize, _total: usize) {}
}

pub struct CharWeightEstimator;

impl SpokenLengthEstimator for CharWeightEstimator {
    fn estimate(&self, text: &str) -> f32 {
        spoken_length::estimate(text)
    }
}

/// Groups by `config.granularity`.
pub struct DefaultWordGrouper;

impl WordGrouper for DefaultWordGrouper {
    fn group_words(
        &self,
        words: &[WordTiming],
        tokens: &[TranscriptToken],
        config: &WordAlignConfig,
    ) -> Vec<PhraseGroup> {
        group_words(words, tokens, config)
    }
}
