use crate::config::WordAlignConfig;
use crate::types::{PhraseGroup, TranscriptToken, WordTiming};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlignmentStage {
    LocateChapters,
    RetryChapters,
    RefineChapters,
    AlignWords,
}

impl AlignmentStage {
    pub const ALL: [AlignmentStage; 4] = [
        AlignmentStage::LocateChapters,
        AlignmentStage::RetryChapters,
        AlignmentStage::RefineChapters,
        AlignmentStage::AlignWords,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AlignmentStage::LocateChapters => "locate",
            AlignmentStage::RetryChapters => "retry",
            AlignmentStage::RefineChapters => "refine",
            AlignmentStage::AlignWords => "words",
        }
    }
}

/// Called synchronously from whichever worker finished a unit of work.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, stage: AlignmentStage, delta: usize, total: usize);
}

/// Voice-length proxy used to share time among sentences and words.
pub trait SpokenLengthEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> f32;
}

/// Merges a sentence's timed words into highlight groups.
pub trait WordGrouper: Send + Sync {
    fn group_words(
        &self,
        words: &[WordTiming],
        tokens: &[TranscriptToken],
        config: &WordAlignConfig,
    ) -> Vec<PhraseGroup>;
}
