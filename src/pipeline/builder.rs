use std::path::Path;

use crate::config::AlignerConfig;
use crate::error::AlignmentError;
use crate::pipeline::defaults::{CharWeightEstimator, DefaultWordGrouper, NoopProgress};
use crate::pipeline::runtime::{BookAligner, BookAlignerParts};
use crate::pipeline::traits::{ProgressObserver, SpokenLengthEstimator, WordGrouper};

pub struct BookAlignerBuilder {
    config: AlignerConfig,
    progress: Option<Box<dyn ProgressObserver>>,
    spoken_length: Option<Box<dyn SpokenLengthEstimator>>,
    word_grouper: Option<Box<dyn WordGrouper>>,
}

impl BookAlignerBuilder {
    pub fn new(config: AlignerConfig) -> Self {
        Self {
            config,
            progress: None,
            spoken_length: None,
            word_grouper: None,
        }
    }

    /// Builder over a JSON config file; missing fields keep their defaults.
    pub fn from_config_file(path: &Path) -> Result<Self, AlignmentError> {
        Ok(Self::new(AlignerConfig::load(path)?))
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressObserver>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_spoken_length_estimator(
        mut self,
        spoken_length: Box<dyn SpokenLengthEstimator>,
    ) -> Self {
        self.spoken_length = Some(spoken_length);
        self
    }

    pub fn with_word_grouper(mut self, word_grouper: Box<dyn WordGrouper>) -> Self {
        self.word_grouper = Some(word_grouper);
        self
    }

    pub fn build(self) -> Result<BookAligner, AlignmentError> {
        self.config.validate()?;

        let execution = &self.config.execution;
        let pool = if execution.low_resource {
            None
        } else {
            let threads = execution.max_parallel_chapters.unwrap_or(0);
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("readalong-chapter-{i}"))
                .build()
                .map_err(|e| AlignmentError::runtime("build chapter thread pool", e))?;
            tracing::debug!(
                threads = pool.current_num_threads(),
                "aligner: chapter pool ready"
            );
            Some(pool)
        };

        Ok(BookAligner::from_parts(BookAlignerParts {
            config: self.config,
            pool,
            progress: self.progress.unwrap_or_else(|| Box::new(NoopProgress)),
            spoken_length: self
                .spoken_length
                .unwrap_or_else(|| Box::new(CharWeightEstimator)),
            word_grouper: self
                .word_grouper
                .unwrap_or_else(|| Box::new(DefaultWordGrouper)),
        }))
    }
}
