pub mod alignment;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod types;

pub use alignment::report::{AlignmentReport, ReportMeta};
pub use config::{AlignerConfig, Granularity};
pub use error::AlignmentError;
pub use pipeline::builder::BookAlignerBuilder;
pub use pipeline::runtime::BookAligner;
pub use pipeline::traits::{AlignmentStage, ProgressObserver, SpokenLengthEstimator, WordGrouper};
pub use types::{
    AudioFile, BookAlignment, ChapterAlignment, ChapterKind, ChapterText, FileTranscription,
    MatchKind, SentenceMatch, WordAlignment,
};
