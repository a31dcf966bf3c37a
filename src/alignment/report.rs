use std::cmp::Ordering;

use serde::Serialize;

use crate::error::AlignmentError;
use crate::types::{
    BookAlignment, ChapterAlignment, ChapterKind, MatchKind, SentenceMatch, WordAlignment,
};

pub const REPORT_SCHEMA_VERSION: u32 = 1;

const OUTLIER_TOP_N: usize = 20;
const EPS_SECS: f64 = 0.001;

#[derive(Debug, Clone, Serialize)]
pub struct AlignmentReport {
    pub schema_version: u32,
    pub meta: ReportMeta,
    pub chapters: Vec<ChapterReport>,
    pub aggregates: AggregateReport,
}

/// Run description filled in by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMeta {
    pub generated_at: String,
    pub audio_file_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granularity: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchCounts {
    pub exact: u32,
    pub trimmed_leading: u32,
    pub ignoring_ends_punctuation: u32,
    pub ignoring_all_punctuation: u32,
    pub nearest: u32,
    pub interpolated: u32,
    pub recoverable: u32,
    pub skipped: u32,
    pub dropped: u32,
    pub rebuilt: u32,
    pub shared_timestamp: u32,
}

impl MatchCounts {
    fn record(&mut self, sentence: &SentenceMatch) {
        let slot = match sentence.kind {
            MatchKind::Exact => &mut self.exact,
            MatchKind::TrimmedLeading => &mut self.trimmed_leading,
            MatchKind::IgnoringEndsPunctuation => &mut self.ignoring_ends_punctuation,
            MatchKind::IgnoringAllPunctuation => &mut self.ignoring_all_punctuation,
            MatchKind::Nearest => &mut self.nearest,
            MatchKind::Interpolated => &mut self.interpolated,
            MatchKind::Recoverable => &mut self.recoverable,
        };
        *slot += 1;
        if sentence.rebuilt {
            self.rebuilt += 1;
        }
        if sentence.shared_timestamp {
            self.shared_timestamp += 1;
        }
    }

    fn add(&mut self, other: &MatchCounts) {
        self.exact += other.exact;
        self.trimmed_leading += other.trimmed_leading;
        self.ignoring_ends_punctuation += other.ignoring_ends_punctuation;
        self.ignoring_all_punctuation += other.ignoring_all_punctuation;
        self.nearest += other.nearest;
        self.interpolated += other.interpolated;
        self.recoverable += other.recoverable;
        self.skipped += other.skipped;
        self.dropped += other.dropped;
        self.rebuilt += other.rebuilt;
        self.shared_timestamp += other.shared_timestamp;
    }

    /// Sentences found in the transcript text by any matcher stage.
    pub fn text_matched(&self) -> u32 {
        self.exact
            + self.trimmed_leading
            + self.ignoring_ends_punctuation
            + self.ignoring_all_punctuation
            + self.nearest
    }

    pub fn count(&self, kind: MatchKind) -> u32 {
        match kind {
            MatchKind::Exact => self.exact,
            MatchKind::TrimmedLeading => self.trimmed_leading,
            MatchKind::IgnoringEndsPunctuation => self.ignoring_ends_punctuation,
            MatchKind::IgnoringAllPunctuation => self.ignoring_all_punctuation,
            MatchKind::Nearest => self.nearest,
            MatchKind::Interpolated => self.interpolated,
            MatchKind::Recoverable => self.recoverable,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructuralMetrics {
    pub overlap_count: u32,
    pub gap_count: u32,
    pub non_monotonic_count: u32,
    pub zero_length_count: u32,
    pub negative_duration_count: u32,
    pub gap_secs: f32,
    pub overlap_secs: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct WordLevelMetrics {
    pub word_count: u32,
    pub group_count: u32,
    pub anchored_word_count: u32,
    pub interpolated_word_count: u32,
    pub mean_group_secs: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChapterReport {
    pub spine_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub kind: ChapterKind,
    pub sentence_count: u32,
    pub is_missing_chapter: bool,
    pub counts: MatchCounts,
    pub structural: StructuralMetrics,
    /// Share of countable sentences backed by real transcript text.
    pub coverage: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secs_per_word: Option<MetricDistribution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words: Option<WordLevelMetrics>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    pub counts: AggregateCounts,
    pub match_counts: MatchCounts,
    pub alignment_score: f32,
    pub global: AggregateMetrics,
    pub outliers: OutlierReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateCounts {
    pub chapters: u32,
    pub sentences: u32,
    pub missing_chapters: u32,
    pub missing_body_chapters: u32,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct AggregateMetrics {
    pub chapter_coverage: Option<MetricDistribution>,
    pub chapter_secs_per_word_p50: Option<MetricDistribution>,
    pub gap_secs: Option<MetricDistribution>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricDistribution {
    pub mean: f32,
    pub p50: f32,
    pub p90: f32,
    pub p95: f32,
    pub p99: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutlierReport {
    pub worst_coverage: Vec<OutlierEntry>,
    pub largest_gap_secs: Vec<OutlierEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutlierEntry {
    pub spine_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub value: f32,
}

fn word_count(text: &str) -> usize {
    text.split_whitespace()
        .filter(|word| word.chars().any(char::is_alphanumeric))
        .count()
}

pub fn compute_chapter_report(
    chapter: &ChapterAlignment,
    words: Option<&[WordAlignment]>,
) -> Result<ChapterReport, AlignmentError> {
    let mut notes = Vec::new();
    let mut counts = MatchCounts::default();
    for sentence in &chapter.sentences {
        counts.record(sentence);
    }
    counts.skipped = to_u32(chapter.skipped.len());
    counts.dropped = to_u32(chapter.dropped.len());

    if chapter.is_missing_chapter {
        notes.push("missing_chapter".to_string());
    }
    let resolved = chapter.sentences.len() + chapter.skipped.len() + chapter.dropped.len();
    if resolved < chapter.sentence_count && !chapter.is_missing_chapter {
        notes.push(format!(
            "unresolved_sentences={}",
            chapter.sentence_count - resolved
        ));
    }
    let cross_file = chapter
        .sentences
        .windows(2)
        .filter(|pair| pair[0].span.audio_file != pair[1].span.audio_file)
        .count();
    if cross_file > 0 {
        notes.push(format!("audio_file_changes={cross_file}"));
    }

    let countable = chapter.sentence_count.saturating_sub(chapter.dropped.len());
    let backed = counts.text_matched() + counts.recoverable;
    let coverage = if countable == 0 {
        0.0
    } else {
        f64::from(backed) / countable as f64
    };

    let pace: Vec<f64> = chapter
        .sentences
        .iter()
        .filter(|sentence| sentence.kind.is_text_match())
        .filter_map(|sentence| {
            let n = word_count(&sentence.text);
            (n > 0).then(|| sentence.span.duration() / n as f64)
        })
        .collect();

    Ok(ChapterReport {
        spine_index: chapter.spine_index,
        title: chapter.title.clone(),
        kind: chapter.kind,
        sentence_count: to_u32(chapter.sentence_count),
        is_missing_chapter: chapter.is_missing_chapter,
        counts,
        structural: compute_structural_metrics(&chapter.sentences)?,
        coverage: checked_f32(coverage, "chapter.coverage")?,
        secs_per_word: distribution_or_none(&pace),
        words: words.map(compute_word_metrics).transpose()?,
        notes,
    })
}

pub fn aggregate_reports(chapters: &[ChapterReport]) -> AggregateReport {
    let mut match_counts = MatchCounts::default();
    for chapter in chapters {
        match_counts.add(&chapter.counts);
    }
    let sentences: u32 = chapters.iter().map(|c| c.sentence_count).sum();
    let countable = sentences.saturating_sub(match_counts.dropped);
    let backed = match_counts.text_matched() + match_counts.recoverable;
    let alignment_score = if countable == 0 {
        0.0
    } else {
        backed as f32 / countable as f32
    };

    let located: Vec<&ChapterReport> = chapters.iter().filter(|c| !c.is_missing_chapter).collect();
    let coverage: Vec<f64> = located.iter().map(|c| f64::from(c.coverage)).collect();
    let pace: Vec<f64> = located
        .iter()
        .filter_map(|c| c.secs_per_word.as_ref().map(|d| f64::from(d.p50)))
        .collect();
    let gaps: Vec<f64> = located
        .iter()
        .map(|c| f64::from(c.structural.gap_secs))
        .collect();

    AggregateReport {
        counts: AggregateCounts {
            chapters: to_u32(chapters.len()),
            sentences,
            missing_chapters: to_u32(chapters.iter().filter(|c| c.is_missing_chapter).count()),
            missing_body_chapters: to_u32(
                chapters
                    .iter()
                    .filter(|c| c.is_missing_chapter && c.kind == ChapterKind::Body)
                    .count(),
            ),
        },
        match_counts,
        alignment_score,
        global: AggregateMetrics {
            chapter_coverage: distribution_or_none(&coverage),
            chapter_secs_per_word_p50: distribution_or_none(&pace),
            gap_secs: distribution_or_none(&gaps),
        },
        outliers: OutlierReport {
            // Lowest coverage first.
            worst_coverage: ranked_outliers(&located, OUTLIER_TOP_N, |c| {
                Some(-f64::from(c.coverage))
            })
            .into_iter()
            .map(|mut entry| {
                entry.value = -entry.value;
                entry
            })
            .collect(),
            largest_gap_secs: ranked_outliers(&located, OUTLIER_TOP_N, |c| {
                Some(f64::from(c.structural.gap_secs))
            }),
        },
    }
}

/// Per-chapter reports plus aggregates for a whole book.
pub fn build_report(
    book: &BookAlignment,
    words: Option<&[Vec<WordAlignment>]>,
    meta: ReportMeta,
) -> Result<AlignmentReport, AlignmentError> {
    let chapters = book
        .chapters
        .iter()
        .enumerate()
        .map(|(i, chapter)| {
            let chapter_words = words.and_then(|all| all.get(i)).map(Vec::as_slice);
            compute_chapter_report(chapter, chapter_words)
        })
        .collect::<Result<Vec<_>, _>>()?;
    let aggregates = aggregate_reports(&chapters);
    Ok(AlignmentReport {
        schema_version: REPORT_SCHEMA_VERSION,
        meta,
        chapters,
        aggregates,
    })
}

fn compute_structural_metrics(
    sentences: &[SentenceMatch],
) -> Result<StructuralMetrics, AlignmentError> {
    let negative_duration_count = sentences
        .iter()
        .filter(|s| s.span.end < s.span.start)
        .count();
    let zero_length_count = sentences
        .iter()
        .filter(|s| (s.span.end - s.span.start).abs() < EPS_SECS)
        .count();

    let mut overlap_count = 0usize;
    let mut gap_count = 0usize;
    let mut non_monotonic_count = 0usize;
    let mut gap_secs = 0.0;
    let mut overlap_secs = 0.0;

    for pair in sentences.windows(2) {
        let (current, next) = (&pair[0].span, &pair[1].span);
        if current.audio_file != next.audio_file {
            continue;
        }
        if current.end > next.start + EPS_SECS {
            overlap_count += 1;
            overlap_secs += current.end - next.start;
        } else if next.start > current.end + EPS_SECS {
            gap_count += 1;
            gap_secs += next.start - current.end;
        }
        if current.start > next.start {
            non_monotonic_count += 1;
        }
    }

    Ok(StructuralMetrics {
        overlap_count: to_u32(overlap_count),
        gap_count: to_u32(gap_count),
        non_monotonic_count: to_u32(non_monotonic_count),
        zero_length_count: to_u32(zero_length_count),
        negative_duration_count: to_u32(negative_duration_count),
        gap_secs: checked_f32(gap_secs, "structural.gap_secs")?,
        overlap_secs: checked_f32(overlap_secs, "structural.overlap_secs")?,
    })
}

fn compute_word_metrics(words: &[WordAlignment]) -> Result<WordLevelMetrics, AlignmentError> {
    let word_count: usize = words.iter().map(|w| w.words.len()).sum();
    let group_count: usize = words.iter().map(|w| w.groups.len()).sum();
    let anchored: usize = words
        .iter()
        .flat_map(|w| w.anchors.iter())
        .map(|a| a.word_count)
        .sum();
    let interpolated = words
        .iter()
        .flat_map(|w| w.words.iter())
        .filter(|w| w.interpolated)
        .count();
    let group_secs: Vec<f64> = words
        .iter()
        .flat_map(|w| w.groups.iter())
        .map(|g| g.duration())
        .collect();
    Ok(WordLevelMetrics {
        word_count: to_u32(word_count),
        group_count: to_u32(group_count),
        anchored_word_count: to_u32(anchored),
        interpolated_word_count: to_u32(interpolated),
        mean_group_secs: checked_f32(mean(&group_secs), "words.mean_group_secs")?,
    })
}

fn ranked_outliers(
    chapters: &[&ChapterReport],
    top_n: usize,
    metric: impl Fn(&ChapterReport) -> Option<f64>,
) -> Vec<OutlierEntry> {
    let mut entries: Vec<OutlierEntry> = chapters
        .iter()
        .filter_map(|chapter| {
            metric(chapter).map(|value| OutlierEntry {
                spine_index: chapter.spine_index,
                title: chapter.title.clone(),
                value: value as f32,
            })
        })
        .collect();

    entries.sort_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.spine_index.cmp(&b.spine_index))
    });
    entries.truncate(top_n);
    entries
}

fn distribution_or_none(values: &[f64]) -> Option<MetricDistribution> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    Some(MetricDistribution {
        mean: checked_f32(mean(&sorted), "aggregate.mean").ok()?,
        p50: checked_f32(percentile_sorted(&sorted, 0.5), "aggregate.p50").ok()?,
        p90: checked_f32(percentile_sorted(&sorted, 0.9), "aggregate.p90").ok()?,
        p95: checked_f32(percentile_sorted(&sorted, 0.95), "aggregate.p95").ok()?,
        p99: checked_f32(percentile_sorted(&sorted, 0.99), "aggregate.p99").ok()?,
    })
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn percentile_sorted(sorted_values: &[f64], percentile: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }
    if sorted_values.len() == 1 {
        return sorted_values[0];
    }

    let clamped = percentile.clamp(0.0, 1.0);
    let max_index = (sorted_values.len() - 1) as f64;
    let rank = clamped * max_index;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted_values[lower]
    } else {
        let weight = rank - lower as f64;
        sorted_values[lower] * (1.0 - weight) + sorted_values[upper] * weight
    }
}

fn to_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn checked_f32(value: f64, metric_name: &str) -> Result<f32, AlignmentError> {
    if !value.is_finite() {
        return Err(AlignmentError::invalid_input(format!(
            "metric '{metric_name}' produced non-finite value: {value}"
        )));
    }
    if value < f32::MIN as f64 || value > f32::MAX as f64 {
        return Err(AlignmentError::invalid_input(format!(
            "metric '{metric_name}' out of f32 range: {value}"
        )));
    }
    Ok(value as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SentenceSpan, SkippedSentence};

    fn matched(index: usize, kind: MatchKind, start: f64, end: f64) -> SentenceMatch {
        SentenceMatch {
            sentence_index: index,
            text: "call me ishmael".to_string(),
            span: SentenceSpan {
                start,
                end,
                audio_file: 0,
                tokens: Vec::new(),
            },
            matched_text: String::new(),
            kind,
            shared_timestamp: false,
            rebuilt: false,
        }
    }

    fn chapter(spine_index: usize, sentences: Vec<SentenceMatch>) -> ChapterAlignment {
        ChapterAlignment {
            spine_index,
            title: Some(format!("Chapter {spine_index}")),
            kind: ChapterKind::Body,
            sentence_count: sentences.len(),
            sentences,
            skipped: Vec::new(),
            dropped: Vec::new(),
            is_missing_chapter: false,
            transcript_range: None,
        }
    }

    #[test]
    fn chapter_report_counts_kinds_and_structure() {
        let mut c = chapter(
            0,
            vec![
                matched(0, MatchKind::Exact, 0.0, 0.9),
                matched(1, MatchKind::Interpolated, 0.9, 1.5),
                matched(2, MatchKind::Nearest, 2.0, 2.9),
                matched(3, MatchKind::Recoverable, 2.8, 3.0),
            ],
        );
        c.sentence_count = 5;
        c.dropped = vec![4];

        let report = compute_chapter_report(&c, None).expect("report");
        assert_eq!(report.counts.exact, 1);
        assert_eq!(report.counts.nearest, 1);
        assert_eq!(report.counts.interpolated, 1);
        assert_eq!(report.counts.recoverable, 1);
        assert_eq!(report.counts.dropped, 1);
        assert_eq!(report.structural.gap_count, 1);
        assert_eq!(report.structural.overlap_count, 1);
        assert!((report.structural.gap_secs - 0.5).abs() < 1e-6);
        // Three of four countable sentences are backed by transcript text.
        assert!((report.coverage - 0.75).abs() < 1e-6);
        let pace = report.secs_per_word.expect("pace");
        assert!((pace.p50 - 0.3).abs() < 1e-6);
    }

    #[test]
    fn aggregate_counts_missing_body_chapters() {
        let located = chapter(0, vec![matched(0, MatchKind::Exact, 0.0, 0.9)]);
        let mut missing = chapter(1, Vec::new());
        missing.sentence_count = 2;
        missing.is_missing_chapter = true;
        missing.skipped = vec![
            SkippedSentence {
                sentence_index: 0,
                text: "a".to_string(),
            },
            SkippedSentence {
                sentence_index: 1,
                text: "b".to_string(),
            },
        ];
        let mut front = missing.clone();
        front.spine_index = 2;
        front.kind = ChapterKind::FrontMatter;

        let book = BookAlignment {
            chapters: vec![located, missing, front],
        };
        let report = build_report(
            &book,
            None,
            ReportMeta {
                generated_at: "2026-01-01T00:00:00Z".to_string(),
                audio_file_count: 1,
                granularity: None,
            },
        )
        .expect("report");

        let aggregates = &report.aggregates;
        assert_eq!(aggregates.counts.chapters, 3);
        assert_eq!(aggregates.counts.missing_chapters, 2);
        assert_eq!(aggregates.counts.missing_body_chapters, 1);
        assert_eq!(aggregates.match_counts.skipped, 4);
        assert!((aggregates.alignment_score - 0.2).abs() < 1e-6);
        assert_eq!(aggregates.outliers.worst_coverage.len(), 1);
        assert!(report.chapters[1].notes.contains(&"missing_chapter".to_string()));
    }

    #[test]
    fn percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile_sorted(&values, 0.5) - 2.5).abs() < 1e-9);
        assert_eq!(percentile_sorted(&[7.0], 0.9), 7.0);
    }

    #[test]
    fn non_finite_metric_is_rejected() {
        assert!(checked_f32(f64::NAN, "x").is_err());
        assert!(checked_f32(1.5, "x").is_ok());
    }
}
