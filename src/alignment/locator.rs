use std::ops::Range;
use std::sync::Mutex;

use crate::alignment::fuzzy;
use crate::alignment::transcript::Transcript;
use crate::config::{IndexConfig, LocatorConfig};

/// Transcript char range a chapter has resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimedRange {
    pub start: usize,
    pub end: usize,
}

/// Per-chapter claimed transcript ranges, keyed by chapter position in spine order.
///
/// Readers may race with writers from other chapters; they see either the
/// old or the new claim, and the sequential retry pass converges.
#[derive(Debug)]
pub struct UsedOffsets {
    claims: Mutex<Vec<Option<ClaimedRange>>>,
}

impl UsedOffsets {
    pub fn new(chapters: usize) -> Self {
        Self {
            claims: Mutex::new(vec![None; chapters]),
        }
    }

    fn with_claims<T>(&self, f: impl FnOnce(&mut Vec<Option<ClaimedRange>>) -> T) -> T {
        let mut claims = self
            .claims
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut claims)
    }

    /// End of the nearest claimed chapter before `position`, or 0.
    pub fn starts_after(&self, position: usize) -> usize {
        self.with_claims(|claims| {
            claims[..position.min(claims.len())]
                .iter()
                .rev()
                .flatten()
                .map(|claim| claim.end)
                .next()
                .unwrap_or(0)
        })
    }

    /// Start of the nearest claimed chapter after `position`, or `text_len`.
    pub fn ends_before(&self, position: usize, text_len: usize) -> usize {
        self.with_claims(|claims| {
            claims
                .iter()
                .skip(position + 1)
                .flatten()
                .map(|claim| claim.start)
                .next()
                .unwrap_or(text_len)
        })
    }

    /// Exclusion window `[starts_after, ends_before)` for a chapter.
    pub fn bounds(&self, position: usize, text_len: usize) -> Range<usize> {
        let start = self.starts_after(position);
        let end = self.ends_before(position, text_len);
        start..end.max(start)
    }

    pub fn claim(&self, position: usize, range: ClaimedRange) {
        self.with_claims(|claims| {
            if let Some(slot) = claims.get_mut(position) {
                *slot = Some(range);
            }
        });
    }

    pub fn get(&self, position: usize) -> Option<ClaimedRange> {
        self.with_claims(|claims| claims.get(position).copied().flatten())
    }
}

/// Where a chapter starts: the first confidently matched chapter sentence and
/// its transcript offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterLocation {
    pub sentence_index: usize,
    pub offset: usize,
    pub distance: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateStrategy {
    /// N-gram candidates, then a narrow scan around the best hit.
    Indexed,
    /// Sliding window over the whole exclusion range.
    Scan,
}

impl LocateStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            LocateStrategy::Indexed => "indexed",
            LocateStrategy::Scan => "scan",
        }
    }
}

/// Query chunk: consecutive matchable chapter sentences joined by spaces.
struct Chunk {
    sentence_index: usize,
    chars: Vec<char>,
}

pub struct ChapterLocator<'a> {
    transcript: &'a Transcript,
    config: &'a LocatorConfig,
    index_config: &'a IndexConfig,
}

impl<'a> ChapterLocator<'a> {
    pub fn new(
        transcript: &'a Transcript,
        config: &'a LocatorConfig,
        index_config: &'a IndexConfig,
    ) -> Self {
        Self {
            transcript,
            config,
            index_config,
        }
    }

    /// Indexed for long transcripts, scan otherwise.
    pub fn default_strategy(&self) -> LocateStrategy {
        if self.transcript.char_len() > self.index_config.indexed_threshold_chars {
            LocateStrategy::Indexed
        } else {
            LocateStrategy::Scan
        }
    }

    /// Find where the chapter with matching-form sentences `forms` begins inside `bounds`.
    pub fn locate(
        &self,
        forms: &[String],
        bounds: Range<usize>,
        strategy: LocateStrategy,
    ) -> Option<ChapterLocation> {
        let bounds = bounds.start..bounds.end.min(self.transcript.char_len());
        if bounds.is_empty() {
            return None;
        }
        let found = match strategy {
            LocateStrategy::Indexed => self
                .locate_indexed(forms, bounds.clone())
                .or_else(|| self.locate_scan(forms, bounds.clone())),
            LocateStrategy::Scan => self.locate_scan(forms, bounds.clone()),
        };
        match found {
            Some(location) => tracing::debug!(
                strategy = strategy.as_str(),
                sentence_index = location.sentence_index,
                offset = location.offset,
                distance = location.distance,
                "locator: chapter located"
            ),
            None => tracing::debug!(
                strategy = strategy.as_str(),
                bounds_start = bounds.start,
                bounds_end = bounds.end,
                "locator: no candidate cleared threshold"
            ),
        }
        found
    }

    /// Up to `size` consecutive non-empty forms starting at `start`.
    fn chunk_at(&self, forms: &[String], start: usize, size: usize) -> Option<Chunk> {
        let sentence_index = (start..forms.len()).find(|&i| !forms[i].is_empty())?;
        let text = forms[start..]
            .iter()
            .take(size)
            .filter(|form| !form.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        (!text.is_empty()).then(|| Chunk {
            sentence_index,
            chars: text.chars().collect(),
        })
    }

    /// Query chunks in two tiers. The first holds full-size chunks at the
    /// configured stride. The fallback holds shorter chunks from every
    /// sentence tried, earliest sentence first and longest first within
    /// it, so one unmatched sentence cannot hide a short chapter.
    fn chunk_tiers(&self, forms: &[String], limit: usize) -> [Vec<Chunk>; 2] {
        let size = self.config.chunk_sentences.max(1);
        let stride = self.config.stride_sentences.max(1);
        let reach = self.config.max_probe_sentences.max(1).min(forms.len());

        let full: Vec<Chunk> = (0..reach)
            .step_by(stride)
            .filter_map(|start| self.chunk_at(forms, start, size))
            .take(limit)
            .collect();

        let sizes: Vec<usize> = std::iter::successors(Some(size / 2), |&s| (s > 1).then_some(s / 2))
            .filter(|&s| s > 0)
            .collect();
        let mut fallback: Vec<Chunk> = Vec::new();
        'starts: for start in 0..reach {
            for &shorter in &sizes {
                if fallback.len() >= self.config.fallback_max_chunks {
                    break 'starts;
                }
                let Some(chunk) = self.chunk_at(forms, start, shorter) else {
                    continue;
                };
                let seen = full.iter().chain(&fallback).any(|other| {
                    other.sentence_index == chunk.sentence_index && other.chars == chunk.chars
                });
                if !seen && chunk.chars.len() >= self.config.min_fallback_chunk_chars {
                    fallback.push(chunk);
                }
            }
        }
        [full, fallback]
    }

    fn max_distance(&self, len: usize) -> usize {
        let k = (len as f64 * self.config.max_distance_ratio).floor() as usize;
        k.min(len.saturating_sub(1))
    }

    fn fuzzy_in(&self, chunk: &Chunk, range: Range<usize>) -> Option<ChapterLocation> {
        let haystack = &self.transcript.chars()[range.clone()];
        let k = self.max_distance(chunk.chars.len());
        let found = fuzzy::find_best(&chunk.chars, haystack, k)?;
        Some(ChapterLocation {
            sentence_index: chunk.sentence_index,
            offset: self.snap_to_token_start(range.start + found.start),
            distance: found.distance,
        })
    }

    /// Fuzzy match anchored at `expected` chars into `range`.
    fn fuzzy_near(
        &self,
        chunk: &Chunk,
        range: Range<usize>,
        expected: usize,
    ) -> Option<ChapterLocation> {
        let haystack = &self.transcript.chars()[range.clone()];
        let k = self.max_distance(chunk.chars.len());
        let found = fuzzy::find_best_near(&chunk.chars, haystack, k, expected)?;
        Some(ChapterLocation {
            sentence_index: chunk.sentence_index,
            offset: self.snap_to_token_start(range.start + found.start),
            distance: found.distance,
        })
    }

    fn snap_to_token_start(&self, offset: usize) -> usize {
        match self.transcript.token_index_at(offset) {
            Some(index) => {
                let token = &self.transcript.tokens()[index];
                if token.start_offset <= offset {
                    token.start_offset
                } else {
                    offset
                }
            }
            None => offset,
        }
    }

    fn locate_scan(&self, forms: &[String], bounds: Range<usize>) -> Option<ChapterLocation> {
        let tiers = self.chunk_tiers(forms, self.config.scan_max_chunks);
        tiers
            .iter()
            .find_map(|chunks| self.scan_chunks(chunks, bounds.clone()))
    }

    /// Slide a window over `bounds`; the first chunk that matches inside the
    /// earliest window wins.
    fn scan_chunks(&self, chunks: &[Chunk], bounds: Range<usize>) -> Option<ChapterLocation> {
        let longest = chunks.iter().map(|c| c.chars.len()).max()?;
        let window = self.config.scan_window_chars.max(longest);
        let advance = window.saturating_sub(longest).max(window / 2).max(1);

        let mut pos = bounds.start;
        loop {
            let end = (pos + window).min(bounds.end);
            for chunk in chunks {
                if let Some(location) = self.fuzzy_in(chunk, pos..end) {
                    return Some(location);
                }
            }
            if end >= bounds.end {
                return None;
            }
            pos += advance;
        }
    }

    fn locate_indexed(&self, forms: &[String], bounds: Range<usize>) -> Option<ChapterLocation> {
        let index = self.transcript.ngram_index(self.index_config.ngram_size);
        let slack = self.config.candidate_slack_chars;

        for chunk in self.chunk_tiers(forms, usize::MAX).iter().flatten() {
            let text: String = chunk.chars.iter().collect();
            let span = chunk.chars.len();
            let mut last_kept: Option<usize> = None;
            let starts = index
                .chunk_starts(&text)
                .into_iter()
                .filter(|&start| start + span > bounds.start && start < bounds.end)
                .filter(|&start| {
                    let keep = last_kept.map_or(true, |kept| start - kept > span);
                    if keep {
                        last_kept = Some(start);
                    }
                    keep
                })
                .collect::<Vec<_>>();

            for start in starts {
                let from = start.saturating_sub(slack).max(bounds.start);
                let to = (start + span + slack).min(bounds.end);
                let Some(coarse) = self.fuzzy_near(chunk, from..to, start.saturating_sub(from))
                else {
                    continue;
                };
                return Some(self.refine(forms, coarse, &bounds));
            }
        }
        None
    }

    /// Re-run the scan within a few transcript sentences of a coarse hit.
    fn refine(
        &self,
        forms: &[String],
        coarse: ChapterLocation,
        bounds: &Range<usize>,
    ) -> ChapterLocation {
        let radius = self.config.refine_sentence_radius;
        let sentence = self.transcript.sentence_index_at(coarse.offset);
        let from = self
            .transcript
            .sentence_start(sentence.saturating_sub(radius))
            .max(bounds.start);
        let to = self
            .transcript
            .sentence_start(sentence + radius + 1)
            .min(bounds.end);
        if from >= to {
            return coarse;
        }
        match self.locate_scan(forms, from..to) {
            Some(precise) if precise.sentence_index <= coarse.sentence_index => precise,
            _ => coarse,
        }
    }
}
