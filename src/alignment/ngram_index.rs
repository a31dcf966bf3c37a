use std::collections::HashMap;

/// Word n-gram -> char offsets at which it begins in the transcript.
#[derive(Debug, Clone, Default)]
pub struct NgramIndex {
    ngram_size: usize,
    offsets: HashMap<String, Vec<usize>>,
}

impl NgramIndex {
    pub fn build(text: &str, ngram_size: usize) -> Self {
        let ngram_size = ngram_size.max(1);
        let words = index_words(text);
        let mut offsets: HashMap<String, Vec<usize>> = HashMap::new();
        for window in words.windows(ngram_size) {
            let key = join_key(window.iter().map(|(_, word)| word.as_str()));
            offsets.entry(key).or_default().push(window[0].0);
        }
        tracing::debug!(
            ngram_size,
            words = words.len(),
            keys = offsets.len(),
            "ngram_index: built"
        );
        Self {
            ngram_size,
            offsets,
        }
    }

    pub fn ngram_size(&self) -> usize {
        self.ngram_size
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Sorted union of transcript offsets for every n-gram inside `chunk`.
    ///
    /// Empty when the chunk has fewer words than the n-gram size; callers
    /// fall back to a scan.
    pub fn candidates(&self, chunk: &str) -> Vec<usize> {
        self.hits(chunk, |offset, _| Some(offset))
    }

    /// Where the whole chunk would begin for each n-gram hit: the transcript
    /// offset minus the n-gram's char offset inside `chunk`.
    pub fn chunk_starts(&self, chunk: &str) -> Vec<usize> {
        self.hits(chunk, |offset, in_chunk| offset.checked_sub(in_chunk))
    }

    fn hits(&self, chunk: &str, map: impl Fn(usize, usize) -> Option<usize>) -> Vec<usize> {
        let words = index_words(chunk);
        if words.len() < self.ngram_size {
            return Vec::new();
        }
        let mut found: Vec<usize> = words
            .windows(self.ngram_size)
            .filter_map(|window| {
                let key = join_key(window.iter().map(|(_, word)| word.as_str()));
                let in_chunk = window[0].0;
                self.offsets.get(&key).map(|offsets| {
                    offsets
                        .iter()
                        .filter_map(|&offset| map(offset, in_chunk))
                        .collect::<Vec<_>>()
                })
            })
            .flatten()
            .collect();
        found.sort_unstable();
        found.dedup();
        found
    }
}

fn join_key<'a>(words: impl Iterator<Item = &'a str>) -> String {
    words.collect::<Vec<_>>().join(" ")
}

/// Lower-cased words stripped of punctuation, with their starting char offset.
fn index_words(text: &str) -> Vec<(usize, String)> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut start = 0;
    for (offset, c) in text.chars().enumerate() {
        if c.is_whitespace() {
            if !current.is_empty() {
                words.push((start, std::mem::take(&mut current)));
            }
            continue;
        }
        if c.is_alphanumeric() {
            if current.is_empty() {
                start = offset;
            }
            current.extend(c.to_lowercase());
        }
    }
    if !current.is_empty() {
        words.push((start, current));
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "call me ishmael. some years ago, never mind how long precisely. call me ishmael again";

    #[test]
    fn candidates_return_sorted_offsets() {
        let index = NgramIndex::build(TEXT, 3);
        assert_eq!(index.candidates("Call me Ishmael."), vec![0, 64]);
        assert_eq!(index.ngram_size(), 3);
    }

    #[test]
    fn candidates_union_over_chunk_windows() {
        let index = NgramIndex::build(TEXT, 2);
        let found = index.candidates("years ago never");
        // "years ago" and "ago never" both start inside the first sentence.
        assert_eq!(found, vec![22, 28]);
    }

    #[test]
    fn chunk_starts_align_every_hit_to_the_chunk_start() {
        let index = NgramIndex::build(TEXT, 2);
        // Both n-grams of the chunk point back at the same start.
        assert_eq!(index.chunk_starts("years ago never"), vec![22]);
        assert_eq!(index.chunk_starts("call me ishmael"), vec![0, 64]);
    }

    #[test]
    fn short_chunk_yields_nothing() {
        let index = NgramIndex::build(TEXT, 5);
        assert!(index.candidates("call me").is_empty());
        assert!(!index.is_empty());
    }

    #[test]
    fn unknown_ngrams_yield_nothing() {
        let index = NgramIndex::build(TEXT, 2);
        assert!(index.candidates("white whale").is_empty());
    }
}
