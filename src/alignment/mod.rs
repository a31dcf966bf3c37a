pub mod fuzzy;
pub mod locator;
pub mod ngram_index;
pub mod normalize;
pub mod refine;
pub mod report;
pub mod sentence_matcher;
pub mod spoken_length;
pub mod text_match;
pub mod transcript;
pub mod words;

#[cfg(test)]
pub(crate) mod test_support;
