//! Dropset: final candidate bitmap of a query
//!
//! One bit per record slot, packed `word_width` records per word in the same
//! order as the shard layers. Bits at or beyond `record_count` are padding
//! and never reported.

use crate::config::IndexConfig;

/// Candidate records of a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dropset {
    word_width: usize,
    word_mask: u64,
    record_count: usize,
    words: Vec<u64>,
}

impl Dropset {
    /// No record is a candidate (identity for OR).
    pub fn empty(config: &IndexConfig, record_count: usize) -> Self {
        Dropset {
            word_width: config.word_bits(),
            word_mask: config.word_mask(),
            record_count,
            words: vec![0u64; config.record_segments_for(record_count)],
        }
    }

    /// Every record is a candidate (identity for AND).
    pub fn full(config: &IndexConfig, record_count: usize) -> Self {
        let mut out = Self::empty(config, record_count);
        out.words.fill(config.word_mask());
        out
    }

    /// Wrap raw per-layer words; `words` holds one word per layer.
    pub(crate) fn from_words(config: &IndexConfig, record_count: usize, words: Vec<u64>) -> Self {
        debug_assert_eq!(words.len(), config.record_segments_for(record_count));
        Dropset {
            word_width: config.word_bits(),
            word_mask: config.word_mask(),
            record_count,
            words,
        }
    }

    #[inline]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub(crate) fn words_mut(&mut self) -> &mut [u64] {
        &mut self.words
    }

    #[inline]
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Whether `record` (0-based) is a candidate.
    #[inline]
    pub fn contains(&self, record: usize) -> bool {
        if record >= self.record_count {
            return false;
        }
        (self.words[record / self.word_width] >> (record % self.word_width)) & 1 == 1
    }

    /// First candidate at or after `from` (0-based), or `None` once the
    /// records are exhausted.
    ///
    /// Restartable: call again with the previous hit plus one to continue.
    ///
    /// # Examples
    ///
    /// ```
    /// use scwindex::{Dropset, IndexConfig};
    ///
    /// let config = IndexConfig::new(32, 64, 1).unwrap();
    /// let mut drops = Dropset::empty(&config, 40);
    /// drops.insert(3);
    /// drops.insert(35);
    ///
    /// assert_eq!(drops.next_match(0), Some(3));
    /// assert_eq!(drops.next_match(4), Some(35));
    /// assert_eq!(drops.next_match(36), None);
    /// ```
    pub fn next_match(&self, from: usize) -> Option<usize> {
        if from >= self.record_count {
            return None;
        }
        let ww = self.word_width;
        let mut w = from / ww;
        let mut bits = self.words[w] & (self.word_mask << (from % ww)) & self.word_mask;
        loop {
            if bits != 0 {
                let hit = w * ww + bits.trailing_zeros() as usize;
                return (hit < self.record_count).then_some(hit);
            }
            w += 1;
            if w >= self.words.len() {
                return None;
            }
            bits = self.words[w] & self.word_mask;
        }
    }

    /// Iterate over all candidates in ascending order.
    pub fn iter(&self) -> Matches<'_> {
        Matches {
            dropset: self,
            next: 0,
        }
    }

    /// Number of candidates.
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.next_match(0).is_none()
    }

    /// Mark `record` as a candidate.
    pub fn insert(&mut self, record: usize) {
        if record < self.record_count {
            self.words[record / self.word_width] |= 1u64 << (record % self.word_width);
        }
    }

    /// In-place union with another dropset over the same records.
    pub fn union_with(&mut self, other: &Dropset) {
        debug_assert_eq!(self.record_count, other.record_count);
        for (a, &b) in self.words.iter_mut().zip(&other.words) {
            *a |= b;
        }
    }

    /// In-place intersection with another dropset over the same records.
    pub fn intersect_with(&mut self, other: &Dropset) {
        debug_assert_eq!(self.record_count, other.record_count);
        for (a, &b) in self.words.iter_mut().zip(&other.words) {
            *a &= b;
        }
    }
}

/// Iterator over the candidates of a [`Dropset`].
pub struct Matches<'a> {
    dropset: &'a Dropset,
    next: usize,
}

impl Iterator for Matches<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let hit = self.dropset.next_match(self.next)?;
        self.next = hit + 1;
        Some(hit)
    }
}

impl<'a> IntoIterator for &'a Dropset {
    type Item = usize;
    type IntoIter = Matches<'a>;

    fn into_iter(self) -> Matches<'a> {
        self.iter()
    }
}
