//! Query Evaluator
//!
//! A session folds query pieces into per-section candidate bitmaps and
//! sections into a dropset:
//!
//! ```text
//! piece    : AND over its K chosen slice words, in one shard
//! section  : AND of its pieces           (starts all ones)
//! dropset  : combine_or   |= OR  of sections   (starts all zeros)
//!            combine_and  &= AND of sections   (starts all ones)
//!            require_any  &= OR  of sections   (starts all ones)
//! ```
//!
//! `require_any` called once per batch of alternatives gives
//! `AND_over_batches(OR_over_sections(AND_over_pieces(AND_over_K_bits)))`.
//!
//! The session borrows the shard set immutably, so several sessions may run
//! against the same loaded shards at once.

use crate::dropset::Dropset;
use crate::error::{Result, ScwError};
use crate::shard::ShardSet;
use crate::signature::{Encoder, Signature};
use tracing::debug;

/// Stateful evaluation of one query over a loaded [`ShardSet`].
#[derive(Debug)]
pub struct QuerySession<'a> {
    shards: &'a ShardSet,
    encoder: Encoder,
    record_segments: usize,
    /// `section_count * record_segments` words, section-major
    sections: Vec<u64>,
    section_count: usize,
    active: bool,
    dropset: Option<Dropset>,
    scratch: Signature,
    positions: Vec<usize>,
}

impl<'a> QuerySession<'a> {
    pub fn new(shards: &'a ShardSet) -> Result<Self> {
        let config = *shards.config();
        let encoder = Encoder::new(config)?;
        Ok(QuerySession {
            shards,
            encoder,
            record_segments: shards.record_segments(),
            sections: Vec::new(),
            section_count: 0,
            active: false,
            dropset: None,
            scratch: Signature::new_zero(&config),
            positions: Vec::with_capacity(config.bits_per_piece),
        })
    }

    /// Number of sections in the active batch.
    pub fn section_count(&self) -> usize {
        self.section_count
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Start a batch of `section_count` sections, each all ones.
    ///
    /// Replaces any previous sections; the accumulated dropset is kept so
    /// successive batches fold into the same result.
    pub fn begin_session(&mut self, section_count: usize) -> Result<()> {
        if section_count == 0 {
            return Err(ScwError::InvalidQuery(
                "a session needs at least one section".to_string(),
            ));
        }
        let words = section_count
            .checked_mul(self.record_segments)
            .ok_or(ScwError::OutOfMemory {
                what: "query sections",
                words: usize::MAX,
            })?;
        self.sections.clear();
        self.sections
            .try_reserve_exact(words)
            .map_err(|_| ScwError::OutOfMemory {
                what: "query sections",
                words,
            })?;
        self.sections
            .resize(words, self.shards.config().word_mask());
        self.section_count = section_count;
        self.active = true;
        debug!(
            sections = section_count,
            layers = self.record_segments,
            "began query batch"
        );
        Ok(())
    }

    /// Narrow `section` to records holding every bit of `content`'s code in
    /// shard `shard_index`.
    pub fn encode_query_piece(
        &mut self,
        section: usize,
        content: &[u8],
        shard_index: usize,
    ) -> Result<()> {
        if !self.active {
            return Err(ScwError::NoActiveSession);
        }
        if section >= self.section_count {
            return Err(ScwError::SectionOutOfRange {
                index: section,
                count: self.section_count,
            });
        }
        let shard = self.shards.get(shard_index)?;

        self.encoder
            .encode_into(content, &mut self.scratch, &mut self.positions);

        let rs = self.record_segments;
        let target = &mut self.sections[section * rs..(section + 1) * rs];
        for &position in &self.positions {
            for (layer, word) in target.iter_mut().enumerate() {
                *word &= shard.word(layer, position);
            }
        }
        Ok(())
    }

    /// Candidate bitmap of one section.
    pub fn section(&self, section: usize) -> Result<Dropset> {
        if section >= self.section_count {
            return Err(ScwError::SectionOutOfRange {
                index: section,
                count: self.section_count,
            });
        }
        let rs = self.record_segments;
        Ok(Dropset::from_words(
            self.shards.config(),
            self.shards.record_count(),
            self.sections[section * rs..(section + 1) * rs].to_vec(),
        ))
    }

    /// `dropset |= OR(sections)`. Any one section matching is enough.
    pub fn combine_or(&mut self) -> Result<&Dropset> {
        let folded = self.fold_sections(0, |acc, w| acc | w)?;
        let dropset = self.dropset_or(false);
        for (d, f) in dropset.words_mut().iter_mut().zip(folded) {
            *d |= f;
        }
        Ok(&*dropset)
    }

    /// `dropset &= AND(sections)`. Every section must match.
    pub fn combine_and(&mut self) -> Result<&Dropset> {
        let mask = self.shards.config().word_mask();
        let folded = self.fold_sections(mask, |acc, w| acc & w)?;
        let dropset = self.dropset_or(true);
        for (d, f) in dropset.words_mut().iter_mut().zip(folded) {
            *d &= f;
        }
        Ok(&*dropset)
    }

    /// `dropset &= OR(sections)`. At least one section of this batch must
    /// match, on top of everything folded in before.
    pub fn require_any(&mut self) -> Result<&Dropset> {
        let folded = self.fold_sections(0, |acc, w| acc | w)?;
        let dropset = self.dropset_or(true);
        for (d, f) in dropset.words_mut().iter_mut().zip(folded) {
            *d &= f;
        }
        Ok(&*dropset)
    }

    /// Accumulated result so far, if any combinator ran.
    pub fn dropset(&self) -> Option<&Dropset> {
        self.dropset.as_ref()
    }

    /// Take the accumulated result, leaving the session without one.
    pub fn take_dropset(&mut self) -> Option<Dropset> {
        self.dropset.take()
    }

    /// Next candidate at or after `from`; `None` when exhausted or when no
    /// combinator has run yet.
    pub fn next_match(&self, from: usize) -> Option<usize> {
        self.dropset.as_ref()?.next_match(from)
    }

    /// Free sections and dropset; the session is idle again.
    pub fn end_session(&mut self) {
        self.sections = Vec::new();
        self.section_count = 0;
        self.active = false;
        self.dropset = None;
        debug!("ended query session");
    }

    fn fold_sections(&self, init: u64, op: impl Fn(u64, u64) -> u64) -> Result<Vec<u64>> {
        if !self.active {
            return Err(ScwError::NoActiveSession);
        }
        let rs = self.record_segments;
        let mut out = vec![init; rs];
        for section in self.sections.chunks_exact(rs.max(1)).take(self.section_count) {
            for (acc, &w) in out.iter_mut().zip(section) {
                *acc = op(*acc, w);
            }
        }
        Ok(out)
    }

    fn dropset_or(&mut self, all_ones: bool) -> &mut Dropset {
        let config = *self.shards.config();
        let records = self.shards.record_count();
        self.dropset.get_or_insert_with(|| {
            if all_ones {
                Dropset::full(&config, records)
            } else {
                Dropset::empty(&config, records)
            }
        })
    }
}
