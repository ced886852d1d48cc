//! Record Buffer & Slice Transposer
//!
//! Records are encoded row-major into a chunk of `word_width` signatures.
//! A full chunk is transposed into one bit-sliced layer:
//!
//! ```text
//! chunk (row-major)                 layer (column-major)
//!   record 0: s₀ s₁ s₂ ... sₘ         position 0: r₀ r₁ r₂ ... r₃₁
//!   record 1: s₀ s₁ s₂ ... sₘ   ──→   position 1: r₀ r₁ r₂ ... r₃₁
//!   ...                               ...
//!   record 31                         position m: r₀ r₁ r₂ ... r₃₁
//! ```
//!
//! Layer word `p` has bit `r` set iff record `r` of the chunk has signature
//! bit `p` set, which lets a query AND one word per position and test
//! `word_width` records at once.

use crate::config::IndexConfig;
use crate::error::{Result, ScwError};
use crate::shard::Shard;
use crate::signature::{Encoder, Signature};
use tracing::debug;

/// Builds the bit-sliced layers of one shard.
///
/// # Examples
///
/// ```
/// use scwindex::{IndexConfig, SliceBuilder};
///
/// let mut builder = SliceBuilder::new(IndexConfig::new(32, 64, 4).unwrap()).unwrap();
/// builder.add_record(b"AAAA").unwrap();
/// builder.add_record(b"ZZZZ").unwrap();
/// let shard = builder.finish();
/// assert_eq!(shard.record_count(), 2);
/// assert_eq!(shard.record_segments(), 1);
/// ```
#[derive(Debug)]
pub struct SliceBuilder {
    config: IndexConfig,
    encoder: Encoder,
    /// Row-major chunk: `word_width` rows of `segments_per_signature` words
    chunk: Vec<u64>,
    /// Records held in the chunk
    chunk_len: usize,
    /// Transposed layers, `signature_width` words each, in build order
    layers: Vec<u64>,
    record_segments: usize,
    record_count: usize,
    scratch: Signature,
    positions: Vec<usize>,
}

impl SliceBuilder {
    pub fn new(config: IndexConfig) -> Result<Self> {
        let encoder = Encoder::new(config)?;
        let chunk_words = config.word_bits() * config.segments_per_signature();
        Ok(SliceBuilder {
            config,
            encoder,
            chunk: vec![0u64; chunk_words],
            chunk_len: 0,
            layers: Vec::new(),
            record_segments: 0,
            record_count: 0,
            scratch: Signature::new_zero(&config),
            positions: Vec::with_capacity(config.bits_per_piece),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Records added so far, padding excluded.
    #[inline]
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Layers transposed so far.
    #[inline]
    pub fn record_segments(&self) -> usize {
        self.record_segments
    }

    /// Records waiting in the active chunk.
    #[inline]
    pub fn pending(&self) -> usize {
        self.chunk_len
    }

    /// Transposed layers, flat (`record_segments * signature_width` words).
    pub fn layers(&self) -> &[u64] {
        &self.layers
    }

    /// Add a record made of a single piece.
    ///
    /// A chunk that reaches `word_width` records is transposed immediately.
    pub fn add_record(&mut self, content: &[u8]) -> Result<()> {
        self.begin_record();
        self.add_piece(content)?;
        if self.chunk_len == self.config.word_bits() {
            self.transpose_chunk();
        }
        Ok(())
    }

    /// Open a new, empty record; following pieces are superimposed into it.
    ///
    /// A full chunk is only transposed here, when the next record needs its
    /// row, because pieces of the last record may still be arriving.
    pub fn begin_record(&mut self) {
        if self.chunk_len == self.config.word_bits() {
            self.transpose_chunk();
        }
        self.chunk_len += 1;
        self.record_count += 1;
    }

    /// Superimpose one piece onto the open record.
    pub fn add_piece(&mut self, piece: &[u8]) -> Result<()> {
        if self.chunk_len == 0 {
            return Err(ScwError::NoOpenRecord);
        }
        self.encoder
            .encode_into(piece, &mut self.scratch, &mut self.positions);

        let segs = self.config.segments_per_signature();
        let row = (self.chunk_len - 1) * segs;
        for (w, &word) in self.scratch.words().iter().enumerate() {
            self.chunk[row + w] |= word;
        }
        Ok(())
    }

    /// Transpose a partially filled last chunk.
    ///
    /// The unused high bits of the resulting layer stay zero; `record_count`
    /// keeps them out of any scan.
    pub fn finalize(&mut self) {
        if self.chunk_len > 0 {
            self.transpose_chunk();
        }
    }

    /// Finalize and hand the layers over as an in-memory shard.
    pub fn finish(mut self) -> Shard {
        self.finalize();
        Shard::from_parts(self.config, self.record_count, self.layers)
    }

    /// Finalize and take the layers, leaving the builder empty for the next run.
    pub fn take_shard(&mut self) -> Shard {
        self.finalize();
        let layers = std::mem::take(&mut self.layers);
        let shard = Shard::from_parts(self.config, self.record_count, layers);
        self.reset();
        shard
    }

    /// Drop all records and layers. Returns the previous record count.
    pub fn reset(&mut self) -> usize {
        let previous = self.record_count;
        self.chunk.fill(0);
        self.chunk_len = 0;
        self.layers.clear();
        self.record_segments = 0;
        self.record_count = 0;
        previous
    }

    fn transpose_chunk(&mut self) {
        let width = self.config.signature_width;
        let ww = self.config.word_bits();
        let segs = self.config.segments_per_signature();

        let base = self.layers.len();
        self.layers.resize(base + width, 0);
        let layer = &mut self.layers[base..];

        for r in 0..self.chunk_len {
            let row = &self.chunk[r * segs..(r + 1) * segs];
            for (w, &word) in row.iter().enumerate() {
                let mut bits = word;
                while bits != 0 {
                    let tz = bits.trailing_zeros() as usize;
                    let position = w * ww + tz;
                    if position < width {
                        layer[position] |= 1u64 << r;
                    }
                    bits &= bits - 1;
                }
            }
        }

        self.record_segments += 1;
        debug!(
            layer = self.record_segments - 1,
            records = self.chunk_len,
            "transposed record chunk"
        );

        self.chunk.fill(0);
        self.chunk_len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> IndexConfig {
        IndexConfig::new(32, 64, 4).unwrap()
    }

    #[test]
    fn test_full_chunk_makes_one_layer() {
        let mut builder = SliceBuilder::new(config()).unwrap();
        for i in 0..32u32 {
            builder.add_record(&i.to_le_bytes()).unwrap();
        }
        assert_eq!(builder.record_segments(), 1);
        assert_eq!(builder.pending(), 0);
        assert_eq!(builder.layers().len(), 64);

        let shard = builder.finish();
        assert_eq!(shard.record_segments(), 1);
        assert_eq!(shard.record_count(), 32);
    }

    #[test]
    fn test_one_past_chunk_makes_two_layers() {
        let mut builder = SliceBuilder::new(config()).unwrap();
        for i in 0..33u32 {
            builder.add_record(&i.to_le_bytes()).unwrap();
        }
        assert_eq!(builder.record_segments(), 1);
        assert_eq!(builder.pending(), 1);

        let shard = builder.finish();
        assert_eq!(shard.record_segments(), 2);
        assert_eq!(shard.record_count(), 33);

        // Second layer holds only record 32 in bit 0; padding bits are zero.
        for &word in shard.layer(1).unwrap() {
            assert_eq!(word & !1u64, 0);
        }
        let ones: u32 = shard.layer(1).unwrap().iter().map(|w| w.count_ones()).sum();
        assert_eq!(ones, 4);
    }

    #[test]
    fn test_transposition_matches_signatures() {
        let cfg = IndexConfig::new(8, 20, 3).unwrap();
        let encoder = Encoder::new(cfg).unwrap();
        let mut builder = SliceBuilder::new(cfg).unwrap();
        let records: Vec<Vec<u8>> = (0..11).map(|i| format!("rec{}", i).into_bytes()).collect();
        for r in &records {
            builder.add_record(r).unwrap();
        }
        let shard = builder.finish();
        assert_eq!(shard.record_segments(), 2);

        for (i, r) in records.iter().enumerate() {
            let sig = encoder.signature(r);
            for p in 0..cfg.signature_width {
                let bit = (shard.word(i / 8, p) >> (i % 8)) & 1 == 1;
                assert_eq!(bit, sig.get(p), "record {} position {}", i, p);
            }
            assert_eq!(shard.record_signature(i), Some(sig));
        }
    }

    #[test]
    fn test_multi_piece_records_superimpose() {
        let cfg = config();
        let encoder = Encoder::new(cfg).unwrap();
        let mut builder = SliceBuilder::new(cfg).unwrap();

        builder.begin_record();
        builder.add_piece(b"MK").unwrap();
        builder.add_piece(b"KF").unwrap();
        builder.begin_record();
        builder.add_piece(b"QQ").unwrap();
        let shard = builder.finish();

        let mut expected = encoder.signature(b"MK");
        expected.superimpose(&encoder.encode(b"KF"));
        assert_eq!(shard.record_signature(0), Some(expected));
        assert_eq!(shard.record_signature(1), Some(encoder.signature(b"QQ")));
        assert_eq!(shard.record_signature(2), None);
    }

    #[test]
    fn test_piece_without_record_fails() {
        let mut builder = SliceBuilder::new(config()).unwrap();
        assert!(matches!(builder.add_piece(b"x"), Err(ScwError::NoOpenRecord)));
    }

    #[test]
    fn test_full_chunk_transposed_lazily_with_pieces() {
        let mut builder = SliceBuilder::new(config()).unwrap();
        for i in 0..32u32 {
            builder.begin_record();
            builder.add_piece(&i.to_le_bytes()).unwrap();
        }
        assert_eq!(builder.record_segments(), 0);
        builder.begin_record();
        assert_eq!(builder.record_segments(), 1);
        assert_eq!(builder.pending(), 1);
    }

    #[test]
    fn test_reset_and_take() {
        let mut builder = SliceBuilder::new(config()).unwrap();
        builder.add_record(b"one").unwrap();
        builder.add_record(b"two").unwrap();
        let shard = builder.take_shard();
        assert_eq!(shard.record_count(), 2);
        assert_eq!(builder.record_count(), 0);
        assert_eq!(builder.record_segments(), 0);

        builder.add_record(b"three").unwrap();
        assert_eq!(builder.reset(), 1);
        let empty = builder.finish();
        assert_eq!(empty.record_segments(), 0);
        assert!(empty.words().is_empty());
    }
}
