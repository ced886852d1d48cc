//! Superimposed Code Word Encoder
//!
//! Maps a content piece to `bits_per_piece` distinct positions in a
//! `signature_width`-bit space. A record's signature is the superposition
//! (bitwise OR) of the codes of all its pieces.
//!
//! # Pinned algorithm (encoder version 1)
//!
//! ```text
//! hash  = 5381
//! hash  = hash * 33 + byte            (wrapping u64, for every byte)
//! rng   = ChaCha8Rng::seed_from_u64(hash)
//! draw  = (rng.next_u64() * signature_width) >> 64   (u128 product)
//! ```
//!
//! Draws that hit an already chosen position are rejected and redrawn until
//! `bits_per_piece` distinct positions are held. Index building and querying
//! share this exact routine, so identical content always lands on identical
//! bits.

use crate::config::IndexConfig;
use crate::error::Result;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Version of the hash + generator pair, recorded in every shard header.
pub const ENCODER_VERSION: u16 = 1;

/// djb2 seed value.
const HASH_SEED: u64 = 5381;

/// Rolling multiply-and-add hash of a piece.
///
/// # Examples
///
/// ```
/// use scwindex::signature::content_hash;
///
/// assert_eq!(content_hash(b""), 5381);
/// assert_eq!(content_hash(b"a"), 5381 * 33 + 97);
/// ```
#[inline]
pub fn content_hash(content: &[u8]) -> u64 {
    content.iter().fold(HASH_SEED, |hash, &byte| {
        (hash << 5).wrapping_add(hash).wrapping_add(byte as u64)
    })
}

/// Fixed-width bit pattern of one record or one query piece.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    width: usize,
    word_width: usize,
    words: Vec<u64>,
}

impl Signature {
    /// Empty signature for the given geometry.
    pub fn new_zero(config: &IndexConfig) -> Self {
        Signature {
            width: config.signature_width,
            word_width: config.word_bits(),
            words: vec![0u64; config.segments_per_signature()],
        }
    }

    /// Signature width in bits.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Raw words, `word_width` bits used per word.
    #[inline]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    #[inline]
    pub fn get(&self, position: usize) -> bool {
        if position >= self.width {
            return false;
        }
        (self.words[position / self.word_width] >> (position % self.word_width)) & 1 == 1
    }

    #[inline]
    pub fn set(&mut self, position: usize) {
        if position < self.width {
            self.words[position / self.word_width] |= 1u64 << (position % self.word_width);
        }
    }

    /// Number of bits set.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// OR a piece code into this signature.
    pub fn superimpose(&mut self, positions: &[usize]) {
        for &p in positions {
            self.set(p);
        }
    }

    /// True when every bit of `positions` is set here.
    pub fn covers(&self, positions: &[usize]) -> bool {
        positions.iter().all(|&p| self.get(p))
    }

    /// Positions of the set bits in ascending order.
    pub fn positions(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.count_ones());
        for (w, &word) in self.words.iter().enumerate() {
            let mut bits = word;
            while bits != 0 {
                let tz = bits.trailing_zeros() as usize;
                out.push(w * self.word_width + tz);
                bits &= bits - 1;
            }
        }
        out
    }

    /// Clear all bits, keeping the allocation.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }
}

/// Deterministic piece encoder bound to one configuration.
///
/// Holds nothing but the configuration, so it can be shared freely and
/// called from any number of builders or query sessions.
#[derive(Clone, Copy, Debug)]
pub struct Encoder {
    config: IndexConfig,
}

impl Encoder {
    pub fn new(config: IndexConfig) -> Result<Self> {
        config.validate()?;
        Ok(Encoder { config })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Chosen bit positions for `content`, in draw order.
    ///
    /// # Examples
    ///
    /// ```
    /// use scwindex::{Encoder, IndexConfig};
    ///
    /// let encoder = Encoder::new(IndexConfig::new(32, 64, 4).unwrap()).unwrap();
    /// let bits = encoder.encode(b"AAAA");
    /// assert_eq!(bits.len(), 4);
    /// assert_eq!(bits, encoder.encode(b"AAAA"));
    /// ```
    pub fn encode(&self, content: &[u8]) -> Vec<usize> {
        let mut chosen = Signature::new_zero(&self.config);
        let mut positions = Vec::with_capacity(self.config.bits_per_piece);
        self.encode_into(content, &mut chosen, &mut positions);
        positions
    }

    /// Encode into caller-owned scratch space (avoids allocation in hot loops).
    ///
    /// `scratch` is cleared first and left holding the piece code; the chosen
    /// positions are appended to `positions` after it is cleared.
    pub fn encode_into(&self, content: &[u8], scratch: &mut Signature, positions: &mut Vec<usize>) {
        scratch.clear();
        positions.clear();

        let width = self.config.signature_width as u128;
        let mut rng = ChaCha8Rng::seed_from_u64(content_hash(content));

        while positions.len() < self.config.bits_per_piece {
            let draw = ((rng.next_u64() as u128 * width) >> 64) as usize;
            if scratch.get(draw) {
                continue;
            }
            scratch.set(draw);
            positions.push(draw);
        }
    }

    /// Piece code as a signature.
    pub fn signature(&self, content: &[u8]) -> Signature {
        let mut sig = Signature::new_zero(&self.config);
        let mut positions = Vec::with_capacity(self.config.bits_per_piece);
        self.encode_into(content, &mut sig, &mut positions);
        sig
    }
}
