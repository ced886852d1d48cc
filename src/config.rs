//! Index configuration
//!
//! One `IndexConfig` fixes the geometry of an index: how wide a storage word
//! is, how wide a signature is and how many bits each encoded piece turns on.
//! The same configuration must be used to build shards and to query them.

use crate::error::{Result, ScwError};
use serde::{Deserialize, Serialize};

/// Word widths a shard may be stored with.
pub const SUPPORTED_WORD_WIDTHS: [u32; 4] = [8, 16, 32, 64];

/// Geometry of a superimposed code word index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Bits per storage word (8, 16, 32 or 64)
    pub word_width: u32,
    /// Bits per record/piece signature
    pub signature_width: usize,
    /// Distinct bits set per encoded piece (K)
    pub bits_per_piece: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            word_width: 32,
            signature_width: 1024,
            bits_per_piece: 1,
        }
    }
}

impl IndexConfig {
    /// Create a validated configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use scwindex::IndexConfig;
    ///
    /// let config = IndexConfig::new(32, 64, 4).unwrap();
    /// assert_eq!(config.segments_per_signature(), 2);
    ///
    /// assert!(IndexConfig::new(32, 4, 5).is_err());
    /// ```
    pub fn new(word_width: u32, signature_width: usize, bits_per_piece: usize) -> Result<Self> {
        let config = IndexConfig {
            word_width,
            signature_width,
            bits_per_piece,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject geometries the encoder cannot work with.
    ///
    /// `bits_per_piece > signature_width` would make the rejection loop in the
    /// encoder spin forever, so it is refused here before any encoding.
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_WORD_WIDTHS.contains(&self.word_width) {
            return Err(ScwError::InvalidConfig(format!(
                "word width {} is not one of {:?}",
                self.word_width, SUPPORTED_WORD_WIDTHS
            )));
        }
        if self.signature_width == 0 {
            return Err(ScwError::InvalidConfig(
                "signature width must be greater than zero".to_string(),
            ));
        }
        if self.bits_per_piece == 0 {
            return Err(ScwError::InvalidConfig(
                "bits per piece must be greater than zero".to_string(),
            ));
        }
        if self.bits_per_piece > self.signature_width {
            return Err(ScwError::InvalidConfig(format!(
                "bits per piece ({}) exceeds signature width ({})",
                self.bits_per_piece, self.signature_width
            )));
        }
        if self.signature_width > u32::MAX as usize {
            return Err(ScwError::InvalidConfig(format!(
                "signature width {} does not fit the shard header",
                self.signature_width
            )));
        }
        Ok(())
    }

    /// Word width as a `usize`.
    #[inline]
    pub fn word_bits(&self) -> usize {
        self.word_width as usize
    }

    /// Number of words needed to hold one signature.
    #[inline]
    pub fn segments_per_signature(&self) -> usize {
        self.signature_width.div_ceil(self.word_bits())
    }

    /// Mask of the bits a word may use.
    #[inline]
    pub fn word_mask(&self) -> u64 {
        if self.word_width >= 64 {
            !0u64
        } else {
            (1u64 << self.word_width) - 1
        }
    }

    /// Bytes per word on disk.
    #[inline]
    pub fn word_bytes(&self) -> usize {
        self.word_bits() / 8
    }

    /// Number of record segments (layers) needed for `record_count` records.
    #[inline]
    pub fn record_segments_for(&self, record_count: usize) -> usize {
        record_count.div_ceil(self.word_bits())
    }

    /// Classical false drop estimate for a record built from
    /// `pieces_per_record` distinct pieces (may be a mean): `(1 - e^(-K*n/m))^K`.
    pub fn expected_false_positive_rate(&self, pieces_per_record: f64) -> f64 {
        let k = self.bits_per_piece as f64;
        let m = self.signature_width as f64;
        let n = pieces_per_record.max(0.0);
        let fill = 1.0 - (-k * n / m).exp();
        fill.powf(k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = IndexConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.segments_per_signature(), 32);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(IndexConfig::new(32, 0, 1).is_err());
        assert!(IndexConfig::new(32, 64, 0).is_err());
        assert!(IndexConfig::new(32, 8, 9).is_err());
        assert!(IndexConfig::new(24, 64, 4).is_err());
        assert!(IndexConfig::new(32, 8, 8).is_ok());
    }

    #[test]
    fn test_derived_values() {
        let config = IndexConfig::new(32, 65, 3).unwrap();
        assert_eq!(config.segments_per_signature(), 3);
        assert_eq!(config.word_mask(), 0xFFFF_FFFF);
        assert_eq!(config.word_bytes(), 4);
        assert_eq!(config.record_segments_for(0), 0);
        assert_eq!(config.record_segments_for(32), 1);
        assert_eq!(config.record_segments_for(33), 2);

        let wide = IndexConfig::new(64, 64, 1).unwrap();
        assert_eq!(wide.word_mask(), !0u64);
        let narrow = IndexConfig::new(8, 64, 1).unwrap();
        assert_eq!(narrow.word_mask(), 0xFF);
    }

    #[test]
    fn test_false_positive_estimate_shrinks_with_width() {
        let narrow = IndexConfig::new(32, 64, 2).unwrap();
        let wide = IndexConfig::new(32, 1024, 2).unwrap();
        let a = narrow.expected_false_positive_rate(10.0);
        let b = wide.expected_false_positive_rate(10.0);
        assert!(b < a, "{} should be below {}", b, a);
        assert!(a > 0.0 && a < 1.0);
    }
}
