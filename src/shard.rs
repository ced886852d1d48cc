//! Index Store
//!
//! One shard file holds the bit-sliced layers of one index build:
//!
//! ```text
//! offset  size  field
//! 0       4     magic "SCWS"
//! 4       2     format version (1)
//! 6       2     encoder version
//! 8       2     word width (bits)
//! 10      2     reserved (0)
//! 12      4     signature width
//! 16      4     bits per piece
//! 20      8     record segments
//! 28      8     record count
//! 36      32    SHA-256 of the payload
//! 68      ...   payload: record_segments * signature_width words,
//!               word_width / 8 bytes each, little-endian,
//!               word at layer * signature_width + position
//! ```
//!
//! The payload is the legacy headerless layout unchanged; `read_legacy`
//! accepts such files when the dimensions are supplied out of band.

use crate::config::IndexConfig;
use crate::error::{Result, ScwError};
use crate::signature::{Signature, ENCODER_VERSION};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::info;

/// File magic for shard files.
pub const SHARD_MAGIC: [u8; 4] = *b"SCWS";

/// Current shard format version.
pub const SHARD_FORMAT_VERSION: u16 = 1;

/// Length of the shard header in bytes.
pub const SHARD_HEADER_LEN: usize = 68;

/// Bit-sliced layers of one index build, in memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shard {
    config: IndexConfig,
    record_segments: usize,
    record_count: usize,
    /// `record_segments * signature_width` words
    words: Vec<u64>,
}

impl Shard {
    pub(crate) fn from_parts(config: IndexConfig, record_count: usize, words: Vec<u64>) -> Self {
        let record_segments = config.record_segments_for(record_count);
        debug_assert_eq!(words.len(), record_segments * config.signature_width);
        Shard {
            config,
            record_segments,
            record_count,
            words,
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Number of layers.
    #[inline]
    pub fn record_segments(&self) -> usize {
        self.record_segments
    }

    /// Number of real records (padding excluded).
    #[inline]
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// All words, layer-major.
    #[inline]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// The `signature_width` words of one layer, `None` past the last layer.
    #[inline]
    pub fn layer(&self, layer: usize) -> Option<&[u64]> {
        let width = self.config.signature_width;
        let start = layer.checked_mul(width)?;
        self.words.get(start..start.checked_add(width)?)
    }

    /// Slice word for one layer and bit position. Callers stay within
    /// `record_segments` and `signature_width`.
    #[inline]
    pub(crate) fn word(&self, layer: usize, position: usize) -> u64 {
        self.words[layer * self.config.signature_width + position]
    }

    /// Fraction of record bits set, padding excluded.
    pub fn density(&self) -> f64 {
        let slots = self.record_count * self.config.signature_width;
        if slots == 0 {
            return 0.0;
        }
        let ones: u64 = self.words.iter().map(|w| w.count_ones() as u64).sum();
        ones as f64 / slots as f64
    }

    /// Rebuild one record's signature from the slices.
    pub fn record_signature(&self, record: usize) -> Option<Signature> {
        if record >= self.record_count {
            return None;
        }
        let ww = self.config.word_bits();
        let (layer, bit) = (record / ww, record % ww);
        let mut sig = Signature::new_zero(&self.config);
        for (position, &word) in self.layer(layer)?.iter().enumerate() {
            if (word >> bit) & 1 == 1 {
                sig.set(position);
            }
        }
        Some(sig)
    }

    fn payload_len(config: &IndexConfig, record_segments: usize) -> Option<u64> {
        (record_segments as u64)
            .checked_mul(config.signature_width as u64)?
            .checked_mul(config.word_bytes() as u64)
    }

    fn encode_payload(&self) -> Vec<u8> {
        let word_bytes = self.config.word_bytes();
        let mut out = Vec::with_capacity(self.words.len() * word_bytes);
        for &word in &self.words {
            out.extend_from_slice(&word.to_le_bytes()[..word_bytes]);
        }
        out
    }

    fn decode_payload(config: &IndexConfig, bytes: &[u8]) -> Result<Vec<u64>> {
        let word_bytes = config.word_bytes();
        let count = bytes.len() / word_bytes;
        let mut words = Vec::new();
        words
            .try_reserve_exact(count)
            .map_err(|_| ScwError::OutOfMemory {
                what: "shard words",
                words: count,
            })?;
        for chunk in bytes.chunks_exact(word_bytes) {
            let mut le = [0u8; 8];
            le[..word_bytes].copy_from_slice(chunk);
            words.push(u64::from_le_bytes(le));
        }
        Ok(words)
    }
}

/// Write a shard with its header. Fails on create or short write.
pub fn write_shard<P: AsRef<Path>>(shard: &Shard, path: P) -> Result<()> {
    let path = path.as_ref();
    let payload = shard.encode_payload();
    let digest = Sha256::digest(&payload);

    let mut header = Vec::with_capacity(SHARD_HEADER_LEN);
    header.extend_from_slice(&SHARD_MAGIC);
    header.extend_from_slice(&SHARD_FORMAT_VERSION.to_le_bytes());
    header.extend_from_slice(&ENCODER_VERSION.to_le_bytes());
    header.extend_from_slice(&(shard.config.word_width as u16).to_le_bytes());
    header.extend_from_slice(&0u16.to_le_bytes());
    header.extend_from_slice(&(shard.config.signature_width as u32).to_le_bytes());
    header.extend_from_slice(&(shard.config.bits_per_piece as u32).to_le_bytes());
    header.extend_from_slice(&(shard.record_segments as u64).to_le_bytes());
    header.extend_from_slice(&(shard.record_count as u64).to_le_bytes());
    header.extend_from_slice(&digest);
    debug_assert_eq!(header.len(), SHARD_HEADER_LEN);

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&header)?;
    writer.write_all(&payload)?;
    writer.flush()?;

    info!(
        path = %path.display(),
        records = shard.record_count,
        layers = shard.record_segments,
        "wrote shard"
    );
    Ok(())
}

/// Write only the payload, in the legacy headerless layout.
pub fn write_legacy<P: AsRef<Path>>(shard: &Shard, path: P) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&shard.encode_payload())?;
    writer.flush()?;
    Ok(())
}

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(b)
}

fn le_u64(bytes: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(b)
}

fn read_payload(file: &mut File, path: &Path, expected: u64, actual: u64) -> Result<Vec<u8>> {
    if actual < expected {
        return Err(ScwError::Truncated {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }
    let len = expected as usize;
    let mut payload = Vec::new();
    payload
        .try_reserve_exact(len)
        .map_err(|_| ScwError::OutOfMemory {
            what: "shard payload",
            words: len,
        })?;
    payload.resize(len, 0);
    file.read_exact(&mut payload)?;
    Ok(payload)
}

/// Read a headered shard, checking it against `config`.
pub fn read_shard<P: AsRef<Path>>(path: P, config: &IndexConfig) -> Result<Shard> {
    config.validate()?;
    let path = path.as_ref();
    let mismatch = |detail: String| ScwError::FormatMismatch {
        path: path.to_path_buf(),
        detail,
    };

    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    if file_len < SHARD_HEADER_LEN as u64 {
        return Err(ScwError::Truncated {
            path: path.to_path_buf(),
            expected: SHARD_HEADER_LEN as u64,
            actual: file_len,
        });
    }

    let mut header = [0u8; SHARD_HEADER_LEN];
    file.read_exact(&mut header)?;

    if header[0..4] != SHARD_MAGIC {
        return Err(mismatch("bad magic (legacy headerless shard?)".to_string()));
    }
    let format_version = le_u16(&header, 4);
    if format_version != SHARD_FORMAT_VERSION {
        return Err(mismatch(format!(
            "format version {} unsupported (expected {})",
            format_version, SHARD_FORMAT_VERSION
        )));
    }
    let encoder_version = le_u16(&header, 6);
    if encoder_version != ENCODER_VERSION {
        return Err(mismatch(format!(
            "encoder version {} differs from {}",
            encoder_version, ENCODER_VERSION
        )));
    }

    let found = IndexConfig {
        word_width: le_u16(&header, 8) as u32,
        signature_width: le_u32(&header, 12) as usize,
        bits_per_piece: le_u32(&header, 16) as usize,
    };
    if found != *config {
        return Err(mismatch(format!(
            "built with {:?}, configured {:?}",
            found, config
        )));
    }

    let record_segments = le_u64(&header, 20) as usize;
    let record_count = le_u64(&header, 28) as usize;
    if config.record_segments_for(record_count) != record_segments {
        return Err(mismatch(format!(
            "{} records cannot fill {} layers",
            record_count, record_segments
        )));
    }

    let payload_len = Shard::payload_len(config, record_segments)
        .ok_or_else(|| mismatch("payload size overflows".to_string()))?;
    let expected = SHARD_HEADER_LEN as u64 + payload_len;
    if file_len > expected {
        return Err(mismatch(format!(
            "{} trailing bytes after payload",
            file_len - expected
        )));
    }
    let payload = read_payload(&mut file, path, payload_len, file_len - SHARD_HEADER_LEN as u64)
        .map_err(|err| match err {
            ScwError::Truncated { path, .. } => ScwError::Truncated {
                path,
                expected,
                actual: file_len,
            },
            other => other,
        })?;

    if Sha256::digest(&payload).as_slice() != &header[36..68] {
        return Err(ScwError::ChecksumMismatch(path.to_path_buf()));
    }

    let words = Shard::decode_payload(config, &payload)?;
    Ok(Shard {
        config: *config,
        record_segments,
        record_count,
        words,
    })
}

/// Read a legacy headerless shard whose dimensions are known out of band.
pub fn read_legacy<P: AsRef<Path>>(
    path: P,
    config: &IndexConfig,
    record_segments: usize,
    record_count: usize,
) -> Result<Shard> {
    config.validate()?;
    let path = path.as_ref();
    if config.record_segments_for(record_count) != record_segments {
        return Err(ScwError::InvalidConfig(format!(
            "{} records cannot fill {} layers",
            record_count, record_segments
        )));
    }

    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let expected = Shard::payload_len(config, record_segments).ok_or_else(|| {
        ScwError::InvalidConfig("legacy shard size overflows".to_string())
    })?;
    if file_len > expected {
        return Err(ScwError::FormatMismatch {
            path: path.to_path_buf(),
            detail: format!("{} bytes, expected {}", file_len, expected),
        });
    }
    let payload = read_payload(&mut file, path, expected, file_len)?;
    let words = Shard::decode_payload(config, &payload)?;
    Ok(Shard {
        config: *config,
        record_segments,
        record_count,
        words,
    })
}

/// Path of shard `n` for a template: `{}` is replaced by `n`, otherwise `n`
/// is appended.
///
/// ```
/// use scwindex::shard::shard_path;
/// use std::path::PathBuf;
///
/// assert_eq!(shard_path("db.slices", 2), PathBuf::from("db.slices2"));
/// assert_eq!(shard_path("db-{}.shard", 0), PathBuf::from("db-0.shard"));
/// ```
pub fn shard_path(template: &str, n: usize) -> PathBuf {
    if template.contains("{}") {
        PathBuf::from(template.replacen("{}", &n.to_string(), 1))
    } else {
        PathBuf::from(format!("{}{}", template, n))
    }
}

/// Shards loaded together for one query.
///
/// All members share the configuration, layer count and record count; they
/// index the same records in different ways (for instance, one shard per
/// piece length). The set is read-only during queries and can back any
/// number of concurrent sessions.
#[derive(Clone, Debug)]
pub struct ShardSet {
    config: IndexConfig,
    shards: Vec<Shard>,
}

impl ShardSet {
    pub fn new(config: IndexConfig) -> Result<Self> {
        config.validate()?;
        Ok(ShardSet {
            config,
            shards: Vec::new(),
        })
    }

    pub fn from_shards(config: IndexConfig, shards: Vec<Shard>) -> Result<Self> {
        let mut set = ShardSet::new(config)?;
        for shard in shards {
            set.push(shard)?;
        }
        Ok(set)
    }

    /// Add an in-memory shard, rejecting incompatible dimensions.
    pub fn push(&mut self, shard: Shard) -> Result<()> {
        let origin = PathBuf::from(format!("<shard {}>", self.shards.len()));
        self.check_compatible(&shard, &origin)?;
        self.shards.push(shard);
        Ok(())
    }

    /// Load the numbered shards `range` of `template`.
    ///
    /// Either every shard loads or an error is returned; a partial set is
    /// never handed out.
    pub fn load(config: IndexConfig, template: &str, range: Range<usize>) -> Result<Self> {
        let mut set = ShardSet::new(config)?;
        for n in range {
            let path = shard_path(template, n);
            let shard = read_shard(&path, &config)?;
            set.check_compatible(&shard, &path)?;
            set.shards.push(shard);
        }
        info!(
            template,
            shards = set.shards.len(),
            records = set.record_count(),
            "loaded shard set"
        );
        Ok(set)
    }

    /// Like [`ShardSet::load`] for legacy headerless shards.
    pub fn load_legacy(
        config: IndexConfig,
        template: &str,
        range: Range<usize>,
        record_segments: usize,
        record_count: usize,
    ) -> Result<Self> {
        let mut set = ShardSet::new(config)?;
        for n in range {
            let path = shard_path(template, n);
            let shard = read_legacy(&path, &config, record_segments, record_count)?;
            set.shards.push(shard);
        }
        Ok(set)
    }

    fn check_compatible(&self, shard: &Shard, origin: &Path) -> Result<()> {
        let mismatch = |detail: String| ScwError::FormatMismatch {
            path: origin.to_path_buf(),
            detail,
        };
        if shard.config != self.config {
            return Err(mismatch(format!(
                "shard built with {:?}, set configured {:?}",
                shard.config, self.config
            )));
        }
        if let Some(first) = self.shards.first() {
            if first.record_count != shard.record_count
                || first.record_segments != shard.record_segments
            {
                return Err(mismatch(format!(
                    "{} records in {} layers, set holds {} records in {} layers",
                    shard.record_count,
                    shard.record_segments,
                    first.record_count,
                    first.record_segments
                )));
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Shard> {
        self.shards.get(index).ok_or(ScwError::ShardOutOfRange {
            index,
            count: self.shards.len(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Shard> {
        self.shards.iter()
    }

    /// Records indexed by every shard in the set.
    pub fn record_count(&self) -> usize {
        self.shards.first().map_or(0, |s| s.record_count)
    }

    /// Layers per shard.
    pub fn record_segments(&self) -> usize {
        self.shards.first().map_or(0, |s| s.record_segments)
    }

    /// Release all shards.
    pub fn clear(&mut self) {
        self.shards.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slicer::SliceBuilder;
    use tempfile::tempdir;

    fn config() -> IndexConfig {
        IndexConfig::new(32, 64, 4).unwrap()
    }

    fn build(records: usize, salt: &str) -> Shard {
        let mut builder = SliceBuilder::new(config()).unwrap();
        for i in 0..records {
            builder
                .add_record(format!("{}-{}", salt, i).as_bytes())
                .unwrap();
        }
        builder.finish()
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.slices0");
        let shard = build(40, "a");
        write_shard(&shard, &path).unwrap();

        let size = std::fs::metadata(&path).unwrap().len();
        assert_eq!(size, (SHARD_HEADER_LEN + 2 * 64 * 4) as u64);

        let back = read_shard(&path, &config()).unwrap();
        assert_eq!(back, shard);
    }

    #[test]
    fn test_narrow_words_roundtrip() {
        let cfg = IndexConfig::new(8, 30, 2).unwrap();
        let mut builder = SliceBuilder::new(cfg).unwrap();
        for i in 0..19u8 {
            builder.add_record(&[i, i + 1]).unwrap();
        }
        let shard = builder.finish();
        let dir = tempdir().unwrap();
        let path = dir.path().join("narrow");
        write_shard(&shard, &path).unwrap();
        assert_eq!(read_shard(&path, &cfg).unwrap(), shard);
    }

    #[test]
    fn test_truncated_shard_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short");
        write_shard(&build(10, "t"), &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let err = read_shard(&path, &config()).unwrap_err();
        assert!(matches!(err, ScwError::Truncated { .. }), "{}", err);
        assert!(err.is_stale_index());
    }

    #[test]
    fn test_config_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg");
        write_shard(&build(3, "c"), &path).unwrap();

        let other = IndexConfig::new(32, 64, 3).unwrap();
        let err = read_shard(&path, &other).unwrap_err();
        assert!(matches!(err, ScwError::FormatMismatch { .. }), "{}", err);
    }

    #[test]
    fn test_corruption_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad");
        write_shard(&build(5, "x"), &path).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x80;
        std::fs::write(&path, &bytes).unwrap();

        let err = read_shard(&path, &config()).unwrap_err();
        assert!(matches!(err, ScwError::ChecksumMismatch(_)), "{}", err);
    }

    #[test]
    fn test_legacy_file_is_not_headered() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy");
        let shard = build(20, "l");
        write_legacy(&shard, &path).unwrap();

        assert!(read_shard(&path, &config()).is_err());
        let back = read_legacy(&path, &config(), 1, 20).unwrap();
        assert_eq!(back, shard);

        // Dimensions from a bigger build make the file look short.
        let err = read_legacy(&path, &config(), 2, 40).unwrap_err();
        assert!(matches!(err, ScwError::Truncated { .. }));
    }

    #[test]
    fn test_load_range() {
        let dir = tempdir().unwrap();
        let template = dir.path().join("db.slices").to_string_lossy().to_string();
        write_shard(&build(12, "p2"), shard_path(&template, 0)).unwrap();
        write_shard(&build(12, "p3"), shard_path(&template, 1)).unwrap();

        let set = ShardSet::load(config(), &template, 0..2).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.record_count(), 12);
        assert_eq!(set.record_segments(), 1);
        assert!(set.get(2).is_err());

        let missing = ShardSet::load(config(), &template, 0..3).unwrap_err();
        assert!(matches!(missing, ScwError::Io(_)));
    }

    #[test]
    fn test_mixed_record_counts_rejected() {
        let dir = tempdir().unwrap();
        let template = dir.path().join("mix-{}.shard").to_string_lossy().to_string();
        write_shard(&build(12, "a"), shard_path(&template, 0)).unwrap();
        write_shard(&build(50, "b"), shard_path(&template, 1)).unwrap();

        let err = ShardSet::load(config(), &template, 0..2).unwrap_err();
        assert!(matches!(err, ScwError::FormatMismatch { .. }));

        let mut set = ShardSet::new(config()).unwrap();
        set.push(build(3, "a")).unwrap();
        assert!(set.push(build(4, "b")).is_err());
    }

    #[test]
    fn test_density_and_signature() {
        let shard = build(8, "d");
        // 8 records * 4 bits, no collisions within a single piece
        let expected = 32.0 / (8.0 * 64.0);
        assert!((shard.density() - expected).abs() < 1e-12);
        assert!(shard.record_signature(7).is_some());
        assert!(shard.record_signature(8).is_none());
    }

    #[test]
    fn test_layer_out_of_range() {
        let shard = build(40, "l");
        assert_eq!(shard.record_segments(), 2);
        assert_eq!(shard.layer(1).map(|l| l.len()), Some(64));
        assert!(shard.layer(2).is_none());
        assert!(shard.layer(usize::MAX).is_none());
    }
}
