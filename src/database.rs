//! Record database over a FASTA-style text file
//!
//! A line starting with `>` opens a record; the following lines, up to the
//! next header, are its body. Every record's signature superimposes all
//! n-grams of its body, with one shard per piece length:
//!
//! ```text
//! proteins.fasta      source records
//! proteins.idx        record table (bincode): titles, offsets, geometry,
//!                     SHA-256 of the source
//! proteins.slices0    shard of short pieces
//! proteins.slices1    shard of long pieces
//! ```
//!
//! Queries return candidate records only; checking them against the
//! pattern is left to the caller (see [`Database::read_record`]).

use crate::config::IndexConfig;
use crate::error::{Result, ScwError};
use crate::planner::{PatternQuery, PieceLayout, Planner};
use crate::shard::{shard_path, write_shard, ShardSet};
use crate::slicer::SliceBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Version of the record table layout.
const RECORD_TABLE_VERSION: u32 = 2;

/// Options fixed at index build time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DatabaseOptions {
    pub config: IndexConfig,
    pub layout: PieceLayout,
}

/// Location of one record in the source file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEntry {
    /// First word of the header line
    pub title: String,
    /// Byte offset of the header line
    pub offset: u64,
    /// Length of the joined body in bytes
    pub body_len: u64,
}

/// A candidate returned by a query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub id: usize,
    pub title: String,
    pub offset: u64,
}

#[derive(Serialize, Deserialize)]
struct RecordTable {
    version: u32,
    config: IndexConfig,
    piece_sizes: [usize; 2],
    source_len: u64,
    source_digest: [u8; 32],
    records: Vec<RecordEntry>,
}

/// Indexed record database.
#[derive(Debug)]
pub struct Database {
    source: PathBuf,
    options: DatabaseOptions,
    records: Vec<RecordEntry>,
    shards: ShardSet,
}

impl Database {
    /// Path of the record table next to `source`.
    pub fn table_path(source: &Path) -> PathBuf {
        source.with_extension("idx")
    }

    /// Shard path template next to `source`.
    pub fn slice_template(source: &Path) -> String {
        source.with_extension("slices").to_string_lossy().into_owned()
    }

    /// Load the existing index of `source`, building it when it is missing
    /// or out of date.
    pub fn open<P: AsRef<Path>>(source: P, options: DatabaseOptions) -> Result<Self> {
        let source = source.as_ref();
        match Self::load(source, options) {
            Ok(db) => {
                info!(source = %source.display(), records = db.record_count(), "loaded index");
                Ok(db)
            }
            Err(ScwError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                info!(source = %source.display(), "no existing index, building one");
                Self::build(source, options)
            }
            Err(err) if err.is_stale_index() => {
                warn!(source = %source.display(), error = %err, "stale index, rebuilding");
                Self::build(source, options)
            }
            Err(err) => Err(err),
        }
    }

    /// Index `source` from scratch and write the record table and shards.
    pub fn build<P: AsRef<Path>>(source: P, options: DatabaseOptions) -> Result<Self> {
        let source = source.as_ref();
        let sizes = options.layout.sizes();
        let mut builders = sizes
            .iter()
            .map(|_| SliceBuilder::new(options.config))
            .collect::<Result<Vec<_>>>()?;
        let mut records = Vec::new();

        let source_digest = scan_records(source, |entry, body| {
            for (builder, &n) in builders.iter_mut().zip(&sizes) {
                builder.begin_record();
                for piece in body.windows(n) {
                    builder.add_piece(piece)?;
                }
            }
            records.push(entry);
            Ok(())
        })?;

        let template = Self::slice_template(source);
        let mut shards = ShardSet::new(options.config)?;
        for (i, builder) in builders.into_iter().enumerate() {
            let shard = builder.finish();
            write_shard(&shard, shard_path(&template, i))?;
            shards.push(shard)?;
        }

        let table = RecordTable {
            version: RECORD_TABLE_VERSION,
            config: options.config,
            piece_sizes: sizes,
            source_len: fs::metadata(source)?.len(),
            source_digest,
            records,
        };
        let encoded = bincode::serialize(&table)?;
        fs::write(Self::table_path(source), encoded)?;

        info!(
            source = %source.display(),
            records = table.records.len(),
            shards = shards.len(),
            "built index"
        );

        Ok(Database {
            source: source.to_path_buf(),
            options,
            records: table.records,
            shards,
        })
    }

    /// Load an existing index, failing if it does not match `options` or the
    /// current content of `source`.
    pub fn load<P: AsRef<Path>>(source: P, options: DatabaseOptions) -> Result<Self> {
        let source = source.as_ref();
        let table_path = Self::table_path(source);
        let mismatch = |detail: String| ScwError::FormatMismatch {
            path: table_path.clone(),
            detail,
        };

        let bytes = fs::read(&table_path)?;
        let table: RecordTable = bincode::deserialize(&bytes)
            .map_err(|err| mismatch(format!("unreadable record table: {}", err)))?;
        if table.version != RECORD_TABLE_VERSION {
            return Err(mismatch(format!("record table version {}", table.version)));
        }
        if table.config != options.config || table.piece_sizes != options.layout.sizes() {
            return Err(mismatch(format!(
                "index built with {:?} and pieces {:?}",
                table.config, table.piece_sizes
            )));
        }
        let source_len = fs::metadata(source)?.len();
        if table.source_len != source_len {
            return Err(mismatch(format!(
                "source is {} bytes, index was built from {}",
                source_len, table.source_len
            )));
        }
        if source_digest(source)? != table.source_digest {
            return Err(mismatch(
                "source content changed since the index was built".to_string(),
            ));
        }

        let template = Self::slice_template(source);
        let shards = ShardSet::load(options.config, &template, 0..table.piece_sizes.len())?;
        if shards.record_count() != table.records.len() {
            return Err(mismatch(format!(
                "shards hold {} records, table lists {}",
                shards.record_count(),
                table.records.len()
            )));
        }

        Ok(Database {
            source: source.to_path_buf(),
            options,
            records: table.records,
            shards,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    pub fn records(&self) -> &[RecordEntry] {
        &self.records
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn shards(&self) -> &ShardSet {
        &self.shards
    }

    /// Mean number of `piece_len`-byte pieces per record.
    pub fn mean_pieces(&self, piece_len: usize) -> f64 {
        if self.records.is_empty() || piece_len == 0 {
            return 0.0;
        }
        let total: u64 = self
            .records
            .iter()
            .map(|r| (r.body_len + 1).saturating_sub(piece_len as u64))
            .sum();
        total as f64 / self.records.len() as f64
    }

    /// Records that may contain the query's patterns.
    pub fn candidates(&self, query: &PatternQuery) -> Result<Vec<Candidate>> {
        let planner = Planner::new(&self.shards, self.options.layout)?;
        let drops = planner.candidates(query)?;
        Ok(drops
            .iter()
            .filter_map(|id| {
                self.records.get(id).map(|r| Candidate {
                    id,
                    title: r.title.clone(),
                    offset: r.offset,
                })
            })
            .collect())
    }

    /// Body of record `id`, lines joined.
    pub fn read_record(&self, id: usize) -> Result<Vec<u8>> {
        let entry = self.records.get(id).ok_or_else(|| {
            ScwError::InvalidQuery(format!(
                "record {} out of range ({} records)",
                id,
                self.records.len()
            ))
        })?;
        let mut file = File::open(&self.source)?;
        file.seek(SeekFrom::Start(entry.offset))?;
        let mut reader = BufReader::new(file);

        let mut line = Vec::new();
        reader.read_until(b'\n', &mut line)?;
        let mut body = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 || line.first() == Some(&b'>') {
                break;
            }
            body.extend_from_slice(trim_line(&line));
        }
        Ok(body)
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &line[..end]
}

fn header_title(line: &[u8]) -> String {
    String::from_utf8_lossy(trim_line(&line[1..]))
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

fn source_digest(source: &Path) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    io::copy(&mut BufReader::new(File::open(source)?), &mut hasher)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    Ok(out)
}

/// Stream the records of `source`, handing each header entry and joined body
/// to `on_record`. Returns the SHA-256 of the bytes read.
fn scan_records<F>(source: &Path, mut on_record: F) -> Result<[u8; 32]>
where
    F: FnMut(RecordEntry, &[u8]) -> Result<()>,
{
    let mut reader = BufReader::new(File::open(source)?);
    let mut hasher = Sha256::new();
    let mut line = Vec::new();
    let mut offset = 0u64;
    let mut current: Option<RecordEntry> = None;
    let mut body = Vec::new();
    let mut orphan_lines = 0usize;

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            break;
        }
        hasher.update(&line);
        if line[0] == b'>' {
            if let Some(mut entry) = current.take() {
                entry.body_len = body.len() as u64;
                on_record(entry, &body)?;
            }
            body.clear();
            current = Some(RecordEntry {
                title: header_title(&line),
                offset,
                body_len: 0,
            });
        } else if current.is_some() {
            body.extend_from_slice(trim_line(&line));
        } else if !trim_line(&line).is_empty() {
            orphan_lines += 1;
        }
        offset += read as u64;
    }
    if let Some(mut entry) = current.take() {
        entry.body_len = body.len() as u64;
        on_record(entry, &body)?;
    }
    if orphan_lines > 0 {
        warn!(
            source = %source.display(),
            lines = orphan_lines,
            "ignored lines before the first record header"
        );
    }
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    Ok(digest)
}
