//! scwindex - Bit-sliced Superimposed Code Word Index
//!
//! Probabilistic filtering index for collections of short records. Each
//! record is encoded into a fixed-width signature with a few content-derived
//! bits set, signatures are stored transposed ("bit-sliced") so a query can
//! test a whole word of records per AND, and the result is a superset of the
//! matching records that the caller verifies.
//!
//! # Pipeline
//!
//! ```text
//! Encoder ──→ SliceBuilder ──→ write_shard ──→ ShardSet::load ──→ QuerySession ──→ Dropset
//!    └───────────────────────────────────────────────────────────────┘
//!                      same encoder on both paths
//! ```
//!
//! # Quick Start
//!
//! ```
//! use scwindex::{IndexConfig, QuerySession, ShardSet, SliceBuilder};
//!
//! let config = IndexConfig::new(32, 64, 4)?;
//! let mut builder = SliceBuilder::new(config)?;
//! builder.add_record(b"AAAA")?;
//! builder.add_record(b"ZZZZ")?;
//! let shards = ShardSet::from_shards(config, vec![builder.finish()])?;
//!
//! let mut session = QuerySession::new(&shards)?;
//! session.begin_session(1)?;
//! session.encode_query_piece(0, b"AAAA", 0)?;
//! let drops = session.combine_and()?;
//! assert_eq!(drops.next_match(0), Some(0));
//! # Ok::<(), scwindex::ScwError>(())
//! ```

pub mod cli;
pub mod config;
pub mod database;
pub mod dropset;
pub mod error;
pub mod planner;
pub mod query;
pub mod shard;
pub mod signature;
pub mod slicer;

// Re-export main types for convenience
pub use config::IndexConfig;
pub use database::{Candidate, Database, DatabaseOptions, RecordEntry};
pub use dropset::Dropset;
pub use error::{Result, ScwError};
pub use planner::{Pattern, PatternQuery, PieceLayout, Planner};
pub use query::QuerySession;
pub use shard::{read_shard, write_shard, Shard, ShardSet};
pub use signature::{Encoder, Signature, ENCODER_VERSION};
pub use slicer::SliceBuilder;
