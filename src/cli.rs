//! CLI interface for scwindex
//!
//! Provides command-line interface for:
//! - Indexing a FASTA-style record file into bit-sliced shards
//! - Querying candidate records for approximate patterns
//! - Reporting index statistics

use crate::config::IndexConfig;
use crate::database::{Database, DatabaseOptions};
use crate::planner::{Pattern, PatternQuery, PieceLayout};
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "scwindex")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bit-sliced superimposed code word index for approximate record search")]
#[command(
    long_about = "scwindex - a bit-sliced signature file index\n\n\
    Every record of a FASTA-style file is encoded into a fixed-width signature\n\
    built from its short pieces (2- and 3-grams). Signatures are stored bit-sliced\n\
    so that a query tests a whole word of records per operation.\n\n\
    Queries return candidate records: a superset of the true matches that the\n\
    caller verifies.\n\n\
    Examples:\n\
      scwindex index proteins.fasta\n\
      scwindex query proteins.fasta -p MKFLILLF -e 2\n\
      scwindex query proteins.fasta -p LIL -p CLF --all --json\n\
      scwindex query proteins.fasta -p LIL+MKFL -p CLF -e 1 -e 2 -e 1\n\
      scwindex stats proteins.fasta"
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Index geometry options shared by every command.
#[derive(Args, Clone, Copy, Debug)]
pub struct GeometryArgs {
    /// Bits per storage word (8, 16, 32 or 64)
    #[arg(long, default_value_t = 32)]
    pub word_width: u32,

    /// Bits per record signature
    #[arg(long, default_value_t = 1024)]
    pub signature_width: usize,

    /// Bits set per encoded piece
    #[arg(long, default_value_t = 1)]
    pub bits_per_piece: usize,
}

impl GeometryArgs {
    fn options(&self) -> anyhow::Result<DatabaseOptions> {
        let config = IndexConfig::new(self.word_width, self.signature_width, self.bits_per_piece)?;
        Ok(DatabaseOptions {
            config,
            layout: PieceLayout::default(),
        })
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build (or rebuild) the index of a record file
    Index {
        /// FASTA-style record file
        #[arg(value_name = "DB")]
        db: PathBuf,

        #[command(flatten)]
        geometry: GeometryArgs,
    },

    /// List candidate records for one or more patterns
    Query {
        /// FASTA-style record file (indexed on first use)
        #[arg(value_name = "DB")]
        db: PathBuf,

        /// Pattern to search for (repeatable); `A+B` requires both
        #[arg(short, long = "pattern", value_name = "PATTERN", required = true)]
        patterns: Vec<String>,

        /// Require every pattern instead of any one
        #[arg(long)]
        all: bool,

        /// Edit errors allowed (clamped to 1..=8); once for every pattern,
        /// or once per pattern in command-line order
        #[arg(short = 'e', long = "max-errors", value_name = "ERRORS")]
        max_errors: Vec<usize>,

        /// Print candidates as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        geometry: GeometryArgs,
    },

    /// Show index statistics
    Stats {
        /// FASTA-style record file
        #[arg(value_name = "DB")]
        db: PathBuf,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        geometry: GeometryArgs,
    },
}

#[derive(Serialize)]
struct ShardStats {
    piece_len: usize,
    density: f64,
    mean_pieces: f64,
    /// `(1 - e^(-K*n/m))^K` for the mean piece count
    expected_false_positive_rate: f64,
    /// `density^K` from the stored slices
    measured_false_positive_rate: f64,
}

#[derive(Serialize)]
struct IndexStats {
    config: IndexConfig,
    records: usize,
    layers: usize,
    shards: Vec<ShardStats>,
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Index { db, geometry } => {
            let options = geometry.options()?;
            let database = Database::build(&db, options)
                .with_context(|| format!("indexing {}", db.display()))?;
            println!(
                "Indexed {} records from {} ({} shards)",
                database.record_count(),
                db.display(),
                database.shards().len()
            );
            Ok(())
        }

        Commands::Query {
            db,
            patterns,
            all,
            max_errors,
            json,
            geometry,
        } => {
            let query = build_query(&patterns, &max_errors, all)?;
            let options = geometry.options()?;
            let database = Database::open(&db, options)
                .with_context(|| format!("opening {}", db.display()))?;

            let candidates = database.candidates(&query)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&candidates)?);
            } else {
                for c in &candidates {
                    println!("{}\t{}\t{}", c.id, c.title, c.offset);
                }
                println!(
                    "{} of {} records are candidates",
                    candidates.len(),
                    database.record_count()
                );
            }
            Ok(())
        }

        Commands::Stats { db, json, geometry } => {
            let options = geometry.options()?;
            let database = Database::open(&db, options)
                .with_context(|| format!("opening {}", db.display()))?;
            let stats = index_stats(&database);

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                let c = stats.config;
                println!("Database: {}", db.display());
                println!(
                    "Geometry: {}-bit words, {}-bit signatures, {} bit(s) per piece",
                    c.word_width, c.signature_width, c.bits_per_piece
                );
                println!("Records: {} in {} layers", stats.records, stats.layers);
                for s in &stats.shards {
                    println!(
                        "  {}-byte pieces: {:.1} per record, density {:.4}, \
                         false drop per piece expected {:.6}, measured {:.6}",
                        s.piece_len,
                        s.mean_pieces,
                        s.density,
                        s.expected_false_positive_rate,
                        s.measured_false_positive_rate
                    );
                }
            }
            Ok(())
        }
    }
}

/// Group `-p` arguments into a query. `A+B` is one group needing both;
/// `--all` folds every argument into a single group.
fn build_query(args: &[String], errors: &[usize], all: bool) -> anyhow::Result<PatternQuery> {
    let groups: Vec<Vec<&str>> = args.iter().map(|a| a.split('+').collect()).collect();
    let total: usize = groups.iter().map(Vec::len).sum();
    if groups.iter().flatten().any(|p| p.is_empty()) {
        bail!("patterns must not be empty");
    }
    if errors.len() > 1 && errors.len() != total {
        bail!(
            "{} error allowances given for {} patterns; give one, or one per pattern",
            errors.len(),
            total
        );
    }

    let mut next = 0usize;
    let mut query = PatternQuery::new();
    let mut merged = Vec::new();
    for group in groups {
        let patterns: Vec<Pattern> = group
            .into_iter()
            .map(|text| {
                let e = match errors {
                    [] => 1,
                    [one] => *one,
                    many => many[next],
                };
                next += 1;
                Pattern::new(text, e)
            })
            .collect();
        if all {
            merged.extend(patterns);
        } else {
            query = query.group(patterns);
        }
    }
    if all {
        query = query.group(merged);
    }
    Ok(query)
}

fn index_stats(database: &Database) -> IndexStats {
    let shards = database.shards();
    IndexStats {
        config: *shards.config(),
        records: shards.record_count(),
        layers: shards.record_segments(),
        shards: database
            .options()
            .layout
            .sizes()
            .iter()
            .zip(shards.iter())
            .map(|(&piece_len, shard)| {
                let config = shard.config();
                let mean_pieces = database.mean_pieces(piece_len);
                let density = shard.density();
                ShardStats {
                    piece_len,
                    density,
                    mean_pieces,
                    expected_false_positive_rate: config.expected_false_positive_rate(mean_pieces),
                    measured_false_positive_rate: density.powi(config.bits_per_piece as i32),
                }
            })
            .collect(),
    }
}
