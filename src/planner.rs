//! Query planning for approximate pattern search
//!
//! A pattern allowed `e` edit errors is cut into `e + 1` consecutive
//! segments; by the pigeonhole principle at least one of them occurs
//! unchanged in any approximate match. Each segment is covered with short
//! and long pieces (for example 2- and 3-grams), every piece is looked up in
//! the shard built for its length, and the segments are OR-ed.
//!
//! Patterns form groups: all patterns of a group must match (AND), and any
//! group matching is enough (OR).

use crate::dropset::Dropset;
use crate::error::{Result, ScwError};
use crate::query::QuerySession;
use crate::shard::ShardSet;
use tracing::{debug, warn};

/// Upper bound on edit errors per pattern.
pub const MAX_ERRORS: usize = 8;

/// Lower bound on edit errors per pattern.
pub const MIN_ERRORS: usize = 1;

/// Longest pattern the planner accepts.
pub const MAX_PATTERN_LEN: usize = 60;

/// Cover `len` bytes with the fewest pieces of length `short` and `long`
/// (`short < long`), long pieces first.
///
/// Returns `None` when no such cover exists.
///
/// ```
/// use scwindex::planner::split_into_pieces;
///
/// assert_eq!(split_into_pieces(4, 2, 3), Some(vec![2, 2]));
/// assert_eq!(split_into_pieces(7, 2, 3), Some(vec![3, 2, 2]));
/// assert_eq!(split_into_pieces(9, 2, 3), Some(vec![3, 3, 3]));
/// assert_eq!(split_into_pieces(1, 2, 3), None);
/// ```
pub fn split_into_pieces(len: usize, short: usize, long: usize) -> Option<Vec<usize>> {
    if short == 0 || long <= short || len == 0 {
        return None;
    }
    // Try the most long pieces first; the first remainder the short pieces
    // divide evenly gives the fewest pieces overall.
    for longs in (0..=len / long).rev() {
        let rest = len - longs * long;
        if rest % short == 0 {
            let mut pieces = vec![long; longs];
            pieces.extend(std::iter::repeat(short).take(rest / short));
            return Some(pieces);
        }
    }
    None
}

/// Byte ranges of the `errors + 1` pigeonhole segments of a pattern.
///
/// Every segment but the last is `len / (errors + 1)` long; the last takes
/// the remainder.
pub fn pigeonhole_segments(len: usize, errors: usize) -> Vec<std::ops::Range<usize>> {
    let count = errors + 1;
    let size = len / count;
    (0..count)
        .map(|i| {
            let start = i * size;
            let end = if i + 1 == count { len } else { start + size };
            start..end
        })
        .collect()
}

/// One pattern with its error allowance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    pub text: Vec<u8>,
    pub max_errors: usize,
}

impl Pattern {
    pub fn new(text: impl Into<Vec<u8>>, max_errors: usize) -> Self {
        Pattern {
            text: text.into(),
            max_errors,
        }
    }
}

/// Patterns grouped for evaluation: AND within a group, OR across groups.
#[derive(Clone, Debug, Default)]
pub struct PatternQuery {
    groups: Vec<Vec<Pattern>>,
}

impl PatternQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match records containing any one of `patterns`.
    pub fn any_of(patterns: impl IntoIterator<Item = Pattern>) -> Self {
        PatternQuery {
            groups: patterns.into_iter().map(|p| vec![p]).collect(),
        }
    }

    /// Match records containing all of `patterns`.
    pub fn all_of(patterns: impl IntoIterator<Item = Pattern>) -> Self {
        PatternQuery {
            groups: vec![patterns.into_iter().collect()],
        }
    }

    /// Add an alternative group.
    pub fn group(mut self, patterns: impl IntoIterator<Item = Pattern>) -> Self {
        self.groups.push(patterns.into_iter().collect());
        self
    }

    pub fn groups(&self) -> &[Vec<Pattern>] {
        &self.groups
    }

    pub fn patterns(&self) -> impl Iterator<Item = &Pattern> {
        self.groups.iter().flatten()
    }
}

/// Piece lengths and the shard each length was indexed into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PieceLayout {
    /// Short piece length, indexed in shard 0
    pub short: usize,
    /// Long piece length, indexed in shard 1
    pub long: usize,
}

impl Default for PieceLayout {
    fn default() -> Self {
        PieceLayout { short: 2, long: 3 }
    }
}

impl PieceLayout {
    /// Piece lengths in shard order.
    pub fn sizes(&self) -> [usize; 2] {
        [self.short, self.long]
    }

    /// Shard holding pieces of `len` bytes.
    pub fn shard_for(&self, len: usize) -> Option<usize> {
        self.sizes().iter().position(|&s| s == len)
    }
}

/// Evaluates [`PatternQuery`]s against shards built with a [`PieceLayout`].
#[derive(Debug)]
pub struct Planner<'a> {
    shards: &'a ShardSet,
    layout: PieceLayout,
}

impl<'a> Planner<'a> {
    pub fn new(shards: &'a ShardSet, layout: PieceLayout) -> Result<Self> {
        if shards.len() < layout.sizes().len() {
            return Err(ScwError::InvalidQuery(format!(
                "layout needs {} shards, {} loaded",
                layout.sizes().len(),
                shards.len()
            )));
        }
        Ok(Planner { shards, layout })
    }

    /// Candidate records for `query`.
    pub fn candidates(&self, query: &PatternQuery) -> Result<Dropset> {
        if query.patterns().next().is_none() {
            return Err(ScwError::InvalidQuery(
                "at least one pattern must be given".to_string(),
            ));
        }
        let config = self.shards.config();
        let records = self.shards.record_count();

        let mut result = Dropset::empty(config, records);
        for group in query.groups() {
            let mut group_drops = Dropset::full(config, records);
            for pattern in group {
                group_drops.intersect_with(&self.pattern_candidates(pattern)?);
            }
            result.union_with(&group_drops);
        }
        Ok(result)
    }

    /// Candidate records for one pattern.
    pub fn pattern_candidates(&self, pattern: &Pattern) -> Result<Dropset> {
        let config = self.shards.config();
        let records = self.shards.record_count();
        let len = pattern.text.len();

        if len > MAX_PATTERN_LEN {
            return Err(ScwError::InvalidQuery(format!(
                "pattern of {} bytes exceeds the {} byte limit",
                len, MAX_PATTERN_LEN
            )));
        }
        let errors = clamp_errors(pattern.max_errors);

        let segments = pigeonhole_segments(len, errors);
        let mut plans = Vec::with_capacity(segments.len());
        for range in &segments {
            match split_into_pieces(range.len(), self.layout.short, self.layout.long) {
                Some(pieces) => plans.push((range.start, pieces)),
                None => {
                    warn!(
                        pattern = %String::from_utf8_lossy(&pattern.text),
                        errors,
                        "pattern too short for its error allowance, every record is a candidate"
                    );
                    return Ok(Dropset::full(config, records));
                }
            }
        }

        let mut session = QuerySession::new(self.shards)?;
        session.begin_session(plans.len())?;
        for (section, (start, pieces)) in plans.iter().enumerate() {
            let mut at = *start;
            for &piece_len in pieces {
                let shard = self.layout.shard_for(piece_len).ok_or_else(|| {
                    ScwError::InvalidQuery(format!("no shard for {}-byte pieces", piece_len))
                })?;
                session.encode_query_piece(section, &pattern.text[at..at + piece_len], shard)?;
                at += piece_len;
            }
        }
        session.require_any()?;
        let drops = session
            .take_dropset()
            .unwrap_or_else(|| Dropset::full(config, records));
        session.end_session();

        debug!(
            pattern = %String::from_utf8_lossy(&pattern.text),
            errors,
            sections = plans.len(),
            candidates = drops.count(),
            "planned pattern"
        );
        Ok(drops)
    }
}

fn clamp_errors(requested: usize) -> usize {
    if requested > MAX_ERRORS {
        warn!(requested, "max errors too high, using {}", MAX_ERRORS);
        MAX_ERRORS
    } else if requested < MIN_ERRORS {
        warn!(requested, "max errors too low, using {}", MIN_ERRORS);
        MIN_ERRORS
    } else {
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::slicer::SliceBuilder;

    #[test]
    fn test_piece_table() {
        let expected: [(usize, &[usize]); 9] = [
            (2, &[2]),
            (3, &[3]),
            (4, &[2, 2]),
            (5, &[3, 2]),
            (6, &[3, 3]),
            (7, &[3, 2, 2]),
            (8, &[3, 3, 2]),
            (10, &[3, 3, 2, 2]),
            (30, &[3, 3, 3, 3, 3, 3, 3, 3, 3, 3]),
        ];
        for (len, pieces) in expected {
            assert_eq!(split_into_pieces(len, 2, 3).as_deref(), Some(pieces), "len {}", len);
        }
        assert_eq!(split_into_pieces(0, 2, 3), None);
        assert_eq!(split_into_pieces(1, 2, 3), None);
    }

    #[test]
    fn test_pigeonhole_segments() {
        assert_eq!(pigeonhole_segments(10, 2), vec![0..3, 3..6, 6..10]);
        assert_eq!(pigeonhole_segments(8, 1), vec![0..4, 4..8]);
    }

    #[test]
    fn test_query_shapes() {
        let q = PatternQuery::any_of([Pattern::new("MKFL", 1), Pattern::new("LIL", 1)]);
        assert_eq!(q.groups().len(), 2);
        let q = PatternQuery::all_of([Pattern::new("MKFL", 1), Pattern::new("LIL", 1)])
            .group([Pattern::new("CLF", 1)]);
        assert_eq!(q.groups().len(), 2);
        assert_eq!(q.patterns().count(), 3);
    }

    fn ngram_shards(records: &[&str], layout: PieceLayout) -> ShardSet {
        let config = IndexConfig::new(32, 256, 2).unwrap();
        let mut shards = Vec::new();
        for n in layout.sizes() {
            let mut builder = SliceBuilder::new(config).unwrap();
            for r in records {
                builder.begin_record();
                for gram in r.as_bytes().windows(n) {
                    builder.add_piece(gram).unwrap();
                }
            }
            shards.push(builder.finish());
        }
        ShardSet::from_shards(config, shards).unwrap()
    }

    #[test]
    fn test_pattern_with_one_error_finds_record() {
        let records = ["MKFLILLFNILCLFPVLAADNH", "GSSGSSGQQQWWWWEEEE", "PPPPRRRRTTTTYY"];
        let layout = PieceLayout::default();
        let set = ngram_shards(&records, layout);
        let planner = Planner::new(&set, layout).unwrap();

        // One substitution in the second half still matches via the first half.
        let query = PatternQuery::any_of([Pattern::new("MKFLILXX", 1)]);
        let drops = planner.candidates(&query).unwrap();
        assert!(drops.contains(0));
    }

    #[test]
    fn test_groups_and_or() {
        let records = ["AAAACCCC", "AAAAGGGG", "TTTTCCCC"];
        let layout = PieceLayout::default();
        let set = ngram_shards(&records, layout);
        let planner = Planner::new(&set, layout).unwrap();

        let both = PatternQuery::all_of([Pattern::new("AAAA", 1), Pattern::new("CCCC", 1)]);
        assert!(planner.candidates(&both).unwrap().contains(0));

        let either = PatternQuery::any_of([Pattern::new("GGGG", 1), Pattern::new("TTTT", 1)]);
        let drops = planner.candidates(&either).unwrap();
        assert!(drops.contains(1) && drops.contains(2));
    }

    #[test]
    fn test_short_pattern_falls_back() {
        let layout = PieceLayout::default();
        let set = ngram_shards(&["ABCDEFG", "HIJKLMN"], layout);
        let planner = Planner::new(&set, layout).unwrap();
        let drops = planner
            .pattern_candidates(&Pattern::new("ABC", 2))
            .unwrap();
        assert_eq!(drops.count(), 2);
    }

    #[test]
    fn test_rejections() {
        let layout = PieceLayout::default();
        let set = ngram_shards(&["ABCDEFG"], layout);
        let planner = Planner::new(&set, layout).unwrap();
        assert!(planner.candidates(&PatternQuery::new()).is_err());
        let long = Pattern::new(vec![b'A'; MAX_PATTERN_LEN + 1], 1);
        assert!(planner.pattern_candidates(&long).is_err());

        let one = ShardSet::from_shards(*set.config(), vec![set.get(0).unwrap().clone()]).unwrap();
        assert!(Planner::new(&one, layout).is_err());
    }

    #[test]
    fn test_error_clamping() {
        assert_eq!(clamp_errors(0), 1);
        assert_eq!(clamp_errors(3), 3);
        assert_eq!(clamp_errors(20), 8);
    }
}
