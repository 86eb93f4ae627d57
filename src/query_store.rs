//src/query_store.rs

use ahash::{AHashMap, AHashSet};
use std::path::Path;

use crate::error::{Error, Result};
use crate::table_reader::for_each_line;
use crate::types::{QueryId, Rank, RawCount, SampleId};

/// One deduplicated read and the species it aligned equally well to.
#[derive(Debug, Clone)]
pub struct Query {
    pub sample: SampleId,
    pub read_id: String,
    pub raw_count: RawCount,
    /// Passed through to the raw-sequence table only.
    pub sequence: String,
    /// Rank the candidate names are declared at.
    pub rank: Rank,
    candidates: Vec<String>,
}

impl Query {
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Equal split of the raw count over the surviving candidates.
    #[inline]
    pub fn estimated_count(&self) -> f64 {
        if self.candidates.is_empty() {
            0.0
        } else {
            self.raw_count / self.candidates.len() as f64
        }
    }

    /// Drop a candidate, keeping the order of the others. Returns whether it was present.
    pub fn remove_candidate(&mut self, name: &str) -> bool {
        match self.candidates.iter().position(|c| c == name) {
            Some(pos) => {
                self.candidates.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// A parsed row of a per-sample count table, before it joins the store.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecord {
    pub read_id: String,
    pub raw_count: RawCount,
    pub sequence: String,
    pub candidates: Vec<String>,
}

/// Owns every Query of the run, across all samples.
#[derive(Debug, Default)]
pub struct QueryStore {
    samples: Vec<String>,
    queries: Vec<Query>,
    read_index: AHashMap<(SampleId, String), QueryId>,
}

impl QueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sample; its position fixes the table column order.
    pub fn add_sample(&mut self, name: &str) -> Result<SampleId> {
        if self.samples.iter().any(|s| s == name) {
            return Err(Error::InvalidConfig(format!("sample '{}' listed twice", name)));
        }
        self.samples.push(name.to_string());
        Ok(SampleId(self.samples.len() - 1))
    }

    /// Add one read. Candidate names are de-duplicated in first-seen order
    /// and must not end up empty.
    pub fn add_query(
        &mut self,
        sample: SampleId,
        read_id: &str,
        raw_count: RawCount,
        sequence: &str,
        candidates: Vec<String>,
        rank: Rank,
    ) -> Result<QueryId> {
        if sample.0 >= self.samples.len() {
            return Err(Error::InvalidConfig(format!("unknown sample index {}", sample.0)));
        }
        if !raw_count.is_finite() || raw_count < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "read '{}' has invalid count {}",
                read_id, raw_count
            )));
        }
        let key = (sample, read_id.to_string());
        if self.read_index.contains_key(&key) {
            return Err(Error::InvalidConfig(format!(
                "read '{}' appears twice in sample '{}'",
                read_id, self.samples[sample.0]
            )));
        }
        let candidates = dedup_candidates(candidates);
        if candidates.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "read '{}' in sample '{}' has no candidate species",
                read_id, self.samples[sample.0]
            )));
        }

        let id = QueryId(self.queries.len());
        self.queries.push(Query {
            sample,
            read_id: read_id.to_string(),
            raw_count,
            sequence: sequence.to_string(),
            rank,
            candidates,
        });
        self.read_index.insert(key, id);
        Ok(id)
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn sample_name(&self, sample: SampleId) -> &str {
        &self.samples[sample.0]
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn get(&self, id: QueryId) -> &Query {
        &self.queries[id.0]
    }

    pub fn get_mut(&mut self, id: QueryId) -> &mut Query {
        &mut self.queries[id.0]
    }

    pub fn find(&self, sample: SampleId, read_id: &str) -> Option<QueryId> {
        self.read_index.get(&(sample, read_id.to_string())).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (QueryId, &Query)> {
        self.queries.iter().enumerate().map(|(i, q)| (QueryId(i), q))
    }

    pub fn queries(&self) -> &[Query] {
        &self.queries
    }
}

fn dedup_candidates(candidates: Vec<String>) -> Vec<String> {
    let mut seen = AHashSet::with_capacity(candidates.len());
    candidates
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty() && seen.insert(c.clone()))
        .collect()
}

/// Count assumed for a read whose count cell is empty or absent.
pub const DEFAULT_RAW_COUNT: RawCount = 1.0;

/// Parses a raw duplicate count: any finite, non-negative number. An empty
/// cell means `DEFAULT_RAW_COUNT`.
fn parse_raw_count(value: &str) -> Option<RawCount> {
    let value = value.trim();
    if value.is_empty() {
        return Some(DEFAULT_RAW_COUNT);
    }
    match value.parse::<RawCount>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Some(v),
        _ => None,
    }
}

/// Parses one sample's count table:
/// ```text
/// read\tcount\tsequence\tspecies
/// <read id>\t<count>\t<sequence>\t<species1,species2,...>
/// ```
/// The first line is a header. Three-column (no sequence) and two-column
/// (read and species only, count 1) variants are also accepted. Only the
/// first word of the read id is kept.
pub fn parse_count_file<P: AsRef<Path>>(filepath: P) -> Result<Vec<QueryRecord>> {
    let path = filepath.as_ref();
    let mut records = Vec::new();
    let mut seen_reads: AHashSet<String> = AHashSet::new();

    for_each_line(path, |line_no, line| {
        if line_no == 1 || line.is_empty() {
            return Ok(());
        }
        let parts: Vec<&str> = line.split('\t').collect();
        let (read, count, sequence, species) = match parts.len() {
            4 => (parts[0], parts[1], parts[2], parts[3]),
            3 => (parts[0], parts[1], "", parts[2]),
            2 => (parts[0], "", "", parts[1]),
            n => {
                return Err(Error::malformed(
                    path,
                    line_no,
                    format!("expected 2 to 4 columns, found {}", n),
                ))
            }
        };

        let read_id = read.split(' ').next().unwrap_or_default().trim();
        if read_id.is_empty() {
            return Err(Error::malformed(path, line_no, "empty read identifier"));
        }
        let raw_count = parse_raw_count(count).ok_or_else(|| {
            Error::malformed(path, line_no, format!("invalid count '{}'", count))
        })?;
        let candidates = dedup_candidates(species.split(',').map(str::to_string).collect());
        if candidates.is_empty() {
            return Err(Error::malformed(path, line_no, "no candidate species"));
        }
        if !seen_reads.insert(read_id.to_string()) {
            return Err(Error::malformed(
                path,
                line_no,
                format!("duplicate read identifier '{}'", read_id),
            ));
        }

        records.push(QueryRecord {
            read_id: read_id.to_string(),
            raw_count,
            sequence: sequence.trim().to_string(),
            candidates,
        });
        Ok(())
    })?;

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_equal_split_estimate() {
        let mut store = QueryStore::new();
        let s = store.add_sample("s1").unwrap();
        let q = store
            .add_query(s, "r1", 9.0, "ACGT", names(&["A", "B", "A", "C"]), Rank::Species)
            .unwrap();
        assert_eq!(store.get(q).candidates(), &names(&["A", "B", "C"])[..]);
        assert_eq!(store.get(q).estimated_count(), 3.0);

        // contributions over surviving candidates sum to the raw count
        let total: f64 = store.get(q).candidates().iter().map(|_| store.get(q).estimated_count()).sum();
        assert_eq!(total, 9.0);

        assert!(store.get_mut(q).remove_candidate("B"));
        assert!(!store.get_mut(q).remove_candidate("B"));
        assert_eq!(store.get(q).candidates(), &names(&["A", "C"])[..]);
        assert_eq!(store.get(q).estimated_count(), 4.5);
    }

    #[test]
    fn test_rejects_empty_and_duplicate_reads() {
        let mut store = QueryStore::new();
        let s = store.add_sample("s1").unwrap();
        assert!(store.add_query(s, "r1", 1.0, "", vec![], Rank::Species).is_err());
        assert!(store.add_query(s, "r1", 1.0, "", names(&[" "]), Rank::Species).is_err());
        store.add_query(s, "r1", 1.0, "", names(&["A"]), Rank::Species).unwrap();
        assert!(store.add_query(s, "r1", 1.0, "", names(&["A"]), Rank::Species).is_err());
        assert!(store.add_sample("s1").is_err());

        let s2 = store.add_sample("s2").unwrap();
        let q = store.add_query(s2, "r1", 2.0, "", names(&["A"]), Rank::Species).unwrap();
        assert_eq!(store.find(s2, "r1"), Some(q));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_parse_raw_count() {
        assert_eq!(parse_raw_count("12"), Some(12.0));
        assert_eq!(parse_raw_count("12.5"), Some(12.5));
        assert_eq!(parse_raw_count(" "), Some(DEFAULT_RAW_COUNT));
        assert_eq!(parse_raw_count("-1"), None);
        assert_eq!(parse_raw_count("inf"), None);
        assert_eq!(parse_raw_count("x"), None);
    }

    #[test]
    fn test_parse_count_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s1.count");
        std::fs::write(
            &path,
            "read\tcount\tsequence\tspecies\n\
             r1 extra\t10\tACGT\tA,B\n\
             r2\t3\tTTTT\tB\n",
        )
        .unwrap();
        let records = parse_count_file(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].read_id, "r1");
        assert_eq!(records[0].raw_count, 10.0);
        assert_eq!(records[0].sequence, "ACGT");
        assert_eq!(records[0].candidates, names(&["A", "B"]));

        let three_col = dir.path().join("s2.count");
        std::fs::write(&three_col, "read\tcount\tspecies\nr1\t4\tC\n").unwrap();
        let records = parse_count_file(&three_col).unwrap();
        assert_eq!(records[0].sequence, "");
        assert_eq!(records[0].candidates, names(&["C"]));
    }

    #[test]
    fn test_parse_count_file_fractional_and_missing_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s1.count");
        std::fs::write(
            &path,
            "read\tcount\tsequence\tspecies\n\
             r1\t2.5\tACGT\tA\n\
             r2\t\tACGT\tA\n\
             r3\tB\n",
        )
        .unwrap();
        let records = parse_count_file(&path).unwrap();
        let counts: Vec<RawCount> = records.iter().map(|r| r.raw_count).collect();
        assert_eq!(counts, vec![2.5, 1.0, 1.0]);
        assert_eq!(records[2].candidates, names(&["B"]));

        let mut store = QueryStore::new();
        let s = store.add_sample("s1").unwrap();
        let q = store.add_query(s, "r1", 2.5, "", names(&["A", "B"]), Rank::Species).unwrap();
        assert_eq!(store.get(q).estimated_count(), 1.25);
        assert!(store.add_query(s, "r2", -1.0, "", names(&["A"]), Rank::Species).is_err());
    }

    #[test]
    fn test_parse_count_file_rejects_malformed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.count");

        std::fs::write(&path, "read\tcount\tsequence\tspecies\nr1\n").unwrap();
        assert!(matches!(
            parse_count_file(&path).unwrap_err(),
            Error::MalformedRecord { line: 2, .. }
        ));

        std::fs::write(&path, "read\tcount\tsequence\tspecies\nr1\t1\tAC\tA\tx\n").unwrap();
        assert!(matches!(
            parse_count_file(&path).unwrap_err(),
            Error::MalformedRecord { line: 2, .. }
        ));

        std::fs::write(&path, "read\tcount\tsequence\tspecies\nr1\tten\tAC\tA\n").unwrap();
        assert!(matches!(
            parse_count_file(&path).unwrap_err(),
            Error::MalformedRecord { line: 2, .. }
        ));

        std::fs::write(&path, "h\nr1\t1\tAC\tA\nr1\t1\tAC\tB\n").unwrap();
        assert!(matches!(
            parse_count_file(&path).unwrap_err(),
            Error::MalformedRecord { line: 3, .. }
        ));

        std::fs::write(&path, "h\nr1\t1\tAC\t,\n").unwrap();
        assert!(matches!(
            parse_count_file(&path).unwrap_err(),
            Error::MalformedRecord { line: 2, .. }
        ));
    }
}
