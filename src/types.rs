//src/types.rs

use std::fmt;
use std::str::FromStr;

/// Bucket name for reads whose candidates do not reach consensus at a rank.
pub const AMBIGUOUS_RANKS: &str = "AmbiguousRanks";

/// Ancestor name reported when a taxon has no node at the requested rank.
pub const UNCLASSIFIED: &str = "Unclassified";

/// Raw duplicate count of one deduplicated read. Non-negative, may be fractional.
pub type RawCount = f64;

/// A taxonomic resolution level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rank {
    Species,
    Genus,
    Family,
    Order,
    Class,
    Phylum,
    Superkingdom,
    Kingdom,
}

impl Rank {
    /// Every rank the taxonomy index precomputes ancestors for.
    pub const ALL: [Rank; 8] = [
        Rank::Species,
        Rank::Genus,
        Rank::Family,
        Rank::Order,
        Rank::Class,
        Rank::Phylum,
        Rank::Superkingdom,
        Rank::Kingdom,
    ];

    /// Ranks that get their own query/estimated count tables.
    pub const TABLE_RANKS: [Rank; 5] = [
        Rank::Genus,
        Rank::Family,
        Rank::Order,
        Rank::Class,
        Rank::Phylum,
    ];

    /// Ranks that get a fixed-rank consensus ("aggregated") table.
    pub const AGGREGATED_RANKS: [Rank; 6] = [
        Rank::Species,
        Rank::Genus,
        Rank::Family,
        Rank::Order,
        Rank::Class,
        Rank::Phylum,
    ];

    /// Narrowest to broadest, scanned when looking for the narrowest unique rank.
    pub const CONSENSUS_RANKS: [Rank; 6] = [
        Rank::Genus,
        Rank::Family,
        Rank::Order,
        Rank::Class,
        Rank::Phylum,
        Rank::Superkingdom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::Species => "species",
            Rank::Genus => "genus",
            Rank::Family => "family",
            Rank::Order => "order",
            Rank::Class => "class",
            Rank::Phylum => "phylum",
            Rank::Superkingdom => "superkingdom",
            Rank::Kingdom => "kingdom",
        }
    }

    /// Position inside `Rank::ALL`, used to index per-rank ancestor arrays.
    #[inline]
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rank {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rank::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown rank '{}'", s))
    }
}

/// Index of a sample in the sample list (column order of every table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleId(pub usize);

/// Index of a query inside the `QueryStore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(pub usize);

/// Index of a species inside the `SpeciesRegistry` arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpeciesId(pub usize);

/// One row of a feature table (rows = features, columns = samples).
#[derive(Debug, Clone, PartialEq)]
pub struct CountTableRow {
    pub feature: String,
    /// Summed raw counts, one per sample; `None` = feature absent from sample.
    pub query_counts: Vec<Option<RawCount>>,
    /// Summed estimated counts, one per sample.
    pub estimated_counts: Vec<Option<f64>>,
}

/// One row of the unified cross-rank tree table.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeTableRow {
    pub feature: String,
    pub tax_id: u32,
    pub rank: Rank,
    pub query_counts: Vec<Option<RawCount>>,
}

/// A read whose candidates never reach consensus at any scanned rank.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedQuery {
    pub sample: String,
    pub read_id: String,
    pub candidates: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_round_trip_and_index() {
        for (i, rank) in Rank::ALL.iter().enumerate() {
            assert_eq!(rank.index(), i);
            assert_eq!(rank.as_str().parse::<Rank>().unwrap(), *rank);
        }
        assert!("domain".parse::<Rank>().is_err());
    }

    #[test]
    fn test_consensus_ranks_are_narrowest_first() {
        let idx: Vec<usize> = Rank::CONSENSUS_RANKS.iter().map(|r| r.index()).collect();
        let mut sorted = idx.clone();
        sorted.sort();
        assert_eq!(idx, sorted);
        assert_eq!(Rank::CONSENSUS_RANKS.last(), Some(&Rank::Superkingdom));
    }
}
