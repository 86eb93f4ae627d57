//src/aggregate.rs

use ahash::AHashMap;
use log::{info, warn};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::query_store::{Query, QueryStore};
use crate::species::SpeciesRegistry;
use crate::taxdb::{AncestorLookup, TaxonomyIndex};
use crate::types::{
    CountTableRow, Rank, RawCount, SampleId, TreeTableRow, UnresolvedQuery, AMBIGUOUS_RANKS,
    UNCLASSIFIED,
};

/// A rank-level bucket, rebuilt from the query collection on every pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedNode {
    pub name: String,
    pub rank: Option<Rank>,
    pub tax_id: Option<u32>,
    pub query_counts: Vec<Option<RawCount>>,
    pub estimated_counts: Vec<Option<f64>>,
    /// Total raw count over all samples, the sort key
    pub query_count: RawCount,
}

impl AggregatedNode {
    pub fn into_count_row(self) -> CountTableRow {
        CountTableRow {
            feature: self.name,
            query_counts: self.query_counts,
            estimated_counts: self.estimated_counts,
        }
    }

    pub fn into_tree_row(self) -> Option<TreeTableRow> {
        Some(TreeTableRow {
            feature: self.name,
            tax_id: self.tax_id?,
            rank: self.rank?,
            query_counts: self.query_counts,
        })
    }
}

/// Insertion-ordered bucket collection keyed by (rank, name).
struct NodeBuckets {
    nodes: Vec<AggregatedNode>,
    index: AHashMap<(Option<Rank>, String), usize>,
    n_samples: usize,
}

impl NodeBuckets {
    fn new(n_samples: usize) -> Self {
        Self {
            nodes: Vec::new(),
            index: AHashMap::new(),
            n_samples,
        }
    }

    fn bucket(&mut self, name: &str, rank: Option<Rank>, tax_id: Option<u32>) -> usize {
        let key = (rank, name.to_string());
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(AggregatedNode {
            name: name.to_string(),
            rank,
            tax_id,
            query_counts: vec![None; self.n_samples],
            estimated_counts: vec![None; self.n_samples],
            query_count: 0.0,
        });
        self.index.insert(key, idx);
        idx
    }

    fn add_query_count(&mut self, idx: usize, sample: SampleId, count: RawCount) {
        let node = &mut self.nodes[idx];
        *node.query_counts[sample.0].get_or_insert(0.0) += count;
        node.query_count += count;
    }

    fn add_estimate(&mut self, idx: usize, sample: SampleId, estimate: f64) {
        *self.nodes[idx].estimated_counts[sample.0].get_or_insert(0.0) += estimate;
    }

    /// Descending by total raw count; ties keep first-seen order.
    fn into_sorted(self) -> Vec<AggregatedNode> {
        let mut nodes = self.nodes;
        nodes.sort_by(|a, b| b.query_count.total_cmp(&a.query_count));
        nodes
    }
}

/// Agreement of a query's candidates on one rank.
#[derive(Debug, Clone, PartialEq)]
pub struct Consensus<'a> {
    /// Most frequent ancestor name (first seen wins a tie)
    pub name: &'a str,
    pub votes: usize,
    pub total: usize,
    /// Index of the first candidate that voted for `name`
    pub first_voter: usize,
}

impl Consensus<'_> {
    pub fn fraction(&self) -> f64 {
        self.votes as f64 / self.total as f64
    }
}

/// Where the narrowest-unique-rank pass placed a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub rank: Rank,
    pub name: String,
    pub tax_id: u32,
}

/// Collapses ambiguous candidate lists onto taxonomy ranks.
pub struct RankAggregator<'a> {
    taxonomy: &'a TaxonomyIndex,
    samples: &'a [String],
    aggregate_rate: f64,
}

impl<'a> RankAggregator<'a> {
    pub fn new(taxonomy: &'a TaxonomyIndex, samples: &'a [String], aggregate_rate: f64) -> Self {
        Self {
            taxonomy,
            samples,
            aggregate_rate,
        }
    }

    /// Map every candidate to its ancestor at `rank` and count the votes.
    pub fn consensus(&self, query: &Query, rank: Rank) -> Result<Consensus<'a>> {
        let n = query.candidates().len();
        // (name, votes, first voter) in first-seen order, indexed by name
        let mut votes: Vec<(&'a str, usize, usize)> = Vec::with_capacity(n);
        let mut index: AHashMap<&'a str, usize> = AHashMap::with_capacity(n);
        for (i, candidate) in query.candidates().iter().enumerate() {
            let ancestor = self.taxonomy.ancestor_at(candidate, rank)?;
            match index.get(ancestor) {
                Some(&slot) => votes[slot].1 += 1,
                None => {
                    index.insert(ancestor, votes.len());
                    votes.push((ancestor, 1, i));
                }
            }
        }

        let mut best: Option<(&'a str, usize, usize)> = None;
        for vote in votes {
            if best.map_or(true, |b| vote.1 > b.1) {
                best = Some(vote);
            }
        }
        let (name, count, first_voter) = best.unwrap_or((UNCLASSIFIED, 0, 0));
        Ok(Consensus {
            name,
            votes: count,
            total: query.candidates().len(),
            first_voter,
        })
    }

    /// Bucket name of a query at a fixed rank, or `AMBIGUOUS_RANKS` when
    /// the candidates do not agree at `aggregate_rate`.
    pub fn aggregate_to_rank(&self, query: &Query, rank: Rank) -> Result<String> {
        if query.rank == rank {
            return Ok(match query.candidates() {
                [only] => only.clone(),
                _ => AMBIGUOUS_RANKS.to_string(),
            });
        }

        let consensus = self.consensus(query, rank)?;
        if consensus.total > 0 && consensus.fraction() >= self.aggregate_rate {
            Ok(consensus.name.to_string())
        } else {
            Ok(AMBIGUOUS_RANKS.to_string())
        }
    }

    /// Narrowest rank at which the candidates agree at `aggregate_rate` on a
    /// classified ancestor. A query agreeing nowhere is an
    /// `UnresolvableAmbiguity`, never a silent placement at the root.
    pub fn unique_rank(&self, query: &Query) -> Result<Placement> {
        if let [only] = query.candidates() {
            return Ok(Placement {
                rank: query.rank,
                name: only.clone(),
                tax_id: self.taxonomy.taxon_id(only)?,
            });
        }

        for rank in Rank::CONSENSUS_RANKS {
            let consensus = self.consensus(query, rank)?;
            if consensus.total > 0
                && consensus.fraction() >= self.aggregate_rate
                && consensus.name != UNCLASSIFIED
            {
                let voter = &query.candidates()[consensus.first_voter];
                let tax_id = self.taxonomy.ancestor_id_at(voter, rank)?.ok_or_else(|| {
                    Error::ConfigurationInconsistency {
                        name: consensus.name.to_string(),
                        table: "taxonomy",
                    }
                })?;
                return Ok(Placement {
                    rank,
                    name: consensus.name.to_string(),
                    tax_id,
                });
            }
        }

        Err(Error::UnresolvableAmbiguity {
            sample: self.samples[query.sample.0].clone(),
            read_id: query.read_id.clone(),
            candidates: query.candidates().join(","),
        })
    }

    /// Fixed-rank pass: each query's whole raw count goes to its bucket.
    pub fn aggregated_table(&self, store: &QueryStore, rank: Rank) -> Result<Vec<AggregatedNode>> {
        let mut buckets = NodeBuckets::new(self.samples.len());
        for query in store.queries() {
            let name = self.aggregate_to_rank(query, rank)?;
            let idx = buckets.bucket(&name, Some(rank), None);
            buckets.add_query_count(idx, query.sample, query.raw_count);
            buckets.add_estimate(idx, query.sample, query.raw_count);
        }
        Ok(buckets.into_sorted())
    }

    /// Narrowest-unique-rank pass over every query. Placements are computed
    /// in parallel and folded in store order. Unresolvable reads are
    /// collected and left out of the table; any other error aborts.
    pub fn tree_table(&self, store: &QueryStore) -> Result<(Vec<TreeTableRow>, Vec<UnresolvedQuery>)> {
        let placements: Vec<Result<Placement>> = store
            .queries()
            .par_iter()
            .map(|query| self.unique_rank(query))
            .collect();

        let mut buckets = NodeBuckets::new(self.samples.len());
        let mut unresolved = Vec::new();
        for (query, placement) in store.queries().iter().zip(placements) {
            match placement {
                Ok(p) => {
                    let idx = buckets.bucket(&p.name, Some(p.rank), Some(p.tax_id));
                    buckets.add_query_count(idx, query.sample, query.raw_count);
                    buckets.add_estimate(idx, query.sample, query.raw_count);
                }
                Err(Error::UnresolvableAmbiguity {
                    sample,
                    read_id,
                    candidates,
                }) => {
                    warn!("Read {} in {} has no consensus at any rank: {}", read_id, sample, candidates);
                    unresolved.push(UnresolvedQuery {
                        sample,
                        read_id,
                        candidates: query.candidates().to_vec(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        if !unresolved.is_empty() {
            info!("{} read(s) could not be placed at any rank", unresolved.len());
        }
        let rows = buckets
            .into_sorted()
            .into_iter()
            .filter_map(AggregatedNode::into_tree_row)
            .collect();
        Ok((rows, unresolved))
    }
}

/// Per-rank query/estimated counts: surviving species are grouped by their
/// ancestor at `rank`. A query adds its raw count once to every group one of
/// its candidates falls in, and its estimated count once per candidate.
pub fn rank_count_table(
    store: &QueryStore,
    registry: &SpeciesRegistry,
    lookup: &dyn AncestorLookup,
    rank: Rank,
) -> Result<Vec<AggregatedNode>> {
    let mut buckets = NodeBuckets::new(store.samples().len());

    // buckets first appear in species order
    for &sid in registry.ordered() {
        let ancestor = lookup.ancestor_at(&registry.get(sid).name, rank)?;
        buckets.bucket(ancestor, Some(rank), None);
    }

    let mut groups: Vec<usize> = Vec::new();
    for query in store.queries() {
        groups.clear();
        let estimate = query.estimated_count();
        for candidate in query.candidates() {
            let ancestor = lookup.ancestor_at(candidate, rank)?;
            let idx = buckets.bucket(ancestor, Some(rank), None);
            buckets.add_estimate(idx, query.sample, estimate);
            if !groups.contains(&idx) {
                groups.push(idx);
            }
        }
        for &idx in &groups {
            buckets.add_query_count(idx, query.sample, query.raw_count);
        }
    }

    Ok(buckets.into_sorted())
}

/// Raw counts per distinct read sequence. Reads without a sequence are skipped.
pub fn sequence_count_table(store: &QueryStore) -> Vec<AggregatedNode> {
    let mut buckets = NodeBuckets::new(store.samples().len());
    for query in store.queries() {
        if query.sequence.is_empty() {
            continue;
        }
        let idx = buckets.bucket(&query.sequence, None, None);
        buckets.add_query_count(idx, query.sample, query.raw_count);
    }
    buckets.into_sorted()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::species::tests::store_from;
    use crate::taxdb::tests::sample_index;
    use crate::taxdb::SpeciesLineage;
    use crate::types::QueryId;

    fn samples(store: &QueryStore) -> Vec<String> {
        store.samples().to_vec()
    }

    #[test]
    fn test_full_consensus_goes_to_genus() {
        let taxonomy = sample_index();
        let store = store_from(&[("s1", "r1", 7.0, &["spX", "spY"])]);
        let names = samples(&store);
        let agg = RankAggregator::new(&taxonomy, &names, 0.95);

        let q = store.get(QueryId(0));
        assert_eq!(agg.aggregate_to_rank(q, Rank::Genus).unwrap(), "G1");
        assert_eq!(agg.aggregate_to_rank(q, Rank::Species).unwrap(), AMBIGUOUS_RANKS);

        let table = agg.aggregated_table(&store, Rank::Genus).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].name, "G1");
        assert_eq!(table[0].query_counts, vec![Some(7.0)]);
    }

    #[test]
    fn test_split_genera_are_ambiguous() {
        let taxonomy = sample_index();
        let store = store_from(&[("s1", "r1", 3.0, &["spX", "spY", "spZ"])]);
        let names = samples(&store);
        let agg = RankAggregator::new(&taxonomy, &names, 0.95);
        let q = store.get(QueryId(0));

        let consensus = agg.consensus(q, Rank::Genus).unwrap();
        assert_eq!(consensus.name, "G1");
        assert_eq!(consensus.votes, 2);
        assert_eq!(agg.aggregate_to_rank(q, Rank::Genus).unwrap(), AMBIGUOUS_RANKS);
        // all three share family F1
        assert_eq!(agg.aggregate_to_rank(q, Rank::Family).unwrap(), "F1");

        // a lower threshold accepts the 2/3 majority
        let lenient = RankAggregator::new(&taxonomy, &names, 0.6);
        assert_eq!(lenient.aggregate_to_rank(q, Rank::Genus).unwrap(), "G1");
    }

    #[test]
    fn test_consensus_tie_prefers_first_seen() {
        let taxonomy = sample_index();
        let store = store_from(&[("s1", "r1", 1.0, &["spZ", "spX"])]);
        let names = samples(&store);
        let agg = RankAggregator::new(&taxonomy, &names, 0.5);
        let consensus = agg.consensus(store.get(QueryId(0)), Rank::Genus).unwrap();
        assert_eq!(consensus.name, "G2");
        assert_eq!(consensus.first_voter, 0);
    }

    #[test]
    fn test_unique_rank_narrowest_first() {
        let taxonomy = sample_index();
        let store = store_from(&[
            ("s1", "r1", 1.0, &["spX"]),
            ("s1", "r2", 1.0, &["spX", "spY"]),
            ("s1", "r3", 1.0, &["spX", "spZ"]),
            ("s1", "r4", 1.0, &["spX", "spW"]),
        ]);
        let names = samples(&store);
        let agg = RankAggregator::new(&taxonomy, &names, 0.95);

        let place = |i| agg.unique_rank(store.get(QueryId(i))).unwrap();
        assert_eq!(
            place(0),
            Placement { rank: Rank::Species, name: "spX".to_string(), tax_id: 100 }
        );
        assert_eq!(
            place(1),
            Placement { rank: Rank::Genus, name: "G1".to_string(), tax_id: 50 }
        );
        assert_eq!(
            place(2),
            Placement { rank: Rank::Family, name: "F1".to_string(), tax_id: 40 }
        );
        // spW has no genus..class: Unclassified never counts as consensus
        assert_eq!(
            place(3),
            Placement { rank: Rank::Superkingdom, name: "Bacteria".to_string(), tax_id: 2 }
        );
    }

    #[test]
    fn test_unresolvable_ambiguity_is_reported() {
        let mut nodes = vec![
            crate::taxdb::tests::node(1, 1, "root", "no rank"),
            crate::taxdb::tests::node(2, 1, "Bacteria", "superkingdom"),
            crate::taxdb::tests::node(3, 1, "Archaea", "superkingdom"),
        ];
        nodes.push(crate::taxdb::tests::node(10, 2, "b1", "species"));
        nodes.push(crate::taxdb::tests::node(11, 3, "a1", "species"));
        let taxonomy = TaxonomyIndex::from_nodes(nodes, true);

        let store = store_from(&[("s1", "r1", 4.0, &["b1", "a1"]), ("s1", "r2", 2.0, &["b1"])]);
        let names = samples(&store);
        let agg = RankAggregator::new(&taxonomy, &names, 0.95);

        let err = agg.unique_rank(store.get(QueryId(0))).unwrap_err();
        assert!(matches!(err, Error::UnresolvableAmbiguity { ref read_id, .. } if read_id == "r1"));

        let (rows, unresolved) = agg.tree_table(&store).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].feature, "b1");
        assert_eq!(rows[0].tax_id, 10);
        assert_eq!(rows[0].query_counts, vec![Some(2.0)]);
        assert_eq!(
            unresolved,
            vec![UnresolvedQuery {
                sample: "s1".to_string(),
                read_id: "r1".to_string(),
                candidates: vec!["b1".to_string(), "a1".to_string()],
            }]
        );
    }

    #[test]
    fn test_missing_species_is_fatal() {
        let taxonomy = sample_index();
        let store = store_from(&[("s1", "r1", 1.0, &["spX", "ghost"])]);
        let names = samples(&store);
        let agg = RankAggregator::new(&taxonomy, &names, 0.95);
        assert!(matches!(
            agg.tree_table(&store).unwrap_err(),
            Error::ConfigurationInconsistency { .. }
        ));
    }

    #[test]
    fn test_rank_count_table_conserves_mass() {
        let store = store_from(&[
            ("s1", "r1", 3.0, &["spX", "spY", "spZ"]),
            ("s1", "r2", 2.0, &["spZ"]),
            ("s2", "r1", 4.0, &["spX"]),
        ]);
        let registry = SpeciesRegistry::build(&store);
        let mut lineage = SpeciesLineage::default();
        lineage.insert("spX", &[(Rank::Genus, "G1")]);
        lineage.insert("spY", &[(Rank::Genus, "G1")]);
        lineage.insert("spZ", &[(Rank::Genus, "G2")]);

        let table = rank_count_table(&store, &registry, &lineage, Rank::Genus).unwrap();
        let g1 = table.iter().find(|n| n.name == "G1").unwrap();
        let g2 = table.iter().find(|n| n.name == "G2").unwrap();

        // r1 counted once per genus, not once per species
        assert_eq!(g1.query_counts, vec![Some(3.0), Some(4.0)]);
        assert_eq!(g2.query_counts, vec![Some(5.0), None]);
        assert_eq!(g1.estimated_counts, vec![Some(2.0), Some(4.0)]);
        assert_eq!(g2.estimated_counts, vec![Some(3.0), None]);
        assert_eq!(table[0].name, "G1");
    }

    #[test]
    fn test_sequence_count_table() {
        let mut store = QueryStore::new();
        let s1 = store.add_sample("s1").unwrap();
        let s2 = store.add_sample("s2").unwrap();
        store.add_query(s1, "r1", 2.0, "AAA", vec!["x".into()], Rank::Species).unwrap();
        store.add_query(s1, "r2", 5.0, "CCC", vec!["x".into()], Rank::Species).unwrap();
        store.add_query(s2, "r1", 1.0, "AAA", vec!["x".into()], Rank::Species).unwrap();
        store.add_query(s2, "r3", 9.0, "", vec!["x".into()], Rank::Species).unwrap();

        let table = sequence_count_table(&store);
        let rows: Vec<(&str, Vec<Option<RawCount>>)> =
            table.iter().map(|n| (n.name.as_str(), n.query_counts.clone())).collect();
        assert_eq!(
            rows,
            vec![("CCC", vec![Some(5.0), None]), ("AAA", vec![Some(2.0), Some(1.0)])]
        );
    }
}
