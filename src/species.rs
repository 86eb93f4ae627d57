//src/species.rs

use ahash::{AHashMap, AHashSet};
use std::collections::BTreeMap;

use crate::query_store::QueryStore;
use crate::types::{CountTableRow, QueryId, Rank, RawCount, SampleId, SpeciesId};

/// Reads of one species inside one sample.
#[derive(Default, Debug, Clone)]
pub struct SampleQueries {
    /// Owning queries, in store order
    pub queries: Vec<QueryId>,
    /// Same ids as a set, for subset tests
    pub query_set: AHashSet<QueryId>,
    /// Sum of raw counts of `queries`
    pub query_count: RawCount,
    /// Sum of estimated counts, scaled by the number of merged peers
    pub estimated_count: f64,
}

/// One named taxon observed at the queries' declared rank.
#[derive(Debug, Clone)]
pub struct Species {
    pub name: String,
    pub rank: Rank,
    pub samples: BTreeMap<SampleId, SampleQueries>,
    pub is_subset: bool,
    pub is_identical: bool,
    /// Indistinguishable peers merged into this species, in merge order
    pub identical_species: Vec<SpeciesId>,
    pub query_count: RawCount,
    pub estimated_count: f64,
}

impl Species {
    pub fn new(name: &str, rank: Rank) -> Self {
        Self {
            name: name.to_string(),
            rank,
            samples: BTreeMap::new(),
            is_subset: false,
            is_identical: false,
            identical_species: Vec::new(),
            query_count: 0.0,
            estimated_count: 0.0,
        }
    }

    fn add_query(&mut self, sample: SampleId, query: QueryId) {
        let entry = self.samples.entry(sample).or_default();
        entry.queries.push(query);
        entry.query_set.insert(query);
    }

    fn sum_query_count(&mut self, store: &QueryStore) {
        for sq in self.samples.values_mut() {
            sq.query_count = sq.queries.iter().map(|&q| store.get(q).raw_count).sum();
        }
        self.query_count = self.samples.values().map(|sq| sq.query_count).sum();
    }

    /// Number of original species this feature stands for.
    pub fn num_of_species(&self) -> usize {
        self.identical_species.len() + 1
    }

    pub fn sample_query_count(&self, sample: SampleId) -> Option<RawCount> {
        self.samples.get(&sample).map(|sq| sq.query_count)
    }

    pub fn sample_estimated_count(&self, sample: SampleId) -> Option<f64> {
        self.samples.get(&sample).map(|sq| sq.estimated_count)
    }

    /// `self` contains `other` when, in every sample of `other`, `self` is
    /// present with at least the same raw count and a superset of its reads.
    pub fn contains(&self, other: &Species) -> bool {
        other.samples.iter().all(|(sample, theirs)| match self.samples.get(sample) {
            Some(ours) => {
                ours.query_count >= theirs.query_count
                    && theirs.query_set.iter().all(|q| ours.query_set.contains(q))
            }
            None => false,
        })
    }

    /// Exactly the same reads in exactly the same samples.
    pub fn has_same_evidence(&self, other: &Species) -> bool {
        self.query_count == other.query_count
            && self.samples.len() == other.samples.len()
            && self.samples.iter().all(|(sample, ours)| {
                other
                    .samples
                    .get(sample)
                    .map(|theirs| theirs.query_set == ours.query_set)
                    .unwrap_or(false)
            })
    }
}

/// Arena of every species referenced by the store's candidate lists.
#[derive(Debug, Default)]
pub struct SpeciesRegistry {
    species: Vec<Species>,
    name_map: AHashMap<String, SpeciesId>,
    /// Working list, descending by total raw count. Shrinks when subset
    /// species are filtered out; the arena itself never does.
    order: Vec<SpeciesId>,
}

impl SpeciesRegistry {
    /// Attach every query to each of its candidate species, creating species
    /// on first reference, then sort descending by total raw count. Ties keep
    /// first-seen order.
    pub fn build(store: &QueryStore) -> Self {
        let mut registry = SpeciesRegistry::default();

        for (qid, query) in store.iter() {
            for name in query.candidates() {
                let sid = match registry.name_map.get(name).copied() {
                    Some(sid) => sid,
                    None => {
                        let sid = SpeciesId(registry.species.len());
                        registry.species.push(Species::new(name, query.rank));
                        registry.name_map.insert(name.clone(), sid);
                        sid
                    }
                };
                registry.species[sid.0].add_query(query.sample, qid);
            }
        }

        for species in registry.species.iter_mut() {
            species.sum_query_count(store);
        }

        let mut order: Vec<SpeciesId> = (0..registry.species.len()).map(SpeciesId).collect();
        order.sort_by(|a, b| {
            let (a, b) = (&registry.species[a.0], &registry.species[b.0]);
            b.query_count.total_cmp(&a.query_count)
        });
        registry.order = order;
        registry
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    pub fn get(&self, id: SpeciesId) -> &Species {
        &self.species[id.0]
    }

    pub fn get_mut(&mut self, id: SpeciesId) -> &mut Species {
        &mut self.species[id.0]
    }

    /// Every species ever referenced, in first-seen order, including those
    /// later flagged subset or identical.
    pub fn iter(&self) -> impl Iterator<Item = &Species> {
        self.species.iter()
    }

    pub fn find(&self, name: &str) -> Option<SpeciesId> {
        self.name_map.get(name).copied()
    }

    /// Current working list in descending count order.
    pub fn ordered(&self) -> &[SpeciesId] {
        &self.order
    }

    pub(crate) fn retain_order<F: Fn(&Species) -> bool>(&mut self, keep: F) {
        let species = &self.species;
        self.order.retain(|sid| keep(&species[sid.0]));
    }

    /// Surviving species that are reported as rows (merged peers are folded
    /// into their representative).
    pub fn reported(&self) -> impl Iterator<Item = (SpeciesId, &Species)> {
        self.order
            .iter()
            .map(move |&sid| (sid, &self.species[sid.0]))
            .filter(|(_, s)| !s.is_subset && !s.is_identical)
    }

    /// Row label: the species name followed by its merged peers, comma-joined.
    pub fn feature_name(&self, id: SpeciesId) -> String {
        let species = self.get(id);
        let mut name = species.name.clone();
        for peer in &species.identical_species {
            name.push(',');
            name.push_str(&self.species[peer.0].name);
        }
        name
    }

    /// One row per reported species, in working-list order.
    pub fn table_rows(&self, n_samples: usize) -> Vec<CountTableRow> {
        self.reported()
            .map(|(sid, species)| CountTableRow {
                feature: self.feature_name(sid),
                query_counts: (0..n_samples)
                    .map(|i| species.sample_query_count(SampleId(i)))
                    .collect(),
                estimated_counts: (0..n_samples)
                    .map(|i| species.sample_estimated_count(SampleId(i)))
                    .collect(),
            })
            .collect()
    }

    /// Per-sample estimate of every reported species:
    /// `(1 + |identical|) * sum(estimated count of its queries in the sample)`.
    /// Must run after disambiguation so candidate lists are final.
    pub fn finalize_estimates(&mut self, store: &QueryStore) {
        let reported: Vec<SpeciesId> = self.reported().map(|(sid, _)| sid).collect();
        for sid in reported {
            let species = &mut self.species[sid.0];
            let nos = species.num_of_species() as f64;
            for sq in species.samples.values_mut() {
                let sum: f64 = sq.queries.iter().map(|&q| store.get(q).estimated_count()).sum();
                sq.estimated_count = nos * sum;
            }
            species.estimated_count = species.samples.values().map(|sq| sq.estimated_count).sum();
        }
    }
}
