pub mod identical;
pub mod subset;

use log::info;

use crate::error::Result;
use crate::query_store::QueryStore;
use crate::species::SpeciesRegistry;

pub use identical::merge_identical;
pub use subset::{flag_subsets, remove_subset_species};

/// What the disambiguation phase changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisambiguationSummary {
    pub species: usize,
    pub subset_removed: usize,
    pub identical_merged: usize,
}

/// Single-threaded mutation phase over the global species list:
///  1) flag subset species
///  2) prune them from query candidate lists and the working list
///  3) merge identical species
///  4) recompute per-species estimated counts from the pruned lists
pub fn disambiguate(registry: &mut SpeciesRegistry, store: &mut QueryStore) -> Result<DisambiguationSummary> {
    let species = registry.len();
    info!("Disambiguating {} species over {} queries", species, store.len());

    flag_subsets(registry);
    let subset_removed = remove_subset_species(registry, store)?;
    let identical_merged = merge_identical(registry);
    registry.finalize_estimates(store);

    Ok(DisambiguationSummary {
        species,
        subset_removed,
        identical_merged,
    })
}
