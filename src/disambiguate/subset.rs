use log::{debug, info};

use crate::error::{Error, Result};
use crate::query_store::QueryStore;
use crate::species::SpeciesRegistry;
use crate::types::QueryId;

/// Flag every species whose reads are fully explained by another species
/// with at least as much evidence in every sample.
///
/// The working list is descending by total count, so for `i < j` species `i`
/// can only contain `j`, except when both totals are equal: then the later
/// species may contain the earlier one and both directions are tested.
/// A pair that contains each other both ways has identical evidence and is
/// left to identical merging. Returns the number of flagged species.
pub fn flag_subsets(registry: &mut SpeciesRegistry) -> usize {
    let order = registry.ordered().to_vec();
    let mut flagged = 0;

    for i in 0..order.len() {
        if registry.get(order[i]).is_subset {
            continue;
        }
        if i % 100 == 0 {
            info!("checking subset: {} / {}", i + 1, order.len());
        }

        for j in (i + 1)..order.len() {
            let (a, b) = (registry.get(order[i]), registry.get(order[j]));
            if b.is_subset {
                continue;
            }

            let a_contains_b = a.contains(b);
            let b_contains_a = a.query_count == b.query_count && b.contains(a);
            if a_contains_b && !b_contains_a {
                debug!("{} is a subset of {}", b.name, a.name);
                registry.get_mut(order[j]).is_subset = true;
                flagged += 1;
            } else if b_contains_a && !a_contains_b {
                debug!("{} is a subset of {}", a.name, b.name);
                registry.get_mut(order[i]).is_subset = true;
                flagged += 1;
                break;
            }
        }
    }

    flagged
}

/// Remove every subset-flagged species name from the candidate lists of the
/// queries that referenced it, then drop the flagged species from the
/// working list. Fails if a query is left without candidates.
pub fn remove_subset_species(registry: &mut SpeciesRegistry, store: &mut QueryStore) -> Result<usize> {
    let mut touched: Vec<QueryId> = Vec::new();

    for &sid in registry.ordered() {
        let species = registry.get(sid);
        if !species.is_subset {
            continue;
        }
        for sq in species.samples.values() {
            for &qid in &sq.queries {
                if store.get_mut(qid).remove_candidate(&species.name) {
                    touched.push(qid);
                }
            }
        }
    }

    for qid in touched {
        let query = store.get(qid);
        if query.candidates().is_empty() {
            return Err(Error::EmptyCandidates {
                sample: store.sample_name(query.sample).to_string(),
                read_id: query.read_id.clone(),
            });
        }
    }

    let before = registry.ordered().len();
    registry.retain_order(|s| !s.is_subset);
    let removed = before - registry.ordered().len();
    info!("{} subset were removed", removed);
    Ok(removed)
}
