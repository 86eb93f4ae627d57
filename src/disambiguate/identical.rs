use log::{debug, info};

use crate::species::SpeciesRegistry;

/// Merge species with exactly the same reads in every sample. The later
/// species is flagged identical and appended to the earlier one's peers.
/// Runs on the subset-filtered list; returns the number of merged species.
pub fn merge_identical(registry: &mut SpeciesRegistry) -> usize {
    let order = registry.ordered().to_vec();
    let mut merged = 0;

    for i in 0..order.len() {
        if registry.get(order[i]).is_identical {
            continue;
        }
        if i % 100 == 0 {
            info!("checking identical: {} / {}", i + 1, order.len());
        }

        for j in (i + 1)..order.len() {
            let (a, b) = (registry.get(order[i]), registry.get(order[j]));
            if b.is_identical {
                continue;
            }
            // list is sorted by total count: no later species can match
            if a.query_count != b.query_count {
                break;
            }
            if a.has_same_evidence(b) {
                debug!("{} is identical to {}", b.name, a.name);
                registry.get_mut(order[j]).is_identical = true;
                registry.get_mut(order[i]).identical_species.push(order[j]);
                merged += 1;
            }
        }
    }

    info!("{} identical species were found", merged);
    merged
}
