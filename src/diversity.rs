use crate::types::CountTableRow;

/// Shannon diversity index `-sum(p * ln p)` of every sample column of an
/// estimated-count table. Empty cells and zero counts do not contribute.
pub fn shannon_index(rows: &[CountTableRow], n_samples: usize) -> Vec<f64> {
    (0..n_samples)
        .map(|s| {
            let values: Vec<f64> = rows
                .iter()
                .filter_map(|r| r.estimated_counts.get(s).copied().flatten())
                .filter(|v| *v > 0.0)
                .collect();
            let total: f64 = values.iter().sum();
            if total <= 0.0 {
                return 0.0;
            }
            values
                .iter()
                .map(|v| {
                    let p = v / total;
                    -(p * p.ln())
                })
                .sum()
        })
        .collect()
}
