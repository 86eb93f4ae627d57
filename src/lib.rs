// src/lib.rs
pub mod types;
pub mod error;
pub mod table_reader;
pub mod taxdb;
pub mod query_store;
pub mod species;
pub mod disambiguate;
pub mod aggregate;
pub mod diversity;
pub mod tables;
pub mod config;

use log::info;
use rayon::prelude::*;

use crate::aggregate::{rank_count_table, sequence_count_table, AggregatedNode, RankAggregator};
use crate::config::{read_sample_list, CountTableConfig, SampleEntry};
use crate::disambiguate::{disambiguate, DisambiguationSummary};
use crate::diversity::shannon_index;
use crate::error::{Error, Result};
use crate::query_store::{parse_count_file, QueryRecord, QueryStore};
use crate::species::SpeciesRegistry;
use crate::tables::{
    format_estimated_table, format_query_table, format_shannon, format_tree_table,
    format_unresolved, write_table,
};
use crate::taxdb::{AncestorLookup, SpeciesLineage, TaxonomyIndex};
use crate::types::{CountTableRow, Rank, TreeTableRow, UnresolvedQuery};

/// Everything one count-table run produces. Only structured rows are kept;
/// table text is rendered on demand.
#[derive(Debug, Clone)]
pub struct CountTableResults {
    /// Sample names, in column order
    pub samples: Vec<String>,
    pub sequence_rows: Vec<CountTableRow>,
    pub species_rows: Vec<CountTableRow>,
    /// Query/estimated tables for genus..phylum, in `Rank::TABLE_RANKS` order
    pub rank_rows: Vec<(Rank, Vec<CountTableRow>)>,
    /// Fixed-rank consensus tables, in `Rank::AGGREGATED_RANKS` order
    pub aggregated_rows: Vec<(Rank, Vec<CountTableRow>)>,
    pub tree_rows: Vec<TreeTableRow>,
    /// Shannon index of the species estimated counts, one per sample
    pub shannon: Vec<f64>,
    pub unresolved: Vec<UnresolvedQuery>,
    pub summary: DisambiguationSummary,
}

impl CountTableResults {
    pub fn get_sequence_table(&self) -> String {
        format_query_table(&self.samples, &self.sequence_rows)
    }

    pub fn get_species_query_table(&self) -> String {
        format_query_table(&self.samples, &self.species_rows)
    }

    pub fn get_species_estimated_table(&self) -> String {
        format_estimated_table(&self.samples, &self.species_rows)
    }

    pub fn get_rank_query_table(&self, rank: Rank) -> Option<String> {
        find_rows(&self.rank_rows, rank).map(|rows| format_query_table(&self.samples, rows))
    }

    pub fn get_rank_estimated_table(&self, rank: Rank) -> Option<String> {
        find_rows(&self.rank_rows, rank).map(|rows| format_estimated_table(&self.samples, rows))
    }

    /// Aggregated tables carry each read's full raw count, so only the query form is rendered.
    pub fn get_aggregated_table(&self, rank: Rank) -> Option<String> {
        find_rows(&self.aggregated_rows, rank).map(|rows| format_query_table(&self.samples, rows))
    }

    pub fn get_tree_table(&self) -> String {
        format_tree_table(&self.samples, &self.tree_rows)
    }

    pub fn get_shannon(&self) -> String {
        format_shannon(&self.samples, &self.shannon)
    }

    pub fn get_unresolved(&self) -> String {
        format_unresolved(&self.unresolved)
    }

    /// Writes every table next to the configured output prefix.
    pub fn write_outputs(&self, config: &CountTableConfig) -> Result<()> {
        write_table(config.output_path("sequence.count"), &self.get_sequence_table())?;
        write_table(config.output_path("species.query.count"), &self.get_species_query_table())?;
        write_table(
            config.output_path("species.estimated.count"),
            &self.get_species_estimated_table(),
        )?;

        for (rank, rows) in &self.rank_rows {
            write_table(
                config.output_path(&format!("{}.query.count", rank)),
                &format_query_table(&self.samples, rows),
            )?;
            write_table(
                config.output_path(&format!("{}.estimated.count", rank)),
                &format_estimated_table(&self.samples, rows),
            )?;
        }
        for (rank, rows) in &self.aggregated_rows {
            write_table(
                config.output_path(&format!("{}.aggregated.count", rank)),
                &format_query_table(&self.samples, rows),
            )?;
        }

        write_table(config.output_path("tree.count"), &self.get_tree_table())?;
        write_table(config.output_path("shannon.csv"), &self.get_shannon())?;
        write_table(config.output_path("unresolved.txt"), &self.get_unresolved())?;
        Ok(())
    }
}

fn find_rows(tables: &[(Rank, Vec<CountTableRow>)], rank: Rank) -> Option<&[CountTableRow]> {
    tables
        .iter()
        .find(|(r, _)| *r == rank)
        .map(|(_, rows)| rows.as_slice())
}

fn into_count_rows(nodes: Vec<AggregatedNode>) -> Vec<CountTableRow> {
    nodes.into_iter().map(AggregatedNode::into_count_row).collect()
}

/// Parses every sample's count file in parallel, then joins them into one
/// store in sample-list order.
pub fn load_query_store(entries: &[SampleEntry]) -> Result<QueryStore> {
    let parsed: Vec<Result<Vec<QueryRecord>>> = entries
        .par_iter()
        .map(|entry| parse_count_file(&entry.count_file))
        .collect();

    let mut store = QueryStore::new();
    for (entry, records) in entries.iter().zip(parsed) {
        let records = records?;
        let sample = store.add_sample(&entry.sample)?;
        info!("Sample {}: {} reads from {}", entry.sample, records.len(), entry.count_file.display());
        for record in records {
            store.add_query(
                sample,
                &record.read_id,
                record.raw_count,
                &record.sequence,
                record.candidates,
                Rank::Species,
            )?;
        }
    }
    Ok(store)
}

/// Builds every table from an already-loaded store. Per-rank query and
/// estimated tables use `lineage` when given and the taxonomy otherwise.
pub fn build_count_tables(
    mut store: QueryStore,
    taxonomy: &TaxonomyIndex,
    lineage: Option<&SpeciesLineage>,
    aggregate_rate: f64,
) -> Result<CountTableResults> {
    config::validate_aggregate_rate(aggregate_rate)?;
    let samples = store.samples().to_vec();
    let n_samples = samples.len();

    // 1. Raw sequence counts, independent of candidate lists
    let sequence_rows = into_count_rows(sequence_count_table(&store));

    // 2. Species registry and disambiguation
    let mut registry = SpeciesRegistry::build(&store);
    info!("{} species referenced by {} reads", registry.len(), store.len());

    // every referenced species must be known to the lookup tables, including
    // those disambiguation is about to drop
    for species in registry.iter() {
        taxonomy.taxon_id(&species.name)?;
        if let Some(lineage) = lineage {
            lineage.ancestor_at(&species.name, Rank::Species)?;
        }
    }

    let summary = disambiguate(&mut registry, &mut store)?;
    info!(
        "{} subset species removed, {} identical species merged",
        summary.subset_removed, summary.identical_merged
    );

    let species_rows = registry.table_rows(n_samples);
    let shannon = shannon_index(&species_rows, n_samples);

    // 3. Per-rank query/estimated tables
    let lookup: &dyn AncestorLookup = match lineage {
        Some(lineage) => lineage,
        None => taxonomy,
    };
    let rank_rows = Rank::TABLE_RANKS
        .par_iter()
        .map(|&rank| {
            rank_count_table(&store, &registry, lookup, rank).map(|nodes| (rank, into_count_rows(nodes)))
        })
        .collect::<Result<Vec<_>>>()?;

    // 4. Fixed-rank consensus tables
    let aggregator = RankAggregator::new(taxonomy, &samples, aggregate_rate);
    let aggregated_rows = Rank::AGGREGATED_RANKS
        .par_iter()
        .map(|&rank| {
            aggregator
                .aggregated_table(&store, rank)
                .map(|nodes| (rank, into_count_rows(nodes)))
        })
        .collect::<Result<Vec<_>>>()?;

    // 5. Narrowest-unique-rank tree
    let (tree_rows, unresolved) = aggregator.tree_table(&store)?;

    Ok(CountTableResults {
        samples,
        sequence_rows,
        species_rows,
        rank_rows,
        aggregated_rows,
        tree_rows,
        shannon,
        unresolved,
        summary,
    })
}

/// Unified entry point: load the configured inputs and build every table.
/// Nothing is written; see `CountTableResults::write_outputs`.
pub fn count_table(config: &CountTableConfig) -> Result<CountTableResults> {
    config.validate()?;

    // 1. Inputs
    let entries = read_sample_list(&config.sample_list)?;
    let taxonomy = TaxonomyIndex::from_file(&config.taxonomy_file)?;
    info!("Loaded {} taxonomy nodes", taxonomy.len());
    let lineage = match &config.species_file {
        Some(path) => {
            let lineage = SpeciesLineage::from_file(path, &config.species_column)?;
            info!("Loaded lineage of {} species", lineage.len());
            Some(lineage)
        }
        None => None,
    };
    let store = load_query_store(&entries)?;

    // 2. Tables
    let results = build_count_tables(store, &taxonomy, lineage.as_ref(), config.aggregate_rate)?;

    if config.strict && !results.unresolved.is_empty() {
        return Err(Error::UnresolvedReads(results.unresolved.len()));
    }
    Ok(results)
}
