//src/taxdb.rs

use ahash::AHashMap;
use log::info;
use std::path::Path;

use crate::error::{Error, Result};
use crate::table_reader::for_each_line;
use crate::types::{Rank, UNCLASSIFIED};

/// Resolves a taxon name to the name of its ancestor at a given rank.
pub trait AncestorLookup: Sync {
    /// Ancestor name at `rank`, or `UNCLASSIFIED` when the lineage has no
    /// node at that rank. A name unknown to the table is a configuration error.
    fn ancestor_at(&self, name: &str, rank: Rank) -> Result<&str>;
}

/// One taxon with its precomputed ancestor at every rank of `Rank::ALL`.
#[derive(Debug, Clone)]
pub struct TaxonNode {
    pub id: u32,
    pub parent_id: u32,
    pub name: String,
    pub rank: String,
    pub ancestors: [Option<u32>; 8],
}

/// Read-only taxonomy lookup, built once from a flat table.
#[derive(Debug, Default)]
pub struct TaxonomyIndex {
    nodes: AHashMap<u32, TaxonNode>,
    /// Scientific name -> first taxon id carrying that name.
    name_map: AHashMap<String, u32>,
}

impl TaxonomyIndex {
    /// Parses a taxonomy table in the format:
    /// ```text
    /// Id\tParentId\tScientificName\tRank[\t<rank>...]
    /// ```
    /// The optional rank columns (named after ranks, e.g. `genus`) hold the
    /// ancestor id at that rank, empty when unclassified. Without them the
    /// ancestors are derived from the parent pointers.
    pub fn from_file<P: AsRef<Path>>(filepath: P) -> Result<Self> {
        let path = filepath.as_ref();
        let mut rank_columns: Vec<(usize, Rank)> = Vec::new();
        let mut nodes = Vec::new();

        for_each_line(path, |line_no, line| {
            let parts: Vec<&str> = line.split('\t').collect();
            if line_no == 1 {
                rank_columns = parts
                    .iter()
                    .enumerate()
                    .skip(4)
                    .filter_map(|(i, h)| h.trim().parse::<Rank>().ok().map(|r| (i, r)))
                    .collect();
                return Ok(());
            }
            if line.is_empty() {
                return Ok(());
            }
            if parts.len() < 4 {
                return Err(Error::malformed(path, line_no, "expected at least 4 columns"));
            }

            let id = parse_taxid(parts[0], path, line_no)?;
            let parent_id = parse_taxid(parts[1], path, line_no)?;
            let mut ancestors = [None; 8];
            for &(col, rank) in &rank_columns {
                let value = parts.get(col).map(|v| v.trim()).unwrap_or("");
                if !value.is_empty() {
                    ancestors[rank.index()] = Some(parse_taxid(value, path, line_no)?);
                }
            }

            nodes.push(TaxonNode {
                id,
                parent_id,
                name: parts[2].trim().to_string(),
                rank: parts[3].trim().to_string(),
                ancestors,
            });
            Ok(())
        })?;

        let derive = rank_columns.is_empty();
        let index = Self::from_nodes(nodes, derive);
        info!(
            "Loaded {} taxa from {}{}",
            index.nodes.len(),
            path.display(),
            if derive { " (ancestors derived from parents)" } else { "" }
        );
        Ok(index)
    }

    /// Build an index from already parsed nodes. With `derive_ancestors`, each
    /// node's ancestor columns are recomputed by walking parent pointers.
    pub fn from_nodes(nodes: Vec<TaxonNode>, derive_ancestors: bool) -> Self {
        let mut name_map = AHashMap::with_capacity(nodes.len());
        for node in &nodes {
            name_map.entry(node.name.clone()).or_insert(node.id);
        }
        let mut node_map: AHashMap<u32, TaxonNode> =
            nodes.into_iter().map(|n| (n.id, n)).collect();

        if derive_ancestors {
            let derived: Vec<(u32, [Option<u32>; 8])> = node_map
                .keys()
                .map(|&id| (id, walk_ancestors(&node_map, id)))
                .collect();
            for (id, ancestors) in derived {
                if let Some(node) = node_map.get_mut(&id) {
                    node.ancestors = ancestors;
                }
            }
        }

        Self {
            nodes: node_map,
            name_map,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Taxon id registered for a scientific name.
    pub fn taxon_id(&self, name: &str) -> Result<u32> {
        self.name_map
            .get(name)
            .copied()
            .ok_or_else(|| Error::ConfigurationInconsistency {
                name: name.to_string(),
                table: "taxonomy",
            })
    }

    /// Ancestor id at `rank`, `None` when unclassified at that rank.
    pub fn ancestor_id_at(&self, name: &str, rank: Rank) -> Result<Option<u32>> {
        let taxid = self.taxon_id(name)?;
        Ok(self
            .nodes
            .get(&taxid)
            .and_then(|n| n.ancestors[rank.index()])
            .filter(|a| self.nodes.contains_key(a)))
    }
}

impl AncestorLookup for TaxonomyIndex {
    fn ancestor_at(&self, name: &str, rank: Rank) -> Result<&str> {
        Ok(match self.ancestor_id_at(name, rank)? {
            Some(aid) => self.nodes[&aid].name.as_str(),
            None => UNCLASSIFIED,
        })
    }
}

fn parse_taxid(value: &str, path: &Path, line_no: usize) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::malformed(path, line_no, format!("invalid taxonomy id '{}'", value)))
}

/// Walk from `taxid` to the root, recording the nearest node of each rank.
/// Ranks with no node on the path stay `None`.
fn walk_ancestors(nodes: &AHashMap<u32, TaxonNode>, taxid: u32) -> [Option<u32>; 8] {
    let mut ancestors = [None; 8];
    let mut current = taxid;
    // bounded by the number of nodes in case of a malformed cycle
    for _ in 0..=nodes.len() {
        let Some(node) = nodes.get(&current) else { break };
        if let Ok(rank) = node.rank.parse::<Rank>() {
            ancestors[rank.index()].get_or_insert(node.id);
        }
        if node.parent_id == node.id {
            break; // root
        }
        current = node.parent_id;
    }
    ancestors
}

/// Species name -> ancestor names, loaded from the species lineage table.
#[derive(Debug, Default)]
pub struct SpeciesLineage {
    lineages: AHashMap<String, [Option<String>; 8]>,
}

impl SpeciesLineage {
    /// Parses a species file with a header line. The species name is read
    /// from `species_column`; every other column whose header is a rank name
    /// supplies the ancestor name at that rank. The first row for a species wins.
    pub fn from_file<P: AsRef<Path>>(filepath: P, species_column: &str) -> Result<Self> {
        let path = filepath.as_ref();
        let mut species_idx = None;
        let mut rank_columns: Vec<(usize, Rank)> = Vec::new();
        let mut lineages: AHashMap<String, [Option<String>; 8]> = AHashMap::new();

        for_each_line(path, |line_no, line| {
            let parts: Vec<&str> = line.split('\t').collect();
            if line_no == 1 {
                let headers: Vec<&str> = parts.iter().map(|h| h.trim()).collect();
                species_idx = headers.iter().position(|h| *h == species_column);
                if species_idx.is_none() {
                    return Err(Error::malformed(
                        path,
                        line_no,
                        format!("no '{}' column in header", species_column),
                    ));
                }
                rank_columns = headers
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| Some(*i) != species_idx)
                    .filter_map(|(i, h)| h.parse::<Rank>().ok().map(|r| (i, r)))
                    .filter(|(_, r)| *r != Rank::Species)
                    .collect();
                return Ok(());
            }
            if line.is_empty() {
                return Ok(());
            }

            let Some(species) = species_idx.and_then(|i| parts.get(i)) else {
                return Err(Error::malformed(path, line_no, "missing species column"));
            };
            let species = species.trim();
            if lineages.contains_key(species) {
                return Ok(());
            }

            let mut names: [Option<String>; 8] = Default::default();
            names[Rank::Species.index()] = Some(species.to_string());
            for &(col, rank) in &rank_columns {
                let value = parts.get(col).map(|v| v.trim()).unwrap_or("");
                if !value.is_empty() {
                    names[rank.index()] = Some(value.to_string());
                }
            }
            lineages.insert(species.to_string(), names);
            Ok(())
        })?;

        info!("Loaded lineage of {} species from {}", lineages.len(), path.display());
        Ok(Self { lineages })
    }

    pub fn insert(&mut self, species: &str, ancestors: &[(Rank, &str)]) {
        let mut names: [Option<String>; 8] = Default::default();
        names[Rank::Species.index()] = Some(species.to_string());
        for (rank, name) in ancestors {
            names[rank.index()] = Some(name.to_string());
        }
        self.lineages.insert(species.to_string(), names);
    }

    pub fn len(&self) -> usize {
        self.lineages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lineages.is_empty()
    }
}

impl AncestorLookup for SpeciesLineage {
    fn ancestor_at(&self, name: &str, rank: Rank) -> Result<&str> {
        let names = self
            .lineages
            .get(name)
            .ok_or_else(|| Error::ConfigurationInconsistency {
                name: name.to_string(),
                table: "species lineage",
            })?;
        Ok(names[rank.index()].as_deref().unwrap_or(UNCLASSIFIED))
    }
}
