//src/tables.rs

use std::fmt::Write as _;
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{CountTableRow, RawCount, TreeTableRow, UnresolvedQuery};

fn header(first: &str, samples: &[String]) -> String {
    let mut out = String::from(first);
    for sample in samples {
        out.push('\t');
        out.push_str(sample);
    }
    out.push('\n');
    out
}

/// Whole counts print as integers, fractional ones as they are.
fn push_query_cells(out: &mut String, cells: &[Option<RawCount>]) {
    for cell in cells {
        match cell {
            Some(v) if v.fract() == 0.0 => {
                let _ = write!(out, "\t{:.0}", v);
            }
            Some(v) => {
                let _ = write!(out, "\t{}", v);
            }
            None => out.push_str("\t0"),
        }
    }
}

fn push_estimated_cells(out: &mut String, cells: &[Option<f64>]) {
    for cell in cells {
        match cell {
            Some(v) => {
                let _ = write!(out, "\t{:.2}", v);
            }
            None => out.push_str("\t0"),
        }
    }
}

/// `Feature<TAB>sample...` table of summed raw counts.
pub fn format_query_table(samples: &[String], rows: &[CountTableRow]) -> String {
    let mut out = header("Feature", samples);
    for row in rows {
        out.push_str(&row.feature);
        push_query_cells(&mut out, &row.query_counts);
        out.push('\n');
    }
    out
}

/// `Feature<TAB>sample...` table of estimated counts, two decimals.
pub fn format_estimated_table(samples: &[String], rows: &[CountTableRow]) -> String {
    let mut out = header("Feature", samples);
    for row in rows {
        out.push_str(&row.feature);
        push_estimated_cells(&mut out, &row.estimated_counts);
        out.push('\n');
    }
    out
}

/// Cross-rank table: name, taxonomy id and rank ahead of the sample columns.
pub fn format_tree_table(samples: &[String], rows: &[TreeTableRow]) -> String {
    let mut out = header("Feature\tTaxonomyId\tRank", samples);
    for row in rows {
        let _ = write!(out, "{}\t{}\t{}", row.feature, row.tax_id, row.rank);
        push_query_cells(&mut out, &row.query_counts);
        out.push('\n');
    }
    out
}

pub fn format_shannon(samples: &[String], values: &[f64]) -> String {
    let mut out = String::from("sample,shannon\n");
    for (sample, value) in samples.iter().zip(values) {
        let _ = writeln!(out, "{},{}", sample, value);
    }
    out
}

pub fn format_unresolved(unresolved: &[UnresolvedQuery]) -> String {
    let mut out = String::from("Sample\tRead\tCandidates\n");
    for u in unresolved {
        let _ = writeln!(out, "{}\t{}\t{}", u.sample, u.read_id, u.candidates.join(","));
    }
    out
}

pub fn write_table<P: AsRef<Path>>(path: P, text: &str) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, text).map_err(|e| Error::io(path, e))?;
    log::info!("Wrote {}", path.display());
    Ok(())
}
