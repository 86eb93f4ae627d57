use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::table_reader::for_each_line;

pub const DEFAULT_AGGREGATE_RATE: f64 = 0.95;
pub const DEFAULT_SPECIES_COLUMN: &str = "species";

/// One line of the sample list: a count table and the sample it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleEntry {
    pub count_file: PathBuf,
    pub sample: String,
}

/// Everything one `count_table` run needs.
#[derive(Debug, Clone)]
pub struct CountTableConfig {
    pub sample_list: PathBuf,
    pub taxonomy_file: PathBuf,
    /// Lineage table for the per-rank count tables; the taxonomy is used when absent
    pub species_file: Option<PathBuf>,
    pub species_column: String,
    /// Minimum consensus fraction to collapse candidates onto one rank bucket
    pub aggregate_rate: f64,
    pub output_prefix: PathBuf,
    /// Fail the run when any read cannot be placed at any rank
    pub strict: bool,
}

impl CountTableConfig {
    pub fn new(sample_list: PathBuf, taxonomy_file: PathBuf, output_prefix: PathBuf) -> Self {
        Self {
            sample_list,
            taxonomy_file,
            species_file: None,
            species_column: DEFAULT_SPECIES_COLUMN.to_string(),
            aggregate_rate: DEFAULT_AGGREGATE_RATE,
            output_prefix,
            strict: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_aggregate_rate(self.aggregate_rate)?;
        if self.species_column.trim().is_empty() {
            return Err(Error::InvalidConfig("species column must not be empty".to_string()));
        }
        Ok(())
    }

    /// `<prefix>.<suffix>`
    pub fn output_path(&self, suffix: &str) -> PathBuf {
        let mut name = self.output_prefix.clone().into_os_string();
        name.push(".");
        name.push(suffix);
        PathBuf::from(name)
    }
}

pub fn validate_aggregate_rate(rate: f64) -> Result<()> {
    if rate.is_nan() || rate <= 0.0 || rate > 1.0 {
        return Err(Error::InvalidConfig(format!(
            "aggregate rate must be in (0, 1], got {}",
            rate
        )));
    }
    Ok(())
}

/// Reads `count_file<TAB>sample` lines. Blank lines and `#` comments are
/// skipped; relative count file paths resolve against the list's directory.
pub fn read_sample_list<P: AsRef<Path>>(path: P) -> Result<Vec<SampleEntry>> {
    let path = path.as_ref();
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut entries = Vec::new();

    for_each_line(path, |line_no, line| {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(());
        }
        let parts: Vec<&str> = line.split('\t').map(str::trim).collect();
        if parts.len() < 2 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(Error::malformed(path, line_no, "expected <count file>\\t<sample>"));
        }
        let file = PathBuf::from(parts[0]);
        let count_file = if file.is_absolute() { file } else { base.join(file) };
        entries.push(SampleEntry {
            count_file,
            sample: parts[1].to_string(),
        });
        Ok(())
    })?;

    if entries.is_empty() {
        return Err(Error::InvalidConfig(format!("no samples listed in {}", path.display())));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_rate_bounds() {
        assert!(validate_aggregate_rate(0.95).is_ok());
        assert!(validate_aggregate_rate(1.0).is_ok());
        assert!(validate_aggregate_rate(0.0).is_err());
        assert!(validate_aggregate_rate(1.2).is_err());
        assert!(validate_aggregate_rate(f64::NAN).is_err());
    }

    #[test]
    fn test_output_path() {
        let cfg = CountTableConfig::new("l".into(), "t".into(), "/out/run1".into());
        assert_eq!(cfg.output_path("species.query.count"), PathBuf::from("/out/run1.species.query.count"));
    }

    #[test]
    fn test_read_sample_list() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("list.txt");
        std::fs::write(&list, "# header\na.count.gz\tS1\n\n/abs/b.count\tS2\n").unwrap();
        let entries = read_sample_list(&list).unwrap();
        assert_eq!(
            entries,
            vec![
                SampleEntry { count_file: dir.path().join("a.count.gz"), sample: "S1".to_string() },
                SampleEntry { count_file: PathBuf::from("/abs/b.count"), sample: "S2".to_string() },
            ]
        );

        std::fs::write(&list, "a.count\n").unwrap();
        assert!(matches!(read_sample_list(&list).unwrap_err(), Error::MalformedRecord { line: 1, .. }));
    }
}
