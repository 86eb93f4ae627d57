use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use std::path::PathBuf;

use spcount_rs::config::{CountTableConfig, DEFAULT_AGGREGATE_RATE, DEFAULT_SPECIES_COLUMN};
use spcount_rs::count_table;

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Build per-sample species count tables from ambiguous read assignments.
#[derive(Debug, Parser)]
#[command(name = "spcount-rs", version)]
struct Args {
    #[arg(
        short = 'i',
        long = "input",
        required = true,
        value_name = "PATH",
        help = "Sample list: <count file>\\t<sample name> per line"
    )]
    input: PathBuf,

    #[arg(
        short = 't',
        long = "taxonomy",
        required = true,
        value_name = "PATH",
        help = "Taxonomy table (Id, ParentId, ScientificName, Rank, ...)"
    )]
    taxonomy: PathBuf,

    #[arg(
        short = 's',
        long = "species",
        value_name = "PATH",
        help = "Optional species lineage table used for the per-rank tables"
    )]
    species: Option<PathBuf>,

    #[arg(
        short = 'c',
        long = "species-column",
        value_name = "NAME",
        default_value = DEFAULT_SPECIES_COLUMN,
        help = "Header name of the species column in the lineage table"
    )]
    species_column: String,

    #[arg(
        short = 'a',
        long = "aggregate-rate",
        value_name = "RATE",
        default_value_t = DEFAULT_AGGREGATE_RATE,
        help = "Minimum fraction of candidates that must agree on a rank"
    )]
    aggregate_rate: f64,

    #[arg(
        short = 'o',
        long = "output",
        required = true,
        value_name = "PREFIX",
        help = "Output prefix; tables are written as <PREFIX>.<table>"
    )]
    output: PathBuf,

    #[arg(long = "strict", help = "Fail when any read cannot be placed at any rank")]
    strict: bool,

    #[arg(
        short = 'T',
        long = "threads",
        value_name = "THREADS",
        default_value_t = default_threads(),
        help = "Number of threads"
    )]
    threads: usize,
}

impl Args {
    fn into_config(self) -> CountTableConfig {
        let mut config = CountTableConfig::new(self.input, self.taxonomy, self.output);
        config.species_file = self.species;
        config.species_column = self.species_column;
        config.aggregate_rate = self.aggregate_rate;
        config.strict = self.strict;
        config
    }
}

fn spinner(color: &str, msg: &'static str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let template = format!("{{spinner:.{}}} {{msg}}", color);
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    spinner.set_message(msg);
    spinner
}

fn fail(spinner: &ProgressBar, e: spcount_rs::error::Error) -> ! {
    spinner.abandon();
    error!("{}", e);
    std::process::exit(1);
}

fn main() {
    let start = std::time::Instant::now();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build_global()
    {
        error!("{}", e);
        std::process::exit(1);
    }

    let config = args.into_config();

    // 1. Load inputs and build every table
    let pb = spinner("blue", "Building count tables...");
    let results = count_table(&config).unwrap_or_else(|e| fail(&pb, e));
    pb.finish_with_message(format!(
        "Counted {} species across {} sample(s).",
        results.species_rows.len(),
        results.samples.len()
    ));

    // 2. Write outputs
    let pb = spinner("yellow", "Writing output files...");
    results.write_outputs(&config).unwrap_or_else(|e| fail(&pb, e));
    pb.finish_with_message("Output files created.");

    if !results.unresolved.is_empty() {
        info!(
            "{} read(s) could not be placed at any rank, see {}",
            results.unresolved.len(),
            config.output_path("unresolved.txt").display()
        );
    }
    info!("Elapsed time: {:?}", start.elapsed());
}
