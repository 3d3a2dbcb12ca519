#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the parking violations ingestion tool.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Instant;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use parking_cli_utils::{IndicatifProgress, MultiProgress};
use parking_database::{BatchLoader, DuckDbStore, paths};
use parking_geocoder::GeocodeResolver;
use parking_identity::IdentityIndex;
use parking_ingest::{
    AgencyRules, CsvSink, Pipeline, RecordSink, ReferenceData, default_plates_path,
    default_tickets_path, write_summary,
};
use parking_ingest_models::progress::ProgressCallback as _;
use parking_ingest_models::{DEFAULT_BATCH_SIZE, PipelineOptions, RunSummary};

/// Unmatched segment ids listed in the end-of-run geocode summary.
const MAX_UNMATCHED_LOGGED: usize = 20;

#[derive(Parser)]
#[command(
    name = "parking_ingest",
    about = "Anonymize, geocode, and load parking violation extracts"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and load the result into the `DuckDB` store
    Run {
        #[command(flatten)]
        input: InputArgs,
        /// `DuckDB` file to load into (default: `PARKING_DATABASE_PATH`,
        /// then `data/parking_violations.duckdb`)
        #[arg(long)]
        database: Option<PathBuf>,
        /// Rows per committed batch
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },
    /// Run the pipeline up to geocoding and write CSV to stdout
    Transform {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Create the final and staging tables
    CreateTables {
        /// `DuckDB` file to create the tables in
        #[arg(long)]
        database: Option<PathBuf>,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Fixed-width extract to read (default: stdin)
    input: Option<PathBuf>,
    /// Plate surrogate mapping CSV (default: `data/identity/plates.csv`)
    #[arg(long)]
    plates: Option<PathBuf>,
    /// Ticket surrogate mapping CSV (default: `data/identity/tickets.csv`)
    #[arg(long)]
    tickets: Option<PathBuf>,
    /// Street-segment centroid CSV (`seg_id,lat,lon`)
    #[arg(long)]
    centroids: Option<PathBuf>,
    /// Address lookup CSV (`address,seg_id,zip_code`)
    #[arg(long)]
    address_lookup: Option<PathBuf>,
    /// Input lines carry trailing latitude/longitude columns
    #[arg(long)]
    coordinates: bool,
    /// Record repeated ticket numbers as distinct tickets
    #[arg(long)]
    dedup_tickets: bool,
    /// 1-based row at which geocoding and loading start
    #[arg(long, default_value_t = 1)]
    starting_row: u64,
    /// Drop rows issued before this date (YYYY-MM-DD)
    #[arg(long)]
    min_issue_date: Option<NaiveDate>,
    /// Agency rules TOML overriding the built-in rules
    #[arg(long)]
    rules: Option<PathBuf>,
    /// Write the run summary as JSON to this path
    #[arg(long)]
    summary: Option<PathBuf>,
}

impl InputArgs {
    fn options(&self) -> PipelineOptions {
        let defaults = PipelineOptions::default();
        PipelineOptions {
            dedup_tickets: self.dedup_tickets,
            starting_row: self.starting_row,
            min_issue_date: self.min_issue_date.unwrap_or(defaults.min_issue_date),
            coordinates: self.coordinates,
            ..defaults
        }
    }

    /// Opens the input, returning its size in bytes when it is a file.
    fn open_input(&self) -> std::io::Result<(Box<dyn BufRead>, Option<u64>)> {
        Ok(match &self.input {
            Some(path) => {
                let file = File::open(path)?;
                let len = file.metadata()?.len();
                (Box::new(BufReader::new(file)), Some(len))
            }
            None => (Box::new(std::io::stdin().lock()), None),
        })
    }
}

/// Loads reference data and the identity index, runs the pipeline into
/// `sink`, and persists the index once the sink has finished.
fn execute(
    args: &InputArgs,
    options: PipelineOptions,
    sink: &mut dyn RecordSink,
    multi: &MultiProgress,
) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let rules = match &args.rules {
        Some(path) => AgencyRules::load(path)?,
        None => AgencyRules::embedded()?,
    };
    let reference = ReferenceData::load(args.address_lookup.as_deref(), args.centroids.as_deref())?;

    let plates_path = args.plates.clone().unwrap_or_else(default_plates_path);
    let tickets_path = args.tickets.clone().unwrap_or_else(default_tickets_path);
    let mut index = IdentityIndex::load(Some(&plates_path), Some(&tickets_path))?;

    let resolver = GeocodeResolver::new(&reference.parser, &reference.centroids);
    let pipeline = Pipeline::new(options, rules, resolver)?;
    let progress = IndicatifProgress::input_bar(multi, "Processing violations");

    let (input, len) = args.open_input()?;
    if let Some(len) = len {
        progress.set_total(len);
    }
    let summary = pipeline.run(input, &mut index, sink, &progress)?;

    index.persist(&plates_path, &tickets_path)?;

    summary.log();
    summary.geocode.log_summary(MAX_UNMATCHED_LOGGED);
    if let Some(path) = &args.summary {
        write_summary(path, &summary)?;
    }

    Ok(summary)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = parking_cli_utils::init_logger();
    let cli = Cli::parse();
    let start = Instant::now();

    match cli.command {
        Commands::Run {
            input,
            database,
            batch_size,
        } => {
            let db_path = paths::violations_db_path(database.as_deref());
            let store = DuckDbStore::open(&db_path)?;
            match store.max_row_number()? {
                Some(max) => log::info!(
                    "Loading into {} (currently holds rows up to {max})",
                    db_path.display()
                ),
                None => log::info!("Loading into empty store {}", db_path.display()),
            }

            let options = PipelineOptions {
                batch_size,
                ..input.options()
            };
            let mut loader = BatchLoader::new(store, options.batch_size);
            let result = execute(&input, options, &mut loader, &multi);
            if result.is_err()
                && let Some(last) = loader.last_committed_row()
            {
                log::error!(
                    "Rows up to {last} were committed; restart with --starting-row {} or lower",
                    last + 1
                );
            }
            let summary = result?;
            log::info!(
                "Store now holds {} row(s) ({} loaded this run)",
                loader.store().row_count()?,
                summary.emitted
            );
        }
        Commands::Transform { input } => {
            let mut sink = CsvSink::new(std::io::stdout().lock());
            execute(&input, input.options(), &mut sink, &multi)?;
            sink.into_inner()?;
        }
        Commands::CreateTables { database } => {
            let db_path = paths::violations_db_path(database.as_deref());
            let store = DuckDbStore::open(&db_path)?;
            log::info!(
                "Tables ready in {} ({} row(s))",
                db_path.display(),
                store.row_count()?
            );
        }
    }

    log::info!("Total time: {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}
