//! `metfill`: reconcile key station series and write model forcing files.
//!
//! ```text
//! metfill run run.toml --report report.json --strict
//! metfill inspect run.toml
//! ```

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueHint};

use metfill_service::analysis::gaps::detect_gaps;
use metfill_service::config::RunConfig;
use metfill_service::ingest::{
    CsvObservationProvider, ObservationProvider, StationProvider, TomlStationProvider,
};
use metfill_service::logging::{self, Stage};
use metfill_service::{ObservationTable, StationRegistry, reconcile, write};

#[derive(Parser, Debug)]
#[command(author, version, about = "Fill station gaps from donor stations and write per-station forcing files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile the key stations and write one file per station
    Run {
        /// Run configuration (TOML)
        #[arg(value_hint = ValueHint::FilePath)]
        config: PathBuf,

        /// Also write the reconciliation report as JSON
        #[arg(long, value_hint = ValueHint::FilePath)]
        report: Option<PathBuf>,

        /// Exit non-zero when any gap is irreconcilable or any station failed
        #[arg(long)]
        strict: bool,
    },
    /// Show coverage and gap counts for the key stations without writing
    Inspect {
        #[arg(value_hint = ValueHint::FilePath)]
        config: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config_path = match &cli.command {
        Command::Run { config, .. } | Command::Inspect { config } => config.clone(),
    };
    let mut config = RunConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    config.apply_env_overrides()?;
    config.validate().context("validating configuration")?;

    logging::init_logger(
        config.log_level()?,
        config.logging.file.as_deref(),
        config.logging.timestamps,
    )
    .context("opening log file")?;

    match cli.command {
        Command::Run { report, strict, .. } => handle_run(&config, report, strict),
        Command::Inspect { .. } => handle_inspect(&config),
    }
}

fn load_inputs(config: &RunConfig) -> Result<(StationRegistry, ObservationTable)> {
    let mut stations = TomlStationProvider::new(&config.input.stations);
    if let Some(area) = config.input.search {
        stations = stations.within(area);
    }
    let registry = stations
        .stations()
        .with_context(|| format!("loading stations from {}", config.input.stations.display()))?;
    if registry.is_empty() {
        bail!("no stations loaded from {}", config.input.stations.display());
    }

    let observations = CsvObservationProvider::new(&config.input.observations)
        .with_missing_tokens(config.input.missing_values.iter().cloned());
    let table = observations
        .observations(&registry, &[], config.date_range()?)
        .with_context(|| {
            format!(
                "loading observations from {}",
                config.input.observations.display()
            )
        })?;
    Ok((registry, table))
}

fn handle_run(config: &RunConfig, report_path: Option<PathBuf>, strict: bool) -> Result<ExitCode> {
    let (registry, table) = load_inputs(config)?;
    let keys = config.key_stations()?;
    let options = config.reconcile_options()?;

    let (series, mut report) = reconcile(&table, &keys, &options)?;
    let outcome = write(&series, &registry, &config.writer_options()?)?;
    report.absorb_failures(&outcome.failures);

    for unit in &outcome.units {
        logging::info(
            Stage::Write,
            Some(&unit.station_id),
            &format!("{} ({} rows, {} missing cells)", unit.path.display(), unit.rows, unit.missing_cells),
        );
    }

    if let Some(path) = report_path {
        let json = report.to_json().context("serializing report")?;
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    }

    print!("{}", report);

    if strict && !report.is_clean() {
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_inspect(config: &RunConfig) -> Result<ExitCode> {
    let (registry, table) = load_inputs(config)?;
    let keys = config.key_stations()?;

    println!(
        "{} registered stations, {} with observations, variables: {}",
        registry.len(),
        table.station_ids().count(),
        table.variables().join(", ")
    );
    for (station_id, result) in detect_gaps(&table, &keys) {
        match result {
            Ok(gaps) => {
                let coverage = table
                    .coverage(&station_id)
                    .map(|r| format!("{} .. {}", r.start, r.end))
                    .unwrap_or_default();
                let per_variable: Vec<String> = gaps
                    .by_variable
                    .iter()
                    .map(|(v, dates)| format!("{}={}", v, dates.len()))
                    .collect();
                println!("  {:<14} {}  gaps: {}", station_id, coverage, per_variable.join(" "));
            }
            Err(err) => println!("  {:<14} ✗ {}", station_id, err),
        }
    }
    Ok(ExitCode::SUCCESS)
}
