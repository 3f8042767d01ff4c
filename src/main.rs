#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

// ========================================================================================
//
//                          Command-line front end for the study
//
// ========================================================================================
//
// Parses arguments, resolves the analysis configuration (file, then flag overrides),
// initializes logging and hands off to the library. The engines never print; every
// human-facing message is produced here or by the log backend.

use clap::{Args, CommandFactory, Parser, Subcommand};
use readerstudy::bootstrap::BootstrapAnalyzer;
use readerstudy::config::AnalysisConfig;
use readerstudy::dca::DecisionCurveAnalyzer;
use readerstudy::gee::design::GeeObservation;
use readerstudy::gee::model::GeeAnalyzer;
use readerstudy::pipeline::{analyze_study, write_study_outputs};
use readerstudy::shared::files::{load_reader_records, write_json};
use readerstudy::shared::report;
use readerstudy::types::ConfusionMatrix;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

#[derive(Args, Debug, Clone)]
struct CommonArgs {
    /// TOML analysis configuration; defaults are used when omitted
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Number of bootstrap iterations (overrides the configuration)
    #[arg(long, value_name = "N")]
    iterations: Option<usize>,

    /// Bootstrap random seed (overrides the configuration)
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Confidence level of bootstrap intervals, in (0, 1)
    #[arg(long, value_name = "LEVEL")]
    confidence: Option<f64>,

    /// Raise log verbosity to debug
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Parser)]
#[command(
    name = "readerstudy",
    version,
    about = "Cluster-robust statistics for AI-assisted reader studies",
    long_about = "Patient-level bootstrap confidence intervals, GEE with robust sandwich \
                  standard errors and decision curve analysis for paired assisted/unaided reads."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every engine for every reader and write all artifacts
    Analyze {
        /// Record table (CSV, or TSV for .tsv/.txt)
        #[arg(value_name = "RECORDS")]
        records: PathBuf,

        /// Output directory
        #[arg(long, short, default_value = "results")]
        output: PathBuf,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Bootstrap confidence intervals for a single reader
    Bootstrap {
        #[arg(value_name = "RECORDS")]
        records: PathBuf,

        /// Reader whose records are resampled
        #[arg(long)]
        reader: String,

        /// Also write bootstrap_results.json to this path
        #[arg(long, value_name = "PATH")]
        json: Option<PathBuf>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Pooled GEE fit across all readers in the table
    Gee {
        #[arg(value_name = "RECORDS")]
        records: PathBuf,

        /// Add the reader index as a covariate
        #[arg(long)]
        include_reader: bool,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Decision curves from two confusion matrices given as TP,FP,FN,TN
    Dca {
        #[arg(long, value_parser = parse_confusion_matrix, value_name = "TP,FP,FN,TN")]
        assisted: ConfusionMatrix,

        #[arg(long, value_parser = parse_confusion_matrix, value_name = "TP,FP,FN,TN")]
        unaided: ConfusionMatrix,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Write the default configuration as TOML
    InitConfig {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Analyze {
            records,
            output,
            common,
        }) => run_analyze(records, output, common),
        Some(Commands::Bootstrap {
            records,
            reader,
            json,
            common,
        }) => run_bootstrap(records, reader, json, common),
        Some(Commands::Gee {
            records,
            include_reader,
            common,
        }) => run_gee(records, include_reader, common),
        Some(Commands::Dca {
            assisted,
            unaided,
            common,
        }) => run_dca(assisted, unaided, common),
        Some(Commands::InitConfig { path }) => run_init_config(path),
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {e}");
                process::exit(1);
            }
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

/// Loads the configuration file (if any) and applies the command-line overrides.
fn resolve_config(common: &CommonArgs) -> Result<AnalysisConfig, Box<dyn std::error::Error>> {
    let mut config = match &common.config {
        Some(path) => {
            log::info!("Loading configuration from {}", path.display());
            AnalysisConfig::load(&path.to_string_lossy())?
        }
        None => AnalysisConfig::default(),
    };
    if let Some(n) = common.iterations {
        config.bootstrap.n_iterations = n;
    }
    if let Some(seed) = common.seed {
        config.bootstrap.seed = seed;
    }
    if let Some(level) = common.confidence {
        config.bootstrap.confidence_level = level;
    }
    config.validate()?;
    Ok(config)
}

fn run_analyze(
    records: PathBuf,
    output: PathBuf,
    common: CommonArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(common.verbose);
    let start_time = Instant::now();
    let config = resolve_config(&common)?;

    let readers = load_reader_records(&records)?;
    let study = analyze_study(&readers, &config)?;
    let written = write_study_outputs(&study, &output, &config)?;

    eprintln!(
        "> Analyzed {} readers in {:.2?}; wrote {} files to {}",
        study.readers.len(),
        start_time.elapsed(),
        written.len(),
        output.display()
    );
    Ok(())
}

fn run_bootstrap(
    records: PathBuf,
    reader: String,
    json: Option<PathBuf>,
    common: CommonArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(common.verbose);
    let config = resolve_config(&common)?;

    let readers = load_reader_records(&records)?;
    let data = readers
        .iter()
        .find(|r| r.reader == reader)
        .ok_or_else(|| format!("reader '{reader}' not found in {}", records.display()))?;

    let mut engine = BootstrapAnalyzer::new(config.bootstrap, config.aggregation);
    let comparison = engine.run_comparison(&data.assisted, &data.unaided);
    let rows = engine.summary_table()?;
    print!("{}", report::bootstrap_report(&reader, &comparison, &rows)?);

    if let Some(path) = json {
        let written = write_json(&path, &comparison)?;
        eprintln!("> Wrote {}", written.display());
    }
    Ok(())
}

fn run_gee(
    records: PathBuf,
    include_reader: bool,
    common: CommonArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(common.verbose);
    let config = resolve_config(&common)?;

    let readers = load_reader_records(&records)?;
    let observations: Vec<GeeObservation> = readers
        .iter()
        .enumerate()
        .flat_map(|(i, r)| GeeObservation::from_paired_records(&r.assisted, &r.unaided, i))
        .collect();

    let label = match readers.as_slice() {
        [only] => only.reader.as_str(),
        _ => "all readers",
    };
    let include_reader = include_reader || config.gee.include_reader;
    let fit = GeeAnalyzer::new(config.gee).fit(&observations, include_reader)?;
    print!("{}", report::gee_report(label, &fit)?);
    Ok(())
}

fn run_dca(
    assisted: ConfusionMatrix,
    unaided: ConfusionMatrix,
    common: CommonArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(common.verbose);
    let config = resolve_config(&common)?;

    let mut analyzer = DecisionCurveAnalyzer::new(config.dca)?;
    let comparison = analyzer.compare_strategies(&assisted, &unaided);
    let rows = analyzer.summary_table()?;
    print!("{}", report::dca_report("command line", &comparison, &rows)?);
    Ok(())
}

fn run_init_config(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    AnalysisConfig::default().save(&path.to_string_lossy())?;
    eprintln!("> Wrote default configuration to {}", path.display());
    Ok(())
}

/// Parses `TP,FP,FN,TN` into a confusion matrix.
fn parse_confusion_matrix(value: &str) -> Result<ConfusionMatrix, String> {
    let counts = value
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<u64>()
                .map_err(|e| format!("'{}' is not a non-negative count: {e}", part.trim()))
        })
        .collect::<Result<Vec<u64>, String>>()?;
    match counts.as_slice() {
        &[tp, fp, fn_count, tn] => Ok(ConfusionMatrix::new(tp, fp, fn_count, tn)),
        other => Err(format!("expected four counts TP,FP,FN,TN, got {}", other.len())),
    }
}
