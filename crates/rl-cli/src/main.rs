//! robustlimit CLI

mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::RunArgs;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rl_core::traits::Workspace;
use rl_inference::{ConsensusDriver, Mode, ProfileLikelihoodCalculator};
use rl_translate::{CountingModel, Datacard, DatacardOptions};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "robustlimit")]
#[command(about = "robustlimit - profile-likelihood limits and significances from randomized trials")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error).
    /// Defaults to `info` for runs with `--verbose >= 0`, `warn` otherwise.
    #[arg(long, global = true)]
    log_level: Option<tracing::Level>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upper limit on the signal strength
    Limit {
        #[command(flatten)]
        args: RunArgs,
    },

    /// Significance of the signal against the background-only hypothesis
    Significance {
        #[command(flatten)]
        args: RunArgs,
    },

    /// Print version
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Limit { args } => cmd_run(Mode::Limit, &args, cli.log_level),
        Commands::Significance { args } => cmd_run(Mode::Significance, &args, cli.log_level),
        Commands::Version => {
            init_logging(cli.log_level.unwrap_or(tracing::Level::WARN));
            println!("robustlimit {}", rl_core::VERSION);
            Ok(())
        }
    }
}

fn init_logging(level: tracing::Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_run(mode: Mode, args: &RunArgs, log_level: Option<tracing::Level>) -> Result<()> {
    let mut cfg = args.resolve_config()?;
    cfg.mode = mode;
    // result lines are info records
    let default_level = if cfg.verbosity >= 0 { tracing::Level::INFO } else { tracing::Level::WARN };
    init_logging(log_level.unwrap_or(default_level));
    cfg.validate()?;

    let options = DatacardOptions { stat_only: args.stat, asimov: args.asimov };
    let card = Datacard::from_path(&args.datacard, options)?;
    let (mut model, data) = CountingModel::from_datacard(&card)?;
    let poi = model.poi()?.name;

    tracing::debug!(
        "{mode}: {} bins, {} processes, {} systematics, max_tries={}, tries={}, seed={}",
        card.bins,
        card.processes,
        card.systematics.len(),
        cfg.max_tries,
        cfg.tries,
        args.seed
    );

    let engine = ProfileLikelihoodCalculator::new();
    let mut rng = StdRng::seed_from_u64(args.seed);
    let outcome = ConsensusDriver::new(cfg.clone()).run(&engine, &mut model, &data, None, &mut rng)?;

    if !outcome.success {
        tracing::warn!("{mode} computation failed after {} trials", outcome.n_tries);
    }

    let output = serde_json::json!({
        "mode": mode,
        "success": outcome.success,
        "value": outcome.value,
        "cl": cfg.cl,
        "poi": poi,
        "n_tries": outcome.n_tries,
        "accepted": outcome.accepted,
        "n_outliers": outcome.n_outliers,
        "failure": outcome.failure,
    });

    write_json(args.output.as_ref(), output)
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
