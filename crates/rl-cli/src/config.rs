//! Run configuration: optional config file plus command-line overrides.

use anyhow::{Context, Result};
use clap::Args;
use rl_inference::ProfileLikelihoodConfig;
use std::path::{Path, PathBuf};

/// Options shared by `limit` and `significance`.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Counting datacard
    #[arg(short, long)]
    pub datacard: PathBuf,

    /// Config file (JSON if `.json`, YAML otherwise). Flags below override it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Minimizer as `Family` or `Family,Algorithm` (e.g. `LBFGS,HagerZhang`, `NelderMead`)
    #[arg(long)]
    pub minimizer_algo: Option<String>,

    /// Minimizer tolerance; also the EDM cut of `--pre-fit`
    #[arg(long)]
    pub minimizer_tolerance: Option<f64>,

    /// Maximum number of trials
    #[arg(long)]
    pub max_tries: Option<usize>,

    /// Accepted trials needed for consensus (1 = first success wins)
    #[arg(long)]
    pub tries: Option<usize>,

    /// Relative deviation from the median below which a trial is an inlier
    #[arg(long)]
    pub max_rel_deviation: Option<f64>,

    /// Fraction of outliers allowed in a consensus
    #[arg(long)]
    pub max_outlier_fraction: Option<f64>,

    /// Outlier count that abandons the run
    #[arg(long)]
    pub max_outliers: Option<usize>,

    /// Fit before each trial and skip trials with a poor fit
    #[arg(long)]
    pub pre_fit: bool,

    /// Confidence level of the limit
    #[arg(long)]
    pub cl: Option<f64>,

    /// Diagnostic verbosity (-1 silent, 0 result line, 1-3 more detail)
    #[arg(long, allow_hyphen_values = true)]
    pub verbose: Option<i32>,

    /// Keep nuisance parameters at their nominal values between trials
    #[arg(long)]
    pub no_randomize_systematics: bool,

    /// Seed of the trial randomization
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Drop all systematics from the card
    #[arg(long)]
    pub stat: bool,

    /// Replace observations by the background-only expectation
    #[arg(long)]
    pub asimov: bool,

    /// Output file for results (pretty JSON). Defaults to stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    /// Load the config file (or defaults) and apply explicit flags on top.
    pub fn resolve_config(&self) -> Result<ProfileLikelihoodConfig> {
        let mut cfg = match &self.config {
            Some(path) => read_config(path)?,
            None => ProfileLikelihoodConfig::default(),
        };
        self.apply(&mut cfg);
        Ok(cfg)
    }

    fn apply(&self, cfg: &mut ProfileLikelihoodConfig) {
        if let Some(algo) = &self.minimizer_algo {
            cfg.minimizer_algo.clone_from(algo);
        }
        if let Some(v) = self.minimizer_tolerance {
            cfg.minimizer_tolerance = v;
        }
        if let Some(v) = self.max_tries {
            cfg.max_tries = v;
        }
        if let Some(v) = self.tries {
            cfg.tries = v;
        }
        if let Some(v) = self.max_rel_deviation {
            cfg.max_rel_deviation = v;
        }
        if let Some(v) = self.max_outlier_fraction {
            cfg.max_outlier_fraction = v;
        }
        if let Some(v) = self.max_outliers {
            cfg.max_outliers = v;
        }
        if self.pre_fit {
            cfg.pre_fit = true;
        }
        if let Some(v) = self.cl {
            cfg.cl = v;
        }
        if let Some(v) = self.verbose {
            cfg.verbosity = v;
        }
        if self.no_randomize_systematics {
            cfg.with_systematics = false;
        }
    }
}

/// Read a [`ProfileLikelihoodConfig`] from JSON or YAML, by extension.
pub fn read_config(path: &Path) -> Result<ProfileLikelihoodConfig> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read config {}", path.display()))?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let cfg: ProfileLikelihoodConfig = if ext == "json" {
        serde_json::from_slice(&bytes)
            .with_context(|| format!("invalid JSON config {}", path.display()))?
    } else {
        // Default: YAML (serde_yaml_ng).
        serde_yaml_ng::from_slice(&bytes)
            .with_context(|| format!("invalid YAML config {}", path.display()))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: RunArgs,
    }

    #[test]
    fn test_flags_override_defaults() {
        let h = Harness::parse_from([
            "x",
            "--datacard",
            "card.txt",
            "--max-tries",
            "7",
            "--minimizer-algo",
            "NelderMead",
            "--verbose",
            "-1",
            "--pre-fit",
        ]);
        let cfg = h.args.resolve_config().unwrap();
        assert_eq!(cfg.max_tries, 7);
        assert_eq!(cfg.tries, 1);
        assert_eq!(cfg.minimizer_algo, "NelderMead");
        assert_eq!(cfg.verbosity, -1);
        assert!(cfg.pre_fit);
        assert!(cfg.with_systematics);
        assert_eq!(h.args.seed, 42);
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut cfg: ProfileLikelihoodConfig =
            serde_yaml_ng::from_str("max_tries: 5\ntries: 3\ncl: 0.9\n").unwrap();
        let h = Harness::parse_from(["x", "-d", "card.txt", "--tries", "2"]);
        h.args.apply(&mut cfg);
        assert_eq!(cfg.max_tries, 5);
        assert_eq!(cfg.tries, 2);
        assert_eq!(cfg.cl, 0.9);
    }
}
