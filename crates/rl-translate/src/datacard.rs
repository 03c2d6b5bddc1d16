//! LandS-style counting datacards.
//!
//! A card lists, per bin, the observed count and the expected rate of every
//! process (process 0 is the signal), followed by one `lnN` line per
//! systematic uncertainty:
//!
//! ```text
//! imax 1
//! jmax 1
//! kmax 1
//! Observation 3
//! bin      1    1
//! process  sig  bkg
//! rate     2.0  1.5
//! ------------
//! 1 lnN    1.10 1.20
//! ```

use rl_core::{Error, Result};
use std::path::Path;

/// One log-normal systematic: a kappa per (bin, process).
#[derive(Debug, Clone, PartialEq)]
pub struct LnNSystematic {
    /// Zero-based position in the card
    pub index: usize,
    /// `kappas[bin][process]`; 1.0 means "not affected"
    pub kappas: Vec<Vec<f64>>,
}

/// Parsed counting datacard.
#[derive(Debug, Clone, PartialEq)]
pub struct Datacard {
    /// Number of bins
    pub bins: usize,
    /// Number of processes including the signal
    pub processes: usize,
    /// Observed count per bin
    pub observed: Vec<f64>,
    /// `rates[bin][process]`
    pub rates: Vec<Vec<f64>>,
    /// Systematics in card order
    pub systematics: Vec<LnNSystematic>,
}

/// Options applied while reading a card.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatacardOptions {
    /// Drop all systematics (statistics-only model)
    pub stat_only: bool,
    /// Replace observations by the background-only expectation
    pub asimov: bool,
}

fn parse_f64(tok: &str, line_no: usize) -> Result<f64> {
    tok.parse::<f64>().map_err(|_| {
        Error::Validation(format!("line {line_no}: expected a number, found '{tok}'"))
    })
}

fn parse_count(tok: &str, line_no: usize) -> Result<Option<usize>> {
    if tok == "*" {
        return Ok(None);
    }
    tok.parse::<usize>().map(Some).map_err(|_| {
        Error::Validation(format!("line {line_no}: expected a count, found '{tok}'"))
    })
}

impl Datacard {
    /// Read and parse a card from disk.
    pub fn from_path(path: &Path, options: DatacardOptions) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse_with(&text, options)
    }

    /// Parse a card with default options.
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with(text, DatacardOptions::default())
    }

    /// Parse a card, applying `options`.
    pub fn parse_with(text: &str, options: DatacardOptions) -> Result<Self> {
        let mut bins = 1usize;
        let mut processes = 1usize;
        let mut declared_nuisances: Option<usize> = Some(0);
        let mut observed: Option<Vec<f64>> = None;
        let mut rates: Option<Vec<Vec<f64>>> = None;

        let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l));

        // Header: everything up to and including the `rate` line.
        for (line_no, line) in lines.by_ref() {
            let f: Vec<&str> = line.split_whitespace().collect();
            let Some(&key) = f.first() else { continue };
            match key {
                "imax" | "jmax" | "kmax" if f.len() < 2 => {
                    return Err(Error::Validation(format!("line {line_no}: '{key}' needs a value")));
                }
                "imax" => {
                    bins = parse_count(f[1], line_no)?.ok_or_else(|| {
                        Error::Validation(format!("line {line_no}: imax must be explicit"))
                    })?;
                }
                "jmax" => {
                    processes = parse_count(f[1], line_no)?.ok_or_else(|| {
                        Error::Validation(format!("line {line_no}: jmax must be explicit"))
                    })? + 1;
                }
                "kmax" => declared_nuisances = parse_count(f[1], line_no)?,
                "Observation" => {
                    let obs =
                        f[1..].iter().map(|t| parse_f64(t, line_no)).collect::<Result<Vec<_>>>()?;
                    if obs.len() != bins {
                        return Err(Error::Validation(format!(
                            "line {line_no}: found {} observations but {} bins",
                            obs.len(),
                            bins
                        )));
                    }
                    observed = Some(obs);
                }
                "bin" => {
                    let cols = &f[1..];
                    if cols.len() != bins * processes {
                        return Err(Error::Validation(format!(
                            "line {line_no}: malformed bin line: len {}, while bins*processes = {}*{}",
                            cols.len(),
                            bins,
                            processes
                        )));
                    }
                    for (i, tok) in cols.iter().enumerate() {
                        if *tok != (i / processes + 1).to_string() {
                            return Err(Error::Validation(format!(
                                "line {line_no}: malformed bin line for {processes} processes: {line}"
                            )));
                        }
                    }
                }
                "process" => {
                    if f.len() - 1 < bins * processes {
                        return Err(Error::Validation(format!(
                            "line {line_no}: malformed process line: len {}, while bins*processes = {}*{}",
                            f.len() - 1,
                            bins,
                            processes
                        )));
                    }
                }
                "rate" => {
                    if f.len() - 1 < bins * processes {
                        return Err(Error::Validation(format!(
                            "line {line_no}: malformed rate line: len {}, while bins*processes = {}*{}",
                            f.len() - 1,
                            bins,
                            processes
                        )));
                    }
                    let mut per_bin = Vec::with_capacity(bins);
                    for b in 0..bins {
                        let row = (0..processes)
                            .map(|p| parse_f64(f[1 + b * processes + p], line_no))
                            .collect::<Result<Vec<_>>>()?;
                        per_bin.push(row);
                    }
                    rates = Some(per_bin);
                    break;
                }
                _ => {}
            }
        }

        let rates = rates.ok_or_else(|| Error::Validation("datacard has no rate line".into()))?;

        // Systematics: one `lnN` line each, numbered from 1.
        let mut systematics: Vec<LnNSystematic> = Vec::new();
        for (line_no, line) in lines {
            let f: Vec<&str> = line.split_whitespace().collect();
            if f.is_empty() || line.starts_with("--") || line.starts_with('#') {
                continue;
            }
            let isyst = parse_count(f[0], line_no)?.ok_or_else(|| {
                Error::Validation(format!("line {line_no}: systematic index must be explicit"))
            })?;
            if isyst != systematics.len() + 1 {
                return Err(Error::Validation(format!(
                    "line {line_no}: unexpected systematic {isyst}"
                )));
            }
            let pdf = f.get(1).copied().unwrap_or("");
            if pdf != "lnN" {
                return Err(Error::Validation(format!("line {line_no}: unsupported pdf '{pdf}'")));
            }
            if f.len() - 2 < bins * processes {
                return Err(Error::Validation(format!(
                    "line {line_no}: malformed systematic line: len {}, while bins*processes = {}*{}",
                    f.len() - 2,
                    bins,
                    processes
                )));
            }
            let mut kappas = Vec::with_capacity(bins);
            for b in 0..bins {
                let row = (0..processes)
                    .map(|p| parse_kappa(f[2 + b * processes + p], line_no))
                    .collect::<Result<Vec<_>>>()?;
                kappas.push(row);
            }
            systematics.push(LnNSystematic { index: isyst - 1, kappas });
        }

        if options.stat_only {
            declared_nuisances = Some(0);
            systematics.clear();
        }

        let observed = if options.asimov {
            rates.iter().map(|row| row[1..].iter().sum()).collect()
        } else {
            observed.ok_or_else(|| {
                Error::Validation("datacard has no Observation line (use asimov data?)".into())
            })?
        };

        if let Some(n) = declared_nuisances
            && n != systematics.len()
        {
            return Err(Error::Validation(format!(
                "found {} systematics, expected {}",
                systematics.len(),
                n
            )));
        }

        log::debug!(
            "datacard: {} bins, {} processes, {} systematics",
            bins,
            processes,
            systematics.len()
        );

        Ok(Self { bins, processes, observed, rates, systematics })
    }
}

// `-` is the usual placeholder for "no effect".
fn parse_kappa(tok: &str, line_no: usize) -> Result<f64> {
    if tok == "-" {
        return Ok(1.0);
    }
    let k = parse_f64(tok, line_no)?;
    if k <= 0.0 {
        return Err(Error::Validation(format!("line {line_no}: lnN kappa must be positive, got {k}")));
    }
    Ok(k)
}
