use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, ValueHint};
use rayon::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use aem2segy::{
    is_high_altitude, resample_line, write_segy, Config, ErrorKind, InputSpec, LoadReport,
    ResampleOptions, Survey,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Convert AEM conductivity sections to per-line SEG-Y files", long_about = None)]
struct Cli {
    /// Control file describing columns, units and paths
    #[arg(value_hint = ValueHint::FilePath)]
    control_file: PathBuf,

    /// Override the control file's output directory
    #[arg(long, value_hint = ValueHint::DirPath)]
    output_dir: Option<PathBuf>,

    /// Convert only this line id
    #[arg(long)]
    line: Option<i64>,

    /// Also convert high-altitude/calibration lines (leading digit 9)
    #[arg(long, action = ArgAction::SetTrue)]
    include_high_altitude: bool,

    /// Regenerate SEG-Y files that already exist in the output directory
    #[arg(long, action = ArgAction::SetTrue)]
    overwrite: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

enum Outcome {
    Written {
        traces: usize,
        samples: usize,
        skipped_fiducials: usize,
        doi_missing: usize,
    },
    AlreadyExists,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let mut config = Config::from_control_file(&cli.control_file)
        .with_context(|| format!("failed to load {}", cli.control_file.display()))?;
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }
    if cli.line.is_some() {
        config.line_filter = cli.line;
    }
    config.include_high_altitude |= cli.include_high_altitude;

    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("failed to create {}", config.output_dir.display()))?;

    let inputs = resolve_inputs(&config)?;
    if inputs.is_empty() {
        bail!("no input files matched the configuration");
    }

    let options = config.resample_options();
    let mut written = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;

    for path in &inputs {
        info!("Processing {}", path.display());
        let Some((survey, report)) = load_survey(path, &config)? else {
            failed += 1;
            continue;
        };
        if report.rows_skipped > 0 {
            warn!(
                "{}: skipped {} malformed row(s) of {}",
                path.display(),
                report.rows_skipped,
                report.rows_read + report.rows_skipped
            );
        }
        if report.non_finite_conductivities > 0 {
            warn!(
                "{}: {} non-finite conductivity value(s) (zero resistivity in the source?)",
                path.display(),
                report.non_finite_conductivities
            );
        }

        let line_ids = select_lines(&survey, &config);
        if line_ids.is_empty() {
            warn!("{}: no lines selected for conversion", path.display());
            continue;
        }

        // Lines are independent: disjoint read-only fiducial slices in,
        // distinct output files out.
        let results: Vec<(i64, Result<Outcome>)> = line_ids
            .par_iter()
            .map(|&id| (id, convert_line(&survey, id, &config, &options, cli.overwrite)))
            .collect();

        for (id, result) in results {
            match result {
                Ok(Outcome::Written {
                    traces,
                    samples,
                    skipped_fiducials,
                    doi_missing,
                }) => {
                    written += 1;
                    info!("Line {id}: wrote {traces} traces x {samples} samples");
                    if skipped_fiducials > 0 {
                        warn!("Line {id}: dropped {skipped_fiducials} fiducial(s) with malformed layer geometry");
                    }
                    if doi_missing > 0 {
                        warn!("Line {id}: {doi_missing} fiducial(s) left unmasked, DOI value missing");
                    }
                }
                Ok(Outcome::AlreadyExists) => {
                    skipped += 1;
                    info!("Line {id}: output exists, skipping");
                }
                Err(err) => {
                    failed += 1;
                    warn!("Line {id}: {err:#}");
                }
            }
        }
    }

    info!("Done: {written} written, {skipped} skipped, {failed} failed");
    Ok(())
}

/// Loads one survey file, isolating data-quality failures to that file.
/// Configuration and IO errors still abort the batch.
fn load_survey(path: &Path, config: &Config) -> Result<Option<(Survey, LoadReport)>> {
    match Survey::load(path, config) {
        Ok(loaded) => Ok(Some(loaded)),
        Err(err) if err.kind() == ErrorKind::Data => {
            warn!("{}: {err}", path.display());
            Ok(None)
        }
        Err(err) => Err(err).with_context(|| format!("failed to load {}", path.display())),
    }
}

fn select_lines(survey: &Survey, config: &Config) -> Vec<i64> {
    survey
        .line_ids()
        .into_iter()
        .filter(|&id| config.include_high_altitude || !is_high_altitude(id))
        .filter(|&id| config.line_filter.map_or(true, |want| want == id))
        .collect()
}

fn convert_line(
    survey: &Survey,
    id: i64,
    config: &Config,
    options: &ResampleOptions,
    overwrite: bool,
) -> Result<Outcome> {
    let out_path = config.output_dir.join(format!("{id}.segy"));
    if out_path.exists() && !overwrite {
        return Ok(Outcome::AlreadyExists);
    }

    let line = survey.line(id);
    let (resampled, diagnostics) = resample_line(&line, options)?;
    write_segy(&out_path, &resampled, config.job_id.unwrap_or(0))
        .with_context(|| format!("failed to write {}", out_path.display()))?;

    Ok(Outcome::Written {
        traces: resampled.fiducials.len(),
        samples: resampled.grid.len(),
        skipped_fiducials: diagnostics.skipped_fiducials,
        doi_missing: diagnostics.doi_missing,
    })
}

fn resolve_inputs(config: &Config) -> Result<Vec<PathBuf>> {
    match &config.input {
        InputSpec::File(path) => Ok(vec![path.clone()]),
        InputSpec::Dir { dir, extension } => {
            let mut paths = Vec::new();
            let entries =
                fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
            for entry in entries {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) == Some(extension.as_str()) {
                    paths.push(path);
                }
            }
            paths.sort();
            Ok(paths)
        }
    }
}
