//! Line resampling: irregular per-fiducial conductivity-versus-depth
//! profiles onto one shared, uniformly spaced elevation grid per flight line.
//!
//! The fill is a staircase, not an interpolation: a layered-earth inversion
//! gives each layer one representative conductivity, so every grid sample
//! inside a layer takes that layer's value and nothing is blended across
//! boundaries. Samples in free air above the first layer top, below the
//! deepest recorded layer top, or below the depth of investigation stay at
//! the [`NO_DATA`] sentinel.

use ndarray::{Array2, ArrayViewMut1};
use serde::{Deserialize, Serialize};

use crate::survey::{Fiducial, LayerProfile, Line};
use crate::AemError;

/// Sentinel for air, unclassified depth, and censored samples.
pub const NO_DATA: f64 = -1.0;

/// Strictly decreasing elevations at uniform spacing, shared by every trace
/// in a line so the traces align sample-for-sample.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElevationGrid {
    values: Vec<f64>,
    step: f64,
}

impl ElevationGrid {
    /// Anchor at `top_datum` and step down by `step`. Bottom boundary
    /// convention: the final sample is the first value at or below `bottom`,
    /// so the grid always covers the full requested depth and may undershoot
    /// `bottom` by less than one step.
    pub fn build(top_datum: f64, bottom: f64, step: f64) -> ElevationGrid {
        let count = ((top_datum - bottom) / step).ceil() as usize + 1;
        let values = (0..count).map(|k| top_datum - k as f64 * step).collect();
        ElevationGrid { values, step }
    }

    pub fn top(&self) -> f64 {
        self.values[0]
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn elevations(&self) -> &[f64] {
        &self.values
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ResampleOptions {
    pub vertical_interval: f64,
    /// Depth below the line's minimum-elevation datum to extend the grid.
    pub max_depth: f64,
    /// Explicit top-of-grid elevation; computed per line when absent.
    pub datum: Option<f64>,
    pub doi_mask: bool,
}

/// One SEG-Y-ready line: section shape is `(grid.len(), fiducials.len())`,
/// column `i` is the trace for `fiducials[i]`.
#[derive(Debug)]
pub struct ResampledLine<'a> {
    pub line_id: i64,
    pub grid: ElevationGrid,
    pub section: Array2<f64>,
    pub fiducials: Vec<&'a Fiducial>,
}

/// Per-line data-quality findings. The resampler never logs; the batch
/// driver reports these.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ResampleDiagnostics {
    /// Fiducials dropped for malformed geometry (their traces are omitted).
    pub skipped_fiducials: usize,
    /// Fiducials left unmasked because masking was requested but the DOI
    /// value was missing or non-finite.
    pub doi_missing: usize,
}

/// Resample every usable fiducial in `line` onto a shared elevation grid.
///
/// A fiducial with non-monotonic or length-mismatched layer geometry is
/// skipped (counted in the diagnostics) rather than failing the line; the
/// grid is derived from the surviving fiducials. A line with no usable
/// fiducials is invalid input.
pub fn resample_line<'a>(
    line: &Line<'a>,
    options: &ResampleOptions,
) -> Result<(ResampledLine<'a>, ResampleDiagnostics), AemError> {
    if line.fiducials.is_empty() {
        return Err(AemError::EmptyLine(line.id));
    }

    let mut diagnostics = ResampleDiagnostics::default();
    let mut kept: Vec<&Fiducial> = Vec::with_capacity(line.fiducials.len());
    for &fiducial in &line.fiducials {
        if profile_is_usable(&fiducial.profile) {
            kept.push(fiducial);
        } else {
            diagnostics.skipped_fiducials += 1;
        }
    }
    if kept.is_empty() {
        return Err(AemError::EmptyLine(line.id));
    }

    let max_elevation = kept.iter().map(|f| f.elevation).fold(f64::NEG_INFINITY, f64::max);
    let min_elevation = kept.iter().map(|f| f.elevation).fold(f64::INFINITY, f64::min);

    let top_datum = match options.datum {
        Some(datum) => {
            if datum < max_elevation {
                return Err(AemError::LineData {
                    line_id: line.id,
                    reason: format!(
                        "configured datum {datum} is below the line's maximum elevation \
                         {max_elevation}"
                    ),
                });
            }
            datum
        }
        // Round up to the nearest 10 survey units for topographic clearance.
        None => (max_elevation / 10.0).ceil() * 10.0,
    };
    let bottom = (min_elevation / 10.0).floor() * 10.0 - options.max_depth;
    let grid = ElevationGrid::build(top_datum, bottom, options.vertical_interval);

    let mut section = Array2::from_elem((grid.len(), kept.len()), NO_DATA);
    for (i, fiducial) in kept.iter().enumerate() {
        let mut trace = section.column_mut(i);
        fill_staircase(&mut trace, &grid, &fiducial.profile);
        if options.doi_mask {
            match fiducial.depth_of_investigation {
                Some(doi) if doi.is_finite() => {
                    mask_below_doi(&mut trace, &grid, fiducial.elevation, doi);
                }
                _ => diagnostics.doi_missing += 1,
            }
        }
    }

    Ok((
        ResampledLine {
            line_id: line.id,
            grid,
            section,
            fiducials: kept,
        },
        diagnostics,
    ))
}

/// Assign `conductivity[j]` to every grid elevation `e` with
/// `layer_top_elevation[j+1] <= e < layer_top_elevation[j]`. Half-open with
/// the shallower top excluded, so a sample sitting exactly on a boundary
/// belongs to the layer below it.
fn fill_staircase(trace: &mut ArrayViewMut1<f64>, grid: &ElevationGrid, profile: &LayerProfile) {
    let tops = &profile.layer_top_elevation;
    for j in 0..tops.len().saturating_sub(1) {
        let upper = tops[j];
        let lower = tops[j + 1];
        for (k, &elevation) in grid.elevations().iter().enumerate() {
            if elevation >= lower && elevation < upper {
                trace[k] = profile.conductivity[j];
            }
        }
    }
}

/// Censor everything deeper than the fiducial's depth of investigation back
/// to the sentinel, regardless of what the staircase assigned.
fn mask_below_doi(
    trace: &mut ArrayViewMut1<f64>,
    grid: &ElevationGrid,
    elevation: f64,
    doi: f64,
) {
    let doi_elevation = elevation - doi;
    for (k, &e) in grid.elevations().iter().enumerate() {
        if e < doi_elevation {
            trace[k] = NO_DATA;
        }
    }
}

fn profile_is_usable(profile: &LayerProfile) -> bool {
    let tops = &profile.layer_top_elevation;
    if tops.len() != profile.conductivity.len() || tops.is_empty() {
        return false;
    }
    if tops.iter().any(|t| !t.is_finite()) {
        return false;
    }
    // Non-increasing with depth; equal adjacent tops (zero thickness) are fine.
    tops.windows(2).all(|w| w[1] <= w[0])
}
