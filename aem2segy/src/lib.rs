//! Convert airborne electromagnetic (AEM) conductivity-versus-depth inversion
//! sections from column-oriented ASCII survey files into per-flight-line SEG-Y
//! files.
//!
//! The pipeline has two stages: [`survey::Survey::load`] reads one survey file
//! against a validated [`config::Config`] and normalizes every fiducial's
//! layer geometry to absolute layer-top elevations, then
//! [`resample::resample_line`] puts each flight line's step-function
//! conductivity profiles onto a shared, uniformly spaced elevation grid.
//! [`segy::write_segy`] encodes one resampled line as a SEG-Y file.

use thiserror::Error;

pub mod config;
pub mod resample;
pub mod segy;
pub mod survey;

pub use config::{parse_bool, ColumnRange, Config, GeometrySpec, InputSpec};
pub use resample::{
    resample_line, ElevationGrid, ResampleDiagnostics, ResampleOptions, ResampledLine, NO_DATA,
};
pub use segy::{write_segy, write_segy_to};
pub use survey::{is_high_altitude, Fiducial, LayerProfile, Line, LoadReport, Survey};

#[derive(Error, Debug)]
pub enum AemError {
    #[error("control file line {line}: {reason}")]
    ControlSyntax { line: usize, reason: String },
    #[error("missing required control-file key '{0}'")]
    MissingKey(&'static str),
    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error(
        "exactly one of thickness_cols, layer_top_depth_cols or layer_top_elevation_cols \
         is required; {0} were given"
    )]
    GeometryRepresentation(usize),
    #[error("column {column} configured for '{role}' is outside the table width ({width} columns)")]
    ColumnOutOfRange {
        role: &'static str,
        column: usize,
        width: usize,
    },
    #[error("{0}: no data rows")]
    EmptyTable(String),
    #[error("line {line_id}: {reason}")]
    LineData { line_id: i64, reason: String },
    #[error("line {0} has no usable fiducials")]
    EmptyLine(i64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Coarse failure class, matching how the batch driver reacts: configuration
/// and I/O problems abort the run, data problems are isolated to the
/// offending line or fiducial.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Data,
    Io,
}

impl AemError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AemError::ControlSyntax { .. }
            | AemError::MissingKey(_)
            | AemError::InvalidValue { .. }
            | AemError::GeometryRepresentation(_)
            | AemError::ColumnOutOfRange { .. } => ErrorKind::Configuration,
            AemError::EmptyTable(_) | AemError::LineData { .. } | AemError::EmptyLine(_) => {
                ErrorKind::Data
            }
            AemError::Io(_) => ErrorKind::Io,
        }
    }
}
