//! Control-file parsing and the validated run configuration.
//!
//! Control files are plain `key = value` text: blank lines and `#` comments
//! are ignored. All stringly-typed entries are resolved once into a [`Config`]
//! before any survey row is read, so column-index mistakes surface as
//! configuration errors rather than silently misread data.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::resample::ResampleOptions;
use crate::AemError;

/// Inclusive 1-based column range, written `"26-55"` in control files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRange {
    pub first: usize,
    pub last: usize,
}

impl ColumnRange {
    pub fn parse(key: &str, value: &str) -> Result<Self, AemError> {
        let invalid = |reason: &str| AemError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };
        let (a, b) = value
            .split_once('-')
            .ok_or_else(|| invalid("expected an inclusive range like 26-55"))?;
        let first: usize = a
            .trim()
            .parse()
            .map_err(|_| invalid("range start is not an integer"))?;
        let last: usize = b
            .trim()
            .parse()
            .map_err(|_| invalid("range end is not an integer"))?;
        if first == 0 {
            return Err(invalid("column numbers are 1-based"));
        }
        if last < first {
            return Err(invalid("range end precedes range start"));
        }
        Ok(ColumnRange { first, last })
    }

    pub fn len(&self) -> usize {
        self.last - self.first + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Zero-based column indices covered by the range, in order.
    pub fn indices(&self) -> impl Iterator<Item = usize> {
        (self.first - 1)..self.last
    }
}

/// The layer-geometry representation carried by the survey file. Exactly one
/// is configured; the loader normalizes all three to absolute layer-top
/// elevations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometrySpec {
    Thickness(ColumnRange),
    LayerTopDepth(ColumnRange),
    LayerTopElevation(ColumnRange),
}

impl GeometrySpec {
    pub fn range(&self) -> ColumnRange {
        match self {
            GeometrySpec::Thickness(r)
            | GeometrySpec::LayerTopDepth(r)
            | GeometrySpec::LayerTopElevation(r) => *r,
        }
    }
}

/// Where survey rows come from: a single file, or every file with a given
/// extension in a directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputSpec {
    File(PathBuf),
    Dir { dir: PathBuf, extension: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub easting_col: usize,
    pub northing_col: usize,
    pub elevation_col: usize,
    pub line_col: usize,
    pub fiducial_col: Option<usize>,
    pub doi_col: Option<usize>,
    pub conductivity_cols: ColumnRange,
    pub geometry: GeometrySpec,
    pub vertical_interval: f64,
    pub max_depth: f64,
    pub datum: Option<f64>,
    pub resistivity: bool,
    pub scaling_factor: f64,
    pub doi_mask: bool,
    pub job_id: Option<i32>,
    /// Restrict conversion to a single line id (`AEM_line`).
    pub line_filter: Option<i64>,
    /// Convert high-altitude/calibration lines (leading digit 9) as well.
    pub include_high_altitude: bool,
    pub input: InputSpec,
    pub output_dir: PathBuf,
    pub skip_rows: usize,
}

impl Config {
    pub fn from_control_file(path: &Path) -> Result<Self, AemError> {
        let text = fs::read_to_string(path)?;
        let map = parse_control_text(&text)?;
        Config::from_map(&map)
    }

    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, AemError> {
        let easting_col = require_col(map, "easting_col")?;
        let northing_col = require_col(map, "northing_col")?;
        let elevation_col = require_col(map, "elevation_col")?;
        let line_col = require_col(map, "line_col")?;
        let fiducial_col = optional_col(map, "fiducial_col")?;
        let doi_col = match optional_col(map, "doi_col")? {
            Some(c) => Some(c),
            None => optional_col(map, "depth_of_investigation_col")?,
        };

        let conductivity_cols = ColumnRange::parse(
            "conductivity_cols",
            require(map, "conductivity_cols")?,
        )?;
        let geometry = resolve_geometry(map)?;
        if geometry.range().len() != conductivity_cols.len() {
            return Err(AemError::InvalidValue {
                key: "conductivity_cols".to_string(),
                value: format!("{} columns", conductivity_cols.len()),
                reason: format!(
                    "conductivity and layer-geometry ranges differ in width ({} vs {})",
                    conductivity_cols.len(),
                    geometry.range().len()
                ),
            });
        }

        let vertical_interval = if map.contains_key("vertical_interval") {
            parse_f64(map, "vertical_interval")?
        } else if map.contains_key("yres") {
            parse_f64(map, "yres")?
        } else {
            return Err(AemError::MissingKey("vertical_interval"));
        };
        if !(vertical_interval > 0.0) {
            return Err(invalid_key(map, "vertical_interval", "must be > 0"));
        }
        // The SEG-Y sample-interval field is 16-bit, in microseconds after the
        // metres-to-pseudo-time scaling.
        if vertical_interval * 1000.0 > f64::from(u16::MAX) {
            return Err(invalid_key(
                map,
                "vertical_interval",
                "too large for the SEG-Y 16-bit sample-interval field",
            ));
        }
        let max_depth = parse_f64(map, "max_depth")?;
        if !(max_depth > 0.0) {
            return Err(invalid_key(map, "max_depth", "must be > 0"));
        }
        let datum = optional_f64(map, "datum")?;

        let resistivity = optional_bool(map, "resistivity")?.unwrap_or(false);
        let scaling_factor = match optional_f64(map, "scaling_factor")? {
            Some(s) => s,
            None => optional_f64(map, "scaling")?.unwrap_or(1.0),
        };
        let doi_mask = optional_bool(map, "doi_mask")?.unwrap_or(false);

        let job_id = match map.get("job_id") {
            Some(v) => Some(v.trim().parse::<i32>().map_err(|_| {
                invalid_key(map, "job_id", "not an integer")
            })?),
            None => None,
        };
        let line_filter = match map.get("AEM_line") {
            Some(v) => Some(v.trim().parse::<i64>().map_err(|_| {
                invalid_key(map, "AEM_line", "not an integer line id")
            })?),
            None => None,
        };
        let include_high_altitude =
            optional_bool(map, "include_high_altitude")?.unwrap_or(false);

        let input = resolve_input(map)?;
        let output_dir = map
            .get("output_dir")
            .or_else(|| map.get("segy_dir"))
            .map(PathBuf::from)
            .ok_or(AemError::MissingKey("output_dir"))?;

        let skip_rows = match map.get("skip_rows") {
            Some(v) => v.trim().parse::<usize>().map_err(|_| {
                invalid_key(map, "skip_rows", "not a non-negative integer")
            })?,
            None => 0,
        };

        Ok(Config {
            easting_col,
            northing_col,
            elevation_col,
            line_col,
            fiducial_col,
            doi_col,
            conductivity_cols,
            geometry,
            vertical_interval,
            max_depth,
            datum,
            resistivity,
            scaling_factor,
            doi_mask,
            job_id,
            line_filter,
            include_high_altitude,
            input,
            output_dir,
            skip_rows,
        })
    }

    pub fn resample_options(&self) -> ResampleOptions {
        ResampleOptions {
            vertical_interval: self.vertical_interval,
            max_depth: self.max_depth,
            datum: self.datum,
            doi_mask: self.doi_mask,
        }
    }
}

/// Parse `key = value` control text into a raw map. Later duplicates win,
/// mirroring how the original tool read its control files.
pub fn parse_control_text(text: &str) -> Result<BTreeMap<String, String>, AemError> {
    let mut map = BTreeMap::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| AemError::ControlSyntax {
            line: idx + 1,
            reason: format!("expected 'key = value', got '{line}'"),
        })?;
        map.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(map)
}

/// Boolean parsing with the exact value sets the original control files used.
/// Anything outside the two sets is a configuration error.
pub fn parse_bool(value: &str) -> Result<bool, AemError> {
    let v = value.trim().to_ascii_lowercase();
    match v.as_str() {
        "yes" | "y" | "true" | "t" | "1" => Ok(true),
        "no" | "n" | "false" | "f" | "0" | "0.0" | "" | "none" | "[]" | "{}" => Ok(false),
        _ => Err(AemError::InvalidValue {
            key: "boolean".to_string(),
            value: value.to_string(),
            reason: "not a recognized boolean".to_string(),
        }),
    }
}

fn require<'m>(map: &'m BTreeMap<String, String>, key: &'static str) -> Result<&'m str, AemError> {
    map.get(key)
        .map(String::as_str)
        .ok_or(AemError::MissingKey(key))
}

fn require_col(map: &BTreeMap<String, String>, key: &'static str) -> Result<usize, AemError> {
    let value = require(map, key)?;
    parse_col(key, value)
}

fn optional_col(
    map: &BTreeMap<String, String>,
    key: &'static str,
) -> Result<Option<usize>, AemError> {
    match map.get(key) {
        Some(v) => parse_col(key, v).map(Some),
        None => Ok(None),
    }
}

fn parse_col(key: &str, value: &str) -> Result<usize, AemError> {
    let col: usize = value.trim().parse().map_err(|_| AemError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: "not an integer column number".to_string(),
    })?;
    if col == 0 {
        return Err(AemError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "column numbers are 1-based".to_string(),
        });
    }
    Ok(col)
}

fn parse_f64(map: &BTreeMap<String, String>, key: &'static str) -> Result<f64, AemError> {
    let value = require(map, key)?;
    value.trim().parse().map_err(|_| AemError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: "not a number".to_string(),
    })
}

fn optional_f64(
    map: &BTreeMap<String, String>,
    key: &'static str,
) -> Result<Option<f64>, AemError> {
    match map.get(key) {
        Some(_) => parse_f64(map, key).map(Some),
        None => Ok(None),
    }
}

fn optional_bool(
    map: &BTreeMap<String, String>,
    key: &'static str,
) -> Result<Option<bool>, AemError> {
    match map.get(key) {
        Some(v) => parse_bool(v)
            .map(Some)
            .map_err(|_| invalid_key(map, key, "not a recognized boolean")),
        None => Ok(None),
    }
}

fn invalid_key(map: &BTreeMap<String, String>, key: &str, reason: &str) -> AemError {
    AemError::InvalidValue {
        key: key.to_string(),
        value: map.get(key).cloned().unwrap_or_default(),
        reason: reason.to_string(),
    }
}

fn resolve_geometry(map: &BTreeMap<String, String>) -> Result<GeometrySpec, AemError> {
    let mut found = Vec::new();
    if let Some(v) = map.get("thickness_cols") {
        found.push(GeometrySpec::Thickness(ColumnRange::parse(
            "thickness_cols",
            v,
        )?));
    }
    if let Some(v) = map.get("layer_top_depth_cols") {
        found.push(GeometrySpec::LayerTopDepth(ColumnRange::parse(
            "layer_top_depth_cols",
            v,
        )?));
    }
    if let Some(v) = map.get("layer_top_elevation_cols") {
        found.push(GeometrySpec::LayerTopElevation(ColumnRange::parse(
            "layer_top_elevation_cols",
            v,
        )?));
    }
    if found.len() != 1 {
        return Err(AemError::GeometryRepresentation(found.len()));
    }
    Ok(found[0])
}

fn resolve_input(map: &BTreeMap<String, String>) -> Result<InputSpec, AemError> {
    let file = map.get("input_file");
    let dir = map.get("input_dir").or_else(|| map.get("AEM_dir"));
    match (file, dir) {
        (Some(f), None) => Ok(InputSpec::File(PathBuf::from(f))),
        (None, Some(d)) => Ok(InputSpec::Dir {
            dir: PathBuf::from(d),
            extension: map
                .get("file_extension")
                .cloned()
                .unwrap_or_else(|| "asc".to_string()),
        }),
        (Some(_), Some(_)) => Err(AemError::InvalidValue {
            key: "input_file".to_string(),
            value: String::new(),
            reason: "input_file and input_dir are mutually exclusive".to_string(),
        }),
        (None, None) => Err(AemError::MissingKey("input_file")),
    }
}
