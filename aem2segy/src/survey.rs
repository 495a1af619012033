//! Survey loading: whitespace-delimited ASCII rows into per-fiducial
//! conductivity/layer-geometry profiles.
//!
//! Every configured column index is checked against the table width before a
//! single value is read; from then on rows are isolated, so one mangled row
//! skips one fiducial instead of failing the file.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{Config, GeometrySpec};
use crate::AemError;

/// Step-function description of the subsurface at one fiducial. The two
/// arrays are always the same length; `layer_top_elevation` is absolute and
/// non-increasing with depth once normalized.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayerProfile {
    pub conductivity: Vec<f64>,
    pub layer_top_elevation: Vec<f64>,
}

/// One survey sample point along a flight line.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Fiducial {
    pub easting: f64,
    pub northing: f64,
    /// Ground surface elevation in survey datum units.
    pub elevation: f64,
    pub line_id: i64,
    pub fiducial_id: Option<i64>,
    pub depth_of_investigation: Option<f64>,
    pub profile: LayerProfile,
}

/// Data-quality findings from one file load. None of these abort the load;
/// the caller decides how loudly to report them.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct LoadReport {
    pub rows_read: usize,
    pub rows_skipped: usize,
    /// Conductivity values that came out NaN or infinite after the unit
    /// transform, e.g. inverted zero resistivities.
    pub non_finite_conductivities: usize,
}

/// All fiducials from one survey file, in row order.
#[derive(Debug)]
pub struct Survey {
    fiducials: Vec<Fiducial>,
}

/// One flight line's fiducials, borrowed from the survey in row order.
pub struct Line<'a> {
    pub id: i64,
    pub fiducials: Vec<&'a Fiducial>,
}

impl Survey {
    pub fn load(path: &Path, config: &Config) -> Result<(Survey, LoadReport), AemError> {
        let text = fs::read_to_string(path)?;
        parse_table(&text, config, &path.display().to_string())
    }

    pub fn from_fiducials(fiducials: Vec<Fiducial>) -> Survey {
        Survey { fiducials }
    }

    pub fn fiducials(&self) -> &[Fiducial] {
        &self.fiducials
    }

    /// Distinct line ids in first-appearance order.
    pub fn line_ids(&self) -> Vec<i64> {
        let mut ids = Vec::new();
        for f in &self.fiducials {
            if !ids.contains(&f.line_id) {
                ids.push(f.line_id);
            }
        }
        ids
    }

    pub fn line(&self, id: i64) -> Line<'_> {
        Line {
            id,
            fiducials: self.fiducials.iter().filter(|f| f.line_id == id).collect(),
        }
    }
}

/// Leading-digit-9 line ids denote calibration/high-altitude passes. Whether
/// they are converted is the caller's policy, not the loader's.
pub fn is_high_altitude(line_id: i64) -> bool {
    let mut n = line_id.unsigned_abs();
    while n >= 10 {
        n /= 10;
    }
    n == 9
}

fn parse_table(
    text: &str,
    config: &Config,
    source: &str,
) -> Result<(Survey, LoadReport), AemError> {
    let mut report = LoadReport::default();
    let mut fiducials = Vec::new();
    let mut width_checked = false;

    for line in text.lines().skip(config.skip_rows) {
        if line.trim().is_empty() {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if !width_checked {
            validate_width(config, tokens.len())?;
            width_checked = true;
        }
        match parse_row(&tokens, config) {
            Some(fiducial) => {
                report.rows_read += 1;
                report.non_finite_conductivities += fiducial
                    .profile
                    .conductivity
                    .iter()
                    .filter(|v| !v.is_finite())
                    .count();
                fiducials.push(fiducial);
            }
            None => report.rows_skipped += 1,
        }
    }

    if !width_checked {
        return Err(AemError::EmptyTable(source.to_string()));
    }
    Ok((Survey::from_fiducials(fiducials), report))
}

/// Reject the configuration before reading any value if an index falls off
/// the table. The off-by-one risk lives entirely here: control files are
/// 1-based, everything downstream is 0-based.
fn validate_width(config: &Config, width: usize) -> Result<(), AemError> {
    let mut singles: Vec<(&'static str, usize)> = vec![
        ("easting_col", config.easting_col),
        ("northing_col", config.northing_col),
        ("elevation_col", config.elevation_col),
        ("line_col", config.line_col),
    ];
    if let Some(c) = config.fiducial_col {
        singles.push(("fiducial_col", c));
    }
    if let Some(c) = config.doi_col {
        singles.push(("doi_col", c));
    }
    for (role, col) in singles {
        if col > width {
            return Err(AemError::ColumnOutOfRange { role, column: col, width });
        }
    }
    if config.conductivity_cols.last > width {
        return Err(AemError::ColumnOutOfRange {
            role: "conductivity_cols",
            column: config.conductivity_cols.last,
            width,
        });
    }
    let geometry_role = match config.geometry {
        GeometrySpec::Thickness(_) => "thickness_cols",
        GeometrySpec::LayerTopDepth(_) => "layer_top_depth_cols",
        GeometrySpec::LayerTopElevation(_) => "layer_top_elevation_cols",
    };
    if config.geometry.range().last > width {
        return Err(AemError::ColumnOutOfRange {
            role: geometry_role,
            column: config.geometry.range().last,
            width,
        });
    }
    Ok(())
}

fn parse_row(tokens: &[&str], config: &Config) -> Option<Fiducial> {
    let field = |col_1based: usize| -> Option<f64> {
        tokens.get(col_1based - 1)?.parse::<f64>().ok()
    };

    let easting = field(config.easting_col)?;
    let northing = field(config.northing_col)?;
    let elevation = field(config.elevation_col)?;
    let line_id = parse_int_like(tokens.get(config.line_col - 1)?)?;
    let fiducial_id = config
        .fiducial_col
        .and_then(|c| tokens.get(c - 1))
        .and_then(|t| parse_int_like(t));
    let depth_of_investigation = config
        .doi_col
        .and_then(|c| field(c))
        .filter(|v| v.is_finite());

    let mut conductivity = Vec::with_capacity(config.conductivity_cols.len());
    for idx in config.conductivity_cols.indices() {
        let raw: f64 = tokens.get(idx)?.parse().ok()?;
        let value = if config.resistivity { 1.0 / raw } else { raw };
        conductivity.push(value * config.scaling_factor);
    }

    let mut raw_geometry = Vec::with_capacity(config.geometry.range().len());
    for idx in config.geometry.range().indices() {
        raw_geometry.push(tokens.get(idx)?.parse::<f64>().ok()?);
    }
    let layer_top_elevation = normalize_geometry(config.geometry, &raw_geometry, elevation);

    Some(Fiducial {
        easting,
        northing,
        elevation,
        line_id,
        fiducial_id,
        depth_of_investigation,
        profile: LayerProfile {
            conductivity,
            layer_top_elevation,
        },
    })
}

/// Normalize any of the three interchangeable representations to absolute
/// layer-top elevations: thickness accumulates to depth first, depth
/// subtracts from the surface elevation, elevation passes through.
fn normalize_geometry(geometry: GeometrySpec, raw: &[f64], elevation: f64) -> Vec<f64> {
    match geometry {
        GeometrySpec::Thickness(_) => {
            let mut depth = 0.0;
            let mut tops = Vec::with_capacity(raw.len());
            for &thickness in raw {
                tops.push(elevation - depth);
                depth += thickness;
            }
            tops
        }
        GeometrySpec::LayerTopDepth(_) => raw.iter().map(|d| elevation - d).collect(),
        GeometrySpec::LayerTopElevation(_) => raw.to_vec(),
    }
}

/// Line/fiducial columns are often written as floats ("200101.0"); accept
/// both spellings, truncating toward zero like the original loader.
fn parse_int_like(token: &str) -> Option<i64> {
    if let Ok(v) = token.parse::<i64>() {
        return Some(v);
    }
    let v: f64 = token.parse().ok()?;
    if v.is_finite() {
        Some(v as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnRange, InputSpec};
    use std::path::PathBuf;

    // Layout: easting northing elevation line cond1..cond3 geom1..geom3
    fn test_config(geometry: GeometrySpec) -> Config {
        Config {
            easting_col: 1,
            northing_col: 2,
            elevation_col: 3,
            line_col: 4,
            fiducial_col: None,
            doi_col: None,
            conductivity_cols: ColumnRange { first: 5, last: 7 },
            geometry,
            vertical_interval: 10.0,
            max_depth: 100.0,
            datum: None,
            resistivity: false,
            scaling_factor: 1.0,
            doi_mask: false,
            job_id: None,
            line_filter: None,
            include_high_altitude: false,
            input: InputSpec::File(PathBuf::from("unused")),
            output_dir: PathBuf::from("unused"),
            skip_rows: 0,
        }
    }

    fn thickness_config() -> Config {
        test_config(GeometrySpec::Thickness(ColumnRange { first: 8, last: 10 }))
    }

    #[test]
    fn thickness_normalizes_to_layer_top_elevations() {
        let text = "500000 6500000 100 200101 0.01 0.02 0.03 10 20 30\n";
        let (survey, report) = parse_table(text, &thickness_config(), "test").unwrap();
        assert_eq!(report.rows_read, 1);
        assert_eq!(report.rows_skipped, 0);
        let profile = &survey.fiducials()[0].profile;
        assert_eq!(profile.layer_top_elevation, vec![100.0, 90.0, 70.0]);
        assert_eq!(profile.conductivity, vec![0.01, 0.02, 0.03]);
    }

    #[test]
    fn layer_top_depth_subtracts_from_surface() {
        let config = test_config(GeometrySpec::LayerTopDepth(ColumnRange { first: 8, last: 10 }));
        let text = "500000 6500000 120 200101 0.01 0.02 0.03 0 15 40\n";
        let (survey, _) = parse_table(text, &config, "test").unwrap();
        assert_eq!(
            survey.fiducials()[0].profile.layer_top_elevation,
            vec![120.0, 105.0, 80.0]
        );
    }

    #[test]
    fn layer_top_elevation_passes_through() {
        let config =
            test_config(GeometrySpec::LayerTopElevation(ColumnRange { first: 8, last: 10 }));
        let text = "500000 6500000 120 200101 0.01 0.02 0.03 120 100 60\n";
        let (survey, _) = parse_table(text, &config, "test").unwrap();
        assert_eq!(
            survey.fiducials()[0].profile.layer_top_elevation,
            vec![120.0, 100.0, 60.0]
        );
    }

    #[test]
    fn resistivity_is_inverted_then_scaled() {
        let mut config = thickness_config();
        config.resistivity = true;
        let text = "0 0 100 1 50 25 10 10 20 30\n";
        let (survey, report) = parse_table(text, &config, "test").unwrap();
        assert_eq!(
            survey.fiducials()[0].profile.conductivity,
            vec![0.02, 0.04, 0.1]
        );
        assert_eq!(report.non_finite_conductivities, 0);

        config.resistivity = false;
        config.scaling_factor = 0.001;
        let (survey, _) = parse_table(text, &config, "test").unwrap();
        assert_eq!(
            survey.fiducials()[0].profile.conductivity,
            vec![0.05, 0.025, 0.01]
        );
    }

    #[test]
    fn zero_resistivity_surfaces_as_non_finite() {
        let mut config = thickness_config();
        config.resistivity = true;
        let text = "0 0 100 1 0 25 10 10 20 30\n";
        let (survey, report) = parse_table(text, &config, "test").unwrap();
        assert_eq!(report.non_finite_conductivities, 1);
        assert!(survey.fiducials()[0].profile.conductivity[0].is_infinite());
    }

    #[test]
    fn lines_group_by_equality_in_first_appearance_order() {
        let text = "\
            0 0 100 1 0.1 0.2 0.3 10 20 30\n\
            0 0 100 2 0.1 0.2 0.3 10 20 30\n\
            1 0 100 1 0.1 0.2 0.3 10 20 30\n";
        let (survey, _) = parse_table(text, &thickness_config(), "test").unwrap();
        assert_eq!(survey.line_ids(), vec![1, 2]);
        let line = survey.line(1);
        assert_eq!(line.fiducials.len(), 2);
        assert_eq!(line.fiducials[0].easting, 0.0);
        assert_eq!(line.fiducials[1].easting, 1.0);
        assert_eq!(survey.line(2).fiducials.len(), 1);
    }

    #[test]
    fn short_and_mangled_rows_are_skipped_not_fatal() {
        let text = "\
            0 0 100 1 0.1 0.2 0.3 10 20 30\n\
            0 0 100 1 0.1 0.2\n\
            0 0 abc 1 0.1 0.2 0.3 10 20 30\n";
        let (survey, report) = parse_table(text, &thickness_config(), "test").unwrap();
        assert_eq!(report.rows_read, 1);
        assert_eq!(report.rows_skipped, 2);
        assert_eq!(survey.fiducials().len(), 1);
    }

    #[test]
    fn out_of_range_column_is_a_configuration_error() {
        let mut config = thickness_config();
        config.easting_col = 99;
        let text = "0 0 100 1 0.1 0.2 0.3 10 20 30\n";
        match parse_table(text, &config, "test") {
            Err(AemError::ColumnOutOfRange { role, column: 99, width: 10 }) => {
                assert_eq!(role, "easting_col");
            }
            other => panic!("expected ColumnOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn empty_table_fails_fast() {
        match parse_table("\n\n", &thickness_config(), "empty.asc") {
            Err(AemError::EmptyTable(source)) => assert_eq!(source, "empty.asc"),
            other => panic!("expected EmptyTable, got {other:?}"),
        }
    }

    #[test]
    fn optional_fiducial_and_doi_columns() {
        let mut config = thickness_config();
        config.fiducial_col = Some(11);
        config.doi_col = Some(12);
        let text = "0 0 100 1 0.1 0.2 0.3 10 20 30 4711 85.5\n";
        let (survey, _) = parse_table(text, &config, "test").unwrap();
        let f = &survey.fiducials()[0];
        assert_eq!(f.fiducial_id, Some(4711));
        assert_eq!(f.depth_of_investigation, Some(85.5));
    }

    #[test]
    fn skip_rows_drops_the_header() {
        let mut config = thickness_config();
        config.skip_rows = 1;
        let text = "east north elev line c1 c2 c3 t1 t2 t3\n0 0 100 1 0.1 0.2 0.3 10 20 30\n";
        let (survey, report) = parse_table(text, &config, "test").unwrap();
        assert_eq!(report.rows_read, 1);
        assert_eq!(survey.fiducials().len(), 1);
    }

    #[test]
    fn float_spelled_line_ids_parse() {
        let text = "0 0 100 200101.0 0.1 0.2 0.3 10 20 30\n";
        let (survey, _) = parse_table(text, &thickness_config(), "test").unwrap();
        assert_eq!(survey.fiducials()[0].line_id, 200101);
    }

    #[test]
    fn high_altitude_predicate_checks_the_leading_digit() {
        assert!(is_high_altitude(900123));
        assert!(is_high_altitude(9));
        assert!(!is_high_altitude(200101));
        assert!(!is_high_altitude(1900));
        assert!(!is_high_altitude(89));
    }
}
