//! Minimal SEG-Y rev-1 writer covering exactly the subset of headers and
//! trace fields the conversion needs. Everything is big-endian; samples are
//! 32-bit IBM floats (data format code 1), matching the encoding the
//! workflow's downstream software expects.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::resample::ResampledLine;
use crate::survey::Fiducial;
use crate::AemError;

pub const TEXT_HEADER_LEN: usize = 3200;
pub const BINARY_HEADER_LEN: usize = 400;
pub const TRACE_HEADER_LEN: usize = 240;

const DATA_FORMAT_IBM_FLOAT: i16 = 1;
const EBCDIC_SPACE: u8 = 0x40;

/// Write one resampled line as a SEG-Y file at `path`.
pub fn write_segy(path: &Path, line: &ResampledLine<'_>, job_id: i32) -> Result<(), AemError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_segy_to(&mut writer, line, job_id)?;
    writer.flush()?;
    Ok(())
}

/// Encode one resampled line into any writer. Trace `i` carries section
/// column `i`; sample 0 of every trace sits at the top-of-grid elevation,
/// which the delay-recording-time field records as a negative datum.
pub fn write_segy_to<W: Write>(
    writer: &mut W,
    line: &ResampledLine<'_>,
    job_id: i32,
) -> Result<(), AemError> {
    let samples = line.grid.len();
    if samples > usize::from(u16::MAX) {
        return Err(AemError::LineData {
            line_id: line.line_id,
            reason: format!("{samples} samples per trace exceeds the SEG-Y 16-bit limit"),
        });
    }
    let ns = samples as u16;
    let line_number = i32::try_from(line.line_id).map_err(|_| AemError::LineData {
        line_id: line.line_id,
        reason: "line id does not fit the SEG-Y 32-bit line-number field".to_string(),
    })?;
    // Vertical metres masquerade as microseconds of pseudo-time.
    let dt_us = (line.grid.step() * 1000.0).round() as u16;
    let delay = -line.grid.top().round() as i16;

    writer.write_all(&textual_header(line, job_id, dt_us))?;
    writer.write_all(&binary_header(line_number, job_id, ns, dt_us))?;
    for (i, fiducial) in line.fiducials.iter().enumerate() {
        writer.write_all(&trace_header(i, fiducial, ns, dt_us, delay))?;
        for &value in line.section.column(i).iter() {
            writer.write_all(&ieee_to_ibm(value as f32).to_be_bytes())?;
        }
    }
    Ok(())
}

fn textual_header(line: &ResampledLine<'_>, job_id: i32, dt_us: u16) -> [u8; TEXT_HEADER_LEN] {
    let cards = [
        format!("C 1 AEM CONDUCTIVITY SECTION, LINE {}", line.line_id),
        format!("C 2 JOB ID {job_id}"),
        format!(
            "C 3 SAMPLES PER TRACE {}  SAMPLE INTERVAL {} US ({} M VERTICAL)",
            line.grid.len(),
            dt_us,
            line.grid.step()
        ),
        format!(
            "C 4 TOP OF GRID ELEVATION {}  DELAY RECORDING TIME {}",
            line.grid.top(),
            -line.grid.top()
        ),
        "C 5 TRACE VALUE -1.0 MARKS AIR, UNCLASSIFIED DEPTH OR BELOW DOI".to_string(),
        "C 6 DATA FORMAT 4-BYTE IBM FLOATING POINT".to_string(),
    ];

    let mut buf = [EBCDIC_SPACE; TEXT_HEADER_LEN];
    for row in 0..40 {
        let text = match row {
            r if r < cards.len() => cards[r].clone(),
            39 => "C40 END TEXTUAL HEADER".to_string(),
            r => format!("C{:>2}", r + 1),
        };
        for (col, byte) in text.bytes().take(80).enumerate() {
            buf[row * 80 + col] = ascii_to_ebcdic(byte);
        }
    }
    buf
}

fn binary_header(line_number: i32, job_id: i32, ns: u16, dt_us: u16) -> [u8; BINARY_HEADER_LEN] {
    let mut buf = [0u8; BINARY_HEADER_LEN];
    put_i32(&mut buf, 0, job_id);
    put_i32(&mut buf, 4, line_number);
    put_u16(&mut buf, 16, dt_us);
    put_u16(&mut buf, 18, dt_us);
    put_u16(&mut buf, 20, ns);
    put_u16(&mut buf, 22, ns);
    put_i16(&mut buf, 24, DATA_FORMAT_IBM_FLOAT);
    // Every trace has the same length and sample interval.
    put_i16(&mut buf, 302, 1);
    buf
}

fn trace_header(
    index: usize,
    fiducial: &Fiducial,
    ns: u16,
    dt_us: u16,
    delay: i16,
) -> [u8; TRACE_HEADER_LEN] {
    let mut buf = [0u8; TRACE_HEADER_LEN];
    // Fiducial sequence number, falling back to the trace index when the
    // survey file carried none.
    let fid = fiducial.fiducial_id.unwrap_or(index as i64) as i32;
    let easting = fiducial.easting.round() as i32;
    let northing = fiducial.northing.round() as i32;

    put_i32(&mut buf, 0, index as i32); // trace sequence within line
    put_i32(&mut buf, 12, fid); // trace number within original field record
    put_i32(&mut buf, 20, fid); // ensemble number
    put_i32(&mut buf, 24, fid); // trace number within ensemble
    put_i32(&mut buf, 40, fiducial.elevation.round() as i32); // receiver group elevation
    // Datum elevations at receiver group (52) and source (56) stay zero.
    put_i16(&mut buf, 68, fiducial.elevation.round() as i16); // elevation scalar slot
    put_i32(&mut buf, 72, easting); // source x
    put_i32(&mut buf, 76, northing); // source y
    put_i32(&mut buf, 80, easting); // group x
    put_i32(&mut buf, 84, northing); // group y
    put_i16(&mut buf, 108, delay); // delay recording time
    put_u16(&mut buf, 114, ns);
    put_u16(&mut buf, 116, dt_us);
    buf
}

fn put_i16(buf: &mut [u8], offset: usize, value: i16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

fn put_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

/// IEEE 754 single to IBM System/360 hexadecimal float. Non-finite input
/// (e.g. an inverted zero resistivity that was surfaced, not clipped) is
/// clamped to the format's largest magnitude so the writer cannot stall.
fn ieee_to_ibm(value: f32) -> u32 {
    if value == 0.0 {
        return 0;
    }
    let sign = if value.is_sign_negative() { 0x8000_0000 } else { 0 };
    if !value.is_finite() {
        return sign | 0x7FFF_FFFF;
    }

    let mut magnitude = f64::from(value.abs());
    let mut exponent: i32 = 64;
    while magnitude >= 1.0 {
        magnitude /= 16.0;
        exponent += 1;
    }
    while magnitude < 1.0 / 16.0 {
        magnitude *= 16.0;
        exponent -= 1;
    }
    let mut fraction = (magnitude * 16_777_216.0).round() as u32; // 2^24
    if fraction >= 1 << 24 {
        fraction >>= 4;
        exponent += 1;
    }
    if exponent > 127 {
        return sign | 0x7FFF_FFFF;
    }
    if exponent < 0 {
        return sign;
    }
    sign | ((exponent as u32) << 24) | (fraction & 0x00FF_FFFF)
}

#[cfg(test)]
fn ibm_to_ieee(bits: u32) -> f32 {
    if bits & 0x7FFF_FFFF == 0 {
        return 0.0;
    }
    let sign = if bits & 0x8000_0000 != 0 { -1.0 } else { 1.0 };
    let exponent = ((bits >> 24) & 0x7F) as i32 - 64;
    let fraction = f64::from(bits & 0x00FF_FFFF) / 16_777_216.0;
    (sign * fraction * 16f64.powi(exponent)) as f32
}

/// Just enough of EBCDIC code page 037 for the card image; anything outside
/// the covered set becomes a space.
fn ascii_to_ebcdic(byte: u8) -> u8 {
    match byte {
        b' ' => 0x40,
        b'.' => 0x4B,
        b'(' => 0x4D,
        b'+' => 0x4E,
        b')' => 0x5D,
        b'-' => 0x60,
        b'/' => 0x61,
        b',' => 0x6B,
        b':' => 0x7A,
        b'=' => 0x7E,
        b'0'..=b'9' => 0xF0 + (byte - b'0'),
        b'A'..=b'I' => 0xC1 + (byte - b'A'),
        b'J'..=b'R' => 0xD1 + (byte - b'J'),
        b'S'..=b'Z' => 0xE2 + (byte - b'S'),
        _ => EBCDIC_SPACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::ElevationGrid;
    use crate::survey::LayerProfile;
    use ndarray::Array2;

    fn read_i16(buf: &[u8], offset: usize) -> i16 {
        i16::from_be_bytes([buf[offset], buf[offset + 1]])
    }

    fn read_u16(buf: &[u8], offset: usize) -> u16 {
        u16::from_be_bytes([buf[offset], buf[offset + 1]])
    }

    fn read_i32(buf: &[u8], offset: usize) -> i32 {
        i32::from_be_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ])
    }

    fn read_u32(buf: &[u8], offset: usize) -> u32 {
        u32::from_be_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ])
    }

    fn test_line(fiducial: &Fiducial) -> ResampledLine<'_> {
        let grid = ElevationGrid::build(110.0, 30.0, 10.0);
        let mut section = Array2::from_elem((grid.len(), 1), -1.0);
        section[(3, 0)] = 0.0125;
        ResampledLine {
            line_id: 200101,
            grid,
            section,
            fiducials: vec![fiducial],
        }
    }

    fn test_fiducial() -> Fiducial {
        Fiducial {
            easting: 512_345.4,
            northing: 6_543_210.6,
            elevation: 100.2,
            line_id: 200101,
            fiducial_id: Some(4711),
            depth_of_investigation: None,
            profile: LayerProfile {
                conductivity: vec![],
                layer_top_elevation: vec![],
            },
        }
    }

    #[test]
    fn ibm_float_matches_the_reference_pattern() {
        assert_eq!(ieee_to_ibm(-118.625), 0xC276_A000);
        assert_eq!(ieee_to_ibm(0.0), 0);
        assert_eq!(ibm_to_ieee(0xC276_A000), -118.625);
    }

    #[test]
    fn ibm_float_round_trips_conductivity_magnitudes() {
        for &v in &[1.0f32, 0.01, 2.5e-3, -0.05, 123.456, -1.0] {
            let back = ibm_to_ieee(ieee_to_ibm(v));
            assert!(
                (back - v).abs() <= v.abs() * 1e-5,
                "{v} round-tripped to {back}"
            );
        }
    }

    #[test]
    fn non_finite_samples_are_clamped_not_looped() {
        assert_eq!(ieee_to_ibm(f32::INFINITY), 0x7FFF_FFFF);
        assert_eq!(ieee_to_ibm(f32::NEG_INFINITY), 0xFFFF_FFFF);
    }

    #[test]
    fn ebcdic_covers_the_card_characters() {
        assert_eq!(ascii_to_ebcdic(b'A'), 0xC1);
        assert_eq!(ascii_to_ebcdic(b'J'), 0xD1);
        assert_eq!(ascii_to_ebcdic(b'S'), 0xE2);
        assert_eq!(ascii_to_ebcdic(b'9'), 0xF9);
        assert_eq!(ascii_to_ebcdic(b'-'), 0x60);
        assert_eq!(ascii_to_ebcdic(b'~'), EBCDIC_SPACE);
    }

    #[test]
    fn file_layout_and_headers() {
        let fiducial = test_fiducial();
        let line = test_line(&fiducial);
        let mut buf = Vec::new();
        write_segy_to(&mut buf, &line, 4207).unwrap();

        let ns = line.grid.len();
        assert_eq!(
            buf.len(),
            TEXT_HEADER_LEN + BINARY_HEADER_LEN + TRACE_HEADER_LEN + ns * 4
        );

        // Textual header is EBCDIC: card 1 starts with 'C'.
        assert_eq!(buf[0], 0xC3);

        // Binary header.
        let bh = TEXT_HEADER_LEN;
        assert_eq!(read_i32(&buf, bh), 4207); // job id
        assert_eq!(read_i32(&buf, bh + 4), 200101); // line number
        assert_eq!(read_u16(&buf, bh + 16), 10_000); // sample interval, us
        assert_eq!(read_u16(&buf, bh + 20), ns as u16);
        assert_eq!(read_i16(&buf, bh + 24), DATA_FORMAT_IBM_FLOAT);
        assert_eq!(read_i16(&buf, bh + 302), 1); // fixed-length traces

        // First trace header.
        let th = bh + BINARY_HEADER_LEN;
        assert_eq!(read_i32(&buf, th), 0); // sequence within line
        assert_eq!(read_i32(&buf, th + 12), 4711); // fiducial id
        assert_eq!(read_i32(&buf, th + 20), 4711);
        assert_eq!(read_i32(&buf, th + 40), 100); // receiver group elevation
        assert_eq!(read_i16(&buf, th + 68), 100); // elevation scalar slot
        assert_eq!(read_i32(&buf, th + 72), 512_345); // source x
        assert_eq!(read_i32(&buf, th + 76), 6_543_211); // source y
        assert_eq!(read_i32(&buf, th + 80), 512_345); // group x
        assert_eq!(read_i16(&buf, th + 108), -110); // delay recording time
        assert_eq!(read_u16(&buf, th + 114), ns as u16);
        assert_eq!(read_u16(&buf, th + 116), 10_000);

        // Samples: sentinel at the top, the one real value where we put it.
        let data = th + TRACE_HEADER_LEN;
        assert_eq!(ibm_to_ieee(read_u32(&buf, data)), -1.0);
        let v = ibm_to_ieee(read_u32(&buf, data + 3 * 4));
        assert!((v - 0.0125).abs() < 1e-7);
    }

    #[test]
    fn oversized_grids_are_rejected() {
        let fiducial = test_fiducial();
        let grid = ElevationGrid::build(70_000.0, 0.0, 1.0);
        let section = Array2::from_elem((grid.len(), 1), -1.0);
        let line = ResampledLine {
            line_id: 1,
            grid,
            section,
            fiducials: vec![&fiducial],
        };
        let mut buf = Vec::new();
        match write_segy_to(&mut buf, &line, 0) {
            Err(AemError::LineData { line_id: 1, .. }) => {}
            other => panic!("expected LineData, got {other:?}"),
        }
    }

    #[test]
    fn line_ids_beyond_the_32_bit_field_are_rejected() {
        let fiducial = test_fiducial();
        let mut line = test_line(&fiducial);
        line.line_id = i64::from(i32::MAX) + 1;
        let mut buf = Vec::new();
        match write_segy_to(&mut buf, &line, 0) {
            Err(AemError::LineData { line_id, .. }) => {
                assert_eq!(line_id, i64::from(i32::MAX) + 1);
            }
            other => panic!("expected LineData, got {other:?}"),
        }
    }

    #[test]
    fn missing_fiducial_id_falls_back_to_the_trace_index() {
        let mut fiducial = test_fiducial();
        fiducial.fiducial_id = None;
        let line = test_line(&fiducial);
        let mut buf = Vec::new();
        write_segy_to(&mut buf, &line, 0).unwrap();
        let th = TEXT_HEADER_LEN + BINARY_HEADER_LEN;
        assert_eq!(read_i32(&buf, th + 12), 0);
    }
}
