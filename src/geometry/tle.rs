//! NORAD two-line-element parsing.
//!
//! Fixed-column format per the public TLE definition. Only the fields the
//! propagator needs are extracted; checksums are not verified.

use chrono::{Duration, TimeZone, Utc};

use crate::kernel::SimTime;

use super::GeometryError;

/// Parsed orbital state of one satellite.
#[derive(Clone, Debug, PartialEq)]
pub struct Tle {
    pub norad_id: u32,
    /// Element-set epoch.
    pub epoch: SimTime,
    pub inclination_deg: f64,
    pub raan_deg: f64,
    pub eccentricity: f64,
    pub arg_perigee_deg: f64,
    pub mean_anomaly_deg: f64,
    pub mean_motion_rev_day: f64,
    /// Drag term, kept for callers that model decay; unused by the
    /// first-order propagator.
    pub bstar: f64,
}

fn field(line: &str, line_no: u8, range: std::ops::Range<usize>) -> Result<&str, GeometryError> {
    line.get(range.clone())
        .map(str::trim)
        .ok_or_else(|| GeometryError::BadTle {
            line: line_no,
            reason: format!("line shorter than column {}", range.end),
        })
}

fn parse_f64(line: &str, line_no: u8, range: std::ops::Range<usize>) -> Result<f64, GeometryError> {
    let text = field(line, line_no, range)?;
    text.parse::<f64>().map_err(|_| GeometryError::BadTle {
        line: line_no,
        reason: format!("`{text}` is not a number"),
    })
}

/// Decodes the TLE exponent notation used for B*, e.g. ` 34469-3` meaning
/// `0.34469e-3`.
fn parse_bstar(text: &str) -> f64 {
    let text = text.trim();
    if text.is_empty() {
        return 0.0;
    }
    let (mantissa_str, exponent_str) = match text.rfind(['+', '-']) {
        Some(pos) if pos > 0 => text.split_at(pos),
        _ => (text, "0"),
    };
    let sign = if mantissa_str.starts_with('-') { -1.0 } else { 1.0 };
    let digits: String = mantissa_str.chars().filter(|c| c.is_ascii_digit()).collect();
    let mantissa: f64 = match digits.parse::<f64>() {
        Ok(v) => v * 10f64.powi(-(digits.len() as i32)),
        Err(_) => return 0.0,
    };
    let exponent: i32 = exponent_str.parse().unwrap_or(0);
    sign * mantissa * 10f64.powi(exponent)
}

impl Tle {
    /// Parses a two-line element pair.
    pub fn parse(line1: &str, line2: &str) -> Result<Self, GeometryError> {
        if !line1.starts_with('1') {
            return Err(GeometryError::BadTle {
                line: 1,
                reason: "line 1 must start with `1`".into(),
            });
        }
        if !line2.starts_with('2') {
            return Err(GeometryError::BadTle {
                line: 2,
                reason: "line 2 must start with `2`".into(),
            });
        }

        let norad_id = field(line1, 1, 2..7)?
            .parse::<u32>()
            .map_err(|_| GeometryError::BadTle {
                line: 1,
                reason: "bad catalog number".into(),
            })?;

        // Epoch: two-digit year (57..99 -> 19xx, else 20xx) and fractional
        // day of year.
        let year2: i32 = field(line1, 1, 18..20)?
            .parse()
            .map_err(|_| GeometryError::BadTle {
                line: 1,
                reason: "bad epoch year".into(),
            })?;
        let year = if year2 >= 57 { 1900 + year2 } else { 2000 + year2 };
        let day_of_year = parse_f64(line1, 1, 20..32)?;
        if !(1.0..367.0).contains(&day_of_year) {
            return Err(GeometryError::BadTle {
                line: 1,
                reason: format!("epoch day {day_of_year} out of range"),
            });
        }
        let jan1 = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single().ok_or(
            GeometryError::BadTle {
                line: 1,
                reason: "bad epoch year".into(),
            },
        )?;
        let epoch_dt = jan1 + Duration::microseconds(((day_of_year - 1.0) * 86400.0 * 1e6) as i64);
        let bstar = parse_bstar(field(line1, 1, 53..61).unwrap_or(""));

        let eccentricity_digits = field(line2, 2, 26..33)?;
        let eccentricity = format!("0.{eccentricity_digits}")
            .parse::<f64>()
            .map_err(|_| GeometryError::BadTle {
                line: 2,
                reason: "bad eccentricity".into(),
            })?;

        Ok(Self {
            norad_id,
            epoch: SimTime::from_datetime(epoch_dt),
            inclination_deg: parse_f64(line2, 2, 8..16)?,
            raan_deg: parse_f64(line2, 2, 17..25)?,
            eccentricity,
            arg_perigee_deg: parse_f64(line2, 2, 34..42)?,
            mean_anomaly_deg: parse_f64(line2, 2, 43..51)?,
            mean_motion_rev_day: parse_f64(line2, 2, 52..63)?,
            bstar,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    // ISS (ZARYA), epoch 2021-060.
    pub(crate) const ISS_1: &str =
        "1 25544U 98067A   21060.51504887  .00001303  00000-0  32063-4 0  9995";
    pub(crate) const ISS_2: &str =
        "2 25544  51.6441 104.4568 0002935  83.8739  62.5868 15.48988046271892";

    #[test]
    fn parses_iss_elements() {
        let tle = Tle::parse(ISS_1, ISS_2).unwrap();
        assert_eq!(tle.norad_id, 25544);
        assert!((tle.inclination_deg - 51.6441).abs() < 1e-9);
        assert!((tle.raan_deg - 104.4568).abs() < 1e-9);
        assert!((tle.eccentricity - 0.0002935).abs() < 1e-12);
        assert!((tle.mean_motion_rev_day - 15.48988046).abs() < 1e-6);
        let epoch = tle.epoch.to_datetime();
        assert_eq!(epoch.format("%Y-%m-%d").to_string(), "2021-03-01");
    }

    #[test]
    fn decodes_bstar_exponent_notation() {
        assert!((parse_bstar(" 32063-4") - 0.32063e-4).abs() < 1e-12);
        assert!((parse_bstar("-11606-4") - -0.11606e-4).abs() < 1e-12);
        assert_eq!(parse_bstar(" 00000-0"), 0.0);
        assert_eq!(parse_bstar(""), 0.0);
    }

    #[test]
    fn rejects_swapped_lines() {
        let err = Tle::parse(ISS_2, ISS_1).unwrap_err();
        assert!(matches!(err, GeometryError::BadTle { line: 1, .. }));
    }
}
