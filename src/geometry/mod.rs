//! Time & geometry oracle.
//!
//! Pure, deterministic geometry behind a narrow interface: satellite state
//! from orbital elements, sun illumination, pass windows, and the coordinate
//! transforms the field-of-view and link layers build on. The engine treats
//! the oracle as an external collaborator — models call it synchronously and
//! serialize on the scheduler, so implementations need no interior locking.
//!
//! - [`GeometryOracle`] — the trait every implementation satisfies
//! - [`KeplerOracle`] — the default first-order propagator
//! - [`FixedOracle`] — a scripted double for tests

pub mod kepler;
pub mod tle;

pub use kepler::KeplerOracle;
pub use tle::Tle;

use serde::Deserialize;
use thiserror::Error;

use crate::kernel::{Interval, SimTime, TimeWindow};

/// Earth gravitational parameter, m^3/s^2.
pub const MU_EARTH: f64 = 3.986_004_418e14;
/// WGS84 equatorial radius, m.
pub const R_EARTH: f64 = 6_378_137.0;
/// WGS84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// Second zonal harmonic.
pub const J2: f64 = 1.082_626_68e-3;

/// Cartesian triple: meters in an Earth-centered frame, or m/s.
pub type Vec3 = [f64; 3];

/// A geodetic ground point.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct GroundLocation {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub elevation_m: f64,
}

/// Slant geometry between a satellite and a ground point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RelativeMotion {
    pub distance_m: f64,
    pub range_rate_m_s: f64,
}

/// Geometry failures are non-fatal: the calling model logs and skips the
/// epoch for that satellite.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeometryError {
    #[error("TLE line {line}: {reason}")]
    BadTle { line: u8, reason: String },

    #[error("propagation failed for satellite {norad_id}: {reason}")]
    Propagation { norad_id: u32, reason: String },
}

/// The astrodynamics interface the engine depends on. Deterministic for
/// identical inputs.
pub trait GeometryOracle: Send + Sync {
    /// Satellite position at `t`, meters, Earth-centered inertial.
    fn position(&self, sat: &Tle, t: SimTime) -> Result<Vec3, GeometryError>;

    /// Satellite velocity at `t`, m/s, Earth-centered inertial.
    fn velocity(&self, sat: &Tle, t: SimTime) -> Result<Vec3, GeometryError>;

    /// Whether the satellite is outside the Earth's shadow at `t`.
    fn in_sunlight(&self, sat: &Tle, t: SimTime) -> Result<bool, GeometryError>;

    /// Contiguous intervals within `window` during which the satellite is at
    /// or above `min_elevation_deg` as seen from `ground`. Endpoints at the
    /// window boundary are clipped.
    fn passes(
        &self,
        sat: &Tle,
        ground: &GroundLocation,
        window: TimeWindow,
        min_elevation_deg: f64,
    ) -> Result<Vec<Interval>, GeometryError>;

    /// Slant range and range rate between the satellite and `ground` at `t`.
    fn relative_motion(
        &self,
        sat: &Tle,
        ground: &GroundLocation,
        t: SimTime,
    ) -> Result<RelativeMotion, GeometryError>;

    /// Bulk propagation over a whole run: positions at `window.start + k*delta`
    /// for every epoch in the window. One-shot propagation is the documented
    /// fast path for the orbital model's full-run precompute.
    fn positions(&self, sat: &Tle, window: TimeWindow, delta: f64) -> Result<Vec<Vec3>, GeometryError> {
        let mut out = Vec::with_capacity(window.epoch_count(delta) as usize);
        for index in 0..window.epoch_count(delta) {
            out.push(self.position(sat, window.epoch_time(index, delta))?);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Vector helpers
// ---------------------------------------------------------------------------

pub(crate) mod vec3 {
    use super::Vec3;

    pub fn dot(a: Vec3, b: Vec3) -> f64 {
        a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
    }

    pub fn norm(a: Vec3) -> f64 {
        dot(a, a).sqrt()
    }

    pub fn sub(a: Vec3, b: Vec3) -> Vec3 {
        [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
    }

    pub fn scale(a: Vec3, k: f64) -> Vec3 {
        [a[0] * k, a[1] * k, a[2] * k]
    }

    pub fn distance(a: Vec3, b: Vec3) -> f64 {
        norm(sub(a, b))
    }
}

// ---------------------------------------------------------------------------
// Frame transforms
// ---------------------------------------------------------------------------

/// Greenwich mean sidereal time at `t`, radians.
pub fn gmst_rad(t: SimTime) -> f64 {
    let jd = t.as_unix() / 86400.0 + 2_440_587.5;
    let d = jd - 2_451_545.0;
    let gmst_deg = (280.460_618_37 + 360.985_647_366_29 * d).rem_euclid(360.0);
    gmst_deg.to_radians()
}

/// Rotates an ECI vector into the Earth-fixed frame at `t`.
pub fn eci_to_ecef(p: Vec3, t: SimTime) -> Vec3 {
    let theta = gmst_rad(t);
    let (sin_t, cos_t) = theta.sin_cos();
    [
        p[0] * cos_t + p[1] * sin_t,
        -p[0] * sin_t + p[1] * cos_t,
        p[2],
    ]
}

/// Rotates an Earth-fixed vector into ECI at `t`.
pub fn ecef_to_eci(p: Vec3, t: SimTime) -> Vec3 {
    let theta = gmst_rad(t);
    let (sin_t, cos_t) = theta.sin_cos();
    [
        p[0] * cos_t - p[1] * sin_t,
        p[0] * sin_t + p[1] * cos_t,
        p[2],
    ]
}

/// WGS84 geodetic location to Earth-fixed cartesian, meters.
pub fn ground_to_ecef(loc: &GroundLocation) -> Vec3 {
    let lat = loc.latitude_deg.to_radians();
    let lon = loc.longitude_deg.to_radians();
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let n = R_EARTH / (1.0 - e2 * lat.sin().powi(2)).sqrt();
    [
        (n + loc.elevation_m) * lat.cos() * lon.cos(),
        (n + loc.elevation_m) * lat.cos() * lon.sin(),
        (n * (1.0 - e2) + loc.elevation_m) * lat.sin(),
    ]
}

/// Ground location in ECI at `t`.
pub fn ground_to_eci(loc: &GroundLocation, t: SimTime) -> Vec3 {
    ecef_to_eci(ground_to_ecef(loc), t)
}

/// Elevation of a satellite (ECI position) above the local horizon of
/// `ground` at `t`, degrees. Negative below the horizon.
pub fn elevation_deg(sat_eci: Vec3, ground: &GroundLocation, t: SimTime) -> f64 {
    let sat_ecef = eci_to_ecef(sat_eci, t);
    let gnd_ecef = ground_to_ecef(ground);
    let range = vec3::sub(sat_ecef, gnd_ecef);
    let lat = ground.latitude_deg.to_radians();
    let lon = ground.longitude_deg.to_radians();
    // Geodetic up.
    let up = [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()];
    let r = vec3::norm(range);
    if r == 0.0 {
        return 90.0;
    }
    (vec3::dot(range, up) / r).asin().to_degrees()
}

/// Whether the straight line between two ECI points clears the Earth.
/// Used for satellite-to-satellite visibility.
pub fn los_clear(a: Vec3, b: Vec3) -> bool {
    let ab = vec3::sub(b, a);
    let len2 = vec3::dot(ab, ab);
    if len2 == 0.0 {
        return true;
    }
    // Closest approach of the segment to the Earth's center.
    let s = (-vec3::dot(a, ab) / len2).clamp(0.0, 1.0);
    let closest = [a[0] + s * ab[0], a[1] + s * ab[1], a[2] + s * ab[2]];
    vec3::norm(closest) > R_EARTH
}

/// Unit vector from the Earth to the Sun in ECI at `t`, from a low-precision
/// solar ephemeris (good to ~0.01 deg over decades).
pub fn sun_direction_eci(t: SimTime) -> Vec3 {
    let jd = t.as_unix() / 86400.0 + 2_440_587.5;
    let d = jd - 2_451_545.0;
    let g = (357.529 + 0.985_600_28 * d).rem_euclid(360.0).to_radians();
    let q = (280.459 + 0.985_647_36 * d).rem_euclid(360.0);
    let lambda = (q + 1.915 * g.sin() + 0.020 * (2.0 * g).sin()).to_radians();
    let epsilon = (23.439 - 0.000_000_36 * d).to_radians();
    [
        lambda.cos(),
        epsilon.cos() * lambda.sin(),
        epsilon.sin() * lambda.sin(),
    ]
}

/// Cylindrical Earth-shadow test: a point is sunlit unless it sits behind
/// the Earth (relative to the Sun) inside the shadow cylinder.
pub fn point_in_sunlight(p_eci: Vec3, t: SimTime) -> bool {
    let s = sun_direction_eci(t);
    let along = vec3::dot(p_eci, s);
    if along >= 0.0 {
        return true;
    }
    let perp = vec3::sub(p_eci, vec3::scale(s, along));
    vec3::norm(perp) > R_EARTH
}

// ---------------------------------------------------------------------------
// Scripted oracle for tests
// ---------------------------------------------------------------------------

/// A [`GeometryOracle`] that answers from fixed values. Link and FoV tests
/// script it instead of crafting TLEs.
#[derive(Clone, Debug)]
pub struct FixedOracle {
    pub position: Vec3,
    pub velocity: Vec3,
    pub sunlit: bool,
    /// Returned verbatim (clipped to the queried window) for every pair.
    pub pass_list: Vec<Interval>,
    pub range_m: f64,
    pub range_rate_m_s: f64,
}

impl Default for FixedOracle {
    fn default() -> Self {
        Self {
            position: [R_EARTH + 550_000.0, 0.0, 0.0],
            velocity: [0.0, 7_600.0, 0.0],
            sunlit: true,
            pass_list: Vec::new(),
            range_m: 550_000.0,
            range_rate_m_s: 0.0,
        }
    }
}

impl GeometryOracle for FixedOracle {
    fn position(&self, _sat: &Tle, _t: SimTime) -> Result<Vec3, GeometryError> {
        Ok(self.position)
    }

    fn velocity(&self, _sat: &Tle, _t: SimTime) -> Result<Vec3, GeometryError> {
        Ok(self.velocity)
    }

    fn in_sunlight(&self, _sat: &Tle, _t: SimTime) -> Result<bool, GeometryError> {
        Ok(self.sunlit)
    }

    fn passes(
        &self,
        _sat: &Tle,
        _ground: &GroundLocation,
        window: TimeWindow,
        _min_elevation_deg: f64,
    ) -> Result<Vec<Interval>, GeometryError> {
        Ok(self
            .pass_list
            .iter()
            .filter_map(|p| {
                let w = TimeWindow::new(p.start, p.end).clip(&window)?;
                Some(Interval { start: w.start, end: w.end })
            })
            .collect())
    }

    fn relative_motion(
        &self,
        _sat: &Tle,
        _ground: &GroundLocation,
        _t: SimTime,
    ) -> Result<RelativeMotion, GeometryError> {
        Ok(RelativeMotion {
            distance_m: self.range_m,
            range_rate_m_s: self.range_rate_m_s,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ground_to_ecef_equator_prime_meridian() {
        let loc = GroundLocation {
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            elevation_m: 0.0,
        };
        let p = ground_to_ecef(&loc);
        assert!((p[0] - R_EARTH).abs() < 1e-6);
        assert!(p[1].abs() < 1e-6);
        assert!(p[2].abs() < 1e-6);
    }

    #[test]
    fn elevation_is_90_directly_overhead() {
        let loc = GroundLocation {
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            elevation_m: 0.0,
        };
        let t = SimTime::from_unix(1_614_556_800.0); // 2021-03-01 00:00:00
        let overhead = vec3::scale(ground_to_eci(&loc, t), 1.1);
        assert!((elevation_deg(overhead, &loc, t) - 90.0).abs() < 1e-6);
    }

    #[test]
    fn elevation_is_negative_on_far_side() {
        let loc = GroundLocation {
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            elevation_m: 0.0,
        };
        let t = SimTime::from_unix(1_614_556_800.0);
        let antipode = vec3::scale(ground_to_eci(&loc, t), -1.1);
        assert!(elevation_deg(antipode, &loc, t) < 0.0);
    }

    #[test]
    fn los_blocked_through_the_earth() {
        let a = [R_EARTH + 500_000.0, 0.0, 0.0];
        let b = [-(R_EARTH + 500_000.0), 0.0, 0.0];
        assert!(!los_clear(a, b));
        let c = [R_EARTH + 500_000.0, 1_000_000.0, 0.0];
        assert!(los_clear(a, c));
    }

    #[test]
    fn shadow_cylinder_blocks_antisolar_point() {
        let t = SimTime::from_unix(1_614_556_800.0);
        let s = sun_direction_eci(t);
        // A satellite directly behind the Earth from the Sun.
        let behind = vec3::scale(s, -(R_EARTH + 400_000.0));
        assert!(!point_in_sunlight(behind, t));
        // One towards the Sun.
        let front = vec3::scale(s, R_EARTH + 400_000.0);
        assert!(point_in_sunlight(front, t));
    }

    #[test]
    fn fixed_oracle_clips_passes_to_window() {
        let t0 = SimTime::from_unix(0.0);
        let oracle = FixedOracle {
            pass_list: vec![Interval { start: t0.offset(50.0), end: t0.offset(150.0) }],
            ..FixedOracle::default()
        };
        let tle = Tle::parse(super::tle::tests::ISS_1, super::tle::tests::ISS_2).unwrap();
        let ground = GroundLocation {
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            elevation_m: 0.0,
        };
        let window = TimeWindow::new(t0, t0.offset(100.0));
        let passes = oracle.passes(&tle, &ground, window, 0.0).unwrap();
        assert_eq!(passes.len(), 1);
        assert_eq!(passes[0].start.as_unix(), 50.0);
        assert_eq!(passes[0].end.as_unix(), 100.0);
    }
}
