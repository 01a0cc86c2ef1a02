//! First-order Kepler propagator.
//!
//! Mean-motion advance with J2 secular drift of the node and perigee, a
//! Newton-solved eccentric anomaly, and the perifocal-to-ECI rotation. Not an
//! SGP4 replacement: drag and short-period perturbations are ignored, which
//! keeps propagation exactly reproducible and is accurate to a few kilometers
//! over the day-scale windows the simulator runs.

use crate::kernel::{Interval, SimTime, TimeWindow};

use super::{
    elevation_deg, point_in_sunlight, vec3, GeometryError, GeometryOracle, GroundLocation,
    RelativeMotion, Tle, Vec3, J2, MU_EARTH, R_EARTH,
};

/// Coarse sampling step for pass scanning, seconds. Crossings are refined by
/// bisection, so the step only has to be shorter than the shortest pass.
const PASS_SCAN_STEP_S: f64 = 10.0;
/// Bisection tolerance for pass boundaries, seconds.
const PASS_EDGE_TOL_S: f64 = 0.1;

const NEWTON_TOL: f64 = 1e-12;
const NEWTON_MAX_ITER: u32 = 50;

/// The default [`GeometryOracle`].
#[derive(Clone, Copy, Debug, Default)]
pub struct KeplerOracle;

/// Osculating state at one instant.
struct State {
    position: Vec3,
    velocity: Vec3,
}

impl KeplerOracle {
    pub fn new() -> Self {
        Self
    }

    fn propagate(&self, sat: &Tle, t: SimTime) -> Result<State, GeometryError> {
        let e = sat.eccentricity;
        if !(0.0..1.0).contains(&e) {
            return Err(GeometryError::Propagation {
                norad_id: sat.norad_id,
                reason: format!("eccentricity {e} is not elliptical"),
            });
        }
        let n = sat.mean_motion_rev_day * 2.0 * std::f64::consts::PI / 86400.0;
        if n <= 0.0 {
            return Err(GeometryError::Propagation {
                norad_id: sat.norad_id,
                reason: "non-positive mean motion".into(),
            });
        }
        let a = (MU_EARTH / (n * n)).cbrt();
        let inc = sat.inclination_deg.to_radians();
        let dt = t.seconds_since(sat.epoch);

        // J2 secular drift of the ascending node and argument of perigee.
        let p_semi = a * (1.0 - e * e);
        let j2_factor = n * J2 * (R_EARTH / p_semi).powi(2);
        let raan_dot = -1.5 * j2_factor * inc.cos();
        let argp_dot = 0.75 * j2_factor * (5.0 * inc.cos().powi(2) - 1.0);

        let raan = sat.raan_deg.to_radians() + raan_dot * dt;
        let argp = sat.arg_perigee_deg.to_radians() + argp_dot * dt;
        let mean_anomaly =
            (sat.mean_anomaly_deg.to_radians() + n * dt).rem_euclid(2.0 * std::f64::consts::PI);

        let eccentric = solve_kepler(mean_anomaly, e).ok_or(GeometryError::Propagation {
            norad_id: sat.norad_id,
            reason: "Kepler iteration did not converge".into(),
        })?;

        let true_anomaly = ((1.0 - e * e).sqrt() * eccentric.sin()).atan2(eccentric.cos() - e);
        let radius = a * (1.0 - e * eccentric.cos());

        let (sin_nu, cos_nu) = true_anomaly.sin_cos();
        let r_pf = [radius * cos_nu, radius * sin_nu, 0.0];
        let v_scale = (MU_EARTH / p_semi).sqrt();
        let v_pf = [-v_scale * sin_nu, v_scale * (e + cos_nu), 0.0];

        let rot = perifocal_to_eci(raan, inc, argp);
        Ok(State {
            position: apply(rot, r_pf),
            velocity: apply(rot, v_pf),
        })
    }
}

/// Newton iteration for the eccentric anomaly. `None` when it fails to
/// converge (pathological eccentricity).
fn solve_kepler(mean_anomaly: f64, e: f64) -> Option<f64> {
    let mut eccentric = if e < 0.8 { mean_anomaly } else { std::f64::consts::PI };
    for _ in 0..NEWTON_MAX_ITER {
        let f = eccentric - e * eccentric.sin() - mean_anomaly;
        let step = f / (1.0 - e * eccentric.cos());
        eccentric -= step;
        if step.abs() < NEWTON_TOL {
            return Some(eccentric);
        }
    }
    None
}

/// Row-major rotation matrix R3(-raan) * R1(-inc) * R3(-argp).
fn perifocal_to_eci(raan: f64, inc: f64, argp: f64) -> [[f64; 3]; 3] {
    let (sin_o, cos_o) = raan.sin_cos();
    let (sin_i, cos_i) = inc.sin_cos();
    let (sin_w, cos_w) = argp.sin_cos();
    [
        [
            cos_o * cos_w - sin_o * sin_w * cos_i,
            -cos_o * sin_w - sin_o * cos_w * cos_i,
            sin_o * sin_i,
        ],
        [
            sin_o * cos_w + cos_o * sin_w * cos_i,
            -sin_o * sin_w + cos_o * cos_w * cos_i,
            -cos_o * sin_i,
        ],
        [sin_w * sin_i, cos_w * sin_i, cos_i],
    ]
}

fn apply(m: [[f64; 3]; 3], v: Vec3) -> Vec3 {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

impl GeometryOracle for KeplerOracle {
    fn position(&self, sat: &Tle, t: SimTime) -> Result<Vec3, GeometryError> {
        Ok(self.propagate(sat, t)?.position)
    }

    fn velocity(&self, sat: &Tle, t: SimTime) -> Result<Vec3, GeometryError> {
        Ok(self.propagate(sat, t)?.velocity)
    }

    fn in_sunlight(&self, sat: &Tle, t: SimTime) -> Result<bool, GeometryError> {
        Ok(point_in_sunlight(self.propagate(sat, t)?.position, t))
    }

    fn passes(
        &self,
        sat: &Tle,
        ground: &GroundLocation,
        window: TimeWindow,
        min_elevation_deg: f64,
    ) -> Result<Vec<Interval>, GeometryError> {
        let visible = |t: SimTime| -> Result<bool, GeometryError> {
            Ok(elevation_deg(self.propagate(sat, t)?.position, ground, t) >= min_elevation_deg)
        };

        let span = window.end.seconds_since(window.start);
        if span < 0.0 {
            return Ok(Vec::new());
        }

        let mut passes = Vec::new();
        let mut open_start: Option<SimTime> = None;
        let mut prev_t = window.start;
        let mut prev_vis = visible(prev_t)?;
        if prev_vis {
            open_start = Some(window.start);
        }

        let mut offset = PASS_SCAN_STEP_S;
        loop {
            let t = if offset >= span { window.end } else { window.start.offset(offset) };
            let vis = visible(t)?;
            if vis != prev_vis {
                let edge = self.refine_edge(sat, ground, min_elevation_deg, prev_t, t, prev_vis)?;
                if vis {
                    open_start = Some(edge);
                } else if let Some(start) = open_start.take() {
                    passes.push(Interval { start, end: edge });
                }
            }
            prev_t = t;
            prev_vis = vis;
            if offset >= span {
                break;
            }
            offset += PASS_SCAN_STEP_S;
        }

        // A pass still open at the window boundary is clipped there.
        if let Some(start) = open_start {
            passes.push(Interval { start, end: window.end });
        }
        Ok(passes)
    }

    fn relative_motion(
        &self,
        sat: &Tle,
        ground: &GroundLocation,
        t: SimTime,
    ) -> Result<RelativeMotion, GeometryError> {
        let range_at = |t: SimTime| -> Result<f64, GeometryError> {
            let sat_eci = self.propagate(sat, t)?.position;
            Ok(vec3::distance(sat_eci, super::ground_to_eci(ground, t)))
        };
        let distance_m = range_at(t)?;
        // Central difference over one second.
        let range_rate_m_s = (range_at(t.offset(0.5))? - range_at(t.offset(-0.5))?) / 1.0;
        Ok(RelativeMotion { distance_m, range_rate_m_s })
    }
}

impl KeplerOracle {
    /// Bisects a visibility transition inside `(lo, hi)` down to
    /// [`PASS_EDGE_TOL_S`]. `lo_vis` is the visibility at `lo`.
    fn refine_edge(
        &self,
        sat: &Tle,
        ground: &GroundLocation,
        min_elevation_deg: f64,
        mut lo: SimTime,
        mut hi: SimTime,
        lo_vis: bool,
    ) -> Result<SimTime, GeometryError> {
        while hi.seconds_since(lo) > PASS_EDGE_TOL_S {
            let mid = lo.offset(hi.seconds_since(lo) / 2.0);
            let mid_vis =
                elevation_deg(self.propagate(sat, mid)?.position, ground, mid) >= min_elevation_deg;
            if mid_vis == lo_vis {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        Ok(hi)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tle::tests::{ISS_1, ISS_2};
    use super::*;

    fn iss() -> Tle {
        Tle::parse(ISS_1, ISS_2).unwrap()
    }

    #[test]
    fn orbit_radius_matches_semi_major_axis() {
        let oracle = KeplerOracle::new();
        let tle = iss();
        let p = oracle.position(&tle, tle.epoch).unwrap();
        let r = vec3::norm(p);
        // ISS altitude: radius should be ~6790 km, well clear of the surface.
        assert!(r > R_EARTH + 300_000.0, "radius {r}");
        assert!(r < R_EARTH + 500_000.0, "radius {r}");
    }

    #[test]
    fn speed_is_orbital() {
        let oracle = KeplerOracle::new();
        let tle = iss();
        let v = oracle.velocity(&tle, tle.epoch.offset(120.0)).unwrap();
        let speed = vec3::norm(v);
        assert!((speed - 7_660.0).abs() < 150.0, "speed {speed}");
    }

    #[test]
    fn period_brings_the_satellite_back() {
        let oracle = KeplerOracle::new();
        let tle = iss();
        let period_s = 86400.0 / tle.mean_motion_rev_day;
        let p0 = oracle.position(&tle, tle.epoch).unwrap();
        let p1 = oracle.position(&tle, tle.epoch.offset(period_s)).unwrap();
        // J2 drifts the node by ~0.3 deg per orbit, so the track closes to
        // within tens of kilometers, not exactly.
        assert!(vec3::distance(p0, p1) < 100_000.0);
    }

    #[test]
    fn rejects_hyperbolic_elements() {
        let mut tle = iss();
        tle.eccentricity = 1.2;
        let err = KeplerOracle::new()
            .position(&tle, tle.epoch)
            .unwrap_err();
        assert!(matches!(err, GeometryError::Propagation { norad_id: 25544, .. }));
    }

    #[test]
    fn iss_passes_over_equator_within_a_day() {
        let oracle = KeplerOracle::new();
        let tle = iss();
        let ground = GroundLocation {
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            elevation_m: 0.0,
        };
        let window = TimeWindow::new(tle.epoch, tle.epoch.offset(86400.0));
        let passes = oracle.passes(&tle, &ground, window, 10.0).unwrap();
        // 51.6 deg inclination covers the equator; expect at least one pass
        // per day, each a few minutes long.
        assert!(!passes.is_empty());
        for pass in &passes {
            let len = pass.end.seconds_since(pass.start);
            assert!(len > 30.0 && len < 1200.0, "pass length {len}");
            assert!(pass.start >= window.start && pass.end <= window.end);
        }
    }

    #[test]
    fn pass_queries_are_deterministic() {
        let oracle = KeplerOracle::new();
        let tle = iss();
        let ground = GroundLocation {
            latitude_deg: 10.0,
            longitude_deg: 20.0,
            elevation_m: 100.0,
        };
        let window = TimeWindow::new(tle.epoch, tle.epoch.offset(43200.0));
        let a = oracle.passes(&tle, &ground, window, 5.0).unwrap();
        let b = oracle.passes(&tle, &ground, window, 5.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn bulk_positions_match_stepwise_propagation() {
        let oracle = KeplerOracle::new();
        let tle = iss();
        let window = TimeWindow::new(tle.epoch, tle.epoch.offset(600.0));
        let bulk = oracle.positions(&tle, window, 60.0).unwrap();
        assert_eq!(bulk.len(), 11);
        for (index, p) in bulk.iter().enumerate() {
            let single = oracle
                .position(&tle, window.epoch_time(index as u64, 60.0))
                .unwrap();
            assert!(vec3::distance(*p, single) < 1e-6);
        }
    }

    #[test]
    fn sunlight_toggles_over_an_orbit() {
        let oracle = KeplerOracle::new();
        let tle = iss();
        let mut lit = 0;
        let mut dark = 0;
        for k in 0..93 {
            if oracle.in_sunlight(&tle, tle.epoch.offset(k as f64 * 60.0)).unwrap() {
                lit += 1;
            } else {
                dark += 1;
            }
        }
        // One ISS orbit has both a day side and an eclipse.
        assert!(lit > 0, "never sunlit");
        assert!(dark > 0, "never eclipsed");
    }
}
