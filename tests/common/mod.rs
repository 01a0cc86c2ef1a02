//! Shared helpers for the integration tests.
#![allow(dead_code)] // each test binary uses its own subset

use satlink::geometry::{ground_to_eci, GroundLocation, Vec3};
use satlink::orchestrator::Scenario;
use satlink::SimTime;

/// ISS (ZARYA), epoch 2021-03-01.
pub const ISS_TLE_1: &str =
    "1 25544U 98067A   21060.51504887  .00001303  00000-0  32063-4 0  9995";
pub const ISS_TLE_2: &str =
    "2 25544  51.6441 104.4568 0002935  83.8739  62.5868 15.48988046271892";

/// Drives a scenario exactly the way the manager's sequential loop does,
/// but leaves it alive afterwards so tests can inspect node state.
pub fn run_sequential(scenario: &Scenario) {
    for index in 0..scenario.epoch_count() {
        let t = scenario.window.epoch_time(index, scenario.delta);
        scenario.ctx.fabric.begin_epoch(t);
        for topology in &scenario.topologies {
            for node in &topology.nodes {
                if node.window().contains(t) {
                    node.advance(t);
                }
            }
        }
        scenario.ctx.fabric.flush_deferred();
    }
}

/// An ECI position directly above `loc` at `t`, at roughly `altitude_m`.
pub fn overhead_position(loc: &GroundLocation, t: SimTime, altitude_m: f64) -> Vec3 {
    let surface = ground_to_eci(loc, t);
    let radius = (surface[0] * surface[0] + surface[1] * surface[1] + surface[2] * surface[2])
        .sqrt();
    let scale = (radius + altitude_m) / radius;
    [surface[0] * scale, surface[1] * scale, surface[2] * scale]
}

pub fn equator_origin() -> GroundLocation {
    GroundLocation {
        latitude_deg: 0.0,
        longitude_deg: 0.0,
        elevation_m: 0.0,
    }
}

/// Formats a `SimTime` the way scenario files spell timestamps.
pub fn stamp(t: SimTime) -> String {
    t.to_datetime().format("%Y-%m-%d %H:%M:%S").to_string()
}
