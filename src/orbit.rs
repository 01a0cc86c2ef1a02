//! Orbital model.
//!
//! The `ORBITAL` capability: wraps the geometry oracle for one satellite and
//! exposes its state to siblings (`get_position`, `get_velocity`,
//! `in_sunlight`, `get_relative_motion`, `get_passes`).
//!
//! With `one_full_update` set, the whole run is propagated once on the first
//! advance and per-epoch queries answer from the precomputed track; otherwise
//! each epoch propagates on demand. Both paths agree within numerical
//! tolerance because they call the same propagator on the same grid.
//!
//! Geometry failures are non-fatal: the model logs, answers `Null`, and the
//! satellite simply has no geometry this epoch.

use std::sync::{Arc, Weak};

use tracing::warn;

use crate::config::ConfigError;
use crate::geometry::{GeometryError, GroundLocation, Tle, Vec3};
use crate::kernel::{
    Args, Interval, InvocationError, Model, ModelInit, ModelTag, Node, SimContext, SimTime,
    TimeWindow, Value,
};
use crate::simlog::NodeLogger;

/// Precomputed whole-run track.
struct Track {
    start: SimTime,
    delta: f64,
    positions: Vec<Vec3>,
}

impl Track {
    /// Position at `t` if `t` lies on the precomputed grid.
    fn lookup(&self, t: SimTime) -> Option<Vec3> {
        let offset = t.seconds_since(self.start);
        if offset < 0.0 {
            return None;
        }
        let index = (offset / self.delta).round();
        if (offset - index * self.delta).abs() > 1e-6 {
            return None;
        }
        self.positions.get(index as usize).copied()
    }
}

pub struct OrbitModel {
    tle: Tle,
    one_full_update: bool,
    track: Option<Track>,
    owner: Weak<Node>,
    ctx: Arc<SimContext>,
    log: NodeLogger,
    now: Option<SimTime>,
}

impl OrbitModel {
    pub const CLASS: &'static str = "ModelOrbit";

    pub fn build(init: ModelInit) -> Result<Box<dyn Model>, ConfigError> {
        let line1 = init.cfg.req_str("tle_1")?;
        let line2 = init.cfg.req_str("tle_2")?;
        let tle = Tle::parse(line1, line2).map_err(|err| ConfigError::BadTle {
            class: init.cfg.class().to_string(),
            reason: err.to_string(),
        })?;
        Ok(Box::new(Self {
            tle,
            one_full_update: init.cfg.opt_bool("one_full_update", false)?,
            track: None,
            owner: init.owner,
            ctx: init.ctx,
            log: init.log,
            now: None,
        }))
    }

    fn query_time(&self, op: &str, args: &Args) -> Result<SimTime, InvocationError> {
        args.opt_time(op, "at")?
            .or(self.now)
            .or_else(|| self.owner.upgrade().map(|n| n.window().start))
            .ok_or_else(|| InvocationError::PreconditionFailed {
                op: op.to_string(),
                reason: "no query time available".into(),
            })
    }

    fn skip_epoch(&self, what: &str, err: &GeometryError) {
        warn!(
            node = self.log.node_id(),
            norad = self.tle.norad_id,
            error = %err,
            "{what} unavailable this epoch"
        );
    }

    fn position_at(&self, t: SimTime) -> Result<Vec3, GeometryError> {
        if let Some(track) = &self.track {
            if let Some(position) = track.lookup(t) {
                return Ok(position);
            }
        }
        self.ctx.oracle.position(&self.tle, t)
    }

    fn ground_from_args(op: &str, args: &Args) -> Result<GroundLocation, InvocationError> {
        Ok(GroundLocation {
            latitude_deg: args.req_float(op, "latitude_deg")?,
            longitude_deg: args.req_float(op, "longitude_deg")?,
            elevation_m: args.req_float(op, "elevation_m")?,
        })
    }
}

impl Model for OrbitModel {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Orbital
    }

    fn invoke(&mut self, op: &str, args: &Args) -> Result<Value, InvocationError> {
        match op {
            "get_position" => {
                let t = self.query_time(op, args)?;
                match self.position_at(t) {
                    Ok(p) => Ok(Value::Vec3(p)),
                    Err(err) => {
                        self.skip_epoch("position", &err);
                        Ok(Value::Null)
                    }
                }
            }
            "get_velocity" => {
                let t = self.query_time(op, args)?;
                match self.ctx.oracle.velocity(&self.tle, t) {
                    Ok(v) => Ok(Value::Vec3(v)),
                    Err(err) => {
                        self.skip_epoch("velocity", &err);
                        Ok(Value::Null)
                    }
                }
            }
            "in_sunlight" => {
                let t = self.query_time(op, args)?;
                match self.ctx.oracle.in_sunlight(&self.tle, t) {
                    Ok(lit) => Ok(Value::Bool(lit)),
                    Err(err) => {
                        self.skip_epoch("sunlight", &err);
                        Ok(Value::Null)
                    }
                }
            }
            "get_relative_motion" => {
                let t = self.query_time(op, args)?;
                let ground = Self::ground_from_args(op, args)?;
                match self.ctx.oracle.relative_motion(&self.tle, &ground, t) {
                    Ok(rel) => Ok(Value::List(vec![
                        Value::Float(rel.distance_m),
                        Value::Float(rel.range_rate_m_s),
                    ])),
                    Err(err) => {
                        self.skip_epoch("relative motion", &err);
                        Ok(Value::Null)
                    }
                }
            }
            "get_passes" => {
                let ground = Self::ground_from_args(op, args)?;
                let start = args.opt_time(op, "start")?.ok_or(
                    InvocationError::MissingArgument { op: op.to_string(), key: "start" },
                )?;
                let end = args.opt_time(op, "end")?.ok_or(
                    InvocationError::MissingArgument { op: op.to_string(), key: "end" },
                )?;
                let min_elevation = match args.get("min_elevation_deg") {
                    None => 0.0,
                    Some(v) => v.as_float().ok_or(InvocationError::InvalidArgument {
                        op: op.to_string(),
                        key: "min_elevation_deg",
                        expected: "float",
                        got: "other",
                    })?,
                };
                let window = TimeWindow::new(start, end);
                match self.ctx.oracle.passes(&self.tle, &ground, window, min_elevation) {
                    Ok(passes) => Ok(Value::Intervals(
                        passes
                            .into_iter()
                            .map(|p| Interval { start: p.start, end: p.end })
                            .collect(),
                    )),
                    Err(err) => {
                        self.skip_epoch("passes", &err);
                        Ok(Value::Null)
                    }
                }
            }
            "get_norad_id" => Ok(Value::Int(i64::from(self.tle.norad_id))),
            _ => Err(InvocationError::UnknownOperation {
                class: Self::CLASS,
                op: op.to_string(),
            }),
        }
    }

    fn advance(&mut self, t: SimTime) {
        self.now = Some(t);
        if self.one_full_update && self.track.is_none() {
            let Some(owner) = self.owner.upgrade() else { return };
            let window = owner.window();
            match self.ctx.oracle.positions(&self.tle, window, self.ctx.delta) {
                Ok(positions) => {
                    tracing::debug!(
                        node = self.log.node_id(),
                        epochs = positions.len(),
                        "whole-run orbit track precomputed"
                    );
                    self.track = Some(Track {
                        start: window.start,
                        delta: self.ctx.delta,
                        positions,
                    });
                }
                Err(err) => {
                    // Fall back to per-epoch propagation for the rest of the
                    // run.
                    self.skip_epoch("bulk propagation", &err);
                    self.one_full_update = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_lookup_requires_grid_alignment() {
        let start = SimTime::from_unix(0.0);
        let track = Track {
            start,
            delta: 10.0,
            positions: vec![[1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [3.0, 0.0, 0.0]],
        };
        assert_eq!(track.lookup(start), Some([1.0, 0.0, 0.0]));
        assert_eq!(track.lookup(start.offset(20.0)), Some([3.0, 0.0, 0.0]));
        assert_eq!(track.lookup(start.offset(15.0)), None);
        assert_eq!(track.lookup(start.offset(-10.0)), None);
        assert_eq!(track.lookup(start.offset(30.0)), None);
    }
}
