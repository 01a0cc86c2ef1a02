//! Power model.
//!
//! Joule accounting for a node: capacity clamped to
//! `[min_capacity_j, max_capacity_j]`, solar generation gated on the ORBITAL
//! sibling's sunlight predicate, and a per-tag consumption rate table.
//!
//! `consume_energy` accepts three input forms — direct joules, power and
//! duration, or a tag looked up in the rate table — and refuses (returning
//! `false`, mutating nothing) whenever the remaining energy would fall below
//! the minimum capacity plus the tag's headroom. `has_energy(tag)` is the
//! non-mutating check schedulers use to gate expensive operations.

use std::collections::HashMap;
use std::sync::Weak;

use serde_json::json;

use crate::config::ConfigError;
use crate::kernel::{
    Args, InvocationError, Model, ModelInit, ModelTag, Node, SimTime, Value,
};
use crate::simlog::{EventKind, NodeLogger};

const DEFAULT_EFFICIENCY: f64 = 0.29;

pub struct PowerModel {
    min_capacity_j: f64,
    max_capacity_j: f64,
    level_j: f64,
    solar_panel_w: f64,
    efficiency: f64,
    /// Tag -> watts, for the tag-based consumption form and `has_energy`.
    rates_w: HashMap<String, f64>,
    /// Tag -> extra joules that must remain above the minimum capacity.
    tag_min_j: HashMap<String, f64>,
    delta: f64,
    owner: Weak<Node>,
    log: NodeLogger,
    now: Option<SimTime>,
}

impl PowerModel {
    pub const CLASS: &'static str = "ModelPower";

    pub fn build(init: ModelInit) -> Result<Box<dyn Model>, ConfigError> {
        let min_capacity_j = init.cfg.req_f64("min_capacity_j")?;
        let max_capacity_j = init.cfg.req_f64("max_capacity_j")?;
        if max_capacity_j < min_capacity_j {
            return Err(ConfigError::InvalidValue {
                class: init.cfg.class().to_string(),
                key: "max_capacity_j".to_string(),
                expected: "a capacity at or above min_capacity_j",
            });
        }
        let level_j = init
            .cfg
            .opt_f64("initial_capacity_j", max_capacity_j)?
            .clamp(min_capacity_j, max_capacity_j);
        Ok(Box::new(Self {
            min_capacity_j,
            max_capacity_j,
            level_j,
            solar_panel_w: init.cfg.opt_f64("solar_panel_w", 0.0)?,
            efficiency: init.cfg.opt_f64("efficiency", DEFAULT_EFFICIENCY)?,
            rates_w: init.cfg.opt_f64_table("rates_w")?,
            tag_min_j: init.cfg.opt_f64_table("tag_min_j")?,
            delta: init.ctx.delta,
            owner: init.owner,
            log: init.log,
            now: None,
        }))
    }

    fn rate_for(&self, op: &str, tag: &str) -> Result<f64, InvocationError> {
        self.rates_w
            .get(tag)
            .copied()
            .ok_or_else(|| InvocationError::PreconditionFailed {
                op: op.to_string(),
                reason: format!("no consumption rate configured for tag `{tag}`"),
            })
    }

    fn floor_for(&self, tag: Option<&str>) -> f64 {
        self.min_capacity_j + tag.and_then(|t| self.tag_min_j.get(t)).copied().unwrap_or(0.0)
    }

    /// The requested joules for whichever input form the caller used.
    fn requested_joules(&self, op: &str, args: &Args) -> Result<(f64, Option<String>), InvocationError> {
        if let Some(v) = args.get("joules") {
            let joules = v.as_float().ok_or(InvocationError::InvalidArgument {
                op: op.to_string(),
                key: "joules",
                expected: "float",
                got: "other",
            })?;
            return Ok((joules, None));
        }
        let duration_s = args.req_float(op, "duration_s")?;
        if let Some(tag) = args.opt_str(op, "tag")? {
            let joules = self.rate_for(op, tag)? * duration_s;
            return Ok((joules, Some(tag.to_string())));
        }
        let power_w = args.req_float(op, "power_w")?;
        Ok((power_w * duration_s, None))
    }

    fn op_consume(&mut self, op: &str, args: &Args) -> Result<Value, InvocationError> {
        let (joules, tag) = self.requested_joules(op, args)?;
        if joules < 0.0 {
            return Err(InvocationError::PreconditionFailed {
                op: op.to_string(),
                reason: "cannot consume negative energy".into(),
            });
        }
        let floor = self.floor_for(tag.as_deref());
        if self.level_j - joules < floor {
            return Ok(Value::Bool(false));
        }
        self.level_j -= joules;
        let t = args.opt_time(op, "at")?.or(self.now);
        if let Some(t) = t {
            self.log.info(
                t,
                EventKind::EnergyConsumed,
                json!({
                    "joules": joules,
                    "tag": tag,
                    "level_j": self.level_j,
                }),
            );
        }
        Ok(Value::Bool(true))
    }

    fn op_has_energy(&self, op: &str, args: &Args) -> Result<Value, InvocationError> {
        let tag = args.req_str(op, "tag")?;
        let joules = self.rate_for(op, tag)? * self.delta;
        Ok(Value::Bool(self.level_j - joules >= self.floor_for(Some(tag))))
    }

    fn in_sunlight(&self, t: SimTime) -> bool {
        let Some(owner) = self.owner.upgrade() else { return false };
        match owner.model_by_tag(ModelTag::Orbital) {
            // Ground nodes have no orbital model and charge whenever their
            // panel is configured.
            None => true,
            Some(orbital) => {
                let args = Args::new().with("at", Value::Time(t));
                matches!(orbital.invoke("in_sunlight", &args), Ok(Value::Bool(true)))
            }
        }
    }
}

impl Model for PowerModel {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Power
    }

    fn invoke(&mut self, op: &str, args: &Args) -> Result<Value, InvocationError> {
        match op {
            "consume_energy" => self.op_consume(op, args),
            "has_energy" => self.op_has_energy(op, args),
            "get_level" => Ok(Value::Float(self.level_j)),
            "get_capacity" => Ok(Value::List(vec![
                Value::Float(self.min_capacity_j),
                Value::Float(self.max_capacity_j),
            ])),
            _ => Err(InvocationError::UnknownOperation {
                class: Self::CLASS,
                op: op.to_string(),
            }),
        }
    }

    fn advance(&mut self, t: SimTime) {
        self.now = Some(t);
        if self.solar_panel_w > 0.0 && self.in_sunlight(t) {
            let generated = self.solar_panel_w * self.efficiency * self.delta;
            self.level_j = (self.level_j + generated).min(self.max_capacity_j);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;

    fn model(level: f64) -> PowerModel {
        PowerModel {
            min_capacity_j: 100.0,
            max_capacity_j: 1000.0,
            level_j: level,
            solar_panel_w: 0.0,
            efficiency: DEFAULT_EFFICIENCY,
            rates_w: HashMap::from([("TXRADIO".to_string(), 10.0)]),
            tag_min_j: HashMap::from([("TXRADIO".to_string(), 2.0)]),
            delta: 1.0,
            owner: Weak::new(),
            log: NodeLogger::disabled(1),
            now: None,
        }
    }

    #[test]
    fn consume_by_joules_and_denial_without_mutation() {
        let mut power = model(105.0);
        let args = Args::new().with("joules", Value::Float(3.0));
        assert_eq!(power.invoke("consume_energy", &args).unwrap(), Value::Bool(true));
        assert_eq!(power.level_j, 102.0);

        // 102 - 3 = 99 < min capacity: refused, level unchanged.
        assert_eq!(power.invoke("consume_energy", &args).unwrap(), Value::Bool(false));
        assert_eq!(power.level_j, 102.0);
    }

    #[test]
    fn tag_form_uses_rate_table_and_headroom() {
        let mut power = model(125.0);
        let args = Args::new()
            .with("tag", Value::Str("TXRADIO".into()))
            .with("duration_s", Value::Float(2.0));
        // 20 J leaves 105, above min(100) + tag headroom(2).
        assert_eq!(power.invoke("consume_energy", &args).unwrap(), Value::Bool(true));
        // Another 20 J would leave 85: refused.
        assert_eq!(power.invoke("consume_energy", &args).unwrap(), Value::Bool(false));
        assert_eq!(power.level_j, 105.0);
    }

    #[test]
    fn has_energy_agrees_with_consume() {
        let mut power = model(105.0);
        let probe = Args::new().with("tag", Value::Str("TXRADIO".into()));
        // 10 W for delta=1 s leaves 95 < 102: no energy.
        assert_eq!(power.invoke("has_energy", &probe).unwrap(), Value::Bool(false));

        let consume = Args::new()
            .with("tag", Value::Str("TXRADIO".into()))
            .with("duration_s", Value::Float(1.0));
        assert_eq!(power.invoke("consume_energy", &consume).unwrap(), Value::Bool(false));
    }

    #[test]
    fn unknown_tag_is_a_precondition_failure() {
        let mut power = model(500.0);
        let probe = Args::new().with("tag", Value::Str("WARP".into()));
        assert!(matches!(
            power.invoke("has_energy", &probe),
            Err(InvocationError::PreconditionFailed { .. })
        ));
    }

    #[test]
    fn generation_requires_an_owner_node() {
        let mut power = model(995.0);
        power.solar_panel_w = 100.0;
        power.efficiency = 0.5;
        // A detached model cannot resolve sunlight: no generation.
        power.advance(SimTime::from_unix(0.0));
        assert_eq!(power.level_j, 995.0);
    }
}
