//! Imaging payload and attitude control.
//!
//! [`ImagingLogic`] captures an image whenever its period elapses, provided
//! the ADACS sibling reports pointing readiness and the POWER sibling grants
//! the capture energy; the image lands in the DATASTORE sibling for a later
//! downlink. [`Adacs`] is the slew/settle state machine behind that
//! readiness check.

use std::sync::Weak;

use serde_json::json;

use crate::config::ConfigError;
use crate::kernel::{
    Args, DataKind, DataUnit, InvocationError, Model, ModelInit, ModelTag, Node, NodeId, SimTime,
    Value,
};
use crate::simlog::{EventKind, NodeLogger};

// ---------------------------------------------------------------------------
// Imaging logic
// ---------------------------------------------------------------------------

pub struct ImagingLogic {
    image_interval_s: f64,
    image_size_bits: u64,
    capture_duration_s: f64,
    last_capture: Option<SimTime>,
    images_taken: u64,
    seq: u32,
    node_id: NodeId,
    owner: Weak<Node>,
    log: NodeLogger,
}

impl ImagingLogic {
    pub const CLASS: &'static str = "ModelImagingLogicBased";

    pub fn build(init: ModelInit) -> Result<Box<dyn Model>, ConfigError> {
        Ok(Box::new(Self {
            image_interval_s: init.cfg.req_f64("image_interval_s")?,
            image_size_bits: init.cfg.req_u64("image_size_bits")?,
            capture_duration_s: init.cfg.opt_f64("capture_duration_s", 1.0)?,
            last_capture: None,
            images_taken: 0,
            seq: 0,
            node_id: init.node_id,
            owner: init.owner,
            log: init.log,
        }))
    }

    fn due(&self, t: SimTime) -> bool {
        match self.last_capture {
            None => true,
            Some(last) => t.seconds_since(last) >= self.image_interval_s,
        }
    }
}

impl Model for ImagingLogic {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Imaging
    }

    fn invoke(&mut self, op: &str, _args: &Args) -> Result<Value, InvocationError> {
        match op {
            "get_images_taken" => Ok(Value::Int(self.images_taken as i64)),
            _ => Err(InvocationError::UnknownOperation {
                class: Self::CLASS,
                op: op.to_string(),
            }),
        }
    }

    fn advance(&mut self, t: SimTime) {
        if !self.due(t) {
            return;
        }
        let Some(owner) = self.owner.upgrade() else { return };
        let (Some(adacs), Some(power), Some(store)) = (
            owner.model_by_tag(ModelTag::Adacs),
            owner.model_by_tag(ModelTag::Power),
            owner.model_by_tag(ModelTag::DataStore),
        ) else {
            return;
        };

        // Wait (without consuming the period) until the platform is stable.
        if !matches!(adacs.invoke("is_pointing_ready", &Args::new()), Ok(Value::Bool(true))) {
            return;
        }
        let consume = Args::new()
            .with("tag", Value::Str("IMAGING".into()))
            .with("duration_s", Value::Float(self.capture_duration_s))
            .with("at", Value::Time(t));
        if !matches!(power.invoke("consume_energy", &consume), Ok(Value::Bool(true))) {
            return;
        }

        let unit = DataUnit {
            id: DataUnit::unit_id(self.node_id, 0x8000_0000 | self.seq),
            source: self.node_id,
            kind: DataKind::Image,
            size_bits: self.image_size_bits,
            created_at: t,
        };
        self.seq = self.seq.wrapping_add(1);
        let stored = store.invoke(
            "add_data",
            &Args::new()
                .with("unit", Value::Unit(unit.clone()))
                .with("at", Value::Time(t)),
        );
        self.last_capture = Some(t);
        if matches!(stored, Ok(Value::Bool(true))) {
            self.images_taken += 1;
            self.log.info(
                t,
                EventKind::ImageTaken,
                json!({ "unit": unit.id, "bits": unit.size_bits }),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// ADACS
// ---------------------------------------------------------------------------

enum AdacsState {
    Ready,
    Slewing { remaining_s: f64 },
}

/// Attitude determination and control: pointing is ready except while a
/// requested slew is in progress. Slewing draws `ADACS` energy each epoch
/// and pauses when the battery refuses.
pub struct Adacs {
    slew_duration_s: f64,
    state: AdacsState,
    delta: f64,
    owner: Weak<Node>,
    log: NodeLogger,
}

impl Adacs {
    pub const CLASS: &'static str = "ModelAdacs";

    pub fn build(init: ModelInit) -> Result<Box<dyn Model>, ConfigError> {
        Ok(Box::new(Self {
            slew_duration_s: init.cfg.opt_f64("slew_duration_s", 10.0)?,
            state: AdacsState::Ready,
            delta: init.ctx.delta,
            owner: init.owner,
            log: init.log,
        }))
    }

    fn slew_energy_granted(&self, t: SimTime) -> bool {
        let Some(owner) = self.owner.upgrade() else { return true };
        let Some(power) = owner.model_by_tag(ModelTag::Power) else {
            return true;
        };
        let consume = Args::new()
            .with("tag", Value::Str("ADACS".into()))
            .with("duration_s", Value::Float(self.delta))
            .with("at", Value::Time(t));
        matches!(power.invoke("consume_energy", &consume), Ok(Value::Bool(true)))
    }
}

impl Model for Adacs {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Adacs
    }

    fn invoke(&mut self, op: &str, _args: &Args) -> Result<Value, InvocationError> {
        match op {
            "is_pointing_ready" => Ok(Value::Bool(matches!(self.state, AdacsState::Ready))),
            "request_pointing" => {
                self.state = AdacsState::Slewing {
                    remaining_s: self.slew_duration_s,
                };
                Ok(Value::Bool(true))
            }
            _ => Err(InvocationError::UnknownOperation {
                class: Self::CLASS,
                op: op.to_string(),
            }),
        }
    }

    fn advance(&mut self, t: SimTime) {
        if let AdacsState::Slewing { remaining_s } = self.state {
            if !self.slew_energy_granted(t) {
                // Starved: hold attitude, no progress this epoch.
                self.log.logic(t, EventKind::EnergyConsumed, json!({ "adacs": "starved" }));
                return;
            }
            let remaining = remaining_s - self.delta;
            self.state = if remaining <= 0.0 {
                AdacsState::Ready
            } else {
                AdacsState::Slewing { remaining_s: remaining }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adacs(slew_duration_s: f64) -> Adacs {
        Adacs {
            slew_duration_s,
            state: AdacsState::Ready,
            delta: 1.0,
            owner: Weak::new(),
            log: NodeLogger::disabled(1),
        }
    }

    #[test]
    fn slew_blocks_readiness_until_settled() {
        let mut model = adacs(3.0);
        let ready = |m: &mut Adacs| {
            m.invoke("is_pointing_ready", &Args::new()).unwrap() == Value::Bool(true)
        };
        assert!(ready(&mut model));

        model.invoke("request_pointing", &Args::new()).unwrap();
        assert!(!ready(&mut model));

        let t = SimTime::from_unix(0.0);
        model.advance(t);
        model.advance(t.offset(1.0));
        assert!(!ready(&mut model));
        model.advance(t.offset(2.0));
        assert!(ready(&mut model));
    }
}
