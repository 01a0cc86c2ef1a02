//! IoT device MAC.
//!
//! Waits for a beacon it has not seen before, transmits the head of the
//! DATAGENERATOR sibling's queue toward the beaconing satellite, and keeps
//! the unit in the generator until an ACK names it. Missed cycles back off a
//! random number of beacons before retrying.

use std::sync::Weak;

use rand::rngs::SmallRng;
use rand::Rng;
use serde_json::json;

use crate::config::ConfigError;
use crate::kernel::{
    Args, DataUnit, Frame, InvocationError, Model, ModelInit, ModelRef, ModelTag, Node, NodeId,
    SimTime, Value,
};
use crate::simlog::{EventKind, NodeLogger};

use super::{drain_all_radios, radio_on, send};

enum IotState {
    /// Nothing to send.
    Idle,
    /// Data pending; waiting for a fresh beacon.
    WaitingBeacon,
    /// Head unit handed to the radio this epoch.
    Transmitting { unit_id: u64 },
    /// Waiting for an ACK naming the unit; it stays in the generator until
    /// one arrives.
    AwaitingAck { unit_id: u64 },
    /// Skipping `beacons_left` fresh beacons before retrying.
    Backoff { beacons_left: u32 },
}

pub struct IotMac {
    backoff_max_beacons: u32,
    /// Uplink channel for data, when it differs from the beacon channel.
    data_frequency_hz: Option<f64>,
    state: IotState,
    last_beacon: Option<u64>,
    delivered: u64,
    rng: SmallRng,
    node_id: NodeId,
    owner: Weak<Node>,
    log: NodeLogger,
}

impl IotMac {
    pub const CLASS: &'static str = "ModelMacIot";

    pub fn build(init: ModelInit) -> Result<Box<dyn Model>, ConfigError> {
        Ok(Box::new(Self {
            backoff_max_beacons: u32::try_from(init.cfg.opt_u64("backoff_max_beacons", 0)?)
                .unwrap_or(0),
            data_frequency_hz: match init.cfg.raw("data_frequency_hz") {
                None => None,
                Some(_) => Some(init.cfg.req_f64("data_frequency_hz")?),
            },
            state: IotState::Idle,
            last_beacon: None,
            delivered: 0,
            rng: init.ctx.rng_for(init.node_id),
            node_id: init.node_id,
            owner: init.owner,
            log: init.log,
        }))
    }

    fn generator_head(generator: &ModelRef) -> Option<DataUnit> {
        match generator.invoke("peek_data", &Args::new().with("count", Value::Int(1))) {
            Ok(Value::List(items)) => items.into_iter().find_map(|v| match v {
                Value::Unit(unit) => Some(unit),
                _ => None,
            }),
            _ => None,
        }
    }

    fn transmit_head(
        &mut self,
        radio: &ModelRef,
        generator: &ModelRef,
        sat: NodeId,
        t: SimTime,
    ) {
        let Some(unit) = Self::generator_head(generator) else {
            self.state = IotState::Idle;
            return;
        };
        let unit_id = unit.id;
        let sent = send(
            radio,
            t,
            Frame::Data { src: self.node_id, dest: Some(sat), unit },
        );
        if sent {
            self.log.logic(
                t,
                EventKind::PacketTx,
                json!({ "mac": "iot", "unit": unit_id, "sat": sat }),
            );
            self.state = IotState::Transmitting { unit_id };
        } else {
            // The radio refused (no view, power): wait for the next beacon.
            self.state = IotState::WaitingBeacon;
        }
    }
}

impl Model for IotMac {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Mac
    }

    fn invoke(&mut self, op: &str, _args: &Args) -> Result<Value, InvocationError> {
        match op {
            "get_state" => Ok(Value::Str(
                match self.state {
                    IotState::Idle => "IDLE",
                    IotState::WaitingBeacon => "WAITING_BEACON",
                    IotState::Transmitting { .. } => "TRANSMITTING",
                    IotState::AwaitingAck { .. } => "AWAITING_ACK",
                    IotState::Backoff { .. } => "BACKOFF",
                }
                .to_string(),
            )),
            "get_delivered_count" => Ok(Value::Int(self.delivered as i64)),
            _ => Err(InvocationError::UnknownOperation {
                class: Self::CLASS,
                op: op.to_string(),
            }),
        }
    }

    fn advance(&mut self, t: SimTime) {
        let Some(owner) = self.owner.upgrade() else { return };
        let Some(generator) = owner.model_by_tag(ModelTag::DataGenerator) else { return };
        // Beacons and ACKs arrive on the beacon radio; data leaves on the
        // uplink radio when one is configured.
        let radio = match self.data_frequency_hz {
            Some(frequency_hz) => radio_on(&owner, frequency_hz),
            None => owner.model_by_tag(ModelTag::BasicLoraRadio),
        };
        let Some(radio) = radio else { return };

        let frames = drain_all_radios(&owner);

        // Beacons are identified uniquely so a re-heard beacon is never
        // treated as a new cycle.
        let fresh_beacon = frames.iter().find_map(|frame| match frame {
            Frame::Beacon { beacon_id, src } if Some(*beacon_id) != self.last_beacon => {
                Some((*beacon_id, *src))
            }
            _ => None,
        });
        if let Some((beacon_id, _)) = fresh_beacon {
            self.last_beacon = Some(beacon_id);
        }

        // A fast ACK can land while the frame is still formally on the air,
        // so both in-flight states watch for it.
        let acked_unit = frames.iter().find_map(|frame| match frame {
            Frame::Ack { dest, unit_ids, .. } if *dest == self.node_id => {
                match self.state {
                    IotState::Transmitting { unit_id } | IotState::AwaitingAck { unit_id }
                        if unit_ids.contains(&unit_id) =>
                    {
                        Some(unit_id)
                    }
                    _ => None,
                }
            }
            _ => None,
        });

        if let Some(unit_id) = acked_unit {
            let ids = Value::List(vec![Value::Int(unit_id as i64)]);
            let _ = generator.invoke("delete_data", &Args::new().with("ids", ids));
            self.delivered += 1;
            self.log.logic(t, EventKind::PacketRx, json!({ "mac": "iot", "acked": unit_id }));
            self.state = IotState::Idle;
        }

        match self.state {
            IotState::Idle => {
                let pending = matches!(
                    generator.invoke("get_queue_size", &Args::new()),
                    Ok(Value::Int(n)) if n > 0
                );
                if pending {
                    self.state = IotState::WaitingBeacon;
                    // A beacon heard this same epoch starts the cycle at once.
                    if let Some((_, sat)) = fresh_beacon {
                        self.transmit_head(&radio, &generator, sat, t);
                    }
                }
            }
            IotState::WaitingBeacon => {
                if let Some((_, sat)) = fresh_beacon {
                    self.transmit_head(&radio, &generator, sat, t);
                }
            }
            IotState::Transmitting { unit_id } => {
                // The frame left the radio last epoch; watch for the ACK
                // from here on.
                self.state = IotState::AwaitingAck { unit_id };
            }
            IotState::AwaitingAck { .. } => {
                // No ACK yet; a new beacon cycle means the transmission was
                // lost. Back off a random number of beacons, then retry.
                if let Some((_, _)) = fresh_beacon {
                    let beacons_left = if self.backoff_max_beacons > 0 {
                        self.rng.gen_range(0..=self.backoff_max_beacons)
                    } else {
                        0
                    };
                    self.log.logic(
                        t,
                        EventKind::PacketDrop,
                        json!({ "mac": "iot", "reason": "no-ack", "backoff": beacons_left }),
                    );
                    self.state = IotState::Backoff { beacons_left };
                }
            }
            IotState::Backoff { beacons_left } => {
                if let Some((_, sat)) = fresh_beacon {
                    if beacons_left == 0 {
                        self.transmit_head(&radio, &generator, sat, t);
                    } else {
                        self.state = IotState::Backoff { beacons_left: beacons_left - 1 };
                    }
                }
            }
        }
    }
}
