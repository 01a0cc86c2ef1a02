//! Ground-station MAC.
//!
//! Listens for beacons on the control frequency, requests a batch of units,
//! accumulates the downlink into the DATASTORE sibling, and closes the cycle
//! with one bulk ACK enumerating everything received.

use std::sync::Weak;

use serde_json::json;

use crate::config::ConfigError;
use crate::kernel::{
    Args, Frame, InvocationError, Model, ModelInit, ModelTag, Node, NodeId, SimTime, Value,
};
use crate::simlog::{EventKind, NodeLogger};

use super::{drain_both, radio_on, send};

enum GroundState {
    Listening,
    /// Request sent; waiting for the first data frame.
    Requesting { sat: NodeId, deadline: SimTime },
    Receiving {
        sat: NodeId,
        received: Vec<u64>,
        last_rx: SimTime,
    },
    /// Bulk ACK sent this epoch; listening resumes next epoch.
    Acking,
}

pub struct GroundMac {
    num_packets: usize,
    timeout_s: f64,
    control_frequency_hz: f64,
    downlink_frequency_hz: f64,
    state: GroundState,
    last_beacon: Option<u64>,
    cycles_completed: u64,
    node_id: NodeId,
    owner: Weak<Node>,
    log: NodeLogger,
}

impl GroundMac {
    pub const CLASS: &'static str = "ModelMacGround";

    pub fn build(init: ModelInit) -> Result<Box<dyn Model>, ConfigError> {
        Ok(Box::new(Self {
            num_packets: init.cfg.req_u64("num_packets")? as usize,
            timeout_s: init.cfg.opt_f64("timeout_s", 10.0)?,
            control_frequency_hz: init.cfg.req_f64("control_frequency_hz")?,
            downlink_frequency_hz: init.cfg.req_f64("downlink_frequency_hz")?,
            state: GroundState::Listening,
            last_beacon: None,
            cycles_completed: 0,
            node_id: init.node_id,
            owner: init.owner,
            log: init.log,
        }))
    }

    fn finish_cycle(&mut self, control: &crate::kernel::ModelRef, t: SimTime) {
        let mut acked = false;
        if let GroundState::Receiving { sat, received, .. } = &self.state {
            if !received.is_empty() {
                send(
                    control,
                    t,
                    Frame::Ack {
                        src: self.node_id,
                        dest: *sat,
                        unit_ids: received.clone(),
                    },
                );
                acked = true;
                self.cycles_completed += 1;
                self.log.logic(
                    t,
                    EventKind::PacketTx,
                    json!({ "mac": "ground", "acked": received.len() }),
                );
            }
        }
        // An empty batch has nothing to acknowledge and goes straight back
        // to listening.
        self.state = if acked { GroundState::Acking } else { GroundState::Listening };
    }
}

impl Model for GroundMac {
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
                    GroundState::Listening => "LISTENING",
                    GroundState::Requesting { .. } => "REQUESTING",
                    GroundState::Receiving { .. } => "RECEIVING",
                    GroundState::Acking => "ACKING",
                }
                .to_string(),
            )),
            "get_cycles_completed" => Ok(Value::Int(self.cycles_completed as i64)),
            _ => Err(InvocationError::UnknownOperation {
                class: Self::CLASS,
                op: op.to_string(),
            }),
        }
    }

    fn advance(&mut self, t: SimTime) {
        let Some(owner) = self.owner.upgrade() else { return };
        let Some(control) = radio_on(&owner, self.control_frequency_hz) else { return };
        let Some(downlink) = radio_on(&owner, self.downlink_frequency_hz) else { return };
        let Some(store) = owner.model_by_tag(ModelTag::DataStore) else { return };

        let frames = drain_both(&control, &downlink);

        // A fresh beacon only matters while listening; stale ids are ignored
        // entirely.
        let fresh_beacon = frames.iter().find_map(|frame| match frame {
            Frame::Beacon { beacon_id, src } if Some(*beacon_id) != self.last_beacon => {
                Some((*beacon_id, *src))
            }
            _ => None,
        });

        match &mut self.state {
            GroundState::Listening => {
                if let Some((beacon_id, sat)) = fresh_beacon {
                    self.last_beacon = Some(beacon_id);
                    send(
                        &control,
                        t,
                        Frame::Request {
                            src: self.node_id,
                            dest: sat,
                            num_units: self.num_packets,
                        },
                    );
                    self.log.logic(
                        t,
                        EventKind::PacketTx,
                        json!({ "mac": "ground", "requested": self.num_packets, "sat": sat }),
                    );
                    self.state = GroundState::Requesting {
                        sat,
                        deadline: t.offset(self.timeout_s),
                    };
                }
            }
            GroundState::Requesting { sat, deadline } => {
                let sat = *sat;
                let expired = t > *deadline;
                let mut received = Vec::new();
                for frame in &frames {
                    if let Frame::Data { src, dest, unit } = frame {
                        if *src == sat && dest.map_or(true, |d| d == self.node_id) {
                            let stored = store.invoke(
                                "add_data",
                                &Args::new()
                                    .with("unit", Value::Unit(unit.clone()))
                                    .with("at", Value::Time(t)),
                            );
                            if matches!(stored, Ok(Value::Bool(true))) {
                                received.push(unit.id);
                            }
                        }
                    }
                }
                if !received.is_empty() {
                    // The batch may already be complete within this epoch.
                    let complete = received.len() >= self.num_packets;
                    self.state = GroundState::Receiving { sat, received, last_rx: t };
                    if complete {
                        self.finish_cycle(&control, t);
                    }
                } else if expired {
                    self.state = GroundState::Listening;
                }
            }
            GroundState::Receiving { sat, received, last_rx } => {
                let sat = *sat;
                for frame in &frames {
                    if let Frame::Data { src, dest, unit } = frame {
                        if *src == sat && dest.map_or(true, |d| d == self.node_id) {
                            let stored = store.invoke(
                                "add_data",
                                &Args::new()
                                    .with("unit", Value::Unit(unit.clone()))
                                    .with("at", Value::Time(t)),
                            );
                            if matches!(stored, Ok(Value::Bool(true))) {
                                received.push(unit.id);
                                *last_rx = t;
                            }
                        }
                    }
                }
                let complete = received.len() >= self.num_packets;
                let idle = t.seconds_since(*last_rx) > self.timeout_s;
                if complete || idle {
                    self.finish_cycle(&control, t);
                }
            }
            GroundState::Acking => {
                // The ACK left last epoch; resume listening.
                self.state = GroundState::Listening;
            }
        }
    }
}
