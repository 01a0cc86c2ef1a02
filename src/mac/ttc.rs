//! Satellite TT&C MAC.
//!
//! Beacons on the control frequency at `beacon_interval + U(0, backoff)`,
//! serves ground requests from the DATASTORE sibling over the downlink
//! radio, and holds served units in the store until the bulk ACK names them.
//! Data frames arriving from IoT devices are stored and acknowledged
//! immediately, independent of the downlink cycle.

use std::collections::HashMap;
use std::sync::Weak;

use rand::rngs::SmallRng;
use rand::Rng;
use serde_json::json;

use crate::config::ConfigError;
use crate::kernel::{
    Args, Frame, InvocationError, Model, ModelInit, ModelTag, Node, NodeId, SimTime, Value,
};
use crate::simlog::{EventKind, NodeLogger};

use super::{drain_all_radios, radio_on, send};

enum TtcState {
    /// Idle between beacons.
    Beaconing,
    /// A beacon is out; listening for a ground request until the next one.
    AwaitingRequest,
    /// Units are queued on the downlink radio.
    Serving { requester: NodeId },
    /// Downlink queue drained; waiting for the bulk ACK.
    AwaitingAck { requester: NodeId, deadline: SimTime },
}

pub struct TtcMac {
    beacon_interval_s: f64,
    beacon_backoff_s: f64,
    beacon_frequency_hz: f64,
    downlink_frequency_hz: f64,
    ack_timeout_s: f64,
    state: TtcState,
    next_beacon: Option<SimTime>,
    beacon_seq: u64,
    pending_request: Option<(NodeId, usize)>,
    /// IoT acknowledgments held one epoch so they never share the control
    /// channel with the request a ground station sends the same epoch.
    pending_acks: Vec<(NodeId, Vec<u64>)>,
    rng: SmallRng,
    node_id: NodeId,
    owner: Weak<Node>,
    log: NodeLogger,
}

impl TtcMac {
    pub const CLASS: &'static str = "ModelMacTtc";

    pub fn build(init: ModelInit) -> Result<Box<dyn Model>, ConfigError> {
        Ok(Box::new(Self {
            beacon_interval_s: init.cfg.req_f64("beacon_interval_s")?,
            beacon_backoff_s: init.cfg.opt_f64("beacon_backoff_s", 0.0)?,
            beacon_frequency_hz: init.cfg.req_f64("beacon_frequency_hz")?,
            downlink_frequency_hz: init.cfg.req_f64("downlink_frequency_hz")?,
            ack_timeout_s: init.cfg.opt_f64("ack_timeout_s", 30.0)?,
            state: TtcState::Beaconing,
            next_beacon: None,
            beacon_seq: 0,
            pending_request: None,
            pending_acks: Vec::new(),
            rng: init.ctx.rng_for(init.node_id),
            node_id: init.node_id,
            owner: init.owner,
            log: init.log,
        }))
    }

    fn beacon_id(&mut self) -> u64 {
        let id = (u64::from(self.node_id) << 32) | self.beacon_seq;
        self.beacon_seq += 1;
        id
    }

    fn schedule_next_beacon(&mut self, t: SimTime) {
        let backoff = if self.beacon_backoff_s > 0.0 {
            self.rng.gen_range(0.0..self.beacon_backoff_s)
        } else {
            0.0
        };
        self.next_beacon = Some(t.offset(self.beacon_interval_s + backoff));
    }
}

impl Model for TtcMac {
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
                    TtcState::Beaconing => "BEACONING",
                    TtcState::AwaitingRequest => "AWAITING_REQUEST",
                    TtcState::Serving { .. } => "SERVING",
                    TtcState::AwaitingAck { .. } => "AWAITING_ACK",
                }
                .to_string(),
            )),
            _ => Err(InvocationError::UnknownOperation {
                class: Self::CLASS,
                op: op.to_string(),
            }),
        }
    }

    fn advance(&mut self, t: SimTime) {
        let Some(owner) = self.owner.upgrade() else { return };
        let Some(control) = radio_on(&owner, self.beacon_frequency_hz) else { return };
        let Some(downlink) = radio_on(&owner, self.downlink_frequency_hz) else { return };
        let Some(store) = owner.model_by_tag(ModelTag::DataStore) else { return };

        // Acknowledgments collected last epoch go out first, on a control
        // channel that is quiet this epoch.
        for (device, unit_ids) in std::mem::take(&mut self.pending_acks) {
            send(
                &control,
                t,
                Frame::Ack { src: self.node_id, dest: device, unit_ids },
            );
        }

        // Ingest from every sibling radio (control, downlink, and any
        // uplink). Requests and ACKs drive the downlink cycle; IoT data is
        // stored and acknowledged out of band.
        let mut iot_acks: HashMap<NodeId, Vec<u64>> = HashMap::new();
        for frame in drain_all_radios(&owner) {
            match frame {
                Frame::Request { src, dest, num_units } if dest == self.node_id => {
                    self.pending_request = Some((src, num_units));
                }
                Frame::Ack { dest, unit_ids, .. } if dest == self.node_id => {
                    if let TtcState::AwaitingAck { .. } = self.state {
                        let ids = unit_ids.iter().map(|id| Value::Int(*id as i64)).collect();
                        let _ = store.invoke(
                            "delete_data",
                            &Args::new().with("ids", Value::List(ids)),
                        );
                        self.log.logic(
                            t,
                            EventKind::PacketRx,
                            json!({ "mac": "ttc", "acked": unit_ids.len() }),
                        );
                        self.state = TtcState::Beaconing;
                    }
                }
                Frame::Data { src, unit, .. } => {
                    let stored = store.invoke(
                        "add_data",
                        &Args::new()
                            .with("unit", Value::Unit(unit.clone()))
                            .with("at", Value::Time(t)),
                    );
                    if matches!(stored, Ok(Value::Bool(true))) {
                        iot_acks.entry(src).or_default().push(unit.id);
                    }
                }
                _ => {}
            }
        }
        self.pending_acks.extend(iot_acks);

        // Serve a buffered request: queue the head units on the downlink
        // radio without deleting them from the store.
        if matches!(self.state, TtcState::Beaconing | TtcState::AwaitingRequest) {
            if let Some((requester, num_units)) = self.pending_request.take() {
                let peeked = store.invoke(
                    "peek_data",
                    &Args::new().with("count", Value::Int(num_units as i64)),
                );
                let units: Vec<_> = match peeked {
                    Ok(Value::List(items)) => items
                        .into_iter()
                        .filter_map(|v| match v {
                            Value::Unit(unit) => Some(unit),
                            _ => None,
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                if !units.is_empty() {
                    for unit in units {
                        send(
                            &downlink,
                            t,
                            Frame::Data { src: self.node_id, dest: Some(requester), unit },
                        );
                    }
                    self.log.logic(
                        t,
                        EventKind::PacketTx,
                        json!({ "mac": "ttc", "serving": requester }),
                    );
                    self.state = TtcState::Serving { requester };
                }
            }
        }

        match self.state {
            TtcState::Beaconing | TtcState::AwaitingRequest => {
                let due = self.next_beacon.map_or(true, |next| t >= next);
                if due {
                    let beacon_id = self.beacon_id();
                    if send(&control, t, Frame::Beacon { beacon_id, src: self.node_id }) {
                        self.log.info(t, EventKind::BeaconSent, json!({ "beacon": beacon_id }));
                    }
                    self.schedule_next_beacon(t);
                    self.state = TtcState::AwaitingRequest;
                }
            }
            TtcState::Serving { requester } => {
                let drained = matches!(
                    downlink.invoke("tx_queue_size", &Args::new()),
                    Ok(Value::Int(0))
                );
                if drained {
                    self.state = TtcState::AwaitingAck {
                        requester,
                        deadline: t.offset(self.ack_timeout_s),
                    };
                }
            }
            TtcState::AwaitingAck { deadline, .. } => {
                if t > deadline {
                    // Unacknowledged units were never deleted; they go out
                    // again on the next request cycle.
                    self.log.logic(t, EventKind::PacketDrop, json!({ "mac": "ttc", "reason": "ack-timeout" }));
                    self.state = TtcState::Beaconing;
                }
            }
        }
    }
}
