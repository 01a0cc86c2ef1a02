//! Wire frames and payload units.
//!
//! Everything that crosses a radio link is a [`Frame`]. MAC control traffic
//! (beacons, requests, bulk ACKs) and payload data share the enum so the
//! radio substrate can move them without knowing what they mean; only MAC
//! models interpret them.

use super::time::SimTime;

/// Stable integer node id, unique across the whole scenario.
pub type NodeId = u32;

/// What a payload unit carries. Logged with every tx/rx event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataKind {
    /// Sensor readings produced by a data generator.
    SensorReading,
    /// An image captured by the imaging model.
    Image,
    /// Housekeeping telemetry.
    Telemetry,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::SensorReading => "sensor",
            DataKind::Image => "image",
            DataKind::Telemetry => "telemetry",
        }
    }
}

/// A unit of payload data as held in datastores and carried in data frames.
#[derive(Clone, Debug, PartialEq)]
pub struct DataUnit {
    /// Unique across the scenario: `source << 32 | per-node sequence`.
    pub id: u64,
    pub source: NodeId,
    pub kind: DataKind,
    pub size_bits: u64,
    pub created_at: SimTime,
}

impl DataUnit {
    pub fn unit_id(source: NodeId, seq: u32) -> u64 {
        (u64::from(source) << 32) | u64::from(seq)
    }
}

/// A frame on the air.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Periodic invitation from a satellite MAC. `beacon_id` is unique so
    /// listeners can tell a fresh beacon from a stale one.
    Beacon { beacon_id: u64, src: NodeId },
    /// A ground station asking the beaconing satellite for `num_units`
    /// payload units.
    Request {
        src: NodeId,
        dest: NodeId,
        num_units: usize,
    },
    /// One payload unit. `dest` is the intended consumer; radios deliver to
    /// every in-view receiver and MACs filter.
    Data {
        src: NodeId,
        dest: Option<NodeId>,
        unit: DataUnit,
    },
    /// Bulk acknowledgment enumerating received unit ids.
    Ack {
        src: NodeId,
        dest: NodeId,
        unit_ids: Vec<u64>,
    },
}

/// Fixed on-air cost of a control frame, in bits.
const CONTROL_FRAME_BITS: u64 = 256;

impl Frame {
    pub fn src(&self) -> NodeId {
        match self {
            Frame::Beacon { src, .. }
            | Frame::Request { src, .. }
            | Frame::Data { src, .. }
            | Frame::Ack { src, .. } => *src,
        }
    }

    /// Intended recipient, if the frame is addressed.
    pub fn dest(&self) -> Option<NodeId> {
        match self {
            Frame::Beacon { .. } => None,
            Frame::Request { dest, .. } | Frame::Ack { dest, .. } => Some(*dest),
            Frame::Data { dest, .. } => *dest,
        }
    }

    /// On-air size used against queue bounds and per-epoch bit budgets.
    pub fn size_bits(&self) -> u64 {
        match self {
            Frame::Data { unit, .. } => CONTROL_FRAME_BITS + unit.size_bits,
            Frame::Ack { unit_ids, .. } => CONTROL_FRAME_BITS + 64 * unit_ids.len() as u64,
            Frame::Beacon { .. } | Frame::Request { .. } => CONTROL_FRAME_BITS,
        }
    }

    /// Short label for log payloads.
    pub fn label(&self) -> &'static str {
        match self {
            Frame::Beacon { .. } => "beacon",
            Frame::Request { .. } => "request",
            Frame::Data { .. } => "data",
            Frame::Ack { .. } => "ack",
        }
    }
}
