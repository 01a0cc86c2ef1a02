//! MAC layer.
//!
//! MAC models are pure orchestrators: they own a finite-state machine and
//! drive their radio and datastore siblings through the invocation surface.
//! They are dependency-ordered after their radios, so frames delivered
//! earlier in the same epoch are observed the same epoch. All retransmission
//! policy lives here — the radio substrate drops and forgets.
//!
//! - [`ttc::TtcMac`] — satellite TT&C: beacon, serve requests from the
//!   datastore, hold unacknowledged units for the next cycle
//! - [`ground::GroundMac`] — ground station: request on beacon, accumulate,
//!   bulk-ACK
//! - [`iot::IotMac`] — IoT device: transmit the generator head on fresh
//!   beacons until acknowledged

pub mod ground;
pub mod iot;
pub mod ttc;

pub use ground::GroundMac;
pub use iot::IotMac;
pub use ttc::TtcMac;

use crate::kernel::{Args, Frame, ModelRef, Node, SimTime, Value};
use crate::link::FREQ_TOL_HZ;

/// The sibling radio tuned to `frequency_hz`, if any. `(tag, frequency)`
/// uniqueness makes the answer unambiguous.
pub(crate) fn radio_on(owner: &Node, frequency_hz: f64) -> Option<ModelRef> {
    owner
        .models()
        .iter()
        .filter(|m| m.tag().is_radio())
        .find(|m| {
            matches!(
                m.invoke("get_frequency", &Args::new()),
                Ok(Value::Float(f)) if (f - frequency_hz).abs() <= FREQ_TOL_HZ
            )
        })
        .cloned()
}

/// Drains everything the radio has received so far.
pub(crate) fn drain_frames(radio: &ModelRef) -> Vec<Frame> {
    match radio.invoke("get_received", &Args::new()) {
        Ok(Value::List(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::Frame(frame) => Some(frame),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Hands a frame to a radio at `t`. Queued or transmitted depending on the
/// radio's self-control flag.
pub(crate) fn send(radio: &ModelRef, t: SimTime, frame: Frame) -> bool {
    let args = Args::new()
        .with("frame", Value::Frame(frame))
        .with("at", Value::Time(t));
    matches!(radio.invoke("send_packet", &args), Ok(Value::Bool(true)))
}

/// Ingests from two (possibly identical) radios without draining twice.
pub(crate) fn drain_both(a: &ModelRef, b: &ModelRef) -> Vec<Frame> {
    let mut frames = drain_frames(a);
    if !std::sync::Arc::ptr_eq(a, b) {
        frames.extend(drain_frames(b));
    }
    frames
}

/// Ingests from every sibling radio, in model order.
pub(crate) fn drain_all_radios(owner: &Node) -> Vec<Frame> {
    owner
        .models()
        .iter()
        .filter(|m| m.tag().is_radio())
        .flat_map(drain_frames)
        .collect()
}
