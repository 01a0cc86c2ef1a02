//! Link fabric.
//!
//! The cross-node delivery mediator. Radios register [`RadioPort`]s at wiring
//! time (tag, frequency, phy snapshot, owner window); transmitters resolve
//! compatible receivers through the fabric, register their transmission for
//! co-channel interference accounting, and hand successful frames over for
//! delivery into the receiving radio's queue.
//!
//! In sequential mode deliveries land immediately, so a packet transmitted
//! this epoch can be consumed by a MAC that advances later in the same epoch.
//! In parallel mode deliveries are buffered and flushed at the epoch-end
//! barrier, making them visible one epoch later.

use std::sync::Weak;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::kernel::{
    Args, ExecMode, Frame, ModelCell, ModelTag, NodeId, SimTime, TimeWindow, Value,
};
use crate::radio::PhySetup;

/// Two config frequencies match within this tolerance, Hz.
pub const FREQ_TOL_HZ: f64 = 1.0;

/// A registered radio endpoint.
#[derive(Clone)]
pub struct RadioPort {
    pub node_id: NodeId,
    pub radio_id: u32,
    pub tag: ModelTag,
    pub frequency_hz: f64,
    /// Owner node's window: out-of-window nodes stay addressable but never
    /// receive.
    pub window: TimeWindow,
    /// Receiver-side phy parameters, static after configuration, snapshotted
    /// so transmitters can close the link budget without locking the cell.
    pub phy: PhySetup,
    pub cell: Weak<ModelCell>,
}

/// Outcome of one delivery attempt.
#[derive(Debug, PartialEq)]
pub enum DeliveryOutcome {
    /// The receiving radio accepted the frame into its queue.
    Accepted,
    /// The receiving radio refused (queue bound, bit budget, channel busy).
    Rejected(String),
    /// Parallel mode: buffered until the epoch-end barrier.
    Deferred,
}

struct TxRecord {
    frequency_hz: f64,
    src_node: NodeId,
}

struct PendingDelivery {
    cell: Weak<ModelCell>,
    frame: Frame,
    snr_db: f64,
    t: SimTime,
}

/// The fabric itself. One per scenario, shared through the [`crate::kernel::SimContext`].
pub struct LinkFabric {
    mode: ExecMode,
    ports: RwLock<Vec<RadioPort>>,
    epoch_txs: Mutex<Vec<TxRecord>>,
    deferred: Mutex<Vec<PendingDelivery>>,
}

impl LinkFabric {
    pub fn new(mode: ExecMode) -> Self {
        Self {
            mode,
            ports: RwLock::new(Vec::new()),
            epoch_txs: Mutex::new(Vec::new()),
            deferred: Mutex::new(Vec::new()),
        }
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    /// Registers a radio endpoint. Called from each radio's wiring hook.
    pub fn register_port(&self, port: RadioPort) {
        debug!(
            node = port.node_id,
            radio = port.radio_id,
            tag = %port.tag,
            frequency_hz = port.frequency_hz,
            "radio port registered"
        );
        self.ports.write().push(port);
    }

    /// The receiver port on `node` with a compatible tag tuned to
    /// `frequency_hz`, if any. `(tag, frequency)` uniqueness is enforced at
    /// orchestration, so at most one port can match.
    pub fn port(
        &self,
        node: NodeId,
        compatible: &[ModelTag],
        frequency_hz: f64,
    ) -> Option<RadioPort> {
        self.ports
            .read()
            .iter()
            .find(|p| {
                p.node_id == node
                    && compatible.contains(&p.tag)
                    && (p.frequency_hz - frequency_hz).abs() <= FREQ_TOL_HZ
            })
            .cloned()
    }

    /// Clears per-epoch interference state. Called by the manager at the top
    /// of every epoch.
    pub fn begin_epoch(&self, _t: SimTime) {
        self.epoch_txs.lock().clear();
    }

    /// Registers a transmission and returns how many *other* co-channel
    /// transmissions this epoch precede it. Radios feed the count into their
    /// class-specific interference predicate.
    pub fn note_transmission(&self, frequency_hz: f64, src_node: NodeId) -> usize {
        let mut txs = self.epoch_txs.lock();
        let cochannel = txs
            .iter()
            .filter(|r| r.src_node != src_node && (r.frequency_hz - frequency_hz).abs() <= FREQ_TOL_HZ)
            .count();
        txs.push(TxRecord { frequency_hz, src_node });
        cochannel
    }

    /// Attempts delivery into a receiver port. Sequential mode invokes the
    /// receiving radio immediately; parallel mode defers to the barrier.
    pub fn deliver(&self, port: &RadioPort, frame: Frame, snr_db: f64, t: SimTime) -> DeliveryOutcome {
        if !port.window.contains(t) {
            return DeliveryOutcome::Rejected("receiver-out-of-window".into());
        }
        match self.mode {
            ExecMode::Sequential => Self::deliver_now(&port.cell, frame, snr_db, t),
            ExecMode::Parallel => {
                self.deferred.lock().push(PendingDelivery {
                    cell: port.cell.clone(),
                    frame,
                    snr_db,
                    t,
                });
                DeliveryOutcome::Deferred
            }
        }
    }

    fn deliver_now(cell: &Weak<ModelCell>, frame: Frame, snr_db: f64, t: SimTime) -> DeliveryOutcome {
        let Some(cell) = cell.upgrade() else {
            return DeliveryOutcome::Rejected("receiver-gone".into());
        };
        let args = Args::new()
            .with("frame", Value::Frame(frame))
            .with("snr_db", Value::Float(snr_db))
            .with("at", Value::Time(t));
        match cell.invoke("deliver", &args) {
            Ok(Value::Bool(true)) => DeliveryOutcome::Accepted,
            Ok(Value::Str(reason)) => DeliveryOutcome::Rejected(reason),
            Ok(_) => DeliveryOutcome::Rejected("refused".into()),
            Err(err) => DeliveryOutcome::Rejected(err.to_string()),
        }
    }

    /// Applies buffered deliveries at the epoch-end barrier. No-op in
    /// sequential mode.
    pub fn flush_deferred(&self) {
        let pending: Vec<_> = std::mem::take(&mut *self.deferred.lock());
        for delivery in pending {
            let _ = Self::deliver_now(&delivery.cell, delivery.frame, delivery.snr_db, delivery.t);
        }
    }
}
