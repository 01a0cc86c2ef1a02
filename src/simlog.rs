//! Simulation event log.
//!
//! Distinct from engine diagnostics (which go to `tracing`): this is the
//! line-oriented record stream analytics pipelines consume. Every record is a
//! `(sim_timestamp, node_id, level, event_kind, payload)` tuple with a stable
//! [`EventKind`] enumeration.
//!
//! Writes are best-effort: records pass through a bounded channel to a writer
//! thread that owns the sink. A back-pressured sink drops records (counted)
//! but never stalls the scheduler.

use std::io::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use serde_json::json;

use crate::kernel::{NodeId, SimTime};

/// Per-node log verbosity, most severe first. A node configured at `info`
/// keeps `error`, `warn`, and `info` records; `all` keeps everything.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimLevel {
    Error,
    Warn,
    Info,
    Debug,
    /// Protocol state-machine traces (MAC transitions, beacon bookkeeping).
    Logic,
    All,
}

impl SimLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimLevel::Error => "error",
            SimLevel::Warn => "warn",
            SimLevel::Info => "info",
            SimLevel::Debug => "debug",
            SimLevel::Logic => "logic",
            SimLevel::All => "all",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "error" => SimLevel::Error,
            "warn" => SimLevel::Warn,
            "info" => SimLevel::Info,
            "debug" => SimLevel::Debug,
            "logic" => SimLevel::Logic,
            "all" => SimLevel::All,
            _ => return None,
        })
    }
}

/// Stable enumeration of simulation events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    BeaconSent,
    PacketTx,
    PacketRx,
    PacketDrop,
    EnergyConsumed,
    ImageTaken,
    PassStart,
    PassEnd,
    ComputeEnqueued,
    ComputeCompleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BeaconSent => "beacon-sent",
            EventKind::PacketTx => "packet-tx",
            EventKind::PacketRx => "packet-rx",
            EventKind::PacketDrop => "packet-drop",
            EventKind::EnergyConsumed => "energy-consumed",
            EventKind::ImageTaken => "image-taken",
            EventKind::PassStart => "pass-start",
            EventKind::PassEnd => "pass-end",
            EventKind::ComputeEnqueued => "compute-enqueued",
            EventKind::ComputeCompleted => "compute-completed",
        }
    }
}

/// One simulation log record.
#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    pub t: SimTime,
    pub node: NodeId,
    pub level: SimLevel,
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

impl LogRecord {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "t": self.t.to_datetime().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            "node": self.node,
            "level": self.level.as_str(),
            "event": self.kind.as_str(),
            "payload": self.payload,
        })
    }
}

/// Destination for log records. Owned by the writer thread.
pub trait LogSink: Send {
    fn write(&mut self, record: &LogRecord);

    fn flush(&mut self) {}
}

/// Human-oriented one-line-per-record sink.
#[derive(Default)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn write(&mut self, record: &LogRecord) {
        println!(
            "{} [{:>5}] node={} {} {}",
            record.t,
            record.level.as_str(),
            record.node,
            record.kind.as_str(),
            record.payload
        );
    }
}

/// JSON-lines file sink.
pub struct JsonFileSink {
    writer: std::io::BufWriter<std::fs::File>,
}

impl JsonFileSink {
    pub fn create(path: &std::path::Path) -> std::io::Result<Self> {
        Ok(Self {
            writer: std::io::BufWriter::new(std::fs::File::create(path)?),
        })
    }
}

impl LogSink for JsonFileSink {
    fn write(&mut self, record: &LogRecord) {
        // A failed write is dropped like a full channel; the simulation
        // must not stall on the sink.
        let _ = writeln!(self.writer, "{}", record.to_json());
    }

    fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

/// In-memory sink for tests: records land in a shared vector.
pub struct MemorySink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemorySink {
    pub fn new() -> (Self, Arc<Mutex<Vec<LogRecord>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        (Self { records: records.clone() }, records)
    }
}

impl LogSink for MemorySink {
    fn write(&mut self, record: &LogRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Cheap cloneable producer handle.
#[derive(Clone)]
pub struct SimLogger {
    tx: Option<SyncSender<LogRecord>>,
    dropped: Arc<AtomicU64>,
}

impl SimLogger {
    /// A logger that discards everything. Useful for isolated model tests.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn emit(&self, record: LogRecord) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Binds this logger to one node and its configured verbosity.
    pub fn for_node(&self, node: NodeId, level: SimLevel) -> NodeLogger {
        NodeLogger {
            inner: self.clone(),
            node,
            level,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Producer handle bound to a node: applies the node's level filter and
/// stamps the node id on every record.
#[derive(Clone)]
pub struct NodeLogger {
    inner: SimLogger,
    node: NodeId,
    level: SimLevel,
}

impl NodeLogger {
    pub fn disabled(node: NodeId) -> Self {
        SimLogger::disabled().for_node(node, SimLevel::All)
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn event(&self, t: SimTime, level: SimLevel, kind: EventKind, payload: serde_json::Value) {
        if level > self.level {
            return;
        }
        self.inner.emit(LogRecord {
            t,
            node: self.node,
            level,
            kind,
            payload,
        });
    }

    pub fn info(&self, t: SimTime, kind: EventKind, payload: serde_json::Value) {
        self.event(t, SimLevel::Info, kind, payload);
    }

    pub fn warn(&self, t: SimTime, kind: EventKind, payload: serde_json::Value) {
        self.event(t, SimLevel::Warn, kind, payload);
    }

    pub fn logic(&self, t: SimTime, kind: EventKind, payload: serde_json::Value) {
        self.event(t, SimLevel::Logic, kind, payload);
    }
}

/// The running log pipeline: a bounded channel and the writer thread that
/// owns the sink.
pub struct SimLog {
    logger: SimLogger,
    writer: Option<JoinHandle<()>>,
}

const DEFAULT_CAPACITY: usize = 4096;

impl SimLog {
    pub fn start(sink: Box<dyn LogSink>) -> Self {
        Self::with_capacity(sink, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(mut sink: Box<dyn LogSink>, capacity: usize) -> Self {
        let (tx, rx): (SyncSender<LogRecord>, Receiver<LogRecord>) = sync_channel(capacity);
        let writer = std::thread::spawn(move || {
            while let Ok(record) = rx.recv() {
                sink.write(&record);
            }
            sink.flush();
        });
        Self {
            logger: SimLogger {
                tx: Some(tx),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            writer: Some(writer),
        }
    }

    pub fn logger(&self) -> SimLogger {
        self.logger.clone()
    }

    /// Closes the channel, waits for the writer to drain, and reports how
    /// many records back-pressure discarded.
    pub fn shutdown(mut self) -> u64 {
        let dropped = self.logger.dropped();
        self.logger.tx = None;
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
        dropped
    }
}

impl Drop for SimLog {
    fn drop(&mut self) {
        self.logger.tx = None;
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}
