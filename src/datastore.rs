//! Data queue substrate.
//!
//! A bounded FIFO of payload units with the surface every data consumer
//! shares: `add_data`, `get_data` (pop head), `peek_data` (read without
//! deleting, for send-then-ack cycles), `delete_data` (drop acknowledged
//! ids), `get_queue`, `get_queue_size`.
//!
//! [`DataStore`] is the passive store (optionally in a relay role for
//! third-party traffic in transit). [`DataGenerator`] exposes the same
//! surface but fills itself each epoch from a Poisson arrival process.

use std::collections::VecDeque;

use rand::rngs::SmallRng;
use rand::Rng;
use serde_json::json;

use crate::config::ConfigError;
use crate::kernel::{
    Args, DataKind, DataUnit, InvocationError, Model, ModelInit, ModelTag, NodeId, SimTime, Value,
};
use crate::simlog::{EventKind, NodeLogger};

const DEFAULT_QUEUE_SIZE: u64 = 256;

/// The bounded FIFO both models wrap.
struct UnitQueue {
    cap: usize,
    items: VecDeque<DataUnit>,
}

impl UnitQueue {
    fn new(cap: usize) -> Self {
        Self { cap, items: VecDeque::new() }
    }

    fn push(&mut self, unit: DataUnit) -> bool {
        if self.items.len() >= self.cap {
            return false;
        }
        self.items.push_back(unit);
        true
    }

    fn pop(&mut self) -> Option<DataUnit> {
        self.items.pop_front()
    }

    fn peek_n(&self, count: usize) -> Vec<DataUnit> {
        self.items.iter().take(count).cloned().collect()
    }

    fn delete_ids(&mut self, ids: &[u64]) -> usize {
        let before = self.items.len();
        self.items.retain(|unit| !ids.contains(&unit.id));
        before - self.items.len()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

fn parse_ids(op: &str, args: &Args) -> Result<Vec<u64>, InvocationError> {
    match args.get("ids") {
        Some(Value::List(items)) => items
            .iter()
            .map(|v| {
                v.as_int()
                    .map(|id| id as u64)
                    .ok_or(InvocationError::InvalidArgument {
                        op: op.to_string(),
                        key: "ids",
                        expected: "a list of unit ids",
                        got: "list",
                    })
            })
            .collect(),
        Some(_) => Err(InvocationError::InvalidArgument {
            op: op.to_string(),
            key: "ids",
            expected: "a list of unit ids",
            got: "other",
        }),
        None => Err(InvocationError::MissingArgument {
            op: op.to_string(),
            key: "ids",
        }),
    }
}

/// The read surface shared by the store and the generator.
fn queue_op(
    queue: &mut UnitQueue,
    op: &str,
    args: &Args,
) -> Option<Result<Value, InvocationError>> {
    Some(match op {
        "get_data" => Ok(queue.pop().map(Value::Unit).unwrap_or(Value::Null)),
        "peek_data" => {
            let count = args.opt_int(op, "count").map(|c| c.unwrap_or(1).max(0) as usize);
            match count {
                Ok(count) => Ok(Value::List(
                    queue.peek_n(count).into_iter().map(Value::Unit).collect(),
                )),
                Err(err) => Err(err),
            }
        }
        "delete_data" => match parse_ids(op, args) {
            Ok(ids) => Ok(Value::Int(queue.delete_ids(&ids) as i64)),
            Err(err) => Err(err),
        },
        "get_queue" => Ok(Value::List(
            queue.items.iter().cloned().map(Value::Unit).collect(),
        )),
        "get_queue_size" => Ok(Value::Int(queue.len() as i64)),
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// DataStore
// ---------------------------------------------------------------------------

/// How a store is used. Purely informational in the surface; relays hold
/// third-party traffic in transit over ISL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreRole {
    Store,
    Relay,
}

pub struct DataStore {
    queue: UnitQueue,
    role: StoreRole,
    log: NodeLogger,
    now: Option<SimTime>,
}

impl DataStore {
    pub const CLASS: &'static str = "ModelDataStore";

    pub fn build(init: ModelInit) -> Result<Box<dyn Model>, ConfigError> {
        let role = match init.cfg.opt_str("role")? {
            None | Some("store") => StoreRole::Store,
            Some("relay") => StoreRole::Relay,
            Some(_) => {
                return Err(ConfigError::InvalidValue {
                    class: init.cfg.class().to_string(),
                    key: "role".to_string(),
                    expected: "`store` or `relay`",
                })
            }
        };
        Ok(Box::new(Self {
            queue: UnitQueue::new(init.cfg.opt_u64("queue_size", DEFAULT_QUEUE_SIZE)? as usize),
            role,
            log: init.log,
            now: None,
        }))
    }

    pub fn role(&self) -> StoreRole {
        self.role
    }
}

impl Model for DataStore {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    fn tag(&self) -> ModelTag {
        ModelTag::DataStore
    }

    fn invoke(&mut self, op: &str, args: &Args) -> Result<Value, InvocationError> {
        if op == "add_data" {
            let unit = args.req_unit(op, "unit")?.clone();
            let accepted = self.queue.push(unit.clone());
            if !accepted {
                // Overflow is recovered locally: drop, log, report false.
                let t = args.opt_time(op, "at")?.or(self.now).unwrap_or(unit.created_at);
                self.log.warn(
                    t,
                    EventKind::PacketDrop,
                    json!({ "unit": unit.id, "reason": "store-full" }),
                );
            }
            return Ok(Value::Bool(accepted));
        }
        queue_op(&mut self.queue, op, args).unwrap_or_else(|| {
            Err(InvocationError::UnknownOperation {
                class: Self::CLASS,
                op: op.to_string(),
            })
        })
    }

    fn advance(&mut self, t: SimTime) {
        // Pure container; nothing to do per epoch.
        self.now = Some(t);
    }
}

// ---------------------------------------------------------------------------
// DataGenerator
// ---------------------------------------------------------------------------

/// Fills its queue per epoch with Poisson arrivals of fixed-size units.
pub struct DataGenerator {
    queue: UnitQueue,
    /// Mean arrivals per second.
    lambda_per_s: f64,
    payload_size_bits: u64,
    delta: f64,
    node_id: NodeId,
    seq: u32,
    generated: u64,
    stopped: bool,
    rng: SmallRng,
    log: NodeLogger,
}

impl DataGenerator {
    pub const CLASS: &'static str = "ModelDataGenerator";

    pub fn build(init: ModelInit) -> Result<Box<dyn Model>, ConfigError> {
        Ok(Box::new(Self {
            queue: UnitQueue::new(init.cfg.opt_u64("queue_size", DEFAULT_QUEUE_SIZE)? as usize),
            lambda_per_s: init.cfg.req_f64("lambda")?,
            payload_size_bits: init.cfg.req_u64("payload_size_bits")?,
            delta: init.ctx.delta,
            node_id: init.node_id,
            seq: 0,
            generated: 0,
            stopped: false,
            rng: init.ctx.rng_for(init.node_id),
            log: init.log,
        }))
    }

    /// Knuth's method; fine for the per-epoch means this simulator runs.
    fn poisson(&mut self, mean: f64) -> u32 {
        if mean <= 0.0 {
            return 0;
        }
        let limit = (-mean).exp();
        let mut count = 0u32;
        let mut product: f64 = 1.0;
        loop {
            product *= self.rng.gen_range(0.0..1.0);
            if product <= limit {
                return count;
            }
            count += 1;
        }
    }
}

impl Model for DataGenerator {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    fn tag(&self) -> ModelTag {
        ModelTag::DataGenerator
    }

    fn invoke(&mut self, op: &str, args: &Args) -> Result<Value, InvocationError> {
        match op {
            // Idempotent: once stopped, subsequent epochs add zero units.
            "stop" => {
                self.stopped = true;
                Ok(Value::Bool(true))
            }
            "is_stopped" => Ok(Value::Bool(self.stopped)),
            "get_generated_count" => Ok(Value::Int(self.generated as i64)),
            _ => queue_op(&mut self.queue, op, args).unwrap_or_else(|| {
                Err(InvocationError::UnknownOperation {
                    class: Self::CLASS,
                    op: op.to_string(),
                })
            }),
        }
    }

    fn advance(&mut self, t: SimTime) {
        if self.stopped {
            return;
        }
        let arrivals = self.poisson(self.lambda_per_s * self.delta);
        for _ in 0..arrivals {
            let unit = DataUnit {
                id: DataUnit::unit_id(self.node_id, self.seq),
                source: self.node_id,
                kind: DataKind::SensorReading,
                size_bits: self.payload_size_bits,
                created_at: t,
            };
            self.seq = self.seq.wrapping_add(1);
            self.generated += 1;
            if !self.queue.push(unit.clone()) {
                self.log.warn(
                    t,
                    EventKind::PacketDrop,
                    json!({ "unit": unit.id, "reason": "generator-full" }),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::SimTime;

    fn unit(id: u64) -> DataUnit {
        DataUnit {
            id,
            source: 1,
            kind: DataKind::SensorReading,
            size_bits: 512,
            created_at: SimTime::from_unix(0.0),
        }
    }

    fn store() -> DataStore {
        DataStore {
            queue: UnitQueue::new(3),
            role: StoreRole::Store,
            log: NodeLogger::disabled(1),
            now: None,
        }
    }

    #[test]
    fn fifo_order_and_bound() {
        let mut ds = store();
        for id in 0..3u64 {
            let args = Args::new().with("unit", Value::Unit(unit(id)));
            assert_eq!(ds.invoke("add_data", &args).unwrap(), Value::Bool(true));
        }
        // Fourth exceeds the bound: dropped, reported false, queue unchanged.
        let args = Args::new().with("unit", Value::Unit(unit(3)));
        assert_eq!(ds.invoke("add_data", &args).unwrap(), Value::Bool(false));
        assert_eq!(
            ds.invoke("get_queue_size", &Args::new()).unwrap(),
            Value::Int(3)
        );
        assert_eq!(
            ds.invoke("get_data", &Args::new()).unwrap(),
            Value::Unit(unit(0))
        );
    }

    #[test]
    fn peek_does_not_remove() {
        let mut ds = store();
        for id in 0..3u64 {
            let args = Args::new().with("unit", Value::Unit(unit(id)));
            ds.invoke("add_data", &args).unwrap();
        }
        let peeked = ds
            .invoke("peek_data", &Args::new().with("count", Value::Int(2)))
            .unwrap();
        assert_eq!(
            peeked,
            Value::List(vec![Value::Unit(unit(0)), Value::Unit(unit(1))])
        );
        assert_eq!(
            ds.invoke("get_queue_size", &Args::new()).unwrap(),
            Value::Int(3)
        );
    }

    fn generator(lambda_per_s: f64) -> DataGenerator {
        use rand::SeedableRng;
        DataGenerator {
            queue: UnitQueue::new(1024),
            lambda_per_s,
            payload_size_bits: 512,
            delta: 1.0,
            node_id: 9,
            seq: 0,
            generated: 0,
            stopped: false,
            rng: SmallRng::seed_from_u64(42),
            log: NodeLogger::disabled(9),
        }
    }

    #[test]
    fn generator_fills_at_roughly_lambda() {
        let mut g = generator(2.0);
        for epoch in 0..1000 {
            g.advance(SimTime::from_unix(epoch as f64));
        }
        // Mean 2 arrivals/epoch over 1000 epochs; a seeded run lands well
        // inside 3 sigma. The bounded queue itself saturates at its cap.
        assert_eq!(
            g.invoke("get_queue_size", &Args::new()).unwrap(),
            Value::Int(1024)
        );
        assert!(g.generated > 1700 && g.generated < 2300, "generated {}", g.generated);
    }

    #[test]
    fn generator_stop_is_idempotent() {
        let mut g = generator(5.0);
        for epoch in 0..20 {
            g.advance(SimTime::from_unix(epoch as f64));
        }
        let before = g.generated;
        assert!(before > 0);

        assert_eq!(g.invoke("stop", &Args::new()).unwrap(), Value::Bool(true));
        for epoch in 20..40 {
            g.advance(SimTime::from_unix(epoch as f64));
        }
        assert_eq!(g.generated, before);

        // A second stop changes nothing.
        assert_eq!(g.invoke("stop", &Args::new()).unwrap(), Value::Bool(true));
        g.advance(SimTime::from_unix(40.0));
        assert_eq!(g.generated, before);
        assert_eq!(g.invoke("is_stopped", &Args::new()).unwrap(), Value::Bool(true));
    }

    #[test]
    fn delete_removes_acknowledged_ids_only() {
        let mut ds = store();
        for id in 0..3u64 {
            let args = Args::new().with("unit", Value::Unit(unit(id)));
            ds.invoke("add_data", &args).unwrap();
        }
        let args = Args::new().with("ids", Value::List(vec![Value::Int(0), Value::Int(2)]));
        assert_eq!(ds.invoke("delete_data", &args).unwrap(), Value::Int(2));
        assert_eq!(
            ds.invoke("get_data", &Args::new()).unwrap(),
            Value::Unit(unit(1))
        );
    }
}
