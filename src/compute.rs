//! Onboard compute model.
//!
//! A bounded job queue processed at a fixed per-epoch throughput, gated on
//! the POWER sibling when one is present. Jobs are enqueued through
//! `add_task` (by siblings or the runtime control plane) and drain head
//! first.

use std::collections::VecDeque;
use std::sync::Weak;

use serde_json::json;

use crate::config::ConfigError;
use crate::kernel::{Args, InvocationError, Model, ModelInit, ModelTag, Node, SimTime, Value};
use crate::simlog::{EventKind, NodeLogger};

struct Task {
    id: u64,
    units_remaining: u64,
    size_bits: u64,
}

pub struct ComputeModel {
    queue: VecDeque<Task>,
    queue_cap: usize,
    units_per_epoch: u64,
    next_task_id: u64,
    completed: u64,
    delta: f64,
    owner: Weak<Node>,
    log: NodeLogger,
}

impl ComputeModel {
    pub const CLASS: &'static str = "ModelCompute";

    pub fn build(init: ModelInit) -> Result<Box<dyn Model>, ConfigError> {
        Ok(Box::new(Self {
            queue: VecDeque::new(),
            queue_cap: init.cfg.opt_u64("queue_size", 64)? as usize,
            units_per_epoch: init.cfg.req_u64("units_per_epoch")?,
            next_task_id: 0,
            completed: 0,
            delta: init.ctx.delta,
            owner: init.owner,
            log: init.log,
        }))
    }

    /// True when the POWER sibling (if any) lets compute run this epoch.
    fn power_ok(&self, t: SimTime) -> bool {
        let Some(owner) = self.owner.upgrade() else { return true };
        let Some(power) = owner.model_by_tag(ModelTag::Power) else {
            return true;
        };
        let probe = Args::new().with("tag", Value::Str("COMPUTE".into()));
        if !matches!(power.invoke("has_energy", &probe), Ok(Value::Bool(true))) {
            return false;
        }
        let consume = Args::new()
            .with("tag", Value::Str("COMPUTE".into()))
            .with("duration_s", Value::Float(self.delta))
            .with("at", Value::Time(t));
        matches!(power.invoke("consume_energy", &consume), Ok(Value::Bool(true)))
    }
}

impl Model for ComputeModel {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    fn tag(&self) -> ModelTag {
        ModelTag::Compute
    }

    fn invoke(&mut self, op: &str, args: &Args) -> Result<Value, InvocationError> {
        match op {
            "add_task" => {
                let units = args.req_int(op, "units")?;
                if units <= 0 {
                    return Err(InvocationError::PreconditionFailed {
                        op: op.to_string(),
                        reason: "a task needs at least one unit of work".into(),
                    });
                }
                let size_bits = args.opt_int(op, "size_bits")?.unwrap_or(0).max(0) as u64;
                if self.queue.len() >= self.queue_cap {
                    return Ok(Value::Bool(false));
                }
                let id = self.next_task_id;
                self.next_task_id += 1;
                self.queue.push_back(Task {
                    id,
                    units_remaining: units as u64,
                    size_bits,
                });
                if let Some(t) = args.opt_time(op, "at")? {
                    self.log.info(
                        t,
                        EventKind::ComputeEnqueued,
                        json!({ "task": id, "units": units }),
                    );
                }
                Ok(Value::Bool(true))
            }
            "get_queue_size" => Ok(Value::Int(self.queue.len() as i64)),
            "get_completed_count" => Ok(Value::Int(self.completed as i64)),
            _ => Err(InvocationError::UnknownOperation {
                class: Self::CLASS,
                op: op.to_string(),
            }),
        }
    }

    fn advance(&mut self, t: SimTime) {
        if self.queue.is_empty() || !self.power_ok(t) {
            return;
        }
        let mut budget = self.units_per_epoch;
        while budget > 0 {
            let Some(task) = self.queue.front_mut() else { break };
            let take = budget.min(task.units_remaining);
            task.units_remaining -= take;
            budget -= take;
            if task.units_remaining == 0 {
                if let Some(done) = self.queue.pop_front() {
                    self.completed += 1;
                    self.log.info(
                        t,
                        EventKind::ComputeCompleted,
                        json!({ "task": done.id, "bits": done.size_bits }),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(units_per_epoch: u64) -> ComputeModel {
        ComputeModel {
            queue: VecDeque::new(),
            queue_cap: 4,
            units_per_epoch,
            next_task_id: 0,
            completed: 0,
            delta: 1.0,
            owner: Weak::new(),
            log: NodeLogger::disabled(1),
        }
    }

    #[test]
    fn drains_at_configured_throughput() {
        let mut compute = model(3);
        let add = Args::new().with("units", Value::Int(5));
        assert_eq!(compute.invoke("add_task", &add).unwrap(), Value::Bool(true));
        assert_eq!(compute.invoke("add_task", &add).unwrap(), Value::Bool(true));

        let t = SimTime::from_unix(0.0);
        compute.advance(t); // 3 of task 0
        assert_eq!(compute.invoke("get_queue_size", &Args::new()).unwrap(), Value::Int(2));
        compute.advance(t.offset(1.0)); // finish task 0, 1 of task 1
        assert_eq!(compute.invoke("get_queue_size", &Args::new()).unwrap(), Value::Int(1));
        compute.advance(t.offset(2.0));
        compute.advance(t.offset(3.0));
        assert_eq!(compute.invoke("get_queue_size", &Args::new()).unwrap(), Value::Int(0));
        assert_eq!(
            compute.invoke("get_completed_count", &Args::new()).unwrap(),
            Value::Int(2)
        );
    }

    #[test]
    fn queue_bound_refuses_new_tasks() {
        let mut compute = model(1);
        let add = Args::new().with("units", Value::Int(1));
        for _ in 0..4 {
            assert_eq!(compute.invoke("add_task", &add).unwrap(), Value::Bool(true));
        }
        assert_eq!(compute.invoke("add_task", &add).unwrap(), Value::Bool(false));
    }

    #[test]
    fn zero_unit_tasks_are_rejected() {
        let mut compute = model(1);
        let add = Args::new().with("units", Value::Int(0));
        assert!(matches!(
            compute.invoke("add_task", &add),
            Err(InvocationError::PreconditionFailed { .. })
        ));
    }
}
