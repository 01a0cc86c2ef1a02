//! Manager: the epoch scheduler.
//!
//! Drives simulated time from the scenario window start to its end in fixed
//! steps of Δ. Within an epoch, topologies advance in declaration order,
//! nodes in topology order, and models in the dependency order established
//! at orchestration. Nodes outside their own time window skip their advance
//! but stay addressable by the link fabric.
//!
//! At every epoch boundary the manager flushes deferred deliveries (parallel
//! mode's barrier), drains queued runtime-API calls, and checks the
//! termination flag. The loop itself is synchronous and deterministic;
//! [`Manager::spawn`] moves it onto a blocking task so async callers can
//! drive the control plane while it runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::kernel::{ExecMode, NodeId, SimTime, Value};
use crate::orchestrator::Scenario;
use crate::runtime::{ModelSelector, RuntimeCallError, RuntimeClient, RuntimeRequest};

/// Invariant violations that abort the run. Everything recoverable is
/// handled below this level.
#[derive(Debug, Error)]
pub enum FatalRuntimeError {
    #[error("simulated time is not monotonic at epoch {epoch}")]
    NonMonotonicTime { epoch: u64 },

    #[error("manager task panicked")]
    WorkerPanicked,
}

impl FatalRuntimeError {
    /// Process exit code when wrapped in a CLI.
    pub fn exit_code(&self) -> i32 {
        4
    }
}

/// What a completed run reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Epochs actually executed (full run: `floor((end-start)/Δ) + 1`).
    pub epochs_run: u64,
    /// Simulation log records discarded by sink back-pressure.
    pub dropped_log_records: u64,
}

pub struct Manager {
    scenario: Scenario,
    intake: mpsc::UnboundedReceiver<RuntimeRequest>,
    terminate: Arc<AtomicBool>,
    topology_of: HashMap<NodeId, u32>,
}

impl Manager {
    /// Wraps an orchestrated scenario and hands back the control-plane
    /// client for outside callers.
    pub fn new(scenario: Scenario) -> (Self, RuntimeClient) {
        let (tx, intake) = mpsc::unbounded_channel();
        let terminate = Arc::new(AtomicBool::new(false));
        let client = RuntimeClient::new(tx, terminate.clone());
        let topology_of = scenario
            .topologies
            .iter()
            .flat_map(|topo| topo.nodes.iter().map(move |n| (n.id(), topo.id)))
            .collect();
        (
            Self {
                scenario,
                intake,
                terminate,
                topology_of,
            },
            client,
        )
    }

    /// Runs the simulation to completion (or until terminated). Consumes the
    /// manager; the scenario is dropped when this returns.
    pub fn run(mut self) -> Result<RunSummary, FatalRuntimeError> {
        let window = self.scenario.window;
        let delta = self.scenario.delta;
        let epochs = window.epoch_count(delta);
        info!(epochs, delta, "simulation started");

        let mut previous: Option<SimTime> = None;
        let mut epochs_run = 0;
        for index in 0..epochs {
            let t = window.epoch_time(index, delta);
            if previous.is_some_and(|p| t <= p) {
                return Err(FatalRuntimeError::NonMonotonicTime { epoch: index });
            }
            previous = Some(t);

            self.scenario.ctx.fabric.begin_epoch(t);
            match self.scenario.ctx.mode {
                ExecMode::Sequential => self.advance_sequential(t),
                ExecMode::Parallel => self.advance_parallel(t),
            }
            // Parallel-mode barrier: buffered deliveries land now and become
            // visible to receivers at the next epoch.
            self.scenario.ctx.fabric.flush_deferred();
            self.drain_calls();

            epochs_run = index + 1;
            if self.terminate.load(Ordering::SeqCst) {
                info!(epoch = index, "termination requested");
                break;
            }
        }

        // Serve stragglers that queued during the final epoch, then close.
        self.drain_calls();
        drop(self.intake);

        let dropped_log_records = self
            .scenario
            .simlog
            .take()
            .map(|log| log.shutdown())
            .unwrap_or(0);
        info!(epochs_run, dropped_log_records, "simulation finished");
        Ok(RunSummary {
            epochs_run,
            dropped_log_records,
        })
    }

    /// Moves the run onto a blocking task; use [`RunningSimulation::join`]
    /// to collect the summary.
    pub fn spawn(self) -> RunningSimulation {
        RunningSimulation {
            handle: tokio::task::spawn_blocking(move || self.run()),
        }
    }

    fn advance_sequential(&self, t: SimTime) {
        for topology in &self.scenario.topologies {
            for node in &topology.nodes {
                if node.window().contains(t) {
                    node.advance(t);
                }
            }
        }
    }

    /// One scoped worker per topology. Cross-node packet deliveries were
    /// already routed into the deferred buffer by the fabric, so workers
    /// never write into each other's receive queues mid-epoch.
    fn advance_parallel(&self, t: SimTime) {
        std::thread::scope(|scope| {
            for topology in &self.scenario.topologies {
                scope.spawn(move || {
                    for node in &topology.nodes {
                        if node.window().contains(t) {
                            node.advance(t);
                        }
                    }
                });
            }
        });
    }

    /// Serves every queued control-plane call. Runs strictly between epochs,
    /// so calls never interleave with model advance.
    fn drain_calls(&mut self) {
        while let Ok(request) = self.intake.try_recv() {
            let result = self.execute(&request);
            // The caller may have abandoned its handle; that discards the
            // result by contract.
            let _ = request.respond_to.send(result);
        }
    }

    fn execute(&self, request: &RuntimeRequest) -> Result<Value, RuntimeCallError> {
        let target = &request.target;
        let node = self
            .scenario
            .ctx
            .node(target.node)
            .ok_or(RuntimeCallError::NoSuchNode(target.node))?;
        if let Some(topology) = target.topology {
            if self.topology_of.get(&target.node) != Some(&topology) {
                return Err(RuntimeCallError::NoSuchNode(target.node));
            }
        }
        let model = match &target.model {
            ModelSelector::Tag(tag) => node.model_by_tag(*tag),
            ModelSelector::Class(name) => node.model_by_class(name),
        }
        .ok_or_else(|| RuntimeCallError::NoSuchModel {
            node: target.node,
            selector: target.model.to_string(),
        })?;
        debug!(node = target.node, op = %request.op, "runtime call");
        Ok(model.invoke(&request.op, &request.args)?)
    }
}

/// Handle to a spawned manager.
pub struct RunningSimulation {
    handle: tokio::task::JoinHandle<Result<RunSummary, FatalRuntimeError>>,
}

impl RunningSimulation {
    pub async fn join(self) -> Result<RunSummary, FatalRuntimeError> {
        self.handle
            .await
            .map_err(|_| FatalRuntimeError::WorkerPanicked)?
    }
}
