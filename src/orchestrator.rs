//! Orchestrator.
//!
//! Turns a parsed scenario into a fully wired node graph. This is the only
//! component that constructs nodes and models. Per node it:
//!
//! 1. resolves the node factory and instantiates the node with its window,
//! 2. instantiates each declared model in source order, enforcing the
//!    owner-class filter,
//! 3. verifies every dependency clause is satisfied by some sibling
//!    (OR within a clause, AND across clauses),
//! 4. topologically orders the models, stable by declaration order, failing
//!    on cycles,
//! 5. rejects two same-node radios tuned to one frequency.
//!
//! After every topology exists it publishes the node directory and runs each
//! model's wiring hook (radio port registration, ISL peer resolution).
//! Orchestration errors are fatal before any epoch runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, ConfigReader, ScenarioConfig};
use crate::fov::PassCache;
use crate::geometry::{GeometryOracle, KeplerOracle};
use crate::kernel::{
    Args, ExecMode, ModelCell, ModelInit, ModelRef, Node, NodeId, NodeKind, SimContext, SimTime,
    TimeWindow, Value,
};
use crate::link::{LinkFabric, FREQ_TOL_HZ};
use crate::registry::Registry;
use crate::simlog::{ConsoleSink, JsonFileSink, LogSink, MemorySink, SimLevel, SimLog};

/// Orchestration-time failures. All fatal before the first epoch.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("model `{model}` on node {node}: node class `{owner}` is not a supported owner")]
    UnsupportedOwner {
        node: NodeId,
        model: String,
        owner: String,
    },

    #[error("model `{model}` on node {node}: no sibling satisfies any of {missing:?}")]
    UnsatisfiedDependency {
        node: NodeId,
        model: String,
        missing: Vec<String>,
    },

    #[error("node {node}: cyclic model dependencies among {cycle:?}")]
    CyclicDependency { node: NodeId, cycle: Vec<String> },
}

impl OrchestrationError {
    /// Process exit code when wrapped in a CLI: 2 for config problems, 3 for
    /// dependency resolution.
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestrationError::Config(_) => 2,
            _ => 3,
        }
    }
}

/// A named group of nodes.
pub struct Topology {
    pub id: u32,
    pub name: String,
    pub nodes: Vec<Arc<Node>>,
}

impl std::fmt::Debug for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topology")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

/// The fully instantiated simulation, ready for the manager.
pub struct Scenario {
    pub window: TimeWindow,
    pub delta: f64,
    pub seed: u64,
    pub topologies: Vec<Topology>,
    pub ctx: Arc<SimContext>,
    pub(crate) simlog: Option<SimLog>,
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("window", &self.window)
            .field("delta", &self.delta)
            .field("seed", &self.seed)
            .field("topologies", &self.topologies)
            .finish()
    }
}

impl Scenario {
    pub fn node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.ctx.node(id)
    }

    pub fn epoch_count(&self) -> u64 {
        self.window.epoch_count(self.delta)
    }
}

/// Builder over a registry plus optional overrides for tests: a scripted
/// oracle, an injected log sink, a fresh pass cache, a forced execution
/// mode.
pub struct Orchestrator<'r> {
    registry: &'r Registry,
    oracle: Option<Arc<dyn GeometryOracle>>,
    sink: Option<Box<dyn LogSink>>,
    pass_cache: Option<Arc<PassCache>>,
    mode: Option<ExecMode>,
}

impl<'r> Orchestrator<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            oracle: None,
            sink: None,
            pass_cache: None,
            mode: None,
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn GeometryOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_pass_cache(mut self, cache: Arc<PassCache>) -> Self {
        self.pass_cache = Some(cache);
        self
    }

    pub fn with_mode(mut self, mode: ExecMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn build(self, cfg: &ScenarioConfig) -> Result<Scenario, OrchestrationError> {
        let Orchestrator { registry, oracle, sink, pass_cache, mode } = self;

        let window = cfg.simtime.window()?;
        let delta = cfg.simtime.delta;
        let seed = cfg.simtime.seed;

        let mode = mode.unwrap_or_else(|| match &cfg.execution {
            Some(exec) => match exec.mode {
                crate::config::ExecutionModeConfig::Sequential => ExecMode::Sequential,
                crate::config::ExecutionModeConfig::Parallel => ExecMode::Parallel,
            },
            None => ExecMode::Sequential,
        });

        let sink = match sink {
            Some(sink) => sink,
            None => sink_from_config(cfg)?,
        };
        let simlog = SimLog::start(sink);

        let oracle = oracle.unwrap_or_else(|| Arc::new(KeplerOracle::new()));
        let pass_cache = pass_cache.unwrap_or_default();
        let fabric = Arc::new(LinkFabric::new(mode));
        let ctx = SimContext::new(
            oracle,
            pass_cache,
            fabric,
            simlog.logger(),
            seed,
            delta,
            mode,
        );

        let mut seen_ids: HashSet<NodeId> = HashSet::new();
        let mut topologies = Vec::with_capacity(cfg.topologies.len());
        for topo_cfg in &cfg.topologies {
            let mut nodes = Vec::with_capacity(topo_cfg.nodes.len());
            for node_cfg in &topo_cfg.nodes {
                if !seen_ids.insert(node_cfg.nodeid) {
                    return Err(ConfigError::DuplicateNodeId(node_cfg.nodeid).into());
                }
                nodes.push(build_node(registry, node_cfg, window, &ctx, &simlog)?);
            }
            topologies.push(Topology {
                id: topo_cfg.id,
                name: topo_cfg.name.clone(),
                nodes,
            });
        }

        // Cross-node wiring: publish the directory, then let every model
        // resolve peers and register fabric ports.
        ctx.publish_directory(
            topologies
                .iter()
                .flat_map(|topo| topo.nodes.iter().cloned()),
        );
        for topo in &topologies {
            for node in &topo.nodes {
                for model in node.models() {
                    model.wire();
                }
            }
        }

        info!(
            topologies = topologies.len(),
            nodes = seen_ids.len(),
            epochs = window.epoch_count(delta),
            ?mode,
            "scenario orchestrated"
        );

        Ok(Scenario {
            window,
            delta,
            seed,
            topologies,
            ctx,
            simlog: Some(simlog),
        })
    }
}

fn build_node(
    registry: &Registry,
    node_cfg: &crate::config::NodeConfig,
    scenario_window: TimeWindow,
    ctx: &Arc<SimContext>,
    simlog: &SimLog,
) -> Result<Arc<Node>, OrchestrationError> {
    let node_reg = registry.node(&node_cfg.iname)?;
    let kind = NodeKind::parse(&node_cfg.kind)
        .ok_or_else(|| ConfigError::UnknownNodeKind(node_cfg.kind.clone()))?;
    if kind != node_reg.kind {
        return Err(ConfigError::InvalidValue {
            class: node_cfg.iname.clone(),
            key: "type".to_string(),
            expected: "the node kind this class is registered for",
        }
        .into());
    }
    let level = SimLevel::parse(&node_cfg.loglevel)
        .ok_or_else(|| ConfigError::UnknownLogLevel(node_cfg.loglevel.clone()))?;
    let node_window = node_cfg.window(scenario_window)?;
    let reader = ConfigReader::new(&node_cfg.iname, &node_cfg.extra);
    let extras = (node_reg.build)(&reader)?;

    let node = Node::new(
        node_cfg.nodeid,
        kind,
        node_cfg.iname.clone(),
        node_window,
        level,
        extras.location,
    );

    let mut cells: Vec<ModelRef> = Vec::with_capacity(node_cfg.models.len());
    for model_cfg in &node_cfg.models {
        let model_reg = registry.model(&model_cfg.iname)?;
        if !model_reg.supported_nodes.is_empty()
            && !model_reg.supported_nodes.contains(&node_cfg.iname.as_str())
        {
            return Err(OrchestrationError::UnsupportedOwner {
                node: node_cfg.nodeid,
                model: model_cfg.iname.clone(),
                owner: node_cfg.iname.clone(),
            });
        }
        let init = ModelInit {
            owner: Arc::downgrade(&node),
            node_id: node_cfg.nodeid,
            node_kind: kind,
            node_class: &node_cfg.iname,
            cfg: ConfigReader::new(&model_cfg.iname, &model_cfg.extra),
            log: simlog.logger().for_node(node_cfg.nodeid, level),
            ctx: ctx.clone(),
        };
        let body = (model_reg.build)(init)?;
        cells.push(ModelCell::new(body));
        debug!(
            node = node_cfg.nodeid,
            model = %model_cfg.iname,
            "model instantiated"
        );
    }

    let ordered = order_models(registry, node_cfg.nodeid, cells)?;
    check_radio_frequencies(node_cfg.nodeid, &ordered)?;
    node.attach_models(ordered);
    Ok(node)
}

/// Verifies the CNF dependency expressions and sorts the cells so every
/// dependency precedes its dependents, stable with respect to the
/// declaration order on ties.
fn order_models(
    registry: &Registry,
    node: NodeId,
    cells: Vec<ModelRef>,
) -> Result<Vec<ModelRef>, OrchestrationError> {
    let count = cells.len();
    let classes: Vec<&'static str> = cells.iter().map(|c| c.class_name()).collect();

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut indegree: Vec<usize> = vec![0; count];
    for (dependent, cell) in cells.iter().enumerate() {
        let registration = registry.model(cell.class_name())?;
        for clause in registration.dependencies {
            let providers: Vec<usize> = (0..count)
                .filter(|&p| p != dependent && clause.contains(&classes[p]))
                .collect();
            if providers.is_empty() {
                return Err(OrchestrationError::UnsatisfiedDependency {
                    node,
                    model: cell.class_name().to_string(),
                    missing: clause.iter().map(|c| c.to_string()).collect(),
                });
            }
            for provider in providers {
                successors[provider].push(dependent);
                indegree[dependent] += 1;
            }
        }
    }

    // Kahn's algorithm, always taking the lowest declaration index among
    // the ready set.
    let mut ready: Vec<usize> = (0..count).filter(|&i| indegree[i] == 0).collect();
    let mut order: Vec<usize> = Vec::with_capacity(count);
    while let Some(&next) = ready.iter().min() {
        ready.retain(|&i| i != next);
        order.push(next);
        for &dependent in &successors[next] {
            indegree[dependent] -= 1;
            if indegree[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }
    if order.len() < count {
        let cycle = (0..count)
            .filter(|i| !order.contains(i))
            .map(|i| classes[i].to_string())
            .collect();
        return Err(OrchestrationError::CyclicDependency { node, cycle });
    }

    let mut slots: Vec<Option<ModelRef>> = cells.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// Two radios on one node must not share a frequency; the link fabric could
/// not resolve recipients unambiguously.
fn check_radio_frequencies(node: NodeId, cells: &[ModelRef]) -> Result<(), OrchestrationError> {
    let mut tuned: Vec<f64> = Vec::new();
    for cell in cells {
        if !cell.tag().is_radio() {
            continue;
        }
        let Ok(Value::Float(frequency_hz)) = cell.invoke("get_frequency", &Args::new()) else {
            continue;
        };
        if tuned.iter().any(|f| (f - frequency_hz).abs() <= FREQ_TOL_HZ) {
            return Err(ConfigError::DuplicateFrequency { node, frequency_hz }.into());
        }
        tuned.push(frequency_hz);
    }
    Ok(())
}

fn sink_from_config(cfg: &ScenarioConfig) -> Result<Box<dyn LogSink>, ConfigError> {
    let setup = &cfg.simlogsetup;
    let reader = ConfigReader::new("simlogsetup", &setup.extra);
    match setup.loghandler.as_str() {
        "console" => Ok(Box::new(ConsoleSink)),
        "jsonfile" => {
            let path = reader.req_str("path")?;
            let sink = JsonFileSink::create(std::path::Path::new(path)).map_err(|source| {
                ConfigError::Io {
                    path: path.to_string(),
                    source,
                }
            })?;
            Ok(Box::new(sink))
        }
        // The record handle is dropped; useful only when a test injects its
        // own MemorySink, but accepted so configs stay portable.
        "memory" => Ok(Box::new(MemorySink::new().0)),
        other => Err(ConfigError::UnknownLogHandler(other.to_string())),
    }
}

/// Epoch timestamps a scenario will realize; exposed for tests and tooling.
pub fn epoch_times(window: TimeWindow, delta: f64) -> impl Iterator<Item = SimTime> {
    (0..window.epoch_count(delta)).map(move |index| window.epoch_time(index, delta))
}
