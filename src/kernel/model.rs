//! The model contract and shared simulation context.
//!
//! A model is one unit of behavior resident on a node: an orbit propagator, a
//! battery, a radio, a MAC state machine. Models expose two surfaces:
//!
//! - [`Model::invoke`] — the dynamic named-operation surface used by sibling
//!   models, remote models (through the link fabric) and the runtime control
//!   plane;
//! - [`Model::advance`] — the per-epoch hook, driven by the owning node in
//!   dependency order.
//!
//! Models live in [`ModelCell`]s: the capability tag and class name are
//! readable without locking (sibling discovery, fabric port matching), the
//! mutable body sits behind a mutex so the control plane and, in parallel
//! mode, other topologies' workers can reach it safely.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use super::frame::NodeId;
use super::node::Node;
use super::time::SimTime;
use super::value::{Args, InvocationError, Value};
use crate::fov::PassCache;
use crate::geometry::GeometryOracle;
use crate::link::LinkFabric;
use crate::simlog::SimLogger;

/// Coarse capability label used by sibling models to discover each other
/// without naming concrete classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModelTag {
    Orbital,
    Power,
    Compute,
    Mac,
    Scheduler,
    DataStore,
    DataGenerator,
    ViewOfNode,
    BasicLoraRadio,
    ImagingRadio,
    Isl,
    Adacs,
    Imaging,
}

impl ModelTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTag::Orbital => "ORBITAL",
            ModelTag::Power => "POWER",
            ModelTag::Compute => "COMPUTE",
            ModelTag::Mac => "MAC",
            ModelTag::Scheduler => "SCHEDULER",
            ModelTag::DataStore => "DATASTORE",
            ModelTag::DataGenerator => "DATAGENERATOR",
            ModelTag::ViewOfNode => "VIEWOFNODE",
            ModelTag::BasicLoraRadio => "BASICLORARADIO",
            ModelTag::ImagingRadio => "IMAGINGRADIO",
            ModelTag::Isl => "ISL",
            ModelTag::Adacs => "ADACS",
            ModelTag::Imaging => "IMAGING",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "ORBITAL" => ModelTag::Orbital,
            "POWER" => ModelTag::Power,
            "COMPUTE" => ModelTag::Compute,
            "MAC" => ModelTag::Mac,
            "SCHEDULER" => ModelTag::Scheduler,
            "DATASTORE" => ModelTag::DataStore,
            "DATAGENERATOR" => ModelTag::DataGenerator,
            "VIEWOFNODE" => ModelTag::ViewOfNode,
            "BASICLORARADIO" => ModelTag::BasicLoraRadio,
            "IMAGINGRADIO" => ModelTag::ImagingRadio,
            "ISL" => ModelTag::Isl,
            "ADACS" => ModelTag::Adacs,
            "IMAGING" => ModelTag::Imaging,
            _ => return None,
        })
    }

    /// Tags the link fabric treats as radio ports.
    pub fn is_radio(&self) -> bool {
        matches!(
            self,
            ModelTag::BasicLoraRadio | ModelTag::ImagingRadio | ModelTag::Isl
        )
    }
}

impl std::fmt::Display for ModelTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of node behavior.
pub trait Model: Send {
    fn class_name(&self) -> &'static str;

    fn tag(&self) -> ModelTag;

    /// The sole interface exposed to sibling and remote models.
    fn invoke(&mut self, op: &str, args: &Args) -> Result<Value, InvocationError>;

    /// Per-epoch hook. May be a no-op for pure helper models.
    fn advance(&mut self, t: SimTime);

    /// Called once after all topologies are built, before the first epoch.
    /// Models that hold cross-node references (ISL peers) resolve them here,
    /// and radios register their port with the link fabric. `self_cell` is
    /// the shared cell this model lives in.
    fn wire(&mut self, _self_cell: &ModelRef) {}
}

/// A shareable cell holding one model. Tag and class are readable without
/// taking the body lock.
pub struct ModelCell {
    class_name: &'static str,
    tag: ModelTag,
    body: Mutex<Box<dyn Model>>,
}

/// Shared handle to a model cell.
pub type ModelRef = Arc<ModelCell>;

impl ModelCell {
    pub fn new(body: Box<dyn Model>) -> ModelRef {
        Arc::new(Self {
            class_name: body.class_name(),
            tag: body.tag(),
            body: Mutex::new(body),
        })
    }

    pub fn class_name(&self) -> &'static str {
        self.class_name
    }

    pub fn tag(&self) -> ModelTag {
        self.tag
    }

    pub fn invoke(&self, op: &str, args: &Args) -> Result<Value, InvocationError> {
        self.body.lock().invoke(op, args)
    }

    pub fn advance(&self, t: SimTime) {
        self.body.lock().advance(t);
    }

    pub fn wire(self: &Arc<Self>) {
        let cell = self.clone();
        self.body.lock().wire(&cell);
    }
}

impl std::fmt::Debug for ModelCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCell")
            .field("class", &self.class_name)
            .field("tag", &self.tag)
            .finish()
    }
}

/// How node advance is executed across topologies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecMode {
    /// One thread, declaration order, same-epoch delivery visible.
    #[default]
    Sequential,
    /// Per-topology workers; cross-node deliveries defer to the epoch-end
    /// barrier and become visible at the next epoch.
    Parallel,
}

/// Services shared by every model in a scenario.
///
/// Published once by the orchestrator; the node directory is written after
/// all topologies exist and read-only from then on.
pub struct SimContext {
    pub oracle: Arc<dyn GeometryOracle>,
    pub pass_cache: Arc<PassCache>,
    pub fabric: Arc<LinkFabric>,
    pub simlog: SimLogger,
    pub seed: u64,
    /// Scenario epoch length Δ, in seconds.
    pub delta: f64,
    pub mode: ExecMode,
    directory: parking_lot::RwLock<std::collections::HashMap<NodeId, Arc<Node>>>,
}

impl SimContext {
    pub fn new(
        oracle: Arc<dyn GeometryOracle>,
        pass_cache: Arc<PassCache>,
        fabric: Arc<LinkFabric>,
        simlog: SimLogger,
        seed: u64,
        delta: f64,
        mode: ExecMode,
    ) -> Arc<Self> {
        Arc::new(Self {
            oracle,
            pass_cache,
            fabric,
            simlog,
            seed,
            delta,
            mode,
            directory: parking_lot::RwLock::new(std::collections::HashMap::new()),
        })
    }

    /// Look up a node by scenario-wide id.
    pub fn node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.directory.read().get(&id).cloned()
    }

    /// All node ids of the given kinds, in ascending id order.
    pub fn nodes_of_kind(&self, kinds: &[super::node::NodeKind]) -> Vec<Arc<Node>> {
        let dir = self.directory.read();
        let mut nodes: Vec<_> = dir
            .values()
            .filter(|n| kinds.contains(&n.kind()))
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.id());
        nodes
    }

    /// Publishes the node directory. Called once by the orchestrator after
    /// every topology is built.
    pub(crate) fn publish_directory(&self, nodes: impl IntoIterator<Item = Arc<Node>>) {
        let mut dir = self.directory.write();
        for node in nodes {
            dir.insert(node.id(), node);
        }
    }

    /// A per-node RNG derived from the scenario seed, so sequential runs are
    /// reproducible and parallel runs are reproducible per node.
    pub fn rng_for(&self, node: NodeId) -> SmallRng {
        SmallRng::seed_from_u64(self.seed ^ (u64::from(node).wrapping_mul(0x9e37_79b9_7f4a_7c15)))
    }
}

/// Everything a model factory receives: the owner handle, the parsed
/// attribute bag, a node-scoped event logger, and the shared context.
pub struct ModelInit<'a> {
    pub owner: Weak<Node>,
    pub node_id: NodeId,
    pub node_kind: super::node::NodeKind,
    pub node_class: &'a str,
    pub cfg: crate::config::ConfigReader<'a>,
    pub log: crate::simlog::NodeLogger,
    pub ctx: Arc<SimContext>,
}
