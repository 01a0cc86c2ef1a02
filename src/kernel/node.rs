//! Nodes: the owners of models.
//!
//! A node is a satellite, ground station, or IoT device. It holds its models
//! in dependency-topological order (established by the orchestrator) and
//! drives them once per epoch. Sibling models discover each other through
//! [`Node::model_by_tag`] / [`Node::model_by_class`].

use std::sync::{Arc, OnceLock};

use crate::geometry::{ground_to_eci, GroundLocation, Vec3};
use crate::simlog::SimLevel;

use super::frame::NodeId;
use super::model::{ModelRef, ModelTag};
use super::time::{SimTime, TimeWindow};
use super::value::{Args, Value};

/// Node kind, as named in scenario files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Sat,
    Gs,
    IotDevice,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Sat => "SAT",
            NodeKind::Gs => "GS",
            NodeKind::IotDevice => "IOTDEVICE",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "SAT" => NodeKind::Sat,
            "GS" => NodeKind::Gs,
            "IOTDEVICE" => NodeKind::IotDevice,
            _ => return None,
        })
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node and its resident models. Immutable after orchestration except for
/// the model bodies themselves.
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    class_name: String,
    window: TimeWindow,
    log_level: SimLevel,
    /// Ground nodes have a fixed geodetic location; satellites carry their
    /// state in the ORBITAL model instead.
    location: Option<GroundLocation>,
    models: OnceLock<Vec<ModelRef>>,
}

impl Node {
    pub fn new(
        id: NodeId,
        kind: NodeKind,
        class_name: String,
        window: TimeWindow,
        log_level: SimLevel,
        location: Option<GroundLocation>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind,
            class_name,
            window,
            log_level,
            location,
            models: OnceLock::new(),
        })
    }

    /// Installs the dependency-ordered model list. Orchestrator only; a
    /// second call is ignored.
    pub(crate) fn attach_models(&self, models: Vec<ModelRef>) {
        let _ = self.models.set(models);
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    pub fn log_level(&self) -> SimLevel {
        self.log_level
    }

    pub fn location(&self) -> Option<&GroundLocation> {
        self.location.as_ref()
    }

    pub fn models(&self) -> &[ModelRef] {
        self.models.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// First resident model carrying `tag`, in dependency order.
    pub fn model_by_tag(&self, tag: ModelTag) -> Option<ModelRef> {
        self.models().iter().find(|m| m.tag() == tag).cloned()
    }

    /// All resident models carrying `tag` (a node may own several radios).
    pub fn models_by_tag(&self, tag: ModelTag) -> Vec<ModelRef> {
        self.models()
            .iter()
            .filter(|m| m.tag() == tag)
            .cloned()
            .collect()
    }

    pub fn model_by_class(&self, class_name: &str) -> Option<ModelRef> {
        self.models()
            .iter()
            .find(|m| m.class_name() == class_name)
            .cloned()
    }

    /// Advances every resident model once, in dependency order.
    pub fn advance(&self, t: SimTime) {
        for model in self.models() {
            model.advance(t);
        }
    }

    /// Steps this node alone from its window start to its window end.
    /// Intended for isolated node stepping in tests.
    pub fn advance_to_end(&self, delta: f64) {
        let epochs = self.window.epoch_count(delta);
        for index in 0..epochs {
            self.advance(self.window.epoch_time(index, delta));
        }
    }

    /// Earth-centered-inertial position of this node at `t`, in meters:
    /// satellites answer through their ORBITAL model, ground nodes rotate
    /// their geodetic location into ECI. `None` when geometry is unavailable
    /// (no orbital model and no location, or propagation failed this epoch).
    pub fn position_eci(&self, t: SimTime) -> Option<Vec3> {
        if let Some(orbital) = self.model_by_tag(ModelTag::Orbital) {
            let args = Args::new().with("at", Value::Time(t));
            return match orbital.invoke("get_position", &args) {
                Ok(Value::Vec3(p)) => Some(p),
                _ => None,
            };
        }
        self.location.as_ref().map(|loc| ground_to_eci(loc, t))
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("class", &self.class_name)
            .field("models", &self.models().len())
            .finish()
    }
}
