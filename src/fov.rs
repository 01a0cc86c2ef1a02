//! Field-of-view layer.
//!
//! Two interchangeable strategies share the `VIEWOFNODE` capability:
//!
//! - [`FovSampled`] — computes elevation from the owner to every candidate at
//!   each query. O(epochs x candidates), no precomputation.
//! - [`FovPassTable`] — computes all pass intervals once per (satellite,
//!   ground) pair, memoizes them in the process-wide [`PassCache`], and
//!   answers queries by binary search. The memo is shared cross-node: a
//!   ground station and the satellite it views consult the same table.
//!
//! Both expose `get_view(targets, at?) -> [node_id]` and emit
//! `pass-start`/`pass-end` events when a tracked peer's visibility flips.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::json;

use crate::config::ConfigError;
use crate::geometry::{elevation_deg, los_clear};
use crate::kernel::{
    Args, Interval, InvocationError, Model, ModelInit, ModelTag, Node, NodeId, NodeKind,
    SimContext, SimTime, Value,
};
use crate::simlog::{EventKind, NodeLogger};

/// Default minimum elevation for ground visibility, degrees.
const DEFAULT_MIN_ELEVATION_DEG: f64 = 10.0;

// ---------------------------------------------------------------------------
// Pass cache
// ---------------------------------------------------------------------------

/// Memo key: the pair plus the elevation mask the table was computed for
/// (millidegrees, to keep the key hashable).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct PassKey {
    sat: NodeId,
    ground: NodeId,
    min_elevation_mdeg: i64,
}

/// Process-wide pass-table memo: many readers, one-time writer per key.
/// Tables are published once and shared for the remainder of the run; tests
/// inject a fresh cache per scenario.
#[derive(Default)]
pub struct PassCache {
    tables: RwLock<HashMap<PassKey, Arc<Vec<Interval>>>>,
}

impl PassCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoized table, computing and publishing it on first use.
    /// A failed computation (geometry error) is not cached, so a later query
    /// may retry.
    fn get_or_compute(
        &self,
        key: PassKey,
        compute: impl FnOnce() -> Option<Vec<Interval>>,
    ) -> Option<Arc<Vec<Interval>>> {
        if let Some(table) = self.tables.read().get(&key) {
            return Some(table.clone());
        }
        let table = Arc::new(compute()?);
        let mut tables = self.tables.write();
        // Another consumer may have published while we computed; first
        // publication wins so all consumers share one table.
        Some(tables.entry(key).or_insert(table).clone())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.tables.read().len()
    }
}

/// Binary search for `t` in a sorted, disjoint interval list.
fn interval_contains(table: &[Interval], t: SimTime) -> bool {
    let idx = table.partition_point(|p| p.start <= t);
    idx > 0 && table[idx - 1].end >= t
}

// ---------------------------------------------------------------------------
// Shared strategy plumbing
// ---------------------------------------------------------------------------

/// Which side of the link the owner looks from, when its kind alone is
/// ambiguous.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ViewDirection {
    FromSpace,
    FromGround,
}

fn parse_targets(op: &str, args: &Args) -> Result<Vec<NodeKind>, InvocationError> {
    let parse_one = |text: &str| {
        NodeKind::parse(text).ok_or_else(|| InvocationError::PreconditionFailed {
            op: op.to_string(),
            reason: format!("unknown node kind `{text}`"),
        })
    };
    match args.get("targets") {
        Some(Value::Str(text)) => Ok(vec![parse_one(text)?]),
        Some(Value::List(items)) => items
            .iter()
            .map(|v| match v {
                Value::Str(text) => parse_one(text),
                _ => Err(InvocationError::InvalidArgument {
                    op: op.to_string(),
                    key: "targets",
                    expected: "kind names",
                    got: "list",
                }),
            })
            .collect(),
        Some(_) => Err(InvocationError::InvalidArgument {
            op: op.to_string(),
            key: "targets",
            expected: "str or list of str",
            got: "other",
        }),
        None => Err(InvocationError::MissingArgument {
            op: op.to_string(),
            key: "targets",
        }),
    }
}

fn parse_direction(op: &str, args: &Args) -> Result<Option<ViewDirection>, InvocationError> {
    match args.opt_str(op, "direction")? {
        None => Ok(None),
        Some("space") => Ok(Some(ViewDirection::FromSpace)),
        Some("ground") => Ok(Some(ViewDirection::FromGround)),
        Some(other) => Err(InvocationError::PreconditionFailed {
            op: op.to_string(),
            reason: format!("direction must be `space` or `ground`, got `{other}`"),
        }),
    }
}

/// Elevation-threshold visibility between a satellite/ground pair, or
/// line-of-sight for two satellites. `None` when geometry is unavailable
/// this epoch (the caller treats that as not visible).
fn geometric_visibility(
    owner: &Node,
    target: &Node,
    t: SimTime,
    min_elevation_deg: f64,
) -> Option<bool> {
    let owner_is_sat = owner.kind() == NodeKind::Sat;
    let target_is_sat = target.kind() == NodeKind::Sat;
    match (owner_is_sat, target_is_sat) {
        (true, true) => {
            let a = owner.position_eci(t)?;
            let b = target.position_eci(t)?;
            Some(los_clear(a, b))
        }
        (true, false) => {
            let sat = owner.position_eci(t)?;
            let ground = target.location()?;
            Some(elevation_deg(sat, ground, t) >= min_elevation_deg)
        }
        (false, true) => {
            let sat = target.position_eci(t)?;
            let ground = owner.location()?;
            Some(elevation_deg(sat, ground, t) >= min_elevation_deg)
        }
        // Two ground nodes never see each other over these links.
        (false, false) => Some(false),
    }
}

/// Tracks per-peer visibility and emits pass-start/pass-end transitions.
struct PassEvents {
    seen: HashMap<NodeId, bool>,
}

impl PassEvents {
    fn new() -> Self {
        Self { seen: HashMap::new() }
    }

    fn observe(&mut self, log: &NodeLogger, t: SimTime, peer: NodeId, visible: bool) {
        let was = self.seen.insert(peer, visible).unwrap_or(false);
        if visible != was {
            let kind = if visible { EventKind::PassStart } else { EventKind::PassEnd };
            log.info(t, kind, json!({ "peer": peer }));
        }
    }
}

/// Peers whose passes a strategy tracks each epoch: the opposite segment.
fn tracked_kinds(owner_kind: NodeKind) -> &'static [NodeKind] {
    match owner_kind {
        NodeKind::Sat => &[NodeKind::Gs],
        NodeKind::Gs | NodeKind::IotDevice => &[NodeKind::Sat],
    }
}

// ---------------------------------------------------------------------------
// Elevation-sampled strategy
// ---------------------------------------------------------------------------

/// Samples elevation against every candidate at query time.
pub struct FovSampled {
    owner: Weak<Node>,
    ctx: Arc<SimContext>,
    log: NodeLogger,
    min_elevation_deg: f64,
    now: Option<SimTime>,
    events: PassEvents,
}

impl FovSampled {
    pub const CLASS: &'static str = "ModelFovSampled";

    pub fn build(init: ModelInit) -> Result<Box<dyn Model>, ConfigError> {
        Ok(Box::new(Self {
            owner: init.owner,
            ctx: init.ctx,
            log: init.log,
            min_elevation_deg: init
                .cfg
                .opt_f64("min_elevation_deg", DEFAULT_MIN_ELEVATION_DEG)?,
            now: None,
            events: PassEvents::new(),
        }))
    }

    fn view(&self, owner: &Node, kinds: &[NodeKind], t: SimTime) -> Vec<NodeId> {
        self.ctx
            .nodes_of_kind(kinds)
            .into_iter()
            .filter(|candidate| candidate.id() != owner.id())
            .filter(|candidate| {
                geometric_visibility(owner, candidate, t, self.min_elevation_deg)
                    .unwrap_or(false)
            })
            .map(|candidate| candidate.id())
            .collect()
    }
}

impl Model for FovSampled {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    fn tag(&self) -> ModelTag {
        ModelTag::ViewOfNode
    }

    fn invoke(&mut self, op: &str, args: &Args) -> Result<Value, InvocationError> {
        match op {
            "get_view" => {
                let owner = self.owner.upgrade().ok_or_else(|| {
                    InvocationError::PreconditionFailed {
                        op: op.to_string(),
                        reason: "owner node is gone".into(),
                    }
                })?;
                let kinds = parse_targets(op, args)?;
                // The direction flag narrows an ambiguous owner; with a
                // concrete node kind it is informational only.
                let _ = parse_direction(op, args)?;
                let t = args
                    .opt_time(op, "at")?
                    .or(self.now)
                    .unwrap_or(owner.window().start);
                Ok(Value::Ids(self.view(&owner, &kinds, t)))
            }
            "get_min_elevation" => Ok(Value::Float(self.min_elevation_deg)),
            _ => Err(InvocationError::UnknownOperation {
                class: Self::CLASS,
                op: op.to_string(),
            }),
        }
    }

    fn advance(&mut self, t: SimTime) {
        self.now = Some(t);
        let Some(owner) = self.owner.upgrade() else { return };
        for peer in self.ctx.nodes_of_kind(tracked_kinds(owner.kind())) {
            if peer.id() == owner.id() {
                continue;
            }
            let visible = geometric_visibility(&owner, &peer, t, self.min_elevation_deg)
                .unwrap_or(false);
            self.events.observe(&self.log, t, peer.id(), visible);
        }
    }
}

// ---------------------------------------------------------------------------
// Pass-table strategy
// ---------------------------------------------------------------------------

/// Answers ground visibility from memoized pass tables; satellite pairs fall
/// back to line-of-sight sampling (the tables only cover ground passes).
pub struct FovPassTable {
    owner: Weak<Node>,
    ctx: Arc<SimContext>,
    log: NodeLogger,
    min_elevation_deg: f64,
    now: Option<SimTime>,
    events: PassEvents,
}

impl FovPassTable {
    pub const CLASS: &'static str = "ModelFovPassTable";

    pub fn build(init: ModelInit) -> Result<Box<dyn Model>, ConfigError> {
        Ok(Box::new(Self {
            owner: init.owner,
            ctx: init.ctx,
            log: init.log,
            min_elevation_deg: init
                .cfg
                .opt_f64("min_elevation_deg", DEFAULT_MIN_ELEVATION_DEG)?,
            now: None,
            events: PassEvents::new(),
        }))
    }

    /// The memoized pass table for a satellite/ground pair, computed through
    /// the satellite's ORBITAL model on first use.
    fn table(&self, sat: &Node, ground: &Node) -> Option<Arc<Vec<Interval>>> {
        let key = PassKey {
            sat: sat.id(),
            ground: ground.id(),
            min_elevation_mdeg: (self.min_elevation_deg * 1000.0).round() as i64,
        };
        self.ctx.pass_cache.get_or_compute(key, || {
            let orbital = sat.model_by_tag(ModelTag::Orbital)?;
            let location = ground.location()?;
            let window = sat.window();
            let args = Args::new()
                .with("latitude_deg", Value::Float(location.latitude_deg))
                .with("longitude_deg", Value::Float(location.longitude_deg))
                .with("elevation_m", Value::Float(location.elevation_m))
                .with("start", Value::Time(window.start))
                .with("end", Value::Time(window.end))
                .with("min_elevation_deg", Value::Float(self.min_elevation_deg));
            match orbital.invoke("get_passes", &args) {
                Ok(Value::Intervals(table)) => Some(table),
                _ => None,
            }
        })
    }

    fn pair_visible(&self, owner: &Node, target: &Node, t: SimTime) -> bool {
        let owner_is_sat = owner.kind() == NodeKind::Sat;
        let target_is_sat = target.kind() == NodeKind::Sat;
        match (owner_is_sat, target_is_sat) {
            (true, true) | (false, false) => {
                geometric_visibility(owner, target, t, self.min_elevation_deg).unwrap_or(false)
            }
            (true, false) => self
                .table(owner, target)
                .map(|table| interval_contains(&table, t))
                .unwrap_or(false),
            (false, true) => self
                .table(target, owner)
                .map(|table| interval_contains(&table, t))
                .unwrap_or(false),
        }
    }

    fn view(&self, owner: &Node, kinds: &[NodeKind], t: SimTime) -> Vec<NodeId> {
        self.ctx
            .nodes_of_kind(kinds)
            .into_iter()
            .filter(|candidate| candidate.id() != owner.id())
            .filter(|candidate| self.pair_visible(owner, candidate, t))
            .map(|candidate| candidate.id())
            .collect()
    }
}

impl Model for FovPassTable {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    fn tag(&self) -> ModelTag {
        ModelTag::ViewOfNode
    }

    fn invoke(&mut self, op: &str, args: &Args) -> Result<Value, InvocationError> {
        match op {
            "get_view" => {
                let owner = self.owner.upgrade().ok_or_else(|| {
                    InvocationError::PreconditionFailed {
                        op: op.to_string(),
                        reason: "owner node is gone".into(),
                    }
                })?;
                let kinds = parse_targets(op, args)?;
                let _ = parse_direction(op, args)?;
                let t = args
                    .opt_time(op, "at")?
                    .or(self.now)
                    .unwrap_or(owner.window().start);
                Ok(Value::Ids(self.view(&owner, &kinds, t)))
            }
            "get_min_elevation" => Ok(Value::Float(self.min_elevation_deg)),
            _ => Err(InvocationError::UnknownOperation {
                class: Self::CLASS,
                op: op.to_string(),
            }),
        }
    }

    fn advance(&mut self, t: SimTime) {
        self.now = Some(t);
        let Some(owner) = self.owner.upgrade() else { return };
        for peer in self.ctx.nodes_of_kind(tracked_kinds(owner.kind())) {
            if peer.id() == owner.id() {
                continue;
            }
            let visible = self.pair_visible(&owner, &peer, t);
            self.events.observe(&self.log, t, peer.id(), visible);
        }
    }
}
