//! Inter-satellite link class.
//!
//! Point-to-point links between explicitly configured satellites. Candidates
//! come from the declared peer list — no FoV gating — and success is range
//! plus Earth occlusion.

use crate::config::ConfigError;
use crate::geometry::los_clear;
use crate::kernel::{Args, InvocationError, Model, ModelInit, ModelTag, NodeId, SimTime, Value};

use super::{snr_db, LinkGeom, PhyDefaults, PhySetup, Radio, RadioClass, RadioCore};

const DEFAULTS: PhyDefaults = PhyDefaults {
    bandwidth_hz: 1e6,
    tx_power_dbm: 30.0,
    noise_figure_db: 4.0,
};

pub struct IslClass {
    peer_ids: Vec<NodeId>,
    max_range_m: f64,
}

impl IslClass {
    pub fn build(init: ModelInit) -> Result<Box<dyn Model>, ConfigError> {
        let peer_ids = init.cfg.opt_id_list("peers")?;
        if peer_ids.is_empty() {
            return Err(ConfigError::MissingKey {
                class: init.cfg.class().to_string(),
                key: "peers".to_string(),
            });
        }
        let max_range_m = init.cfg.opt_f64("max_range_m", 6_000_000.0)?;
        let data_rate = init.cfg.opt_f64("data_rate_bps", 10e6)?;
        let core = RadioCore::from_init(&init, &DEFAULTS, data_rate)?;
        Ok(Box::new(Radio::new(core, IslClass { peer_ids, max_range_m })))
    }
}

impl RadioClass for IslClass {
    const CLASS: &'static str = "ModelIslRadio";

    fn tag(&self) -> ModelTag {
        ModelTag::Isl
    }

    fn compatible_tags(&self) -> &'static [ModelTag] {
        &[ModelTag::Isl]
    }

    /// Declared peers, not FoV. Peers that do not resolve in the node
    /// directory are silently absent from the candidate set.
    fn candidates(&self, core: &RadioCore, _t: SimTime) -> Vec<NodeId> {
        self.peer_ids
            .iter()
            .copied()
            .filter(|id| core.ctx().node(*id).is_some())
            .collect()
    }

    fn link_verdict(
        &self,
        core: &RadioCore,
        rx: &PhySetup,
        geom: &LinkGeom,
        _cochannel: usize,
    ) -> Result<f64, &'static str> {
        if !los_clear(geom.tx_eci, geom.rx_eci) {
            return Err("occluded");
        }
        if geom.distance_m > self.max_range_m {
            return Err("range");
        }
        Ok(snr_db(&core.phy, rx, geom.distance_m))
    }

    fn wire_extra(&mut self, core: &RadioCore) {
        for peer in &self.peer_ids {
            if core.ctx().node(*peer).is_none() {
                tracing::warn!(node = core.node_id(), peer = *peer, "ISL peer id does not resolve");
            }
        }
    }

    fn extra_op(
        &mut self,
        _core: &mut RadioCore,
        op: &str,
        _args: &Args,
    ) -> Option<Result<Value, InvocationError>> {
        match op {
            "get_peers" => Some(Ok(Value::Ids(self.peer_ids.clone()))),
            _ => None,
        }
    }
}
