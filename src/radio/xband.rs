//! X-band imaging radio class.
//!
//! High-rate downlinks for image data. Success is Eb/N0 margin at the
//! configured symbol rate; the receiver is channelized, so up to
//! `num_channels` co-channel deliveries may land per epoch and the rest
//! collide.

use crate::config::ConfigError;
use crate::kernel::{Args, Frame, InvocationError, Model, ModelInit, ModelTag, Value};

use super::{ebn0_db, LinkGeom, PhyDefaults, PhySetup, Radio, RadioClass, RadioCore};

const DEFAULTS: PhyDefaults = PhyDefaults {
    bandwidth_hz: 50e6,
    tx_power_dbm: 33.0,
    noise_figure_db: 3.0,
};

pub struct XbandClass {
    num_channels: u32,
    required_ebn0_db: f64,
}

impl XbandClass {
    pub fn build(init: ModelInit) -> Result<Box<dyn Model>, ConfigError> {
        let num_channels = u32::try_from(init.cfg.opt_u64("num_channels", 1)?).map_err(|_| {
            ConfigError::InvalidValue {
                class: init.cfg.class().to_string(),
                key: "num_channels".to_string(),
                expected: "a small positive integer",
            }
        })?;
        if num_channels == 0 {
            return Err(ConfigError::InvalidValue {
                class: init.cfg.class().to_string(),
                key: "num_channels".to_string(),
                expected: "a positive integer",
            });
        }
        let required_ebn0_db = init.cfg.opt_f64("required_ebn0_db", 9.6)?;
        let data_rate = init.cfg.opt_f64("data_rate_bps", 50e6)?;
        let core = RadioCore::from_init(&init, &DEFAULTS, data_rate)?;
        Ok(Box::new(Radio::new(
            core,
            XbandClass { num_channels, required_ebn0_db },
        )))
    }
}

impl RadioClass for XbandClass {
    const CLASS: &'static str = "ModelImagingRadio";

    fn tag(&self) -> ModelTag {
        ModelTag::ImagingRadio
    }

    fn compatible_tags(&self) -> &'static [ModelTag] {
        &[ModelTag::ImagingRadio]
    }

    fn link_verdict(
        &self,
        core: &RadioCore,
        rx: &PhySetup,
        geom: &LinkGeom,
        cochannel: usize,
    ) -> Result<f64, &'static str> {
        if cochannel >= self.num_channels as usize {
            return Err("collision");
        }
        let ebn0 = ebn0_db(&core.phy, rx, geom.distance_m, core.data_rate_bps);
        if ebn0 < self.required_ebn0_db {
            return Err("ebn0");
        }
        Ok(ebn0)
    }

    fn admit_extra(&self, core: &RadioCore, _frame: &Frame) -> Result<(), &'static str> {
        // One delivery per channel per epoch on the receive side.
        if core.rx_deliveries >= self.num_channels {
            return Err("channels-busy");
        }
        Ok(())
    }

    fn extra_op(
        &mut self,
        _core: &mut RadioCore,
        op: &str,
        _args: &Args,
    ) -> Option<Result<Value, InvocationError>> {
        match op {
            "get_num_channels" => Some(Ok(Value::Int(i64::from(self.num_channels)))),
            _ => None,
        }
    }
}
