//! LoRa radio class.
//!
//! Control/uplink links for TT&C and IoT traffic. Success is carrier SNR
//! against the spreading factor's demodulation floor; any other co-channel
//! transmission in the same epoch is a collision.

use crate::config::ConfigError;
use crate::kernel::{Args, InvocationError, Model, ModelInit, ModelTag, Value};

use super::{snr_db, LinkGeom, PhyDefaults, PhySetup, Radio, RadioClass, RadioCore};

const DEFAULTS: PhyDefaults = PhyDefaults {
    bandwidth_hz: 125e3,
    tx_power_dbm: 14.0,
    noise_figure_db: 6.0,
};

/// Demodulation floor per spreading factor, dB SNR.
fn sf_snr_floor_db(sf: u8) -> f64 {
    match sf {
        7 => -7.5,
        8 => -10.0,
        9 => -12.5,
        10 => -15.0,
        11 => -17.5,
        _ => -20.0, // SF12
    }
}

/// LoRa useful bitrate for SF/bandwidth/coding rate.
fn lora_bitrate_bps(sf: u8, bandwidth_hz: f64, coding_rate: f64) -> f64 {
    f64::from(sf) * bandwidth_hz / 2f64.powi(i32::from(sf)) * coding_rate
}

pub struct LoraClass {
    spreading_factor: u8,
}

impl LoraClass {
    pub fn build(init: ModelInit) -> Result<Box<dyn Model>, ConfigError> {
        let sf = init.cfg.opt_u64("spreading_factor", 7)?;
        if !(7..=12).contains(&sf) {
            return Err(ConfigError::InvalidValue {
                class: init.cfg.class().to_string(),
                key: "spreading_factor".to_string(),
                expected: "an integer in 7..=12",
            });
        }
        let spreading_factor = sf as u8;
        let coding_rate = init.cfg.opt_f64("coding_rate", 0.8)?;
        let bandwidth_hz = init.cfg.opt_f64("bandwidth_hz", DEFAULTS.bandwidth_hz)?;
        let data_rate = lora_bitrate_bps(spreading_factor, bandwidth_hz, coding_rate);
        let core = RadioCore::from_init(&init, &DEFAULTS, data_rate)?;
        Ok(Box::new(Radio::new(core, LoraClass { spreading_factor })))
    }
}

impl RadioClass for LoraClass {
    const CLASS: &'static str = "ModelLoraRadio";

    fn tag(&self) -> ModelTag {
        ModelTag::BasicLoraRadio
    }

    fn compatible_tags(&self) -> &'static [ModelTag] {
        &[ModelTag::BasicLoraRadio]
    }

    fn link_verdict(
        &self,
        core: &RadioCore,
        rx: &PhySetup,
        geom: &LinkGeom,
        cochannel: usize,
    ) -> Result<f64, &'static str> {
        if cochannel > 0 {
            return Err("collision");
        }
        let snr = snr_db(&core.phy, rx, geom.distance_m);
        if snr < sf_snr_floor_db(self.spreading_factor) {
            return Err("snr");
        }
        Ok(snr)
    }

    fn extra_op(
        &mut self,
        _core: &mut RadioCore,
        op: &str,
        _args: &Args,
    ) -> Option<Result<Value, InvocationError>> {
        match op {
            "get_spreading_factor" => Some(Ok(Value::Int(i64::from(self.spreading_factor)))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_spreading_factor_demodulates_deeper() {
        assert!(sf_snr_floor_db(12) < sf_snr_floor_db(7));
        assert_eq!(sf_snr_floor_db(7), -7.5);
        assert_eq!(sf_snr_floor_db(12), -20.0);
    }

    #[test]
    fn bitrate_drops_with_spreading_factor() {
        let sf7 = lora_bitrate_bps(7, 125e3, 0.8);
        let sf12 = lora_bitrate_bps(12, 125e3, 0.8);
        assert!((sf7 - 5468.75).abs() < 1.0);
        assert!(sf12 < sf7 / 10.0);
    }
}
