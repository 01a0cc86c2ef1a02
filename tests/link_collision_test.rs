//! Imaging-link collisions: two satellites transmitting to one ground
//! station on the same X-band frequency, capped by the receiver's channel
//! count.

mod common;

use std::sync::Arc;

use serde_json::json;

use satlink::geometry::FixedOracle;
use satlink::kernel::{Args, DataKind, DataUnit, Frame, ModelTag, NodeId, SimTime, Value};
use satlink::orchestrator::{Orchestrator, Scenario};
use satlink::registry::Registry;
use satlink::simlog::{EventKind, LogRecord, MemorySink};
use satlink::ScenarioConfig;

use common::{equator_origin, overhead_position, ISS_TLE_1, ISS_TLE_2};

const XBAND_HZ: f64 = 8.2e9;

fn build(num_channels: u32) -> (Scenario, Arc<parking_lot::Mutex<Vec<LogRecord>>>) {
    let start = SimTime::parse("2021-03-01 00:00:00").expect("timestamp parses");
    let oracle = FixedOracle {
        position: overhead_position(&equator_origin(), start, 700_000.0),
        ..FixedOracle::default()
    };

    let sat_model = || {
        json!([
            { "iname": "ModelOrbit", "tle_1": ISS_TLE_1, "tle_2": ISS_TLE_2 },
            { "iname": "ModelFovSampled", "min_elevation_deg": 10.0 },
            { "iname": "ModelImagingRadio",
              "frequency_hz": XBAND_HZ, "data_rate_bps": 50.0e6,
              "num_channels": num_channels,
              "tx_antenna_gain_db": 30.0, "targets": ["GS"] }
        ])
    };
    let text = json!({
        "topologies": [{ "name": "imaging", "id": 0, "nodes": [
            { "nodeid": 1, "type": "SAT", "iname": "SatelliteBasic", "loglevel": "all",
              "models": sat_model() },
            { "nodeid": 2, "type": "SAT", "iname": "SatelliteBasic", "loglevel": "all",
              "models": sat_model() },
            { "nodeid": 3, "type": "GS", "iname": "GroundStationBasic", "loglevel": "all",
              "latitude_deg": 0.0, "longitude_deg": 0.0, "elevation_m": 0.0,
              "models": [
                { "iname": "ModelFovSampled", "min_elevation_deg": 10.0 },
                { "iname": "ModelImagingRadio",
                  "frequency_hz": XBAND_HZ, "data_rate_bps": 50.0e6,
                  "num_channels": num_channels,
                  "gain_to_temperature_db_k": 15.0 }
              ] }
        ]}],
        "simtime": {
            "starttime": "2021-03-01 00:00:00",
            "endtime": "2021-03-01 00:00:10",
            "delta": 1.0
        },
        "simlogsetup": { "loghandler": "memory" }
    })
    .to_string();
    let cfg = ScenarioConfig::from_json(&text).expect("scenario parses");

    let registry = Registry::with_builtins();
    let (sink, records) = MemorySink::new();
    let scenario = Orchestrator::new(&registry)
        .with_sink(Box::new(sink))
        .with_oracle(Arc::new(oracle))
        .build(&cfg)
        .expect("orchestrates");
    (scenario, records)
}

fn image_frame(src: NodeId, seq: u32) -> Frame {
    Frame::Data {
        src,
        dest: Some(3),
        unit: DataUnit {
            id: DataUnit::unit_id(src, seq),
            source: src,
            kind: DataKind::Image,
            size_bits: 1_000_000,
            created_at: SimTime::parse("2021-03-01 00:00:00").expect("parses"),
        },
    }
}

/// Transmit one frame from each satellite in the same epoch.
fn transmit_both(scenario: &Scenario) {
    let t = scenario.window.start;
    scenario.ctx.fabric.begin_epoch(t);
    for sat_id in [1u32, 2u32] {
        let sat = scenario.node(sat_id).expect("sat exists");
        let radio = sat
            .model_by_tag(ModelTag::ImagingRadio)
            .expect("imaging radio");
        let args = Args::new()
            .with("frame", Value::Frame(image_frame(sat_id, 0)))
            .with("at", Value::Time(t));
        radio.invoke("send_packet", &args).expect("send_packet works");
    }
}

fn gs_rx_count(scenario: &Scenario) -> i64 {
    let gs = scenario.node(3).expect("gs exists");
    let radio = gs.model_by_tag(ModelTag::ImagingRadio).expect("gs radio");
    match radio.invoke("rx_queue_size", &Args::new()).expect("op exists") {
        Value::Int(count) => count,
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn single_channel_takes_one_delivery_per_epoch() {
    let (scenario, records) = build(1);
    transmit_both(&scenario);
    assert_eq!(gs_rx_count(&scenario), 1);

    drop(scenario);
    let records = records.lock();
    let collision_drops = records
        .iter()
        .filter(|r| {
            r.kind == EventKind::PacketDrop
                && r.payload.get("reason").and_then(|v| v.as_str()) == Some("collision")
        })
        .count();
    assert!(collision_drops >= 1, "second transmission must collide");
}

#[test]
fn six_channels_carry_both_satellites() {
    let (scenario, _records) = build(6);
    transmit_both(&scenario);
    assert_eq!(gs_rx_count(&scenario), 2);
}
