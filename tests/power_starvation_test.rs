//! Power starvation: a transmitter a few joules above the battery floor
//! stops radiating, `has_energy("TXRADIO")` reports the denial, and solar
//! generation lifts the node back into service.

mod common;

use std::sync::Arc;

use serde_json::json;

use satlink::geometry::FixedOracle;
use satlink::kernel::{Args, DataKind, DataUnit, Frame, ModelTag, SimTime, Value};
use satlink::orchestrator::{Orchestrator, Scenario};
use satlink::registry::Registry;
use satlink::simlog::{EventKind, LogRecord, MemorySink};
use satlink::ScenarioConfig;

use common::{equator_origin, overhead_position, run_sequential, ISS_TLE_1, ISS_TLE_2};

/// SF7 at 125 kHz carries 5468.75 bps; this payload makes one frame cost
/// almost exactly one second of airtime, i.e. 10 J at 10 W.
const PAYLOAD_BITS: u64 = 5213;

fn build(solar_panel_w: f64) -> (Scenario, Arc<parking_lot::Mutex<Vec<LogRecord>>>) {
    let start = SimTime::parse("2021-03-01 00:00:00").expect("timestamp parses");
    let oracle = FixedOracle {
        position: overhead_position(&equator_origin(), start, 550_000.0),
        sunlit: true,
        ..FixedOracle::default()
    };

    let text = json!({
        "topologies": [{ "name": "starved", "id": 0, "nodes": [
            { "nodeid": 1, "type": "SAT", "iname": "SatelliteBasic", "loglevel": "all",
              "models": [
                { "iname": "ModelOrbit", "tle_1": ISS_TLE_1, "tle_2": ISS_TLE_2 },
                { "iname": "ModelFovSampled", "min_elevation_deg": 10.0 },
                { "iname": "ModelPower",
                  "min_capacity_j": 100.0, "max_capacity_j": 1000.0,
                  "initial_capacity_j": 105.0,
                  "solar_panel_w": solar_panel_w, "efficiency": 0.5,
                  "rates_w": { "TXRADIO": 10.0 } },
                { "iname": "ModelLoraRadio",
                  "frequency_hz": 868.0e6, "self_ctrl": true, "targets": ["GS"],
                  "tx_power_dbm": 40.0,
                  "tx_antenna_gain_db": 12.0, "rx_antenna_gain_db": 12.0 }
              ] },
            { "nodeid": 2, "type": "GS", "iname": "GroundStationBasic", "loglevel": "all",
              "latitude_deg": 0.0, "longitude_deg": 0.0, "elevation_m": 0.0,
              "models": [
                { "iname": "ModelFovSampled", "min_elevation_deg": 10.0 },
                { "iname": "ModelLoraRadio", "frequency_hz": 868.0e6,
                  "tx_antenna_gain_db": 12.0, "rx_antenna_gain_db": 12.0 }
              ] }
        ]}],
        "simtime": {
            "starttime": "2021-03-01 00:00:00",
            "endtime": "2021-03-01 00:00:30",
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

fn queue_frames(scenario: &Scenario, count: u32) {
    let sat = scenario.node(1).expect("sat exists");
    let radio = sat.model_by_tag(ModelTag::BasicLoraRadio).expect("sat radio");
    for seq in 0..count {
        let unit = DataUnit {
            id: DataUnit::unit_id(1, seq),
            source: 1,
            kind: DataKind::Telemetry,
            size_bits: PAYLOAD_BITS,
            created_at: scenario.window.start,
        };
        let args = Args::new()
            .with("frame", Value::Frame(Frame::Data { src: 1, dest: Some(2), unit }))
            .with("at", Value::Time(scenario.window.start));
        radio.invoke("send_packet", &args).expect("enqueue works");
    }
}

fn gs_rx_count(scenario: &Scenario) -> i64 {
    let gs = scenario.node(2).expect("gs exists");
    let radio = gs.model_by_tag(ModelTag::BasicLoraRadio).expect("gs radio");
    match radio.invoke("rx_queue_size", &Args::new()).expect("op exists") {
        Value::Int(count) => count,
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn starved_transmitter_drops_and_reports_no_energy() {
    let (scenario, records) = build(0.0);
    queue_frames(&scenario, 3);
    run_sequential(&scenario);

    // Nothing left the radio: a frame costs 10 J and only 5 J sit above the
    // battery floor.
    assert_eq!(gs_rx_count(&scenario), 0);

    let sat = scenario.node(1).expect("sat exists");
    let power = sat.model_by_tag(ModelTag::Power).expect("power model");
    let probe = Args::new().with("tag", Value::Str("TXRADIO".into()));
    assert_eq!(power.invoke("has_energy", &probe).unwrap(), Value::Bool(false));

    drop(scenario);
    let records = records.lock();
    let power_drops = records
        .iter()
        .filter(|r| {
            r.kind == EventKind::PacketDrop
                && r.payload.get("reason").and_then(|v| v.as_str()) == Some("power")
        })
        .count();
    assert!(power_drops >= 1, "expected power-denied drops in the log");
}

#[test]
fn sunlight_generation_lifts_the_battery_back_into_service() {
    // 100 W panel at 0.5 efficiency: +50 J on the first epoch, well above
    // the 10 J per frame.
    let (scenario, _records) = build(100.0);
    queue_frames(&scenario, 3);
    run_sequential(&scenario);

    assert_eq!(gs_rx_count(&scenario), 3);

    let sat = scenario.node(1).expect("sat exists");
    let power = sat.model_by_tag(ModelTag::Power).expect("power model");
    let probe = Args::new().with("tag", Value::Str("TXRADIO".into()));
    assert_eq!(power.invoke("has_energy", &probe).unwrap(), Value::Bool(true));
}
