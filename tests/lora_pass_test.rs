//! Two-node LoRa scenario: a satellite overhead delivers queued frames to a
//! ground station during a real orbital pass, with pass events in the log.

mod common;

use serde_json::json;

use satlink::geometry::{GeometryOracle, KeplerOracle, Tle};
use satlink::kernel::{Args, DataKind, DataUnit, Frame, ModelTag, TimeWindow, Value};
use satlink::orchestrator::Orchestrator;
use satlink::registry::Registry;
use satlink::simlog::{EventKind, MemorySink};
use satlink::ScenarioConfig;

use common::{equator_origin, run_sequential, stamp, ISS_TLE_1, ISS_TLE_2};

#[test]
fn queued_frames_arrive_during_the_pass() {
    // Find a real pass over the equator so the scenario window brackets it.
    let tle = Tle::parse(ISS_TLE_1, ISS_TLE_2).expect("TLE parses");
    let oracle = KeplerOracle::new();
    let ground = equator_origin();
    let search = TimeWindow::new(tle.epoch, tle.epoch.offset(86400.0));
    let passes = oracle
        .passes(&tle, &ground, search, 10.0)
        .expect("pass scan succeeds");
    let pass = passes.first().expect("at least one pass per day");

    let start = pass.start.offset(-60.0);
    let end = pass.end.offset(60.0);

    let sat_id = 1u32;
    let gs_id = 2u32;
    let text = json!({
        "topologies": [{ "name": "lora", "id": 0, "nodes": [
            { "nodeid": sat_id, "type": "SAT", "iname": "SatelliteBasic", "loglevel": "all",
              "models": [
                { "iname": "ModelOrbit",
                  "tle_1": ISS_TLE_1, "tle_2": ISS_TLE_2, "one_full_update": true },
                { "iname": "ModelFovPassTable", "min_elevation_deg": 10.0 },
                { "iname": "ModelLoraRadio",
                  "frequency_hz": 868.0e6, "self_ctrl": true, "targets": ["GS"],
                  "tx_antenna_gain_db": 12.0, "rx_antenna_gain_db": 12.0 }
              ] },
            { "nodeid": gs_id, "type": "GS", "iname": "GroundStationBasic", "loglevel": "all",
              "latitude_deg": 0.0, "longitude_deg": 0.0, "elevation_m": 0.0,
              "models": [
                { "iname": "ModelFovPassTable", "min_elevation_deg": 10.0 },
                { "iname": "ModelLoraRadio",
                  "frequency_hz": 868.0e6,
                  "tx_antenna_gain_db": 12.0, "rx_antenna_gain_db": 12.0 }
              ] }
        ]}],
        "simtime": { "starttime": stamp(start), "endtime": stamp(end), "delta": 1.0 },
        "simlogsetup": { "loghandler": "memory" }
    })
    .to_string();
    let cfg = ScenarioConfig::from_json(&text).expect("scenario parses");

    let registry = Registry::with_builtins();
    let (sink, records) = MemorySink::new();
    let scenario = Orchestrator::new(&registry)
        .with_sink(Box::new(sink))
        .build(&cfg)
        .expect("orchestrates");

    // Queue five addressed frames before the pass opens; the self-controlled
    // radio holds them until the ground station is in view.
    let sat = scenario.node(sat_id).expect("sat exists");
    let radio = sat
        .model_by_tag(ModelTag::BasicLoraRadio)
        .expect("sat radio exists");
    for seq in 0..5u32 {
        let unit = DataUnit {
            id: DataUnit::unit_id(sat_id, seq),
            source: sat_id,
            kind: DataKind::Telemetry,
            size_bits: 1024,
            created_at: scenario.window.start,
        };
        let args = Args::new()
            .with(
                "frame",
                Value::Frame(Frame::Data { src: sat_id, dest: Some(gs_id), unit }),
            )
            .with("at", Value::Time(scenario.window.start));
        assert_eq!(radio.invoke("send_packet", &args).unwrap(), Value::Bool(true));
    }

    run_sequential(&scenario);

    // Every queued frame reached the ground radio's receive queue.
    let gs = scenario.node(gs_id).expect("gs exists");
    let gs_radio = gs
        .model_by_tag(ModelTag::BasicLoraRadio)
        .expect("gs radio exists");
    assert_eq!(
        gs_radio.invoke("rx_queue_size", &Args::new()).unwrap(),
        Value::Int(5)
    );

    drop(scenario); // closes the log pipeline
    let records = records.lock();
    let starts = records.iter().filter(|r| r.kind == EventKind::PassStart).count();
    let ends = records.iter().filter(|r| r.kind == EventKind::PassEnd).count();
    assert!(starts >= 1, "expected a pass-start event");
    assert!(ends >= 1, "expected a pass-end event");

    // Receptions happen only while the pass is open.
    let margin = 2.0;
    for record in records.iter().filter(|r| r.kind == EventKind::PacketRx) {
        assert!(
            record.t >= pass.start.offset(-margin) && record.t <= pass.end.offset(margin),
            "packet-rx at {} outside pass [{} .. {}]",
            record.t,
            pass.start,
            pass.end
        );
    }

    // The pass-table memo answered both nodes from the same shared table.
    let probe = Args::new()
        .with("targets", Value::Str("SAT".to_string()))
        .with("at", Value::Time(pass.start.offset(30.0)));
    let gs_fov = gs.model_by_tag(ModelTag::ViewOfNode).expect("gs fov");
    // Scenario already dropped its log, but models stay callable.
    assert_eq!(
        gs_fov.invoke("get_view", &probe).unwrap(),
        Value::Ids(vec![sat_id])
    );
}
