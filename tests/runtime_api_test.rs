//! Runtime control plane against a live manager: calls from another task
//! are served at epoch boundaries, observe consistent model state, and can
//! terminate the run early.

mod common;

use serde_json::json;

use satlink::kernel::{Args, Value};
use satlink::manager::Manager;
use satlink::orchestrator::Orchestrator;
use satlink::registry::Registry;
use satlink::runtime::{CallTarget, RuntimeCallError};
use satlink::ScenarioConfig;

fn compute_scenario() -> ScenarioConfig {
    let text = json!({
        "topologies": [{ "name": "ground", "id": 0, "nodes": [{
            "nodeid": 1, "type": "GS", "iname": "GroundStationBasic", "loglevel": "info",
            "latitude_deg": 45.0, "longitude_deg": 7.0, "elevation_m": 300.0,
            "models": [ { "iname": "ModelCompute", "units_per_epoch": 1, "queue_size": 64 } ]
        }]}],
        "simtime": {
            // A window far longer than the test needs: the run is cut short
            // by terminate(), not by the clock.
            "starttime": "2021-03-01 00:00:00",
            "endtime": "2021-06-01 00:00:00",
            "delta": 1.0
        },
        "simlogsetup": { "loghandler": "memory" }
    })
    .to_string();
    ScenarioConfig::from_json(&text).expect("scenario parses")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn calls_are_served_between_epochs_and_termination_is_honored() {
    let registry = Registry::with_builtins();
    let scenario = Orchestrator::new(&registry)
        .build(&compute_scenario())
        .expect("orchestrates");
    let total_epochs = scenario.epoch_count();

    let (manager, client) = Manager::new(scenario);
    let running = manager.spawn();

    // Feed long-running tasks, then poll the queue size from this task while
    // the manager loops on its blocking thread.
    let target = || CallTarget::model_class(1, "ModelCompute");
    for _ in 0..10 {
        let added = client
            .call(
                target(),
                "add_task",
                Args::new().with("units", Value::Int(100_000)),
            )
            .await
            .expect("add_task succeeds");
        assert_eq!(added, Value::Bool(true));
    }

    let mut last_size = i64::MAX;
    for _ in 0..20 {
        let size = client
            .call(target(), "get_queue_size", Args::new())
            .await
            .expect("get_queue_size succeeds");
        match size {
            Value::Int(size) => {
                // With 100k units per task and one unit per epoch, the queue
                // can only shrink, and never below what we observed.
                assert!(size <= 10 && size >= 0, "queue size {size}");
                assert!(size <= last_size, "queue grew from {last_size} to {size}");
                last_size = size;
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    // Unknown targets fail structurally, not fatally.
    let missing = client
        .call(CallTarget::model_class(99, "ModelCompute"), "get_queue_size", Args::new())
        .await;
    assert!(matches!(missing, Err(RuntimeCallError::NoSuchNode(99))));

    client.terminate();
    let summary = running.join().await.expect("manager completes");
    assert!(
        summary.epochs_run < total_epochs,
        "termination should stop the run early ({} epochs)",
        summary.epochs_run
    );

    // After the run, the manager is gone and calls say so.
    let gone = client.call(target(), "get_queue_size", Args::new()).await;
    assert!(matches!(gone, Err(RuntimeCallError::ManagerGone)));
}
