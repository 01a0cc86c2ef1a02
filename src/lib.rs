//! # satlink
//!
//! An epoch-stepped simulator for space/ground networks: constellations of
//! satellites, ground stations, and IoT devices exchanging packets over
//! modeled radio links while consuming energy, capturing imagery, and
//! relaying data. Built for evaluating networking, scheduling, and
//! onboard-compute strategies over physically plausible orbital geometry and
//! link budgets.
//!
//! ## Module Tour
//!
//! The crate is organized in dependency order, leaves first:
//!
//! ### 1. The Kernel ([`kernel`])
//! Simulated time, the `invoke(op, args)` variant surface, wire frames, the
//! [`Model`](kernel::Model) contract, and [`Node`](kernel::Node)s that drive
//! their resident models in dependency order each epoch.
//!
//! ### 2. Geometry ([`geometry`])
//! The astrodynamics oracle behind a narrow trait: TLE parsing, a
//! deterministic Kepler propagator, sun illumination, and pass windows.
//! Models treat it as an external collaborator.
//!
//! ### 3. Composition ([`registry`], [`config`], [`orchestrator`])
//! Scenario files resolve through the capability registry into a wired node
//! graph: owner filters, CNF dependency checks, stable topological model
//! ordering, and cross-node wiring, all before the first epoch.
//!
//! ### 4. The Link Layer ([`fov`], [`link`], [`radio`])
//! Geometry-gated visibility (sampled or memoized pass tables), the link
//! fabric's per-packet delivery attempts, and the radio substrate with
//! per-technology success predicates (LoRa, X-band, ISL).
//!
//! ### 5. Behavior Models ([`datastore`], [`mac`], [`power`], [`compute`], [`imaging`], [`orbit`])
//! The pluggable units a node composes: bounded data queues and Poisson
//! generators, the TT&C/ground/IoT MAC state machines, joule accounting,
//! onboard compute, and the imaging chain.
//!
//! ### 6. Execution ([`manager`], [`runtime`], [`simlog`])
//! The fixed-step scheduler, the thread-safe runtime control plane drained
//! at epoch boundaries, and the best-effort simulation event log.
//!
//! ## Quick Start
//!
//! ```no_run
//! use satlink::config::ScenarioConfig;
//! use satlink::manager::Manager;
//! use satlink::orchestrator::Orchestrator;
//! use satlink::registry::Registry;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = ScenarioConfig::from_file(std::path::Path::new("scenario.json"))?;
//! let registry = Registry::with_builtins();
//! let scenario = Orchestrator::new(&registry).build(&cfg)?;
//! let (manager, _client) = Manager::new(scenario);
//! let summary = manager.run()?;
//! println!("ran {} epochs", summary.epochs_run);
//! # Ok(())
//! # }
//! ```

pub mod compute;
pub mod config;
pub mod datastore;
pub mod fov;
pub mod geometry;
pub mod imaging;
pub mod kernel;
pub mod link;
pub mod mac;
pub mod manager;
pub mod orbit;
pub mod orchestrator;
pub mod power;
pub mod radio;
pub mod registry;
pub mod runtime;
pub mod simlog;

pub use config::{ConfigError, ScenarioConfig};
pub use kernel::{Args, ExecMode, Model, ModelTag, NodeKind, SimTime, TimeWindow, Value};
pub use manager::{FatalRuntimeError, Manager, RunSummary, RunningSimulation};
pub use orchestrator::{OrchestrationError, Orchestrator, Scenario};
pub use registry::Registry;
pub use runtime::{CallTarget, ModelSelector, RuntimeCallError, RuntimeClient};
