//! Node & model kernel.
//!
//! The building blocks every other layer composes:
//!
//! - [`time`] — simulated time and epoch arithmetic
//! - [`value`] — the `invoke(op, args)` variant surface and its errors
//! - [`frame`] — wire frames and payload units
//! - [`model`] — the [`Model`] contract, shared cells, and the scenario-wide
//!   [`SimContext`]
//! - [`node`] — nodes, sibling discovery, and the per-epoch advance path

pub mod frame;
pub mod model;
pub mod node;
pub mod time;
pub mod value;

pub use frame::{DataKind, DataUnit, Frame, NodeId};
pub use model::{ExecMode, Model, ModelCell, ModelInit, ModelRef, ModelTag, SimContext};
pub use node::{Node, NodeKind};
pub use time::{SimTime, TimeWindow};
pub use value::{Args, Interval, InvocationError, Value};
