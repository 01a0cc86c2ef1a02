//! Runtime infrastructure.
//!
//! - [`control`] — the thread-safe control plane into a running simulation
//! - [`tracing`] — engine diagnostics setup

pub mod control;
pub mod tracing;

pub use control::{CallTarget, ModelSelector, RuntimeCallError, RuntimeClient, RuntimeRequest};
pub use tracing::setup_tracing;
