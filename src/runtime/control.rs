//! Runtime control plane.
//!
//! [`RuntimeClient`] is the thread-safe entry point outside callers use to
//! reach into a running simulation. Calls are queued on a multi-producer
//! channel, drained by the manager at epoch boundaries — never interleaved
//! with model advance — and answered through one-shot completion handles. An
//! abandoned caller simply drops its handle and the result is discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::kernel::{Args, InvocationError, ModelTag, NodeId, Value};

/// Which model a call addresses.
#[derive(Clone, Debug)]
pub enum ModelSelector {
    Tag(ModelTag),
    Class(String),
}

impl std::fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelSelector::Tag(tag) => write!(f, "tag {tag}"),
            ModelSelector::Class(name) => write!(f, "class {name}"),
        }
    }
}

/// A (topology, node, model) address.
#[derive(Clone, Debug)]
pub struct CallTarget {
    /// When set, the node must belong to this topology.
    pub topology: Option<u32>,
    pub node: NodeId,
    pub model: ModelSelector,
}

impl CallTarget {
    pub fn model_tag(node: NodeId, tag: ModelTag) -> Self {
        Self {
            topology: None,
            node,
            model: ModelSelector::Tag(tag),
        }
    }

    pub fn model_class(node: NodeId, class: impl Into<String>) -> Self {
        Self {
            topology: None,
            node,
            model: ModelSelector::Class(class.into()),
        }
    }
}

/// Failures of the control plane itself. Model-level failures come back as
/// [`InvocationError`]s.
#[derive(Debug, Error)]
pub enum RuntimeCallError {
    #[error("the simulation has ended")]
    ManagerGone,

    #[error("no node with id {0}")]
    NoSuchNode(NodeId),

    #[error("node {node} has no model matching {selector}")]
    NoSuchModel { node: NodeId, selector: String },

    #[error(transparent)]
    Invocation(#[from] InvocationError),
}

/// One queued call, drained by the manager between epochs.
pub struct RuntimeRequest {
    pub target: CallTarget,
    pub op: String,
    pub args: Args,
    pub respond_to: oneshot::Sender<Result<Value, RuntimeCallError>>,
}

/// Cheap cloneable handle for outside callers.
#[derive(Clone)]
pub struct RuntimeClient {
    tx: mpsc::UnboundedSender<RuntimeRequest>,
    terminate: Arc<AtomicBool>,
}

impl RuntimeClient {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<RuntimeRequest>,
        terminate: Arc<AtomicBool>,
    ) -> Self {
        Self { tx, terminate }
    }

    /// Dispatches a named operation into the running simulation and waits
    /// for its result. The call is served at the next epoch boundary.
    pub async fn call(
        &self,
        target: CallTarget,
        op: impl Into<String>,
        args: Args,
    ) -> Result<Value, RuntimeCallError> {
        let (respond_to, response) = oneshot::channel();
        self.tx
            .send(RuntimeRequest {
                target,
                op: op.into(),
                args,
                respond_to,
            })
            .map_err(|_| RuntimeCallError::ManagerGone)?;
        response.await.map_err(|_| RuntimeCallError::ManagerGone)?
    }

    /// Requests termination. The in-flight epoch completes first; the flag
    /// is honored at the next boundary.
    pub fn terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }
}
