//! The dynamic invocation surface: variant values and keyword-argument bags.
//!
//! Models talk to each other (and to the runtime control plane) through
//! `invoke(op, args) -> Result<Value, InvocationError>`. [`Value`] is the
//! tagged sum of every shape an operation may accept or return; [`Args`] is a
//! string-keyed bag of values with typed extractors that produce the
//! structured [`InvocationError`] variants instead of panicking.

use std::collections::HashMap;

use thiserror::Error;

use super::frame::{DataUnit, Frame, NodeId};
use super::time::SimTime;

/// A contiguous visibility interval, as returned by pass queries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interval {
    pub start: SimTime,
    pub end: SimTime,
}

/// The variant result/argument type of the named-operation surface.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Node ids, e.g. a field-of-view answer.
    Ids(Vec<NodeId>),
    List(Vec<Value>),
    /// A wire frame (beacon, request, data, ack).
    Frame(Frame),
    /// A payload unit, e.g. a datastore head.
    Unit(DataUnit),
    /// Pass intervals.
    Intervals(Vec<Interval>),
    /// A cartesian triple (ECI meters or meters/second).
    Vec3([f64; 3]),
    Time(SimTime),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_ids(&self) -> Option<&[NodeId]> {
        match self {
            Value::Ids(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn as_frame(&self) -> Option<&Frame> {
        match self {
            Value::Frame(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_unit(&self) -> Option<&DataUnit> {
        match self {
            Value::Unit(u) => Some(u),
            _ => None,
        }
    }

    /// Short label for error payloads.
    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Ids(_) => "ids",
            Value::List(_) => "list",
            Value::Frame(_) => "frame",
            Value::Unit(_) => "unit",
            Value::Intervals(_) => "intervals",
            Value::Vec3(_) => "vec3",
            Value::Time(_) => "time",
        }
    }
}

/// Errors of the model-to-model invocation surface.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvocationError {
    /// The model does not expose the named operation.
    #[error("{class} has no operation `{op}`")]
    UnknownOperation { class: &'static str, op: String },

    /// A required argument was absent from the bag.
    #[error("operation `{op}` requires argument `{key}`")]
    MissingArgument { op: String, key: &'static str },

    /// An argument was present but had the wrong shape.
    #[error("operation `{op}` argument `{key}`: expected {expected}, got {got}")]
    InvalidArgument {
        op: String,
        key: &'static str,
        expected: &'static str,
        got: &'static str,
    },

    /// The operation is known but the model's state refuses it.
    #[error("operation `{op}` precondition failed: {reason}")]
    PreconditionFailed { op: String, reason: String },
}

/// A keyword-argument bag for `invoke`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Args(HashMap<&'static str, Value>);

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion: `Args::new().with("count", Value::Int(3))`.
    pub fn with(mut self, key: &'static str, value: Value) -> Self {
        self.0.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn require(&self, op: &str, key: &'static str) -> Result<&Value, InvocationError> {
        self.0.get(key).ok_or(InvocationError::MissingArgument {
            op: op.to_string(),
            key,
        })
    }

    fn invalid(op: &str, key: &'static str, expected: &'static str, got: &Value) -> InvocationError {
        InvocationError::InvalidArgument {
            op: op.to_string(),
            key,
            expected,
            got: got.kind(),
        }
    }

    pub fn req_int(&self, op: &str, key: &'static str) -> Result<i64, InvocationError> {
        let v = self.require(op, key)?;
        v.as_int().ok_or_else(|| Self::invalid(op, key, "int", v))
    }

    pub fn req_float(&self, op: &str, key: &'static str) -> Result<f64, InvocationError> {
        let v = self.require(op, key)?;
        v.as_float().ok_or_else(|| Self::invalid(op, key, "float", v))
    }

    pub fn req_str(&self, op: &str, key: &'static str) -> Result<&str, InvocationError> {
        let v = self.require(op, key)?;
        v.as_str().ok_or_else(|| Self::invalid(op, key, "str", v))
    }

    pub fn req_frame(&self, op: &str, key: &'static str) -> Result<&Frame, InvocationError> {
        let v = self.require(op, key)?;
        v.as_frame().ok_or_else(|| Self::invalid(op, key, "frame", v))
    }

    pub fn req_unit(&self, op: &str, key: &'static str) -> Result<&DataUnit, InvocationError> {
        let v = self.require(op, key)?;
        v.as_unit().ok_or_else(|| Self::invalid(op, key, "unit", v))
    }

    pub fn req_ids(&self, op: &str, key: &'static str) -> Result<&[NodeId], InvocationError> {
        let v = self.require(op, key)?;
        v.as_ids().ok_or_else(|| Self::invalid(op, key, "ids", v))
    }

    pub fn opt_int(&self, op: &str, key: &'static str) -> Result<Option<i64>, InvocationError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_int()
                .map(Some)
                .ok_or_else(|| Self::invalid(op, key, "int", v)),
        }
    }

    pub fn opt_time(&self, op: &str, key: &'static str) -> Result<Option<SimTime>, InvocationError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(Value::Time(t)) => Ok(Some(*t)),
            Some(v) => Err(Self::invalid(op, key, "time", v)),
        }
    }

    pub fn opt_str(&self, op: &str, key: &'static str) -> Result<Option<&str>, InvocationError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| Self::invalid(op, key, "str", v)),
        }
    }
}
