//! Scenario configuration.
//!
//! The serde model of the scenario JSON and the typed reader model factories
//! use to pull their class-specific keys. Unknown keys at the node and model
//! level are captured in flattened maps and forwarded verbatim to the
//! factories — the schema only pins the orchestration contract.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value as Json};
use thiserror::Error;

use crate::kernel::{NodeId, SimTime, TimeWindow};

/// Malformed scenario input. Fatal before any epoch runs; maps to process
/// exit code 2.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read scenario file `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("scenario is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown {kind} class `{name}`")]
    UnknownClass { kind: &'static str, name: String },

    #[error("unknown node kind `{0}`")]
    UnknownNodeKind(String),

    #[error("unknown log level `{0}`")]
    UnknownLogLevel(String),

    #[error("unknown log handler `{0}`")]
    UnknownLogHandler(String),

    #[error("{class}: missing required key `{key}`")]
    MissingKey { class: String, key: String },

    #[error("{class}: key `{key}` expects {expected}")]
    InvalidValue {
        class: String,
        key: String,
        expected: &'static str,
    },

    #[error("bad timestamp `{value}` for `{field}`, expected YYYY-MM-DD HH:MM:SS")]
    BadTimestamp { field: String, value: String },

    #[error("{class}: TLE rejected: {reason}")]
    BadTle { class: String, reason: String },

    #[error("duplicate node id {0}")]
    DuplicateNodeId(NodeId),

    #[error("node {node}: two radios tuned to {frequency_hz} Hz")]
    DuplicateFrequency { node: NodeId, frequency_hz: f64 },

    #[error("simtime: delta must be positive, got {0}")]
    BadDelta(f64),

    #[error("simtime: end time precedes start time")]
    BadWindow,
}

/// Root of a parsed scenario file.
#[derive(Debug, Deserialize)]
pub struct ScenarioConfig {
    pub topologies: Vec<TopologyConfig>,
    pub simtime: SimTimeConfig,
    pub simlogsetup: LogSetupConfig,
    #[serde(default)]
    pub execution: Option<ExecutionConfig>,
}

#[derive(Debug, Deserialize)]
pub struct TopologyConfig {
    pub name: String,
    pub id: u32,
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Deserialize)]
pub struct NodeConfig {
    pub nodeid: NodeId,
    /// Node kind: SAT, GS, IOTDEVICE.
    #[serde(rename = "type")]
    pub kind: String,
    /// Implementation-class name resolved through the registry.
    pub iname: String,
    pub loglevel: String,
    pub starttime: Option<String>,
    pub endtime: Option<String>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    /// Node-class-specific keys, forwarded to the node factory.
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

impl NodeConfig {
    /// The node's own window: declared bounds where present, the scenario
    /// window otherwise.
    pub fn window(&self, scenario: TimeWindow) -> Result<TimeWindow, ConfigError> {
        let parse = |field: &str, text: &Option<String>, default| match text {
            None => Ok(default),
            Some(value) => SimTime::parse(value).ok_or_else(|| ConfigError::BadTimestamp {
                field: format!("node {} {field}", self.nodeid),
                value: value.clone(),
            }),
        };
        let start = parse("starttime", &self.starttime, scenario.start)?;
        let end = parse("endtime", &self.endtime, scenario.end)?;
        if end < start {
            return Err(ConfigError::BadWindow);
        }
        Ok(TimeWindow::new(start, end))
    }
}

#[derive(Debug, Deserialize)]
pub struct ModelConfig {
    /// Implementation-class name resolved through the registry.
    pub iname: String,
    /// Model-class-specific keys, forwarded verbatim to the factory.
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

#[derive(Debug, Deserialize)]
pub struct SimTimeConfig {
    pub starttime: String,
    pub endtime: String,
    /// Epoch length Δ, seconds.
    pub delta: f64,
    #[serde(default)]
    pub seed: u64,
}

impl SimTimeConfig {
    pub fn window(&self) -> Result<TimeWindow, ConfigError> {
        let parse = |field: &'static str, text: &str| {
            SimTime::parse(text).ok_or_else(|| ConfigError::BadTimestamp {
                field: field.to_string(),
                value: text.to_string(),
            })
        };
        let start = parse("simtime.starttime", &self.starttime)?;
        let end = parse("simtime.endtime", &self.endtime)?;
        if end < start {
            return Err(ConfigError::BadWindow);
        }
        if self.delta <= 0.0 {
            return Err(ConfigError::BadDelta(self.delta));
        }
        Ok(TimeWindow::new(start, end))
    }
}

#[derive(Debug, Deserialize)]
pub struct LogSetupConfig {
    pub loghandler: String,
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionModeConfig {
    Sequential,
    Parallel,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionConfig {
    pub mode: ExecutionModeConfig,
}

impl ScenarioConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }
}

/// Typed view over a class's attribute bag. Produces structured
/// [`ConfigError`]s naming the class and key.
#[derive(Clone, Copy)]
pub struct ConfigReader<'a> {
    class: &'a str,
    map: &'a Map<String, Json>,
}

impl<'a> ConfigReader<'a> {
    pub fn new(class: &'a str, map: &'a Map<String, Json>) -> Self {
        Self { class, map }
    }

    pub fn class(&self) -> &str {
        self.class
    }

    pub fn raw(&self, key: &str) -> Option<&'a Json> {
        self.map.get(key)
    }

    fn missing(&self, key: &str) -> ConfigError {
        ConfigError::MissingKey {
            class: self.class.to_string(),
            key: key.to_string(),
        }
    }

    fn invalid(&self, key: &str, expected: &'static str) -> ConfigError {
        ConfigError::InvalidValue {
            class: self.class.to_string(),
            key: key.to_string(),
            expected,
        }
    }

    pub fn req_f64(&self, key: &str) -> Result<f64, ConfigError> {
        self.raw(key)
            .ok_or_else(|| self.missing(key))?
            .as_f64()
            .ok_or_else(|| self.invalid(key, "a number"))
    }

    pub fn opt_f64(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(v) => v.as_f64().ok_or_else(|| self.invalid(key, "a number")),
        }
    }

    pub fn req_u64(&self, key: &str) -> Result<u64, ConfigError> {
        self.raw(key)
            .ok_or_else(|| self.missing(key))?
            .as_u64()
            .ok_or_else(|| self.invalid(key, "a non-negative integer"))
    }

    pub fn opt_u64(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(v) => v
                .as_u64()
                .ok_or_else(|| self.invalid(key, "a non-negative integer")),
        }
    }

    pub fn req_str(&self, key: &str) -> Result<&'a str, ConfigError> {
        self.raw(key)
            .ok_or_else(|| self.missing(key))?
            .as_str()
            .ok_or_else(|| self.invalid(key, "a string"))
    }

    pub fn opt_str(&self, key: &str) -> Result<Option<&'a str>, ConfigError> {
        match self.raw(key) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| self.invalid(key, "a string")),
        }
    }

    pub fn opt_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| self.invalid(key, "a boolean")),
        }
    }

    /// A `{tag: watts}`-style table of named rates.
    pub fn opt_f64_table(&self, key: &str) -> Result<HashMap<String, f64>, ConfigError> {
        match self.raw(key) {
            None => Ok(HashMap::new()),
            Some(Json::Object(map)) => map
                .iter()
                .map(|(name, v)| {
                    v.as_f64()
                        .map(|rate| (name.clone(), rate))
                        .ok_or_else(|| self.invalid(key, "an object of numbers"))
                })
                .collect(),
            Some(_) => Err(self.invalid(key, "an object of numbers")),
        }
    }

    /// A list of node ids (ISL peer declarations).
    pub fn opt_id_list(&self, key: &str) -> Result<Vec<NodeId>, ConfigError> {
        match self.raw(key) {
            None => Ok(Vec::new()),
            Some(Json::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_u64()
                        .and_then(|id| NodeId::try_from(id).ok())
                        .ok_or_else(|| self.invalid(key, "a list of node ids"))
                })
                .collect(),
            Some(_) => Err(self.invalid(key, "a list of node ids")),
        }
    }
}
