//! Capability registry.
//!
//! Name-to-factory maps for node classes and model classes. Each model
//! registration carries its capability tag, the owner-node-class filter
//! (empty slice = any owner), and its dependency expression in conjunctive
//! normal form: an AND of OR-lists over sibling class names.
//!
//! The registry never instantiates anything itself; the orchestrator looks
//! factories up and drives construction. [`Registry::with_builtins`] is the
//! production set; tests build custom registries to register fixtures.

use std::collections::HashMap;

use crate::config::{ConfigError, ConfigReader};
use crate::geometry::GroundLocation;
use crate::kernel::{Model, ModelInit, ModelTag, NodeKind};

/// Node-class-specific attributes produced by a node factory.
#[derive(Debug, Default)]
pub struct NodeExtras {
    /// Fixed geodetic location; required for ground-segment classes.
    pub location: Option<GroundLocation>,
}

pub type NodeFactory = for<'a> fn(&ConfigReader<'a>) -> Result<NodeExtras, ConfigError>;
pub type ModelFactory = for<'a> fn(ModelInit<'a>) -> Result<Box<dyn Model>, ConfigError>;

/// Dependency expression: AND across the outer slice, OR within each inner
/// slice of class names.
pub type DependencyExpr = &'static [&'static [&'static str]];

pub struct NodeRegistration {
    pub class_name: &'static str,
    pub kind: NodeKind,
    pub build: NodeFactory,
}

#[derive(Debug)]
pub struct ModelRegistration {
    pub class_name: &'static str,
    pub tag: ModelTag,
    /// Owner node classes this model may live on; empty = any.
    pub supported_nodes: &'static [&'static str],
    pub dependencies: DependencyExpr,
    pub build: ModelFactory,
}

#[derive(Default)]
pub struct Registry {
    nodes: HashMap<&'static str, NodeRegistration>,
    models: HashMap<&'static str, ModelRegistration>,
}

fn ground_location(cfg: &ConfigReader) -> Result<NodeExtras, ConfigError> {
    Ok(NodeExtras {
        location: Some(GroundLocation {
            latitude_deg: cfg.req_f64("latitude_deg")?,
            longitude_deg: cfg.req_f64("longitude_deg")?,
            elevation_m: cfg.opt_f64("elevation_m", 0.0)?,
        }),
    })
}

fn no_extras(_cfg: &ConfigReader) -> Result<NodeExtras, ConfigError> {
    Ok(NodeExtras::default())
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The production registry: every built-in node and model class.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register_node(NodeRegistration {
            class_name: "SatelliteBasic",
            kind: NodeKind::Sat,
            build: no_extras,
        });
        registry.register_node(NodeRegistration {
            class_name: "GroundStationBasic",
            kind: NodeKind::Gs,
            build: ground_location,
        });
        registry.register_node(NodeRegistration {
            class_name: "IotBasic",
            kind: NodeKind::IotDevice,
            build: ground_location,
        });

        registry.register_model(ModelRegistration {
            class_name: crate::orbit::OrbitModel::CLASS,
            tag: ModelTag::Orbital,
            supported_nodes: &["SatelliteBasic"],
            dependencies: &[],
            build: crate::orbit::OrbitModel::build,
        });
        registry.register_model(ModelRegistration {
            class_name: crate::power::PowerModel::CLASS,
            tag: ModelTag::Power,
            supported_nodes: &[],
            dependencies: &[],
            build: crate::power::PowerModel::build,
        });
        registry.register_model(ModelRegistration {
            class_name: crate::fov::FovSampled::CLASS,
            tag: ModelTag::ViewOfNode,
            supported_nodes: &[],
            dependencies: &[],
            build: crate::fov::FovSampled::build,
        });
        registry.register_model(ModelRegistration {
            class_name: crate::fov::FovPassTable::CLASS,
            tag: ModelTag::ViewOfNode,
            supported_nodes: &[],
            dependencies: &[],
            build: crate::fov::FovPassTable::build,
        });
        registry.register_model(ModelRegistration {
            class_name: crate::datastore::DataStore::CLASS,
            tag: ModelTag::DataStore,
            supported_nodes: &[],
            dependencies: &[],
            build: crate::datastore::DataStore::build,
        });
        registry.register_model(ModelRegistration {
            class_name: crate::datastore::DataGenerator::CLASS,
            tag: ModelTag::DataGenerator,
            supported_nodes: &[],
            dependencies: &[],
            build: crate::datastore::DataGenerator::build,
        });
        registry.register_model(ModelRegistration {
            class_name: "ModelLoraRadio",
            tag: ModelTag::BasicLoraRadio,
            supported_nodes: &[],
            dependencies: &[&["ModelFovSampled", "ModelFovPassTable"]],
            build: crate::radio::LoraClass::build,
        });
        registry.register_model(ModelRegistration {
            class_name: "ModelImagingRadio",
            tag: ModelTag::ImagingRadio,
            supported_nodes: &[],
            dependencies: &[&["ModelFovSampled", "ModelFovPassTable"]],
            build: crate::radio::XbandClass::build,
        });
        registry.register_model(ModelRegistration {
            class_name: "ModelIslRadio",
            tag: ModelTag::Isl,
            supported_nodes: &["SatelliteBasic"],
            dependencies: &[&["ModelOrbit"]],
            build: crate::radio::IslClass::build,
        });
        registry.register_model(ModelRegistration {
            class_name: crate::mac::TtcMac::CLASS,
            tag: ModelTag::Mac,
            supported_nodes: &["SatelliteBasic"],
            dependencies: &[&["ModelLoraRadio"], &["ModelDataStore"]],
            build: crate::mac::TtcMac::build,
        });
        registry.register_model(ModelRegistration {
            class_name: crate::mac::GroundMac::CLASS,
            tag: ModelTag::Mac,
            supported_nodes: &["GroundStationBasic"],
            dependencies: &[
                &["ModelLoraRadio", "ModelImagingRadio"],
                &["ModelDataStore"],
            ],
            build: crate::mac::GroundMac::build,
        });
        registry.register_model(ModelRegistration {
            class_name: crate::mac::IotMac::CLASS,
            tag: ModelTag::Mac,
            supported_nodes: &["IotBasic"],
            dependencies: &[&["ModelLoraRadio"], &["ModelDataGenerator"]],
            build: crate::mac::IotMac::build,
        });
        registry.register_model(ModelRegistration {
            class_name: crate::compute::ComputeModel::CLASS,
            tag: ModelTag::Compute,
            supported_nodes: &[],
            dependencies: &[],
            build: crate::compute::ComputeModel::build,
        });
        registry.register_model(ModelRegistration {
            class_name: crate::imaging::Adacs::CLASS,
            tag: ModelTag::Adacs,
            supported_nodes: &["SatelliteBasic"],
            dependencies: &[],
            build: crate::imaging::Adacs::build,
        });
        registry.register_model(ModelRegistration {
            class_name: crate::imaging::ImagingLogic::CLASS,
            tag: ModelTag::Imaging,
            supported_nodes: &["SatelliteBasic"],
            dependencies: &[&["ModelPower"], &["ModelAdacs"], &["ModelDataStore"]],
            build: crate::imaging::ImagingLogic::build,
        });

        registry
    }

    /// Registration happens once at startup; a duplicate name is a
    /// programming error and the later entry wins.
    pub fn register_node(&mut self, registration: NodeRegistration) {
        self.nodes.insert(registration.class_name, registration);
    }

    pub fn register_model(&mut self, registration: ModelRegistration) {
        self.models.insert(registration.class_name, registration);
    }

    pub fn node(&self, class_name: &str) -> Result<&NodeRegistration, ConfigError> {
        self.nodes.get(class_name).ok_or_else(|| ConfigError::UnknownClass {
            kind: "node",
            name: class_name.to_string(),
        })
    }

    pub fn model(&self, class_name: &str) -> Result<&ModelRegistration, ConfigError> {
        self.models.get(class_name).ok_or_else(|| ConfigError::UnknownClass {
            kind: "model",
            name: class_name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve_and_unknowns_fail_structured() {
        let registry = Registry::with_builtins();
        assert_eq!(registry.node("SatelliteBasic").unwrap().kind, NodeKind::Sat);
        let orbit = registry.model("ModelOrbit").unwrap();
        assert_eq!(orbit.tag, ModelTag::Orbital);
        assert_eq!(orbit.supported_nodes, &["SatelliteBasic"]);

        match registry.model("ModelWarpDrive") {
            Err(ConfigError::UnknownClass { kind, name }) => {
                assert_eq!(kind, "model");
                assert_eq!(name, "ModelWarpDrive");
            }
            other => panic!("expected UnknownClass, got {other:?}"),
        }
    }

    #[test]
    fn radio_dependencies_accept_either_fov_strategy() {
        let registry = Registry::with_builtins();
        let lora = registry.model("ModelLoraRadio").unwrap();
        assert_eq!(lora.dependencies.len(), 1);
        assert!(lora.dependencies[0].contains(&"ModelFovSampled"));
        assert!(lora.dependencies[0].contains(&"ModelFovPassTable"));
    }
}
