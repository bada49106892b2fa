//! Workload configuration

use serde::{Deserialize, Serialize};

use crate::error::CorralError;
use crate::model::{ContainerType, Resource, StartAffinity};

/// Declarative workload description (TOML)
///
/// Used by the demo binary to describe the resources to register and the
/// task batches to submit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Resources to register
    pub resources: Vec<ResourceSettings>,
    /// Container types tasks may require
    pub container_types: Vec<ContainerTypeSettings>,
    /// Task batches to submit
    pub batches: Vec<BatchSettings>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            resources: vec![
                ResourceSettings {
                    id: 0,
                    name: "r0".to_string(),
                    cores: 10.0,
                },
                ResourceSettings {
                    id: 1,
                    name: "r1".to_string(),
                    cores: 18.0,
                },
            ],
            container_types: vec![
                ContainerTypeSettings {
                    id: 0,
                    name: "big".to_string(),
                    needed_cores: 4.0,
                    affinity: None,
                },
                ContainerTypeSettings {
                    id: 1,
                    name: "small".to_string(),
                    needed_cores: 1.0,
                    affinity: None,
                },
            ],
            batches: vec![
                BatchSettings {
                    container_type: 0,
                    count: 50,
                    duration_ms: 20,
                },
                BatchSettings {
                    container_type: 1,
                    count: 50,
                    duration_ms: 10,
                },
            ],
        }
    }
}

impl WorkloadConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, CorralError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CorralError::Config(format!("Failed to read config file: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| CorralError::Config(format!("Failed to parse config: {}", e)))
    }
}

/// Resource settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSettings {
    pub id: u32,
    pub name: String,
    pub cores: f32,
}

impl ResourceSettings {
    /// Build the [`Resource`] this entry describes
    pub fn to_resource(&self) -> Resource {
        Resource::new(self.id, self.name.clone(), self.cores)
    }
}

/// Container type settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerTypeSettings {
    pub id: u32,
    pub name: String,
    pub needed_cores: f32,
    pub affinity: Option<StartAffinity>,
}

impl ContainerTypeSettings {
    /// Build the [`ContainerType`] this entry describes
    pub fn to_container_type(&self) -> ContainerType {
        let mut ctype = ContainerType::new(self.id, self.name.clone(), self.needed_cores);
        if let Some(affinity) = self.affinity {
            ctype.affinity = affinity;
        }
        ctype
    }
}

/// A batch of identical tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Id of the container type the tasks require
    pub container_type: u32,
    /// Number of tasks to submit
    pub count: u32,
    /// Simulated task duration in milliseconds
    pub duration_ms: u64,
}
