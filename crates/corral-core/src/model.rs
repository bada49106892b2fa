//! Resource, ContainerType, and Container type definitions

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A compute host with a fixed core-capacity budget.
///
/// Resources are registered with the scheduler once and are immutable
/// afterwards; the scheduler shares them as `Arc<Resource>` for as long
/// as it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Unique identifier for the resource
    pub id: u32,
    /// Human-readable name, used in logs
    pub name: String,
    /// Total core capacity
    pub cores: f32,
}

impl Resource {
    /// Create a new resource
    pub fn new(id: u32, name: impl Into<String>, cores: f32) -> Self {
        Self {
            id,
            name: name.into(),
            cores,
        }
    }
}

/// A task's per-instance resource requirement.
///
/// The `id` is the identity the placement algorithm keys its slot pools
/// by; two types with the same id must describe the same requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerType {
    /// Unique identifier for the container type
    pub id: u32,
    /// Human-readable name, used in logs
    pub name: String,
    /// Cores reserved per running instance
    pub needed_cores: f32,
    /// Start-affinity hint for placement policies
    #[serde(default)]
    pub affinity: StartAffinity,
}

impl ContainerType {
    /// Create a new container type
    pub fn new(id: u32, name: impl Into<String>, needed_cores: f32) -> Self {
        Self {
            id,
            name: name.into(),
            needed_cores,
            affinity: StartAffinity::Any,
        }
    }
}

/// Placement-affinity hint carried by a container type.
///
/// The reference least-cost algorithm ignores it; plugged-in policies may
/// use it to bias instance spread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAffinity {
    /// No preference
    #[default]
    Any,
    /// Prefer filling already-loaded resources
    Pack,
    /// Prefer spreading instances across resources
    Spread,
}

impl std::fmt::Display for StartAffinity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartAffinity::Any => write!(f, "any"),
            StartAffinity::Pack => write!(f, "pack"),
            StartAffinity::Spread => write!(f, "spread"),
        }
    }
}

/// A resolved placement: the execution slot handed to a task body.
///
/// Valid for the duration of one task execution. The slot `index` is
/// unique among currently-running containers of the same
/// (resource, container type) pair and is reused after release.
#[derive(Debug, Clone)]
pub struct Container {
    /// The resource hosting this container
    pub resource: Arc<Resource>,
    /// The container type the slot was sized for
    pub container_type: ContainerType,
    /// Slot index within the (resource, type) pair
    pub index: u32,
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.resource.name, self.container_type.name, self.index
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_new() {
        let r = Resource::new(0, "r0", 10.0);
        assert_eq!(r.id, 0);
        assert_eq!(r.name, "r0");
        assert_eq!(r.cores, 10.0);
    }

    #[test]
    fn test_container_type_defaults_to_any_affinity() {
        let t = ContainerType::new(1, "small", 1.0);
        assert_eq!(t.affinity, StartAffinity::Any);
    }

    #[test]
    fn test_container_display() {
        let c = Container {
            resource: Arc::new(Resource::new(0, "r0", 10.0)),
            container_type: ContainerType::new(2, "big", 4.0),
            index: 3,
        };
        assert_eq!(c.to_string(), "r0-big-3");
    }
}
