//! Reference least-cost placement algorithm

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use corral_core::{Container, ContainerType, Resource, TaskRef};

use crate::algorithm::{LaunchInfo, WorkloadAlgorithm};

/// Reference [`WorkloadAlgorithm`]: first feasible task, least-cost
/// resource.
///
/// The waiting list is scanned in FIFO order and the first task with a
/// feasible resource is committed. Among feasible resources the one with
/// the strictly lowest placement cost wins; the reference cost is
/// constant, so ties resolve to registration order. A task whose type
/// fits no registered resource stays in the list until capacity that can
/// hold it appears.
pub struct LeastCostAlgorithm {
    /// Per-resource load accounting, in registration order
    resources: Vec<ResourceLoad>,
    /// Waiting tasks, FIFO
    waiting: VecDeque<TaskRef>,
}

impl LeastCostAlgorithm {
    /// Create an empty algorithm (no resources, no tasks)
    pub fn new() -> Self {
        Self {
            resources: Vec::new(),
            waiting: VecDeque::new(),
        }
    }

    /// Number of waiting tasks
    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }
}

impl Default for LeastCostAlgorithm {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkloadAlgorithm for LeastCostAlgorithm {
    fn add_resource(&mut self, resource: Arc<Resource>) {
        if self.resources.iter().any(|r| r.resource.id == resource.id) {
            debug!(resource = %resource.name, "Resource already registered, ignoring");
            return;
        }
        debug!(resource = %resource.name, cores = resource.cores, "Resource registered");
        self.resources.push(ResourceLoad::new(resource));
    }

    fn add_task(&mut self, task: TaskRef) {
        self.waiting.push_back(task);
    }

    fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    fn choose_task(&mut self) -> Option<LaunchInfo> {
        for pos in 0..self.waiting.len() {
            let ctype = self.waiting[pos].container_type().clone();

            let mut best: Option<usize> = None;
            let mut best_cost = f32::INFINITY;
            for (i, load) in self.resources.iter().enumerate() {
                if load.supports(&ctype) && load.fits_now(&ctype) {
                    let cost = load.cost(&ctype);
                    if cost < best_cost {
                        best_cost = cost;
                        best = Some(i);
                    }
                }
            }

            if let Some(i) = best {
                let Some(task) = self.waiting.remove(pos) else {
                    continue;
                };
                let load = &mut self.resources[i];
                let index = load.allocate(&ctype);
                debug!(
                    resource = %load.resource.name,
                    container_type = %ctype.name,
                    slot = index,
                    load = load.load,
                    "Placement committed"
                );
                return Some(LaunchInfo {
                    task,
                    container: Container {
                        resource: load.resource.clone(),
                        container_type: ctype,
                        index,
                    },
                });
            }
        }
        None
    }

    fn liberate(&mut self, info: &LaunchInfo) {
        let resource_id = info.container.resource.id;
        let Some(load) = self
            .resources
            .iter_mut()
            .find(|r| r.resource.id == resource_id)
        else {
            warn!(resource_id, "Liberate for unknown resource, ignoring");
            return;
        };
        load.release(&info.container.container_type, info.container.index);
        debug!(
            resource = %load.resource.name,
            container_type = %info.container.container_type.name,
            slot = info.container.index,
            load = load.load,
            "Slot released"
        );
    }
}

/// Load accounting for one resource
struct ResourceLoad {
    resource: Arc<Resource>,
    /// Cores currently reserved
    load: f32,
    /// Slot pools keyed by container-type id
    pools: HashMap<u32, SlotPool>,
}

impl ResourceLoad {
    fn new(resource: Arc<Resource>) -> Self {
        Self {
            resource,
            load: 0.0,
            pools: HashMap::new(),
        }
    }

    /// The type could ever fit this resource
    fn supports(&self, ctype: &ContainerType) -> bool {
        ctype.needed_cores <= self.resource.cores
    }

    /// One more instance fits right now
    fn fits_now(&self, ctype: &ContainerType) -> bool {
        self.load + ctype.needed_cores <= self.resource.cores
    }

    /// Placement cost for one more instance of the type.
    ///
    /// Constant in the reference policy; an extension point for
    /// load-proportional or affinity-aware costs.
    fn cost(&self, _ctype: &ContainerType) -> f32 {
        1.0
    }

    fn allocate(&mut self, ctype: &ContainerType) -> u32 {
        self.load += ctype.needed_cores;
        self.pools.entry(ctype.id).or_default().allocate()
    }

    fn release(&mut self, ctype: &ContainerType, index: u32) {
        self.load -= ctype.needed_cores;
        if let Some(pool) = self.pools.get_mut(&ctype.id) {
            pool.release(index);
        } else {
            warn!(
                resource = %self.resource.name,
                container_type = %ctype.name,
                "Release for unknown container type, ignoring"
            );
        }
    }
}

/// Slot-index pool for one (resource, container type) pair.
///
/// Allocates the smallest index not currently in use. `first_free` is a
/// low-water mark so the scan resumes where the last allocation or
/// release left it instead of starting from zero.
#[derive(Default)]
struct SlotPool {
    running: HashSet<u32>,
    first_free: u32,
}

impl SlotPool {
    fn allocate(&mut self) -> u32 {
        let index = self.first_free;
        self.running.insert(index);
        self.first_free += 1;
        while self.running.contains(&self.first_free) {
            self.first_free += 1;
        }
        index
    }

    fn release(&mut self, index: u32) {
        self.running.remove(&index);
        if index < self.first_free {
            self.first_free = index;
        }
    }
}
