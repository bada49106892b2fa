//! Placement algorithm seam

use std::sync::Arc;

use corral_core::{Container, Resource, TaskRef};

/// A committed placement: the chosen task and its resolved container.
///
/// Produced by a successful [`WorkloadAlgorithm::choose_task`]; the same
/// value must be handed back to [`WorkloadAlgorithm::liberate`] exactly
/// once after the execution completes.
#[derive(Clone)]
pub struct LaunchInfo {
    /// The chosen task
    pub task: TaskRef,
    /// The resolved placement
    pub container: Container,
}

impl std::fmt::Debug for LaunchInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchInfo")
            .field("container", &self.container)
            .finish()
    }
}

/// Strategy for deciding which task runs where.
///
/// The engine calls every method while holding its single state mutex,
/// so implementations take `&mut self` and need no internal locking.
/// Load accounting and slot bookkeeping are owned entirely by the
/// implementation; capacity is reserved inside `choose_task` itself, so
/// a decision and its reservation are a single atomic step.
pub trait WorkloadAlgorithm: Send {
    /// Register a resource. Registering the same id twice is a no-op.
    fn add_resource(&mut self, resource: Arc<Resource>);

    /// Append a task to the tail of the waiting list (FIFO).
    fn add_task(&mut self, task: TaskRef);

    /// Whether the waiting list is empty.
    fn is_empty(&self) -> bool;

    /// Choose at most one task to run.
    ///
    /// Scans the waiting list in FIFO order and commits the first task
    /// for which some resource can host one more instance of its
    /// container type; tasks with no feasible resource are skipped, not
    /// discarded. Returns `None` when nothing is dispatchable — the
    /// caller must then wait for new tasks or freed capacity rather
    /// than spin.
    fn choose_task(&mut self) -> Option<LaunchInfo>;

    /// Release the load and slot index reserved by a `choose_task`.
    ///
    /// Must be called exactly once per successful `choose_task` result.
    fn liberate(&mut self, info: &LaunchInfo);
}
