//! Task trait and function-backed task implementation

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::error::CorralResult;
use crate::model::{Container, ContainerType};

/// A unit of work submitted to the scheduler.
///
/// A task exposes the container type it needs and an async body that
/// receives the resolved [`Container`]. The scheduler holds tasks as
/// [`TaskRef`] handles; the same handle may be submitted several times,
/// each submission being a distinct execution.
///
/// The body runs with no scheduler lock held, so it may take arbitrary
/// time without blocking other submissions or dispatch decisions. An
/// `Err` return is logged by the engine and the execution is retired
/// normally; it never leaks the reserved capacity.
#[async_trait]
pub trait Task: Send + Sync {
    /// The container type this task must run in
    fn container_type(&self) -> &ContainerType;

    /// Execute the task inside its assigned container
    async fn run(&self, container: Container) -> CorralResult<()>;
}

/// Shared task handle
pub type TaskRef = Arc<dyn Task>;

/// Function-backed task implementation.
///
/// Wraps a closure that creates a new future per execution, so one
/// `TaskFn` can be submitted many times without shared mutable state.
pub struct TaskFn<F> {
    container_type: ContainerType,
    f: F,
}

impl<F> TaskFn<F> {
    /// Create a new function-backed task
    pub fn new(container_type: ContainerType, f: F) -> Self {
        Self { container_type, f }
    }

    /// Create the task and return it as a shared [`TaskRef`]
    pub fn arc(container_type: ContainerType, f: F) -> Arc<Self> {
        Arc::new(Self::new(container_type, f))
    }
}

#[async_trait]
impl<F, Fut> Task for TaskFn<F>
where
    F: Fn(Container) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CorralResult<()>> + Send + 'static,
{
    fn container_type(&self) -> &ContainerType {
        &self.container_type
    }

    async fn run(&self, container: Container) -> CorralResult<()> {
        (self.f)(container).await
    }
}
