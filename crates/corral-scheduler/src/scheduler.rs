//! Scheduling engine
//!
//! The `Scheduler` is the control loop that:
//! - Accepts resources and tasks at any point of its lifetime
//! - Dispatches each task to a placement chosen by the algorithm
//! - Runs every dispatched task as its own concurrent execution
//! - Releases the reserved capacity when an execution completes
//!
//! One mutex guards all shared state; two `Notify` handles play the role
//! of the "work may be dispatchable" and "a completion is pending"
//! conditions. `Notify::notify_one` stores a permit when no waiter is
//! registered, so a signal sent between a condition check and the wait
//! is never lost.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use corral_core::{Container, CorralError, CorralResult, Resource, TaskRef};

use crate::algorithm::{LaunchInfo, WorkloadAlgorithm};
use crate::least_cost::LeastCostAlgorithm;

/// One in-flight execution, keyed by its dispatch id.
struct RunningTask {
    /// The committed placement, handed back to the algorithm on retire
    info: LaunchInfo,
    /// Handle of the spawned execution
    handle: JoinHandle<()>,
}

/// Shared mutable state, guarded by the scheduler's single mutex.
struct Shared {
    /// The placement algorithm; owns load and slot bookkeeping
    algorithm: Box<dyn WorkloadAlgorithm>,
    /// In-flight executions by dispatch id
    running: HashMap<u64, RunningTask>,
    /// Dispatch ids whose execution has finished, awaiting retirement
    finished: VecDeque<u64>,
    /// Next dispatch id; monotonically increasing, never reused
    next_id: u64,
    /// Number of submitted-but-not-dispatched tasks
    waiting: usize,
    /// Shutdown requested
    stop: bool,
}

/// The scheduling engine.
///
/// Tasks are considered in FIFO submission order, but an infeasible task
/// is skipped in favor of the next feasible one, so dispatch and
/// completion order need not match submission order. Execution bodies run
/// with no lock held; a task body may take arbitrary time without
/// blocking submissions or dispatch decisions.
///
/// [`Scheduler::stop`] is the single synchronization barrier: it returns
/// once every submitted task has been dispatched, executed, and its slot
/// released. A task whose requirement exceeds every registered resource
/// waits forever and keeps `stop` from returning; use
/// [`Scheduler::waiting_tasks`] to observe such starvation.
pub struct Scheduler {
    shared: Arc<Mutex<Shared>>,
    /// Wakes the dispatch loop: new task, new resource, freed capacity
    dispatch_wake: Arc<Notify>,
    /// Wakes the completion loop: an execution finished
    completion_wake: Arc<Notify>,
    /// The two background loops, joined by `stop`
    loops: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Scheduler {
    /// Create a scheduler backed by the reference [`LeastCostAlgorithm`]
    pub fn new() -> Self {
        Self::with_algorithm(Box::new(LeastCostAlgorithm::new()))
    }

    /// Create a scheduler with a custom placement algorithm
    pub fn with_algorithm(algorithm: Box<dyn WorkloadAlgorithm>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                algorithm,
                running: HashMap::new(),
                finished: VecDeque::new(),
                next_id: 0,
                waiting: 0,
                stop: false,
            })),
            dispatch_wake: Arc::new(Notify::new()),
            completion_wake: Arc::new(Notify::new()),
            loops: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Register a resource.
    ///
    /// Legal at any time, including after [`Scheduler::start`]; new
    /// capacity may unblock starved tasks.
    pub async fn add_resource(&self, resource: Resource) {
        let resource = Arc::new(resource);
        {
            let mut shared = self.shared.lock().await;
            shared.algorithm.add_resource(resource);
        }
        self.dispatch_wake.notify_one();
    }

    /// Submit a task for execution.
    ///
    /// Legal before or after [`Scheduler::start`]. The same handle may
    /// be submitted several times; each submission is a distinct
    /// execution.
    pub async fn add_task(&self, task: TaskRef) {
        {
            let mut shared = self.shared.lock().await;
            shared.algorithm.add_task(task);
            shared.waiting += 1;
        }
        self.dispatch_wake.notify_one();
    }

    /// Launch the dispatch and completion loops.
    ///
    /// Returns immediately. Calling it a second time fails with
    /// [`CorralError::AlreadyStarted`].
    pub async fn start(&self) -> CorralResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(CorralError::AlreadyStarted);
        }

        let dispatch = tokio::spawn(dispatch_loop(
            self.shared.clone(),
            self.dispatch_wake.clone(),
            self.completion_wake.clone(),
        ));
        let completion = tokio::spawn(completion_loop(
            self.shared.clone(),
            self.dispatch_wake.clone(),
            self.completion_wake.clone(),
        ));
        self.loops.lock().await.extend([dispatch, completion]);

        info!("Scheduler started");
        Ok(())
    }

    /// Request shutdown and wait for the engine to quiesce.
    ///
    /// Blocks until every submitted task has been dispatched, executed,
    /// and liberated, and both loops have exited. In-flight executions
    /// are not cancelled. A no-op if [`Scheduler::start`] was never
    /// called.
    pub async fn stop(&self) {
        {
            let mut shared = self.shared.lock().await;
            shared.stop = true;
        }
        self.dispatch_wake.notify_one();
        self.completion_wake.notify_one();

        let handles: Vec<JoinHandle<()>> = self.loops.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler loop join failed");
            }
        }
        info!("Scheduler stopped");
    }

    /// Number of submitted tasks not yet dispatched.
    ///
    /// A stable non-zero depth while resources sit idle indicates
    /// starved tasks whose requirement nothing registered can hold.
    pub async fn waiting_tasks(&self) -> usize {
        self.shared.lock().await.waiting
    }

    /// Number of currently running executions
    pub async fn running_tasks(&self) -> usize {
        self.shared.lock().await.running.len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatch loop: drain every dispatchable task, then wait.
///
/// Exits once shutdown is requested and the waiting list is empty;
/// draining the running table is the completion loop's job.
async fn dispatch_loop(
    shared: Arc<Mutex<Shared>>,
    dispatch_wake: Arc<Notify>,
    completion_wake: Arc<Notify>,
) {
    loop {
        {
            let mut s = shared.lock().await;
            while let Some(info) = s.algorithm.choose_task() {
                let id = s.next_id;
                s.next_id += 1;
                s.waiting -= 1;
                debug!(dispatch_id = id, container = %info.container, "Task dispatched");
                let handle = tokio::spawn(run_one(
                    id,
                    info.task.clone(),
                    info.container.clone(),
                    shared.clone(),
                    completion_wake.clone(),
                ));
                s.running.insert(id, RunningTask { info, handle });
            }
            if s.stop && s.algorithm.is_empty() {
                break;
            }
        }
        dispatch_wake.notified().await;
    }
    debug!("Dispatch loop exited");
}

/// One task execution: run the body with no lock held, then report.
///
/// A failed or panicking body is still reported as finished so its slot
/// is always liberated; the failure itself is only logged.
async fn run_one(
    id: u64,
    task: TaskRef,
    container: Container,
    shared: Arc<Mutex<Shared>>,
    completion_wake: Arc<Notify>,
) {
    match AssertUnwindSafe(task.run(container)).catch_unwind().await {
        Ok(Ok(())) => debug!(dispatch_id = id, "Task finished"),
        Ok(Err(e)) => warn!(dispatch_id = id, error = %e, "Task failed"),
        Err(_) => error!(dispatch_id = id, "Task panicked"),
    }

    let mut s = shared.lock().await;
    s.finished.push_back(id);
    completion_wake.notify_one();
}

/// Completion loop: retire finished executions, then wait.
///
/// Retiring joins the execution, drops it from the running table, and
/// hands the placement back to the algorithm; the dispatch loop is then
/// woken because the freed capacity may unblock waiting tasks. Exits
/// once shutdown is requested and no running or waiting task remains.
async fn completion_loop(
    shared: Arc<Mutex<Shared>>,
    dispatch_wake: Arc<Notify>,
    completion_wake: Arc<Notify>,
) {
    loop {
        {
            let mut s = shared.lock().await;
            while let Some(id) = s.finished.pop_front() {
                let Some(running) = s.running.remove(&id) else {
                    warn!(dispatch_id = id, "Finished id missing from running table");
                    continue;
                };
                // The execution already queued its id, so it holds no
                // lock anymore; this join resolves immediately.
                if let Err(e) = running.handle.await {
                    error!(dispatch_id = id, error = %e, "Execution join failed");
                }
                s.algorithm.liberate(&running.info);
                debug!(dispatch_id = id, "Task retired");
            }
            let done = s.stop && s.running.is_empty() && s.algorithm.is_empty();
            dispatch_wake.notify_one();
            if done {
                break;
            }
        }
        completion_wake.notified().await;
    }
    debug!("Completion loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::{ContainerType, TaskFn};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Records every container a task body sees and checks the capacity
    /// and slot-uniqueness invariants while executions overlap.
    struct Checker {
        resources: HashMap<u32, f32>,
        types: HashMap<u32, f32>,
        state: std::sync::Mutex<CheckState>,
    }

    #[derive(Default)]
    struct CheckState {
        /// Cores currently held per resource id
        load: HashMap<u32, f32>,
        /// Highest slot index seen per (resource, type)
        max_index: HashMap<(u32, u32), u32>,
        /// Live (resource, type, index) triples
        live: HashSet<(u32, u32, u32)>,
        violations: Vec<String>,
    }

    impl Checker {
        fn new(resources: &[(u32, f32)], types: &[(u32, f32)]) -> Arc<Self> {
            Arc::new(Self {
                resources: resources.iter().copied().collect(),
                types: types.iter().copied().collect(),
                state: std::sync::Mutex::new(CheckState::default()),
            })
        }

        fn enter(&self, c: &Container) {
            let mut state = self.state.lock().unwrap();
            let key = (c.resource.id, c.container_type.id, c.index);
            if !state.live.insert(key) {
                state
                    .violations
                    .push(format!("slot {:?} handed out twice", key));
            }
            let load = state.load.entry(c.resource.id).or_insert(0.0);
            *load += c.container_type.needed_cores;
            let load = *load;
            if load > self.resources[&c.resource.id] {
                state.violations.push(format!(
                    "resource {} over capacity: {}",
                    c.resource.id, load
                ));
            }
            let max = state
                .max_index
                .entry((c.resource.id, c.container_type.id))
                .or_insert(0);
            if c.index > *max {
                *max = c.index;
            }
        }

        fn exit(&self, c: &Container) {
            let mut state = self.state.lock().unwrap();
            state
                .live
                .remove(&(c.resource.id, c.container_type.id, c.index));
            if let Some(load) = state.load.get_mut(&c.resource.id) {
                *load -= c.container_type.needed_cores;
            }
        }

        /// Panics if any invariant was violated while tasks ran.
        fn assert_clean(&self) {
            let state = self.state.lock().unwrap();
            assert!(state.violations.is_empty(), "{:?}", state.violations);
            assert!(state.live.is_empty(), "live slots after drain");
            // Even the peak slot index must fit the capacity budget.
            for ((rid, tid), max) in &state.max_index {
                let used = (*max as f32 + 1.0) * self.types[tid];
                assert!(
                    used <= self.resources[rid],
                    "resource {} saw {} cores of type {}",
                    rid,
                    used,
                    tid
                );
            }
        }
    }

    /// A sleeping task that reports its container to the checker.
    fn checked_task(
        checker: &Arc<Checker>,
        ctype: ContainerType,
        ms: u64,
        ran: Arc<AtomicUsize>,
    ) -> TaskRef {
        let checker = Arc::clone(checker);
        TaskFn::arc(ctype, move |c: Container| {
            let checker = checker.clone();
            let ran = ran.clone();
            async move {
                checker.enter(&c);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                checker.exit(&c);
                ran.fetch_add(1, Ordering::SeqCst);
                Ok::<(), CorralError>(())
            }
        })
    }

    fn noop_task(ctype: ContainerType, ran: Arc<AtomicUsize>) -> TaskRef {
        TaskFn::arc(ctype, move |_c: Container| {
            let ran = ran.clone();
            async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok::<(), CorralError>(())
            }
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_hundred_tasks_two_resources_capacity_safe() {
        let scheduler = Scheduler::new();
        scheduler.add_resource(Resource::new(0, "r0", 10.0)).await;
        scheduler.add_resource(Resource::new(1, "r1", 18.0)).await;

        let checker = Checker::new(&[(0, 10.0), (1, 18.0)], &[(0, 4.0), (1, 1.0)]);
        let ran = Arc::new(AtomicUsize::new(0));
        let big = ContainerType::new(0, "big", 4.0);
        let small = ContainerType::new(1, "small", 1.0);

        // Submission straddles start(): half queued before, half after.
        for _ in 0..25 {
            scheduler
                .add_task(checked_task(&checker, big.clone(), 3, ran.clone()))
                .await;
            scheduler
                .add_task(checked_task(&checker, small.clone(), 2, ran.clone()))
                .await;
        }
        scheduler.start().await.unwrap();
        for _ in 0..25 {
            scheduler
                .add_task(checked_task(&checker, big.clone(), 3, ran.clone()))
                .await;
            scheduler
                .add_task(checked_task(&checker, small.clone(), 2, ran.clone()))
                .await;
        }
        scheduler.stop().await;

        assert_eq!(ran.load(Ordering::SeqCst), 100);
        checker.assert_clean();
        assert_eq!(scheduler.waiting_tasks().await, 0);
        assert_eq!(scheduler.running_tasks().await, 0);
    }

    #[tokio::test]
    async fn test_task_waits_for_late_resource() {
        let scheduler = Scheduler::new();
        let ran = Arc::new(AtomicUsize::new(0));
        scheduler
            .add_task(noop_task(ContainerType::new(0, "t0", 2.0), ran.clone()))
            .await;
        scheduler.start().await.unwrap();

        // No resource yet: the task must wait, not be lost.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.waiting_tasks().await, 1);

        scheduler.add_resource(Resource::new(0, "late", 4.0)).await;
        scheduler.stop().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_exact_capacity_serializes_and_reuses_slot_zero() {
        let scheduler = Scheduler::new();
        scheduler.add_resource(Resource::new(0, "r0", 2.0)).await;

        let live = Arc::new(AtomicUsize::new(0));
        let max_live = Arc::new(AtomicUsize::new(0));
        let indices = Arc::new(std::sync::Mutex::new(Vec::new()));
        let ctype = ContainerType::new(0, "t0", 2.0);

        for _ in 0..2 {
            let live = live.clone();
            let max_live = max_live.clone();
            let indices = indices.clone();
            scheduler
                .add_task(TaskFn::arc(ctype.clone(), move |c: Container| {
                    let live = live.clone();
                    let max_live = max_live.clone();
                    let indices = indices.clone();
                    async move {
                        let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                        max_live.fetch_max(now, Ordering::SeqCst);
                        indices.lock().unwrap().push(c.index);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        live.fetch_sub(1, Ordering::SeqCst);
                        Ok::<(), CorralError>(())
                    }
                }))
                .await;
        }

        scheduler.start().await.unwrap();
        scheduler.stop().await;

        // The resource fits exactly one instance, so the second task
        // reuses slot 0 after the first releases it.
        assert_eq!(max_live.load(Ordering::SeqCst), 1);
        assert_eq!(*indices.lock().unwrap(), vec![0, 0]);
    }

    /// Delegating algorithm that counts placements and liberations.
    struct CountingAlgorithm {
        inner: LeastCostAlgorithm,
        chosen: Arc<AtomicUsize>,
        liberated: Arc<AtomicUsize>,
    }

    impl WorkloadAlgorithm for CountingAlgorithm {
        fn add_resource(&mut self, resource: Arc<Resource>) {
            self.inner.add_resource(resource);
        }
        fn add_task(&mut self, task: TaskRef) {
            self.inner.add_task(task);
        }
        fn is_empty(&self) -> bool {
            self.inner.is_empty()
        }
        fn choose_task(&mut self) -> Option<LaunchInfo> {
            let info = self.inner.choose_task();
            if info.is_some() {
                self.chosen.fetch_add(1, Ordering::SeqCst);
            }
            info
        }
        fn liberate(&mut self, info: &LaunchInfo) {
            self.liberated.fetch_add(1, Ordering::SeqCst);
            self.inner.liberate(info);
        }
    }

    #[tokio::test]
    async fn test_each_dispatch_liberated_exactly_once() {
        let chosen = Arc::new(AtomicUsize::new(0));
        let liberated = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::with_algorithm(Box::new(CountingAlgorithm {
            inner: LeastCostAlgorithm::new(),
            chosen: chosen.clone(),
            liberated: liberated.clone(),
        }));
        scheduler.add_resource(Resource::new(0, "r0", 3.0)).await;

        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            scheduler
                .add_task(noop_task(ContainerType::new(0, "t0", 1.0), ran.clone()))
                .await;
        }
        scheduler.start().await.unwrap();
        scheduler.stop().await;

        assert_eq!(ran.load(Ordering::SeqCst), 10);
        assert_eq!(chosen.load(Ordering::SeqCst), 10);
        assert_eq!(liberated.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_failing_task_releases_capacity() {
        let scheduler = Scheduler::new();
        scheduler.add_resource(Resource::new(0, "r0", 2.0)).await;
        let ctype = ContainerType::new(0, "t0", 2.0);

        scheduler
            .add_task(TaskFn::arc(ctype.clone(), |_c: Container| async {
                Err::<(), CorralError>(CorralError::Task("expected failure".to_string()))
            }))
            .await;
        let ran = Arc::new(AtomicUsize::new(0));
        // Fits only after the failing task's slot is liberated.
        scheduler.add_task(noop_task(ctype, ran.clone())).await;

        scheduler.start().await.unwrap();
        scheduler.stop().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.running_tasks().await, 0);
    }

    #[tokio::test]
    async fn test_panicking_task_releases_capacity() {
        let scheduler = Scheduler::new();
        scheduler.add_resource(Resource::new(0, "r0", 2.0)).await;
        let ctype = ContainerType::new(0, "t0", 2.0);

        scheduler
            .add_task(TaskFn::arc(ctype.clone(), |c: Container| async move {
                if c.index == 0 {
                    panic!("expected panic");
                }
                Ok::<(), CorralError>(())
            }))
            .await;
        let ran = Arc::new(AtomicUsize::new(0));
        scheduler.add_task(noop_task(ctype, ran.clone())).await;

        scheduler.start().await.unwrap();
        scheduler.stop().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let scheduler = Scheduler::new();
        scheduler.start().await.unwrap();
        assert!(matches!(
            scheduler.start().await,
            Err(CorralError::AlreadyStarted)
        ));
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start_returns_immediately() {
        let scheduler = Scheduler::new();
        let ran = Arc::new(AtomicUsize::new(0));
        scheduler
            .add_task(noop_task(ContainerType::new(0, "t0", 1.0), ran.clone()))
            .await;
        scheduler.stop().await;

        // Nothing ran: no loops were ever started.
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.waiting_tasks().await, 1);
    }

    #[tokio::test]
    async fn test_same_task_submitted_twice_runs_twice() {
        let scheduler = Scheduler::new();
        scheduler.add_resource(Resource::new(0, "r0", 4.0)).await;
        let ran = Arc::new(AtomicUsize::new(0));
        let task = noop_task(ContainerType::new(0, "t0", 1.0), ran.clone());

        scheduler.add_task(task.clone()).await;
        scheduler.add_task(task).await;
        scheduler.start().await.unwrap();
        scheduler.stop().await;

        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }
}
