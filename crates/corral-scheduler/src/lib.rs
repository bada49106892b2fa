//! corral-scheduler: Capacity-aware scheduling for corral
//!
//! This crate provides the two halves of the scheduler:
//! - The placement seam ([`WorkloadAlgorithm`]) with its reference
//!   least-cost implementation ([`LeastCostAlgorithm`])
//! - The scheduling engine ([`Scheduler`]) that dispatches tasks,
//!   runs them concurrently, and releases their slots on completion

pub mod algorithm;
pub mod least_cost;
pub mod scheduler;

pub use algorithm::{LaunchInfo, WorkloadAlgorithm};
pub use least_cost::LeastCostAlgorithm;
pub use scheduler::Scheduler;
