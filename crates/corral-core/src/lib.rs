//! corral-core: Core types and task contract for the corral scheduler
//!
//! This crate provides the types shared across the corral workspace:
//! - Resource and container-type descriptions
//! - The resolved Container placement handed to task bodies
//! - The Task trait and function-backed TaskFn
//! - Workload configuration
//! - Error handling

pub mod config;
pub mod error;
pub mod model;
pub mod task;

pub use config::*;
pub use error::*;
pub use model::*;
pub use task::*;
