//! Task-graph execution runtime for squall kernels.
//!
//! Ties the pieces together: application code builds a [`graph::TaskGraph`]
//! of transfer and task steps, freezes it with
//! [`graph::TaskGraph::snapshot`], and wraps the snapshot in a
//! [`plan::ExecutionPlan`] together with a [`grid::GridScheduler`]. The plan
//! compiles each task's region graph through the shared
//! [`kernel_cache::KernelCache`] and dispatches it on the in-process
//! [`devices::virt::VirtualDevice`].
//!
//! ```ignore
//! let mut graph = TaskGraph::new("s0");
//! graph
//!     .transfer_to_device(TransferMode::EveryExecution, &[input.clone()])
//!     .task("t0", &kernel, vec![TaskArg::Array(input), TaskArg::Array(output.clone())])?
//!     .transfer_to_host(TransferMode::EveryExecution, &[output]);
//!
//! let mut plan = ExecutionPlan::new(graph.snapshot()).with_grid_scheduler(scheduler);
//! plan.execute()?;
//! ```

pub mod devices;
pub mod error;
pub mod graph;
pub mod grid;
pub mod kernel_cache;
pub mod plan;

#[cfg(test)]
pub mod test;

pub use devices::virt::{LaunchArg, VirtualDevice};
pub use error::{Error, Result};
pub use graph::{ImmutableTaskGraph, Step, TaskArg, TaskGraph, TransferMode};
pub use grid::{GridScheduler, WorkGrid};
pub use kernel_cache::{ArgSig, KernelCache, Signature, signature_of};
pub use plan::{ExecutionPlan, ExecutionResult, ExecutionStats, PlanState};

// Re-export the pieces application code needs to build kernels.
pub use squall_device::{DeviceArray, Target};
pub use squall_ir::{AxisKind, BinaryOp, ConstValue, RegionGraph, SpecialKind};
