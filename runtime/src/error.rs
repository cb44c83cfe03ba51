//! Error types for task-graph construction and execution.

use snafu::Snafu;

/// Result type for runtime operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Step name already present in the task graph.
    #[snafu(display("duplicate task name `{name}` in task graph `{graph}`"))]
    DuplicateTaskName { graph: String, name: String },

    /// Append attempted on a frozen snapshot.
    #[snafu(display("task graph `{graph}` is immutable after snapshot"))]
    ImmutableGraphMutation { graph: String },

    /// Local work size incompatible with the global size, detected at dispatch.
    #[snafu(display("grid mismatch for task `{task}`: local {local:?} incompatible with global {global:?}"))]
    GridMismatch { task: String, global: [usize; 3], local: [usize; 3] },

    /// Fatal device-side failure. Output buffers are left undefined.
    #[snafu(display("device execution failed in task `{task}` (step {step}): {source}"))]
    DeviceExecution { task: String, step: usize, source: squall_device::Error },

    /// Host-side wait aborted; the kernel may still be running on the device
    /// and output buffers must be treated as undefined.
    #[snafu(display("task `{task}` (step {step}) timed out after {millis} ms"))]
    Timeout { task: String, step: usize, millis: u64 },

    /// Kernel compilation failed for one task.
    #[snafu(display("compilation failed: {source}"))]
    Codegen { source: squall_codegen::Error },

    /// Host/device data movement failed.
    #[snafu(display("transfer failed: {source}"))]
    Transfer { source: squall_device::Error },

    /// Task arguments do not match the kernel's parameter list.
    #[snafu(display("task `{task}` argument mismatch: {reason}"))]
    ArgumentMismatch { task: String, reason: String },
}
