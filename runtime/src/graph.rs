//! Task graphs and their immutable snapshots.
//!
//! A [`TaskGraph`] is an ordered, append-only sequence of named steps:
//! host→device transfers, kernel task invocations, and device→host
//! transfers. [`TaskGraph::snapshot`] clones the step list into an
//! [`ImmutableTaskGraph`]; the builder stays usable afterwards and later
//! appends never leak into existing snapshots.

use std::sync::Arc;

use squall_device::DeviceArray;
use squall_ir::{ParamKind, RegionGraph};

use crate::error::{Error, Result};

/// Policy governing when a buffer is copied across repeated executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum TransferMode {
    /// Re-copy on every `execute()` call.
    EveryExecution,
    /// Copy only on the plan's first execution.
    Once,
    /// Copy only when the source side is marked dirty.
    UnderDemand,
}

/// One bound task argument.
#[derive(Debug, Clone)]
pub enum TaskArg {
    Array(DeviceArray),
    Scalar(i64),
}

/// One step of a task graph.
#[derive(Debug, Clone)]
pub enum Step {
    TransferToDevice { name: String, mode: TransferMode, arrays: Vec<DeviceArray> },
    Task { name: String, kernel: Arc<RegionGraph>, args: Vec<TaskArg> },
    TransferToHost { name: String, mode: TransferMode, arrays: Vec<DeviceArray> },
}

impl Step {
    pub fn name(&self) -> &str {
        match self {
            Self::TransferToDevice { name, .. } | Self::Task { name, .. } | Self::TransferToHost { name, .. } => name,
        }
    }
}

/// Append-only builder for an ordered step sequence.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    name: String,
    steps: Vec<Step>,
    transfer_counter: usize,
}

impl TaskGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), steps: Vec::new(), transfer_counter: 0 }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn fresh_transfer_name(&mut self, prefix: &str) -> String {
        loop {
            let name = format!("{prefix}{}", self.transfer_counter);
            self.transfer_counter += 1;
            if !self.steps.iter().any(|s| s.name() == name) {
                return name;
            }
        }
    }

    /// Append a host→device transfer step. Transfer steps are auto-named.
    pub fn transfer_to_device(&mut self, mode: TransferMode, arrays: &[DeviceArray]) -> &mut Self {
        let name = self.fresh_transfer_name("h2d");
        self.steps.push(Step::TransferToDevice { name, mode, arrays: arrays.to_vec() });
        self
    }

    /// Append a device→host transfer step. Transfer steps are auto-named.
    pub fn transfer_to_host(&mut self, mode: TransferMode, arrays: &[DeviceArray]) -> &mut Self {
        let name = self.fresh_transfer_name("d2h");
        self.steps.push(Step::TransferToHost { name, mode, arrays: arrays.to_vec() });
        self
    }

    /// Append a kernel invocation step.
    ///
    /// The name must be unique within the graph; a duplicate fails with
    /// [`Error::DuplicateTaskName`] and leaves the step sequence unchanged.
    /// Arguments are checked eagerly against the kernel's parameter list.
    pub fn task(&mut self, name: impl Into<String>, kernel: &Arc<RegionGraph>, args: Vec<TaskArg>) -> Result<&mut Self> {
        let name = name.into();
        if self.steps.iter().any(|s| s.name() == name) {
            return Err(Error::DuplicateTaskName { graph: self.name.clone(), name });
        }
        check_args(&name, kernel, &args)?;
        self.steps.push(Step::Task { name, kernel: Arc::clone(kernel), args });
        Ok(self)
    }

    /// Freeze the current step sequence into an immutable snapshot.
    ///
    /// The builder remains usable; snapshots taken at different times are
    /// fully isolated from each other and from later appends.
    pub fn snapshot(&self) -> ImmutableTaskGraph {
        ImmutableTaskGraph { name: self.name.clone(), steps: self.steps.clone().into() }
    }
}

fn check_args(task: &str, kernel: &RegionGraph, args: &[TaskArg]) -> Result<()> {
    let params = kernel.params();
    if params.len() != args.len() {
        return Err(Error::ArgumentMismatch {
            task: task.to_owned(),
            reason: format!("kernel takes {} parameters, {} arguments bound", params.len(), args.len()),
        });
    }
    for (i, (param, arg)) in params.iter().zip(args).enumerate() {
        match (param, arg) {
            (ParamKind::Buffer(elem), TaskArg::Array(array)) => {
                if array.dtype() != *elem {
                    return Err(Error::ArgumentMismatch {
                        task: task.to_owned(),
                        reason: format!("argument {i}: kernel expects {elem} elements, array holds {}", array.dtype()),
                    });
                }
            }
            (ParamKind::Scalar(_), TaskArg::Scalar(_)) => {}
            (param, _) => {
                return Err(Error::ArgumentMismatch {
                    task: task.to_owned(),
                    reason: format!("argument {i}: kind does not match parameter {param:?}"),
                });
            }
        }
    }
    Ok(())
}

/// Frozen snapshot of a task graph.
///
/// Cheap to clone (the step list is shared) and safe to execute repeatedly
/// and concurrently from multiple execution plans, each with its own grid
/// scheduler.
#[derive(Debug, Clone)]
pub struct ImmutableTaskGraph {
    name: String,
    steps: Arc<[Step]>,
}

impl ImmutableTaskGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The shared step list, cloneable without copying steps.
    pub fn steps_shared(&self) -> Arc<[Step]> {
        Arc::clone(&self.steps)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Snapshots reject step insertion.
    pub fn append(&self, _step: Step) -> Result<()> {
        Err(Error::ImmutableGraphMutation { graph: self.name.clone() })
    }
}
