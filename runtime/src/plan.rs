//! Execution plans over immutable task graphs.
//!
//! An [`ExecutionPlan`] binds one [`ImmutableTaskGraph`] to a grid scheduler,
//! a device, and a shared kernel cache. `execute()` is synchronous: steps run
//! in declared order, transfers honor their per-step [`TransferMode`], each
//! task is compiled at most once per argument shape signature, and control
//! returns only after the device retires the last step.
//!
//! Host-side orchestration is single-threaded per plan instance. Independent
//! plans sharing a snapshot may execute concurrently, each with its own
//! scheduler and statistics.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use snafu::ResultExt;

use squall_codegen::KernelProgram;
use squall_device::DeviceArray;
use squall_ir::RegionGraph;

use crate::devices::virt::{LaunchArg, VirtualDevice};
use crate::error::{CodegenSnafu, DeviceExecutionSnafu, Result, TimeoutSnafu, TransferSnafu};
use crate::graph::{ImmutableTaskGraph, Step, TaskArg, TransferMode};
use crate::grid::{GridScheduler, WorkGrid};
use crate::kernel_cache::{KernelCache, signature_of};

/// Lifecycle of one plan instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum PlanState {
    Ready,
    Executing,
    Completed,
    Failed,
}

/// Cumulative per-plan execution counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub copies_to_device: u64,
    pub copies_to_host: u64,
    pub kernels_launched: u64,
    pub kernels_compiled: u64,
}

/// Outcome of one `execute()` call: a snapshot of the plan's counters.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionResult {
    pub stats: ExecutionStats,
}

/// Executable binding of a frozen task graph.
pub struct ExecutionPlan {
    graph: ImmutableTaskGraph,
    scheduler: GridScheduler,
    device: Arc<VirtualDevice>,
    cache: Arc<KernelCache>,
    timeout: Option<Duration>,
    state: PlanState,
    stats: ExecutionStats,
    /// Step indices whose `Once` transfer has already run.
    transferred_once: HashSet<usize>,
}

impl ExecutionPlan {
    pub fn new(graph: ImmutableTaskGraph) -> Self {
        Self {
            graph,
            scheduler: GridScheduler::new(),
            device: Arc::new(VirtualDevice::default()),
            cache: Arc::new(KernelCache::new()),
            timeout: None,
            state: PlanState::Ready,
            stats: ExecutionStats::default(),
            transferred_once: HashSet::new(),
        }
    }

    /// Attach a grid scheduler resolving per-task work grids.
    pub fn with_grid_scheduler(mut self, scheduler: GridScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Execute against a specific device instead of a fresh default one.
    pub fn with_device(mut self, device: Arc<VirtualDevice>) -> Self {
        self.device = device;
        self
    }

    /// Share a kernel cache with other plans.
    pub fn with_kernel_cache(mut self, cache: Arc<KernelCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Abort host-side waiting after this long. The device cannot cancel a
    /// running kernel; on timeout the plan is marked failed and output
    /// buffers are undefined.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn graph(&self) -> &ImmutableTaskGraph {
        &self.graph
    }

    pub fn device(&self) -> &Arc<VirtualDevice> {
        &self.device
    }

    pub fn kernel_cache(&self) -> &Arc<KernelCache> {
        &self.cache
    }

    pub fn state(&self) -> PlanState {
        self.state
    }

    pub fn stats(&self) -> ExecutionStats {
        self.stats
    }

    /// Compile every task for the current argument shapes without running
    /// transfers or dispatching anything.
    pub fn warmup(&mut self) -> Result<()> {
        let steps = self.graph.steps_shared();
        for step in steps.iter() {
            if let Step::Task { name, kernel, args } = step {
                self.compile_task(name, kernel, args)?;
            }
        }
        Ok(())
    }

    /// Run the whole graph synchronously. Steps execute in declared order;
    /// the call returns only after device-side completion of the last step.
    pub fn execute(&mut self) -> Result<ExecutionResult> {
        self.state = PlanState::Executing;
        let outcome = self.run_steps();
        self.state = if outcome.is_ok() { PlanState::Completed } else { PlanState::Failed };
        outcome
    }

    fn run_steps(&mut self) -> Result<ExecutionResult> {
        let steps = self.graph.steps_shared();
        for (step_index, step) in steps.iter().enumerate() {
            match step {
                Step::TransferToDevice { name, mode, arrays } => {
                    let header = self.device.target().array_header_bytes;
                    for array in arrays {
                        if self.should_copy_in(step_index, *mode, array) {
                            array.copy_in(self.device.memory(), header).context(TransferSnafu)?;
                            self.stats.copies_to_device += 1;
                        } else {
                            array.ensure_resident(self.device.memory(), header);
                        }
                    }
                    self.transferred_once.insert(step_index);
                    tracing::trace!(step = %name, mode = %mode, "transfer to device");
                }

                Step::Task { name, kernel, args } => {
                    self.run_task(step_index, name, kernel, args)?;
                }

                Step::TransferToHost { name, mode, arrays } => {
                    let header = self.device.target().array_header_bytes;
                    for array in arrays {
                        if self.should_copy_out(step_index, *mode, array) {
                            array.copy_out(self.device.memory(), header).context(TransferSnafu)?;
                            self.stats.copies_to_host += 1;
                        }
                    }
                    self.transferred_once.insert(step_index);
                    tracing::trace!(step = %name, mode = %mode, "transfer to host");
                }
            }
        }
        Ok(ExecutionResult { stats: self.stats })
    }

    fn should_copy_in(&self, step_index: usize, mode: TransferMode, array: &DeviceArray) -> bool {
        match mode {
            TransferMode::EveryExecution => true,
            TransferMode::Once => !self.transferred_once.contains(&step_index),
            TransferMode::UnderDemand => array.host_dirty(),
        }
    }

    fn should_copy_out(&self, step_index: usize, mode: TransferMode, array: &DeviceArray) -> bool {
        match mode {
            TransferMode::EveryExecution => true,
            TransferMode::Once => !self.transferred_once.contains(&step_index),
            TransferMode::UnderDemand => array.device_dirty(),
        }
    }

    fn compile_task(&mut self, name: &str, kernel: &Arc<RegionGraph>, args: &[TaskArg]) -> Result<Arc<KernelProgram>> {
        let qualified = format!("{}.{}", self.graph.name(), name);
        let signature = signature_of(args);
        let target = self.device.target().clone();
        let mut compiled_fresh = false;
        let program = self
            .cache
            .get_or_compile(&qualified, signature, self.device.spec(), || {
                compiled_fresh = true;
                squall_codegen::lower(kernel, &target)
            })
            .context(CodegenSnafu)?;
        if compiled_fresh {
            self.stats.kernels_compiled += 1;
            tracing::debug!(task = %qualified, instrs = program.instrs.len(), "compiled kernel");
        }
        Ok(program)
    }

    fn run_task(&mut self, step_index: usize, name: &str, kernel: &Arc<RegionGraph>, args: &[TaskArg]) -> Result<()> {
        let qualified = format!("{}.{}", self.graph.name(), name);

        // Grid resolution: explicit mapping, or a 1D default sized to the
        // task's primary buffer extent.
        let default_extent = args
            .iter()
            .find_map(|arg| match arg {
                TaskArg::Array(array) => Some(array.len()),
                TaskArg::Scalar(_) => None,
            })
            .unwrap_or(1);
        let grid = self.scheduler.resolve(&qualified, default_extent);
        grid.validate(name, self.device.target().max_local_size)?;

        let program = self.compile_task(name, kernel, args)?;

        let header = self.device.target().array_header_bytes;
        let launch_args: Vec<LaunchArg> = args
            .iter()
            .map(|arg| match arg {
                TaskArg::Array(array) => LaunchArg::Buffer(array.ensure_resident(self.device.memory(), header)),
                TaskArg::Scalar(v) => LaunchArg::Scalar(*v),
            })
            .collect();

        tracing::debug!(
            task = %qualified,
            global = ?grid.global_work(),
            local = ?grid.effective_local(),
            "dispatch kernel"
        );
        self.dispatch(step_index, name, &program, grid, launch_args)?;
        self.stats.kernels_launched += 1;

        // The kernel's stores make the bound output arrays device-fresh.
        for &param in &program.writes {
            if let TaskArg::Array(array) = &args[param] {
                array.mark_device_dirty();
            }
        }
        Ok(())
    }

    fn dispatch(
        &self,
        step_index: usize,
        name: &str,
        program: &Arc<KernelProgram>,
        grid: WorkGrid,
        launch_args: Vec<LaunchArg>,
    ) -> Result<()> {
        let global = grid.global_work();
        let local = grid.effective_local();

        let Some(timeout) = self.timeout else {
            return self
                .device
                .launch(program, global, local, &launch_args)
                .context(DeviceExecutionSnafu { task: name, step: step_index });
        };

        // Watchdog path: run the dispatch on a helper thread and bound the
        // host-side wait. A timed-out kernel keeps the device queue busy —
        // there is no mid-kernel cancellation.
        let (tx, rx) = std::sync::mpsc::channel();
        let device = Arc::clone(&self.device);
        let program = Arc::clone(program);
        std::thread::spawn(move || {
            let _ = tx.send(device.launch(&program, global, local, &launch_args));
        });
        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome.context(DeviceExecutionSnafu { task: name, step: step_index }),
            Err(_) => TimeoutSnafu { task: name, step: step_index, millis: timeout.as_millis() as u64 }.fail(),
        }
    }
}

impl std::fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("graph", &self.graph.name())
            .field("steps", &self.graph.len())
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}
