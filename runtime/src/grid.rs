//! Work-grid model and grid scheduling.
//!
//! A [`WorkGrid`] describes the iteration space of one kernel dispatch:
//! global size per dimension plus an optional local (group) size. Grids stay
//! mutable until the execution that uses them launches; local/global
//! compatibility is checked at dispatch, not at set time, so sizes can be
//! staged in any order.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Global/local iteration-space descriptor for one kernel dispatch (1-3D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkGrid {
    dims: usize,
    global: [usize; 3],
    local: Option<[usize; 3]>,
}

impl WorkGrid {
    /// One-dimensional grid of `x` work-items.
    pub fn d1(x: usize) -> Self {
        Self { dims: 1, global: [x, 1, 1], local: None }
    }

    /// Two-dimensional grid.
    pub fn d2(x: usize, y: usize) -> Self {
        Self { dims: 2, global: [x, y, 1], local: None }
    }

    /// Three-dimensional grid.
    pub fn d3(x: usize, y: usize, z: usize) -> Self {
        Self { dims: 3, global: [x, y, z], local: None }
    }

    pub fn dimensions(&self) -> usize {
        self.dims
    }

    pub fn global_work(&self) -> [usize; 3] {
        self.global
    }

    /// Explicit local size, if one was staged.
    pub fn local_work(&self) -> Option<[usize; 3]> {
        self.local
    }

    pub fn set_global_work(&mut self, x: usize, y: usize, z: usize) {
        self.global = [x, y, z];
    }

    pub fn set_local_work(&mut self, x: usize, y: usize, z: usize) {
        self.local = Some([x, y, z]);
    }

    /// Drop the staged local size; the backend picks one at dispatch.
    pub fn clear_local_work(&mut self) {
        self.local = None;
    }

    /// Effective group size: the staged local size, or the whole global
    /// extent when none was staged (backend default: one group).
    pub fn effective_local(&self) -> [usize; 3] {
        self.local.unwrap_or(self.global)
    }

    /// Groups per dimension under the effective local size.
    pub fn num_groups(&self) -> [usize; 3] {
        let local = self.effective_local();
        [self.global[0] / local[0].max(1), self.global[1] / local[1].max(1), self.global[2] / local[2].max(1)]
    }

    pub fn total_items(&self) -> usize {
        self.global.iter().product()
    }

    /// Dispatch-time validation: a staged local size must be nonzero, divide
    /// the global size per dimension, and fit the target's group limit.
    pub fn validate(&self, task: &str, max_local_size: usize) -> Result<()> {
        let Some(local) = self.local else {
            return Ok(());
        };
        let divides = local.iter().zip(self.global).all(|(l, g)| *l != 0 && g % l == 0);
        if !divides || local.iter().product::<usize>() > max_local_size {
            return Err(Error::GridMismatch { task: task.to_owned(), global: self.global, local });
        }
        Ok(())
    }
}

/// Maps task-qualified names (`<graph>.<task>`) to work grids.
///
/// Scheduler lifetime is scoped to one execution invocation; entries can be
/// inserted or overwritten but never removed.
#[derive(Debug, Clone, Default)]
pub struct GridScheduler {
    grids: HashMap<String, WorkGrid>,
}

impl GridScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the grid for a qualified task name.
    pub fn add_work_grid(&mut self, name: impl Into<String>, grid: WorkGrid) {
        self.grids.insert(name.into(), grid);
    }

    pub fn get(&self, name: &str) -> Option<&WorkGrid> {
        self.grids.get(name)
    }

    /// Staged mutation of a registered grid before launch.
    pub fn work_grid_mut(&mut self, name: &str) -> Option<&mut WorkGrid> {
        self.grids.get_mut(name)
    }

    /// Grid for a task, falling back to a default one-dimensional grid sized
    /// to the task's primary data extent.
    pub fn resolve(&self, name: &str, default_extent: usize) -> WorkGrid {
        self.grids.get(name).copied().unwrap_or_else(|| WorkGrid::d1(default_extent))
    }

    pub fn len(&self) -> usize {
        self.grids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }
}
