//! Work-grid and grid-scheduler tests.

use test_case::test_case;

use crate::error::Error;
use crate::grid::{GridScheduler, WorkGrid};

#[test]
fn constructors_pad_unused_dimensions() {
    assert_eq!(WorkGrid::d1(1024).global_work(), [1024, 1, 1]);
    assert_eq!(WorkGrid::d2(64, 32).global_work(), [64, 32, 1]);
    assert_eq!(WorkGrid::d3(8, 8, 8).global_work(), [8, 8, 8]);
    assert_eq!(WorkGrid::d2(64, 32).dimensions(), 2);
}

#[test]
fn local_work_is_staged_not_validated() {
    let mut grid = WorkGrid::d1(10);
    // Setting an incompatible local size succeeds; the check is at dispatch.
    grid.set_local_work(3, 1, 1);
    assert_eq!(grid.local_work(), Some([3, 1, 1]));

    // And a later global resize can make it compatible again.
    grid.set_global_work(12, 1, 1);
    grid.validate("t", 1024).unwrap();

    grid.clear_local_work();
    assert_eq!(grid.local_work(), None);
}

#[test_case(1024, 256, true; "divides")]
#[test_case(1024, 1024, true; "whole grid")]
#[test_case(1024, 100, false; "does not divide")]
#[test_case(1024, 0, false; "zero local")]
#[test_case(1024, 2048, false; "exceeds group limit")]
fn dispatch_validation(global: usize, local: usize, ok: bool) {
    let mut grid = WorkGrid::d1(global);
    grid.set_local_work(local, 1, 1);
    let outcome = grid.validate("t", 1024);
    assert_eq!(outcome.is_ok(), ok);
    if !ok {
        assert!(matches!(outcome.unwrap_err(), Error::GridMismatch { .. }));
    }
}

#[test]
fn unset_local_is_always_valid() {
    WorkGrid::d1(12345).validate("t", 64).unwrap();
}

#[test]
fn group_arithmetic() {
    let mut grid = WorkGrid::d1(1024);
    grid.set_local_work(256, 1, 1);
    assert_eq!(grid.num_groups(), [4, 1, 1]);
    assert_eq!(grid.effective_local(), [256, 1, 1]);
    assert_eq!(grid.total_items(), 1024);

    // Without a staged local size the whole extent is one group.
    assert_eq!(WorkGrid::d1(64).num_groups(), [1, 1, 1]);
}

#[test]
fn scheduler_resolves_registered_grids() {
    let mut scheduler = GridScheduler::new();
    scheduler.add_work_grid("s0.t0", WorkGrid::d2(16, 16));

    assert_eq!(scheduler.resolve("s0.t0", 999), WorkGrid::d2(16, 16));
    assert_eq!(scheduler.len(), 1);
}

#[test]
fn unregistered_task_gets_default_extent_grid() {
    let scheduler = GridScheduler::new();
    // Not an error: a 1D grid sized to the task's primary buffer length.
    assert_eq!(scheduler.resolve("s0.missing", 1024), WorkGrid::d1(1024));
}

#[test]
fn add_work_grid_overwrites() {
    let mut scheduler = GridScheduler::new();
    scheduler.add_work_grid("s0.t0", WorkGrid::d1(64));
    scheduler.add_work_grid("s0.t0", WorkGrid::d1(128));
    assert_eq!(scheduler.resolve("s0.t0", 1), WorkGrid::d1(128));
    assert_eq!(scheduler.len(), 1);
}

#[test]
fn staged_mutation_through_the_scheduler() {
    let mut scheduler = GridScheduler::new();
    scheduler.add_work_grid("s0.t0", WorkGrid::d1(1024));

    scheduler.work_grid_mut("s0.t0").unwrap().set_local_work(256, 1, 1);
    assert_eq!(scheduler.resolve("s0.t0", 1).local_work(), Some([256, 1, 1]));
    assert!(scheduler.work_grid_mut("s0.other").is_none());
}
