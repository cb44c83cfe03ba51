//! End-to-end packed dot-accumulate execution.

use std::sync::Arc;

use squall_device::{DeviceArray, Target};
use squall_dtype::ScalarDType;
use squall_ir::{ConstValue, RegionGraph};

use crate::devices::virt::VirtualDevice;
use crate::error::Error;
use crate::graph::{TaskArg, TaskGraph, TransferMode};
use crate::grid::{GridScheduler, WorkGrid};
use crate::plan::ExecutionPlan;

/// `out[0] = acc + dot(a[off_a..off_a+4], b[off_b..off_b+4])`
fn dp4a_kernel(off_a: i64, off_b: i64, acc: i64) -> Arc<RegionGraph> {
    let mut g = RegionGraph::new("dotpack");
    let a = g.buffer_param(ScalarDType::Int8);
    let b = g.buffer_param(ScalarDType::Int8);
    let out = g.buffer_param(ScalarDType::Int32);
    let oa = g.constant(ScalarDType::Int32, ConstValue::Int(off_a));
    let ob = g.constant(ScalarDType::Int32, ConstValue::Int(off_b));
    let seed = g.constant(ScalarDType::Int32, ConstValue::Int(acc));
    let dot = g.dp4a(a, oa, b, ob, seed).unwrap();
    let zero = g.index_const(0);
    let st = g.store(out, zero, dot).unwrap();
    g.sink(&[st]);
    Arc::new(g)
}

#[test]
fn computes_the_packed_dot_product() {
    let a = DeviceArray::from_slice(&[1i8, 2, 3, 4, 5, 6, 7, 8]);
    let b = DeviceArray::from_slice(&[1i8, 1, 1, 1, 2, 2, 2, 2]);
    let out = DeviceArray::zeroed::<i32>(1);

    let kernel = dp4a_kernel(4, 0, 10);
    let mut graph = TaskGraph::new("s0");
    graph
        .transfer_to_device(TransferMode::EveryExecution, &[a.clone(), b.clone()])
        .task("t0", &kernel, vec![TaskArg::Array(a), TaskArg::Array(b), TaskArg::Array(out.clone())])
        .unwrap()
        .transfer_to_host(TransferMode::EveryExecution, &[out.clone()]);

    let mut scheduler = GridScheduler::new();
    scheduler.add_work_grid("s0.t0", WorkGrid::d1(1));
    let mut plan = ExecutionPlan::new(graph.snapshot()).with_grid_scheduler(scheduler);
    plan.execute().unwrap();

    // a[4..8] = [5,6,7,8] dotted with b[0..4] = [1,1,1,1], plus the seed 10.
    assert_eq!(out.get::<i32>(0).unwrap(), 36);
}

#[test]
fn result_is_invariant_under_header_size() {
    // The header constant shifts every computed address by the same delta on
    // both the transfer and the addressing side, so the result is unchanged.
    for header in [8u64, 24, 64] {
        let a = DeviceArray::from_slice(&[10i8, -2, 3, 0, 1, 1, 1, 1]);
        let b = DeviceArray::from_slice(&[3i8, 5, -1, 9, 1, 1, 1, 1]);
        let out = DeviceArray::zeroed::<i32>(1);

        let kernel = dp4a_kernel(0, 0, 0);
        let mut graph = TaskGraph::new("s0");
        graph
            .transfer_to_device(TransferMode::EveryExecution, &[a.clone(), b.clone()])
            .task("t0", &kernel, vec![TaskArg::Array(a), TaskArg::Array(b), TaskArg::Array(out.clone())])
            .unwrap()
            .transfer_to_host(TransferMode::EveryExecution, &[out.clone()]);

        let device = Arc::new(VirtualDevice::new(Target::builder().array_header_bytes(header).build()));
        let mut scheduler = GridScheduler::new();
        scheduler.add_work_grid("s0.t0", WorkGrid::d1(1));
        let mut plan =
            ExecutionPlan::new(graph.snapshot()).with_grid_scheduler(scheduler).with_device(device);
        plan.execute().unwrap();

        // 10*3 + (-2)*5 + 3*(-1) + 0*9 = 17
        assert_eq!(out.get::<i32>(0).unwrap(), 17);
    }
}

#[test]
fn unsupported_target_fails_compilation() {
    let a = DeviceArray::from_slice(&[0i8; 4]);
    let b = DeviceArray::from_slice(&[0i8; 4]);
    let out = DeviceArray::zeroed::<i32>(1);

    let kernel = dp4a_kernel(0, 0, 0);
    let mut graph = TaskGraph::new("s0");
    graph
        .task("t0", &kernel, vec![TaskArg::Array(a), TaskArg::Array(b), TaskArg::Array(out)])
        .unwrap();

    let device = Arc::new(VirtualDevice::new(Target::builder().supports_dp4a(false).build()));
    let mut plan = ExecutionPlan::new(graph.snapshot()).with_device(device);
    let err = plan.execute().unwrap_err();
    assert!(matches!(
        err,
        Error::Codegen { source: squall_codegen::Error::UnsupportedIntrinsic { intrinsic: "dp4a" } }
    ));
}
