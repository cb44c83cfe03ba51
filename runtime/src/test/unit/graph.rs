//! Task-graph construction and snapshot isolation tests.

use std::sync::Arc;

use squall_device::DeviceArray;
use squall_dtype::ScalarDType;
use squall_ir::{AxisKind, BinaryOp, RegionGraph};

use crate::error::Error;
use crate::graph::{Step, TaskArg, TaskGraph, TransferMode};

/// `out[i] = a[i] + a[i]` over one global range.
pub fn doubling_kernel() -> Arc<RegionGraph> {
    let mut g = RegionGraph::new("double");
    let a = g.buffer_param(ScalarDType::Float32);
    let out = g.buffer_param(ScalarDType::Float32);
    let zero = g.index_const(0);
    let one = g.index_const(1);
    let bound = g.index_const(64);
    let i = g.range(AxisKind::Global, zero, one, bound).unwrap();
    let v = g.load(a, i).unwrap();
    let sum = g.binary(BinaryOp::Add, v, v).unwrap();
    let st = g.store(out, i, sum).unwrap();
    g.sink(&[st]);
    Arc::new(g)
}

fn args_for(kernel: &RegionGraph) -> Vec<TaskArg> {
    kernel
        .params()
        .iter()
        .map(|p| match p {
            squall_ir::ParamKind::Buffer(dtype) => {
                assert_eq!(*dtype, ScalarDType::Float32);
                TaskArg::Array(DeviceArray::zeroed::<f32>(64))
            }
            squall_ir::ParamKind::Scalar(_) => TaskArg::Scalar(0),
        })
        .collect()
}

#[test]
fn duplicate_task_name_leaves_graph_unchanged() {
    let kernel = doubling_kernel();
    let mut graph = TaskGraph::new("s0");
    graph.task("t0", &kernel, args_for(&kernel)).unwrap();
    let before = graph.len();

    let err = graph.task("t0", &kernel, args_for(&kernel)).unwrap_err();
    assert!(matches!(err, Error::DuplicateTaskName { ref name, ref graph } if name == "t0" && graph == "s0"));
    assert_eq!(graph.len(), before);
}

#[test]
fn snapshots_are_isolated_from_the_builder() {
    let kernel = doubling_kernel();
    let mut graph = TaskGraph::new("s0");
    graph
        .transfer_to_device(TransferMode::EveryExecution, &[DeviceArray::zeroed::<f32>(64)])
        .task("t0", &kernel, args_for(&kernel))
        .unwrap();

    let snap_a = graph.snapshot();
    let snap_b = graph.snapshot();

    // Identical step sequences.
    assert_eq!(snap_a.len(), snap_b.len());
    for (a, b) in snap_a.steps().iter().zip(snap_b.steps()) {
        assert_eq!(a.name(), b.name());
    }

    // Builder mutation after snapshot affects neither snapshot.
    graph.task("t1", &kernel, args_for(&kernel)).unwrap();
    assert_eq!(graph.len(), 3);
    assert_eq!(snap_a.len(), 2);
    assert_eq!(snap_b.len(), 2);
}

#[test]
fn snapshot_rejects_append() {
    let mut graph = TaskGraph::new("s0");
    graph.transfer_to_device(TransferMode::Once, &[DeviceArray::zeroed::<f32>(4)]);
    let snapshot = graph.snapshot();

    let step = Step::TransferToHost {
        name: "late".into(),
        mode: TransferMode::EveryExecution,
        arrays: vec![DeviceArray::zeroed::<f32>(4)],
    };
    let err = snapshot.append(step).unwrap_err();
    assert!(matches!(err, Error::ImmutableGraphMutation { ref graph } if graph == "s0"));
    assert_eq!(snapshot.len(), 1);
}

#[test]
fn transfer_steps_get_unique_names() {
    let mut graph = TaskGraph::new("s0");
    let a = DeviceArray::zeroed::<f32>(4);
    graph
        .transfer_to_device(TransferMode::EveryExecution, &[a.clone()])
        .transfer_to_device(TransferMode::Once, &[a.clone()])
        .transfer_to_host(TransferMode::EveryExecution, &[a]);

    let names: Vec<&str> = graph.steps().iter().map(Step::name).collect();
    assert_eq!(names, vec!["h2d0", "h2d1", "d2h2"]);
}

#[test]
fn argument_checks_are_eager() {
    let kernel = doubling_kernel();
    let mut graph = TaskGraph::new("s0");

    // Arity.
    let err = graph.task("t0", &kernel, vec![]).unwrap_err();
    assert!(matches!(err, Error::ArgumentMismatch { .. }));

    // Element dtype.
    let bad = vec![
        TaskArg::Array(DeviceArray::zeroed::<i32>(64)),
        TaskArg::Array(DeviceArray::zeroed::<f32>(64)),
    ];
    let err = graph.task("t0", &kernel, bad).unwrap_err();
    assert!(matches!(err, Error::ArgumentMismatch { .. }));

    // Kind.
    let bad = vec![TaskArg::Scalar(1), TaskArg::Array(DeviceArray::zeroed::<f32>(64))];
    let err = graph.task("t0", &kernel, bad).unwrap_err();
    assert!(matches!(err, Error::ArgumentMismatch { .. }));

    assert!(graph.is_empty());
}
