//! Region-graph construction and traversal tests.

use squall_dtype::ScalarDType;

use crate::{AxisKind, BinaryOp, ConstValue, EdgeKind, Op, RegionGraph, SpecialKind};

#[test]
fn range_association_edges_are_typed() {
    let mut g = RegionGraph::new("k");
    let offset = g.index_const(0);
    let stride = g.index_const(1);
    let bound = g.index_const(16);
    let range = g.range(AxisKind::Serial, offset, stride, bound).unwrap();

    let edges = g.edges(range);
    assert_eq!(edges.len(), 3);
    assert_eq!(edges[0], (EdgeKind::Data, bound));
    assert!(matches!(edges[1], (EdgeKind::OffsetAssociation, _)));
    assert!(matches!(edges[2], (EdgeKind::StrideAssociation, _)));

    // Wrapper nodes reference the original values.
    assert_eq!(g.offset_value(range), Some(offset));
    assert_eq!(g.stride_value(range), Some(stride));
}

#[test]
fn axis_ids_count_per_kind() {
    let mut g = RegionGraph::new("k");
    let one = g.index_const(1);
    let zero = g.index_const(0);
    let bound = g.index_const(8);

    let g0 = g.range(AxisKind::Global, zero, one, bound).unwrap();
    let g1 = g.range(AxisKind::Global, zero, one, bound).unwrap();
    let s0 = g.range(AxisKind::Serial, zero, one, bound).unwrap();

    let axis = |id| match g.op(id) {
        Op::Range { axis_id, .. } => *axis_id,
        _ => unreachable!(),
    };
    assert_eq!(axis(g0), 0);
    assert_eq!(axis(g1), 1);
    assert_eq!(axis(s0), 0);
    assert_eq!(g.axis_count(AxisKind::Global), 2);
    assert_eq!(g.axis_count(AxisKind::Serial), 1);
}

#[test]
fn toposort_orders_dependencies_first() {
    let mut g = RegionGraph::new("k");
    let buf = g.buffer_param(ScalarDType::Float32);
    let idx = g.special(SpecialKind::GlobalId, 0);
    let value = g.load(buf, idx).unwrap();
    let doubled = g.binary(BinaryOp::Add, value, value).unwrap();
    let store = g.store(buf, idx, doubled).unwrap();
    g.sink(&[store]);

    let order = g.toposort();
    let pos = |id| order.iter().position(|n| *n == id).unwrap();
    assert!(pos(buf) < pos(value));
    assert!(pos(idx) < pos(value));
    assert!(pos(value) < pos(doubled));
    assert!(pos(doubled) < pos(store));
    assert_eq!(order.len(), g.len());
}

#[test]
fn shared_value_node_between_ranges() {
    // The wrapped scalar may be shared; the wrappers themselves are per-range.
    let mut g = RegionGraph::new("k");
    let one = g.index_const(1);
    let zero = g.index_const(0);
    let bound = g.index_const(4);

    let r0 = g.range(AxisKind::Serial, zero, one, bound).unwrap();
    let r1 = g.range(AxisKind::Serial, zero, one, bound).unwrap();

    assert_eq!(g.stride_value(r0), Some(one));
    assert_eq!(g.stride_value(r1), Some(one));
    assert_ne!(g.stride_of(r0), g.stride_of(r1));
}

#[test]
fn params_recorded_in_declaration_order() {
    use crate::ParamKind;

    let mut g = RegionGraph::new("k");
    g.buffer_param(ScalarDType::Int8);
    g.scalar_param(ScalarDType::Int64);
    g.buffer_param(ScalarDType::Float32);

    assert_eq!(
        g.params(),
        &[
            ParamKind::Buffer(ScalarDType::Int8),
            ParamKind::Scalar(ScalarDType::Int64),
            ParamKind::Buffer(ScalarDType::Float32),
        ]
    );
}

#[test]
fn constant_helpers() {
    let mut g = RegionGraph::new("k");
    let c = g.constant(ScalarDType::Float32, ConstValue::Float(2.5));
    assert!(matches!(g.op(c), Op::Const(ConstValue::Float(v)) if *v == 2.5));

    let i = g.index_const(7);
    assert_eq!(*g.dtype(i), crate::DType::index());
}
