//! Lowering tests: linearization, scoping, dimension mapping.

use squall_device::Target;
use squall_dtype::ScalarDType;
use squall_ir::{AxisKind, BinaryOp, ConstValue, RegionDefect, RegionGraph, SpecialKind};

use crate::instr::{Instr, SpecialReg};
use crate::{Error, lower};

/// `out[i] = a[i] + a[i]` over one global range.
fn doubling_kernel() -> RegionGraph {
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
    g
}

#[test]
fn global_range_lowers_to_hardware_index() {
    let program = lower(&doubling_kernel(), &Target::default()).unwrap();

    assert_eq!(program.name, "double");
    assert_eq!(program.params.len(), 2);
    assert!(program.locals.is_empty());

    // No serial loop was produced.
    assert!(!program.instrs.iter().any(|i| matches!(i, Instr::LoopBegin { .. })));
    // The range became a global index read with offset/stride arithmetic.
    assert!(program.instrs.iter().any(|i| matches!(i, Instr::Special { reg: SpecialReg::GlobalId(0), .. })));

    // Only the second parameter is written.
    assert_eq!(program.writes, vec![1]);
}

#[test]
fn serial_range_produces_balanced_loop() {
    // acc = 0; for i in 0..16 { acc += a[i] }; out[0] = acc
    let mut g = RegionGraph::new("sum");
    let a = g.buffer_param(ScalarDType::Float32);
    let out = g.buffer_param(ScalarDType::Float32);
    let zero = g.index_const(0);
    let one = g.index_const(1);
    let bound = g.index_const(16);
    let init = g.constant(ScalarDType::Float32, ConstValue::Float(0.0));
    let acc = g.define_acc(init);
    let i = g.range(AxisKind::Serial, zero, one, bound).unwrap();
    let v = g.load(a, i).unwrap();
    let sum = g.binary(BinaryOp::Add, acc, v).unwrap();
    let upd = g.assign(acc, sum).unwrap();
    let end = g.end_range(i, &[upd]).unwrap();
    let result = g.after(acc, &[end]);
    let st = g.store(out, zero, result).unwrap();
    g.sink(&[st]);

    let program = lower(&g, &Target::default()).unwrap();
    let spans = program.loop_spans().expect("balanced loops");
    assert_eq!(spans.len(), 1);
    let (begin, end) = spans[0];

    // The accumulator seed is hoisted in front of the loop.
    let first_mov = program.instrs.iter().position(|i| matches!(i, Instr::Mov { .. })).unwrap();
    assert!(first_mov < begin);

    // The load and update run inside the loop.
    let load_pos = program.instrs.iter().position(|i| matches!(i, Instr::Load { .. })).unwrap();
    assert!(begin < load_pos && load_pos < end);

    // The final store runs after the loop closes.
    let store_pos = program.instrs.iter().position(|i| matches!(i, Instr::Store { .. })).unwrap();
    assert!(store_pos > end);
}

#[test]
fn local_memory_and_barrier() {
    // tile[lid] = a[gid]; barrier; out[gid] = tile[lid]
    let mut g = RegionGraph::new("stage");
    let a = g.buffer_param(ScalarDType::Float32);
    let out = g.buffer_param(ScalarDType::Float32);
    let tile = g.define_local(ScalarDType::Float32, 32);
    let gid = g.special(SpecialKind::GlobalId, 0);
    let lid = g.special(SpecialKind::LocalId, 0);
    let v = g.load(a, gid).unwrap();
    let st = g.store(tile, lid, v).unwrap();
    let synced = g.barrier(tile, &[st]).unwrap();
    let staged = g.load(synced, lid).unwrap();
    let st2 = g.store(out, gid, staged).unwrap();
    g.sink(&[st2]);

    let program = lower(&g, &Target::default()).unwrap();

    assert_eq!(program.locals.len(), 1);
    assert_eq!(program.locals[0].elems, 32);
    let (offsets, total) = program.local_layout();
    assert_eq!(offsets, vec![0]);
    assert_eq!(total, 128);

    // The barrier sits between the local store and the re-load.
    let barrier = program.instrs.iter().position(|i| matches!(i, Instr::Barrier)).unwrap();
    let local_store = program
        .instrs
        .iter()
        .position(|i| matches!(i, Instr::Store { space: squall_dtype::AddrSpace::Local, .. }))
        .unwrap();
    let local_load = program
        .instrs
        .iter()
        .position(|i| matches!(i, Instr::Load { space: squall_dtype::AddrSpace::Local, .. }))
        .unwrap();
    assert!(local_store < barrier && barrier < local_load);

    // Local scratch is not a written parameter.
    assert_eq!(program.writes, vec![1]);
}

#[test]
fn nested_serial_ranges_nest_their_loops() {
    // acc = 0; for i in 0..4 { for j in 0..4 { acc += a[i*4 + j] } }; out[0] = acc
    let mut g = RegionGraph::new("nested");
    let a = g.buffer_param(ScalarDType::Float32);
    let out = g.buffer_param(ScalarDType::Float32);
    let zero = g.index_const(0);
    let one = g.index_const(1);
    let four = g.index_const(4);
    let init = g.constant(ScalarDType::Float32, ConstValue::Float(0.0));
    let acc = g.define_acc(init);

    let i = g.range(AxisKind::Serial, zero, one, four).unwrap();
    let j = g.range(AxisKind::Serial, zero, one, four).unwrap();
    let row = g.binary(BinaryOp::Mul, i, four).unwrap();
    let idx = g.binary(BinaryOp::Add, row, j).unwrap();
    let x = g.load(a, idx).unwrap();
    let sum = g.binary(BinaryOp::Add, acc, x).unwrap();
    let upd = g.assign(acc, sum).unwrap();
    let end_j = g.end_range(j, &[upd]).unwrap();
    let end_i = g.end_range(i, &[end_j]).unwrap();
    let total = g.after(acc, &[end_i]);
    let st = g.store(out, zero, total).unwrap();
    g.sink(&[st]);

    let program = lower(&g, &Target::default()).unwrap();
    let spans = program.loop_spans().expect("balanced loops");
    assert_eq!(spans.len(), 2);

    // Spans pop inner-first; the inner loop sits strictly inside the outer.
    let (inner_begin, inner_end) = spans[0];
    let (outer_begin, outer_end) = spans[1];
    assert!(outer_begin < inner_begin && inner_begin < inner_end && inner_end < outer_end);

    // The row computation is loop-invariant for the inner loop: it lands
    // between the two loop heads. It is the only Index-typed multiply here.
    let row_pos = program
        .instrs
        .iter()
        .position(|i| matches!(i, Instr::Binary { op: BinaryOp::Mul, dtype: ScalarDType::Index, .. }))
        .unwrap();
    assert!(outer_begin < row_pos && row_pos < inner_begin);

    let load_pos = program.instrs.iter().position(|i| matches!(i, Instr::Load { .. })).unwrap();
    assert!(inner_begin < load_pos && load_pos < inner_end);
}

#[test]
fn too_many_global_dimensions() {
    let mut g = RegionGraph::new("overdim");
    let out = g.buffer_param(ScalarDType::Float32);
    let zero = g.index_const(0);
    let one = g.index_const(1);
    let bound = g.index_const(4);
    let mut idx = None;
    for _ in 0..4 {
        idx = Some(g.range(AxisKind::Global, zero, one, bound).unwrap());
    }
    let v = g.constant(ScalarDType::Float32, ConstValue::Float(1.0));
    let st = g.store(out, idx.unwrap(), v).unwrap();
    g.sink(&[st]);

    let err = lower(&g, &Target::default()).unwrap_err();
    assert!(matches!(err, Error::Ir { source: squall_ir::Error::UnsupportedDimensionality { requested: 4, .. } }));
}

#[test]
fn special_dimension_out_of_range() {
    let mut g = RegionGraph::new("baddim");
    let out = g.buffer_param(ScalarDType::Index);
    let gid = g.special(SpecialKind::GlobalId, 3);
    let zero = g.index_const(0);
    let st = g.store(out, zero, gid).unwrap();
    g.sink(&[st]);

    let err = lower(&g, &Target::default()).unwrap_err();
    assert!(matches!(err, Error::Ir { source: squall_ir::Error::UnsupportedDimensionality { .. } }));
}

#[test]
fn unassociated_range_fails_lowering() {
    let mut g = RegionGraph::new("naked");
    let out = g.buffer_param(ScalarDType::Index);
    let bound = g.index_const(8);
    let r = g.raw_range(AxisKind::Serial, bound).unwrap();
    let st = g.store(out, r, r).unwrap();
    let end = g.end_range(r, &[st]).unwrap();
    g.sink(&[end]);

    let err = lower(&g, &Target::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::Ir {
            source: squall_ir::Error::MalformedParallelRegion { defect: RegionDefect::MissingOffset, .. }
        }
    ));
}

#[test]
fn sinkless_graph_is_invalid() {
    let g = RegionGraph::new("empty");
    let err = lower(&g, &Target::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidGraph { .. }));
}

#[test]
fn global_loads_are_header_adjusted_locals_are_not() {
    let mut g = RegionGraph::new("spaces");
    let a = g.buffer_param(ScalarDType::Float32);
    let tile = g.define_local(ScalarDType::Float32, 8);
    let lid = g.special(SpecialKind::LocalId, 0);
    let v = g.load(a, lid).unwrap();
    let st = g.store(tile, lid, v).unwrap();
    g.sink(&[st]);

    let target = Target::default();
    let program = lower(&g, &target).unwrap();

    // Exactly one emitted constant equals the header size: the global load's
    // address adjustment. The local store gets none.
    let header_consts = program
        .instrs
        .iter()
        .filter(|i| {
            matches!(i, Instr::Const { dtype: ScalarDType::UInt64, value, .. }
                if value.as_u64() == target.array_header_bytes)
        })
        .count();
    assert_eq!(header_consts, 1);
}
