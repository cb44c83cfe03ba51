//! Instruction selection tests for the packed dot-accumulate intrinsic.

use squall_device::Target;
use squall_dtype::ScalarDType;
use squall_ir::{ConstValue, RegionGraph};

use crate::instr::Instr;
use crate::{Error, lower};

/// `out[0] = dp4a(a, off_a, b, off_b, acc)`
fn dp4a_kernel(off_a: i64, off_b: i64) -> RegionGraph {
    let mut g = RegionGraph::new("dotpack");
    let a = g.buffer_param(ScalarDType::Int8);
    let b = g.buffer_param(ScalarDType::Int8);
    let out = g.buffer_param(ScalarDType::Int32);
    let oa = g.constant(ScalarDType::Int32, ConstValue::Int(off_a));
    let ob = g.constant(ScalarDType::Int32, ConstValue::Int(off_b));
    let acc = g.constant(ScalarDType::Int32, ConstValue::Int(0));
    let dot = g.dp4a(a, oa, b, ob, acc).unwrap();
    let zero = g.index_const(0);
    let st = g.store(out, zero, dot).unwrap();
    g.sink(&[st]);
    g
}

fn find_dp4a(program: &crate::KernelProgram) -> &Instr {
    program.instrs.iter().find(|i| matches!(i, Instr::Dp4a { .. })).expect("dp4a instruction emitted")
}

#[test]
fn lowers_to_a_single_atomic_record() {
    let program = lower(&dp4a_kernel(0, 4), &Target::default()).unwrap();

    // Exactly one intrinsic instruction; no scalar expansion.
    let count = program.instrs.iter().filter(|i| matches!(i, Instr::Dp4a { .. })).count();
    assert_eq!(count, 1);

    let Instr::Dp4a {
        dst,
        base_a,
        load_a,
        base_b,
        load_b,
        acc,
        offset_a,
        cnv_offset_a,
        adj_offset_a,
        offset_b,
        cnv_offset_b,
        adj_offset_b,
        addr_a,
        addr_b,
        header_size,
    } = find_dp4a(&program)
    else {
        unreachable!()
    };

    assert_eq!(*header_size, Target::default().array_header_bytes);

    // The freshly allocated storage locations are all distinct, and distinct
    // from the incoming operands.
    let regs = [
        *dst,
        *base_a,
        *load_a,
        *base_b,
        *load_b,
        *acc,
        *offset_a,
        *cnv_offset_a,
        *adj_offset_a,
        *offset_b,
        *cnv_offset_b,
        *adj_offset_b,
        *addr_a,
        *addr_b,
    ];
    let unique: std::collections::HashSet<_> = regs.iter().collect();
    assert_eq!(unique.len(), regs.len());

    // The result is i32-typed: it feeds an i32 store directly.
    let store = program.instrs.iter().find(|i| matches!(i, Instr::Store { .. })).unwrap();
    let Instr::Store { src, dtype, .. } = store else { unreachable!() };
    assert_eq!(src, dst);
    assert_eq!(*dtype, ScalarDType::Int32);
}

#[test]
fn header_size_follows_the_target() {
    // Varying the target's header constant must shift the recorded adjustment
    // by exactly that amount — nothing else in the record changes.
    let small = lower(&dp4a_kernel(8, 16), &Target::builder().array_header_bytes(24).build()).unwrap();
    let large = lower(&dp4a_kernel(8, 16), &Target::builder().array_header_bytes(64).build()).unwrap();

    let Instr::Dp4a { header_size: h0, .. } = find_dp4a(&small) else { unreachable!() };
    let Instr::Dp4a { header_size: h1, .. } = find_dp4a(&large) else { unreachable!() };
    assert_eq!(*h0, 24);
    assert_eq!(*h1, 64);
    assert_eq!(h1 - h0, 40);
}

#[test]
fn unsupported_target_refuses_compilation() {
    let target = Target::builder().supports_dp4a(false).build();
    let err = lower(&dp4a_kernel(0, 0), &target).unwrap_err();
    assert!(matches!(err, Error::UnsupportedIntrinsic { intrinsic: "dp4a" }));
}
