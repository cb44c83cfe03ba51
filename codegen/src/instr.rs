//! Virtual-ISA instruction records.
//!
//! Lowering emits an ordered instruction list over an unbounded virtual
//! register file. The list is the hand-off format to the backend: a native
//! assembler would encode it, the in-process virtual accelerator interprets
//! it directly.

use squall_dtype::{AddrSpace, ScalarDType};
use squall_ir::{BinaryOp, ConstValue, ParamKind, UnaryOp};

/// Virtual register index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(pub u32);

impl VReg {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for VReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%r{}", self.0)
    }
}

/// Hardware special register, per grid dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialReg {
    GlobalId(u8),
    LocalId(u8),
    GroupId(u8),
    LocalSize(u8),
    NumGroups(u8),
}

/// One lowered instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Const {
        dst: VReg,
        dtype: ScalarDType,
        value: ConstValue,
    },
    /// Read a kernel parameter: buffer parameters yield the buffer's base
    /// address, scalar parameters the bound value.
    LoadParam {
        dst: VReg,
        param: usize,
    },
    /// Base offset of a group-local scratch allocation.
    LocalBase {
        dst: VReg,
        local: usize,
    },
    /// Read a hardware index register.
    Special {
        dst: VReg,
        reg: SpecialReg,
    },
    Unary {
        dst: VReg,
        op: UnaryOp,
        src: VReg,
        dtype: ScalarDType,
    },
    Binary {
        dst: VReg,
        op: BinaryOp,
        lhs: VReg,
        rhs: VReg,
        /// Operand dtype; comparisons still produce Bool.
        dtype: ScalarDType,
    },
    Cast {
        dst: VReg,
        src: VReg,
        to: ScalarDType,
    },
    Mov {
        dst: VReg,
        src: VReg,
    },
    Load {
        dst: VReg,
        addr: VReg,
        dtype: ScalarDType,
        space: AddrSpace,
    },
    Store {
        addr: VReg,
        src: VReg,
        dtype: ScalarDType,
        space: AddrSpace,
        /// Predicate register; the store retires only when it holds true.
        gate: Option<VReg>,
    },
    /// Head of a counted loop: `var` starts at `offset` and advances by
    /// `stride` while it stays below `bound`. Bodies nest; every `LoopBegin`
    /// is closed by the matching `LoopEnd`.
    LoopBegin {
        var: VReg,
        offset: VReg,
        stride: VReg,
        bound: VReg,
    },
    LoopEnd,
    /// Group-wide execution barrier.
    Barrier,
    /// Packed 4x8-bit dot-product-accumulate, one atomic statement.
    ///
    /// Carries the complete operand record: raw element offsets, their
    /// widened and header-adjusted forms, both effective addresses, the
    /// packed-word load placeholders, and the header constant itself.
    Dp4a {
        dst: VReg,
        base_a: VReg,
        load_a: VReg,
        base_b: VReg,
        load_b: VReg,
        acc: VReg,
        offset_a: VReg,
        cnv_offset_a: VReg,
        adj_offset_a: VReg,
        offset_b: VReg,
        cnv_offset_b: VReg,
        adj_offset_b: VReg,
        addr_a: VReg,
        addr_b: VReg,
        header_size: u64,
    },
}

/// Group-local scratch allocation requested by a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSpec {
    pub elems: usize,
    pub dtype: ScalarDType,
}

/// A lowered, dispatch-ready kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelProgram {
    pub name: String,
    pub instrs: Vec<Instr>,
    /// Number of virtual registers used.
    pub vregs: u32,
    /// Parameter layout, in task-argument order.
    pub params: Vec<ParamKind>,
    /// Group-local allocations, in definition order.
    pub locals: Vec<LocalSpec>,
    /// Parameter indices the kernel stores to (sorted, deduplicated).
    pub writes: Vec<usize>,
}

impl KernelProgram {
    /// Byte offsets of each local allocation within the group arena, plus the
    /// arena's total size. Allocations are 16-byte aligned.
    pub fn local_layout(&self) -> (Vec<u64>, u64) {
        let mut offsets = Vec::with_capacity(self.locals.len());
        let mut cursor = 0u64;
        for local in &self.locals {
            offsets.push(cursor);
            let bytes = (local.elems * local.dtype.bytes()) as u64;
            cursor += bytes.next_multiple_of(16);
        }
        (offsets, cursor)
    }

    /// Match each `LoopBegin` with its `LoopEnd` by position. Returns `None`
    /// for unbalanced programs (a lowering bug, not a user error).
    pub fn loop_spans(&self) -> Option<Vec<(usize, usize)>> {
        let mut stack = Vec::new();
        let mut spans = Vec::new();
        for (pc, instr) in self.instrs.iter().enumerate() {
            match instr {
                Instr::LoopBegin { .. } => stack.push(pc),
                Instr::LoopEnd => spans.push((stack.pop()?, pc)),
                _ => {}
            }
        }
        stack.is_empty().then_some(spans)
    }
}
