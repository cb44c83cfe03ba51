//! Operation enum for region-graph nodes.
//!
//! Each operation encodes its data operands directly in the enum variant as
//! [`NodeId`]s into the owning graph's arena. Association edges (range to
//! offset/stride) are deliberately NOT operands — they live in the graph's
//! link table so that structural relationships stay distinguishable from
//! dataflow.

use smallvec::SmallVec;

use crate::graph::NodeId;
use crate::types::{AxisKind, BinaryOp, ConstValue, SpecialKind, UnaryOp};

/// Operation with typed operands.
///
/// Fixed-arity operations carry their operands inline; variable-arity effect
/// lists use `SmallVec` to avoid heap allocation for the common small cases.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    // Nullary operations
    Const(ConstValue),
    /// Kernel buffer parameter (position in the task's argument list).
    BufferParam(usize),
    /// Kernel scalar parameter (position in the task's argument list).
    ScalarParam(usize),
    /// Group-local scratch array of `elems` elements.
    DefineLocal { elems: usize },
    /// Hardware index register for one grid dimension.
    Special { kind: SpecialKind, dim: u8 },

    // Arithmetic
    Unary(UnaryOp, NodeId),
    Binary(BinaryOp, NodeId, NodeId),
    /// Conversion to this node's dtype.
    Cast { src: NodeId },

    // Parallel-region structure
    /// Per-iteration index of one loop dimension. The index sequence is
    /// `offset + k * stride` for `k = 0, 1, ...` while the value stays below
    /// `bound`; offset and stride are attached as association edges.
    Range { bound: NodeId, axis_id: usize, axis: AxisKind },
    /// Wraps the scalar value acting as a range's starting offset.
    Offset { value: NodeId },
    /// Wraps the scalar value acting as a range's per-iteration step.
    Stride { value: NodeId },
    /// Closes a serial range's scope; `deps` are the effects that must
    /// complete inside every iteration.
    EndRange { range: NodeId, deps: SmallVec<[NodeId; 2]> },

    // Serial accumulation
    /// Accumulator register seeded with `init` before the enclosing loop.
    DefineAcc { init: NodeId },
    /// In-place accumulator update.
    Assign { acc: NodeId, value: NodeId },
    /// Value passthrough ordered after the given effects.
    After { passthrough: NodeId, deps: SmallVec<[NodeId; 2]> },

    // Memory
    Load { buffer: NodeId, index: NodeId },
    Store { buffer: NodeId, index: NodeId, value: NodeId },
    StoreGated { buffer: NodeId, index: NodeId, value: NodeId, gate: NodeId },
    /// Group-wide execution barrier; passes `buffer` through so subsequent
    /// loads are ordered after the preceding `deps`.
    Barrier { buffer: NodeId, deps: SmallVec<[NodeId; 2]> },

    /// Packed 4x8-bit dot-product-accumulate intrinsic.
    ///
    /// `a` and `b` are i8 buffers, `offset_a`/`offset_b` are logical element
    /// indices into them, `acc` is the i32 accumulator. Lowering adjusts the
    /// offsets by the target's array-header size before forming addresses.
    Dp4a { a: NodeId, offset_a: NodeId, b: NodeId, offset_b: NodeId, acc: NodeId },

    /// Graph root collecting all externally visible effects.
    Sink { effects: SmallVec<[NodeId; 4]> },
}

impl Op {
    /// Data-edge children of this operation, in operand order.
    ///
    /// Association edges are not included; traverse them through
    /// [`RegionGraph::offset_of`](crate::graph::RegionGraph::offset_of) and
    /// [`RegionGraph::stride_of`](crate::graph::RegionGraph::stride_of).
    pub fn children(&self) -> SmallVec<[NodeId; 4]> {
        match self {
            Self::Const(_)
            | Self::BufferParam(_)
            | Self::ScalarParam(_)
            | Self::DefineLocal { .. }
            | Self::Special { .. } => SmallVec::new(),

            Self::Unary(_, a) | Self::Cast { src: a } | Self::Offset { value: a } | Self::Stride { value: a } => {
                SmallVec::from_slice(&[*a])
            }

            Self::Binary(_, a, b)
            | Self::Assign { acc: a, value: b }
            | Self::Load { buffer: a, index: b } => SmallVec::from_slice(&[*a, *b]),

            Self::Range { bound, .. } | Self::DefineAcc { init: bound } => SmallVec::from_slice(&[*bound]),

            Self::EndRange { range, deps } => {
                let mut out = SmallVec::from_slice(&[*range]);
                out.extend_from_slice(deps);
                out
            }

            Self::After { passthrough, deps } => {
                let mut out = SmallVec::from_slice(&[*passthrough]);
                out.extend_from_slice(deps);
                out
            }

            Self::Store { buffer, index, value } => SmallVec::from_slice(&[*buffer, *index, *value]),

            Self::StoreGated { buffer, index, value, gate } => {
                SmallVec::from_slice(&[*buffer, *index, *value, *gate])
            }

            Self::Barrier { buffer, deps } => {
                let mut out = SmallVec::from_slice(&[*buffer]);
                out.extend_from_slice(deps);
                out
            }

            Self::Dp4a { a, offset_a, b, offset_b, acc } => {
                SmallVec::from_slice(&[*a, *offset_a, *b, *offset_b, *acc])
            }

            Self::Sink { effects } => effects.clone(),
        }
    }
}
