//! Arena-indexed region graph.
//!
//! Nodes live in a flat arena and reference each other by [`NodeId`]. Data
//! operands are stored inside [`Op`] variants; the range↔offset/stride
//! relationship is a separate, typed association table so that structural
//! edges never masquerade as dataflow. Once a range's offset or stride is
//! associated it cannot be rebound.

use std::collections::HashMap;

use smallvec::SmallVec;
use squall_dtype::{AddrSpace, DType, ScalarDType};

use crate::error::{Error, RegionDefect, Result};
use crate::op::Op;
use crate::types::{AxisKind, BinaryOp, ConstValue, EdgeKind, SpecialKind, UnaryOp};

/// Index of a node in a [`RegionGraph`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A single node: operation plus result dtype.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    op: Op,
    dtype: DType,
}

impl Node {
    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn dtype(&self) -> &DType {
        &self.dtype
    }
}

/// Kernel parameter descriptor, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Buffer(ScalarDType),
    Scalar(ScalarDType),
}

/// Association links of one range node. Write-once per slot.
#[derive(Debug, Clone, Copy, Default)]
struct RangeLinks {
    offset: Option<NodeId>,
    stride: Option<NodeId>,
}

/// A parallel-region computation graph for one kernel.
///
/// Mutable while being built; frozen by convention once handed to a task
/// graph (the runtime shares it behind an `Arc` and never mutates).
#[derive(Debug, Clone)]
pub struct RegionGraph {
    name: String,
    nodes: Vec<Node>,
    links: HashMap<NodeId, RangeLinks>,
    params: Vec<ParamKind>,
    sink: Option<NodeId>,
    global_axes: usize,
    local_axes: usize,
    serial_axes: usize,
}

impl RegionGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            links: HashMap::new(),
            params: Vec::new(),
            sink: None,
            global_axes: 0,
            local_axes: 0,
            serial_axes: 0,
        }
    }

    fn push(&mut self, op: Op, dtype: DType) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { op, dtype });
        id
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn op(&self, id: NodeId) -> &Op {
        &self.nodes[id.index()].op
    }

    pub fn dtype(&self, id: NodeId) -> &DType {
        &self.nodes[id.index()].dtype
    }

    pub fn params(&self) -> &[ParamKind] {
        &self.params
    }

    pub fn sink_id(&self) -> Option<NodeId> {
        self.sink
    }

    pub fn axis_count(&self, axis: AxisKind) -> usize {
        match axis {
            AxisKind::Global => self.global_axes,
            AxisKind::Local => self.local_axes,
            AxisKind::Serial => self.serial_axes,
        }
    }

    /// Offset wrapper node associated with `range`, if any.
    pub fn offset_of(&self, range: NodeId) -> Option<NodeId> {
        self.links.get(&range).and_then(|l| l.offset)
    }

    /// Stride wrapper node associated with `range`, if any.
    pub fn stride_of(&self, range: NodeId) -> Option<NodeId> {
        self.links.get(&range).and_then(|l| l.stride)
    }

    /// The scalar value wrapped by the range's offset node.
    pub fn offset_value(&self, range: NodeId) -> Option<NodeId> {
        match self.offset_of(range).map(|id| self.op(id)) {
            Some(Op::Offset { value }) => Some(*value),
            _ => None,
        }
    }

    /// The scalar value wrapped by the range's stride node.
    pub fn stride_value(&self, range: NodeId) -> Option<NodeId> {
        match self.stride_of(range).map(|id| self.op(id)) {
            Some(Op::Stride { value }) => Some(*value),
            _ => None,
        }
    }

    /// All outgoing edges of a node, tagged by kind.
    pub fn edges(&self, id: NodeId) -> SmallVec<[(EdgeKind, NodeId); 4]> {
        let mut out: SmallVec<[(EdgeKind, NodeId); 4]> =
            self.op(id).children().into_iter().map(|c| (EdgeKind::Data, c)).collect();
        if let Some(links) = self.links.get(&id) {
            if let Some(offset) = links.offset {
                out.push((EdgeKind::OffsetAssociation, offset));
            }
            if let Some(stride) = links.stride {
                out.push((EdgeKind::StrideAssociation, stride));
            }
        }
        out
    }

    /// All range nodes in arena order.
    pub fn ranges(&self) -> Vec<NodeId> {
        (0..self.nodes.len() as u32)
            .map(NodeId)
            .filter(|id| matches!(self.op(*id), Op::Range { .. }))
            .collect()
    }

    // =========================================================================
    // Leaf constructors
    // =========================================================================

    pub fn constant(&mut self, dtype: ScalarDType, value: ConstValue) -> NodeId {
        self.push(Op::Const(value), dtype.into())
    }

    pub fn index_const(&mut self, value: i64) -> NodeId {
        self.constant(ScalarDType::Index, ConstValue::Int(value))
    }

    pub fn buffer_param(&mut self, elem: ScalarDType) -> NodeId {
        let index = self.params.len();
        self.params.push(ParamKind::Buffer(elem));
        self.push(Op::BufferParam(index), DType::from(elem).ptr(AddrSpace::Global))
    }

    pub fn scalar_param(&mut self, dtype: ScalarDType) -> NodeId {
        let index = self.params.len();
        self.params.push(ParamKind::Scalar(dtype));
        self.push(Op::ScalarParam(index), dtype.into())
    }

    pub fn define_local(&mut self, elem: ScalarDType, elems: usize) -> NodeId {
        self.push(Op::DefineLocal { elems }, DType::from(elem).ptr(AddrSpace::Local))
    }

    pub fn special(&mut self, kind: SpecialKind, dim: u8) -> NodeId {
        self.push(Op::Special { kind, dim }, DType::index())
    }

    // =========================================================================
    // Arithmetic
    // =========================================================================

    pub fn unary(&mut self, op: UnaryOp, src: NodeId) -> NodeId {
        let dtype = self.dtype(src).clone();
        self.push(Op::Unary(op, src), dtype)
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> Result<NodeId> {
        let lt = self.dtype(lhs).clone();
        let rt = self.dtype(rhs).clone();
        if lt != rt || lt.is_ptr() || (op.is_bitwise() && lt.is_float()) {
            return Err(Error::DTypeMismatch { lhs: lt, rhs: rt });
        }
        let dtype = if op.is_comparison() { DType::bool_() } else { lt };
        Ok(self.push(Op::Binary(op, lhs, rhs), dtype))
    }

    pub fn cast(&mut self, src: NodeId, to: ScalarDType) -> NodeId {
        self.push(Op::Cast { src }, to.into())
    }

    // =========================================================================
    // Parallel-region structure
    // =========================================================================

    /// Create a range with its offset and stride attached in one step.
    ///
    /// This is the normal construction path; [`raw_range`](Self::raw_range)
    /// plus the `associate_*` methods exist for front-ends that discover the
    /// loop structure incrementally.
    pub fn range(&mut self, axis: AxisKind, offset: NodeId, stride: NodeId, bound: NodeId) -> Result<NodeId> {
        let range = self.raw_range(axis, bound)?;
        self.associate_offset(range, offset)?;
        self.associate_stride(range, stride)?;
        Ok(range)
    }

    /// Create a range node without associations. Lowering rejects it until
    /// both offset and stride are attached.
    pub fn raw_range(&mut self, axis: AxisKind, bound: NodeId) -> Result<NodeId> {
        self.expect_index(bound)?;
        let axis_id = match axis {
            AxisKind::Global => {
                self.global_axes += 1;
                self.global_axes - 1
            }
            AxisKind::Local => {
                self.local_axes += 1;
                self.local_axes - 1
            }
            AxisKind::Serial => {
                self.serial_axes += 1;
                self.serial_axes - 1
            }
        };
        let id = self.push(Op::Range { bound, axis_id, axis }, DType::index());
        self.links.insert(id, RangeLinks::default());
        Ok(id)
    }

    /// Attach the starting offset of `range`. Write-once.
    pub fn associate_offset(&mut self, range: NodeId, value: NodeId) -> Result<NodeId> {
        self.expect_index(value)?;
        self.check_association(range, |l| l.offset)?;
        let wrapper = self.push(Op::Offset { value }, DType::index());
        self.links.get_mut(&range).expect("checked above").offset = Some(wrapper);
        Ok(wrapper)
    }

    /// Attach the per-iteration stride of `range`. Write-once; a stride that
    /// statically resolves to zero is rejected eagerly.
    pub fn associate_stride(&mut self, range: NodeId, value: NodeId) -> Result<NodeId> {
        self.expect_index(value)?;
        self.check_association(range, |l| l.stride)?;
        if let Op::Const(c) = self.op(value)
            && c.is_zero()
        {
            return Err(Error::MalformedParallelRegion { range, defect: RegionDefect::ZeroStride });
        }
        let wrapper = self.push(Op::Stride { value }, DType::index());
        self.links.get_mut(&range).expect("checked above").stride = Some(wrapper);
        Ok(wrapper)
    }

    fn check_association(&self, range: NodeId, slot: impl Fn(&RangeLinks) -> Option<NodeId>) -> Result<()> {
        let Some(links) = self.links.get(&range) else {
            return Err(Error::MalformedParallelRegion { range, defect: RegionDefect::NotARange });
        };
        if slot(links).is_some() {
            return Err(Error::MalformedParallelRegion { range, defect: RegionDefect::Rebound });
        }
        Ok(())
    }

    /// Close a serial range's scope. `deps` are the per-iteration effects.
    pub fn end_range(&mut self, range: NodeId, deps: &[NodeId]) -> Result<NodeId> {
        if !matches!(self.op(range), Op::Range { .. }) {
            return Err(Error::MalformedParallelRegion { range, defect: RegionDefect::NotARange });
        }
        Ok(self.push(Op::EndRange { range, deps: SmallVec::from_slice(deps) }, DType::void_()))
    }

    // =========================================================================
    // Serial accumulation
    // =========================================================================

    pub fn define_acc(&mut self, init: NodeId) -> NodeId {
        let dtype = self.dtype(init).clone();
        self.push(Op::DefineAcc { init }, dtype)
    }

    pub fn assign(&mut self, acc: NodeId, value: NodeId) -> Result<NodeId> {
        if !matches!(self.op(acc), Op::DefineAcc { .. }) {
            return Err(Error::NotAnAccumulator { node: acc });
        }
        let at = self.dtype(acc).clone();
        let vt = self.dtype(value).clone();
        if at != vt {
            return Err(Error::DTypeMismatch { lhs: at, rhs: vt });
        }
        Ok(self.push(Op::Assign { acc, value }, at))
    }

    pub fn after(&mut self, passthrough: NodeId, deps: &[NodeId]) -> NodeId {
        let dtype = self.dtype(passthrough).clone();
        self.push(Op::After { passthrough, deps: SmallVec::from_slice(deps) }, dtype)
    }

    // =========================================================================
    // Memory
    // =========================================================================

    pub fn load(&mut self, buffer: NodeId, index: NodeId) -> Result<NodeId> {
        let elem = self.expect_buffer(buffer)?;
        self.expect_index(index)?;
        Ok(self.push(Op::Load { buffer, index }, elem.into()))
    }

    pub fn store(&mut self, buffer: NodeId, index: NodeId, value: NodeId) -> Result<NodeId> {
        let elem = self.expect_buffer(buffer)?;
        self.expect_index(index)?;
        let vt = self.dtype(value).clone();
        if vt != DType::from(elem) {
            return Err(Error::DTypeMismatch { lhs: elem.into(), rhs: vt });
        }
        Ok(self.push(Op::Store { buffer, index, value }, DType::void_()))
    }

    pub fn store_gated(&mut self, buffer: NodeId, index: NodeId, value: NodeId, gate: NodeId) -> Result<NodeId> {
        let elem = self.expect_buffer(buffer)?;
        self.expect_index(index)?;
        let vt = self.dtype(value).clone();
        if vt != DType::from(elem) {
            return Err(Error::DTypeMismatch { lhs: elem.into(), rhs: vt });
        }
        let gt = self.dtype(gate).clone();
        if !gt.is_bool() {
            return Err(Error::DTypeMismatch { lhs: DType::bool_(), rhs: gt });
        }
        Ok(self.push(Op::StoreGated { buffer, index, value, gate }, DType::void_()))
    }

    pub fn barrier(&mut self, buffer: NodeId, deps: &[NodeId]) -> Result<NodeId> {
        let dtype = self.dtype(buffer).clone();
        if !dtype.is_ptr() {
            return Err(Error::BufferRequired { actual: dtype });
        }
        Ok(self.push(Op::Barrier { buffer, deps: SmallVec::from_slice(deps) }, dtype))
    }

    // =========================================================================
    // Intrinsics
    // =========================================================================

    /// Packed 4x8-bit dot-product-accumulate.
    ///
    /// Operand offsets are logical element indices; address adjustment by the
    /// target's array-header size happens at lowering, not here.
    pub fn dp4a(&mut self, a: NodeId, offset_a: NodeId, b: NodeId, offset_b: NodeId, acc: NodeId) -> Result<NodeId> {
        for (operand, id) in [("a", a), ("b", b)] {
            let dt = self.dtype(id).clone();
            if dt.pointee().map(|(base, space)| (base.scalar(), space))
                != Some((Some(ScalarDType::Int8), AddrSpace::Global))
            {
                return Err(Error::IntrinsicOperand { operand, expected: "a global i8 buffer", actual: dt });
            }
        }
        for (operand, id) in [("offset_a", offset_a), ("offset_b", offset_b)] {
            let dt = self.dtype(id).clone();
            if dt != DType::int32() {
                return Err(Error::IntrinsicOperand { operand, expected: "an i32 element index", actual: dt });
            }
        }
        let dt = self.dtype(acc).clone();
        if dt != DType::int32() {
            return Err(Error::IntrinsicOperand { operand: "acc", expected: "an i32 accumulator", actual: dt });
        }
        Ok(self.push(Op::Dp4a { a, offset_a, b, offset_b, acc }, DType::int32()))
    }

    /// Graph root. The last sink wins; lowering uses it as the entry point.
    pub fn sink(&mut self, effects: &[NodeId]) -> NodeId {
        let id = self.push(Op::Sink { effects: SmallVec::from_slice(effects) }, DType::void_());
        self.sink = Some(id);
        id
    }

    // =========================================================================
    // Validation and traversal
    // =========================================================================

    /// Structural validation of every range node: both associations present
    /// and the stride not statically zero.
    pub fn validate(&self) -> Result<()> {
        for range in self.ranges() {
            let links = &self.links[&range];
            if links.offset.is_none() {
                return Err(Error::MalformedParallelRegion { range, defect: RegionDefect::MissingOffset });
            }
            if links.stride.is_none() {
                return Err(Error::MalformedParallelRegion { range, defect: RegionDefect::MissingStride });
            }
            if let Some(value) = self.stride_value(range)
                && let Op::Const(c) = self.op(value)
                && c.is_zero()
            {
                return Err(Error::MalformedParallelRegion { range, defect: RegionDefect::ZeroStride });
            }
        }
        Ok(())
    }

    /// Post-order traversal over data and association edges from the sink.
    /// Every node appears after all of its dependencies.
    pub fn toposort(&self) -> Vec<NodeId> {
        let Some(sink) = self.sink else {
            return Vec::new();
        };
        let mut order = Vec::new();
        let mut visited = vec![false; self.nodes.len()];
        // Iterative DFS: (node, children_pushed)
        let mut stack = vec![(sink, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if visited[id.index()] {
                continue;
            }
            visited[id.index()] = true;
            stack.push((id, true));
            for (_, child) in self.edges(id).into_iter().rev() {
                if !visited[child.index()] {
                    stack.push((child, false));
                }
            }
        }
        order
    }

    fn expect_index(&self, id: NodeId) -> Result<()> {
        let dt = self.dtype(id);
        if *dt != DType::index() {
            return Err(Error::IndexTypeMismatch { actual: dt.clone() });
        }
        Ok(())
    }

    fn expect_buffer(&self, id: NodeId) -> Result<ScalarDType> {
        let dt = self.dtype(id);
        match dt.pointee().and_then(|(base, _)| base.scalar()) {
            Some(elem) => Ok(elem),
            None => Err(Error::BufferRequired { actual: dt.clone() }),
        }
    }
}
