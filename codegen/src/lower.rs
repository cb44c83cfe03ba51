//! Lowering of a region graph into a [`KernelProgram`].
//!
//! The pass is a closed match over node shapes: every operation either maps
//! to a fixed instruction template or is a structural marker (wrappers,
//! sinks) that only moves values around. Serial ranges become counted loops;
//! global and local ranges become hardware index reads with the range's
//! offset/stride arithmetic applied on top.
//!
//! # Scheduling
//!
//! Nodes are emitted from a worklist over the topological order. Each node
//! carries the set of serial ranges it transitively depends on; a node is
//! emittable only when that set equals the currently open loop nest. A loop
//! is opened only when nothing else can progress, which hoists loop-invariant
//! values (accumulator seeds, constants, barrier placement) in front of the
//! `LoopBegin`.

use std::collections::{BTreeSet, HashMap, HashSet};

use squall_device::Target;
use squall_dtype::{AddrSpace, ScalarDType};
use squall_ir::error::UnsupportedDimensionalitySnafu;
use squall_ir::{AxisKind, ConstValue, NodeId, Op, RegionGraph, SpecialKind};

use crate::error::{Error, InvalidGraphSnafu, Result, TypeSnafu, UnsupportedIntrinsicSnafu};
use crate::instr::{Instr, KernelProgram, LocalSpec, SpecialReg, VReg};

/// Lower a validated region graph for the given target.
pub fn lower(graph: &RegionGraph, target: &Target) -> Result<KernelProgram> {
    Lowerer::new(graph, target)?.run()
}

struct Lowerer<'a> {
    graph: &'a RegionGraph,
    target: &'a Target,
    topo: Vec<NodeId>,
    /// Serial ranges each node transitively depends on.
    range_sets: HashMap<NodeId, BTreeSet<NodeId>>,
    /// Grid dimension assigned to each parallel range.
    dims: HashMap<NodeId, u8>,
    values: HashMap<NodeId, VReg>,
    emitted: HashSet<NodeId>,
    instrs: Vec<Instr>,
    locals: Vec<LocalSpec>,
    writes: BTreeSet<usize>,
    next_vreg: u32,
}

impl<'a> Lowerer<'a> {
    fn new(graph: &'a RegionGraph, target: &'a Target) -> Result<Self> {
        graph.validate()?;
        if graph.sink_id().is_none() {
            return InvalidGraphSnafu { reason: "region has no sink" }.fail();
        }

        let topo = graph.toposort();

        let mut lowerer = Self {
            graph,
            target,
            topo,
            range_sets: HashMap::new(),
            dims: HashMap::new(),
            values: HashMap::new(),
            emitted: HashSet::new(),
            instrs: Vec::new(),
            locals: Vec::new(),
            writes: BTreeSet::new(),
            next_vreg: 0,
        };
        lowerer.assign_dims(AxisKind::Global, target.max_global_dims)?;
        lowerer.assign_dims(AxisKind::Local, target.max_local_dims)?;
        lowerer.compute_range_sets();
        Ok(lowerer)
    }

    /// Map the parallel ranges of one axis kind onto grid dimensions,
    /// ordered by axis id.
    fn assign_dims(&mut self, axis: AxisKind, max: usize) -> Result<()> {
        let mut ranges: Vec<(usize, NodeId)> = self
            .graph
            .ranges()
            .into_iter()
            .filter_map(|id| match self.graph.op(id) {
                Op::Range { axis_id, axis: a, .. } if *a == axis => Some((*axis_id, id)),
                _ => None,
            })
            .collect();
        if ranges.len() > max {
            return Err(UnsupportedDimensionalitySnafu { axis, requested: ranges.len(), max }.build().into());
        }
        ranges.sort_by_key(|(axis_id, _)| *axis_id);
        for (dim, (_, id)) in ranges.into_iter().enumerate() {
            self.dims.insert(id, dim as u8);
        }
        Ok(())
    }

    fn compute_range_sets(&mut self) {
        let enclosing = self.compute_enclosures();
        for &id in &self.topo {
            let mut set = BTreeSet::new();
            for (_, child) in self.graph.edges(id) {
                if let Some(child_set) = self.range_sets.get(&child) {
                    set.extend(child_set.iter().copied());
                }
            }
            match self.graph.op(id) {
                Op::Range { axis: AxisKind::Serial, .. } => {
                    set.insert(id);
                    if let Some(outer) = enclosing.get(&id) {
                        set.extend(outer.iter().copied());
                    }
                }
                Op::EndRange { range, .. } => {
                    set.remove(range);
                }
                _ => {}
            }
            self.range_sets.insert(id, set);
        }
    }

    /// Which serial ranges run inside which: an `EndRange` reachable through
    /// the effect chain of another `EndRange`'s deps is nested in it. Only
    /// effect edges are followed — value operands (and `After` passthroughs,
    /// which order a value *after* a closed loop) never imply containment.
    fn compute_enclosures(&self) -> HashMap<NodeId, BTreeSet<NodeId>> {
        let is_serial_end = |id: NodeId| match self.graph.op(id) {
            Op::EndRange { range, .. } => {
                matches!(self.graph.op(*range), Op::Range { axis: AxisKind::Serial, .. }).then_some(*range)
            }
            _ => None,
        };

        let mut enclosing: HashMap<NodeId, BTreeSet<NodeId>> = HashMap::new();
        for &id in &self.topo {
            let Some(outer_range) = is_serial_end(id) else {
                continue;
            };
            let Op::EndRange { deps, .. } = self.graph.op(id) else {
                unreachable!();
            };
            let mut stack: Vec<NodeId> = deps.to_vec();
            let mut seen: HashSet<NodeId> = HashSet::new();
            while let Some(node) = stack.pop() {
                if !seen.insert(node) {
                    continue;
                }
                match self.graph.op(node) {
                    Op::EndRange { range, deps } => {
                        if is_serial_end(node).is_some() {
                            enclosing.entry(*range).or_default().insert(outer_range);
                        }
                        stack.extend(deps.iter().copied());
                    }
                    Op::Barrier { deps, .. } => stack.extend(deps.iter().copied()),
                    // Stores and assigns are leaf effects; everything else is
                    // a value operand.
                    _ => {}
                }
            }
        }
        enclosing
    }

    fn run(mut self) -> Result<KernelProgram> {
        let total = self.topo.len();
        let mut open: Vec<NodeId> = Vec::new();
        let mut open_set: BTreeSet<NodeId> = BTreeSet::new();

        while self.emitted.len() < total {
            let mut progressed = false;

            // Pass 1: everything emittable without changing the loop nest.
            for i in 0..total {
                let id = self.topo[i];
                if self.emitted.contains(&id) || !self.deps_emitted(id) {
                    continue;
                }
                match self.graph.op(id) {
                    Op::Range { axis: AxisKind::Serial, .. } => {}
                    Op::EndRange { range, .. }
                        if matches!(self.graph.op(*range), Op::Range { axis: AxisKind::Serial, .. }) =>
                    {
                        if open.last() == Some(range) {
                            self.instrs.push(Instr::LoopEnd);
                            open_set.remove(&open.pop().expect("nonempty"));
                            self.emitted.insert(id);
                            progressed = true;
                        }
                    }
                    _ => {
                        if self.range_sets[&id] == open_set {
                            self.emit(id)?;
                            progressed = true;
                        }
                    }
                }
            }
            if progressed {
                continue;
            }

            // Pass 2: open the next serial loop.
            for i in 0..total {
                let id = self.topo[i];
                if self.emitted.contains(&id)
                    || !matches!(self.graph.op(id), Op::Range { axis: AxisKind::Serial, .. })
                    || !self.deps_emitted(id)
                {
                    continue;
                }
                let mut parent = self.range_sets[&id].clone();
                parent.remove(&id);
                if parent == open_set {
                    self.emit(id)?;
                    open.push(id);
                    open_set.insert(id);
                    progressed = true;
                    break;
                }
            }
            if !progressed {
                return InvalidGraphSnafu { reason: "region is unschedulable: cyclic or scope-escaping value" }
                    .fail();
            }
        }

        if !open.is_empty() {
            return InvalidGraphSnafu { reason: "serial range left open at end of region" }.fail();
        }

        tracing::debug!(
            kernel = self.graph.name(),
            instrs = self.instrs.len(),
            vregs = self.next_vreg,
            locals = self.locals.len(),
            "lowered region graph"
        );

        Ok(KernelProgram {
            name: self.graph.name().to_owned(),
            instrs: self.instrs,
            vregs: self.next_vreg,
            params: self.graph.params().to_vec(),
            locals: self.locals,
            writes: self.writes.into_iter().collect(),
        })
    }

    fn deps_emitted(&self, id: NodeId) -> bool {
        self.graph.edges(id).into_iter().all(|(_, child)| self.emitted.contains(&child))
    }

    fn fresh(&mut self) -> VReg {
        let reg = VReg(self.next_vreg);
        self.next_vreg += 1;
        reg
    }

    fn value(&self, id: NodeId) -> Result<VReg> {
        self.values.get(&id).copied().ok_or_else(|| Error::InvalidGraph {
            reason: format!("node {id} consumed before it produced a value"),
        })
    }

    fn scalar_of(&self, id: NodeId) -> Result<ScalarDType> {
        match self.graph.dtype(id).scalar() {
            Some(scalar) => Ok(scalar),
            None => TypeSnafu { reason: format!("node {id} has a non-scalar dtype") }.fail(),
        }
    }

    fn emit_const(&mut self, dtype: ScalarDType, value: ConstValue) -> VReg {
        let dst = self.fresh();
        self.instrs.push(Instr::Const { dst, dtype, value });
        dst
    }

    /// Byte address of `buffer[index]`. Global buffers get the array-header
    /// adjustment; local scratch is header-free.
    fn emit_address(&mut self, buffer: NodeId, index: NodeId) -> Result<(VReg, ScalarDType, AddrSpace)> {
        let dtype = self.graph.dtype(buffer).clone();
        let (elem, space) = match dtype.pointee() {
            Some((base, space)) => match base.scalar() {
                Some(elem) => (elem, space),
                None => return TypeSnafu { reason: format!("buffer {buffer} has non-scalar elements") }.fail(),
            },
            None => return TypeSnafu { reason: format!("node {buffer} is not a buffer") }.fail(),
        };

        let base = self.value(buffer)?;
        let idx = self.value(index)?;

        let widened = self.fresh();
        self.instrs.push(Instr::Cast { dst: widened, src: idx, to: ScalarDType::UInt64 });
        let elsize = self.emit_const(ScalarDType::UInt64, ConstValue::UInt(elem.bytes() as u64));
        let scaled = self.fresh();
        self.instrs.push(Instr::Binary {
            dst: scaled,
            op: squall_ir::BinaryOp::Mul,
            lhs: widened,
            rhs: elsize,
            dtype: ScalarDType::UInt64,
        });

        let offset = match space {
            AddrSpace::Global => {
                let header = self.emit_const(ScalarDType::UInt64, ConstValue::UInt(self.target.array_header_bytes));
                let adjusted = self.fresh();
                self.instrs.push(Instr::Binary {
                    dst: adjusted,
                    op: squall_ir::BinaryOp::Add,
                    lhs: scaled,
                    rhs: header,
                    dtype: ScalarDType::UInt64,
                });
                adjusted
            }
            AddrSpace::Local => scaled,
        };

        let addr = self.fresh();
        self.instrs.push(Instr::Binary {
            dst: addr,
            op: squall_ir::BinaryOp::Add,
            lhs: base,
            rhs: offset,
            dtype: ScalarDType::UInt64,
        });
        Ok((addr, elem, space))
    }

    /// Record a store through to its root buffer parameter, if any.
    fn record_write(&mut self, buffer: NodeId) {
        let mut cur = buffer;
        loop {
            match self.graph.op(cur) {
                Op::Barrier { buffer, .. } => cur = *buffer,
                Op::After { passthrough, .. } => cur = *passthrough,
                Op::BufferParam(index) => {
                    self.writes.insert(*index);
                    return;
                }
                _ => return,
            }
        }
    }

    fn special_reg(&self, kind: SpecialKind, dim: u8) -> Result<SpecialReg> {
        let (axis, max) = match kind {
            SpecialKind::GlobalId | SpecialKind::GroupId | SpecialKind::NumGroups => {
                (AxisKind::Global, self.target.max_global_dims)
            }
            SpecialKind::LocalId | SpecialKind::LocalSize => (AxisKind::Local, self.target.max_local_dims),
        };
        if dim as usize >= max {
            return Err(UnsupportedDimensionalitySnafu { axis, requested: dim as usize + 1, max }.build().into());
        }
        Ok(match kind {
            SpecialKind::GlobalId => SpecialReg::GlobalId(dim),
            SpecialKind::LocalId => SpecialReg::LocalId(dim),
            SpecialKind::GroupId => SpecialReg::GroupId(dim),
            SpecialKind::LocalSize => SpecialReg::LocalSize(dim),
            SpecialKind::NumGroups => SpecialReg::NumGroups(dim),
        })
    }

    fn emit(&mut self, id: NodeId) -> Result<()> {
        match self.graph.op(id).clone() {
            Op::Const(value) => {
                let dtype = self.scalar_of(id)?;
                let dst = self.emit_const(dtype, value);
                self.values.insert(id, dst);
            }

            Op::BufferParam(param) | Op::ScalarParam(param) => {
                let dst = self.fresh();
                self.instrs.push(Instr::LoadParam { dst, param });
                self.values.insert(id, dst);
            }

            Op::DefineLocal { elems } => {
                let elem = self
                    .graph
                    .dtype(id)
                    .pointee()
                    .and_then(|(base, _)| base.scalar())
                    .expect("DefineLocal is always a local scalar pointer");
                let local = self.locals.len();
                self.locals.push(LocalSpec { elems, dtype: elem });
                let dst = self.fresh();
                self.instrs.push(Instr::LocalBase { dst, local });
                self.values.insert(id, dst);
            }

            Op::Special { kind, dim } => {
                let reg = self.special_reg(kind, dim)?;
                let dst = self.fresh();
                self.instrs.push(Instr::Special { dst, reg });
                self.values.insert(id, dst);
            }

            Op::Unary(op, src) => {
                let dtype = self.scalar_of(src)?;
                let src = self.value(src)?;
                let dst = self.fresh();
                self.instrs.push(Instr::Unary { dst, op, src, dtype });
                self.values.insert(id, dst);
            }

            Op::Binary(op, lhs, rhs) => {
                // Comparisons evaluate in the operand dtype, not the Bool result.
                let dtype = self.scalar_of(lhs)?;
                let lhs = self.value(lhs)?;
                let rhs = self.value(rhs)?;
                let dst = self.fresh();
                self.instrs.push(Instr::Binary { dst, op, lhs, rhs, dtype });
                self.values.insert(id, dst);
            }

            Op::Cast { src } => {
                let to = self.scalar_of(id)?;
                let src = self.value(src)?;
                let dst = self.fresh();
                self.instrs.push(Instr::Cast { dst, src, to });
                self.values.insert(id, dst);
            }

            // Wrappers and ordering markers produce no instructions.
            Op::Offset { value } | Op::Stride { value } => {
                let reg = self.value(value)?;
                self.values.insert(id, reg);
            }
            Op::After { passthrough, .. } => {
                let reg = self.value(passthrough)?;
                self.values.insert(id, reg);
            }
            Op::Sink { .. } => {}

            Op::Range { bound, axis, .. } => {
                let offset = self.graph.offset_of(id).expect("validated");
                let stride = self.graph.stride_of(id).expect("validated");
                let offset = self.value(offset)?;
                let stride = self.value(stride)?;
                match axis {
                    AxisKind::Serial => {
                        let bound = self.value(bound)?;
                        let var = self.fresh();
                        self.instrs.push(Instr::LoopBegin { var, offset, stride, bound });
                        self.values.insert(id, var);
                    }
                    AxisKind::Global | AxisKind::Local => {
                        let dim = self.dims[&id];
                        let reg = if axis == AxisKind::Global {
                            SpecialReg::GlobalId(dim)
                        } else {
                            SpecialReg::LocalId(dim)
                        };
                        let tid = self.fresh();
                        self.instrs.push(Instr::Special { dst: tid, reg });
                        let scaled = self.fresh();
                        self.instrs.push(Instr::Binary {
                            dst: scaled,
                            op: squall_ir::BinaryOp::Mul,
                            lhs: tid,
                            rhs: stride,
                            dtype: ScalarDType::Index,
                        });
                        let idx = self.fresh();
                        self.instrs.push(Instr::Binary {
                            dst: idx,
                            op: squall_ir::BinaryOp::Add,
                            lhs: offset,
                            rhs: scaled,
                            dtype: ScalarDType::Index,
                        });
                        self.values.insert(id, idx);
                    }
                }
            }

            // Serial EndRange is handled by the scheduler; reaching here
            // means the range was parallel and there is nothing to close.
            Op::EndRange { .. } => {}

            Op::DefineAcc { init } => {
                let src = self.value(init)?;
                let dst = self.fresh();
                self.instrs.push(Instr::Mov { dst, src });
                self.values.insert(id, dst);
            }

            Op::Assign { acc, value } => {
                let dst = self.value(acc)?;
                let src = self.value(value)?;
                self.instrs.push(Instr::Mov { dst, src });
                self.values.insert(id, dst);
            }

            Op::Load { buffer, index } => {
                let (addr, dtype, space) = self.emit_address(buffer, index)?;
                let dst = self.fresh();
                self.instrs.push(Instr::Load { dst, addr, dtype, space });
                self.values.insert(id, dst);
            }

            Op::Store { buffer, index, value } => {
                let (addr, dtype, space) = self.emit_address(buffer, index)?;
                let src = self.value(value)?;
                self.instrs.push(Instr::Store { addr, src, dtype, space, gate: None });
                self.record_write(buffer);
            }

            Op::StoreGated { buffer, index, value, gate } => {
                let gate = self.value(gate)?;
                let (addr, dtype, space) = self.emit_address(buffer, index)?;
                let src = self.value(value)?;
                self.instrs.push(Instr::Store { addr, src, dtype, space, gate: Some(gate) });
                self.record_write(buffer);
            }

            Op::Barrier { buffer, .. } => {
                self.instrs.push(Instr::Barrier);
                let reg = self.value(buffer)?;
                self.values.insert(id, reg);
            }

            Op::Dp4a { a, offset_a, b, offset_b, acc } => {
                if !self.target.supports_dp4a {
                    return UnsupportedIntrinsicSnafu { intrinsic: "dp4a" }.fail();
                }
                let base_a = self.value(a)?;
                let base_b = self.value(b)?;
                let offset_a = self.value(offset_a)?;
                let offset_b = self.value(offset_b)?;
                let acc = self.value(acc)?;

                // Fresh storage for the offset widening, the header-adjusted
                // forms, the effective addresses, the packed-word loads, and
                // the result: one atomic statement consumes them all.
                let cnv_offset_a = self.fresh();
                let adj_offset_a = self.fresh();
                let addr_a = self.fresh();
                let load_a = self.fresh();
                let cnv_offset_b = self.fresh();
                let adj_offset_b = self.fresh();
                let addr_b = self.fresh();
                let load_b = self.fresh();
                let dst = self.fresh();
                self.instrs.push(Instr::Dp4a {
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
                    header_size: self.target.array_header_bytes,
                });
                self.values.insert(id, dst);
            }
        }
        self.emitted.insert(id);
        Ok(())
    }
}
