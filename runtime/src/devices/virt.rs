//! In-process virtual accelerator.
//!
//! Interprets lowered [`KernelProgram`]s over a work grid. Stands in for a
//! native backend behind the instruction-emission boundary: a production
//! deployment would assemble the same instruction list into device binaries.
//!
//! Work-groups execute one after another; the work-items of a group run in
//! lockstep slices between barriers, which is exactly the guarantee group
//! barriers provide on real hardware. Each item owns a virtual register file;
//! group-local scratch is shared within the group and dropped after it.

use std::collections::HashMap;

use squall_codegen::{Instr, KernelProgram, SpecialReg, VReg};
use squall_device::error::ExecutionSnafu;
use squall_device::{BufferId, DeviceMemory, DeviceSpec, MemoryPool, Target};
use squall_dtype::{AddrSpace, ScalarDType};
use squall_ir::{BinaryOp, ConstValue, UnaryOp};

use snafu::ensure;

type Result<T, E = squall_device::Error> = std::result::Result<T, E>;

/// One bound launch argument.
#[derive(Debug, Clone, Copy)]
pub enum LaunchArg {
    Buffer(BufferId),
    Scalar(i64),
}

/// The in-process device: a target descriptor plus virtual memory.
#[derive(Debug)]
pub struct VirtualDevice {
    spec: DeviceSpec,
    target: Target,
    memory: DeviceMemory,
}

impl Default for VirtualDevice {
    fn default() -> Self {
        Self::new(Target::default())
    }
}

impl VirtualDevice {
    pub fn new(target: Target) -> Self {
        Self { spec: DeviceSpec::default(), target, memory: DeviceMemory::new() }
    }

    pub fn spec(&self) -> DeviceSpec {
        self.spec
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }

    /// Dispatch one compiled kernel over the given grid sizes, blocking until
    /// every work-group has retired.
    pub fn launch(
        &self,
        program: &KernelProgram,
        global: [usize; 3],
        local: [usize; 3],
        args: &[LaunchArg],
    ) -> Result<()> {
        ensure!(
            args.len() == program.params.len(),
            ExecutionSnafu {
                reason: format!("kernel takes {} parameters, {} bound", program.params.len(), args.len()),
            }
        );
        let Some(spans) = program.loop_spans() else {
            return ExecutionSnafu { reason: "unbalanced loop structure".to_string() }.fail();
        };
        let mut loop_of: HashMap<usize, usize> = HashMap::new();
        for (begin, end) in spans {
            loop_of.insert(begin, end);
            loop_of.insert(end, begin);
        }

        let (local_offsets, arena_size) = program.local_layout();
        let num_groups = [
            global[0] / local[0].max(1),
            global[1] / local[1].max(1),
            global[2] / local[2].max(1),
        ];

        self.memory.run(|pool| {
            for gz in 0..num_groups[2] {
                for gy in 0..num_groups[1] {
                    for gx in 0..num_groups[0] {
                        let ctx = GroupContext {
                            group_id: [gx, gy, gz],
                            local_size: local,
                            num_groups,
                        };
                        run_group(pool, program, &loop_of, &local_offsets, arena_size, args, &ctx)?;
                    }
                }
            }
            Ok(())
        })
    }
}

struct GroupContext {
    group_id: [usize; 3],
    local_size: [usize; 3],
    num_groups: [usize; 3],
}

struct Item {
    pc: usize,
    regs: Vec<ConstValue>,
    local_id: [usize; 3],
    done: bool,
    at_barrier: bool,
}

fn run_group(
    pool: &mut MemoryPool,
    program: &KernelProgram,
    loop_of: &HashMap<usize, usize>,
    local_offsets: &[u64],
    arena_size: u64,
    args: &[LaunchArg],
    ctx: &GroupContext,
) -> Result<()> {
    let mut arena = vec![0u8; arena_size as usize];
    let mut items = Vec::with_capacity(ctx.local_size.iter().product());
    for lz in 0..ctx.local_size[2] {
        for ly in 0..ctx.local_size[1] {
            for lx in 0..ctx.local_size[0] {
                items.push(Item {
                    pc: 0,
                    regs: vec![ConstValue::Int(0); program.vregs as usize],
                    local_id: [lx, ly, lz],
                    done: false,
                    at_barrier: false,
                });
            }
        }
    }

    loop {
        for item in &mut items {
            if !item.done && !item.at_barrier {
                step_item(pool, &mut arena, program, loop_of, local_offsets, args, ctx, item)?;
            }
        }
        if items.iter().all(|i| i.done) {
            return Ok(());
        }
        // Everyone still alive is parked at a barrier. A mix of retired and
        // parked items means the barrier was not uniformly executed.
        if items.iter().any(|i| i.done) {
            return ExecutionSnafu { reason: "barrier divergence within work-group".to_string() }.fail();
        }
        for item in &mut items {
            item.at_barrier = false;
        }
    }
}

/// Run one work-item until it parks at a barrier or retires.
#[allow(clippy::too_many_arguments)]
fn step_item(
    pool: &mut MemoryPool,
    arena: &mut [u8],
    program: &KernelProgram,
    loop_of: &HashMap<usize, usize>,
    local_offsets: &[u64],
    args: &[LaunchArg],
    ctx: &GroupContext,
    item: &mut Item,
) -> Result<()> {
    while item.pc < program.instrs.len() {
        let pc = item.pc;
        item.pc += 1;
        match &program.instrs[pc] {
            Instr::Const { dst, value, .. } => set(item, *dst, *value),

            Instr::LoadParam { dst, param } => {
                let value = match args[*param] {
                    LaunchArg::Buffer(id) => ConstValue::UInt(id.base()),
                    LaunchArg::Scalar(v) => ConstValue::Int(v),
                };
                set(item, *dst, value);
            }

            Instr::LocalBase { dst, local } => set(item, *dst, ConstValue::UInt(local_offsets[*local])),

            Instr::Special { dst, reg } => {
                let value = match *reg {
                    SpecialReg::GlobalId(d) => {
                        let d = d as usize;
                        ctx.group_id[d] * ctx.local_size[d] + item.local_id[d]
                    }
                    SpecialReg::LocalId(d) => item.local_id[d as usize],
                    SpecialReg::GroupId(d) => ctx.group_id[d as usize],
                    SpecialReg::LocalSize(d) => ctx.local_size[d as usize],
                    SpecialReg::NumGroups(d) => ctx.num_groups[d as usize],
                };
                set(item, *dst, ConstValue::Int(value as i64));
            }

            Instr::Unary { dst, op, src, dtype } => {
                let value = eval_unary(*op, *dtype, get(item, *src))?;
                set(item, *dst, value);
            }

            Instr::Binary { dst, op, lhs, rhs, dtype } => {
                let value = eval_binary(*op, *dtype, get(item, *lhs), get(item, *rhs))?;
                set(item, *dst, value);
            }

            Instr::Cast { dst, src, to } => {
                let Some(value) = get(item, *src).cast(*to) else {
                    return ExecutionSnafu { reason: format!("cannot cast to {to}") }.fail();
                };
                set(item, *dst, value);
            }

            Instr::Mov { dst, src } => {
                let value = get(item, *src);
                set(item, *dst, value);
            }

            Instr::Load { dst, addr, dtype, space } => {
                let addr = get(item, *addr).as_u64();
                let bytes = mem_slice(pool, arena, *space, addr, dtype.bytes())?;
                let value = read_value(bytes, *dtype);
                set(item, *dst, value);
            }

            Instr::Store { addr, src, dtype, space, gate } => {
                if let Some(gate) = gate
                    && !get(item, *gate).as_bool()
                {
                    continue;
                }
                let addr = get(item, *addr).as_u64();
                let value = get(item, *src);
                let bytes = mem_slice_mut(pool, arena, *space, addr, dtype.bytes())?;
                write_value(bytes, *dtype, value);
            }

            Instr::LoopBegin { var, offset, stride, bound } => {
                let stride = get(item, *stride).as_i64();
                ensure!(stride > 0, ExecutionSnafu { reason: format!("non-positive loop stride {stride}") });
                let start = get(item, *offset).as_i64();
                if start < get(item, *bound).as_i64() {
                    set(item, *var, ConstValue::Int(start));
                } else {
                    // Zero-trip loop: skip past the matching end.
                    item.pc = loop_of[&pc] + 1;
                }
            }

            Instr::LoopEnd => {
                let begin = loop_of[&pc];
                let Instr::LoopBegin { var, stride, bound, .. } = &program.instrs[begin] else {
                    unreachable!("loop_of maps LoopEnd to LoopBegin");
                };
                let next = get(item, *var).as_i64() + get(item, *stride).as_i64();
                if next < get(item, *bound).as_i64() {
                    set(item, *var, ConstValue::Int(next));
                    item.pc = begin + 1;
                }
            }

            Instr::Barrier => {
                item.at_barrier = true;
                return Ok(());
            }

            Instr::Dp4a {
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
            } => {
                // Widen each element offset, add the array header, and form
                // the effective addresses.
                let cnv_a = get(item, *offset_a).as_u64();
                set(item, *cnv_offset_a, ConstValue::UInt(cnv_a));
                let adj_a = cnv_a + header_size;
                set(item, *adj_offset_a, ConstValue::UInt(adj_a));
                let ea = get(item, *base_a).as_u64() + adj_a;
                set(item, *addr_a, ConstValue::UInt(ea));

                let cnv_b = get(item, *offset_b).as_u64();
                set(item, *cnv_offset_b, ConstValue::UInt(cnv_b));
                let adj_b = cnv_b + header_size;
                set(item, *adj_offset_b, ConstValue::UInt(adj_b));
                let eb = get(item, *base_b).as_u64() + adj_b;
                set(item, *addr_b, ConstValue::UInt(eb));

                let mut packed_a = [0u8; 4];
                packed_a.copy_from_slice(pool.resolve(ea, 4)?);
                let mut packed_b = [0u8; 4];
                packed_b.copy_from_slice(pool.resolve(eb, 4)?);
                set(item, *load_a, ConstValue::Int(i32::from_ne_bytes(packed_a) as i64));
                set(item, *load_b, ConstValue::Int(i32::from_ne_bytes(packed_b) as i64));

                let mut dot = get(item, *acc).as_i64() as i32;
                for lane in 0..4 {
                    dot = dot.wrapping_add(packed_a[lane] as i8 as i32 * (packed_b[lane] as i8 as i32));
                }
                set(item, *dst, ConstValue::Int(dot as i64));
            }
        }
    }
    item.done = true;
    Ok(())
}

fn get(item: &Item, reg: VReg) -> ConstValue {
    item.regs[reg.index()]
}

fn set(item: &mut Item, reg: VReg, value: ConstValue) {
    item.regs[reg.index()] = value;
}

fn mem_slice<'a>(pool: &'a MemoryPool, arena: &'a [u8], space: AddrSpace, addr: u64, len: usize) -> Result<&'a [u8]> {
    match space {
        AddrSpace::Global => pool.resolve(addr, len),
        AddrSpace::Local => {
            let start = addr as usize;
            arena.get(start..start + len).ok_or_else(|| {
                ExecutionSnafu { reason: format!("local access at {addr} overruns scratch arena") }.build()
            })
        }
    }
}

fn mem_slice_mut<'a>(
    pool: &'a mut MemoryPool,
    arena: &'a mut [u8],
    space: AddrSpace,
    addr: u64,
    len: usize,
) -> Result<&'a mut [u8]> {
    match space {
        AddrSpace::Global => pool.resolve_mut(addr, len),
        AddrSpace::Local => {
            let start = addr as usize;
            arena.get_mut(start..start + len).ok_or_else(|| {
                ExecutionSnafu { reason: format!("local access at {addr} overruns scratch arena") }.build()
            })
        }
    }
}

fn read_value(bytes: &[u8], dtype: ScalarDType) -> ConstValue {
    use ScalarDType::*;
    let arr = |n: usize| {
        let mut out = [0u8; 8];
        out[..n].copy_from_slice(&bytes[..n]);
        out
    };
    match dtype {
        Bool => ConstValue::Bool(bytes[0] != 0),
        Int8 => ConstValue::Int(bytes[0] as i8 as i64),
        UInt8 => ConstValue::UInt(bytes[0] as u64),
        Int16 => ConstValue::Int(i16::from_ne_bytes(bytes[..2].try_into().expect("sized")) as i64),
        UInt16 => ConstValue::UInt(u16::from_ne_bytes(bytes[..2].try_into().expect("sized")) as u64),
        Int32 => ConstValue::Int(i32::from_ne_bytes(bytes[..4].try_into().expect("sized")) as i64),
        UInt32 => ConstValue::UInt(u32::from_ne_bytes(bytes[..4].try_into().expect("sized")) as u64),
        Int64 | Index => ConstValue::Int(i64::from_ne_bytes(arr(8))),
        UInt64 => ConstValue::UInt(u64::from_ne_bytes(arr(8))),
        Float32 => ConstValue::Float(f32::from_ne_bytes(bytes[..4].try_into().expect("sized")) as f64),
        Float64 => ConstValue::Float(f64::from_ne_bytes(arr(8))),
        Void => ConstValue::Int(0),
    }
}

fn write_value(bytes: &mut [u8], dtype: ScalarDType, value: ConstValue) {
    use ScalarDType::*;
    match dtype {
        Bool => bytes[0] = value.as_bool() as u8,
        Int8 => bytes[0] = value.as_i64() as i8 as u8,
        UInt8 => bytes[0] = value.as_u64() as u8,
        Int16 => bytes[..2].copy_from_slice(&(value.as_i64() as i16).to_ne_bytes()),
        UInt16 => bytes[..2].copy_from_slice(&(value.as_u64() as u16).to_ne_bytes()),
        Int32 => bytes[..4].copy_from_slice(&(value.as_i64() as i32).to_ne_bytes()),
        UInt32 => bytes[..4].copy_from_slice(&(value.as_u64() as u32).to_ne_bytes()),
        Int64 | Index => bytes[..8].copy_from_slice(&value.as_i64().to_ne_bytes()),
        UInt64 => bytes[..8].copy_from_slice(&value.as_u64().to_ne_bytes()),
        Float32 => bytes[..4].copy_from_slice(&(value.as_f64() as f32).to_ne_bytes()),
        Float64 => bytes[..8].copy_from_slice(&value.as_f64().to_ne_bytes()),
        Void => {}
    }
}

fn eval_unary(op: UnaryOp, dtype: ScalarDType, value: ConstValue) -> Result<ConstValue> {
    Ok(match op {
        UnaryOp::Neg if dtype.is_float() => ConstValue::Float(-value.as_f64()),
        UnaryOp::Neg => ConstValue::Int(value.as_i64().wrapping_neg()),
        UnaryOp::Not if dtype.is_bool() => ConstValue::Bool(!value.as_bool()),
        UnaryOp::Not => ConstValue::Int(!value.as_i64()),
    })
}

fn eval_binary(op: BinaryOp, dtype: ScalarDType, lhs: ConstValue, rhs: ConstValue) -> Result<ConstValue> {
    use BinaryOp::*;

    if dtype.is_float() {
        let (a, b) = (lhs.as_f64(), rhs.as_f64());
        return Ok(match op {
            Add => ConstValue::Float(a + b),
            Sub => ConstValue::Float(a - b),
            Mul => ConstValue::Float(a * b),
            Div => ConstValue::Float(a / b),
            Rem => ConstValue::Float(a % b),
            Min => ConstValue::Float(a.min(b)),
            Max => ConstValue::Float(a.max(b)),
            CmpLt => ConstValue::Bool(a < b),
            CmpEq => ConstValue::Bool(a == b),
            And | Or | Xor | Shl | Shr => {
                return ExecutionSnafu { reason: format!("bitwise {op:?} on float operands") }.fail();
            }
        });
    }

    if dtype.is_bool() {
        let (a, b) = (lhs.as_bool(), rhs.as_bool());
        return Ok(match op {
            And | Min => ConstValue::Bool(a && b),
            Or | Max => ConstValue::Bool(a || b),
            Xor => ConstValue::Bool(a != b),
            CmpEq => ConstValue::Bool(a == b),
            CmpLt => ConstValue::Bool(!a && b),
            _ => return ExecutionSnafu { reason: format!("{op:?} on bool operands") }.fail(),
        });
    }

    if dtype.is_unsigned() {
        let (a, b) = (lhs.as_u64(), rhs.as_u64());
        if matches!(op, Div | Rem) && b == 0 {
            return ExecutionSnafu { reason: "division by zero".to_string() }.fail();
        }
        return Ok(match op {
            Add => ConstValue::UInt(a.wrapping_add(b)),
            Sub => ConstValue::UInt(a.wrapping_sub(b)),
            Mul => ConstValue::UInt(a.wrapping_mul(b)),
            Div => ConstValue::UInt(a / b),
            Rem => ConstValue::UInt(a % b),
            Min => ConstValue::UInt(a.min(b)),
            Max => ConstValue::UInt(a.max(b)),
            And => ConstValue::UInt(a & b),
            Or => ConstValue::UInt(a | b),
            Xor => ConstValue::UInt(a ^ b),
            Shl => ConstValue::UInt(a.wrapping_shl(b as u32)),
            Shr => ConstValue::UInt(a.wrapping_shr(b as u32)),
            CmpLt => ConstValue::Bool(a < b),
            CmpEq => ConstValue::Bool(a == b),
        });
    }

    // Signed and Index arithmetic.
    let (a, b) = (lhs.as_i64(), rhs.as_i64());
    if matches!(op, Div | Rem) && b == 0 {
        return ExecutionSnafu { reason: "division by zero".to_string() }.fail();
    }
    Ok(match op {
        Add => ConstValue::Int(a.wrapping_add(b)),
        Sub => ConstValue::Int(a.wrapping_sub(b)),
        Mul => ConstValue::Int(a.wrapping_mul(b)),
        Div => ConstValue::Int(a.wrapping_div(b)),
        Rem => ConstValue::Int(a.wrapping_rem(b)),
        Min => ConstValue::Int(a.min(b)),
        Max => ConstValue::Int(a.max(b)),
        And => ConstValue::Int(a & b),
        Or => ConstValue::Int(a | b),
        Xor => ConstValue::Int(a ^ b),
        Shl => ConstValue::Int(a.wrapping_shl(b as u32)),
        Shr => ConstValue::Int(a.wrapping_shr(b as u32)),
        CmpLt => ConstValue::Bool(a < b),
        CmpEq => ConstValue::Bool(a == b),
    })
}
