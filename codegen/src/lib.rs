//! Code generation for squall region graphs.
//!
//! Turns a validated parallel-region graph into an ordered list of
//! virtual-ISA instructions over fresh virtual registers. The instruction
//! list is consumed by a backend — an external assembler in a production
//! deployment, the in-process virtual accelerator here.
//!
//! # Usage
//!
//! ```ignore
//! let program = squall_codegen::lower(&graph, &target)?;
//! ```

pub mod error;
pub mod instr;
pub mod lower;

#[cfg(test)]
pub mod test;

pub use error::{Error, Result};
pub use instr::{Instr, KernelProgram, LocalSpec, SpecialReg, VReg};
pub use lower::lower;
