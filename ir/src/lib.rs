//! Parallel-region intermediate representation for the squall compiler.
//!
//! A kernel is described as a [`graph::RegionGraph`]: an arena of typed
//! operation nodes rooted at a sink. Parallel loop structure is first-class —
//! [`op::Op::Range`] nodes carry the iteration bound while their offset and
//! stride live behind typed association edges, kept apart from ordinary data
//! dependencies.
//!
//! # Module Organization
//!
//! - [`types`] - Fundamental enums (ConstValue, operation kinds, axis kinds)
//! - [`op`] - Operation enum defining all region-graph node shapes
//! - [`graph`] - Arena graph, builder API, association table, validation
//! - [`error`] - Error types and result handling

pub mod error;
pub mod graph;
pub mod op;
pub mod types;

#[cfg(test)]
pub mod test;

pub use error::{Error, RegionDefect, Result};
pub use graph::{Node, NodeId, ParamKind, RegionGraph};
pub use op::Op;
pub use types::{AxisKind, BinaryOp, ConstValue, EdgeKind, SpecialKind, UnaryOp};

// Re-export external types for convenience
pub use squall_dtype::{AddrSpace, DType, DeviceSpec, ScalarDType};
