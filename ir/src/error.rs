use snafu::Snafu;
use squall_dtype::DType;

use crate::graph::NodeId;
use crate::types::AxisKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Structural defect making a parallel region uncompilable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RegionDefect {
    #[strum(to_string = "missing offset association")]
    MissingOffset,
    #[strum(to_string = "missing stride association")]
    MissingStride,
    #[strum(to_string = "stride statically resolves to zero")]
    ZeroStride,
    #[strum(to_string = "offset or stride association rebound")]
    Rebound,
    #[strum(to_string = "association target is not a range node")]
    NotARange,
}

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Range node with a broken offset/stride association.
    #[snafu(display("malformed parallel region: range {range} {defect}"))]
    MalformedParallelRegion { range: NodeId, defect: RegionDefect },

    /// More parallel dimensions than the target supports.
    #[snafu(display("unsupported dimensionality: {requested} {axis} axes, target supports {max}"))]
    UnsupportedDimensionality { axis: AxisKind, requested: usize, max: usize },

    /// DType mismatch in a binary operation.
    #[snafu(display("dtype mismatch: cannot combine {lhs:?} and {rhs:?}"))]
    DTypeMismatch { lhs: DType, rhs: DType },

    /// Index operand must have Index dtype.
    #[snafu(display("index operand must have Index dtype, got {actual:?}"))]
    IndexTypeMismatch { actual: DType },

    /// Memory operation applied to a non-buffer node.
    #[snafu(display("buffer operand required, got {actual:?}"))]
    BufferRequired { actual: DType },

    /// Intrinsic operand with the wrong dtype.
    #[snafu(display("dp4a operand `{operand}` must be {expected}, got {actual:?}"))]
    IntrinsicOperand { operand: &'static str, expected: &'static str, actual: DType },

    /// Accumulator operations must target a DefineAcc node.
    #[snafu(display("assign target {node} is not an accumulator"))]
    NotAnAccumulator { node: NodeId },
}
