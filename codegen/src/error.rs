//! Error types for code generation.

use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while lowering a region graph.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Structural error reported by the IR layer.
    #[snafu(display("IR error: {source}"))]
    Ir { source: squall_ir::Error },

    /// Region graph cannot be linearized.
    #[snafu(display("invalid region graph: {reason}"))]
    InvalidGraph { reason: String },

    /// Node dtype unusable at this point of the lowering.
    #[snafu(display("type error: {reason}"))]
    TypeError { reason: String },

    /// The target does not implement the requested intrinsic, and implicit
    /// scalar fallback is never taken.
    #[snafu(display("unsupported intrinsic `{intrinsic}` on this target"))]
    UnsupportedIntrinsic { intrinsic: &'static str },
}

impl From<squall_ir::Error> for Error {
    fn from(source: squall_ir::Error) -> Self {
        Self::Ir { source }
    }
}
