use snafu::Snafu;
use squall_dtype::ScalarDType;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Typed access with the wrong element type.
    #[snafu(display("element type mismatch: array holds {actual}, access assumed {expected}"))]
    ElementMismatch { expected: ScalarDType, actual: ScalarDType },

    /// Element index outside the array.
    #[snafu(display("index {index} out of bounds for array of {len} elements"))]
    IndexOutOfBounds { index: usize, len: usize },

    /// Address does not fall inside any live allocation.
    #[snafu(display("invalid device address {addr:#x}"))]
    InvalidAddress { addr: u64 },

    /// Access crosses the end of an allocation.
    #[snafu(display("access of {len} bytes at {addr:#x} overruns allocation of {size} bytes"))]
    OutOfBounds { addr: u64, len: usize, size: usize },

    /// Device-side operation on an array that was never transferred.
    #[snafu(display("array is not resident on the device"))]
    NotResident,

    /// Kernel execution failure reported by the device.
    #[snafu(display("device execution failed: {reason}"))]
    Execution { reason: String },
}
