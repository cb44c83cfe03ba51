//! Compiled-kernel cache.
//!
//! Maps (qualified task name, argument shape signature, device) to compiled
//! programs. The cache is an explicit object shared by reference between
//! execution plans — there is no ambient global.
//!
//! # Concurrency discipline
//!
//! The outer map is lock-free; each entry holds a once-cell. The first
//! compiler to claim a cell populates it while concurrent identical requests
//! block on the cell and then reuse the result, so a kernel is never compiled
//! twice for one key. A failed population leaves the cell empty: the
//! offending task's compilation aborts without corrupting other entries, and
//! a later attempt may retry.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use papaya::HashMap;

use squall_codegen::KernelProgram;
use squall_dtype::{DeviceSpec, ScalarDType};

use crate::graph::TaskArg;

/// Shape component of one bound argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgSig {
    Buffer { dtype: ScalarDType, len: usize },
    Scalar { dtype: ScalarDType },
}

/// Argument shape signature of one task invocation.
///
/// Invalidation is purely shape-based: scalar values do not participate, so
/// value-dependent specialization never forces a recompile.
pub type Signature = Vec<ArgSig>;

/// Build the shape signature of a bound argument list.
pub fn signature_of(args: &[TaskArg]) -> Signature {
    args.iter()
        .map(|arg| match arg {
            TaskArg::Array(array) => ArgSig::Buffer { dtype: array.dtype(), len: array.len() },
            TaskArg::Scalar(_) => ArgSig::Scalar { dtype: ScalarDType::Int64 },
        })
        .collect()
}

type Key = (String, Signature, DeviceSpec);
type Cell = Arc<OnceCell<Arc<KernelProgram>>>;

/// Concurrent compiled-kernel cache. Single writer per key.
#[derive(Default)]
pub struct KernelCache {
    kernels: HashMap<Key, Cell>,
}

impl std::fmt::Debug for KernelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelCache").field("entries", &self.len()).finish()
    }
}

impl KernelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or compile the kernel for one (task, signature, device) key.
    ///
    /// `compile` runs at most once per key across all threads; losers of the
    /// insertion race block until the winner finishes and share its program.
    pub fn get_or_compile<F>(
        &self,
        name: &str,
        signature: Signature,
        device: DeviceSpec,
        compile: F,
    ) -> Result<Arc<KernelProgram>, squall_codegen::Error>
    where
        F: FnOnce() -> Result<KernelProgram, squall_codegen::Error>,
    {
        let key = (name.to_owned(), signature, device);
        let guard = self.kernels.guard();

        let cell: Cell = match self.kernels.get(&key, &guard) {
            Some(cell) => Arc::clone(cell),
            None => {
                let fresh: Cell = Arc::new(OnceCell::new());
                use papaya::{Compute, Operation};
                match self.kernels.compute(
                    key,
                    |entry| match entry {
                        Some((_, existing)) => Operation::Abort(Arc::clone(existing)),
                        None => Operation::Insert(Arc::clone(&fresh)),
                    },
                    &guard,
                ) {
                    Compute::Inserted(_, cell) => Arc::clone(cell),
                    Compute::Aborted(cell) => cell,
                    _ => fresh,
                }
            }
        };

        cell.get_or_try_init(|| compile().map(Arc::new)).map(Arc::clone)
    }

    /// Number of populated or claimed entries.
    pub fn len(&self) -> usize {
        self.kernels.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.pin().is_empty()
    }

    /// Drop all cached kernels (test isolation).
    pub fn clear(&self) {
        self.kernels.pin().clear();
    }
}
