//! Virtual device memory pool.
//!
//! Allocations live in one flat virtual address space so that lowered address
//! arithmetic (`base + header + offset`) resolves to real bytes. The pool is
//! behind a single lock: the host side stages transfers through short
//! `write`/`read` calls, a kernel dispatch takes the lock for its duration
//! (one queue, operations on it are ordered).

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Handle to one device allocation. The value is the allocation's base
/// address in the device's virtual address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl BufferId {
    pub fn base(self) -> u64 {
        self.0
    }
}

/// Allocation granularity; keeps distinct buffers from sharing cache lines
/// and makes bases recognizable in traces.
const ALLOC_ALIGN: u64 = 256;

/// First allocation base. Address zero stays unmapped.
const BASE_ADDR: u64 = 0x1000;

#[derive(Debug, Default)]
pub struct MemoryPool {
    allocations: BTreeMap<u64, Box<[u8]>>,
    next_base: u64,
}

impl MemoryPool {
    fn allocation(&self, addr: u64) -> Result<(u64, &[u8])> {
        match self.allocations.range(..=addr).next_back() {
            Some((base, buf)) if addr - base < buf.len() as u64 => Ok((*base, buf)),
            _ => Err(Error::InvalidAddress { addr }),
        }
    }

    /// Resolve a virtual address range to a byte slice.
    pub fn resolve(&self, addr: u64, len: usize) -> Result<&[u8]> {
        let (base, buf) = self.allocation(addr)?;
        let offset = (addr - base) as usize;
        if offset + len > buf.len() {
            return Err(Error::OutOfBounds { addr, len, size: buf.len() });
        }
        Ok(&buf[offset..offset + len])
    }

    /// Resolve a virtual address range to a mutable byte slice.
    pub fn resolve_mut(&mut self, addr: u64, len: usize) -> Result<&mut [u8]> {
        let (base, size) = {
            let (base, buf) = self.allocation(addr)?;
            (base, buf.len())
        };
        let offset = (addr - base) as usize;
        if offset + len > size {
            return Err(Error::OutOfBounds { addr, len, size });
        }
        let buf = self.allocations.get_mut(&base).expect("resolved above");
        Ok(&mut buf[offset..offset + len])
    }
}

/// Device memory: a locked [`MemoryPool`] plus allocation bookkeeping.
#[derive(Debug, Default)]
pub struct DeviceMemory {
    pool: Mutex<MemoryPool>,
}

impl DeviceMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zero-filled buffer and return its handle.
    pub fn alloc(&self, bytes: usize) -> BufferId {
        let mut pool = self.pool.lock();
        if pool.next_base == 0 {
            pool.next_base = BASE_ADDR;
        }
        let base = pool.next_base;
        pool.next_base = base + (bytes as u64).max(1).next_multiple_of(ALLOC_ALIGN);
        pool.allocations.insert(base, vec![0u8; bytes].into_boxed_slice());
        tracing::trace!(base = %format_args!("{base:#x}"), bytes, "device alloc");
        BufferId(base)
    }

    pub fn free(&self, id: BufferId) -> Result<()> {
        match self.pool.lock().allocations.remove(&id.0) {
            Some(_) => Ok(()),
            None => Err(Error::InvalidAddress { addr: id.0 }),
        }
    }

    /// Copy host bytes into an allocation at a byte offset.
    pub fn write(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let mut pool = self.pool.lock();
        pool.resolve_mut(id.0 + offset, data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Copy device bytes out of an allocation at a byte offset.
    pub fn read(&self, id: BufferId, offset: u64, out: &mut [u8]) -> Result<()> {
        let pool = self.pool.lock();
        out.copy_from_slice(pool.resolve(id.0 + offset, out.len())?);
        Ok(())
    }

    /// Run `f` with exclusive access to the pool (kernel dispatch).
    pub fn run<R>(&self, f: impl FnOnce(&mut MemoryPool) -> R) -> R {
        f(&mut self.pool.lock())
    }

    /// Number of live allocations.
    pub fn allocation_count(&self) -> usize {
        self.pool.lock().allocations.len()
    }
}
