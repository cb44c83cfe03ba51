//! Host-side array handles with device residency tracking.
//!
//! A `DeviceArray` owns a host copy of the data and, once transferred, a
//! binding to a device allocation. On the device every array is laid out as a
//! fixed-size metadata header followed by the element payload; transfer
//! methods take the header size from the caller so the layout constant stays
//! target-owned.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use squall_dtype::{Element, ScalarDType};

use crate::error::{Error, Result};
use crate::memory::{BufferId, DeviceMemory};

#[derive(Debug)]
struct ArrayInner {
    dtype: ScalarDType,
    len: usize,
    host: RwLock<Vec<u8>>,
    binding: Mutex<Option<BufferId>>,
    /// Host copy has writes the device has not seen.
    host_dirty: AtomicBool,
    /// Device copy has writes the host has not seen.
    device_dirty: AtomicBool,
}

/// Shared handle to one array. Clones alias the same storage.
#[derive(Debug, Clone)]
pub struct DeviceArray {
    inner: Arc<ArrayInner>,
}

impl DeviceArray {
    fn with_host(dtype: ScalarDType, len: usize, host: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(ArrayInner {
                dtype,
                len,
                host: RwLock::new(host),
                binding: Mutex::new(None),
                // Fresh data has never been transferred.
                host_dirty: AtomicBool::new(true),
                device_dirty: AtomicBool::new(false),
            }),
        }
    }

    /// Zero-filled array of `len` elements.
    pub fn zeroed<T: Element>(len: usize) -> Self {
        Self::with_host(T::DTYPE, len, vec![0u8; len * T::DTYPE.bytes()])
    }

    /// Array initialized from a host slice.
    pub fn from_slice<T: Element>(data: &[T]) -> Self {
        let elem = T::DTYPE.bytes();
        let mut host = vec![0u8; data.len() * elem];
        for (i, v) in data.iter().enumerate() {
            v.write_to(&mut host[i * elem..]);
        }
        Self::with_host(T::DTYPE, data.len(), host)
    }

    pub fn dtype(&self) -> ScalarDType {
        self.inner.dtype
    }

    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Payload size in bytes, excluding the device-side header.
    pub fn payload_bytes(&self) -> usize {
        self.inner.len * self.inner.dtype.bytes()
    }

    /// Whether both handles alias the same storage.
    pub fn same_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn check_elem<T: Element>(&self) -> Result<()> {
        if T::DTYPE != self.inner.dtype {
            return Err(Error::ElementMismatch { expected: T::DTYPE, actual: self.inner.dtype });
        }
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.inner.len {
            return Err(Error::IndexOutOfBounds { index, len: self.inner.len });
        }
        Ok(())
    }

    // =========================================================================
    // Host access
    // =========================================================================

    pub fn get<T: Element>(&self, index: usize) -> Result<T> {
        self.check_elem::<T>()?;
        self.check_index(index)?;
        let host = self.inner.host.read();
        Ok(T::read_from(&host[index * T::DTYPE.bytes()..]))
    }

    /// Write one element on the host side and mark the host copy dirty.
    pub fn set<T: Element>(&self, index: usize, value: T) -> Result<()> {
        self.check_elem::<T>()?;
        self.check_index(index)?;
        let mut host = self.inner.host.write();
        value.write_to(&mut host[index * T::DTYPE.bytes()..]);
        self.inner.host_dirty.store(true, Ordering::Release);
        Ok(())
    }

    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.check_elem::<T>()?;
        let host = self.inner.host.read();
        let elem = T::DTYPE.bytes();
        Ok((0..self.inner.len).map(|i| T::read_from(&host[i * elem..])).collect())
    }

    // =========================================================================
    // Residency and transfers
    // =========================================================================

    pub fn is_resident(&self) -> bool {
        self.inner.binding.lock().is_some()
    }

    pub fn host_dirty(&self) -> bool {
        self.inner.host_dirty.load(Ordering::Acquire)
    }

    pub fn device_dirty(&self) -> bool {
        self.inner.device_dirty.load(Ordering::Acquire)
    }

    /// Mark the device copy as modified (called after a kernel writes it).
    pub fn mark_device_dirty(&self) {
        self.inner.device_dirty.store(true, Ordering::Release);
    }

    /// Allocate the device buffer (header + payload) if not yet bound.
    /// Does not copy any data.
    pub fn ensure_resident(&self, memory: &DeviceMemory, header_bytes: u64) -> BufferId {
        let mut binding = self.inner.binding.lock();
        *binding.get_or_insert_with(|| memory.alloc(header_bytes as usize + self.payload_bytes()))
    }

    /// The device binding, if the array has been allocated on the device.
    pub fn binding(&self) -> Option<BufferId> {
        *self.inner.binding.lock()
    }

    /// Host → device copy. Allocates on first use, writes the payload past
    /// the header, and clears the host-dirty flag.
    pub fn copy_in(&self, memory: &DeviceMemory, header_bytes: u64) -> Result<BufferId> {
        let id = self.ensure_resident(memory, header_bytes);
        let host = self.inner.host.read();
        memory.write(id, header_bytes, &host[..])?;
        self.inner.host_dirty.store(false, Ordering::Release);
        tracing::trace!(base = %format_args!("{:#x}", id.base()), bytes = host.len(), "copy host->device");
        Ok(id)
    }

    /// Device → host copy. Clears the device-dirty flag.
    pub fn copy_out(&self, memory: &DeviceMemory, header_bytes: u64) -> Result<()> {
        let binding = self.binding().ok_or(Error::NotResident)?;
        let mut host = self.inner.host.write();
        memory.read(binding, header_bytes, &mut host[..])?;
        self.inner.device_dirty.store(false, Ordering::Release);
        tracing::trace!(base = %format_args!("{:#x}", binding.base()), bytes = host.len(), "copy device->host");
        Ok(())
    }
}
