use std::sync::{Arc, Mutex, MutexGuard};

use hashbrown::HashMap;
use tenperm_common::DeviceId;
use thiserror::Error;

/// Opaque device memory address token, interpreted only by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    /// The null pointer, used for zero-sized buffers.
    pub const NULL: DevicePtr = DevicePtr(0);

    /// Whether this is the null pointer.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// An error raised by the memory capability.
#[derive(Error, Debug)]
pub enum AllocError {
    /// The device cannot satisfy the allocation.
    #[error("{device} is out of memory while allocating {bytes} bytes")]
    OutOfMemory {
        /// Device the allocation targeted.
        device: DeviceId,
        /// Requested size.
        bytes: usize,
    },

    /// Any other backend failure.
    #[error("allocator failure: {0}")]
    Backend(String),
}

/// The injected device memory capability.
///
/// The planner only ever calls this allocate/deallocate/write triple and
/// never assumes a particular allocation strategy; wrap an implementation
/// in [`PoolAllocator`] to get recycling without touching the backend.
pub trait DeviceAllocator: Send + Sync {
    /// Allocate `bytes` bytes on `device`.
    fn allocate(&self, device: DeviceId, bytes: usize) -> Result<DevicePtr, AllocError>;

    /// Release a pointer previously returned by [`allocate`](Self::allocate).
    fn deallocate(&self, device: DeviceId, ptr: DevicePtr);

    /// Copy host bytes into device memory at `ptr`.
    fn write(&self, device: DeviceId, ptr: DevicePtr, data: &[u8]) -> Result<(), AllocError>;
}

/// A device buffer with scoped ownership: the allocation is released when
/// the buffer drops, on every exit path.
pub struct DeviceBuffer {
    ptr: DevicePtr,
    bytes: usize,
    device: DeviceId,
    allocator: Arc<dyn DeviceAllocator>,
}

impl DeviceBuffer {
    /// Allocate `bytes` bytes on `device`. A zero-sized buffer performs
    /// no allocation and holds the null pointer.
    pub fn new(
        allocator: Arc<dyn DeviceAllocator>,
        device: DeviceId,
        bytes: usize,
    ) -> Result<Self, AllocError> {
        let ptr = if bytes == 0 {
            DevicePtr::NULL
        } else {
            allocator.allocate(device, bytes)?
        };
        Ok(Self {
            ptr,
            bytes,
            device,
            allocator,
        })
    }

    /// Allocate and populate a buffer from host bytes.
    pub fn with_data(
        allocator: Arc<dyn DeviceAllocator>,
        device: DeviceId,
        data: &[u8],
    ) -> Result<Self, AllocError> {
        let buffer = Self::new(allocator, device, data.len())?;
        if !data.is_empty() {
            buffer.allocator.write(buffer.device, buffer.ptr, data)?;
        }
        Ok(buffer)
    }

    /// The device address of this buffer.
    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes
    }

    /// Whether the buffer is zero-sized.
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Device the buffer lives on.
    pub fn device(&self) -> DeviceId {
        self.device
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.allocator.deallocate(self.device, self.ptr);
        }
    }
}

impl core::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("ptr", &self.ptr)
            .field("bytes", &self.bytes)
            .field("device", &self.device)
            .finish()
    }
}

/// A pooling decorator over any [`DeviceAllocator`].
///
/// Freed blocks are kept in per-(device, size) free lists and handed back
/// on the next allocation of the same size instead of going through the
/// backend again. All pooled blocks are returned to the backend when the
/// pool drops.
pub struct PoolAllocator {
    inner: Arc<dyn DeviceAllocator>,
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    free: HashMap<(DeviceId, usize), Vec<DevicePtr>>,
    live: HashMap<(DeviceId, u64), usize>,
}

impl PoolAllocator {
    /// Wrap a backend allocator.
    pub fn new(inner: Arc<dyn DeviceAllocator>) -> Self {
        Self {
            inner,
            state: Mutex::new(PoolState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl DeviceAllocator for PoolAllocator {
    fn allocate(&self, device: DeviceId, bytes: usize) -> Result<DevicePtr, AllocError> {
        let mut state = self.lock();
        let ptr = match state.free.get_mut(&(device, bytes)).and_then(Vec::pop) {
            Some(recycled) => recycled,
            None => self.inner.allocate(device, bytes)?,
        };
        state.live.insert((device, ptr.0), bytes);
        Ok(ptr)
    }

    fn deallocate(&self, device: DeviceId, ptr: DevicePtr) {
        let mut state = self.lock();
        match state.live.remove(&(device, ptr.0)) {
            Some(bytes) => {
                state.free.entry((device, bytes)).or_default().push(ptr);
            }
            // Not one of ours; hand it straight to the backend.
            None => self.inner.deallocate(device, ptr),
        }
    }

    fn write(&self, device: DeviceId, ptr: DevicePtr, data: &[u8]) -> Result<(), AllocError> {
        self.inner.write(device, ptr, data)
    }
}

impl Drop for PoolAllocator {
    fn drop(&mut self) {
        let mut state = self.lock();
        for ((device, _), ptrs) in state.free.drain() {
            for ptr in ptrs {
                self.inner.deallocate(device, ptr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingAllocator {
        allocs: AtomicUsize,
        deallocs: AtomicUsize,
        next: AtomicUsize,
    }

    impl DeviceAllocator for CountingAllocator {
        fn allocate(&self, _device: DeviceId, _bytes: usize) -> Result<DevicePtr, AllocError> {
            self.allocs.fetch_add(1, Ordering::Relaxed);
            Ok(DevicePtr(self.next.fetch_add(1, Ordering::Relaxed) as u64 + 1))
        }

        fn deallocate(&self, _device: DeviceId, _ptr: DevicePtr) {
            self.deallocs.fetch_add(1, Ordering::Relaxed);
        }

        fn write(&self, _device: DeviceId, _ptr: DevicePtr, _data: &[u8]) -> Result<(), AllocError> {
            Ok(())
        }
    }

    #[test]
    fn buffer_releases_on_drop() {
        let allocator = Arc::new(CountingAllocator::default());
        let device = DeviceId::new(0);
        {
            let _buffer = DeviceBuffer::new(allocator.clone(), device, 256).unwrap();
            assert_eq!(allocator.allocs.load(Ordering::Relaxed), 1);
            assert_eq!(allocator.deallocs.load(Ordering::Relaxed), 0);
        }
        assert_eq!(allocator.deallocs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn zero_sized_buffer_skips_backend() {
        let allocator = Arc::new(CountingAllocator::default());
        let buffer = DeviceBuffer::new(allocator.clone(), DeviceId::new(0), 0).unwrap();
        assert!(buffer.is_empty());
        assert!(buffer.ptr().is_null());
        drop(buffer);
        assert_eq!(allocator.allocs.load(Ordering::Relaxed), 0);
        assert_eq!(allocator.deallocs.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn pool_reuses_freed_blocks_of_equal_size() {
        let backend = Arc::new(CountingAllocator::default());
        let pool = PoolAllocator::new(backend.clone());
        let device = DeviceId::new(0);

        let first = pool.allocate(device, 1024).unwrap();
        pool.deallocate(device, first);
        let second = pool.allocate(device, 1024).unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.allocs.load(Ordering::Relaxed), 1);
        assert_eq!(backend.deallocs.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn pool_returns_blocks_to_backend_on_drop() {
        let backend = Arc::new(CountingAllocator::default());
        let device = DeviceId::new(0);
        {
            let pool = PoolAllocator::new(backend.clone());
            let ptr = pool.allocate(device, 64).unwrap();
            pool.deallocate(device, ptr);
        }
        assert_eq!(backend.deallocs.load(Ordering::Relaxed), 1);
    }
}
