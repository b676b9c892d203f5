//! In-process backend standing in for a real accelerator: byte arenas
//! play device memory and launches run the permutation on the CPU.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tenperm::kernel::{KernelError, Scale, TransposeKernel};
use tenperm::memory::{AllocError, DeviceAllocator, DevicePtr};
use tenperm::plan::{Strategy, TransposePlan};
use tenperm::{DeviceId, Dim3, ElemSize, HardwareProperties};

pub struct DummyBackend {
    arenas: Mutex<HashMap<u64, Vec<u8>>>,
    next: AtomicU64,
    current: Mutex<DeviceId>,
    pub allocs: AtomicU64,
    pub deallocs: AtomicU64,
    pub launches: AtomicU64,
    fail: Mutex<Option<Strategy>>,
}

impl DummyBackend {
    pub fn new() -> Self {
        Self {
            arenas: Mutex::new(HashMap::new()),
            next: AtomicU64::new(1),
            current: Mutex::new(DeviceId::new(0)),
            allocs: AtomicU64::new(0),
            deallocs: AtomicU64::new(0),
            launches: AtomicU64::new(0),
            fail: Mutex::new(None),
        }
    }

    pub fn properties() -> HardwareProperties {
        HardwareProperties {
            warp_size: 32,
            max_threads_per_group: 1024,
            max_shared_memory: 48_000,
            shared_memory_per_processor: 96_000,
            max_groups_per_processor: 16,
            max_threads_per_processor: 2048,
            processor_count: 16,
            max_grid: Dim3::new_3d(u32::MAX, 65_535, 65_535),
            cache_line_l1: 128,
            cache_line_l2: 32,
        }
    }

    pub fn set_current_device(&self, device: DeviceId) {
        *self.current.lock().unwrap() = device;
    }

    /// Make every launch of the given strategy fail.
    pub fn fail_strategy(&self, strategy: Strategy) {
        *self.fail.lock().unwrap() = Some(strategy);
    }

    pub fn upload(&self, device: DeviceId, bytes: &[u8]) -> DevicePtr {
        let ptr = self.allocate(device, bytes.len()).unwrap();
        self.write(device, ptr, bytes).unwrap();
        ptr
    }

    pub fn download(&self, ptr: DevicePtr) -> Vec<u8> {
        self.arenas.lock().unwrap()[&ptr.0].clone()
    }
}

impl DeviceAllocator for DummyBackend {
    fn allocate(&self, _device: DeviceId, bytes: usize) -> Result<DevicePtr, AllocError> {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.arenas.lock().unwrap().insert(id, vec![0u8; bytes]);
        self.allocs.fetch_add(1, Ordering::Relaxed);
        Ok(DevicePtr(id))
    }

    fn deallocate(&self, _device: DeviceId, ptr: DevicePtr) {
        self.arenas.lock().unwrap().remove(&ptr.0);
        self.deallocs.fetch_add(1, Ordering::Relaxed);
    }

    fn write(&self, _device: DeviceId, ptr: DevicePtr, data: &[u8]) -> Result<(), AllocError> {
        let mut arenas = self.arenas.lock().unwrap();
        let arena = arenas
            .get_mut(&ptr.0)
            .ok_or_else(|| AllocError::Backend("write to unknown pointer".to_string()))?;
        arena[..data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl TransposeKernel for DummyBackend {
    fn current_device(&self) -> DeviceId {
        *self.current.lock().unwrap()
    }

    fn properties(&self, _device: DeviceId) -> HardwareProperties {
        Self::properties()
    }

    fn launch(
        &self,
        plan: &TransposePlan,
        input: DevicePtr,
        output: DevicePtr,
        scale: Scale,
    ) -> Result<(), KernelError> {
        if *self.fail.lock().unwrap() == Some(plan.partition.strategy) {
            return Err(KernelError::Launch(format!(
                "injected failure for {}",
                plan.partition.strategy
            )));
        }
        self.launches.fetch_add(1, Ordering::Relaxed);

        let mut arenas = self.arenas.lock().unwrap();
        let src = arenas
            .get(&input.0)
            .ok_or_else(|| KernelError::Launch("unknown input pointer".to_string()))?
            .clone();
        let dst = arenas
            .get_mut(&output.0)
            .ok_or_else(|| KernelError::Launch("unknown output pointer".to_string()))?;

        match plan.elem {
            ElemSize::Bytes4 => permute_f32(&src, dst, &plan.shape, &plan.permutation, scale),
            ElemSize::Bytes8 => permute_f64(&src, dst, &plan.shape, &plan.permutation, scale),
        }
        Ok(())
    }

    fn launch_timed(
        &self,
        plan: &TransposePlan,
        input: DevicePtr,
        output: DevicePtr,
        scale: Scale,
    ) -> Result<Duration, KernelError> {
        let start = Instant::now();
        self.launch(plan, input, output, scale)?;
        Ok(start.elapsed())
    }
}

/// Output-layout index of the element at input-layout index `flat`.
pub fn permuted_index(shape: &[usize], permutation: &[usize], flat: usize) -> usize {
    let mut coord = vec![0usize; shape.len()];
    let mut rem = flat;
    for (axis, &extent) in shape.iter().enumerate() {
        coord[axis] = rem % extent;
        rem /= extent;
    }
    let mut index = 0;
    let mut stride = 1;
    for &axis in permutation {
        index += coord[axis] * stride;
        stride *= shape[axis];
    }
    index
}

fn permute_f32(src: &[u8], dst: &mut [u8], shape: &[usize], permutation: &[usize], scale: Scale) {
    let src: &[f32] = bytemuck::cast_slice(src);
    let dst: &mut [f32] = bytemuck::cast_slice_mut(dst);
    let total: usize = shape.iter().product();
    for i in 0..total {
        let o = permuted_index(shape, permutation, i);
        dst[o] = (scale.alpha * src[i] as f64 + scale.beta * dst[o] as f64) as f32;
    }
}

fn permute_f64(src: &[u8], dst: &mut [u8], shape: &[usize], permutation: &[usize], scale: Scale) {
    let src: &[f64] = bytemuck::cast_slice(src);
    let dst: &mut [f64] = bytemuck::cast_slice_mut(dst);
    let total: usize = shape.iter().product();
    for i in 0..total {
        let o = permuted_index(shape, permutation, i);
        dst[o] = scale.alpha * src[i] + scale.beta * dst[o];
    }
}
