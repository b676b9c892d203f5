use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use core::hash::BuildHasher;
use foldhash::fast::FixedState;
use hashbrown::HashMap;
use tenperm_common::{DeviceId, ElemSize, StreamId};

use crate::cache::LruCache;
use crate::config::GlobalConfig;
use crate::error::PermuteError;
use crate::kernel::{Scale, TransposeKernel};
use crate::memory::{DeviceAllocator, DevicePtr};
use crate::plan::{enumerate_plans, select_best, PlanDescription, TransposePlan};
use crate::tune::Autotuner;

/// Identity of a transposition problem: the unreduced shape and
/// permutation as the caller stated them, the element width and the
/// device. Equal problems share one cached plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct PlanKey {
    /// Axis extents, axis 0 fastest varying.
    pub shape: Vec<usize>,
    /// `permutation[i]` is the input axis that becomes output axis `i`.
    pub permutation: Vec<usize>,
    /// Element width.
    pub elem: ElemSize,
    /// Device the plan targets.
    pub device: DeviceId,
}

impl PlanKey {
    /// Stable 64-bit fingerprint of the problem. The hasher is seeded
    /// with a constant, so the value survives across processes.
    pub fn fingerprint(&self) -> u64 {
        FixedState::with_seed(0).hash_one(self)
    }
}

impl core::fmt::Display for PlanKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "shape {:?} permutation {:?} {} on {}",
            self.shape, self.permutation, self.elem, self.device
        )
    }
}

/// Opaque ticket for a created plan. Handles stay valid until
/// [`TransposeEngine::destroy`], independent of cache eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlanHandle(u32);

/// Cache effectiveness counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    /// Plan requests answered from the cache.
    pub hits: u64,
    /// Plan requests that ran a full search.
    pub misses: u64,
}

/// The front door: plan creation, caching, execution and teardown.
///
/// The engine owns an LRU cache keyed by [`PlanKey`] plus a handle
/// registry. Cached plans and live handles share plans through [`Arc`],
/// so eviction never invalidates a handle the caller still holds.
pub struct TransposeEngine {
    kernel: Arc<dyn TransposeKernel>,
    allocator: Arc<dyn DeviceAllocator>,
    plans: Mutex<HashMap<PlanHandle, Arc<TransposePlan>>>,
    cache: LruCache<PlanKey, Arc<TransposePlan>>,
    tuner: Autotuner,
    samples: usize,
    counter: AtomicU32,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl core::fmt::Debug for TransposeEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransposeEngine")
            .field("cache", &self.cache)
            .field("stats", &self.stats())
            .finish()
    }
}

impl TransposeEngine {
    /// Engine configured from [`GlobalConfig`].
    pub fn new(kernel: Arc<dyn TransposeKernel>, allocator: Arc<dyn DeviceAllocator>) -> Self {
        Self::with_config(kernel, allocator, &GlobalConfig::get())
    }

    /// Engine with an explicit configuration.
    pub fn with_config(
        kernel: Arc<dyn TransposeKernel>,
        allocator: Arc<dyn DeviceAllocator>,
        config: &GlobalConfig,
    ) -> Self {
        Self {
            kernel,
            allocator,
            plans: Mutex::new(HashMap::new()),
            cache: LruCache::new(config.cache.capacity),
            tuner: Autotuner::new(config.autotune.shortlist),
            samples: config.model.mbar_samples,
            counter: AtomicU32::new(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Create a plan using the analytic cost model, or reuse the cached
    /// plan for an identical problem.
    pub fn plan(
        &self,
        shape: &[usize],
        permutation: &[usize],
        elem_bytes: usize,
        stream: StreamId,
    ) -> Result<PlanHandle, PermuteError> {
        let key = self.key(shape, permutation, elem_bytes)?;
        if let Some(plan) = self.probe(&key) {
            return Ok(self.register(plan));
        }
        let candidates = self.search(&key, stream)?;
        let best = select_best(candidates)
            .ok_or_else(|| PermuteError::Internal("empty candidate list".to_string()))?;
        best.activate(&self.allocator)?;
        self.insert(key, Arc::new(best))
    }

    /// Create a plan by timing the short-listed candidates on the given
    /// buffers. Falls back to nothing: a problem whose candidates all
    /// fail to launch is an error.
    #[allow(clippy::too_many_arguments)]
    pub fn plan_measured(
        &self,
        shape: &[usize],
        permutation: &[usize],
        elem_bytes: usize,
        stream: StreamId,
        input: DevicePtr,
        output: DevicePtr,
        scale: Scale,
    ) -> Result<PlanHandle, PermuteError> {
        let key = self.key(shape, permutation, elem_bytes)?;
        if let Some(plan) = self.probe(&key) {
            return Ok(self.register(plan));
        }
        let candidates = self.search(&key, stream)?;
        let best = self
            .tuner
            .select(candidates, &self.kernel, &self.allocator, input, output, scale)?;
        best.activate(&self.allocator)?;
        self.insert(key, Arc::new(best))
    }

    /// Run the transposition described by `handle`.
    ///
    /// The caller's current device must be the one the plan was created
    /// for.
    pub fn execute(
        &self,
        handle: PlanHandle,
        input: DevicePtr,
        output: DevicePtr,
        scale: Scale,
    ) -> Result<(), PermuteError> {
        let plan = self.lookup(handle)?;
        let current = self.kernel.current_device();
        if current != plan.device {
            return Err(PermuteError::InvalidDevice {
                expected: plan.device,
                actual: current,
            });
        }
        self.kernel.launch(&plan, input, output, scale)?;
        Ok(())
    }

    /// Release a handle. The plan itself lives on while the cache or
    /// other handles still reference it.
    pub fn destroy(&self, handle: PlanHandle) -> Result<(), PermuteError> {
        self.lock_plans()
            .remove(&handle)
            .map(|_| ())
            .ok_or(PermuteError::InvalidPlan)
    }

    /// Launch parameters of a live plan.
    pub fn describe(&self, handle: PlanHandle) -> Result<PlanDescription, PermuteError> {
        Ok(self.lookup(handle)?.describe())
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn key(
        &self,
        shape: &[usize],
        permutation: &[usize],
        elem_bytes: usize,
    ) -> Result<PlanKey, PermuteError> {
        let elem = validate(shape, permutation, elem_bytes)?;
        Ok(PlanKey {
            shape: shape.to_vec(),
            permutation: permutation.to_vec(),
            elem,
            device: self.kernel.current_device(),
        })
    }

    fn probe(&self, key: &PlanKey) -> Option<Arc<TransposePlan>> {
        match self.cache.get(key) {
            Some(plan) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                log::debug!("cache hit for {key} (fingerprint {:#018x})", key.fingerprint());
                Some(plan)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn search(&self, key: &PlanKey, stream: StreamId) -> Result<Vec<TransposePlan>, PermuteError> {
        let props = self.kernel.properties(key.device);
        enumerate_plans(
            &key.shape,
            &key.permutation,
            key.elem,
            key.device,
            stream,
            &props,
            self.samples,
        )
    }

    fn insert(&self, key: PlanKey, plan: Arc<TransposePlan>) -> Result<PlanHandle, PermuteError> {
        if let Some(evicted) = self.cache.put(key, Arc::clone(&plan)) {
            log::debug!("evicted cached {evicted:?}");
        }
        Ok(self.register(plan))
    }

    fn register(&self, plan: Arc<TransposePlan>) -> PlanHandle {
        let handle = PlanHandle(self.counter.fetch_add(1, Ordering::Relaxed));
        self.lock_plans().insert(handle, plan);
        handle
    }

    fn lookup(&self, handle: PlanHandle) -> Result<Arc<TransposePlan>, PermuteError> {
        self.lock_plans()
            .get(&handle)
            .cloned()
            .ok_or(PermuteError::InvalidPlan)
    }

    fn lock_plans(&self) -> MutexGuard<'_, HashMap<PlanHandle, Arc<TransposePlan>>> {
        match self.plans.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Check a problem statement and resolve its element width.
fn validate(
    shape: &[usize],
    permutation: &[usize],
    elem_bytes: usize,
) -> Result<ElemSize, PermuteError> {
    if shape.is_empty() {
        return Err(PermuteError::InvalidParameter(
            "shape must have at least one axis".to_string(),
        ));
    }
    if shape.len() != permutation.len() {
        return Err(PermuteError::InvalidParameter(format!(
            "shape has {} axes but the permutation has {}",
            shape.len(),
            permutation.len()
        )));
    }
    if let Some(axis) = shape.iter().position(|&extent| extent == 0) {
        return Err(PermuteError::InvalidParameter(format!(
            "axis {axis} has extent zero"
        )));
    }
    let mut seen = vec![false; shape.len()];
    for &axis in permutation {
        if axis >= shape.len() || seen[axis] {
            return Err(PermuteError::InvalidParameter(format!(
                "permutation {permutation:?} is not a bijection over {} axes",
                shape.len()
            )));
        }
        seen[axis] = true;
    }
    ElemSize::from_bytes(elem_bytes).ok_or_else(|| {
        PermuteError::InvalidParameter(format!(
            "unsupported element width of {elem_bytes} bytes"
        ))
    })
}
