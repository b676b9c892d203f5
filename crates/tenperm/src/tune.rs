//! Measurement-based plan selection.
//!
//! The cost model ranks candidates; the autotuner takes the short list
//! of the best-ranked ones, runs each once on the device and keeps the
//! fastest. A candidate whose activation or launch fails is logged and
//! skipped rather than failing the whole search.

use std::sync::Arc;
use std::time::Duration;

use crate::error::PermuteError;
use crate::kernel::{Scale, TransposeKernel};
use crate::memory::{DeviceAllocator, DevicePtr};
use crate::plan::TransposePlan;

/// Runs the benchmark pass over a ranked candidate list.
#[derive(Debug, Clone, derive_new::new)]
pub struct Autotuner {
    /// How many of the best-ranked candidates to measure.
    pub shortlist: usize,
}

impl Autotuner {
    /// Measure the top candidates on real data and return the fastest.
    ///
    /// `candidates` may be unsorted; the model ranking decides which
    /// ones get benchmarked. Ties on measured time keep the earlier,
    /// better-ranked candidate.
    pub fn select(
        &self,
        mut candidates: Vec<TransposePlan>,
        kernel: &Arc<dyn TransposeKernel>,
        allocator: &Arc<dyn DeviceAllocator>,
        input: DevicePtr,
        output: DevicePtr,
        scale: Scale,
    ) -> Result<TransposePlan, PermuteError> {
        candidates.sort_by(|a, b| a.cmp_rank(b));
        candidates.truncate(self.shortlist.max(1));

        let mut best: Option<(usize, Duration)> = None;
        for (index, plan) in candidates.iter().enumerate() {
            if let Err(err) = plan.activate(allocator) {
                log::warn!("skipping candidate {plan:?}: activation failed: {err}");
                continue;
            }
            match kernel.launch_timed(plan, input, output, scale) {
                Ok(elapsed) => {
                    log::debug!("measured {plan:?}: {elapsed:?}");
                    if best.is_none_or(|(_, current)| elapsed < current) {
                        best = Some((index, elapsed));
                    }
                }
                Err(err) => {
                    log::warn!("skipping candidate {plan:?}: launch failed: {err}");
                }
            }
        }

        let (index, elapsed) = best.ok_or_else(|| {
            PermuteError::Internal("all autotune candidates failed".to_string())
        })?;
        let winner = candidates.swap_remove(index);
        log::info!("autotune winner in {elapsed:?}: {}", winner.describe());
        Ok(winner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelError;
    use crate::memory::AllocError;
    use crate::plan::split::{AxisPartition, Strategy};
    use std::sync::Mutex;
    use tenperm_common::{DeviceId, Dim3, ElemSize, HardwareProperties, StreamId};

    fn props() -> HardwareProperties {
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

    fn candidate(reg: u32, cycles: f64) -> TransposePlan {
        let mut part = AxisPartition::new(Strategy::Packed, 32);
        part.update(1, 1, &[32, 20], &[1, 0]);
        let mut plan = TransposePlan::build(
            part,
            &[32, 20],
            &[1, 0],
            ElemSize::Bytes4,
            reg,
            DeviceId::new(0),
            StreamId::default(),
            &props(),
        )
        .unwrap();
        plan.metrics.cycles = cycles;
        plan
    }

    struct NullAllocator;

    impl DeviceAllocator for NullAllocator {
        fn allocate(&self, _: DeviceId, _: usize) -> Result<DevicePtr, AllocError> {
            Ok(DevicePtr(1))
        }
        fn deallocate(&self, _: DeviceId, _: DevicePtr) {}
        fn write(&self, _: DeviceId, _: DevicePtr, _: &[u8]) -> Result<(), AllocError> {
            Ok(())
        }
    }

    /// Kernel whose launch times are scripted per call, with `0`
    /// meaning "fail this launch".
    struct ScriptedKernel {
        times: Mutex<Vec<u64>>,
    }

    impl ScriptedKernel {
        fn new(times: &[u64]) -> Self {
            let mut times: Vec<u64> = times.to_vec();
            times.reverse();
            Self {
                times: Mutex::new(times),
            }
        }
    }

    impl TransposeKernel for ScriptedKernel {
        fn current_device(&self) -> DeviceId {
            DeviceId::new(0)
        }
        fn properties(&self, _: DeviceId) -> HardwareProperties {
            props()
        }
        fn launch(
            &self,
            _: &TransposePlan,
            _: DevicePtr,
            _: DevicePtr,
            _: Scale,
        ) -> Result<(), KernelError> {
            Ok(())
        }
        fn launch_timed(
            &self,
            _: &TransposePlan,
            _: DevicePtr,
            _: DevicePtr,
            _: Scale,
        ) -> Result<Duration, KernelError> {
            let micros = self.times.lock().unwrap().pop().unwrap_or(1);
            if micros == 0 {
                Err(KernelError::Launch("scripted failure".to_string()))
            } else {
                Ok(Duration::from_micros(micros))
            }
        }
    }

    fn run(tuner: &Autotuner, times: &[u64], candidates: Vec<TransposePlan>) -> Result<TransposePlan, PermuteError> {
        let kernel: Arc<dyn TransposeKernel> = Arc::new(ScriptedKernel::new(times));
        let allocator: Arc<dyn DeviceAllocator> = Arc::new(NullAllocator);
        tuner.select(
            candidates,
            &kernel,
            &allocator,
            DevicePtr(1),
            DevicePtr(2),
            Scale::default(),
        )
    }

    #[test]
    fn fastest_measured_candidate_wins() {
        let tuner = Autotuner::new(3);
        // Candidates are ranked by cycles before measuring, so the
        // scripted times apply in cycle order: 10.0, 20.0, 30.0.
        let candidates = vec![candidate(1, 30.0), candidate(2, 10.0), candidate(4, 20.0)];
        let winner = run(&tuner, &[50, 5, 80], candidates).unwrap();
        assert_eq!(winner.geometry.reg_storage, 4);
    }

    #[test]
    fn failed_launches_are_skipped() {
        let tuner = Autotuner::new(3);
        let candidates = vec![candidate(1, 10.0), candidate(2, 20.0), candidate(4, 30.0)];
        let winner = run(&tuner, &[0, 0, 9], candidates).unwrap();
        assert_eq!(winner.geometry.reg_storage, 4);
    }

    #[test]
    fn all_failures_is_an_error() {
        let tuner = Autotuner::new(2);
        let candidates = vec![candidate(1, 10.0), candidate(2, 20.0)];
        let err = run(&tuner, &[0, 0], candidates).unwrap_err();
        assert!(matches!(err, PermuteError::Internal(_)));
    }

    #[test]
    fn shortlist_limits_how_many_launches_happen() {
        let tuner = Autotuner::new(1);
        // Only the best-ranked candidate is measured; a slow time for it
        // still wins because nothing else runs.
        let candidates = vec![candidate(1, 10.0), candidate(2, 20.0)];
        let winner = run(&tuner, &[100], candidates).unwrap();
        assert_eq!(winner.geometry.reg_storage, 1);
    }

    #[test]
    fn measurement_ties_keep_the_better_ranked_candidate() {
        let tuner = Autotuner::new(2);
        let candidates = vec![candidate(2, 20.0), candidate(1, 10.0)];
        let winner = run(&tuner, &[7, 7], candidates).unwrap();
        assert_eq!(winner.geometry.reg_storage, 1);
    }
}
