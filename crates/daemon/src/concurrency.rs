//! Worker pool sizing
//!
//! Resolves the number of queue workers from configuration and CPU core count.
//! Each worker runs at most one FFmpeg process, so the pool size bounds the
//! number of concurrent encodes.

use crate::config::Config;

/// Cap on workers when the count is derived from the core count.
const MAX_DERIVED_WORKERS: u32 = 4;

/// Worker plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Number of queue workers to spawn
    pub workers: u32,
}

impl WorkerPlan {
    /// Derive a worker plan from configuration
    ///
    /// An explicit non-zero `queue.workers` is used unchanged. Zero means
    /// one worker per logical core, capped at 4.
    pub fn derive(cfg: &Config) -> Self {
        Self::for_cores(cfg.queue.workers, num_cpus::get() as u32)
    }

    /// Plan for a known core count
    pub fn for_cores(configured_workers: u32, total_cores: u32) -> Self {
        let workers = if configured_workers > 0 {
            configured_workers
        } else {
            derive_workers(total_cores)
        };

        Self {
            total_cores,
            workers,
        }
    }
}

fn derive_workers(cores: u32) -> u32 {
    cores.clamp(1, MAX_DERIVED_WORKERS)
}

/// Public function to derive a worker plan from configuration
pub fn derive_plan(cfg: &Config) -> WorkerPlan {
    WorkerPlan::derive(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // *For any* core count with `workers = 0`, the plan SHALL use
    // min(cores, 4) workers and never fewer than one.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_worker_derivation(cores in 0u32..256) {
            let plan = WorkerPlan::for_cores(0, cores);

            prop_assert_eq!(plan.total_cores, cores);
            let expected = cores.clamp(1, 4);
            prop_assert_eq!(
                plan.workers, expected,
                "For {} cores, expected {} workers but got {}",
                cores, expected, plan.workers
            );
        }

        // *For any* explicit non-zero worker count, the plan SHALL use it unchanged.
        #[test]
        fn prop_explicit_config_override(cores in 1u32..256, explicit in 1u32..64) {
            let plan = WorkerPlan::for_cores(explicit, cores);
            prop_assert_eq!(plan.workers, explicit);
        }
    }

    #[test]
    fn test_default_config_uses_four_workers() {
        let plan = derive_plan(&Config::default());
        assert_eq!(plan.workers, 4);
        assert!(plan.total_cores >= 1);
    }

    #[test]
    fn test_auto_workers_from_detected_cores() {
        let mut cfg = Config::default();
        cfg.queue.workers = 0;

        let plan = derive_plan(&cfg);
        assert!(plan.workers >= 1 && plan.workers <= 4);
    }
}
