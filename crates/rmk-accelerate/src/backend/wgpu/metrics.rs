use std::sync::atomic::{AtomicU64, Ordering};

pub struct WgpuMetrics {
    pipeline_builds: AtomicU64,
    chunked_dispatches: AtomicU64,
    last_warmup_millis: AtomicU64,
}

impl Default for WgpuMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WgpuMetrics {
    pub fn new() -> Self {
        Self {
            pipeline_builds: AtomicU64::new(0),
            chunked_dispatches: AtomicU64::new(0),
            last_warmup_millis: AtomicU64::new(0),
        }
    }

    pub fn inc_pipeline_build(&self) {
        self.pipeline_builds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_chunked_dispatch(&self) {
        self.chunked_dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> (u64, u64) {
        (
            self.pipeline_builds.load(Ordering::Relaxed),
            self.chunked_dispatches.load(Ordering::Relaxed),
        )
    }

    pub fn reset(&self) {
        self.chunked_dispatches.store(0, Ordering::Relaxed);
        self.last_warmup_millis.store(0, Ordering::Relaxed);
    }

    pub fn set_last_warmup_millis(&self, ms: u64) {
        self.last_warmup_millis.store(ms, Ordering::Relaxed);
    }

    pub fn last_warmup_millis(&self) -> u64 {
        self.last_warmup_millis.load(Ordering::Relaxed)
    }
}
