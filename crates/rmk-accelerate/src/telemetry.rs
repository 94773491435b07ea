use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rmk_accelerate_api::{ProviderDispatchStats, ProviderTelemetry};

#[derive(Default)]
pub struct AccelTelemetry {
    unary_power_count: AtomicU64,
    unary_power_wall_ns: AtomicU64,
    upload_bytes: AtomicU64,
    download_bytes: AtomicU64,
}

impl AccelTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_upload_bytes(&self, bytes: u64) {
        if bytes > 0 {
            self.upload_bytes.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    pub fn record_download_bytes(&self, bytes: u64) {
        if bytes > 0 {
            self.download_bytes.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    pub fn record_unary_power(&self, wall_ns: u64) {
        self.unary_power_count.fetch_add(1, Ordering::Relaxed);
        if wall_ns > 0 {
            self.unary_power_wall_ns.fetch_add(wall_ns, Ordering::Relaxed);
        }
    }

    pub fn record_unary_power_duration(&self, duration: Duration) {
        self.record_unary_power(saturating_duration_ns(duration));
    }

    pub fn reset(&self) {
        self.unary_power_count.store(0, Ordering::Relaxed);
        self.unary_power_wall_ns.store(0, Ordering::Relaxed);
        self.upload_bytes.store(0, Ordering::Relaxed);
        self.download_bytes.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProviderTelemetry {
        ProviderTelemetry {
            unary_power: ProviderDispatchStats {
                count: self.unary_power_count.load(Ordering::Relaxed),
                total_wall_time_ns: self.unary_power_wall_ns.load(Ordering::Relaxed),
            },
            upload_bytes: self.upload_bytes.load(Ordering::Relaxed),
            download_bytes: self.download_bytes.load(Ordering::Relaxed),
        }
    }
}

fn saturating_duration_ns(duration: Duration) -> u64 {
    duration.as_nanos().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_byte_transfers_are_not_counted() {
        let t = AccelTelemetry::new();
        t.record_upload_bytes(0);
        t.record_download_bytes(32);
        let snap = t.snapshot();
        assert_eq!(snap.upload_bytes, 0);
        assert_eq!(snap.download_bytes, 32);
    }

    #[test]
    fn reset_clears_dispatch_stats() {
        let t = AccelTelemetry::new();
        t.record_unary_power_duration(Duration::from_micros(3));
        assert_eq!(t.snapshot().unary_power.count, 1);
        assert_eq!(t.snapshot().unary_power.total_wall_time_ns, 3_000);
        t.reset();
        assert_eq!(t.snapshot(), ProviderTelemetry::default());
    }
}
