use anyhow::{anyhow, ensure, Result};
use once_cell::sync::OnceCell;
use rmk_accelerate_api::{
    AccelProvider, ApiDeviceInfo, GpuTensorHandle, HostTensorOwned, HostTensorView,
    ProviderPrecision, ProviderTelemetry, UnaryPowerOp,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::telemetry::AccelTelemetry;

/// Host-memory provider. Used when no GPU adapter is available and as the
/// reference the device kernels are checked against.
pub struct InProcessProvider {
    next_id: AtomicU64,
    buffers: Mutex<HashMap<u64, Vec<f64>>>,
    telemetry: AccelTelemetry,
}

impl InProcessProvider {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            buffers: Mutex::new(HashMap::new()),
            telemetry: AccelTelemetry::new(),
        }
    }

    fn insert(&self, data: Vec<f64>, shape: Vec<usize>) -> GpuTensorHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.buffers
            .lock()
            .expect("inprocess buffer mutex poisoned")
            .insert(id, data);
        GpuTensorHandle {
            shape,
            device_id: 0,
            buffer_id: id,
        }
    }

    fn read(&self, h: &GpuTensorHandle) -> Result<Vec<f64>> {
        self.buffers
            .lock()
            .expect("inprocess buffer mutex poisoned")
            .get(&h.buffer_id)
            .cloned()
            .ok_or_else(|| anyhow!("buffer not found: {}", h.buffer_id))
    }

    /// Number of live buffers. Lets tests check that callers free what they upload.
    pub fn live_buffers(&self) -> usize {
        self.buffers
            .lock()
            .map(|guard| guard.len())
            .unwrap_or(0)
    }
}

impl Default for InProcessProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AccelProvider for InProcessProvider {
    fn precision(&self) -> ProviderPrecision {
        ProviderPrecision::F64
    }

    fn upload(&self, host: &HostTensorView) -> Result<GpuTensorHandle> {
        let expected: usize = host.shape.iter().product();
        ensure!(
            expected == host.data.len(),
            "upload: shape {:?} implies {} elements but {} were provided",
            host.shape,
            expected,
            host.data.len()
        );
        self.telemetry
            .record_upload_bytes(std::mem::size_of_val(host.data) as u64);
        Ok(self.insert(host.data.to_vec(), host.shape.to_vec()))
    }

    fn download(&self, h: &GpuTensorHandle) -> Result<HostTensorOwned> {
        let data = self.read(h)?;
        self.telemetry
            .record_download_bytes(std::mem::size_of_val(data.as_slice()) as u64);
        Ok(HostTensorOwned {
            data,
            shape: h.shape.clone(),
        })
    }

    fn free(&self, h: &GpuTensorHandle) -> Result<()> {
        self.buffers
            .lock()
            .expect("inprocess buffer mutex poisoned")
            .remove(&h.buffer_id);
        Ok(())
    }

    fn device_info(&self) -> String {
        "in-process provider (host registry)".to_string()
    }

    fn device_info_struct(&self) -> ApiDeviceInfo {
        ApiDeviceInfo {
            device_id: 0,
            name: "InProcess".to_string(),
            vendor: "rust_metal_kernel".to_string(),
            memory_bytes: None,
            backend: Some("inprocess".to_string()),
        }
    }

    fn unary_power(&self, a: &GpuTensorHandle, op: UnaryPowerOp) -> Result<GpuTensorHandle> {
        let _span =
            tracing::debug_span!("host.unary_power", op = op.name(), len = a.len()).entered();
        let start = Instant::now();
        let data: Vec<f64> = self
            .read(a)?
            .into_iter()
            .map(|v| op.apply_host(v))
            .collect();
        self.telemetry.record_unary_power_duration(start.elapsed());
        Ok(self.insert(data, a.shape.clone()))
    }

    fn telemetry_snapshot(&self) -> ProviderTelemetry {
        self.telemetry.snapshot()
    }

    fn reset_telemetry(&self) {
        self.telemetry.reset();
    }
}

static INSTANCE: OnceCell<InProcessProvider> = OnceCell::new();

/// The process-wide in-process provider, created on first use.
pub fn inprocess_provider() -> &'static InProcessProvider {
    INSTANCE.get_or_init(InProcessProvider::new)
}

pub fn register_inprocess_provider() {
    let provider: &'static InProcessProvider = inprocess_provider();
    // Safety: we intentionally install a reference with 'static lifetime
    unsafe { rmk_accelerate_api::register_provider(provider) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_and_cube_on_host() {
        let p = InProcessProvider::new();
        let h = p
            .upload(&HostTensorView {
                data: &[1.0, 2.0, 3.0, 4.0],
                shape: &[4],
            })
            .unwrap();
        let sq = p.elem_square(&h).unwrap();
        let cu = p.elem_cube(&h).unwrap();
        assert_eq!(p.download(&sq).unwrap().data, vec![1.0, 4.0, 9.0, 16.0]);
        assert_eq!(p.download(&cu).unwrap().data, vec![1.0, 8.0, 27.0, 64.0]);
        assert_eq!(p.download(&cu).unwrap().shape, vec![4]);
    }

    #[test]
    fn freed_handle_is_gone() {
        let p = InProcessProvider::new();
        let h = p
            .upload(&HostTensorView {
                data: &[5.0],
                shape: &[1],
            })
            .unwrap();
        p.free(&h).unwrap();
        let err = p.download(&h).unwrap_err();
        assert!(err.to_string().contains("buffer not found"));
        assert_eq!(p.live_buffers(), 0);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let p = InProcessProvider::new();
        let err = p
            .upload(&HostTensorView {
                data: &[1.0, 2.0],
                shape: &[3],
            })
            .unwrap_err();
        assert!(err.to_string().contains("implies 3 elements"));
    }

    #[test]
    fn telemetry_tracks_transfers_and_dispatches() {
        let p = InProcessProvider::new();
        let h = p
            .upload(&HostTensorView {
                data: &[1.0, 2.0],
                shape: &[2],
            })
            .unwrap();
        let out = p.elem_cube(&h).unwrap();
        p.download(&out).unwrap();
        let snap = p.telemetry_snapshot();
        assert_eq!(snap.upload_bytes, 16);
        assert_eq!(snap.download_bytes, 16);
        assert_eq!(snap.unary_power.count, 1);
        p.reset_telemetry();
        assert_eq!(p.telemetry_snapshot().unary_power.count, 0);
    }
}
