use anyhow::{anyhow, ensure, Result};
use bytemuck::cast_slice;
use futures::channel::oneshot;
use log::{debug, error, info, warn};
use pollster::block_on;
use rmk_accelerate_api::{
    AccelProvider, ApiDeviceInfo, GpuTensorHandle, HostTensorOwned, HostTensorView,
    ProviderPrecision, ProviderTelemetry, UnaryPowerOp,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::info_span;
use wgpu::util::DeviceExt;

use crate::backend::wgpu::bindings::{INPUT_BINDING, OUTPUT_BINDING, PARAMS_BINDING};
use crate::backend::wgpu::config::{
    self, WorkgroupConfig, BUFFER_RESIDENCY_MAX_PER_KEY, WORKGROUP_SIZE,
};
use crate::backend::wgpu::dispatch;
use crate::backend::wgpu::dispatch::unary_power::UnaryPowerLaunch;
use crate::backend::wgpu::metrics::WgpuMetrics;
use crate::backend::wgpu::params::LenOpParams;
use crate::backend::wgpu::pipelines::WgpuPipelines;
use crate::backend::wgpu::residency::BufferResidency;
use crate::backend::wgpu::resources::{KernelResourceRegistry, UniformBufferKey};
use crate::backend::wgpu::types::{NumericPrecision, UnaryOpCode};
use crate::telemetry::AccelTelemetry;

#[derive(Clone, Debug)]
pub struct WgpuProviderOptions {
    pub power_preference: wgpu::PowerPreference,
    pub force_fallback_adapter: bool,
}

impl Default for WgpuProviderOptions {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
        }
    }
}

pub struct WgpuProvider {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_info: wgpu::AdapterInfo,
    adapter_limits: wgpu::Limits,
    workgroup_config: WorkgroupConfig,
    buffers: Mutex<HashMap<u64, BufferEntry>>,
    buffer_residency: BufferResidency,
    next_id: AtomicU64,
    pipelines: WgpuPipelines,
    runtime_device_id: u32,
    precision: NumericPrecision,
    element_size: usize,
    kernel_resources: KernelResourceRegistry,
    // Held across write_buffer + submit so concurrent callers cannot
    // interleave writes to the shared params uniform.
    dispatch_lock: Mutex<()>,
    metrics: WgpuMetrics,
    telemetry: AccelTelemetry,
}

#[derive(Clone)]
struct BufferEntry {
    buffer: Arc<wgpu::Buffer>,
    len: usize,
    shape: Vec<usize>,
    precision: NumericPrecision,
}

impl WgpuProvider {
    pub fn new(opts: WgpuProviderOptions) -> Result<Self> {
        block_on(Self::new_async(opts))
    }

    async fn new_async(opts: WgpuProviderOptions) -> Result<Self> {
        let instance_desc = wgpu::InstanceDescriptor {
            backends: wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all()),
            ..Default::default()
        };
        let instance = wgpu::Instance::new(instance_desc);
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: opts.power_preference,
                force_fallback_adapter: opts.force_fallback_adapter,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| anyhow!("wgpu: no compatible adapter found"))?;

        let adapter_info = adapter.get_info();
        let adapter_features = adapter.features();
        let forced_precision = std::env::var("RMK_WGPU_FORCE_PRECISION")
            .ok()
            .and_then(|raw| NumericPrecision::parse(&raw));

        let precision = {
            let mut p = forced_precision.unwrap_or(NumericPrecision::F32);
            if p == NumericPrecision::F64 && !adapter_features.contains(wgpu::Features::SHADER_F64)
            {
                warn!(
                    "rust_metal_kernel: requested f64 precision but adapter lacks SHADER_F64; falling back to f32"
                );
                p = NumericPrecision::F32;
            }
            p
        };
        if forced_precision.is_none() {
            info!(
                "rust_metal_kernel: defaulting to {} kernels for adapter '{}'",
                precision.as_str(),
                adapter_info.name
            );
        }

        let required_features = match precision {
            NumericPrecision::F64 => wgpu::Features::SHADER_F64,
            NumericPrecision::F32 => wgpu::Features::empty(),
        };
        let (device_raw, queue_raw) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("rust_metal_kernel device"),
                    required_features,
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await?;
        let device = Arc::new(device_raw);
        install_device_error_handlers(&device);
        let queue = Arc::new(queue_raw);
        let satisfied_limits = device.limits();

        let requested_wg = config::env_requested_workgroup_size().unwrap_or(WORKGROUP_SIZE);
        let workgroup_config = WorkgroupConfig::new(&satisfied_limits, requested_wg);
        info!(
            "WGPU adapter '{}' ready: backend={:?} wg={} precision={} max_wg_x={} max_invocations={}",
            adapter_info.name,
            adapter_info.backend,
            workgroup_config.scalar,
            precision.as_str(),
            workgroup_config.max_x,
            workgroup_config.adapter_max_invocations
        );

        let metrics = WgpuMetrics::new();
        let pipelines = WgpuPipelines::new(&device, precision, workgroup_config.scalar);
        metrics.inc_pipeline_build();

        Ok(Self {
            device,
            queue,
            adapter_info,
            adapter_limits: satisfied_limits,
            workgroup_config,
            buffers: Mutex::new(HashMap::new()),
            buffer_residency: BufferResidency::new(BUFFER_RESIDENCY_MAX_PER_KEY),
            next_id: AtomicU64::new(1),
            pipelines,
            runtime_device_id: rmk_accelerate_api::next_device_id(),
            precision,
            element_size: precision.element_size(),
            kernel_resources: KernelResourceRegistry::new(),
            dispatch_lock: Mutex::new(()),
            metrics,
            telemetry: AccelTelemetry::new(),
        })
    }

    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_config.scalar
    }

    pub fn metrics(&self) -> &WgpuMetrics {
        &self.metrics
    }

    /// Freed buffers currently held for reuse.
    pub fn pooled_buffers(&self) -> usize {
        self.buffer_residency.pooled()
    }

    fn submit(&self, enc: wgpu::CommandEncoder) {
        dispatch::common::submit(&self.device, &self.queue, enc);
    }

    /// Largest byte size a tensor may have: it must fit in one buffer and be
    /// bindable as a whole storage binding.
    fn max_tensor_bytes(&self) -> u64 {
        self.adapter_limits
            .max_buffer_size
            .min(u64::from(self.adapter_limits.max_storage_buffer_binding_size))
    }

    /// Largest element count `upload` accepts at the device precision.
    pub fn max_tensor_elements(&self) -> usize {
        usize::try_from(self.max_tensor_bytes() / self.element_size as u64).unwrap_or(usize::MAX)
    }

    fn check_tensor_size(&self, len: usize, label: &str) -> Result<u64> {
        let size_bytes = (len as u64).saturating_mul(self.element_size as u64);
        ensure!(
            size_bytes <= self.max_tensor_bytes(),
            "{}: requested {} bytes exceeds device max {} (max_buffer_size={}, max_storage_buffer_binding_size={})",
            label,
            size_bytes,
            self.max_tensor_bytes(),
            self.adapter_limits.max_buffer_size,
            self.adapter_limits.max_storage_buffer_binding_size
        );
        Ok(size_bytes)
    }

    fn create_storage_buffer_checked(&self, len: usize, label: &str) -> Result<Arc<wgpu::Buffer>> {
        let size_bytes = self.check_tensor_size(len, label)?;
        let (buffer, reused) =
            self.buffer_residency
                .acquire(&self.device, len, self.element_size, label);
        if !reused && size_bytes >= (256u64 << 20) {
            warn!(
                "{}: large GPU allocation ({} bytes) len={} elems",
                label, size_bytes, len
            );
        }
        Ok(buffer)
    }

    /// Run `f` inside a validation error scope and turn a captured error into
    /// `Err`. Callers hold `dispatch_lock`, since scopes are per device.
    fn with_validation_scope<T>(&self, context: &str, f: impl FnOnce() -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let out = f();
        match block_on(self.device.pop_error_scope()) {
            Some(err) => Err(anyhow!("{context}: wgpu validation failed: {err}")),
            None => Ok(out),
        }
    }

    fn register_existing_buffer(
        &self,
        buffer: Arc<wgpu::Buffer>,
        shape: Vec<usize>,
        len: usize,
    ) -> GpuTensorHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = BufferEntry {
            buffer,
            len,
            shape: shape.clone(),
            precision: self.precision,
        };
        self.buffers
            .lock()
            .expect("buffer mutex poisoned")
            .insert(id, entry);
        log::trace!("wgpu register id={} len={} shape={:?}", id, len, &shape);
        GpuTensorHandle {
            shape,
            device_id: self.runtime_device_id,
            buffer_id: id,
        }
    }

    fn get_entry(&self, handle: &GpuTensorHandle) -> Result<BufferEntry> {
        if handle.device_id != self.runtime_device_id {
            return Err(anyhow!(
                "handle device mismatch: expected {}, got {}",
                self.runtime_device_id,
                handle.device_id
            ));
        }
        let guard = self.buffers.lock().expect("buffer mutex poisoned");
        guard
            .get(&handle.buffer_id)
            .cloned()
            .ok_or_else(|| anyhow!("buffer not found: {}", handle.buffer_id))
    }

    fn map_readback_bytes_sync(
        &self,
        staging: wgpu::Buffer,
        size_bytes: u64,
        context: &str,
    ) -> Result<Vec<u8>> {
        block_on(self.map_readback_bytes(staging, size_bytes, context))
    }

    async fn map_readback_bytes(
        &self,
        staging: wgpu::Buffer,
        size_bytes: u64,
        context: &str,
    ) -> Result<Vec<u8>> {
        let size_usize = usize::try_from(size_bytes)
            .map_err(|_| anyhow!("{context}: readback size overflow"))?;
        let slice = staging.slice(..);
        let (tx, rx) = oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.device.poll(wgpu::Maintain::Wait);
        let map_result = rx
            .await
            .map_err(|_| anyhow!("{context}: map_async callback dropped"))?;
        map_result.map_err(|e: wgpu::BufferAsyncError| anyhow!(e))?;
        let data = slice.get_mapped_range();
        let mut out = vec![0u8; size_usize];
        out.copy_from_slice(&data);
        drop(data);
        staging.unmap();
        Ok(out)
    }

    pub(crate) fn unary_power_exec(
        &self,
        op: UnaryOpCode,
        a: &GpuTensorHandle,
    ) -> Result<GpuTensorHandle> {
        let entry_a = self.get_entry(a)?;
        let len = entry_a.len;
        let out_buffer = self.create_storage_buffer_checked(len, "rmk-unary-power-out")?;
        if len == 0 {
            return Ok(self.register_existing_buffer(out_buffer, entry_a.shape, 0));
        }
        ensure!(len <= u32::MAX as usize, "tensor too large for GPU buffer");

        let _span = info_span!("gpu.dispatch.unary_power", op = ?op, len).entered();
        let start = Instant::now();
        let workgroup = self.workgroup_config.scalar;
        if len > config::chunk_capacity(workgroup) {
            self.metrics.inc_chunked_dispatch();
            debug!(
                "unary_power: len={} exceeds one dispatch ({}); splitting",
                len,
                config::chunk_capacity(workgroup)
            );
        }
        let params_buffer = self.kernel_resources.uniform_buffer(
            &self.device,
            UniformBufferKey::LenOpParams,
            std::mem::size_of::<LenOpParams>() as u64,
            "rmk-unary-power-params",
        );

        let _dispatch = self.dispatch_lock.lock().expect("dispatch mutex poisoned");
        let launched = self.with_validation_scope("unary_power", || {
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("rmk-unary-power-bind"),
                layout: &self.pipelines.unary_power.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: INPUT_BINDING,
                        resource: entry_a.buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: OUTPUT_BINDING,
                        resource: out_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: PARAMS_BINDING,
                        resource: params_buffer.as_entire_binding(),
                    },
                ],
            });
            let launch = UnaryPowerLaunch {
                pipeline: &self.pipelines.unary_power.pipeline,
                bind_group: &bind_group,
                params: params_buffer.as_ref(),
                workgroup,
            };
            dispatch::unary_power::run(&self.device, &self.queue, &launch, op, len)
        });
        let chunks = match launched {
            Ok(chunks) => chunks,
            Err(err) => {
                self.buffer_residency.release(len, out_buffer);
                return Err(err);
            }
        };
        log::trace!("unary_power: op={:?} len={} chunks={}", op, len, chunks);
        self.telemetry.record_unary_power_duration(start.elapsed());
        Ok(self.register_existing_buffer(out_buffer, entry_a.shape, len))
    }
}

impl AccelProvider for WgpuProvider {
    fn upload(&self, host: &HostTensorView) -> Result<GpuTensorHandle> {
        let _span = info_span!(
            "gpu.transfer.upload",
            shape = ?host.shape,
            len = host.data.len()
        )
        .entered();
        let len = host.data.len();
        let expected: usize = host.shape.iter().product();
        ensure!(
            expected == len,
            "upload: shape {:?} implies {} elements but {} were provided",
            host.shape,
            expected,
            len
        );
        let bytes = self.check_tensor_size(len, "upload")?;
        let buffer = if len == 0 {
            self.create_storage_buffer_checked(0, "rmk-upload-empty")?
        } else {
            let usage = wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC;
            match self.precision {
                NumericPrecision::F64 => {
                    Arc::new(
                        self.device
                            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                                label: Some("rmk-upload-buffer"),
                                contents: cast_slice(host.data),
                                usage,
                            }),
                    )
                }
                NumericPrecision::F32 => {
                    let data_f32: Vec<f32> = host.data.iter().map(|v| *v as f32).collect();
                    Arc::new(
                        self.device
                            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                                label: Some("rmk-upload-buffer"),
                                contents: cast_slice(&data_f32),
                                usage,
                            }),
                    )
                }
            }
        };
        self.telemetry.record_upload_bytes(bytes);
        Ok(self.register_existing_buffer(buffer, host.shape.to_vec(), len))
    }

    fn download(&self, h: &GpuTensorHandle) -> Result<HostTensorOwned> {
        let _span = info_span!(
            "gpu.transfer.download",
            shape = ?h.shape,
            buffer_id = h.buffer_id
        )
        .entered();
        let entry = self.get_entry(h)?;
        if entry.len == 0 {
            return Ok(HostTensorOwned {
                data: Vec::new(),
                shape: h.shape.clone(),
            });
        }

        let size_bytes = (entry.len * entry.precision.element_size()) as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("rmk-download-staging"),
            size: size_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("rmk-download-encoder"),
            });
        encoder.copy_buffer_to_buffer(entry.buffer.as_ref(), 0, &staging, 0, size_bytes);
        self.submit(encoder);

        let bytes = self.map_readback_bytes_sync(staging, size_bytes, "download")?;
        let data = decode_elements(&bytes, entry.precision);
        self.telemetry.record_download_bytes(size_bytes);
        log::trace!("wgpu download complete id={} len={}", h.buffer_id, data.len());
        Ok(HostTensorOwned {
            data,
            shape: entry.shape,
        })
    }

    fn free(&self, h: &GpuTensorHandle) -> Result<()> {
        log::trace!("wgpu free id={}", h.buffer_id);
        let removed = self
            .buffers
            .lock()
            .expect("buffer mutex poisoned")
            .remove(&h.buffer_id);
        if let Some(entry) = removed {
            if Arc::strong_count(&entry.buffer) == 1 {
                self.buffer_residency.release(entry.len, entry.buffer);
            }
        }
        Ok(())
    }

    fn device_id(&self) -> u32 {
        self.runtime_device_id
    }

    fn device_info(&self) -> String {
        format!(
            "{} ({:?}, {})",
            self.adapter_info.name,
            self.adapter_info.backend,
            self.precision.as_str()
        )
    }

    fn device_info_struct(&self) -> ApiDeviceInfo {
        ApiDeviceInfo {
            device_id: self.runtime_device_id,
            name: self.adapter_info.name.clone(),
            vendor: format!("0x{:04x}", self.adapter_info.vendor),
            memory_bytes: None,
            backend: Some(format!("{:?}", self.adapter_info.backend).to_ascii_lowercase()),
        }
    }

    fn precision(&self) -> ProviderPrecision {
        match self.precision {
            NumericPrecision::F32 => ProviderPrecision::F32,
            NumericPrecision::F64 => ProviderPrecision::F64,
        }
    }

    fn unary_power(&self, a: &GpuTensorHandle, op: UnaryPowerOp) -> Result<GpuTensorHandle> {
        self.unary_power_exec(op.into(), a)
    }

    fn warmup(&self) {
        if std::env::var("RMK_WGPU_SKIP_WARMUP")
            .ok()
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
        {
            info!("rust_metal_kernel: skipping wgpu warmup (RMK_WGPU_SKIP_WARMUP=1)");
            return;
        }
        let start = Instant::now();
        dispatch::unary_power::warmup(
            &self.device,
            &self.queue,
            &self.pipelines.unary_power.pipeline,
        );
        let ms = start.elapsed().as_millis().min(u64::MAX as u128) as u64;
        self.metrics.set_last_warmup_millis(ms);
        debug!("rust_metal_kernel: wgpu warmup finished in {ms} ms");
    }

    fn last_warmup_millis(&self) -> Option<u64> {
        match self.metrics.last_warmup_millis() {
            0 => None,
            ms => Some(ms),
        }
    }

    fn telemetry_snapshot(&self) -> ProviderTelemetry {
        self.telemetry.snapshot()
    }

    fn reset_telemetry(&self) {
        self.telemetry.reset();
        self.metrics.reset();
    }
}

/// Readback bytes are not guaranteed to be aligned for `f64`, so decode
/// element by element instead of casting the slice.
fn decode_elements(bytes: &[u8], precision: NumericPrecision) -> Vec<f64> {
    match precision {
        NumericPrecision::F64 => bytes
            .chunks_exact(8)
            .map(|chunk| f64::from_ne_bytes([
                chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
            ]))
            .collect(),
        NumericPrecision::F32 => bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64)
            .collect(),
    }
}

fn install_device_error_handlers(device: &wgpu::Device) {
    device.on_uncaptured_error(Box::new(|error| {
        error!("WGPU uncaptured error: {:?}", error);
    }));
    device.set_device_lost_callback(|reason, message| {
        error!("WGPU device lost: reason={:?}, message={}", reason, message);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_f32_widens_to_f64() {
        let raw: Vec<u8> = [1.5f32, -2.0, 9.0]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        assert_eq!(decode_elements(&raw, NumericPrecision::F32), vec![1.5, -2.0, 9.0]);
    }

    #[test]
    fn decode_f64_handles_unaligned_input() {
        let mut raw = vec![0u8];
        raw.extend(27.0f64.to_ne_bytes());
        raw.extend(64.0f64.to_ne_bytes());
        assert_eq!(decode_elements(&raw[1..], NumericPrecision::F64), vec![27.0, 64.0]);
    }
}
