use anyhow::anyhow;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

static GLOBAL_PROVIDER: Lazy<RwLock<Option<&'static dyn AccelProvider>>> =
    Lazy::new(|| RwLock::new(None));
static PROVIDER_REGISTRY: Lazy<RwLock<HashMap<u32, &'static dyn AccelProvider>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));
static DEVICE_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static THREAD_PROVIDER: Cell<Option<&'static dyn AccelProvider>> = const { Cell::new(None) };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuTensorHandle {
    pub shape: Vec<usize>,
    pub device_id: u32,
    pub buffer_id: u64,
}

impl GpuTensorHandle {
    /// Number of elements implied by the handle shape.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiDeviceInfo {
    pub device_id: u32,
    pub name: String,
    pub vendor: String,
    pub memory_bytes: Option<u64>,
    pub backend: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderPrecision {
    F32,
    F64,
}

impl ProviderPrecision {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderPrecision::F32 => "f32",
            ProviderPrecision::F64 => "f64",
        }
    }
}

/// Elementwise integer-power kernels exposed by every provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnaryPowerOp {
    Square,
    Cube,
}

impl UnaryPowerOp {
    pub fn exponent(self) -> u32 {
        match self {
            UnaryPowerOp::Square => 2,
            UnaryPowerOp::Cube => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            UnaryPowerOp::Square => "square",
            UnaryPowerOp::Cube => "cube",
        }
    }

    /// Host reference implementation. Device kernels must agree with this
    /// up to the provider precision.
    pub fn apply_host(self, value: f64) -> f64 {
        match self {
            UnaryPowerOp::Square => value * value,
            UnaryPowerOp::Cube => value * value * value,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDispatchStats {
    pub count: u64,
    pub total_wall_time_ns: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTelemetry {
    pub unary_power: ProviderDispatchStats,
    pub upload_bytes: u64,
    pub download_bytes: u64,
}

/// Device/provider interface that backends implement and register globally.
pub trait AccelProvider: Send + Sync {
    fn upload(&self, host: &HostTensorView) -> anyhow::Result<GpuTensorHandle>;
    fn download(&self, h: &GpuTensorHandle) -> anyhow::Result<HostTensorOwned>;
    fn free(&self, h: &GpuTensorHandle) -> anyhow::Result<()>;
    fn device_info(&self) -> String;
    fn device_id(&self) -> u32 {
        0
    }

    /// Structured device information. Default adapts from `device_info()`.
    fn device_info_struct(&self) -> ApiDeviceInfo {
        ApiDeviceInfo {
            device_id: self.device_id(),
            name: self.device_info(),
            vendor: String::new(),
            memory_bytes: None,
            backend: None,
        }
    }

    fn precision(&self) -> ProviderPrecision {
        ProviderPrecision::F64
    }

    /// Run an elementwise power kernel, producing a new tensor with the same shape.
    fn unary_power(
        &self,
        _a: &GpuTensorHandle,
        _op: UnaryPowerOp,
    ) -> anyhow::Result<GpuTensorHandle> {
        Err(anyhow!("unary_power not supported by provider"))
    }

    fn elem_square(&self, a: &GpuTensorHandle) -> anyhow::Result<GpuTensorHandle> {
        self.unary_power(a, UnaryPowerOp::Square)
    }

    fn elem_cube(&self, a: &GpuTensorHandle) -> anyhow::Result<GpuTensorHandle> {
        self.unary_power(a, UnaryPowerOp::Cube)
    }

    /// Compile and dispatch the provider's pipelines once so the first real
    /// call does not pay for shader compilation.
    fn warmup(&self) {}

    fn last_warmup_millis(&self) -> Option<u64> {
        None
    }

    fn telemetry_snapshot(&self) -> ProviderTelemetry {
        ProviderTelemetry::default()
    }

    fn reset_telemetry(&self) {}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostTensorOwned {
    pub data: Vec<f64>,
    pub shape: Vec<usize>,
}

#[derive(Debug)]
pub struct HostTensorView<'a> {
    pub data: &'a [f64],
    pub shape: &'a [usize],
}

fn replace_thread_provider(
    provider: Option<&'static dyn AccelProvider>,
) -> Option<&'static dyn AccelProvider> {
    THREAD_PROVIDER.with(|cell| cell.replace(provider))
}

fn current_thread_provider() -> Option<&'static dyn AccelProvider> {
    THREAD_PROVIDER.with(|cell| cell.get())
}

/// Register a global acceleration provider.
///
/// # Safety
/// - The caller must guarantee that `p` is valid for the entire program lifetime
///   (e.g., a `'static` singleton), as the registry stores the reference globally.
/// - Concurrent callers must ensure registration happens once or is properly
///   synchronized; re-registration silently replaces the previous provider.
pub unsafe fn register_provider(p: &'static dyn AccelProvider) {
    if let Ok(mut guard) = GLOBAL_PROVIDER.write() {
        *guard = Some(p);
    }
    if let Ok(mut guard) = PROVIDER_REGISTRY.write() {
        guard.insert(p.device_id(), p);
    }
}

pub fn provider() -> Option<&'static dyn AccelProvider> {
    if let Some(p) = current_thread_provider() {
        return Some(p);
    }
    GLOBAL_PROVIDER
        .read()
        .ok()
        .and_then(|guard| guard.as_ref().copied())
}

/// Clear the globally registered provider. Intended for tests to ensure deterministic behaviour.
pub fn clear_provider() {
    if let Ok(mut guard) = GLOBAL_PROVIDER.write() {
        *guard = None;
    }
    if let Ok(mut map) = PROVIDER_REGISTRY.write() {
        map.clear();
    }
}

pub fn provider_for_device(device_id: u32) -> Option<&'static dyn AccelProvider> {
    PROVIDER_REGISTRY
        .read()
        .ok()
        .and_then(|guard| guard.get(&device_id).copied())
        .or_else(provider)
}

pub fn provider_for_handle(handle: &GpuTensorHandle) -> Option<&'static dyn AccelProvider> {
    provider_for_device(handle.device_id)
}

pub fn next_device_id() -> u32 {
    DEVICE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Scoped per-thread provider override; the previous override is restored on drop.
pub struct ThreadProviderGuard {
    prev: Option<&'static dyn AccelProvider>,
}

impl ThreadProviderGuard {
    pub fn set(provider: Option<&'static dyn AccelProvider>) -> Self {
        let prev = replace_thread_provider(provider);
        ThreadProviderGuard { prev }
    }
}

impl Drop for ThreadProviderGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        replace_thread_provider(prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedProvider(&'static str);

    impl AccelProvider for NamedProvider {
        fn upload(&self, host: &HostTensorView) -> anyhow::Result<GpuTensorHandle> {
            Ok(GpuTensorHandle {
                shape: host.shape.to_vec(),
                device_id: 0,
                buffer_id: 1,
            })
        }

        fn download(&self, h: &GpuTensorHandle) -> anyhow::Result<HostTensorOwned> {
            Ok(HostTensorOwned {
                data: vec![0.0; h.len()],
                shape: h.shape.clone(),
            })
        }

        fn free(&self, _h: &GpuTensorHandle) -> anyhow::Result<()> {
            Ok(())
        }

        fn device_info(&self) -> String {
            self.0.to_string()
        }
    }

    static FIRST: NamedProvider = NamedProvider("first");
    static SECOND: NamedProvider = NamedProvider("second");

    #[test]
    fn power_ops_match_host_arithmetic() {
        assert_eq!(UnaryPowerOp::Square.apply_host(-3.0), 9.0);
        assert_eq!(UnaryPowerOp::Cube.apply_host(-3.0), -27.0);
        assert_eq!(UnaryPowerOp::Square.exponent(), 2);
        assert_eq!(UnaryPowerOp::Cube.exponent(), 3);
        assert!(UnaryPowerOp::Square.apply_host(f64::NAN).is_nan());
    }

    #[test]
    fn power_op_serializes_kebab_case() {
        let raw = serde_json::to_string(&UnaryPowerOp::Cube).unwrap();
        assert_eq!(raw, "\"cube\"");
    }

    #[test]
    fn default_unary_power_is_unsupported() {
        let h = FIRST
            .upload(&HostTensorView {
                data: &[1.0, 2.0],
                shape: &[2],
            })
            .unwrap();
        let err = FIRST.elem_square(&h).unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn thread_guard_overrides_and_restores() {
        let outer = ThreadProviderGuard::set(Some(&FIRST));
        assert_eq!(provider().map(|p| p.device_info()).as_deref(), Some("first"));
        {
            let _inner = ThreadProviderGuard::set(Some(&SECOND));
            assert_eq!(
                provider().map(|p| p.device_info()).as_deref(),
                Some("second")
            );
        }
        assert_eq!(provider().map(|p| p.device_info()).as_deref(), Some("first"));
        drop(outer);
    }

    // The only test in this crate that touches the global registry.
    #[test]
    fn global_registry_resolves_handles() {
        unsafe { register_provider(&SECOND) };
        let h = GpuTensorHandle {
            shape: vec![1],
            device_id: 0,
            buffer_id: 3,
        };
        let resolved = provider_for_handle(&h).map(|p| p.device_info());
        assert_eq!(resolved.as_deref(), Some("second"));
        // Unknown devices fall back to the global provider.
        let fallback = provider_for_device(99).map(|p| p.device_info());
        assert_eq!(fallback.as_deref(), Some("second"));
        clear_provider();
        assert!(provider().is_none());
        assert!(provider_for_device(0).is_none());

        let a = next_device_id();
        assert!(next_device_id() > a);
    }

    #[test]
    fn handle_len_follows_shape() {
        let h = GpuTensorHandle {
            shape: vec![2, 3],
            device_id: 0,
            buffer_id: 9,
        };
        assert_eq!(h.len(), 6);
        assert!(!h.is_empty());
    }
}
