use anyhow::Result;
use once_cell::sync::OnceCell;

pub use crate::backend::wgpu::provider_impl::{WgpuProvider, WgpuProviderOptions};

/// Create the process-wide WGPU provider on first use and register it as the
/// global provider. Later calls re-register the same instance and ignore `opts`.
pub fn register_wgpu_provider(opts: WgpuProviderOptions) -> Result<&'static WgpuProvider> {
    static INSTANCE: OnceCell<&'static WgpuProvider> = OnceCell::new();
    let provider = *INSTANCE.get_or_try_init(move || -> Result<&'static WgpuProvider> {
        let provider = WgpuProvider::new(opts)?;
        Ok(Box::leak(Box::new(provider)))
    })?;
    // Safety: the provider is leaked above and lives for the rest of the process.
    unsafe { rmk_accelerate_api::register_provider(provider) };
    Ok(provider)
}
