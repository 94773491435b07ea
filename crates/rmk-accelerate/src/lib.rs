//! rust_metal_kernel compute layer.
//!
//! - `backend::wgpu` runs the elementwise kernels on whatever GPU wgpu finds
//!   (Metal on macOS, Vulkan/DX12 elsewhere).
//! - `simple_provider` keeps everything in host memory when no adapter is usable.
//! - `kernels` is the slice-in, vector-out surface used by the CLI and the
//!   Python module.

pub mod backend;
pub mod kernels;
pub mod simple_provider;
pub mod telemetry;

pub use kernels::{cube_numbers, square_numbers, KernelError};
pub use rmk_accelerate_api::UnaryPowerOp;

use serde::{Deserialize, Serialize};

/// Preferred acceleration provider selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccelerateProviderPreference {
    #[default]
    Auto,
    Wgpu,
    #[serde(alias = "inprocess")]
    InProcess,
}

/// Power preference used when initializing a WGPU backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccelPowerPreference {
    #[default]
    Auto,
    HighPerformance,
    LowPower,
}

/// Initialization options for selecting and configuring the acceleration provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccelerateInitOptions {
    pub enabled: bool,
    pub provider: AccelerateProviderPreference,
    pub allow_inprocess_fallback: bool,
    pub wgpu_power_preference: AccelPowerPreference,
    pub wgpu_force_fallback_adapter: bool,
}

impl Default for AccelerateInitOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: AccelerateProviderPreference::Auto,
            allow_inprocess_fallback: true,
            wgpu_power_preference: AccelPowerPreference::Auto,
            wgpu_force_fallback_adapter: false,
        }
    }
}

/// Initialize the global acceleration provider using the supplied options.
pub fn initialize_acceleration_provider_with(options: &AccelerateInitOptions) {
    if rmk_accelerate_api::provider().is_some() {
        return;
    }

    let inprocess_allowed = options.allow_inprocess_fallback
        || matches!(options.provider, AccelerateProviderPreference::InProcess);

    if !options.enabled {
        if inprocess_allowed {
            simple_provider::register_inprocess_provider();
            log::info!(
                "rust_metal_kernel: acceleration disabled; using in-process provider for compatibility"
            );
        } else {
            log::info!("rust_metal_kernel: acceleration disabled; no provider registered");
        }
        return;
    }

    let registered = {
        #[cfg(feature = "wgpu")]
        {
            let mut reg = false;
            if matches!(
                options.provider,
                AccelerateProviderPreference::Auto | AccelerateProviderPreference::Wgpu
            ) {
                let wgpu_options = backend::wgpu::provider::WgpuProviderOptions {
                    power_preference: match options.wgpu_power_preference {
                        AccelPowerPreference::Auto => wgpu::PowerPreference::HighPerformance,
                        AccelPowerPreference::HighPerformance => {
                            wgpu::PowerPreference::HighPerformance
                        }
                        AccelPowerPreference::LowPower => wgpu::PowerPreference::LowPower,
                    },
                    force_fallback_adapter: options.wgpu_force_fallback_adapter,
                };

                match backend::wgpu::provider::register_wgpu_provider(wgpu_options) {
                    Ok(provider) => {
                        use rmk_accelerate_api::AccelProvider;
                        reg = true;
                        let info = provider.device_info_struct();
                        log::info!(
                            "rust_metal_kernel: using WGPU provider {} (vendor: {}, backend: {})",
                            info.name,
                            info.vendor,
                            info.backend.as_deref().unwrap_or("unknown")
                        );
                        provider.warmup();
                    }
                    Err(err) => {
                        log::warn!(
                            "rust_metal_kernel: failed to initialize WGPU provider, falling back: {err}"
                        );
                    }
                }
            }
            reg
        }
        #[cfg(not(feature = "wgpu"))]
        {
            if matches!(options.provider, AccelerateProviderPreference::Wgpu) {
                log::warn!(
                    "rust_metal_kernel: WGPU provider requested but crate built without 'wgpu' feature"
                );
            }
            false
        }
    };

    if !registered {
        if inprocess_allowed {
            simple_provider::register_inprocess_provider();
            log::info!("rust_metal_kernel: using in-process acceleration provider");
        } else {
            log::warn!("rust_metal_kernel: no acceleration provider registered");
        }
    }
}

/// Initialize the acceleration provider using default options.
pub fn initialize_acceleration_provider() {
    initialize_acceleration_provider_with(&AccelerateInitOptions::default());
}
