pub mod bindings;
pub mod config;
pub mod dispatch;
pub mod metrics;
pub mod params;
pub mod pipelines;
pub mod provider;
pub mod provider_impl;
pub mod residency;
pub mod resources;
pub mod shaders;
pub mod types;
