use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum UniformBufferKey {
    LenOpParams,
}

/// Uniform buffers reused across dispatches. Each dispatch is submitted and
/// waited on before the next write, so one buffer per key is enough.
pub struct KernelResourceRegistry {
    uniform_buffers: Mutex<HashMap<UniformBufferKey, Arc<wgpu::Buffer>>>,
}

impl Default for KernelResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelResourceRegistry {
    pub fn new() -> Self {
        Self {
            uniform_buffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn uniform_buffer(
        &self,
        device: &wgpu::Device,
        key: UniformBufferKey,
        size: u64,
        label: &'static str,
    ) -> Arc<wgpu::Buffer> {
        let mut guard = self
            .uniform_buffers
            .lock()
            .expect("uniform buffer registry poisoned");
        guard
            .entry(key)
            .or_insert_with(|| {
                Arc::new(device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(label),
                    size,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }))
            })
            .clone()
    }
}
