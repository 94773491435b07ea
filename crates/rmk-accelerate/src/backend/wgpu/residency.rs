use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Pool of freed storage buffers keyed by element count, so repeated calls
/// on same-sized inputs skip allocation.
pub struct BufferResidency {
    pools: Mutex<HashMap<usize, VecDeque<Arc<wgpu::Buffer>>>>,
    max_per_key: usize,
}

impl BufferResidency {
    pub fn new(max_per_key: usize) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            max_per_key,
        }
    }

    /// Returns the buffer and whether it came from the pool.
    pub fn acquire(
        &self,
        device: &wgpu::Device,
        len: usize,
        element_size: usize,
        label: &str,
    ) -> (Arc<wgpu::Buffer>, bool) {
        if len > 0 {
            if let Ok(mut guard) = self.pools.lock() {
                if let Some(buffer) = guard.get_mut(&len).and_then(VecDeque::pop_front) {
                    log::trace!(
                        "buffer_residency: reuse len={} ptr={:p}",
                        len,
                        Arc::as_ptr(&buffer)
                    );
                    return (buffer, true);
                }
            }
        }

        // Zero-sized storage bindings are invalid; keep at least one element.
        let size_bytes = (len.max(1) * element_size) as u64;
        let buffer = Arc::new(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: size_bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));
        log::trace!(
            "buffer_residency: new len={} ptr={:p}",
            len,
            Arc::as_ptr(&buffer)
        );
        (buffer, false)
    }

    pub fn release(&self, len: usize, buffer: Arc<wgpu::Buffer>) {
        if len == 0 {
            return;
        }
        if let Ok(mut guard) = self.pools.lock() {
            let queue = guard.entry(len).or_default();
            if queue.len() < self.max_per_key {
                log::trace!(
                    "buffer_residency: release len={} ptr={:p}",
                    len,
                    Arc::as_ptr(&buffer)
                );
                queue.push_back(buffer);
            } else {
                log::trace!("buffer_residency: drop len={} (pool full)", len);
            }
        }
    }

    pub fn pooled(&self) -> usize {
        self.pools
            .lock()
            .map(|guard| guard.values().map(VecDeque::len).sum())
            .unwrap_or(0)
    }
}
