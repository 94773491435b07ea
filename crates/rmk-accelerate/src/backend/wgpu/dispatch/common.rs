pub fn submit(device: &wgpu::Device, queue: &wgpu::Queue, enc: wgpu::CommandEncoder) {
    queue.submit(Some(enc.finish()));
    device.poll(wgpu::Maintain::Wait);
}

pub fn dispatch_size(elements: u32, workgroup: u32) -> u32 {
    if elements == 0 {
        0
    } else {
        elements.div_ceil(workgroup.max(1)).max(1)
    }
}
