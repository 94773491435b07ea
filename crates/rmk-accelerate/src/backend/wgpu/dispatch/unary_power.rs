use bytemuck::bytes_of;

use super::common::{dispatch_size, submit};
use crate::backend::wgpu::config::chunk_capacity;
use crate::backend::wgpu::params::LenOpParams;
use crate::backend::wgpu::types::UnaryOpCode;

/// Bound resources for one square/cube launch.
pub struct UnaryPowerLaunch<'a> {
    pub pipeline: &'a wgpu::ComputePipeline,
    pub bind_group: &'a wgpu::BindGroup,
    pub params: &'a wgpu::Buffer,
    pub workgroup: u32,
}

/// Split `len` elements into `(offset, len)` chunks that each fit in one
/// dispatch at the given workgroup size.
pub fn chunks(len: usize, workgroup: u32) -> impl Iterator<Item = (usize, usize)> {
    let capacity = chunk_capacity(workgroup);
    (0..len)
        .step_by(capacity)
        .map(move |offset| (offset, (len - offset).min(capacity)))
}

/// Run `op` over `len` elements. The params uniform is rewritten between
/// chunks, so every chunk gets its own submission. Returns the chunk count.
pub fn run(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    launch: &UnaryPowerLaunch<'_>,
    op: UnaryOpCode,
    len: usize,
) -> usize {
    let mut submitted = 0;
    for (offset, chunk_len) in chunks(len, launch.workgroup) {
        let params = LenOpParams {
            len: chunk_len as u32,
            op: op as u32,
            offset: offset as u32,
            total: len as u32,
        };
        queue.write_buffer(launch.params, 0, bytes_of(&params));

        let mut enc = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("rmk-unary-power-encoder"),
        });
        {
            let mut pass = enc.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("rmk-unary-power-pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(launch.pipeline);
            pass.set_bind_group(0, launch.bind_group, &[]);
            pass.dispatch_workgroups(dispatch_size(chunk_len as u32, launch.workgroup), 1, 1);
        }
        submit(device, queue, enc);
        submitted += 1;
    }
    submitted
}

/// Bind the pipeline in an empty pass so the driver finishes compiling it
/// before the first real launch.
pub fn warmup(device: &wgpu::Device, queue: &wgpu::Queue, pipeline: &wgpu::ComputePipeline) {
    let mut enc = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("rmk-unary-power-warmup"),
    });
    {
        let mut pass = enc.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("rmk-unary-power-warmup-pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
    }
    submit(device, queue, enc);
}
