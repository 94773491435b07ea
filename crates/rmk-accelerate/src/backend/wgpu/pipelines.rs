use crate::backend::wgpu::bindings::unary_layout_entries;
use crate::backend::wgpu::shaders::{elementwise, with_workgroup_size};
use crate::backend::wgpu::types::NumericPrecision;
use std::borrow::Cow;

pub struct PipelineBundle {
    pub pipeline: wgpu::ComputePipeline,
    pub layout: wgpu::BindGroupLayout,
}

pub struct WgpuPipelines {
    pub unary_power: PipelineBundle,
}

impl WgpuPipelines {
    pub fn new(device: &wgpu::Device, precision: NumericPrecision, workgroup: u32) -> Self {
        let template = match precision {
            NumericPrecision::F64 => elementwise::UNARY_POWER_SHADER_F64,
            NumericPrecision::F32 => elementwise::UNARY_POWER_SHADER_F32,
        };
        let unary_power = create_pipeline(
            device,
            "rmk-unary-power-layout",
            "rmk-unary-power-shader",
            "rmk-unary-power-pipeline",
            &unary_layout_entries(),
            &with_workgroup_size(template, workgroup),
        );
        Self { unary_power }
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    layout_label: &str,
    shader_label: &str,
    pipeline_label: &str,
    entries: &[wgpu::BindGroupLayoutEntry],
    shader_source: &str,
) -> PipelineBundle {
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(layout_label),
        entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&(String::from(pipeline_label) + "-layout")),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(shader_label),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(shader_source)),
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(pipeline_label),
        module: &module,
        layout: Some(&pipeline_layout),
        entry_point: "main",
    });
    PipelineBundle { pipeline, layout }
}
