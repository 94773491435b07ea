use wgpu::{BindGroupLayoutEntry, BindingType, BufferBindingType, ShaderStages};

/// Binding slots shared by the square/cube shaders.
pub const INPUT_BINDING: u32 = 0;
pub const OUTPUT_BINDING: u32 = 1;
pub const PARAMS_BINDING: u32 = 2;

fn compute_buffer(binding: u32, ty: BufferBindingType) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// `A` (read-only storage), `Out` (read-write storage), `params` (uniform).
pub fn unary_layout_entries() -> [BindGroupLayoutEntry; 3] {
    [
        compute_buffer(INPUT_BINDING, BufferBindingType::Storage { read_only: true }),
        compute_buffer(OUTPUT_BINDING, BufferBindingType::Storage { read_only: false }),
        compute_buffer(PARAMS_BINDING, BufferBindingType::Uniform),
    ]
}
