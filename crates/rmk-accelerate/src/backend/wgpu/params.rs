use bytemuck::{Pod, Zeroable};

/// Uniform block for elementwise kernels. `offset`/`len` describe the chunk
/// covered by one dispatch, `total` the full tensor length.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct LenOpParams {
    pub len: u32,
    pub op: u32,
    pub offset: u32,
    pub total: u32,
}
