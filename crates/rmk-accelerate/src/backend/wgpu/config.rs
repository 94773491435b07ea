/// Threads per workgroup for elementwise kernels. Matches the 256-wide
/// threadgroups the kernels were first tuned with on Apple GPUs.
pub const WORKGROUP_SIZE: u32 = 256;
pub const MAX_DISPATCH_WORKGROUPS: u32 = 65_535;
pub const BUFFER_RESIDENCY_MAX_PER_KEY: usize = 8;

/// Requested workgroup size from env `RMK_WG` (u32, > 0).
pub fn env_requested_workgroup_size() -> Option<u32> {
    std::env::var("RMK_WG")
        .ok()
        .and_then(|val| val.trim().parse::<u32>().ok())
        .filter(|parsed| *parsed > 0)
}

/// Largest element count one dispatch can cover at the given workgroup size.
pub fn chunk_capacity(workgroup: u32) -> usize {
    (MAX_DISPATCH_WORKGROUPS as usize) * (workgroup.max(1) as usize)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkgroupConfig {
    pub scalar: u32,
    pub max_x: u32,
    pub adapter_max_invocations: u32,
}

impl WorkgroupConfig {
    pub fn new(limits: &wgpu::Limits, requested_scalar: u32) -> Self {
        let max_x = normalize(limits.max_compute_workgroup_size_x, 1024);
        let adapter_max_invocations = normalize(limits.max_compute_invocations_per_workgroup, 256);
        let scalar = clamp_linear_workgroup(requested_scalar, max_x, adapter_max_invocations, 32);
        Self {
            scalar,
            max_x,
            adapter_max_invocations,
        }
    }
}

fn normalize(value: u32, fallback: u32) -> u32 {
    if value == 0 {
        fallback
    } else {
        value
    }
}

fn clamp_linear_workgroup(requested: u32, max_dim: u32, max_inv: u32, align: u32) -> u32 {
    let allowed_max = max_dim.min(max_inv).max(1);
    let align = if allowed_max < align { 1 } else { align };
    let mut value = requested.max(1).min(allowed_max);
    value = align_down(value, align).max(1);
    floor_power_of_two(value).min(allowed_max)
}

fn align_down(value: u32, align: u32) -> u32 {
    if align <= 1 {
        return value;
    }
    value - (value % align)
}

fn floor_power_of_two(value: u32) -> u32 {
    if value == 0 {
        return 1;
    }
    1 << (31 - value.leading_zeros())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_x: u32, max_inv: u32) -> wgpu::Limits {
        wgpu::Limits {
            max_compute_workgroup_size_x: max_x,
            max_compute_invocations_per_workgroup: max_inv,
            ..wgpu::Limits::downlevel_defaults()
        }
    }

    #[test]
    fn requested_size_within_limits_is_kept() {
        let cfg = WorkgroupConfig::new(&limits(1024, 1024), 256);
        assert_eq!(cfg.scalar, 256);
    }

    #[test]
    fn requested_size_is_clamped_to_invocation_limit() {
        let cfg = WorkgroupConfig::new(&limits(1024, 128), 512);
        assert_eq!(cfg.scalar, 128);
    }

    #[test]
    fn odd_request_rounds_down_to_power_of_two() {
        let cfg = WorkgroupConfig::new(&limits(1024, 1024), 300);
        assert_eq!(cfg.scalar, 256);
    }

    #[test]
    fn zero_limits_fall_back_to_defaults() {
        let cfg = WorkgroupConfig::new(&limits(0, 0), 256);
        assert_eq!(cfg.max_x, 1024);
        assert_eq!(cfg.scalar, 256);
    }

    #[test]
    fn chunk_capacity_scales_with_workgroup() {
        assert_eq!(chunk_capacity(256), 65_535 * 256);
        assert_eq!(chunk_capacity(0), 65_535);
    }
}
