pub mod elementwise;

/// Placeholder replaced with the provider's workgroup size before compilation.
pub const WORKGROUP_SIZE_SENTINEL: &str = "@WG@";

pub fn with_workgroup_size(template: &str, workgroup: u32) -> String {
    template.replace(WORKGROUP_SIZE_SENTINEL, &workgroup.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_replaced_everywhere() {
        let wgsl = with_workgroup_size(elementwise::UNARY_POWER_SHADER_F32, 128);
        assert!(!wgsl.contains(WORKGROUP_SIZE_SENTINEL));
        assert!(wgsl.contains("@workgroup_size(128)"));
    }
}
