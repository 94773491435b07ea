#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumericPrecision {
    F32,
    F64,
}

impl NumericPrecision {
    pub fn element_size(self) -> usize {
        match self {
            NumericPrecision::F64 => std::mem::size_of::<f64>(),
            NumericPrecision::F32 => std::mem::size_of::<f32>(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NumericPrecision::F64 => "f64",
            NumericPrecision::F32 => "f32",
        }
    }

    /// Parse the `RMK_WGPU_FORCE_PRECISION` spellings.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "f32" | "float32" | "32" => Some(NumericPrecision::F32),
            "f64" | "float64" | "64" => Some(NumericPrecision::F64),
            _ => None,
        }
    }
}

/// Opcodes understood by the unary power shader. `apply` in
/// `shaders::elementwise` cubes when `params.op == 1u` and squares otherwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOpCode {
    Square = 0,
    Cube = 1,
}

impl From<rmk_accelerate_api::UnaryPowerOp> for UnaryOpCode {
    fn from(op: rmk_accelerate_api::UnaryPowerOp) -> Self {
        match op {
            rmk_accelerate_api::UnaryPowerOp::Square => UnaryOpCode::Square,
            rmk_accelerate_api::UnaryPowerOp::Cube => UnaryOpCode::Cube,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmk_accelerate_api::UnaryPowerOp;

    #[test]
    fn precision_parse_accepts_aliases() {
        assert_eq!(NumericPrecision::parse(" F32 "), Some(NumericPrecision::F32));
        assert_eq!(NumericPrecision::parse("float64"), Some(NumericPrecision::F64));
        assert_eq!(NumericPrecision::parse("half"), None);
    }

    #[test]
    fn opcodes_match_shader_cases() {
        assert_eq!(UnaryOpCode::from(UnaryPowerOp::Square) as u32, 0);
        assert_eq!(UnaryOpCode::from(UnaryPowerOp::Cube) as u32, 1);
    }
}
