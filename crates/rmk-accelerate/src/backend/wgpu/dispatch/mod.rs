pub mod common;
pub mod unary_power;
