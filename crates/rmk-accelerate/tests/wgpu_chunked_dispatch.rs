#![cfg(feature = "wgpu")]

// Own test binary: RMK_WG is read once, when the process-wide provider is created.

use rmk_accelerate::backend::wgpu::config::chunk_capacity;
use rmk_accelerate::backend::wgpu::provider::{self, WgpuProviderOptions};
use rmk_accelerate::kernels::run_unary_power;
use rmk_accelerate_api::UnaryPowerOp;

#[test]
fn inputs_larger_than_one_dispatch_are_split() {
    std::env::set_var("RMK_WG", "1");
    std::env::set_var("RMK_WGPU_FORCE_PRECISION", "f32");
    let p = match provider::register_wgpu_provider(WgpuProviderOptions::default()) {
        Ok(p) => p,
        Err(err) => {
            eprintln!("skipping wgpu test: {err}");
            return;
        }
    };
    assert_eq!(p.workgroup_size(), 1);

    let len = chunk_capacity(p.workgroup_size()) + 4_465;
    let data: Vec<f64> = (0..len).map(|i| ((i % 13) as f64) - 6.0).collect();
    for op in [UnaryPowerOp::Square, UnaryPowerOp::Cube] {
        let got = run_unary_power(p, op, &data).expect("dispatch");
        assert_eq!(got.len(), len);
        for (idx, (&g, &x)) in got.iter().zip(data.iter()).enumerate() {
            assert_eq!(g, op.apply_host(x), "{} mismatch at {idx}", op.name());
        }
    }
    let (_pipeline_builds, chunked) = p.metrics().counters();
    assert!(chunked >= 1);
}
