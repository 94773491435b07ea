#![cfg(feature = "wgpu")]

use rmk_accelerate::backend::wgpu::provider::{self, WgpuProvider, WgpuProviderOptions};
use rmk_accelerate::kernels::run_unary_power;
use rmk_accelerate_api::{AccelProvider, HostTensorView, ProviderPrecision, UnaryPowerOp};

// CI machines frequently have no adapter at all; those runs only check that
// initialization fails cleanly.
fn wgpu_provider() -> Option<&'static WgpuProvider> {
    std::env::set_var("RMK_WGPU_FORCE_PRECISION", "f32");
    match provider::register_wgpu_provider(WgpuProviderOptions::default()) {
        Ok(p) => Some(p),
        Err(err) => {
            eprintln!("skipping wgpu test: {err}");
            None
        }
    }
}

fn tolerance(p: &WgpuProvider, want: f64) -> f64 {
    match p.precision() {
        ProviderPrecision::F32 => want.abs().max(1.0) * 1e-6,
        ProviderPrecision::F64 => 1e-12,
    }
}

#[test]
fn smoke_input_matches_host() {
    let Some(p) = wgpu_provider() else { return };
    let input = [1.0, 2.0, 3.0, 4.0];
    let squared = run_unary_power(p, UnaryPowerOp::Square, &input).expect("square");
    let cubed = run_unary_power(p, UnaryPowerOp::Cube, &input).expect("cube");
    assert_eq!(squared, vec![1.0, 4.0, 9.0, 16.0]);
    assert_eq!(cubed, vec![1.0, 8.0, 27.0, 64.0]);
}

#[test]
fn odd_sizes_around_workgroup_boundaries() {
    let Some(p) = wgpu_provider() else { return };
    let wg = p.workgroup_size() as usize;
    for len in [1, wg - 1, wg, wg + 1, 3 * wg + 7, 100_003] {
        let data: Vec<f64> = (0..len).map(|i| ((i % 17) as f64) * 0.25 - 2.0).collect();
        for op in [UnaryPowerOp::Square, UnaryPowerOp::Cube] {
            let got = run_unary_power(p, op, &data).expect("dispatch");
            assert_eq!(got.len(), len);
            for (idx, (&g, &x)) in got.iter().zip(data.iter()).enumerate() {
                let want = op.apply_host(x);
                let diff = (g - want).abs();
                assert!(
                    diff <= tolerance(p, want),
                    "{} mismatch at {idx} (len {len}): got={g} want={want}",
                    op.name()
                );
            }
        }
    }
}

#[test]
fn handles_keep_shape_and_free_cleanly() {
    let Some(p) = wgpu_provider() else { return };
    let data = [0.5, -1.5, 2.0, 3.0, -4.0, 1.0];
    let h = p
        .upload(&HostTensorView {
            data: &data,
            shape: &[2, 3],
        })
        .expect("upload");
    let out = p.elem_cube(&h).expect("cube");
    let host = p.download(&out).expect("download");
    assert_eq!(host.shape, vec![2, 3]);
    assert_eq!(host.data[1], -3.375);
    p.free(&h).expect("free input");
    p.free(&out).expect("free output");
    assert!(p.download(&out).is_err());
    assert!(p.pooled_buffers() >= 1);
}

#[test]
fn pipelines_are_built_once() {
    let Some(p) = wgpu_provider() else { return };
    run_unary_power(p, UnaryPowerOp::Square, &[2.0; 8]).expect("square");
    run_unary_power(p, UnaryPowerOp::Cube, &[2.0; 8]).expect("cube");
    let (pipeline_builds, _chunked) = p.metrics().counters();
    assert_eq!(pipeline_builds, 1);
}

#[test]
fn telemetry_counts_dispatches() {
    let Some(p) = wgpu_provider() else { return };
    let before = p.telemetry_snapshot().unary_power.count;
    run_unary_power(p, UnaryPowerOp::Cube, &[1.0, 2.0, 3.0]).expect("cube");
    assert!(p.telemetry_snapshot().unary_power.count > before);
}

#[test]
fn empty_tensor_round_trips() {
    let Some(p) = wgpu_provider() else { return };
    let h = p
        .upload(&HostTensorView {
            data: &[],
            shape: &[0],
        })
        .expect("upload");
    let out = p.elem_square(&h).expect("square");
    assert!(p.download(&out).expect("download").data.is_empty());
}

#[test]
fn oversized_tensor_is_rejected_instead_of_zeroed() {
    let Some(p) = wgpu_provider() else { return };
    let len = p.max_tensor_elements().saturating_add(1);
    // Some adapters bind several GiB; only build the host input when it stays modest.
    if len > 1 << 26 {
        eprintln!("skipping: binding limit of {} elements is too large to exceed", len - 1);
        return;
    }
    let data = vec![3.0; len];
    let err = run_unary_power(p, UnaryPowerOp::Square, &data).expect_err("oversized input");
    assert!(
        err.to_string().contains("exceeds device max"),
        "unexpected error: {err}"
    );
}
