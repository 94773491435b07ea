//! Host-facing entry points: take a slice of numbers, run the elementwise
//! kernel on the active provider, hand back a vector in the same order.

use rmk_accelerate_api::{AccelProvider, GpuTensorHandle, HostTensorView, UnaryPowerOp};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("no acceleration provider is registered")]
    NoProvider,
    #[error("provider failed during {stage}: {source}")]
    Provider {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("kernel returned {actual} elements for {expected} inputs")]
    LengthMismatch { expected: usize, actual: usize },
}

impl KernelError {
    fn provider(stage: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| KernelError::Provider { stage, source }
    }
}

/// Elementwise `x * x`.
pub fn square_numbers(input: &[f64]) -> Result<Vec<f64>, KernelError> {
    run_unary_power(active_provider()?, UnaryPowerOp::Square, input)
}

/// Elementwise `x * x * x`.
pub fn cube_numbers(input: &[f64]) -> Result<Vec<f64>, KernelError> {
    run_unary_power(active_provider()?, UnaryPowerOp::Cube, input)
}

/// Currently registered provider, registering one with default options if none is.
pub fn active_provider() -> Result<&'static dyn AccelProvider, KernelError> {
    if let Some(p) = rmk_accelerate_api::provider() {
        return Ok(p);
    }
    crate::initialize_acceleration_provider();
    rmk_accelerate_api::provider().ok_or(KernelError::NoProvider)
}

/// Upload `input` as a 1-D tensor, run `op`, download the result and free
/// both device buffers, including on error paths.
pub fn run_unary_power(
    provider: &dyn AccelProvider,
    op: UnaryPowerOp,
    input: &[f64],
) -> Result<Vec<f64>, KernelError> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    let _span =
        tracing::info_span!("kernel.unary_power", op = op.name(), len = input.len()).entered();
    let shape = [input.len()];
    let uploaded = provider
        .upload(&HostTensorView {
            data: input,
            shape: &shape,
        })
        .map_err(KernelError::provider("upload"))?;
    let _input_guard = HandleGuard::new(provider, uploaded.clone());

    let output = provider
        .unary_power(&uploaded, op)
        .map_err(KernelError::provider(op.name()))?;
    let _output_guard = HandleGuard::new(provider, output.clone());

    let host = provider
        .download(&output)
        .map_err(KernelError::provider("download"))?;
    if host.data.len() != input.len() {
        return Err(KernelError::LengthMismatch {
            expected: input.len(),
            actual: host.data.len(),
        });
    }
    log::debug!(
        "{} kernel: {} elements on {}",
        op.name(),
        input.len(),
        provider.device_info()
    );
    Ok(host.data)
}

struct HandleGuard<'a> {
    provider: &'a dyn AccelProvider,
    handle: GpuTensorHandle,
}

impl<'a> HandleGuard<'a> {
    fn new(provider: &'a dyn AccelProvider, handle: GpuTensorHandle) -> Self {
        Self { provider, handle }
    }
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.provider.free(&self.handle) {
            log::warn!("failed to free buffer {}: {err}", self.handle.buffer_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simple_provider::InProcessProvider;
    use anyhow::anyhow;
    use rmk_accelerate_api::{HostTensorOwned, ThreadProviderGuard};

    #[test]
    fn literal_input_squares_and_cubes() {
        let p = InProcessProvider::new();
        let input = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(
            run_unary_power(&p, UnaryPowerOp::Square, &input).unwrap(),
            vec![1.0, 4.0, 9.0, 16.0]
        );
        assert_eq!(
            run_unary_power(&p, UnaryPowerOp::Cube, &input).unwrap(),
            vec![1.0, 8.0, 27.0, 64.0]
        );
        assert_eq!(p.live_buffers(), 0);
    }

    #[test]
    fn empty_input_skips_the_provider() {
        let p = InProcessProvider::new();
        assert!(run_unary_power(&p, UnaryPowerOp::Square, &[])
            .unwrap()
            .is_empty());
        assert_eq!(p.telemetry_snapshot().upload_bytes, 0);
    }

    #[test]
    fn public_entry_points_use_thread_provider() {
        static PROVIDER: once_cell::sync::Lazy<InProcessProvider> =
            once_cell::sync::Lazy::new(InProcessProvider::new);
        let _guard = ThreadProviderGuard::set(Some(&*PROVIDER));
        assert_eq!(square_numbers(&[-2.0, 0.5]).unwrap(), vec![4.0, 0.25]);
        assert_eq!(cube_numbers(&[-2.0, 0.5]).unwrap(), vec![-8.0, 0.125]);
    }

    struct TruncatingProvider(InProcessProvider);

    impl AccelProvider for TruncatingProvider {
        fn upload(&self, host: &HostTensorView) -> anyhow::Result<GpuTensorHandle> {
            self.0.upload(host)
        }
        fn download(&self, h: &GpuTensorHandle) -> anyhow::Result<HostTensorOwned> {
            let mut out = self.0.download(h)?;
            out.data.pop();
            Ok(out)
        }
        fn free(&self, h: &GpuTensorHandle) -> anyhow::Result<()> {
            self.0.free(h)
        }
        fn device_info(&self) -> String {
            "truncating".into()
        }
        fn unary_power(
            &self,
            a: &GpuTensorHandle,
            op: UnaryPowerOp,
        ) -> anyhow::Result<GpuTensorHandle> {
            self.0.unary_power(a, op)
        }
    }

    #[test]
    fn short_result_is_reported_and_buffers_freed() {
        let p = TruncatingProvider(InProcessProvider::new());
        let err = run_unary_power(&p, UnaryPowerOp::Cube, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            KernelError::LengthMismatch {
                expected: 2,
                actual: 1
            }
        ));
        assert_eq!(p.0.live_buffers(), 0);
    }

    struct FailingProvider(InProcessProvider);

    impl AccelProvider for FailingProvider {
        fn upload(&self, host: &HostTensorView) -> anyhow::Result<GpuTensorHandle> {
            self.0.upload(host)
        }
        fn download(&self, h: &GpuTensorHandle) -> anyhow::Result<HostTensorOwned> {
            self.0.download(h)
        }
        fn free(&self, h: &GpuTensorHandle) -> anyhow::Result<()> {
            self.0.free(h)
        }
        fn device_info(&self) -> String {
            "failing".into()
        }
        fn unary_power(
            &self,
            _a: &GpuTensorHandle,
            _op: UnaryPowerOp,
        ) -> anyhow::Result<GpuTensorHandle> {
            Err(anyhow!("device lost"))
        }
    }

    #[derive(Clone, Default)]
    struct SpanNames(std::sync::Arc<std::sync::Mutex<Vec<&'static str>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for SpanNames {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _id: &tracing::span::Id,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            self.0.lock().unwrap().push(attrs.metadata().name());
        }
    }

    #[test]
    fn dispatch_is_traced_through_the_provider() {
        use tracing_subscriber::layer::SubscriberExt;

        let names = SpanNames::default();
        let subscriber = tracing_subscriber::registry().with(names.clone());
        tracing::subscriber::with_default(subscriber, || {
            let p = InProcessProvider::new();
            run_unary_power(&p, UnaryPowerOp::Cube, &[2.0]).unwrap();
        });
        let seen = names.0.lock().unwrap();
        assert_eq!(*seen, vec!["kernel.unary_power", "host.unary_power"]);
    }

    #[test]
    fn dispatch_failure_names_the_stage() {
        let p = FailingProvider(InProcessProvider::new());
        let err = run_unary_power(&p, UnaryPowerOp::Square, &[3.0]).unwrap_err();
        assert_eq!(err.to_string(), "provider failed during square: device lost");
        assert_eq!(p.0.live_buffers(), 0);
    }
}
