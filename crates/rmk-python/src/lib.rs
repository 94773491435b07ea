use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use rmk_accelerate::KernelError;
use std::sync::Once;

static INIT: Once = Once::new();

// Logs go to stderr at `warn` unless RUST_LOG / RMK_LOG say otherwise.
fn init_runtime() {
    INIT.call_once(|| {
        rmk_logging::init_logging_once(rmk_logging::LoggingOptions {
            default_filter: "warn".to_string(),
            ..Default::default()
        });
        rmk_accelerate::initialize_acceleration_provider();
    });
}

fn to_py_err(err: KernelError) -> PyErr {
    PyRuntimeError::new_err(err.to_string())
}

/// Square every element of `input` on the GPU.
#[pyfunction]
fn square_numbers(py: Python<'_>, input: Vec<f64>) -> PyResult<Vec<f64>> {
    init_runtime();
    py.allow_threads(|| rmk_accelerate::square_numbers(&input))
        .map_err(to_py_err)
}

/// Cube every element of `input` on the GPU.
#[pyfunction]
fn cube_numbers(py: Python<'_>, input: Vec<f64>) -> PyResult<Vec<f64>> {
    init_runtime();
    py.allow_threads(|| rmk_accelerate::cube_numbers(&input))
        .map_err(to_py_err)
}

/// Human-readable description of the device the kernels run on.
#[pyfunction]
fn device_info() -> PyResult<String> {
    init_runtime();
    let provider = rmk_accelerate::kernels::active_provider().map_err(to_py_err)?;
    log::debug!("device_info requested");
    Ok(provider.device_info())
}

#[pymodule]
fn rust_metal_kernel(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add_function(wrap_pyfunction!(square_numbers, m)?)?;
    m.add_function(wrap_pyfunction!(cube_numbers, m)?)?;
    m.add_function(wrap_pyfunction!(device_info, m)?)?;
    Ok(())
}
