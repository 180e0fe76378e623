/// Environment variable that forces CPU inference when set to `1`.
pub const CPU_ONLY_ENV: &str = "FACESORT_CPU_ONLY";

/// Return the execution providers every face-model session is built with.
///
/// An empty list means ONNX Runtime's default CPU provider. Platform
/// accelerators fall back to CPU at session creation if unavailable.
pub fn preferred_execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    if cpu_only_requested(std::env::var(CPU_ONLY_ENV).ok().as_deref()) {
        log::debug!("{CPU_ONLY_ENV} set, using CPU execution provider");
        return Vec::new();
    }
    platform_providers()
}

fn cpu_only_requested(value: Option<&str>) -> bool {
    matches!(value, Some("1") | Some("true"))
}

#[cfg(target_os = "macos")]
fn platform_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
}

#[cfg(target_os = "windows")]
fn platform_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn platform_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    Vec::new()
}
