//! Tracing subscriber and Prometheus metrics recorder.

use std::{io, sync::OnceLock, thread, time::Duration};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static PROM_UPKEEP_THREAD: OnceLock<thread::JoinHandle<()>> = OnceLock::new();

/// Install the global fmt subscriber. `RUST_LOG` overrides the `info` default.
pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::uptime())
                .with_filter(env_filter),
        )
        .try_init();
}

/// Install the global metrics recorder once and return the Prometheus handle.
///
/// Returns `None` when another recorder already owns the global slot; metrics
/// macros then go to that recorder and `/metrics` stays empty.
pub(crate) fn init_metrics_recorder() -> Option<&'static PrometheusHandle> {
    if let Some(handle) = PROM_HANDLE.get() {
        return Some(handle);
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    if let Err(err) = metrics::set_global_recorder(recorder) {
        warn!("metrics recorder not installed: {err}");
        return None;
    }

    let upkeep_handle = handle.clone();
    match spawn_upkeep(upkeep_handle) {
        Ok(upkeep) => {
            let _ = PROM_UPKEEP_THREAD.set(upkeep);
        }
        Err(err) => warn!("failed to spawn prometheus upkeep thread: {err}"),
    }

    Some(PROM_HANDLE.get_or_init(|| handle))
}

/// Access the Prometheus handle when already initialised.
pub(crate) fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROM_HANDLE.get()
}

fn spawn_upkeep(handle: PrometheusHandle) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("prometheus-upkeep".into())
        .spawn(move || {
            loop {
                thread::sleep(Duration::from_secs(5));
                handle.run_upkeep();
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_installs_once_and_renders() {
        let first = init_metrics_recorder().map(|handle| handle as *const PrometheusHandle);
        let second = init_metrics_recorder().map(|handle| handle as *const PrometheusHandle);
        assert_eq!(first, second);

        if let Some(handle) = prometheus_handle() {
            metrics::counter!("assistant_telemetry_test_total").increment(1);
            assert!(handle.render().contains("assistant_telemetry_test_total"));
        }
    }
}
