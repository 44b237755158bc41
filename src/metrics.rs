use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::info;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Returns the handle used to render the
/// scrape output; subsequent calls return the existing handle.
pub fn init_metrics() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .set_buckets_for_metric(
                    metrics_exporter_prometheus::Matcher::Full(
                        "scoring.pass_duration_seconds".to_string(),
                    ),
                    &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5],
                )
                .expect("failed to set buckets for scoring.pass_duration_seconds")
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

/// Initialize the core metrics to zero so dashboards show them before the
/// first event occurs. Must run after the recorder is installed.
pub fn initialize_core_metrics() {
    metrics::gauge!("simlink.connected").set(0.0);
    metrics::counter!("simlink.connects_total").absolute(0);
    metrics::counter!("simlink.disconnects_total").absolute(0);
    metrics::counter!("simlink.connect_failures_total").absolute(0);
    metrics::counter!("simlink.watchdog_disconnects_total").absolute(0);
    metrics::counter!("simlink.frames_total").absolute(0);
    metrics::counter!("simlink.rejected_samples_total").absolute(0);
    metrics::counter!("simlink.exceptions_total").absolute(0);

    metrics::gauge!("poi_index.tracked").set(0.0);
    metrics::counter!("poi_index.pruned_total").absolute(0);

    metrics::gauge!("scoring.pois_scored").set(0.0);
    metrics::counter!("scoring.skipped_stationary_total").absolute(0);

    metrics::gauge!("beacon.active").set(0.0);
    metrics::counter!("beacon.spawns_total").absolute(0);
    metrics::counter!("beacon.despawns_total").absolute(0);

    metrics::counter!("narration.started_total").absolute(0);
    metrics::counter!("narration.completed_total").absolute(0);
    metrics::counter!("narration.failures_total").absolute(0);
    metrics::counter!("narration.rejected_busy_total").absolute(0);

    info!("Core metrics initialized");
}
