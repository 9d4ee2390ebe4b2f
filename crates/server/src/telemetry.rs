//! Process-wide observability: the JSON log subscriber and the Prometheus
//! recorder that backs `/metrics` and the pipeline stage metrics.

use carfinder::{
    IndexError, InputError, PipelineMetrics, RecognitionError, ScrapeReport,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

const STAGE_SECONDS: &str = "carfinder_stage_seconds";
const STAGE_TOTAL: &str = "carfinder_stage_total";
const MERGED_RESULTS: &str = "carfinder_merged_results";
const SCRAPE_DEADLINE_EXCEEDED: &str = "carfinder_scrape_deadline_exceeded_total";

/// Install the JSON `tracing` subscriber. Safe to call more than once.
pub fn init_tracing(log_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json()
        .try_init();
}

/// Install the global Prometheus recorder.
pub fn install_prometheus() -> anyhow::Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

/// Forwards pipeline stage timings to the `metrics` facade.
#[derive(Debug, Default)]
pub struct PrometheusPipelineMetrics;

impl PrometheusPipelineMetrics {
    fn record(stage: &'static str, latency: Duration, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        metrics::histogram!(STAGE_SECONDS, "stage" => stage).record(latency.as_secs_f64());
        metrics::counter!(STAGE_TOTAL, "stage" => stage, "outcome" => outcome).increment(1);
    }
}

impl PipelineMetrics for PrometheusPipelineMetrics {
    fn record_validation(&self, latency: Duration, result: Result<(), InputError>) {
        Self::record("validation", latency, result.is_ok());
    }

    fn record_recognition(&self, latency: Duration, result: Result<(), RecognitionError>) {
        Self::record("recognition", latency, result.is_ok());
    }

    fn record_index_search(&self, latency: Duration, result: Result<(), IndexError>) {
        Self::record("index_search", latency, result.is_ok());
    }

    fn record_scrape(&self, latency: Duration, report: &ScrapeReport) {
        Self::record("scrape", latency, !report.deadline_exceeded);
        if report.deadline_exceeded {
            metrics::counter!(SCRAPE_DEADLINE_EXCEEDED).increment(1);
        }
    }

    fn record_merge(&self, latency: Duration, results: usize) {
        Self::record("merge", latency, true);
        metrics::histogram!(MERGED_RESULTS).record(results as f64);
    }
}
