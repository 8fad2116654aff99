// Prometheus metrics for the admission gate
//
// Exposed on the /metrics HTTP endpoint:
// - Admission decisions (counter by outcome)
// - Recovery chains and ticks (counters, active gauge)
// - Store failures (counter)
// - Pipeline job outcomes (counter by outcome)

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Admission metrics
    pub static ref ADMISSIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("admissions_total", "Admission decisions by outcome"),
        &["outcome"]
    ).expect("Failed to create admissions metric");

    // Recovery metrics
    pub static ref RECOVERY_CHAINS_STARTED_TOTAL: IntCounter = IntCounter::new(
        "recovery_chains_started_total",
        "Total number of recovery chains started"
    ).expect("Failed to create recovery chains metric");

    pub static ref RECOVERY_TICKS_TOTAL: IntCounter = IntCounter::new(
        "recovery_ticks_total",
        "Total number of quota increments applied by recovery chains"
    ).expect("Failed to create recovery ticks metric");

    pub static ref RECOVERY_TICK_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "recovery_tick_failures_total",
        "Recovery ticks that failed and were retried on the next interval"
    ).expect("Failed to create recovery tick failures metric");

    pub static ref ACTIVE_RECOVERY_CHAINS: IntGauge = IntGauge::new(
        "active_recovery_chains",
        "Number of recovery chains currently running"
    ).expect("Failed to create active recovery chains metric");

    // Store metrics
    pub static ref STORE_ERRORS_TOTAL: IntCounter = IntCounter::new(
        "store_errors_total",
        "Quota store operations that failed"
    ).expect("Failed to create store errors metric");

    // Pipeline metrics
    pub static ref PIPELINE_JOBS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("pipeline_jobs_total", "Transcription jobs by outcome"),
        &["outcome"]
    ).expect("Failed to create pipeline jobs metric");
}

/// Register all metrics with the registry.
///
/// Safe to call more than once; already registered collectors are skipped.
pub fn init() -> prometheus::Result<()> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ADMISSIONS_TOTAL.clone()),
        Box::new(RECOVERY_CHAINS_STARTED_TOTAL.clone()),
        Box::new(RECOVERY_TICKS_TOTAL.clone()),
        Box::new(RECOVERY_TICK_FAILURES_TOTAL.clone()),
        Box::new(ACTIVE_RECOVERY_CHAINS.clone()),
        Box::new(STORE_ERRORS_TOTAL.clone()),
        Box::new(PIPELINE_JOBS_TOTAL.clone()),
    ];

    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init().is_ok());
        assert!(init().is_ok());
    }

    #[test]
    fn test_gather_contains_admissions() {
        init().unwrap();
        ADMISSIONS_TOTAL.with_label_values(&["admitted"]).inc();

        let text = gather_metrics().unwrap();
        assert!(text.contains("admissions_total"));
    }
}
