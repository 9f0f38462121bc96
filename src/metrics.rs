use std::time::Duration;
use tracing::trace;

// Counters go through the `metrics` facade; without an installed recorder
// (tests, status server disabled) they are no-ops.

pub fn stage_elapsed(stage: &'static str, elapsed: Duration) {
    trace!(
        target = "avito.metrics",
        stage = stage,
        elapsed_ms = elapsed.as_millis() as u64,
        "stage_elapsed"
    );
    metrics::histogram!("avito_stage_seconds", "stage" => stage).record(elapsed.as_secs_f64());
}

pub fn token_refreshed() {
    metrics::counter!("avito_token_refreshes_total").increment(1);
}

pub fn shop_processed(outcome: &'static str) {
    metrics::counter!("avito_shops_total", "outcome" => outcome).increment(1);
}

pub fn cycle_finished(elapsed: Duration) {
    metrics::counter!("avito_cycles_total").increment(1);
    metrics::histogram!("avito_cycle_seconds").record(elapsed.as_secs_f64());
}

pub fn join_misses(count: usize) {
    metrics::counter!("avito_item_metrics_missing_total").increment(count as u64);
}

pub fn snapshots_written(count: usize) {
    metrics::counter!("avito_snapshots_written_total").increment(count as u64);
}
