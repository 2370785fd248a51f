use tracing::trace;

// Counters are emitted as trace events; the Prometheus recorder only
// renders what the exporter itself tracks.

pub fn inc_requests(route: &'static str) {
    trace!(target = "ops.metrics", route = route, "requests_total_inc");
}

pub fn store_fallback(dataset: &'static str) {
    trace!(target = "ops.metrics", dataset = dataset, "store_fallback_inc");
}

pub fn job_elapsed(kind: &'static str, elapsed_ms: u128) {
    trace!(
        target = "ops.metrics",
        kind = kind,
        elapsed_ms = elapsed_ms as u64,
        "job_elapsed"
    );
}
