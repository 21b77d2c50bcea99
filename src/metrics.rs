// Prometheus metrics definitions for the arena backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Counters ─────────────────────────────────────────────────────

    /// Total battles resolved, by verdict source (ai-judge / elo-fallback).
    pub static ref BATTLES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("arena_battles_total", "Total battles resolved"),
        &["verdict"],
    )
    .unwrap();

    /// Battle requests denied by the cooldown gate.
    pub static ref COOLDOWN_REJECTIONS_TOTAL: IntCounter = IntCounter::new(
        "arena_cooldown_rejections_total",
        "Battle requests denied by the cooldown gate",
    )
    .unwrap();

    /// External judge calls, by outcome.
    pub static ref JUDGE_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("arena_judge_requests_total", "External judge calls"),
        &["outcome"],
    )
    .unwrap();

    /// Characters registered.
    pub static ref CHARACTERS_CREATED_TOTAL: IntCounter = IntCounter::new(
        "arena_characters_created_total",
        "Characters registered",
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// External judge call duration in seconds.
    pub static ref JUDGE_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "arena_judge_duration_seconds",
            "External judge call duration in seconds",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(BATTLES_TOTAL.clone()),
        Box::new(COOLDOWN_REJECTIONS_TOTAL.clone()),
        Box::new(JUDGE_REQUESTS_TOTAL.clone()),
        Box::new(CHARACTERS_CREATED_TOTAL.clone()),
        Box::new(JUDGE_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        REGISTRY.register(c).expect("failed to register metric");
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_gather() {
        register_metrics();
        BATTLES_TOTAL.with_label_values(&["elo-fallback"]).inc();
        COOLDOWN_REJECTIONS_TOTAL.inc();
        JUDGE_REQUESTS_TOTAL.with_label_values(&["ok"]).inc();
        CHARACTERS_CREATED_TOTAL.inc();
        JUDGE_DURATION_SECONDS.observe(0.3);

        let output = gather_metrics();
        assert!(output.contains("arena_battles_total"));
        assert!(output.contains("arena_cooldown_rejections_total"));
    }
}
