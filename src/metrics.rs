// Prometheus metrics definitions for the Aux Battle service.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Sessions currently held in memory.
    pub static ref LOADED_SESSIONS: IntGauge =
        IntGauge::new("auxbattle_loaded_sessions", "Tournament sessions held in memory").unwrap();

    /// Live WebSocket connections on the event stream.
    pub static ref CONNECTED_WEBSOCKETS: IntGauge =
        IntGauge::new("auxbattle_connected_websockets", "Live WebSocket connections").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Engine operations, by operation and outcome (ok or the error kind).
    pub static ref OPERATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("auxbattle_operations_total", "Tournament operations handled"),
        &["operation", "outcome"],
    )
    .unwrap();

    /// Events published, by event kind.
    pub static ref EVENTS_PUBLISHED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("auxbattle_events_published_total", "Tournament events published"),
        &["kind"],
    )
    .unwrap();

    /// Deadline timers delivered to the service, by timer kind.
    pub static ref TIMERS_FIRED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("auxbattle_timers_fired_total", "Deadline timers fired"),
        &["kind"],
    )
    .unwrap();

    /// Ballots accepted.
    pub static ref VOTES_CAST_TOTAL: IntCounter =
        IntCounter::new("auxbattle_votes_cast_total", "Ballots accepted").unwrap();

    /// Snapshot saves that failed after all retries.
    pub static ref SAVE_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "auxbattle_save_failures_total",
        "Session saves that failed after retries",
    )
    .unwrap();

    /// Total API requests, by method/endpoint/status.
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("auxbattle_api_requests_total", "Total API requests"),
        &["method", "endpoint", "status"],
    )
    .unwrap();

    /// Total WebSocket messages sent to clients.
    pub static ref WEBSOCKET_MESSAGES_SENT_TOTAL: IntCounter = IntCounter::new(
        "auxbattle_websocket_messages_sent_total",
        "Total WebSocket messages sent",
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Session save duration in seconds, including retries.
    pub static ref SAVE_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("auxbattle_save_duration_seconds", "Session save duration in seconds")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5, 1.0]),
    )
    .unwrap();

    /// API request duration in seconds, by endpoint.
    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "auxbattle_api_request_duration_seconds",
            "API request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["endpoint"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Safe to call more than once.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(LOADED_SESSIONS.clone()),
        Box::new(CONNECTED_WEBSOCKETS.clone()),
        Box::new(OPERATIONS_TOTAL.clone()),
        Box::new(EVENTS_PUBLISHED_TOTAL.clone()),
        Box::new(TIMERS_FIRED_TOTAL.clone()),
        Box::new(VOTES_CAST_TOTAL.clone()),
        Box::new(SAVE_FAILURES_TOTAL.clone()),
        Box::new(API_REQUESTS_TOTAL.clone()),
        Box::new(WEBSOCKET_MESSAGES_SENT_TOTAL.clone()),
        Box::new(SAVE_DURATION_SECONDS.clone()),
        Box::new(API_REQUEST_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        if let Err(e) = REGISTRY.register(c) {
            tracing::debug!("Metric not registered: {e}");
        }
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {e}");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Normalize a URL path for metric labels: session ids and numeric segments
/// become `:id`, match ids become `:match`.
pub fn normalize_path(path: &str) -> String {
    let mut previous = "";
    path.split('/')
        .map(|segment| {
            let normalized = if previous == "sessions" || segment.parse::<u64>().is_ok() {
                ":id"
            } else if previous == "matches" {
                ":match"
            } else {
                segment
            };
            previous = segment;
            normalized
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/ws/events"), "/ws/events");
    }

    #[test]
    fn test_normalize_path_with_ids() {
        assert_eq!(
            normalize_path("/api/sessions/guild-42/register"),
            "/api/sessions/:id/register"
        );
        assert_eq!(
            normalize_path("/api/sessions/guild-42/matches/r0m1/votes"),
            "/api/sessions/:id/matches/:match/votes"
        );
        assert_eq!(
            normalize_path("/api/sessions/g/matches/anything-a-client-sends/end-voting"),
            "/api/sessions/:id/matches/:match/end-voting"
        );
        assert_eq!(normalize_path("/api/sessions/7"), "/api/sessions/:id");
    }

    #[test]
    fn test_gather_metrics_after_double_register() {
        register_metrics();
        register_metrics();
        VOTES_CAST_TOTAL.inc();
        let output = gather_metrics();
        assert!(output.contains("auxbattle_votes_cast_total"));
    }

    #[test]
    fn test_metric_increments() {
        LOADED_SESSIONS.set(2);
        assert_eq!(LOADED_SESSIONS.get(), 2);
        LOADED_SESSIONS.set(0);

        CONNECTED_WEBSOCKETS.inc();
        CONNECTED_WEBSOCKETS.dec();

        OPERATIONS_TOTAL.with_label_values(&["register", "ok"]).inc();
        EVENTS_PUBLISHED_TOTAL.with_label_values(&["signup_opened"]).inc();
        TIMERS_FIRED_TOTAL.with_label_values(&["voting_deadline"]).inc();
        SAVE_FAILURES_TOTAL.inc();
        SAVE_DURATION_SECONDS.observe(0.002);
        API_REQUEST_DURATION_SECONDS
            .with_label_values(&["/api/sessions/:id"])
            .observe(0.05);
    }
}
