//! Prometheus metrics for chat-service
//!
//! Exposes fan-out and relay collectors and the `/metrics` handler.

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

/// Rows written by the fan-out engine per conversation type
static MESSAGES_PERSISTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "chat_messages_persisted_total",
        "Message rows persisted by the fan-out engine",
        &["conversation_type"]
    )
    .expect("failed to register chat_messages_persisted_total")
});

static FANOUT_WRITE_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "chat_fanout_write_failures_total",
        "Broadcast fan-out rows that failed to persist"
    )
    .expect("failed to register chat_fanout_write_failures_total")
});

/// Relay events by event type and outcome (queued/dropped/delivered)
static RELAY_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "chat_relay_events_total",
        "Real-time relay events by event and outcome",
        &["event", "outcome"]
    )
    .expect("failed to register chat_relay_events_total")
});

static CONNECTED_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "chat_connected_sessions",
        "WebSocket sessions currently registered"
    )
    .expect("failed to register chat_connected_sessions")
});

pub fn record_persisted(conversation_type: &str, rows: usize) {
    MESSAGES_PERSISTED_TOTAL
        .with_label_values(&[conversation_type])
        .inc_by(rows as u64);
}

pub fn record_fanout_failures(count: usize) {
    FANOUT_WRITE_FAILURES_TOTAL.inc_by(count as u64);
}

pub fn record_relay_event(event: &str, outcome: &str) {
    RELAY_EVENTS_TOTAL.with_label_values(&[event, outcome]).inc();
}

pub fn set_connected_sessions(count: usize) {
    CONNECTED_SESSIONS.set(count as i64);
}

/// Actix handler that renders Prometheus metrics in text format.
pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
