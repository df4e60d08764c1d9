//! Prometheus counters for the facilitator.

use prometheus::{
    register_int_counter_vec, register_int_gauge, Encoder, IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::LazyLock;

pub static VERIFY_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "fluxa402_facilitator_verify_total",
        "Total verification requests",
        &["result"]
    )
    .unwrap()
});

pub static SETTLE_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "fluxa402_facilitator_settle_total",
        "Total settlement requests",
        &["result"]
    )
    .unwrap()
});

pub static VERIFIED_RECEIPTS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "fluxa402_facilitator_verified_receipts",
        "Receipts accepted by the deferred scheme"
    )
    .unwrap()
});

pub static SETTLED_RECEIPTS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "fluxa402_facilitator_settled_receipts",
        "Receipts covered by successful settlement batches"
    )
    .unwrap()
});

pub static SETTLEMENT_TXS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "fluxa402_facilitator_settlement_txs",
        "Settlement transactions submitted"
    )
    .unwrap()
});

pub static PENDING_SESSIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "fluxa402_facilitator_pending_sessions",
        "Sessions with outstanding receipts"
    )
    .unwrap()
});

pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
