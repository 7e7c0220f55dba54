//! Prometheus metrics for the price feeder

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        registry
            .register(Box::new(TX_FAILURES_TOTAL.clone()))
            .expect("Failed to register tx_failures_total metric");
        registry
            .register(Box::new(WS_RECONNECTS_TOTAL.clone()))
            .expect("Failed to register ws_reconnects_total metric");
        registry
    };

    /// Failed vote broadcasts, by reason: `code` (rejected by chain),
    /// `submit` (could not submit) and `timeout` (never included).
    pub static ref TX_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "price_feeder_tx_failures_total",
            "Total number of failed oracle vote broadcasts by reason"
        ),
        &["reason"]
    ).expect("Failed to create tx_failures_total metric");

    /// Websocket reconnect attempts per provider
    pub static ref WS_RECONNECTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "price_feeder_ws_reconnects_total",
            "Total number of websocket reconnect attempts"
        ),
        &["provider"]
    ).expect("Failed to create ws_reconnects_total metric");
}

pub const TX_FAILURE_CODE: &str = "code";
pub const TX_FAILURE_SUBMIT: &str = "submit";
pub const TX_FAILURE_TIMEOUT: &str = "timeout";

pub fn record_tx_failure(reason: &str) {
    TX_FAILURES_TOTAL.with_label_values(&[reason]).inc();
}

/// Render every registered metric in the Prometheus text format.
pub fn gather_text() -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reasons_are_counted_separately() {
        let before_code = TX_FAILURES_TOTAL.with_label_values(&[TX_FAILURE_CODE]).get();
        let before_timeout = TX_FAILURES_TOTAL.with_label_values(&[TX_FAILURE_TIMEOUT]).get();

        record_tx_failure(TX_FAILURE_CODE);
        record_tx_failure(TX_FAILURE_CODE);

        assert!(TX_FAILURES_TOTAL.with_label_values(&[TX_FAILURE_CODE]).get() >= before_code + 2);
        assert!(TX_FAILURES_TOTAL.with_label_values(&[TX_FAILURE_TIMEOUT]).get() >= before_timeout);
    }

    #[test]
    fn gathered_text_names_the_counters() {
        record_tx_failure(TX_FAILURE_SUBMIT);
        let text = gather_text().unwrap();
        assert!(text.contains("price_feeder_tx_failures_total"));
        assert!(text.contains("reason=\"submit\""));
    }
}
