//! Prometheus metrics for the tick loop and the position lifecycle.

use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::debug;

use crate::error::EngineError;
use crate::strategy::EngineEvent;

// === Metric Name Constants ===

/// Tick processing latency metric name.
pub const METRIC_TICK_LATENCY: &str = "tick_latency_ms";
/// Oracle fetch latency metric name.
pub const METRIC_ORACLE_FETCH_LATENCY: &str = "oracle_fetch_latency_ms";
/// Order book fetch latency metric name.
pub const METRIC_ORDERBOOK_FETCH_LATENCY: &str = "orderbook_fetch_latency_ms";
/// Ticks counter metric name.
pub const METRIC_TICKS: &str = "ticks_total";
/// Stale samples/quotes counter metric name.
pub const METRIC_STALE_DATA: &str = "stale_data_total";
/// Orders placed counter metric name.
pub const METRIC_ORDERS_PLACED: &str = "orders_placed_total";
/// Orders filled counter metric name.
pub const METRIC_ORDERS_FILLED: &str = "orders_filled_total";
/// Orders rejected counter metric name.
pub const METRIC_ORDERS_REJECTED: &str = "orders_rejected_total";
/// Entries counter metric name.
pub const METRIC_ENTRIES: &str = "entries_total";
/// Exits counter metric name.
pub const METRIC_EXITS: &str = "exits_total";
/// Settlements counter metric name.
pub const METRIC_SETTLEMENTS: &str = "settlements_total";
/// Skipped windows counter metric name.
pub const METRIC_WINDOWS_SKIPPED: &str = "windows_skipped_total";
/// Halts counter metric name.
pub const METRIC_HALTS: &str = "halts_total";
/// Collaborator failures counter metric name.
pub const METRIC_SOURCE_ERRORS: &str = "source_errors_total";
/// Circuit breaker trips counter metric name.
pub const METRIC_CIRCUIT_BREAKER_TRIPS: &str = "circuit_breaker_trips_total";
/// Mark-to-market drawdown gauge metric name.
pub const METRIC_DRAWDOWN: &str = "equity_drawdown_usd";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(METRIC_TICK_LATENCY, "Tick processing latency in milliseconds");
    describe_histogram!(
        METRIC_ORACLE_FETCH_LATENCY,
        "Price oracle fetch latency in milliseconds"
    );
    describe_histogram!(
        METRIC_ORDERBOOK_FETCH_LATENCY,
        "Order book fetch latency in milliseconds"
    );

    describe_counter!(METRIC_TICKS, "Total number of ticks processed");
    describe_counter!(METRIC_STALE_DATA, "Samples or quotes discarded as stale");
    describe_counter!(METRIC_ORDERS_PLACED, "Total number of orders placed");
    describe_counter!(METRIC_ORDERS_FILLED, "Total number of orders filled");
    describe_counter!(METRIC_ORDERS_REJECTED, "Total number of orders rejected");
    describe_counter!(METRIC_ENTRIES, "Positions opened");
    describe_counter!(METRIC_EXITS, "Positions sold, by exit reason");
    describe_counter!(METRIC_SETTLEMENTS, "Positions settled, by result");
    describe_counter!(METRIC_WINDOWS_SKIPPED, "Windows ended without a trade, by reason");
    describe_counter!(METRIC_HALTS, "Trading halts");
    describe_counter!(METRIC_SOURCE_ERRORS, "Oracle, book or window lookups that failed");
    describe_counter!(METRIC_CIRCUIT_BREAKER_TRIPS, "Halts caused by mark-to-market drawdown");
    describe_gauge!(METRIC_DRAWDOWN, "Mark-to-market equity minus starting cash");

    debug!("Metrics initialized");
}

/// Install the Prometheus recorder and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle, String> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("failed to install metrics recorder: {}", e))?;
    init_metrics();
    Ok(handle)
}

/// Record oracle fetch latency.
pub fn record_oracle_latency(start: Instant) {
    histogram!(METRIC_ORACLE_FETCH_LATENCY).record(elapsed_ms(start));
}

/// Record order book fetch latency.
pub fn record_orderbook_fetch_latency(start: Instant) {
    histogram!(METRIC_ORDERBOOK_FETCH_LATENCY).record(elapsed_ms(start));
}

/// Increment tick counter.
pub fn inc_ticks() {
    counter!(METRIC_TICKS).increment(1);
}

/// Increment collaborator failure counter.
pub fn inc_source_errors(source: &'static str) {
    counter!(METRIC_SOURCE_ERRORS, "source" => source).increment(1);
}

/// Increment settlements counter.
pub fn inc_settlements(won: bool) {
    let result = if won { "win" } else { "loss" };
    counter!(METRIC_SETTLEMENTS, "result" => result).increment(1);
}

/// Increment circuit breaker counter.
pub fn inc_circuit_breaker_trips() {
    counter!(METRIC_CIRCUIT_BREAKER_TRIPS).increment(1);
}

/// Record the current mark-to-market drawdown.
pub fn set_drawdown(drawdown: Decimal) {
    gauge!(METRIC_DRAWDOWN).set(drawdown.to_f64().unwrap_or(0.0));
}

/// Update counters for the events one tick produced.
pub fn record_events(events: &[EngineEvent]) {
    for event in events {
        match event {
            EngineEvent::OrderPlaced { .. } => counter!(METRIC_ORDERS_PLACED).increment(1),
            EngineEvent::Entered { .. } => {
                counter!(METRIC_ORDERS_FILLED).increment(1);
                counter!(METRIC_ENTRIES).increment(1);
            }
            EngineEvent::Exited { reason, .. } => {
                counter!(METRIC_ORDERS_FILLED).increment(1);
                counter!(METRIC_EXITS, "reason" => reason.to_string()).increment(1);
            }
            EngineEvent::Skipped { reason, .. } => {
                counter!(METRIC_WINDOWS_SKIPPED, "reason" => reason.to_string()).increment(1)
            }
            EngineEvent::Halted => counter!(METRIC_HALTS).increment(1),
            EngineEvent::Error(EngineError::StaleData(_)) => {
                counter!(METRIC_STALE_DATA).increment(1)
            }
            EngineEvent::Error(EngineError::OrderRejected { .. }) => {
                counter!(METRIC_ORDERS_REJECTED).increment(1)
            }
            _ => {}
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        elapsed_ms(self.start)
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(elapsed_ms(self.start));
    }
}

/// Create a latency timer for one tick.
pub fn timer_tick() -> LatencyTimer {
    LatencyTimer::new(METRIC_TICK_LATENCY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::SkipReason;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn latency_timer_measures_time() {
        let timer = LatencyTimer::new("test_metric");
        sleep(Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 9.0);
    }

    #[test]
    fn recording_events_without_recorder_is_harmless() {
        record_events(&[
            EngineEvent::Halted,
            EngineEvent::Skipped {
                window_id: "w".to_string(),
                reason: SkipReason::NoSignal,
            },
        ]);
    }
}
