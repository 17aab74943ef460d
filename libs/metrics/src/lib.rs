//! Thin wrapper around `prometheus`, all registered into its process-global
//! default registry, plus an unsigned gauge type for counters that are
//! conceptually non-negative (byte counts, page counts).

use prometheus::core::{AtomicU64, GenericGauge};
pub use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Histogram, HistogramVec, IntCounter,
    IntCounterVec, IntGauge, IntGaugeVec,
};
use prometheus::{Encoder, TextEncoder};

pub type UIntGauge = GenericGauge<AtomicU64>;

/// Registers a [`UIntGauge`] into the same default registry the
/// `register_*!` macros re-exported above use, so it shows up alongside
/// them in [`gather_to_string`].
#[macro_export]
macro_rules! register_uint_gauge {
    ($NAME:expr, $HELP:expr) => {{
        let gauge = $crate::UIntGauge::new($NAME, $HELP).unwrap();
        $crate::prometheus::register(Box::new(gauge.clone())).map(|()| gauge)
    }};
}

/// Re-exported so `register_uint_gauge!` can name `prometheus::register`
/// without every caller needing its own `prometheus` dependency.
pub use prometheus;

/// Renders every metric registered via this crate's macros in Prometheus
/// text exposition format, for an HTTP `/metrics` handler.
pub fn gather_to_string() -> String {
    let metric_families = prometheus::gather();
    let mut buf = Vec::new();
    TextEncoder::new().encode(&metric_families, &mut buf).ok();
    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint_gauge_registers_and_reports() {
        let gauge = register_uint_gauge!("metrics_test_bytes", "test gauge").unwrap();
        gauge.set(42);
        let out = gather_to_string();
        assert!(out.contains("metrics_test_bytes 42"));
    }
}
