//! Controller metrics
//!
//! Registered into a caller-supplied [`Registry`] rather than the prometheus
//! default registry, so `main` decides what gets exposed.

use crate::error::Result;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct Metrics {
    /// Sync outcomes by `result` (success, error, panic, dropped)
    pub reconciles: IntCounterVec,
    /// Wall time of driver probes
    pub probe_duration: Histogram,
    /// Keys put back on the queue after a failure
    pub requeues: IntCounter,
    /// Writes against the API server by `op` (create, update, delete)
    pub store_writes: IntCounterVec,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let reconciles = IntCounterVec::new(
            Opts::new("capability_reconcile_total", "Capability syncs by result"),
            &["result"],
        )?;
        let probe_duration = Histogram::with_opts(
            HistogramOpts::new(
                "capability_probe_duration_seconds",
                "Duration of CSI capability probes",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0]),
        )?;
        let requeues = IntCounter::new(
            "capability_queue_requeues_total",
            "Keys requeued with backoff after a failed sync",
        )?;
        let store_writes = IntCounterVec::new(
            Opts::new(
                "capability_store_writes_total",
                "StorageClassCapability writes by operation",
            ),
            &["op"],
        )?;

        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(probe_duration.clone()))?;
        registry.register(Box::new(requeues.clone()))?;
        registry.register(Box::new(store_writes.clone()))?;

        Ok(Self {
            reconciles,
            probe_duration,
            requeues,
            store_writes,
        })
    }

    pub fn reconciled(&self, result: &str) {
        self.reconciles.with_label_values(&[result]).inc();
    }

    pub fn wrote(&self, op: &str) {
        self.store_writes.with_label_values(&[op]).inc();
    }

    pub fn observe_probe(&self, started: Instant) {
        self.probe_duration.observe(started.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_into_given_registry() {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry).unwrap();
        metrics.reconciled("success");
        metrics.wrote("create");

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"capability_reconcile_total".to_string()));
        assert!(names.contains(&"capability_store_writes_total".to_string()));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        Metrics::new(&registry).unwrap();
        assert!(Metrics::new(&registry).is_err());
    }
}
