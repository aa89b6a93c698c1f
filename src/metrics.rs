use std::time::Duration;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use crate::error::ServiceError;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct InvocationLabels {
    pub service: String,
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServiceLabels {
    pub service: String,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Prometheus metrics for service invocations.
#[derive(Clone)]
pub struct ServiceMetrics {
    pub invocations_total: Family<InvocationLabels, Counter>,
    pub invocation_duration_seconds: Family<ServiceLabels, Histogram>,
}

impl ServiceMetrics {
    /// Create a new [`ServiceMetrics`] and register it with `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let invocations_total = Family::<InvocationLabels, Counter>::default();
        registry.register(
            "forgeserve_invocations",
            "Service invocations by service and outcome",
            invocations_total.clone(),
        );

        let invocation_duration_seconds =
            Family::<ServiceLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.01, 2.0, 14))
            });
        registry.register(
            "forgeserve_invocation_duration_seconds",
            "Service invocation latency in seconds",
            invocation_duration_seconds.clone(),
        );

        Self {
            invocations_total,
            invocation_duration_seconds,
        }
    }

    /// Record one finished invocation.
    pub fn observe(&self, service: &str, result: &Result<(), ServiceError>, elapsed: Duration) {
        let outcome = match result {
            Ok(()) => "ok",
            Err(e) => e.outcome(),
        };
        self.invocations_total
            .get_or_create(&InvocationLabels {
                service: service.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
        self.invocation_duration_seconds
            .get_or_create(&ServiceLabels {
                service: service.to_string(),
            })
            .observe(elapsed.as_secs_f64());
    }

    /// Record a request for a service name that was never dispatched.
    pub fn observe_rejected(&self, err: &ServiceError) {
        self.invocations_total
            .get_or_create(&InvocationLabels {
                service: "unknown".to_string(),
                outcome: err.outcome().to_string(),
            })
            .inc();
    }
}
