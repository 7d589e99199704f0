//! Prometheus collectors for the livestatus actor.
//!
//! All series live under `livestatus_actor_*` and are labelled by `site`
//! (plus `reason`/`status` where noted). The collectors are process-global:
//! every actor shares one collector set and contributes its own label
//! values, so multiple actors (one per site) can safely register against a
//! single process registry. Registering into a registry that already holds
//! the set yields `AlreadyReg`, which is ignored; any other registration
//! error is a programmer error and aborts construction.

use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use prometheus::core::Collector;
use prometheus::{
    GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
};

const NAMESPACE: &str = "livestatus";
const SUBSYSTEM: &str = "actor";

/// End-to-end latency buckets for processed work items, in seconds.
const PROCESSING_BUCKETS: &[f64] = &[0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0];

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help)
        .namespace(NAMESPACE)
        .subsystem(SUBSYSTEM)
}

struct Collectors {
    queue_length: IntGaugeVec,
    queue_capacity: IntGaugeVec,
    enqueued_total: IntCounterVec,
    dropped_total: IntCounterVec,
    in_flight: IntGaugeVec,
    processing_seconds: HistogramVec,
    processed_total: IntCounterVec,
    panics_total: IntCounterVec,
    last_success_timestamp_seconds: GaugeVec,
    reconnects_total: IntCounterVec,
    client_connected: IntGaugeVec,
    client_connection_uptime_seconds: GaugeVec,
    client_connection_duration_seconds: GaugeVec,
    connection_dials_total: IntCounterVec,
    connection_errors_total: IntCounterVec,
}

static COLLECTORS: LazyLock<Collectors> = LazyLock::new(|| Collectors {
    queue_length: IntGaugeVec::new(
        opts(
            "queue_length",
            "Current number of items buffered in the actor's queue",
        ),
        &["site"],
    )
    .expect("valid metric definition"),
    queue_capacity: IntGaugeVec::new(
        opts("queue_capacity", "Fixed capacity of the actor's queue"),
        &["site"],
    )
    .expect("valid metric definition"),
    enqueued_total: IntCounterVec::new(
        opts(
            "enqueued_total",
            "Total queries successfully accepted into the queue",
        ),
        &["site"],
    )
    .expect("valid metric definition"),
    dropped_total: IntCounterVec::new(
        opts("dropped_total", "Total queries not accepted"),
        &["site", "reason"],
    )
    .expect("valid metric definition"),
    in_flight: IntGaugeVec::new(
        opts(
            "in_flight",
            "Number of items currently being processed by the single worker",
        ),
        &["site"],
    )
    .expect("valid metric definition"),
    processing_seconds: HistogramVec::new(
        HistogramOpts::new(
            "processing_seconds",
            "End-to-end latency per processed work item",
        )
        .namespace(NAMESPACE)
        .subsystem(SUBSYSTEM)
        .buckets(PROCESSING_BUCKETS.to_vec()),
        &["site"],
    )
    .expect("valid metric definition"),
    processed_total: IntCounterVec::new(
        opts(
            "processed_total",
            "Outcome count for processed items, by final status",
        ),
        &["site", "status"],
    )
    .expect("valid metric definition"),
    panics_total: IntCounterVec::new(
        opts(
            "panics_total",
            "Number of recovered panics while processing work",
        ),
        &["site"],
    )
    .expect("valid metric definition"),
    last_success_timestamp_seconds: GaugeVec::new(
        opts(
            "last_success_timestamp_seconds",
            "UNIX timestamp of the most recent successful item",
        ),
        &["site"],
    )
    .expect("valid metric definition"),
    reconnects_total: IntCounterVec::new(
        opts(
            "reconnects_total",
            "Counts connection lifecycle events (established, closed, failures)",
        ),
        &["site", "reason"],
    )
    .expect("valid metric definition"),
    client_connected: IntGaugeVec::new(
        opts(
            "client_connected",
            "Whether the actor's client is currently connected (1) or not (0)",
        ),
        &["site"],
    )
    .expect("valid metric definition"),
    client_connection_uptime_seconds: GaugeVec::new(
        opts(
            "client_connection_uptime_seconds",
            "How long the current connection has been up (seconds)",
        ),
        &["site"],
    )
    .expect("valid metric definition"),
    client_connection_duration_seconds: GaugeVec::new(
        opts(
            "client_connection_duration_seconds",
            "Duration of the most recently closed connection (seconds)",
        ),
        &["site"],
    )
    .expect("valid metric definition"),
    connection_dials_total: IntCounterVec::new(
        opts("connection_dials_total", "Total number of successful dials"),
        &["site"],
    )
    .expect("valid metric definition"),
    connection_errors_total: IntCounterVec::new(
        opts(
            "connection_errors_total",
            "Total number of connection/probe errors",
        ),
        &["site"],
    )
    .expect("valid metric definition"),
});

/// Per-actor handle onto the shared collector set.
#[derive(Debug, Clone)]
pub(crate) struct Metrics {
    site: String,
}

impl Metrics {
    /// Registers the collector set against `registry` (or the process default
    /// registry when `None`) and returns a handle labelled with `site`.
    ///
    /// # Panics
    ///
    /// Panics on any registration error other than `AlreadyReg`.
    pub(crate) fn new(registry: Option<&Registry>, site: &str) -> Self {
        let registry: &Registry = match registry {
            Some(r) => r,
            None => prometheus::default_registry(),
        };
        register_all(registry);
        Self {
            site: site.to_string(),
        }
    }

    pub(crate) fn set_queue_length(&self, length: usize) {
        COLLECTORS
            .queue_length
            .with_label_values(&[self.site.as_str()])
            .set(length as i64);
    }

    pub(crate) fn set_queue_capacity(&self, capacity: usize) {
        COLLECTORS
            .queue_capacity
            .with_label_values(&[self.site.as_str()])
            .set(capacity as i64);
    }

    pub(crate) fn inc_enqueued(&self) {
        COLLECTORS
            .enqueued_total
            .with_label_values(&[self.site.as_str()])
            .inc();
    }

    pub(crate) fn inc_dropped(&self, reason: &str) {
        COLLECTORS
            .dropped_total
            .with_label_values(&[self.site.as_str(), reason])
            .inc();
    }

    pub(crate) fn inc_in_flight(&self) {
        COLLECTORS.in_flight.with_label_values(&[self.site.as_str()]).inc();
    }

    pub(crate) fn dec_in_flight(&self) {
        COLLECTORS.in_flight.with_label_values(&[self.site.as_str()]).dec();
    }

    pub(crate) fn observe_processing_seconds(&self, seconds: f64) {
        COLLECTORS
            .processing_seconds
            .with_label_values(&[self.site.as_str()])
            .observe(seconds);
    }

    pub(crate) fn inc_processed(&self, status: &str) {
        COLLECTORS
            .processed_total
            .with_label_values(&[self.site.as_str(), status])
            .inc();
    }

    pub(crate) fn inc_panics(&self) {
        COLLECTORS
            .panics_total
            .with_label_values(&[self.site.as_str()])
            .inc();
    }

    pub(crate) fn set_last_success_now(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        COLLECTORS
            .last_success_timestamp_seconds
            .with_label_values(&[self.site.as_str()])
            .set(now);
    }

    pub(crate) fn inc_reconnects(&self, reason: &str) {
        COLLECTORS
            .reconnects_total
            .with_label_values(&[self.site.as_str(), reason])
            .inc();
    }

    pub(crate) fn set_client_connected(&self, connected: bool) {
        COLLECTORS
            .client_connected
            .with_label_values(&[self.site.as_str()])
            .set(i64::from(connected));
    }

    pub(crate) fn set_client_conn_uptime(&self, seconds: f64) {
        COLLECTORS
            .client_connection_uptime_seconds
            .with_label_values(&[self.site.as_str()])
            .set(seconds);
    }

    pub(crate) fn set_client_conn_duration(&self, seconds: f64) {
        COLLECTORS
            .client_connection_duration_seconds
            .with_label_values(&[self.site.as_str()])
            .set(seconds);
    }

    pub(crate) fn inc_connection_dials(&self) {
        COLLECTORS
            .connection_dials_total
            .with_label_values(&[self.site.as_str()])
            .inc();
    }

    pub(crate) fn inc_connection_errors(&self) {
        COLLECTORS
            .connection_errors_total
            .with_label_values(&[self.site.as_str()])
            .inc();
    }
}

#[cfg(test)]
impl Metrics {
    pub(crate) fn dropped_count(&self, reason: &str) -> u64 {
        COLLECTORS
            .dropped_total
            .with_label_values(&[self.site.as_str(), reason])
            .get()
    }

    pub(crate) fn enqueued_count(&self) -> u64 {
        COLLECTORS
            .enqueued_total
            .with_label_values(&[self.site.as_str()])
            .get()
    }

    pub(crate) fn processed_count(&self, status: &str) -> u64 {
        COLLECTORS
            .processed_total
            .with_label_values(&[self.site.as_str(), status])
            .get()
    }

    pub(crate) fn panics_count(&self) -> u64 {
        COLLECTORS
            .panics_total
            .with_label_values(&[self.site.as_str()])
            .get()
    }

    pub(crate) fn queue_capacity_value(&self) -> i64 {
        COLLECTORS
            .queue_capacity
            .with_label_values(&[self.site.as_str()])
            .get()
    }

    pub(crate) fn client_connected_value(&self) -> i64 {
        COLLECTORS
            .client_connected
            .with_label_values(&[self.site.as_str()])
            .get()
    }
}

fn register_all(registry: &Registry) {
    let c = &*COLLECTORS;
    let collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(c.queue_length.clone()),
        Box::new(c.queue_capacity.clone()),
        Box::new(c.enqueued_total.clone()),
        Box::new(c.dropped_total.clone()),
        Box::new(c.in_flight.clone()),
        Box::new(c.processing_seconds.clone()),
        Box::new(c.processed_total.clone()),
        Box::new(c.panics_total.clone()),
        Box::new(c.last_success_timestamp_seconds.clone()),
        Box::new(c.reconnects_total.clone()),
        Box::new(c.client_connected.clone()),
        Box::new(c.client_connection_uptime_seconds.clone()),
        Box::new(c.client_connection_duration_seconds.clone()),
        Box::new(c.connection_dials_total.clone()),
        Box::new(c.connection_errors_total.clone()),
    ];
    for collector in collectors {
        match registry.register(collector) {
            Ok(()) => {}
            // The shared collector set is already wired into this registry.
            Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => panic!("failed to register livestatus metrics: {e}"),
        }
    }
}
