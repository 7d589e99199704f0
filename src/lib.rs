//! # livestatus-client
//!
//! A client for the Livestatus Query Language (LQL) spoken by monitoring
//! servers of the Nagios/Checkmk families.
//!
//! Two pieces do the real work:
//!
//! - [`LivestatusQuery`]: a fluent, order-preserving, injection-resistant
//!   builder for LQL request text
//! - [`LivestatusActor`]: a long-lived single-worker loop that multiplexes
//!   queries from many producers over one persistent connection, with
//!   bounded-queue backpressure, adaptive health checking, fixed16 response
//!   framing, Prometheus metrics, and connectivity events
//!
//! [`query_oneoff`] covers ad-hoc use without the actor.
//!
//! # Core Invariants
//!
//! 1. **Injection-resistant**: no rendered line ever contains a raw CR, LF,
//!    or NUL
//! 2. **One connection, one request at a time, one owning task**
//! 3. **Bounded everywhere**: the inbox rejects rather than grows, response
//!    bodies are size-capped, every network phase has a deadline
//! 4. **Caller-owned buses**: the results and event channels are never
//!    closed and never blocked on by the actor
//!
//! # Example
//!
//! ```ignore
//! use livestatus_client::{LivestatusActor, LivestatusConfig, LivestatusQuery, OutputFormat};
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! let (results_tx, mut results_rx) = mpsc::channel(64);
//! let config = LivestatusConfig::new("localhost:6557");
//! let actor = LivestatusActor::new("site1", Some(config), 100, results_tx, None);
//! actor.start(&CancellationToken::new())?;
//!
//! let mut query = LivestatusQuery::new("hosts", ["name", "state"]);
//! query.filter_equal("state", "1").output_format(OutputFormat::Json);
//! let id = actor.try_send_query(&query).expect("queue full");
//!
//! let msg = results_rx.recv().await.unwrap();
//! assert_eq!(msg.id, id);
//! ```

pub mod actor;
pub mod config;
mod connection;
pub mod error;
pub mod events;
mod metrics;
pub mod oneoff;
pub mod protocol;
pub mod query;

#[cfg(test)]
mod tests;

pub use actor::LivestatusActor;
pub use config::LivestatusConfig;
pub use error::{LivestatusError, LivestatusResult};
pub use events::{ConnectivityEvent, ConnectivityState};
pub use oneoff::{query_oneoff, query_oneoff_from_builder};
pub use protocol::{
    parse_fixed16_header, status_text, STATUS_BAD_REQUEST, STATUS_FORBIDDEN,
    STATUS_INTERNAL_SERVER_ERROR, STATUS_NOT_FOUND, STATUS_OK, STATUS_SERVICE_UNAVAILABLE,
    STATUS_UNAUTHORIZED,
};
pub use query::{LivestatusQuery, Op, OutputFormat};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifies a submitted work item.
pub type RequestId = u64;

/// Seeded with a time-based value purely to reduce collision chances across
/// short-lived processes; strict uniqueness guarantees are out of scope.
static ID_COUNTER: LazyLock<AtomicU64> = LazyLock::new(|| {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1);
    AtomicU64::new(seed.max(1))
});

/// Returns a new, monotonically increasing ID. Cheap and lock-free.
pub(crate) fn next_request_id() -> RequestId {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed) + 1
}

/// The result of processing a work item. Response bodies are opaque bytes;
/// parsing rows is the caller's concern.
#[derive(Debug)]
pub struct QueryResult {
    pub status_code: u16,
    pub data: Vec<u8>,
    pub error: Option<LivestatusError>,
}

impl QueryResult {
    pub(crate) fn ok(status_code: u16, data: Vec<u8>) -> Self {
        Self {
            status_code,
            data,
            error: None,
        }
    }

    pub(crate) fn err(status_code: u16, error: LivestatusError) -> Self {
        Self {
            status_code,
            data: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// What the actor publishes to the shared results bus.
#[derive(Debug)]
pub struct ResultMsg {
    pub id: RequestId,
    pub result: QueryResult,
}

/// A work item to be processed by the actor.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: RequestId,
    pub query: LivestatusQuery,
}

impl WorkItem {
    /// Builds a work item with the given ID, copying the query at ingress so
    /// the builder stays editable by the caller afterwards.
    pub fn from_query(id: RequestId, query: &LivestatusQuery) -> Self {
        Self {
            id,
            query: query.clone(),
        }
    }
}

#[cfg(test)]
mod id_tests {
    use super::*;

    #[test]
    fn request_ids_increase() {
        let a = next_request_id();
        let b = next_request_id();
        let c = next_request_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn ingress_copy_shields_in_flight_work() {
        let mut query = LivestatusQuery::new("hosts", ["name"]);
        let item = WorkItem::from_query(7, &query);
        query.filter_equal("state", "2");

        assert_eq!(item.query.build(), "GET hosts\nColumns: name\n\n");
        assert!(query.build().contains("Filter: state = 2"));
    }
}
