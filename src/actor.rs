//! The livestatus actor: a bounded inbox, a single worker, one persistent
//! connection.
//!
//! # Core Invariants
//!
//! 1. **Single owner**: the connection is touched only by the worker task,
//!    so no lock guards it
//! 2. **Bounded inbox**: a full queue rejects work instead of growing
//! 3. **Non-blocking buses**: results and events are published with
//!    `try_send`; slow consumers lose observability, never stall the worker
//! 4. **No in-band retry**: a failed item reports its error and leaves
//!    recovery to the health-check cadence
//!
//! # Architecture
//!
//! ```text
//! producers -> bounded queue -> worker -> persistent connection
//!                                 |            ^
//!                                 v            | adaptive health check
//!                            results bus  (5s / 17s)
//! ```

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::FutureExt;
use prometheus::Registry;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::LivestatusConfig;
use crate::connection::{self, Transport};
use crate::error::{LivestatusError, LivestatusResult};
use crate::events::{ConnectivityEvent, ConnectivityState};
use crate::metrics::Metrics;
use crate::protocol::{STATUS_INTERNAL_SERVER_ERROR, STATUS_NOT_FOUND, STATUS_OK};
use crate::query::LivestatusQuery;
use crate::{next_request_id, QueryResult, RequestId, ResultMsg, WorkItem};

/// Default queue capacity when zero is given.
const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Health-check cadence: fast while disconnected, relaxed once healthy.
const INTERVAL_DISCONNECTED: Duration = Duration::from_secs(5);
const INTERVAL_CONNECTED: Duration = Duration::from_secs(17);

/// Manages a bounded queue and processes livestatus queries over one
/// persistent connection.
///
/// Results are published to a shared, caller-owned results channel; the
/// actor never closes it and never blocks on it. With `config: None` the
/// actor runs in simulation mode, answering from a fixed routing table so
/// the unit surface stays hermetic.
pub struct LivestatusActor {
    site: String,
    config: Option<LivestatusConfig>,
    metrics: Metrics,
    queue_capacity: usize,

    queue_tx: mpsc::Sender<WorkItem>,
    /// Taken by the worker on `start`.
    queue_rx: Mutex<Option<mpsc::Receiver<WorkItem>>>,
    results: mpsc::Sender<ResultMsg>,
    events: Mutex<Option<mpsc::Sender<ConnectivityEvent>>>,

    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    conn_state: Arc<AtomicI32>,
    closed: AtomicBool,
}

impl LivestatusActor {
    /// Creates a new livestatus actor and registers its metrics against
    /// `registry` (the process default registry when `None`).
    ///
    /// `queue_capacity` of zero selects the default (100). The `results`
    /// channel is owned by the caller; buffered channels are strongly
    /// recommended, an unbuffered one drops every result on the floor.
    pub fn new(
        site: impl Into<String>,
        config: Option<LivestatusConfig>,
        queue_capacity: usize,
        results: mpsc::Sender<ResultMsg>,
        registry: Option<&Registry>,
    ) -> Self {
        let site = site.into();
        let queue_capacity = if queue_capacity == 0 {
            DEFAULT_QUEUE_CAPACITY
        } else {
            queue_capacity
        };
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity);

        let metrics = Metrics::new(registry, &site);
        metrics.set_queue_capacity(queue_capacity);
        metrics.set_client_connected(false);

        Self {
            site,
            config,
            metrics,
            queue_capacity,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            results,
            events: Mutex::new(None),
            shutdown: CancellationToken::new(),
            worker: Mutex::new(None),
            conn_state: Arc::new(AtomicI32::new(ConnectivityState::Unknown as i32)),
            closed: AtomicBool::new(false),
        }
    }

    /// Site name used as the metrics dimension.
    pub fn site(&self) -> &str {
        &self.site
    }

    /// Fixed capacity of the inbox.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Last published connectivity state.
    pub fn connectivity_state(&self) -> ConnectivityState {
        ConnectivityState::from_i32(self.conn_state.load(Ordering::SeqCst))
    }

    /// Configures an optional channel for connectivity events. One-shot
    /// wiring: call before [`start`](Self::start).
    pub fn set_event_chan(&self, events: mpsc::Sender<ConnectivityEvent>) {
        *self.events.lock().expect("lock poisoned") = Some(events);
    }

    /// Begins the processing worker, bound to the caller's context:
    /// cancelling `ctx` shuts the actor down exactly as [`close`](Self::close)
    /// does. Safe to call only once; subsequent calls return an error.
    pub fn start(&self, ctx: &CancellationToken) -> LivestatusResult<()> {
        debug!(site = %self.site, "start");
        let receiver = self.queue_rx.lock().expect("lock poisoned").take();
        let Some(receiver) = receiver else {
            return Err(LivestatusError::AlreadyStarted);
        };

        // Derive the actor's lifetime from the caller's context: an external
        // cancel folds into the shutdown token every suspension point
        // already watches.
        let parent = ctx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => shutdown.cancel(),
                _ = shutdown.cancelled() => {}
            }
        });

        let worker = Worker {
            site: self.site.clone(),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            results: self.results.clone(),
            events: self.events.lock().expect("lock poisoned").clone(),
            token: self.shutdown.clone(),
            conn_state: self.conn_state.clone(),
            conn: None,
            active_since: None,
        };
        let handle = tokio::spawn(worker.run(receiver));
        *self.worker.lock().expect("lock poisoned") = Some(handle);
        Ok(())
    }

    /// Creates a work item from the given query, enqueues it (blocking until
    /// there is room), and returns the request ID.
    pub async fn send_query(
        &self,
        ctx: &CancellationToken,
        query: &LivestatusQuery,
    ) -> LivestatusResult<RequestId> {
        let id = next_request_id();
        self.enqueue(ctx, WorkItem::from_query(id, query)).await?;
        Ok(id)
    }

    /// Attempts to enqueue a query without blocking. Returns the generated
    /// request ID, or `None` when the queue is full.
    pub fn try_send_query(&self, query: &LivestatusQuery) -> Option<RequestId> {
        let id = next_request_id();
        self.try_enqueue(WorkItem::from_query(id, query))
            .then_some(id)
    }

    /// Attempts to enqueue a work item without blocking.
    pub fn try_enqueue(&self, item: WorkItem) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            self.metrics.inc_dropped("actor_closed");
            return false;
        }
        match self.queue_tx.try_send(item) {
            Ok(()) => {
                self.metrics.inc_enqueued();
                self.metrics.set_queue_length(self.queue_len());
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.inc_dropped("queue_full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.inc_dropped("actor_closed");
                false
            }
        }
    }

    /// Enqueues a work item, waiting for queue space. Aborts when the caller
    /// token is cancelled (`ctx_done`) or the actor shuts down
    /// (`actor_closed`).
    pub async fn enqueue(
        &self,
        ctx: &CancellationToken,
        item: WorkItem,
    ) -> LivestatusResult<()> {
        // Fast-path: respect an already-cancelled caller immediately.
        if ctx.is_cancelled() {
            self.metrics.inc_dropped("ctx_done");
            return Err(LivestatusError::Cancelled);
        }
        if self.closed.load(Ordering::SeqCst) {
            self.metrics.inc_dropped("actor_closed");
            return Err(LivestatusError::Closed);
        }
        tokio::select! {
            sent = self.queue_tx.send(item) => match sent {
                Ok(()) => {
                    self.metrics.inc_enqueued();
                    self.metrics.set_queue_length(self.queue_len());
                    Ok(())
                }
                Err(_) => {
                    self.metrics.inc_dropped("actor_closed");
                    Err(LivestatusError::Closed)
                }
            },
            _ = ctx.cancelled() => {
                self.metrics.inc_dropped("ctx_done");
                Err(LivestatusError::Cancelled)
            }
            _ = self.shutdown.cancelled() => {
                self.metrics.inc_dropped("actor_closed");
                Err(LivestatusError::Closed)
            }
        }
    }

    /// Gracefully shuts down the actor. Idempotent; waits for the worker to
    /// finish its in-flight item and close the persistent connection. The
    /// caller-owned results channel is left open.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.cancel();
        }
        let handle = self.worker.lock().expect("lock poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn queue_len(&self) -> usize {
        self.queue_tx.max_capacity() - self.queue_tx.capacity()
    }

    #[cfg(test)]
    pub(crate) fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Worker-local state. `conn` and `active_since` are owned by the single
/// worker task, so no synchronisation guards them; `conn_state` is published
/// atomically for outside observers.
struct Worker {
    site: String,
    config: Option<LivestatusConfig>,
    metrics: Metrics,
    results: mpsc::Sender<ResultMsg>,
    events: Option<mpsc::Sender<ConnectivityEvent>>,
    token: CancellationToken,
    conn_state: Arc<AtomicI32>,
    conn: Option<Transport>,
    active_since: Option<Instant>,
}

impl Worker {
    async fn run(mut self, mut queue: mpsc::Receiver<WorkItem>) {
        debug!(site = %self.site, "worker started");
        let token = self.token.clone();
        let timer = sleep(INTERVAL_DISCONNECTED);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                () = &mut timer => {
                    self.run_health_check(queue.len()).await;
                    let interval = if self.state() == ConnectivityState::Connected {
                        INTERVAL_CONNECTED
                    } else {
                        INTERVAL_DISCONNECTED
                    };
                    timer.as_mut().reset(tokio::time::Instant::now() + interval);
                }
                item = queue.recv() => {
                    let Some(item) = item else { break };
                    self.metrics.set_queue_length(queue.len());
                    self.process_item(item).await;
                }
            }
        }

        self.close_conn();
        debug!(site = %self.site, "worker finished");
    }

    fn state(&self) -> ConnectivityState {
        ConnectivityState::from_i32(self.conn_state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectivityState) {
        self.conn_state.store(state as i32, Ordering::SeqCst);
    }

    fn emit(&self, event: ConnectivityEvent) {
        self.set_state(event.state);
        let Some(events) = &self.events else { return };
        // Non-blocking: a slow event consumer degrades observability only.
        let _ = events.try_send(event);
    }

    /// Processes a single work item with metrics and panic containment.
    async fn process_item(&mut self, item: WorkItem) {
        self.metrics.inc_in_flight();
        let started = Instant::now();
        let id = item.id;

        let outcome = std::panic::AssertUnwindSafe(self.process_one(&item))
            .catch_unwind()
            .await;
        if let Err(panic) = outcome {
            let message = panic_message(panic.as_ref());
            error!(site = %self.site, id, panic = %message, "panic while processing livestatus query");
            self.metrics.inc_panics();
            self.publish(
                id,
                QueryResult::err(
                    STATUS_INTERNAL_SERVER_ERROR,
                    LivestatusError::Panic(message),
                ),
            );
        }

        self.metrics
            .observe_processing_seconds(started.elapsed().as_secs_f64());
        self.metrics.dec_in_flight();
    }

    /// The actual livestatus logic: one connection attempt, one execution,
    /// one published result. Recovery is the health check's job.
    async fn process_one(&mut self, item: &WorkItem) {
        let conn = self.conn.take();
        let result = match self.config.as_ref() {
            Some(config) => match connection::ensure(config, conn).await {
                Err(e) => QueryResult::err(STATUS_INTERNAL_SERVER_ERROR, e),
                Ok(mut transport) => {
                    match transport.exec(config, &self.token, &item.query).await {
                        Ok(result) => {
                            self.conn = Some(transport);
                            result
                        }
                        Err(e) => {
                            // Drop the connection on a transport-phase error;
                            // the next health check rebuilds it.
                            QueryResult::err(STATUS_INTERNAL_SERVER_ERROR, e)
                        }
                    }
                }
            },
            None => simulate(&item.query).await,
        };

        self.metrics.inc_processed(&result.status_code.to_string());
        if result.status_code == STATUS_OK {
            self.metrics.set_last_success_now();
        }
        self.publish(item.id, result);
    }

    /// Periodically keeps the connection warm and detects silent transport
    /// death. Skipped while user traffic is pending (it is a better probe).
    async fn run_health_check(&mut self, pending: usize) {
        if pending > 0 {
            debug!(site = %self.site, pending, "health-check skipped: pending work");
            return;
        }
        let Some(config) = self.config.clone() else {
            debug!(site = %self.site, "health-check skipped: no config");
            return;
        };
        debug!(site = %self.site, address = %config.address, "health-check tick");

        let was_disconnected = self.conn.is_none();
        match connection::ensure(&config, self.conn.take()).await {
            Err(e) => {
                warn!(site = %self.site, error = %e, "health-check connection failed");
                self.metrics.inc_reconnects("conn_error");
                self.metrics.inc_connection_errors();
                self.emit(
                    ConnectivityEvent::new(&self.site, ConnectivityState::Retrying, "conn_error")
                        .with_error(&e),
                );
                self.metrics.set_client_connected(false);
                self.close_conn();
                return;
            }
            Ok(transport) => self.conn = Some(transport),
        }
        if was_disconnected {
            debug!(site = %self.site, address = %config.address, "health-check connection established");
            self.metrics.inc_reconnects("established");
            self.metrics.inc_connection_dials();
            self.metrics.set_client_connected(true);
            self.active_since = Some(Instant::now());
            self.emit(ConnectivityEvent::new(
                &self.site,
                ConnectivityState::Connected,
                "established",
            ));
        }

        let mut probe = LivestatusQuery::new("hosts", ["name"]);
        probe.limit(1);
        let started = Instant::now();
        let transport = self.conn.as_mut().expect("connection just ensured");
        match transport.exec(&config, &self.token, &probe).await {
            Err(e) => {
                warn!(site = %self.site, error = %e, elapsed = ?started.elapsed(), "health-check query failed");
                self.metrics.inc_reconnects("probe_error");
                self.metrics.inc_connection_errors();
                self.emit(
                    ConnectivityEvent::new(&self.site, ConnectivityState::Retrying, "probe_error")
                        .with_error(&e),
                );
                self.close_conn();
            }
            Ok(_) => {
                debug!(site = %self.site, elapsed = ?started.elapsed(), "health-check ok");
                if let Some(active_since) = self.active_since {
                    self.metrics
                        .set_client_conn_uptime(active_since.elapsed().as_secs_f64());
                }
            }
        }
    }

    fn close_conn(&mut self) {
        // Dropping the transport closes the socket.
        self.conn = None;
        if let Some(active_since) = self.active_since.take() {
            self.metrics
                .set_client_conn_duration(active_since.elapsed().as_secs_f64());
        }
        self.metrics.set_client_connected(false);
        self.metrics.set_client_conn_uptime(0.0);
        self.emit(ConnectivityEvent::new(
            &self.site,
            ConnectivityState::Disconnected,
            "closed",
        ));
        self.metrics.inc_reconnects("closed");
    }

    /// Delivers the result to the shared results bus without blocking.
    fn publish(&self, id: RequestId, result: QueryResult) {
        if self.results.try_send(ResultMsg { id, result }).is_err() {
            // Results bus full (or gone) — drop on the floor and count it.
            self.metrics.inc_dropped("result_chan_full");
        }
    }
}

/// Simulation routing used when no config is present, keeping tests fast
/// without a Livestatus endpoint.
async fn simulate(query: &LivestatusQuery) -> QueryResult {
    sleep(Duration::from_millis(50)).await;
    match query.table() {
        "error" => QueryResult::err(
            STATUS_INTERNAL_SERVER_ERROR,
            LivestatusError::Server {
                code: STATUS_INTERNAL_SERVER_ERROR,
                message: "simulated error".to_string(),
            },
        ),
        "not_found" => QueryResult::err(
            STATUS_NOT_FOUND,
            LivestatusError::Server {
                code: STATUS_NOT_FOUND,
                message: "not found".to_string(),
            },
        ),
        _ => QueryResult::ok(
            STATUS_OK,
            format!("Processed: {}", query.build()).into_bytes(),
        ),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
