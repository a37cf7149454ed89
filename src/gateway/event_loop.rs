//! Gateway I/O core (C4): the single-threaded event loop that owns the
//! connection table and is the only place a slot is ever read or mutated.
//!
//! Per-connection reader and writer tasks exist only to keep blocking-free
//! `AsyncRead`/`AsyncWrite` calls off this task; they carry no shared state
//! and communicate with the core exclusively through channels, so the "one
//! event-loop thread owns C2-C4, C6, and the connection table" requirement
//! (§5) holds even though Tokio, not a raw event loop, drives the sockets.
//! A reader reports events tagged with the slot's `(index, generation)`
//! identity so the core can detect and ignore a stale callback racing a
//! disconnect-then-reconnect into the same index (§9's "Callback-carrying
//! -this" note).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::broker::BrokerClient;
use crate::config::{self, GatewayConfig};
use crate::connection_table::{ConnectionTable, DEFAULT_CAPACITY, Handle};
use crate::frame::{self, Message};
use crate::gateway::router;
use crate::ring_buffer::RingFramer;
use crate::stats::Counters;

/// Idle timeout after which a slot is closed (§3, §4.4).
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);
/// Timer sweep cadence (§4.4).
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);
/// How long a clean shutdown waits for queued writes to flush (§5).
const SHUTDOWN_FLUSH_DEADLINE: Duration = Duration::from_secs(1);
/// Outbound write queue watermark per connection; exceeding it closes the
/// connection with `WriteBufferOver` (§5 "Backpressure").
const WRITE_QUEUE_WATERMARK: usize = 64;
/// Capacity of the channel reader tasks and the broker consumer use to
/// report back to the core.
const CORE_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Why the event loop should stop running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// `SIGINT` or `SIGTERM`.
    Terminate,
    /// `SIGUSR2`, treated identically to terminate per §4.4.
    UserShutdown,
}

/// External signals the gateway binary forwards into the core.
pub struct Signals {
    /// Fires once for a terminate-class signal.
    pub shutdown: tokio::sync::oneshot::Receiver<ShutdownReason>,
    /// Toggles each time `SIGUSR1` (reload) is received.
    pub reload: watch::Receiver<()>,
}

struct ConnState {
    handle: Handle,
    generation: u32,
    write_tx: mpsc::Sender<Vec<u8>>,
    reader_abort: AbortHandle,
}

enum CoreEvent {
    Rx {
        index: usize,
        generation: u32,
        at: Instant,
    },
    Frame {
        index: usize,
        generation: u32,
        msg: Message,
    },
    FramingError {
        index: usize,
        generation: u32,
        detail: String,
    },
    Disconnected {
        index: usize,
        generation: u32,
    },
}

/// The gateway's single-threaded event-loop core.
pub struct GatewayCore {
    table: ConnectionTable,
    connections: HashMap<usize, ConnState>,
    broker: BrokerClient,
    cfg: GatewayConfig,
    config_file: Option<PathBuf>,
    stats: Arc<Counters>,
    core_tx: mpsc::Sender<CoreEvent>,
    core_rx: mpsc::Receiver<CoreEvent>,
    writer_tasks: JoinSet<()>,
    next_handle: Handle,
}

impl GatewayCore {
    /// Construct a core with an event channel and a connection table that is
    /// restored from the file named by `cfg.socket_shm_key` when that key is
    /// configured and the file is readable, or a fresh table otherwise (§4.4
    /// "Binary restart preservation").
    #[must_use]
    pub fn new(broker: BrokerClient, cfg: GatewayConfig, config_file: Option<PathBuf>) -> Self {
        let (core_tx, core_rx) = mpsc::channel(CORE_EVENT_CHANNEL_CAPACITY);
        let table = load_initial_table(&cfg);
        Self {
            table,
            connections: HashMap::new(),
            broker,
            cfg,
            config_file,
            stats: Arc::new(Counters::new()),
            core_tx,
            core_rx,
            writer_tasks: JoinSet::new(),
            next_handle: 1,
        }
    }

    /// A snapshot of the error counters, for tests and periodic logging.
    #[must_use]
    pub fn stats(&self) -> crate::stats::Snapshot {
        self.stats.snapshot()
    }

    /// Run the event loop until a shutdown signal is observed.
    ///
    /// Accepts connections on `listener`, drives reads and writes, runs the
    /// 100 ms idle sweep, and dispatches messages consumed from
    /// `order→gateway` (delivered via `broker_rx`) back to their connection.
    pub async fn run(
        mut self,
        listener: TcpListener,
        mut broker_rx: mpsc::Receiver<Message>,
        mut signals: Signals,
    ) {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                reason = &mut signals.shutdown => {
                    let reason = reason.unwrap_or(ShutdownReason::Terminate);
                    info!(?reason, "gateway event loop shutting down");
                    break;
                }
                changed = signals.reload.changed() => {
                    if changed.is_ok() {
                        self.reload_config();
                    }
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => self.accept_connection(socket, peer),
                        Err(err) => warn!(error = %err, "accept error"),
                    }
                }
                Some(event) = self.core_rx.recv() => {
                    self.handle_core_event(event);
                }
                Some(msg) = broker_rx.recv() => {
                    self.handle_broker_inbound(msg);
                }
                Some(result) = self.writer_tasks.join_next() => {
                    if let Err(err) = result {
                        if !err.is_cancelled() {
                            warn!(error = %err, "writer task panicked");
                        }
                    }
                }
                _ = sweep.tick() => {
                    self.sweep_idle_connections();
                }
            }
        }
        self.shut_down().await;
    }

    fn reload_config(&mut self) {
        match config::load_gateway_config(self.config_file.as_deref()) {
            Ok(cfg) => {
                info!("gateway configuration reloaded");
                self.cfg = cfg;
            }
            Err(err) => warn!(error = %err, "configuration reload failed, keeping previous config"),
        }
    }

    fn accept_connection(&mut self, socket: TcpStream, peer: SocketAddr) {
        let handle = self.next_handle();
        let now = Instant::now();
        let slot = match self.table.add(handle, peer.ip(), now) {
            Ok(slot) => slot,
            Err(_full) => {
                self.stats.record_transport_error();
                warn!(%peer, "connection table full, rejecting new connection");
                return;
            }
        };
        if let Err(err) = socket.set_nodelay(true) {
            debug!(error = %err, "failed to set TCP_NODELAY");
        }
        let (read_half, write_half) = socket.into_split();
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_WATERMARK);
        let reader_handle =
            tokio::spawn(run_reader(slot.index, slot.generation, read_half, self.core_tx.clone()));
        self.connections.insert(
            slot.index,
            ConnState {
                handle,
                generation: slot.generation,
                write_tx,
                reader_abort: reader_handle.abort_handle(),
            },
        );
        self.writer_tasks
            .spawn(run_writer(slot.index, slot.generation, write_half, write_rx, self.core_tx.clone()));
        info!(slot = slot.index, %peer, "connection accepted");
    }

    fn next_handle(&mut self) -> Handle {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        handle
    }

    fn handle_core_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::Rx { index, generation, at } => {
                if self.is_current(index, generation) {
                    self.table.touch_rx(index, at);
                }
            }
            CoreEvent::Frame { index, generation, msg } => {
                if self.is_current(index, generation) {
                    self.route_client_frame(index, msg);
                }
            }
            CoreEvent::FramingError { index, generation, detail } => {
                if self.is_current(index, generation) {
                    self.stats.record_framing_error();
                    warn!(slot = index, detail, "malformed frame, closing connection");
                    self.close_connection(index);
                }
            }
            CoreEvent::Disconnected { index, generation } => {
                if self.is_current(index, generation) {
                    self.stats.record_transport_error();
                    self.close_connection(index);
                }
            }
        }
    }

    fn is_current(&self, index: usize, generation: u32) -> bool {
        self.connections
            .get(&index)
            .is_some_and(|conn| conn.generation == generation)
    }

    fn route_client_frame(&mut self, index: usize, msg: Message) {
        match router::on_client_frame(&mut self.table, index, msg) {
            router::ClientAction::Produce { message } => {
                let Ok(client_id) = u32::try_from(index) else {
                    self.stats.record_transport_error();
                    warn!(slot = index, "slot index does not fit in a client_id");
                    return;
                };
                let topic = self.cfg.broker.gateway_to_order_topic.clone();
                let broker = self.broker.clone();
                let stats = Arc::clone(&self.stats);
                // Produce (and its delivery-report wait) runs off this task
                // so a slow or failing broker never stalls accepts, reads,
                // or the idle sweep (§4.5, §5).
                tokio::spawn(async move {
                    if let Err(err) = broker.produce(&topic, &message, client_id).await {
                        stats.record_broker_error();
                        warn!(slot = index, error = %err, "produce to gateway->order failed");
                    }
                });
            }
            router::ClientAction::Drop => {
                self.stats.record_dropped_response();
            }
        }
    }

    fn handle_broker_inbound(&mut self, msg: Message) {
        match router::on_broker_inbound(&self.table, msg) {
            router::InboundAction::Write { slot_index, bytes } => {
                self.enqueue_write(slot_index, bytes);
            }
            router::InboundAction::Drop { reason } => {
                self.stats.record_dropped_response();
                debug!(reason, "dropped order->gateway message");
            }
        }
    }

    fn enqueue_write(&mut self, slot_index: usize, bytes: Vec<u8>) {
        let Some(conn) = self.connections.get(&slot_index) else {
            self.stats.record_dropped_response();
            return;
        };
        match conn.write_tx.try_send(bytes) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.record_transport_error();
                warn!(slot = slot_index, "write queue over watermark, closing connection");
                self.close_connection(slot_index);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // writer already torn down; nothing to do.
            }
        }
    }

    fn sweep_idle_connections(&mut self) {
        let now = Instant::now();
        let idle_handles = self.table.idle_since(now, IDLE_TIMEOUT);
        if idle_handles.is_empty() {
            return;
        }
        let idle_indices: Vec<usize> = self
            .connections
            .iter()
            .filter(|(_, conn)| idle_handles.contains(&conn.handle))
            .map(|(index, _)| *index)
            .collect();
        for index in idle_indices {
            info!(slot = index, "closing idle connection");
            self.stats.record_transport_error();
            self.close_connection(index);
        }
    }

    fn close_connection(&mut self, index: usize) {
        let Some(conn) = self.connections.remove(&index) else {
            return;
        };
        // A core-initiated close (idle sweep, malformed frame, write
        // watermark) must reclaim the reader even when the peer never
        // sends anything else: aborting it unparks it from `read()` and
        // drops its read half, instead of leaking the task and socket.
        conn.reader_abort.abort();
        self.table.remove(conn.handle);
        // Dropping `write_tx` lets the writer task drain whatever is queued
        // and then exit once the channel is both closed and empty.
    }

    async fn shut_down(mut self) {
        self.connections.clear();
        save_table_snapshot(&self.cfg, &self.table);
        let deadline = tokio::time::sleep(SHUTDOWN_FLUSH_DEADLINE);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                () = &mut deadline => {
                    if !self.writer_tasks.is_empty() {
                        warn!("shutdown flush deadline elapsed with writers still draining");
                    }
                    break;
                }
                next = self.writer_tasks.join_next() => {
                    if next.is_none() {
                        break;
                    }
                }
            }
        }
    }
}

/// Restore a connection table from the file named by `SOCKET_SHM_KEY`, or
/// build a fresh one if the key is unconfigured, the file is missing, or it
/// fails to parse. A missing or unreadable snapshot is never an error: it is
/// exactly the warm/cold restart distinction, and cold is always valid.
fn load_initial_table(cfg: &GatewayConfig) -> ConnectionTable {
    let Some(key) = cfg.socket_shm_key.as_deref() else {
        return ConnectionTable::new();
    };
    let contents = match std::fs::read_to_string(key) {
        Ok(contents) => contents,
        Err(err) => {
            debug!(path = key, error = %err, "no warm-restart snapshot to load");
            return ConnectionTable::new();
        }
    };
    let snapshot = match serde_json::from_str(&contents) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(path = key, error = %err, "warm-restart snapshot failed to parse, starting cold");
            return ConnectionTable::new();
        }
    };
    match ConnectionTable::restore(DEFAULT_CAPACITY, &snapshot) {
        Ok(table) => {
            info!(path = key, "connection table restored from warm-restart snapshot");
            table
        }
        Err(err) => {
            warn!(path = key, error = %err, "warm-restart snapshot did not apply, starting cold");
            ConnectionTable::new()
        }
    }
}

/// Write the current connection table's warm-restart snapshot to the file
/// named by `SOCKET_SHM_KEY`, if configured. Best-effort: a write failure is
/// logged, not propagated, since shutdown must still complete.
fn save_table_snapshot(cfg: &GatewayConfig, table: &ConnectionTable) {
    let Some(key) = cfg.socket_shm_key.as_deref() else {
        return;
    };
    let snapshot = table.snapshot();
    match serde_json::to_string(&snapshot) {
        Ok(json) => {
            if let Err(err) = std::fs::write(key, json) {
                warn!(path = key, error = %err, "failed to write warm-restart snapshot");
            }
        }
        Err(err) => warn!(path = key, error = %err, "failed to serialize warm-restart snapshot"),
    }
}

async fn run_reader(
    index: usize,
    generation: u32,
    mut read_half: OwnedReadHalf,
    core_tx: mpsc::Sender<CoreEvent>,
) {
    let mut framer = RingFramer::new();
    loop {
        loop {
            match framer.take_frame() {
                Ok(Some(bytes)) => match frame::decode(&bytes) {
                    Ok(msg) => {
                        if core_tx.send(CoreEvent::Frame { index, generation, msg }).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = core_tx
                            .send(CoreEvent::FramingError { index, generation, detail: err.to_string() })
                            .await;
                        return;
                    }
                },
                Ok(None) => break,
                Err(err) => {
                    let _ = core_tx
                        .send(CoreEvent::FramingError { index, generation, detail: err.to_string() })
                        .await;
                    return;
                }
            }
        }
        let region = framer.free_region();
        if region.is_empty() {
            let _ = core_tx
                .send(CoreEvent::FramingError {
                    index,
                    generation,
                    detail: "receive buffer full without a complete frame".to_owned(),
                })
                .await;
            return;
        }
        match read_half.read(region).await {
            Ok(0) => {
                let _ = core_tx.send(CoreEvent::Disconnected { index, generation }).await;
                return;
            }
            Ok(n) => {
                framer.commit(n);
                if core_tx
                    .send(CoreEvent::Rx { index, generation, at: Instant::now() })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Err(_err) => {
                let _ = core_tx.send(CoreEvent::Disconnected { index, generation }).await;
                return;
            }
        }
    }
}

async fn run_writer(
    index: usize,
    generation: u32,
    mut write_half: OwnedWriteHalf,
    mut write_rx: mpsc::Receiver<Vec<u8>>,
    core_tx: mpsc::Sender<CoreEvent>,
) {
    while let Some(bytes) = write_rx.recv().await {
        if let Err(_err) = write_half.write_all(&bytes).await {
            let _ = core_tx.send(CoreEvent::Disconnected { index, generation }).await;
            return;
        }
    }
}
