//! Order service core: the single-threaded event loop that owns the session
//! table and the intake queues, and is the only place either is ever read or
//! mutated (mirrors the gateway's event-loop discipline, §5).
//!
//! Unlike the gateway there are no per-connection tasks here: the only
//! external input is the `gateway→order` broker consumer channel, and the
//! only external output is producing onto `order→gateway` and the matching
//! engine topic. A periodic tick drains the intake queues so that processing
//! happens in regular, boundedly-sized batches rather than after every single
//! message (§4.8).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::broker::BrokerClient;
use crate::config::{self, OrderConfig};
use crate::frame::Message;
use crate::order::intake::{Intake, IntakeAction};
use crate::order::processor;
use crate::order::session::SessionTable;
use crate::stats::Counters;

/// Cadence at which queued orders are drained and matched (§4.8).
const PROCESSOR_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Why the event loop should stop running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// `SIGINT` or `SIGTERM`.
    Terminate,
    /// `SIGUSR2`, treated identically to terminate per §4.4.
    UserShutdown,
}

/// External signals the order-service binary forwards into the core.
pub struct Signals {
    /// Fires once for a terminate-class signal.
    pub shutdown: tokio::sync::oneshot::Receiver<ShutdownReason>,
    /// Toggles each time `SIGUSR1` (reload) is received.
    pub reload: watch::Receiver<()>,
}

/// The order service's single-threaded event-loop core.
pub struct OrderCore {
    sessions: SessionTable,
    intake: Intake,
    broker: BrokerClient,
    cfg: OrderConfig,
    config_file: Option<PathBuf>,
    stats: Arc<Counters>,
}

impl OrderCore {
    /// Construct a core with an empty session table and empty intake queues.
    #[must_use]
    pub fn new(broker: BrokerClient, cfg: OrderConfig, config_file: Option<PathBuf>) -> Self {
        let sessions = SessionTable::new(cfg.permissive_login);
        Self {
            sessions,
            intake: Intake::new(),
            broker,
            cfg,
            config_file,
            stats: Arc::new(Counters::new()),
        }
    }

    /// A snapshot of the error counters, for tests and periodic logging.
    #[must_use]
    pub fn stats(&self) -> crate::stats::Snapshot {
        self.stats.snapshot()
    }

    /// Run the event loop until a shutdown signal is observed.
    ///
    /// Consumes `gateway→order` records from `broker_rx`, answering logins
    /// synchronously and enqueuing orders, and drains both intake queues
    /// every [`PROCESSOR_TICK_INTERVAL`], producing each resulting
    /// `OrderResponse` onto `order→gateway` and each accepted order onto the
    /// matching-engine topic.
    pub async fn run(mut self, mut broker_rx: mpsc::Receiver<Message>, mut signals: Signals) {
        let mut tick = tokio::time::interval(PROCESSOR_TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                reason = &mut signals.shutdown => {
                    let reason = reason.unwrap_or(ShutdownReason::Terminate);
                    info!(?reason, "order service event loop shutting down");
                    break;
                }
                changed = signals.reload.changed() => {
                    if changed.is_ok() {
                        self.reload_config();
                    }
                }
                Some(msg) = broker_rx.recv() => {
                    self.handle_inbound(msg);
                }
                _ = tick.tick() => {
                    self.run_processor_tick();
                }
            }
        }
    }

    fn reload_config(&mut self) {
        match config::load_order_config(self.config_file.as_deref()) {
            Ok(cfg) => {
                info!("order service configuration reloaded");
                self.sessions.set_permissive(cfg.permissive_login);
                self.cfg = cfg;
            }
            Err(err) => warn!(error = %err, "configuration reload failed, keeping previous config"),
        }
    }

    fn handle_inbound(&mut self, msg: Message) {
        match self.intake.on_message(&mut self.sessions, msg) {
            IntakeAction::Respond(response) => {
                self.produce_to_gateway(response);
            }
            IntakeAction::Enqueued => {}
            IntakeAction::Unexpected => {
                self.stats.record_dropped_response();
            }
        }
    }

    fn run_processor_tick(&mut self) {
        let outcomes = processor::drain(&mut self.intake);
        for outcome in outcomes {
            self.produce_to_gateway(outcome.to_gateway);
            if let Some(to_match) = outcome.to_matching_engine {
                self.produce_to_matching_engine(to_match);
            }
        }
        processor::run_match_pass();
    }

    /// Spawns the send and its delivery-report wait off this task so a
    /// slow or failing broker never stalls the processor tick (§4.5, §5).
    fn produce_to_gateway(&mut self, msg: Message) {
        let Some(client_id) = msg.client_id() else {
            self.stats.record_broker_error();
            warn!("message bound for order->gateway carries no routing field");
            return;
        };
        let topic = self.cfg.broker.order_to_gateway_topic.clone();
        let broker = self.broker.clone();
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            if let Err(err) = broker.produce(&topic, &msg, client_id).await {
                stats.record_broker_error();
                warn!(error = %err, "produce to order->gateway failed");
            }
        });
    }

    /// Spawns the send and its delivery-report wait off this task, same as
    /// [`Self::produce_to_gateway`].
    fn produce_to_matching_engine(&mut self, msg: Message) {
        let Some(client_id) = msg.client_id() else {
            self.stats.record_broker_error();
            warn!("message bound for the matching engine carries no routing field");
            return;
        };
        let topic = self.cfg.matching_engine_topic.clone();
        let broker = self.broker.clone();
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            if let Err(err) = broker.produce(&topic, &msg, client_id).await {
                stats.record_broker_error();
                warn!(error = %err, "produce to matching engine failed");
            }
        });
    }
}
