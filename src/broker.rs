//! Kafka-backed broker client (C5).
//!
//! Produce is a thin async wrapper over `rdkafka`'s [`FutureProducer`]:
//! the caller's message is cloned and stamped with the routing `client_id`
//! before it is ever serialized, so a shared sender can never have its
//! message mutated out from under it (§9's "Producer mutation" note).
//! Consume runs as a dedicated background task per topic, polling with a
//! bounded timeout and forwarding decoded messages onto a single-consumer
//! channel read by the owning component's event loop; `PartitionEOF` and
//! poll timeouts are not errors, matching the original's consumer loop.

use std::time::Duration;

use rdkafka::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::BrokerConfig;
use crate::error::{BrokerError, InitError};
use crate::frame::{self, Message};

/// How long the consumer blocks waiting for the next record before
/// re-checking its stop flag.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// How long a single produce call waits for a delivery report.
const PRODUCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the channel a background consumer forwards decoded messages
/// onto. Sized generously relative to the 100 ms poll tick so a momentarily
/// slow owning event loop does not cause the consumer to stall mid-poll.
const CONSUMER_CHANNEL_CAPACITY: usize = 1024;

/// Thread-safe handle to the broker. Cheap to clone: the producer is an
/// `rdkafka` handle backed by its own internal thread pool, and the
/// configuration is only consulted when spawning a new consumer.
#[derive(Clone)]
pub struct BrokerClient {
    producer: FutureProducer,
    cfg: BrokerConfig,
}

impl BrokerClient {
    /// Construct a client and its producer handle from broker configuration.
    ///
    /// # Errors
    /// Returns [`InitError::BrokerInitFailure`] if the producer cannot be
    /// constructed, e.g. an unparsable bootstrap server list.
    pub fn new(cfg: &BrokerConfig) -> Result<Self, InitError> {
        let producer = build_client_config(cfg).create().map_err(|err| {
            InitError::BrokerInitFailure(format!("failed to construct producer: {err}"))
        })?;
        Ok(Self {
            producer,
            cfg: cfg.clone(),
        })
    }

    /// Produce `msg` onto `topic`, first cloning it and stamping its
    /// `client_id` routing field to `client_id`. The caller's `msg` is never
    /// mutated.
    ///
    /// # Errors
    /// Returns [`BrokerError::MissingRoutingField`] if `msg`'s kind has no
    /// `client_id` field, and [`BrokerError::ProduceError`] if encoding fails
    /// or the broker does not durably accept the record within
    /// [`PRODUCE_TIMEOUT`].
    pub async fn produce(
        &self,
        topic: &str,
        msg: &Message,
        client_id: u32,
    ) -> Result<(), BrokerError> {
        let stamped = msg
            .with_client_id(client_id)
            .ok_or(BrokerError::MissingRoutingField)?;
        let record_bytes = frame::encode_record(&stamped)
            .map_err(|err| BrokerError::ProduceError(err.to_string()))?;
        let key = client_id.to_string();
        let record = FutureRecord::to(topic).payload(&record_bytes).key(&key);
        self.producer
            .send(record, Timeout::After(PRODUCE_TIMEOUT))
            .await
            .map_err(|(err, _owned)| BrokerError::ProduceError(err.to_string()))?;
        Ok(())
    }

    /// Spawn a background task that subscribes to `topic` under `group_id`
    /// and forwards every decoded record onto the returned channel. The task
    /// stops, unsubscribes, and joins once `stop` observes a change.
    ///
    /// # Errors
    /// Returns [`InitError::BrokerInitFailure`] if the consumer cannot be
    /// constructed or subscribed.
    pub fn spawn_consumer(
        &self,
        topic: &str,
        group_id: &str,
        stop: watch::Receiver<bool>,
    ) -> Result<(mpsc::Receiver<Message>, JoinHandle<()>), InitError> {
        let mut client_config = build_client_config(&self.cfg);
        client_config
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("enable.partition.eof", "true");
        let consumer: StreamConsumer = client_config.create().map_err(|err| {
            InitError::BrokerInitFailure(format!("failed to construct consumer: {err}"))
        })?;
        consumer.subscribe(&[topic]).map_err(|err| {
            InitError::BrokerInitFailure(format!("failed to subscribe to {topic}: {err}"))
        })?;
        let (tx, rx) = mpsc::channel(CONSUMER_CHANNEL_CAPACITY);
        let topic = topic.to_owned();
        let handle = tokio::spawn(consume_loop(consumer, tx, topic, stop));
        Ok((rx, handle))
    }
}

fn build_client_config(cfg: &BrokerConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", &cfg.bootstrap_servers);
    if let (Some(username), Some(password)) = (&cfg.username, &cfg.password) {
        client_config
            .set("security.protocol", "SASL_SSL")
            .set("sasl.mechanisms", "PLAIN")
            .set("sasl.username", username)
            .set("sasl.password", password);
    }
    client_config
}

async fn consume_loop(
    consumer: StreamConsumer,
    tx: mpsc::Sender<Message>,
    topic: String,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            polled = tokio::time::timeout(POLL_TIMEOUT, consumer.recv()) => {
                if !forward_polled(polled, &tx, &topic).await {
                    break;
                }
            }
        }
    }
    if let Err(err) = consumer.unsubscribe() {
        warn!(topic = %topic, error = %err, "error unsubscribing consumer on shutdown");
    }
}

/// Handle one poll outcome. Returns `false` when the owning channel has
/// closed and the consumer loop should stop.
async fn forward_polled(
    polled: Result<Result<rdkafka::message::BorrowedMessage<'_>, KafkaError>, tokio::time::error::Elapsed>,
    tx: &mpsc::Sender<Message>,
    topic: &str,
) -> bool {
    let Ok(result) = polled else {
        // poll timeout: not an error, just re-check the stop flag.
        return true;
    };
    match result {
        Err(KafkaError::PartitionEOF(_)) => true,
        Err(err) => {
            warn!(topic = %topic, error = %err, "broker consume error");
            true
        }
        Ok(borrowed) => {
            let Some(payload) = borrowed.payload() else {
                warn!(topic = %topic, "broker record carried no payload");
                return true;
            };
            match frame::decode_record(payload) {
                Ok(msg) => tx.send(msg).await.is_ok(),
                Err(err) => {
                    warn!(topic = %topic, error = %err, "broker record decode error");
                    true
                }
            }
        }
    }
}
