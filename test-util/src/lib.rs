//! Shared test helpers: sample message builders and an in-process broker
//! double that lets integration tests exercise the gateway/order-service
//! message flow without a Kafka cluster (§8's "in-process fake broker").
//!
//! [`tradegate::broker::BrokerClient`] talks to `rdkafka` directly and has
//! no trait seam to swap in a double, so these helpers stop one layer
//! short of it: they drive [`tradegate::gateway::router`],
//! [`tradegate::order::intake`], and [`tradegate::order::processor`]
//! directly, passing [`tradegate::frame::Message`] values through plain
//! channels the way the two real topics would carry encoded records.

use tokio::sync::mpsc;
use tradegate::frame::{
    AccountLoginReq, AccountLoginRes, FuturesOrder, Message, OrderResponse, OrderStatus,
    OrderType, Side,
};

/// Default channel capacity for [`FakeBroker`]'s topic pairs.
const CHANNEL_CAPACITY: usize = 256;

/// Build a sample `AccountLoginReq`.
#[must_use]
pub fn login_req(account: u32, session_key: &str, client_id: u32) -> Message {
    Message::AccountLoginReq(AccountLoginReq {
        account,
        session_key: session_key.to_owned(),
        client_id,
    })
}

/// Build a sample `AccountLoginRes`.
#[must_use]
pub fn login_res(account: u32, result: i32, client_id: u32) -> Message {
    Message::AccountLoginRes(AccountLoginRes {
        account,
        result,
        client_id,
    })
}

/// Build a sample `FuturesOrder` with sensible defaults for a valid limit
/// order; override fields on the returned value to build an invalid one.
#[must_use]
pub fn futures_order(order_id: &str, side: Side, client_id: u32) -> Message {
    Message::FuturesOrder(FuturesOrder {
        order_id: order_id.to_owned(),
        user_id: 10_000,
        symbol: "ESU6".to_owned(),
        side,
        order_type: OrderType::Limit,
        quantity: 1.0,
        price: 50_000.0,
        status: OrderStatus::New,
        timestamp: 0,
        client_id,
    })
}

/// Build a sample `OrderResponse`.
#[must_use]
pub fn order_response(order_id: &str, status: OrderStatus, client_id: u32) -> Message {
    Message::OrderResponse(OrderResponse {
        order_id: order_id.to_owned(),
        status,
        message: String::new(),
        client_id,
    })
}

/// An in-process stand-in for the `gateway→order` and `order→gateway`
/// topics. Each side gets a sender and a receiver; nothing here encodes or
/// decodes records, matching the level at which `produce`/`consume` hand
/// off already-decoded [`Message`] values to the owning event loop.
pub struct FakeBroker {
    /// Gateway-side handle onto `gateway→order`.
    pub gateway_to_order_tx: mpsc::Sender<Message>,
    /// Order-service-side handle onto `gateway→order`.
    pub gateway_to_order_rx: mpsc::Receiver<Message>,
    /// Order-service-side handle onto `order→gateway`.
    pub order_to_gateway_tx: mpsc::Sender<Message>,
    /// Gateway-side handle onto `order→gateway`.
    pub order_to_gateway_rx: mpsc::Receiver<Message>,
}

impl FakeBroker {
    /// Construct both topic channel pairs at the default test capacity.
    #[must_use]
    pub fn new() -> Self {
        let (gateway_to_order_tx, gateway_to_order_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (order_to_gateway_tx, order_to_gateway_rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            gateway_to_order_tx,
            gateway_to_order_rx,
            order_to_gateway_tx,
            order_to_gateway_rx,
        }
    }
}

impl Default for FakeBroker {
    fn default() -> Self {
        Self::new()
    }
}
