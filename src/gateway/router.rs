//! Gateway router (C6): binds client-index metadata onto produced messages
//! and fans inbound broker messages back to the connection that should
//! receive them.
//!
//! This module is deliberately free of I/O: it only inspects and mutates the
//! [`ConnectionTable`] and decides what the event loop should do next. The
//! event loop performs the actual broker produce and socket write, so this
//! logic is trivially unit-testable without a running broker or socket.

use tracing::warn;

use crate::connection_table::ConnectionTable;
use crate::frame::{self, Message};

/// What the event loop should do after routing an inbound client frame.
#[derive(Debug, PartialEq)]
pub enum ClientAction {
    /// Produce `message` onto the `gateway→order` topic.
    Produce {
        /// The message to produce, already reflecting any table mutation
        /// (e.g. an `AccountLoginReq` has already bound its account).
        message: Message,
    },
    /// The message kind is not one the gateway forwards; drop it.
    Drop,
}

/// Route one frame received from a client connection at `slot_index`.
///
/// `AccountLoginReq` binds `account → slot_index` in the table (a reconnect
/// supersedes any prior binding for the same account, per
/// [`ConnectionTable::bind_account`]) before being handed back for produce.
/// `FuturesOrder` is produced unchanged. Every other kind is logged and
/// dropped.
#[must_use]
pub fn on_client_frame(table: &mut ConnectionTable, slot_index: usize, msg: Message) -> ClientAction {
    match msg {
        Message::AccountLoginReq(ref req) => {
            table.bind_account(slot_index, req.account);
            ClientAction::Produce { message: msg }
        }
        Message::FuturesOrder(_) => ClientAction::Produce { message: msg },
        other => {
            warn!(type_name = other.type_name(), slot = slot_index, "dropping unexpected inbound client message kind");
            ClientAction::Drop
        }
    }
}

/// What the event loop should do after routing a message consumed from the
/// `order→gateway` topic.
#[derive(Debug, PartialEq, Eq)]
pub enum InboundAction {
    /// Write `bytes` (an already wire-encoded frame) to the connection at
    /// `slot_index`.
    Write {
        /// Target connection slot.
        slot_index: usize,
        /// Encoded wire frame ready to write.
        bytes: Vec<u8>,
    },
    /// Drop the message; `reason` is for logging only.
    Drop {
        /// Human-readable reason, surfaced to the caller for a counter bump
        /// or log line.
        reason: &'static str,
    },
}

/// Route one message consumed from `order→gateway`.
///
/// `AccountLoginRes` targets the slot currently bound to its `account`;
/// `OrderResponse` targets the slot named by its `client_id`. Either kind is
/// dropped if the target slot is missing or has since been closed/reused, so
/// a redelivered response under at-least-once semantics is naturally
/// idempotent: it either reaches the same client again or is silently
/// discarded, never misrouted.
#[must_use]
pub fn on_broker_inbound(table: &ConnectionTable, msg: Message) -> InboundAction {
    let slot_index = match &msg {
        Message::AccountLoginRes(res) => table.lookup_by_account(res.account),
        Message::OrderResponse(res) => usize::try_from(res.client_id).ok(),
        other => {
            warn!(type_name = other.type_name(), "dropping unexpected order->gateway message kind");
            return InboundAction::Drop { reason: "unexpected message kind" };
        }
    };
    let Some(slot_index) = slot_index else {
        return InboundAction::Drop { reason: "target slot missing" };
    };
    if table.lookup_by_index(slot_index).is_none() {
        return InboundAction::Drop { reason: "target slot closed" };
    }
    match frame::encode(&msg) {
        Ok(bytes) => InboundAction::Write { slot_index, bytes },
        Err(err) => {
            warn!(error = %err, "failed to encode outbound frame");
            InboundAction::Drop { reason: "encode failure" }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{AccountLoginReq, AccountLoginRes, FuturesOrder, OrderResponse, OrderStatus, OrderType, Side};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Instant;

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    fn sample_order(client_id: u32) -> Message {
        Message::FuturesOrder(FuturesOrder {
            order_id: "ord1".to_owned(),
            user_id: 10_000,
            symbol: "ESU6".to_owned(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            quantity: 1.0,
            price: 50_000.0,
            status: OrderStatus::New,
            timestamp: 0,
            client_id,
        })
    }

    #[test]
    fn login_request_binds_the_account_and_is_produced() {
        let mut table = ConnectionTable::with_capacity(4);
        let index = table.add(1, ip(), Instant::now()).expect("capacity").index;
        let msg = Message::AccountLoginReq(AccountLoginReq {
            account: 10_000,
            session_key: "k".to_owned(),
            client_id: 0,
        });
        let action = on_client_frame(&mut table, index, msg.clone());
        assert_eq!(action, ClientAction::Produce { message: msg });
        assert_eq!(table.lookup_by_account(10_000), Some(index));
    }

    #[test]
    fn futures_order_is_produced_without_table_mutation() {
        let mut table = ConnectionTable::with_capacity(4);
        let index = table.add(1, ip(), Instant::now()).expect("capacity").index;
        let msg = sample_order(0);
        let action = on_client_frame(&mut table, index, msg.clone());
        assert_eq!(action, ClientAction::Produce { message: msg });
    }

    #[test]
    fn response_kinds_are_dropped_from_the_client_side_router() {
        let mut table = ConnectionTable::with_capacity(4);
        let index = table.add(1, ip(), Instant::now()).expect("capacity").index;
        let msg = Message::OrderResponse(OrderResponse {
            order_id: "ord1".to_owned(),
            status: OrderStatus::Accepted,
            message: String::new(),
            client_id: 0,
        });
        assert_eq!(on_client_frame(&mut table, index, msg), ClientAction::Drop);
    }

    #[test]
    fn login_response_routes_to_the_slot_bound_to_its_account() {
        let mut table = ConnectionTable::with_capacity(4);
        let index = table.add(1, ip(), Instant::now()).expect("capacity").index;
        table.bind_account(index, 10_000);
        let msg = Message::AccountLoginRes(AccountLoginRes {
            account: 10_000,
            result: 0,
            client_id: 7,
        });
        let action = on_broker_inbound(&table, msg);
        match action {
            InboundAction::Write { slot_index, bytes } => {
                assert_eq!(slot_index, index);
                assert!(!bytes.is_empty());
            }
            InboundAction::Drop { .. } => panic!("expected a write action"),
        }
    }

    #[test]
    fn order_response_routes_to_the_slot_named_by_client_id() {
        let mut table = ConnectionTable::with_capacity(4);
        let index = table.add(1, ip(), Instant::now()).expect("capacity").index;
        let client_id = u32::try_from(index).expect("index fits in u32");
        let msg = Message::OrderResponse(OrderResponse {
            order_id: "ord1".to_owned(),
            status: OrderStatus::Accepted,
            message: String::new(),
            client_id,
        });
        let action = on_broker_inbound(&table, msg);
        assert!(matches!(action, InboundAction::Write { slot_index, .. } if slot_index == index));
    }

    #[test]
    fn response_to_a_closed_slot_is_dropped() {
        let table = ConnectionTable::with_capacity(4);
        let msg = Message::OrderResponse(OrderResponse {
            order_id: "ord1".to_owned(),
            status: OrderStatus::Accepted,
            message: String::new(),
            client_id: 0,
        });
        assert!(matches!(
            on_broker_inbound(&table, msg),
            InboundAction::Drop { reason: "target slot closed" }
        ));
    }
}
