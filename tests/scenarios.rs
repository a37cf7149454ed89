#![expect(clippy::unwrap_used, reason = "test assertions")]
#![expect(clippy::expect_used, reason = "test assertions")]
#![expect(clippy::indexing_slicing, reason = "test slices within known bounds")]

//! End-to-end scenario tests. Each one literally reproduces one of the
//! named scenarios: a client's bytes hit the gateway's framer and router, a
//! [`FakeBroker`] channel pair stands in for the two Kafka topics, and the
//! order side's session table, intake queues, and processor drain them.
//! [`tradegate::broker::BrokerClient`] itself (the `rdkafka` wrapper) is not
//! exercised here — see the module doc on `test_util::FakeBroker` for why.

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use test_util::{futures_order, login_req, FakeBroker};
use tradegate::connection_table::ConnectionTable;
use tradegate::frame::{self, Message, OrderStatus, Side};
use tradegate::gateway::router::{self, ClientAction, InboundAction};
use tradegate::order::intake::{Intake, IntakeAction};
use tradegate::order::processor;
use tradegate::order::session::SessionTable;
use tradegate::ring_buffer::RingFramer;

fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Scenario A: happy login.
#[test]
fn happy_login_writes_a_login_response_frame_to_the_originating_slot() {
    let mut table = ConnectionTable::with_capacity(4);
    let slot = table.add(1, localhost(), Instant::now()).expect("capacity");
    let mut sessions = SessionTable::new(true);
    let mut intake = Intake::new();
    let broker = FakeBroker::new();
    let FakeBroker {
        gateway_to_order_tx,
        mut gateway_to_order_rx,
        order_to_gateway_tx,
        mut order_to_gateway_rx,
    } = broker;

    let client_id = u32::try_from(slot.index).expect("index fits in u32");
    let req = login_req(10_000, "k", 0);
    match router::on_client_frame(&mut table, slot.index, req) {
        ClientAction::Produce { message } => {
            let stamped = message.with_client_id(client_id).expect("every kind carries client_id");
            gateway_to_order_tx.try_send(stamped).expect("channel has room");
        }
        ClientAction::Drop => panic!("login request should be produced"),
    }

    let received = gateway_to_order_rx.try_recv().expect("order side receives the login");
    match intake.on_message(&mut sessions, received) {
        IntakeAction::Respond(response) => {
            order_to_gateway_tx.try_send(response).expect("channel has room");
        }
        other => panic!("unexpected intake action: {other:?}"),
    }

    let response = order_to_gateway_rx.try_recv().expect("gateway side receives the response");
    match router::on_broker_inbound(&table, response) {
        InboundAction::Write { slot_index, bytes } => {
            assert_eq!(slot_index, slot.index);
            let total_len = u32::from_be_bytes(bytes[0..4].try_into().expect("4 bytes"));
            assert_eq!(total_len as usize, bytes.len());
            let as_text = String::from_utf8_lossy(&bytes);
            assert!(as_text.contains("cspkg.AccountLoginRes\0"));
            let decoded = frame::decode(&bytes).expect("decode should succeed");
            assert!(matches!(decoded, Message::AccountLoginRes(res) if res.account == 10_000 && res.result == 0));
        }
        InboundAction::Drop { reason } => panic!("expected a write action, got drop: {reason}"),
    }
}

/// Scenario B: order after login.
#[test]
fn order_after_login_is_accepted_and_addressed_back_to_the_slot() {
    let mut table = ConnectionTable::with_capacity(4);
    let slot = table.add(1, localhost(), Instant::now()).expect("capacity");
    table.bind_account(slot.index, 10_000);
    let mut sessions = SessionTable::new(false);
    sessions.seed(10_000, "k");
    let mut intake = Intake::new();
    let client_id = u32::try_from(slot.index).expect("index fits in u32");

    let order = futures_order("ord1", Side::Buy, 0);
    let produced = match router::on_client_frame(&mut table, slot.index, order) {
        ClientAction::Produce { message } => {
            message.with_client_id(client_id).expect("carries client_id")
        }
        ClientAction::Drop => panic!("order should be produced"),
    };
    assert!(matches!(
        intake.on_message(&mut sessions, produced),
        IntakeAction::Enqueued
    ));

    let outcomes = processor::drain(&mut intake);
    assert_eq!(outcomes.len(), 1);
    match &outcomes[0].to_gateway {
        Message::OrderResponse(res) => {
            assert_eq!(res.order_id, "ord1");
            assert_eq!(res.status, OrderStatus::Accepted);
            assert_eq!(res.client_id, client_id);
        }
        other => panic!("unexpected message: {other:?}"),
    }

    match router::on_broker_inbound(&table, outcomes.into_iter().next().expect("one outcome").to_gateway) {
        InboundAction::Write { slot_index, .. } => assert_eq!(slot_index, slot.index),
        InboundAction::Drop { reason } => panic!("expected a write action, got drop: {reason}"),
    }
}

/// Scenario C: framing across TCP segments.
#[test]
fn a_frame_split_across_two_reads_is_emitted_exactly_once() {
    let order = futures_order("ord1", Side::Buy, 0);
    let encoded = frame::encode(&order).expect("encode should succeed");
    for split in 1..encoded.len() {
        let mut framer = RingFramer::new();
        let first = &encoded[..split];
        let second = &encoded[split..];

        framer.free_region()[..first.len()].copy_from_slice(first);
        framer.commit(first.len());
        assert!(framer.take_frame().expect("no framing error").is_none());

        framer.free_region()[..second.len()].copy_from_slice(second);
        framer.commit(second.len());
        let frame_bytes = framer
            .take_frame()
            .expect("no framing error")
            .expect("a complete frame is now available");
        let decoded = frame::decode(&frame_bytes).expect("decode should succeed");
        assert_eq!(decoded, order);
        assert!(framer.take_frame().expect("no framing error").is_none());
    }
}

/// Scenario D: a malformed frame closes only its own connection.
#[test]
fn a_malformed_frame_closes_only_the_offending_connection() {
    let mut table = ConnectionTable::with_capacity(4);
    let bad = table.add(1, localhost(), Instant::now()).expect("capacity");
    let good = table.add(2, localhost(), Instant::now()).expect("capacity");

    let malformed = [0x00, 0x00, 0x00, 0x03, 0xFF, 0x00, 0x00, 0x00];
    assert!(frame::decode(&malformed).is_err());
    table.remove(1);

    assert!(table.lookup_by_index(bad.index).is_none());
    assert!(table.lookup_by_index(good.index).is_some());
    assert_eq!(table.live_count(), 1);
}

/// Scenario E: an idle connection is closed at the next sweep.
#[test]
fn an_idle_connection_is_reported_at_the_next_sweep_and_closing_it_frees_the_slot() {
    let mut table = ConnectionTable::with_capacity(4);
    let start = Instant::now();
    let slot = table.add(1, localhost(), start).expect("capacity");

    let still_alive = start + Duration::from_secs(299);
    assert!(table.idle_since(still_alive, Duration::from_secs(300)).is_empty());

    let after_timeout = start + Duration::from_secs(301);
    let idle = table.idle_since(after_timeout, Duration::from_secs(300));
    assert_eq!(idle, vec![1]);

    table.remove(1);
    assert_eq!(table.live_count(), 0);
    assert!(table.lookup_by_index(slot.index).is_none());
}

/// Scenario F: a reconnect supersedes the account's prior binding.
#[test]
fn a_reconnect_under_the_same_account_supersedes_the_prior_slot() {
    let mut table = ConnectionTable::with_capacity(4);
    let first = table.add(1, localhost(), Instant::now()).expect("capacity");
    let second = table.add(2, localhost(), Instant::now()).expect("capacity");

    table.bind_account(first.index, 10_000);
    assert_eq!(table.lookup_by_account(10_000), Some(first.index));
    table.bind_account(second.index, 10_000);
    assert_eq!(table.lookup_by_account(10_000), Some(second.index));

    let response = test_util::login_res(10_000, 0, 0);
    match router::on_broker_inbound(&table, response) {
        InboundAction::Write { slot_index, .. } => assert_eq!(slot_index, second.index),
        InboundAction::Drop { reason } => panic!("expected a write action, got drop: {reason}"),
    }
}
