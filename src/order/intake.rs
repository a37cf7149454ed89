//! Order intake (C7): classifies inbound `gateway→order` messages, enqueues
//! `FuturesOrder`s to the per-side FIFO, and synchronously validates logins.

use std::collections::VecDeque;

use crate::frame::{AccountLoginRes, FuturesOrder, Message, Side};
use crate::order::session::SessionTable;

/// What the owning loop should do after intake classifies one inbound
/// message.
#[derive(Debug)]
pub enum IntakeAction {
    /// Produce this response immediately onto `order→gateway`.
    Respond(Message),
    /// A `FuturesOrder` was pushed onto its side's queue; no immediate
    /// response is due.
    Enqueued,
    /// Not a kind intake classifies (a response kind arriving on the wrong
    /// topic); the caller should log and drop it.
    Unexpected,
}

/// Buy/sell FIFOs drained by the processor loop (C8).
#[derive(Debug, Default)]
pub struct Intake {
    /// Pending buy-side orders, oldest first.
    pub buy_queue: VecDeque<FuturesOrder>,
    /// Pending sell-side orders, oldest first.
    pub sell_queue: VecDeque<FuturesOrder>,
}

impl Intake {
    /// Create empty buy/sell queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify and act on one message consumed from `gateway→order`.
    pub fn on_message(&mut self, sessions: &mut SessionTable, msg: Message) -> IntakeAction {
        match msg {
            Message::AccountLoginReq(req) => {
                let outcome = sessions.validate(req.account, &req.session_key);
                IntakeAction::Respond(Message::AccountLoginRes(AccountLoginRes {
                    account: req.account,
                    result: outcome.result_code(),
                    client_id: req.client_id,
                }))
            }
            Message::FuturesOrder(order) => {
                match order.side {
                    Side::Buy => self.buy_queue.push_back(order),
                    Side::Sell => self.sell_queue.push_back(order),
                }
                IntakeAction::Enqueued
            }
            Message::AccountLoginRes(_) | Message::OrderResponse(_) => IntakeAction::Unexpected,
        }
    }
}
