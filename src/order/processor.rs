//! Order processor loop (C8): drains the buy and sell intake queues under a
//! single-writer discipline and emits responses addressed by client index.

use tracing::warn;

use crate::frame::{FuturesOrder, Message, OrderResponse, OrderStatus, OrderType};
use crate::order::intake::Intake;

/// What the owning loop should produce after processing one drained order.
#[derive(Debug)]
pub struct ProcessOutcome {
    /// The `OrderResponse` to produce onto `order→gateway`.
    pub to_gateway: Message,
    /// The accepted order to forward onto the matching-engine topic, absent
    /// when the order was rejected.
    pub to_matching_engine: Option<Message>,
}

fn validate_order(order: &FuturesOrder) -> Result<(), &'static str> {
    if order.order_id.is_empty() {
        return Err("order_id is empty");
    }
    if order.symbol.is_empty() {
        return Err("symbol is empty");
    }
    if !(order.quantity.is_finite() && order.quantity > 0.0) {
        return Err("quantity must be a positive finite number");
    }
    let needs_price = matches!(order.order_type, OrderType::Limit | OrderType::StopLimit);
    if needs_price && !(order.price.is_finite() && order.price > 0.0) {
        return Err("limit/stop-limit orders require a positive price");
    }
    Ok(())
}

/// Process one drained order: accept it and forward toward the matching
/// engine, or reject it with [`crate::error::BrokerError`]-adjacent
/// `RejectedOrder` semantics (§4.8). Either way an `OrderResponse` is
/// produced onto `order→gateway`, addressed by the order's `client_id`.
#[must_use]
pub fn process(order: FuturesOrder) -> ProcessOutcome {
    let client_id = order.client_id;
    match validate_order(&order) {
        Ok(()) => {
            let mut accepted = order;
            accepted.status = OrderStatus::Accepted;
            let response = Message::OrderResponse(OrderResponse {
                order_id: accepted.order_id.clone(),
                status: OrderStatus::Accepted,
                message: String::new(),
                client_id,
            });
            ProcessOutcome {
                to_gateway: response,
                to_matching_engine: Some(Message::FuturesOrder(accepted)),
            }
        }
        Err(detail) => {
            warn!(order_id = %order.order_id, detail, "rejecting malformed order");
            ProcessOutcome {
                to_gateway: Message::OrderResponse(OrderResponse {
                    order_id: order.order_id,
                    status: OrderStatus::Rejected,
                    message: detail.to_owned(),
                    client_id,
                }),
                to_matching_engine: None,
            }
        }
    }
}

/// Drain both FIFOs completely, buy before sell per §4.8, returning every
/// resulting outcome in drain order. Does not invoke [`run_match_pass`];
/// the caller runs that separately once both queues are empty.
#[must_use]
pub fn drain(intake: &mut Intake) -> Vec<ProcessOutcome> {
    let mut outcomes = Vec::with_capacity(intake.buy_queue.len() + intake.sell_queue.len());
    while let Some(order) = intake.buy_queue.pop_front() {
        outcomes.push(process(order));
    }
    while let Some(order) = intake.sell_queue.pop_front() {
        outcomes.push(process(order));
    }
    outcomes
}

/// Out-of-scope matching-engine hook (§1 Non-goals: "the matching algorithm
/// itself"). A real matcher can replace this without touching the drain
/// discipline above.
pub const fn run_match_pass() {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Side;

    fn valid_order() -> FuturesOrder {
        FuturesOrder {
            order_id: "ord1".to_owned(),
            user_id: 10_000,
            symbol: "ESU6".to_owned(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            quantity: 1.0,
            price: 50_000.0,
            status: OrderStatus::New,
            timestamp: 0,
            client_id: 3,
        }
    }

    #[test]
    fn a_valid_order_is_accepted_and_forwarded_to_matching() {
        let outcome = process(valid_order());
        match outcome.to_gateway {
            Message::OrderResponse(res) => {
                assert_eq!(res.status, OrderStatus::Accepted);
                assert_eq!(res.client_id, 3);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(matches!(outcome.to_matching_engine, Some(Message::FuturesOrder(_))));
    }

    #[test]
    fn a_zero_quantity_order_is_rejected_and_not_forwarded() {
        let mut order = valid_order();
        order.quantity = 0.0;
        let outcome = process(order);
        match outcome.to_gateway {
            Message::OrderResponse(res) => {
                assert_eq!(res.status, OrderStatus::Rejected);
                assert!(!res.message.is_empty());
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(outcome.to_matching_engine.is_none());
    }

    #[test]
    fn a_limit_order_with_no_price_is_rejected() {
        let mut order = valid_order();
        order.price = 0.0;
        let outcome = process(order);
        assert!(matches!(outcome.to_gateway, Message::OrderResponse(res) if res.status == OrderStatus::Rejected));
    }

    #[test]
    fn a_market_order_needs_no_price() {
        let mut order = valid_order();
        order.order_type = OrderType::Market;
        order.price = 0.0;
        let outcome = process(order);
        assert!(matches!(outcome.to_gateway, Message::OrderResponse(res) if res.status == OrderStatus::Accepted));
    }

    #[test]
    fn drain_processes_every_buy_order_before_any_sell_order() {
        let mut intake = Intake::new();
        let mut buy = valid_order();
        buy.order_id = "buy1".to_owned();
        let mut sell = valid_order();
        sell.order_id = "sell1".to_owned();
        sell.side = Side::Sell;
        intake.sell_queue.push_back(sell);
        intake.buy_queue.push_back(buy);
        let outcomes = drain(&mut intake);
        let order_ids: Vec<String> = outcomes
            .iter()
            .map(|o| match &o.to_gateway {
                Message::OrderResponse(res) => res.order_id.clone(),
                other => panic!("unexpected message: {other:?}"),
            })
            .collect();
        assert_eq!(order_ids, vec!["buy1".to_owned(), "sell1".to_owned()]);
        assert!(intake.buy_queue.is_empty());
        assert!(intake.sell_queue.is_empty());
    }
}
