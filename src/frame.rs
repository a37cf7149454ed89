//! Self-describing length-prefixed wire frames.
//!
//! A frame is `[total_len:u32][name_len:u32][type_name, zero-terminated][payload]`,
//! all integers big-endian. `total_len` counts the whole frame including
//! itself; `name_len` counts the name plus its trailing zero byte. This
//! module only encodes and decodes a single, already-assembled frame; the
//! ring-framer in [`crate::ring_buffer`] is responsible for carving frames
//! out of a live byte stream.

#![expect(clippy::big_endian_bytes, reason = "wire protocol is big-endian")]

use crate::error::FrameError;
use crate::payload::{self, PayloadWriter};

/// Largest frame accepted on the wire, including the length prefixes.
pub const MAX_FRAME_LEN: usize = 16 * 1024;

/// Smallest legal value of `name_len` (a one-character name plus NUL).
const MIN_NAME_LEN: u32 = 2;

/// Byte width of the two length prefixes.
const LEN_PREFIX_WIDTH: usize = 8;

const NAME_LOGIN_REQ: &str = "cspkg.AccountLoginReq";
const NAME_LOGIN_RES: &str = "cspkg.AccountLoginRes";
const NAME_FUTURES_ORDER: &str = "cspkg.FuturesOrder";
const NAME_ORDER_RESPONSE: &str = "cspkg.OrderResponse";

const TAG_ACCOUNT: u16 = 1;
const TAG_SESSION_KEY: u16 = 2;
const TAG_RESULT: u16 = 3;
const TAG_ORDER_ID: u16 = 4;
const TAG_USER_ID: u16 = 5;
const TAG_SYMBOL: u16 = 6;
const TAG_SIDE: u16 = 7;
const TAG_ORDER_TYPE: u16 = 8;
const TAG_QUANTITY: u16 = 9;
const TAG_PRICE: u16 = 10;
const TAG_STATUS: u16 = 11;
const TAG_TIMESTAMP: u16 = 12;
const TAG_CLIENT_ID: u16 = 13;
const TAG_MESSAGE: u16 = 14;

/// Buy or sell side of a futures order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl Side {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Buy => 1,
            Self::Sell => 2,
        }
    }

    fn from_u8(v: u8) -> Result<Self, FrameError> {
        match v {
            1 => Ok(Self::Buy),
            2 => Ok(Self::Sell),
            other => Err(FrameError::PayloadDecodeError(format!(
                "unknown order side {other}"
            ))),
        }
    }
}

/// Order execution style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    /// Execute at a limit price or better.
    Limit,
    /// Execute immediately at the best available price.
    Market,
    /// Becomes a market order once a stop price is reached.
    Stop,
    /// Becomes a limit order once a stop price is reached.
    StopLimit,
}

impl OrderType {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Limit => 1,
            Self::Market => 2,
            Self::Stop => 3,
            Self::StopLimit => 4,
        }
    }

    fn from_u8(v: u8) -> Result<Self, FrameError> {
        match v {
            1 => Ok(Self::Limit),
            2 => Ok(Self::Market),
            3 => Ok(Self::Stop),
            4 => Ok(Self::StopLimit),
            other => Err(FrameError::PayloadDecodeError(format!(
                "unknown order type {other}"
            ))),
        }
    }
}

/// Lifecycle status carried on an order or its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    /// Newly submitted, not yet processed.
    New,
    /// Accepted by the order processor.
    Accepted,
    /// Rejected by the order processor.
    Rejected,
}

impl OrderStatus {
    const fn to_i32(self) -> i32 {
        match self {
            Self::New => 0,
            Self::Accepted => 1,
            Self::Rejected => 2,
        }
    }

    fn from_i32(v: i32) -> Result<Self, FrameError> {
        match v {
            0 => Ok(Self::New),
            1 => Ok(Self::Accepted),
            2 => Ok(Self::Rejected),
            other => Err(FrameError::PayloadDecodeError(format!(
                "unknown order status {other}"
            ))),
        }
    }
}

/// A request to authenticate a session for an account.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountLoginReq {
    /// Account identifier.
    pub account: u32,
    /// Session token presented by the client.
    pub session_key: String,
    /// Originating connection slot index, stamped by the gateway at produce
    /// time. Not part of the reply correlation (the order side replies by
    /// account, see [`crate::gateway::router`]); carried purely as broker
    /// routing metadata, uniformly with the other three message kinds.
    pub client_id: u32,
}

/// The outcome of an [`AccountLoginReq`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountLoginRes {
    /// Account the result applies to.
    pub account: u32,
    /// `0` on success, non-zero otherwise.
    pub result: i32,
    /// Preserved from the originating request; the gateway still routes
    /// this reply to a slot by account, not by this field.
    pub client_id: u32,
}

/// A futures order submitted by a client.
#[derive(Debug, Clone, PartialEq)]
pub struct FuturesOrder {
    /// Client-supplied order identifier.
    pub order_id: String,
    /// Account or user the order belongs to.
    pub user_id: u32,
    /// Instrument symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: Side,
    /// Execution style.
    pub order_type: OrderType,
    /// Requested quantity.
    pub quantity: f64,
    /// Limit/stop price, meaningless for pure market orders.
    pub price: f64,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// Client-supplied timestamp (epoch milliseconds).
    pub timestamp: u32,
    /// Originating connection slot index, stamped by the gateway.
    pub client_id: u32,
}

/// The outcome of processing a [`FuturesOrder`].
#[derive(Debug, Clone, PartialEq)]
pub struct OrderResponse {
    /// Order the response applies to.
    pub order_id: String,
    /// Resulting status.
    pub status: OrderStatus,
    /// Human-readable detail, empty on acceptance.
    pub message: String,
    /// Originating connection slot index, preserved from the request.
    pub client_id: u32,
}

/// The closed set of message kinds carried by this system.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// See [`AccountLoginReq`].
    AccountLoginReq(AccountLoginReq),
    /// See [`AccountLoginRes`].
    AccountLoginRes(AccountLoginRes),
    /// See [`FuturesOrder`].
    FuturesOrder(FuturesOrder),
    /// See [`OrderResponse`].
    OrderResponse(OrderResponse),
}

impl Message {
    /// Fully qualified wire name for this message's kind.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::AccountLoginReq(_) => NAME_LOGIN_REQ,
            Self::AccountLoginRes(_) => NAME_LOGIN_RES,
            Self::FuturesOrder(_) => NAME_FUTURES_ORDER,
            Self::OrderResponse(_) => NAME_ORDER_RESPONSE,
        }
    }

    /// The `client_id` routing field, if this message kind carries one.
    #[must_use]
    pub const fn client_id(&self) -> Option<u32> {
        match self {
            Self::AccountLoginReq(m) => Some(m.client_id),
            Self::AccountLoginRes(m) => Some(m.client_id),
            Self::FuturesOrder(o) => Some(o.client_id),
            Self::OrderResponse(r) => Some(r.client_id),
        }
    }

    /// Return a clone of this message with its `client_id` field set to
    /// `client_id`. Every current message kind carries this field; `None`
    /// is reserved for a future kind added to the registry without one, in
    /// which case the caller must surface
    /// [`crate::error::BrokerError::MissingRoutingField`].
    ///
    /// This never mutates `self`: producers must clone-then-stamp so a
    /// message shared across callers is never changed out from under them.
    #[must_use]
    pub fn with_client_id(&self, client_id: u32) -> Option<Self> {
        match self {
            Self::AccountLoginReq(m) => {
                let mut m = m.clone();
                m.client_id = client_id;
                Some(Self::AccountLoginReq(m))
            }
            Self::AccountLoginRes(m) => {
                let mut m = m.clone();
                m.client_id = client_id;
                Some(Self::AccountLoginRes(m))
            }
            Self::FuturesOrder(o) => {
                let mut o = o.clone();
                o.client_id = client_id;
                Some(Self::FuturesOrder(o))
            }
            Self::OrderResponse(r) => {
                let mut r = r.clone();
                r.client_id = client_id;
                Some(Self::OrderResponse(r))
            }
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>, FrameError> {
        let mut w = PayloadWriter::new();
        match self {
            Self::AccountLoginReq(m) => {
                w.write_u32(TAG_ACCOUNT, m.account)?;
                w.write_str(TAG_SESSION_KEY, &m.session_key)?;
                w.write_u32(TAG_CLIENT_ID, m.client_id)?;
            }
            Self::AccountLoginRes(m) => {
                w.write_u32(TAG_ACCOUNT, m.account)?;
                w.write_i32(TAG_RESULT, m.result)?;
                w.write_u32(TAG_CLIENT_ID, m.client_id)?;
            }
            Self::FuturesOrder(m) => {
                w.write_str(TAG_ORDER_ID, &m.order_id)?;
                w.write_u32(TAG_USER_ID, m.user_id)?;
                w.write_str(TAG_SYMBOL, &m.symbol)?;
                w.write_u8(TAG_SIDE, m.side.to_u8())?;
                w.write_u8(TAG_ORDER_TYPE, m.order_type.to_u8())?;
                w.write_f64(TAG_QUANTITY, m.quantity)?;
                w.write_f64(TAG_PRICE, m.price)?;
                w.write_i32(TAG_STATUS, m.status.to_i32())?;
                w.write_u32(TAG_TIMESTAMP, m.timestamp)?;
                w.write_u32(TAG_CLIENT_ID, m.client_id)?;
            }
            Self::OrderResponse(m) => {
                w.write_str(TAG_ORDER_ID, &m.order_id)?;
                w.write_i32(TAG_STATUS, m.status.to_i32())?;
                w.write_str(TAG_MESSAGE, &m.message)?;
                w.write_u32(TAG_CLIENT_ID, m.client_id)?;
            }
        }
        Ok(w.finish())
    }

    fn decode_payload(type_name: &str, payload: &[u8]) -> Result<Self, FrameError> {
        let fields = payload::read_fields(payload)?;
        match type_name {
            NAME_LOGIN_REQ => Ok(Self::AccountLoginReq(AccountLoginReq {
                account: payload::require_u32(&fields, TAG_ACCOUNT, "account")?,
                session_key: payload::require_str(&fields, TAG_SESSION_KEY, "session_key")?,
                client_id: payload::optional_u32(&fields, TAG_CLIENT_ID, "client_id")?,
            })),
            NAME_LOGIN_RES => Ok(Self::AccountLoginRes(AccountLoginRes {
                account: payload::require_u32(&fields, TAG_ACCOUNT, "account")?,
                result: payload::require_i32(&fields, TAG_RESULT, "result")?,
                client_id: payload::optional_u32(&fields, TAG_CLIENT_ID, "client_id")?,
            })),
            NAME_FUTURES_ORDER => Ok(Self::FuturesOrder(FuturesOrder {
                order_id: payload::require_str(&fields, TAG_ORDER_ID, "order_id")?,
                user_id: payload::require_u32(&fields, TAG_USER_ID, "user_id")?,
                symbol: payload::require_str(&fields, TAG_SYMBOL, "symbol")?,
                side: Side::from_u8(payload::require_u8(&fields, TAG_SIDE, "side")?)?,
                order_type: OrderType::from_u8(payload::require_u8(
                    &fields,
                    TAG_ORDER_TYPE,
                    "order_type",
                )?)?,
                quantity: payload::require_f64(&fields, TAG_QUANTITY, "quantity")?,
                price: payload::require_f64(&fields, TAG_PRICE, "price")?,
                status: OrderStatus::from_i32(payload::require_i32(
                    &fields, TAG_STATUS, "status",
                )?)?,
                timestamp: payload::require_u32(&fields, TAG_TIMESTAMP, "timestamp")?,
                client_id: payload::optional_u32(&fields, TAG_CLIENT_ID, "client_id")?,
            })),
            NAME_ORDER_RESPONSE => Ok(Self::OrderResponse(OrderResponse {
                order_id: payload::require_str(&fields, TAG_ORDER_ID, "order_id")?,
                status: OrderStatus::from_i32(payload::require_i32(
                    &fields, TAG_STATUS, "status",
                )?)?,
                message: payload::require_str(&fields, TAG_MESSAGE, "message")?,
                client_id: payload::optional_u32(&fields, TAG_CLIENT_ID, "client_id")?,
            })),
            other => Err(FrameError::UnknownType(other.to_owned())),
        }
    }
}

/// Encode `msg` as a complete wire frame.
///
/// # Errors
/// Returns [`FrameError::PayloadDecodeError`] (reused here for encode-side
/// failures, e.g. a string field too long to express its own length) if the
/// message cannot be serialized.
pub fn encode(msg: &Message) -> Result<Vec<u8>, FrameError> {
    let name = msg.type_name();
    let payload = msg.encode_payload()?;
    let name_len =
        u32::try_from(name.len().checked_add(1).ok_or_else(|| {
            FrameError::PayloadDecodeError("type name too long".to_owned())
        })?)
        .map_err(|_| FrameError::PayloadDecodeError("type name too long".to_owned()))?;
    let mut buf = Vec::with_capacity(LEN_PREFIX_WIDTH + name.len() + 1 + payload.len());
    buf.extend_from_slice(&0u32.to_be_bytes());
    buf.extend_from_slice(&name_len.to_be_bytes());
    buf.extend_from_slice(name.as_bytes());
    buf.push(0);
    buf.extend_from_slice(&payload);
    let total_len = u32::try_from(buf.len())
        .map_err(|_| FrameError::PayloadDecodeError("frame too large".to_owned()))?;
    if let Some(prefix) = buf.get_mut(0..4) {
        prefix.copy_from_slice(&total_len.to_be_bytes());
    }
    Ok(buf)
}

/// Encode `msg` in the broker's record format: `type_name || 0x00 ||
/// payload`, with no length prefixes. This is distinct from [`encode`] (the
/// TCP wire frame) and is what [`crate::broker::BrokerClient::produce`]
/// writes onto a Kafka topic.
///
/// # Errors
/// Returns [`FrameError::PayloadDecodeError`] under the same conditions as
/// [`encode`].
pub fn encode_record(msg: &Message) -> Result<Vec<u8>, FrameError> {
    let name = msg.type_name();
    let payload = msg.encode_payload()?;
    let mut buf = Vec::with_capacity(name.len() + 1 + payload.len());
    buf.extend_from_slice(name.as_bytes());
    buf.push(0);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a broker record (`type_name || 0x00 || payload`, see
/// [`encode_record`]) into a [`Message`]. The consumer splits at the first
/// zero byte, per §9's note that this is the one correct broker framing (the
/// alternative raw-serialization framing found elsewhere in the original
/// source must not be implemented).
///
/// # Errors
/// Returns [`FrameError::MalformedFrame`] if there is no zero byte or the
/// name is not valid UTF-8, [`FrameError::UnknownType`] if the name is not
/// one of the four registered kinds, and [`FrameError::PayloadDecodeError`]
/// if the payload does not decode as an instance of the named type.
pub fn decode_record(buf: &[u8]) -> Result<Message, FrameError> {
    let sep = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(FrameError::MalformedFrame("record missing NUL separator"))?;
    let name_bytes = buf
        .get(..sep)
        .ok_or(FrameError::MalformedFrame("record name range out of bounds"))?;
    let type_name = std::str::from_utf8(name_bytes)
        .map_err(|_| FrameError::MalformedFrame("record type name is not valid utf-8"))?;
    let payload_start = sep
        .checked_add(1)
        .ok_or(FrameError::MalformedFrame("record separator overflow"))?;
    let payload = buf
        .get(payload_start..)
        .ok_or(FrameError::MalformedFrame("record payload range out of bounds"))?;
    Message::decode_payload(type_name, payload)
}

/// Decode a single, complete frame (as extracted by the ring-framer) into a
/// [`Message`].
///
/// # Errors
/// Returns [`FrameError::MalformedFrame`] if the length prefixes are
/// inconsistent with the buffer, [`FrameError::UnknownType`] if the name is
/// not one of the four registered kinds, and
/// [`FrameError::PayloadDecodeError`] if the payload does not decode as an
/// instance of the named type.
pub fn decode(buf: &[u8]) -> Result<Message, FrameError> {
    if buf.len() < LEN_PREFIX_WIDTH {
        return Err(FrameError::MalformedFrame("frame shorter than length prefixes"));
    }
    let Some(total_bytes) = buf.get(0..4) else {
        return Err(FrameError::MalformedFrame("frame shorter than length prefixes"));
    };
    let Some(name_len_bytes) = buf.get(4..8) else {
        return Err(FrameError::MalformedFrame("frame shorter than length prefixes"));
    };
    let total_arr: [u8; 4] = total_bytes
        .try_into()
        .map_err(|_| FrameError::MalformedFrame("frame shorter than length prefixes"))?;
    let name_len_arr: [u8; 4] = name_len_bytes
        .try_into()
        .map_err(|_| FrameError::MalformedFrame("frame shorter than length prefixes"))?;
    let total_len = u32::from_be_bytes(total_arr);
    let name_len = u32::from_be_bytes(name_len_arr);
    if name_len < MIN_NAME_LEN {
        return Err(FrameError::MalformedFrame("name_len below minimum"));
    }
    let name_len_usize = usize::try_from(name_len)
        .map_err(|_| FrameError::MalformedFrame("name_len does not fit in usize"))?;
    if buf.len() < LEN_PREFIX_WIDTH || name_len_usize > buf.len() - LEN_PREFIX_WIDTH {
        return Err(FrameError::MalformedFrame("name_len exceeds remaining bytes"));
    }
    let total_len_usize = usize::try_from(total_len)
        .map_err(|_| FrameError::MalformedFrame("total_len does not fit in usize"))?;
    if total_len_usize != buf.len() {
        return Err(FrameError::MalformedFrame("total_len does not match frame size"));
    }
    let name_start = LEN_PREFIX_WIDTH;
    let name_end = name_start
        .checked_add(name_len_usize)
        .ok_or(FrameError::MalformedFrame("name range overflow"))?;
    let name_bytes = buf
        .get(name_start..name_end)
        .ok_or(FrameError::MalformedFrame("name range out of bounds"))?;
    let Some((&0, name_bytes)) = name_bytes.split_last() else {
        return Err(FrameError::MalformedFrame("type name missing NUL terminator"));
    };
    let type_name = std::str::from_utf8(name_bytes)
        .map_err(|_| FrameError::MalformedFrame("type name is not valid utf-8"))?;
    let payload = buf
        .get(name_end..)
        .ok_or(FrameError::MalformedFrame("payload range out of bounds"))?;
    Message::decode_payload(type_name, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order() -> Message {
        Message::FuturesOrder(FuturesOrder {
            order_id: "ord1".to_owned(),
            user_id: 10000,
            symbol: "ESU6".to_owned(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            quantity: 1.0,
            price: 50000.0,
            status: OrderStatus::New,
            timestamp: 1_700_000_000,
            client_id: 0,
        })
    }

    #[test]
    fn round_trips_every_message_kind() {
        let login_req = Message::AccountLoginReq(AccountLoginReq {
            account: 10000,
            session_key: "k".to_owned(),
            client_id: 0,
        });
        let login_res = Message::AccountLoginRes(AccountLoginRes {
            account: 10000,
            result: 0,
            client_id: 3,
        });
        let order_response = Message::OrderResponse(OrderResponse {
            order_id: "ord1".to_owned(),
            status: OrderStatus::Accepted,
            message: String::new(),
            client_id: 7,
        });
        for msg in [login_req, login_res, sample_order(), order_response] {
            let encoded = encode(&msg).expect("encode should succeed");
            let decoded = decode(&encoded).expect("decode should succeed");
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn login_res_frame_begins_with_total_len_and_contains_name() {
        let msg = Message::AccountLoginRes(AccountLoginRes {
            account: 10000,
            result: 0,
            client_id: 3,
        });
        let encoded = encode(&msg).expect("encode should succeed");
        let prefix: [u8; 4] = encoded
            .get(0..4)
            .and_then(|s| s.try_into().ok())
            .expect("frame has a length prefix");
        let total_len = u32::from_be_bytes(prefix);
        assert_eq!(total_len as usize, encoded.len());
        let as_text = String::from_utf8_lossy(&encoded);
        assert!(as_text.contains("cspkg.AccountLoginRes\0"));
    }

    #[test]
    fn truncated_frame_never_decodes() {
        let encoded = encode(&sample_order()).expect("encode should succeed");
        for end in 0..encoded.len() {
            let Some(prefix) = encoded.get(0..end) else {
                continue;
            };
            assert!(decode(prefix).is_err());
        }
    }

    #[test]
    fn unknown_type_name_is_rejected() {
        let mut w = PayloadWriter::new();
        w.write_u32(TAG_ACCOUNT, 1).expect("write should succeed");
        let payload = w.finish();
        let name = "cspkg.Bogus";
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_be_bytes());
        #[expect(
            clippy::cast_possible_truncation,
            reason = "test name is short and fits in u32"
        )]
        let name_len = (name.len() + 1) as u32;
        buf.extend_from_slice(&name_len.to_be_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&payload);
        #[expect(
            clippy::cast_possible_truncation,
            reason = "test buffer is short and fits in u32"
        )]
        let total_len = buf.len() as u32;
        if let Some(prefix) = buf.get_mut(0..4) {
            prefix.copy_from_slice(&total_len.to_be_bytes());
        }
        assert!(matches!(decode(&buf), Err(FrameError::UnknownType(_))));
    }

    #[test]
    fn malformed_total_len_is_rejected() {
        let buf = [0x00, 0x00, 0x00, 0x03, 0xFF, 0x00, 0x00, 0x00];
        assert!(matches!(decode(&buf), Err(FrameError::MalformedFrame(_))));
    }

    #[test]
    fn record_round_trips_and_contains_no_length_prefix() {
        let msg = sample_order();
        let record = encode_record(&msg).expect("encode should succeed");
        assert!(!record.starts_with(&[0, 0, 0]));
        assert!(record.starts_with(b"cspkg.FuturesOrder\0"));
        let decoded = decode_record(&record).expect("decode should succeed");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn record_without_separator_is_malformed() {
        let buf = b"cspkg.FuturesOrder".to_vec();
        assert!(matches!(decode_record(&buf), Err(FrameError::MalformedFrame(_))));
    }
}
