//! Typed frames and their JSON encoding.
//!
//! One frame per WebSocket message. Numeric payload fields arrive as either
//! JSON numbers or decimal strings depending on the server path that produced
//! them, so they are coerced leniently; a missing field decodes as zero
//! rather than failing the whole frame.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Named category of subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Market,
    Orderbook,
    Trades,
    Midpoint,
    User,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Market => "market",
            Channel::Orderbook => "orderbook",
            Channel::Trades => "trades",
            Channel::Midpoint => "midpoint",
            Channel::User => "user",
        }
    }

    /// The wire key carrying this channel's subject.
    fn subject_key(&self) -> &'static str {
        match self {
            Channel::User => "address",
            _ => "market_id",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A (channel, subject) pair. Unique by both fields; ordering is derived so
/// the registry iterates deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subscription {
    pub channel: Channel,
    pub subject: String,
}

impl Subscription {
    pub fn new(channel: Channel, subject: impl Into<String>) -> Self {
        Self {
            channel,
            subject: subject.into(),
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.subject)
    }
}

/// Outgoing command, serialized one JSON object per WebSocket text message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Subscribe {
        subscription: Subscription,
        message_id: Option<u64>,
    },
    Unsubscribe {
        subscription: Subscription,
        message_id: Option<u64>,
    },
    Ping {
        timestamp: i64,
    },
}

impl ClientCommand {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let value = match self {
            ClientCommand::Subscribe {
                subscription,
                message_id,
            } => command_value("subscribe", subscription, *message_id),
            ClientCommand::Unsubscribe {
                subscription,
                message_id,
            } => command_value("unsubscribe", subscription, *message_id),
            ClientCommand::Ping { timestamp } => json!({
                "type": "ping",
                "timestamp": timestamp,
            }),
        };
        serde_json::to_string(&value)
    }

    pub fn subscription(&self) -> Option<&Subscription> {
        match self {
            ClientCommand::Subscribe { subscription, .. }
            | ClientCommand::Unsubscribe { subscription, .. } => Some(subscription),
            ClientCommand::Ping { .. } => None,
        }
    }

    pub fn message_id(&self) -> Option<u64> {
        match self {
            ClientCommand::Subscribe { message_id, .. }
            | ClientCommand::Unsubscribe { message_id, .. } => *message_id,
            ClientCommand::Ping { .. } => None,
        }
    }

    pub fn is_subscribe(&self) -> bool {
        matches!(self, ClientCommand::Subscribe { .. })
    }
}

fn command_value(kind: &str, subscription: &Subscription, message_id: Option<u64>) -> Value {
    let mut value = json!({
        "type": kind,
        "channel": subscription.channel.as_str(),
    });
    value[subscription.channel.subject_key()] = json!(subscription.subject);
    if let Some(id) = message_id {
        value["messageId"] = json!(id);
    }
    value
}

/// Incoming frame, discriminated by its `type` tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "market_data")]
    MarketData(MarketDataFrame),
    #[serde(rename = "orderbook")]
    OrderBook(OrderBookFrame),
    #[serde(rename = "trade")]
    Trade(TradeFrame),
    #[serde(rename = "midpoint")]
    Midpoint(MidpointFrame),
    #[serde(rename = "subscription_success")]
    SubscriptionSuccess(AckFrame),
    #[serde(rename = "subscription_error")]
    SubscriptionError(AckFrame),
    #[serde(rename = "pong")]
    Pong(PongFrame),
    #[serde(rename = "error")]
    ServerError(ErrorFrame),
}

/// Parses one incoming text message into a typed frame.
pub fn decode(text: &str) -> Result<ServerFrame, DecodeError> {
    Ok(serde_json::from_str::<ServerFrame>(text)?)
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketDataFrame {
    pub market_id: String,
    #[serde(default)]
    pub data: MarketPayload,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketPayload {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub price: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub best_bid: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub best_ask: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub volume: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookFrame {
    pub market_id: String,
    #[serde(default)]
    pub bids: Vec<RawLevel>,
    #[serde(default)]
    pub asks: Vec<RawLevel>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLevel {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub price: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub size: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeFrame {
    pub market_id: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub price: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub size: f64,
    #[serde(default)]
    pub side: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MidpointFrame {
    pub market_id: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub midpoint: f64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub timestamp: i64,
}

/// Subscription ack, shared by the success and error variants. The server
/// echoes `messageId` for correlated requests; channel and subject identify
/// the subscription otherwise.
#[derive(Debug, Clone, Deserialize)]
pub struct AckFrame {
    #[serde(default)]
    pub channel: Option<Channel>,
    #[serde(default)]
    pub market_id: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, rename = "messageId")]
    pub message_id: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AckFrame {
    pub fn subject(&self) -> Option<&str> {
        self.market_id.as_deref().or(self.address.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PongFrame {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorFrame {
    #[serde(default)]
    pub error: String,
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_f64(&value))
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_i64(&value))
}

fn coerce_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn coerce_i64(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse::<i64>().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_subscribe_market() {
        let cmd = ClientCommand::Subscribe {
            subscription: Subscription::new(Channel::Market, "mkt-1"),
            message_id: None,
        };
        let value: Value = serde_json::from_str(&cmd.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["channel"], "market");
        assert_eq!(value["market_id"], "mkt-1");
        assert!(value.get("messageId").is_none());
    }

    #[test]
    fn test_encode_subscribe_user_uses_address_key() {
        let cmd = ClientCommand::Subscribe {
            subscription: Subscription::new(Channel::User, "0xabc"),
            message_id: Some(7),
        };
        let value: Value = serde_json::from_str(&cmd.encode().unwrap()).unwrap();
        assert_eq!(value["channel"], "user");
        assert_eq!(value["address"], "0xabc");
        assert!(value.get("market_id").is_none());
        assert_eq!(value["messageId"], 7);
    }

    #[test]
    fn test_encode_unsubscribe() {
        let cmd = ClientCommand::Unsubscribe {
            subscription: Subscription::new(Channel::Trades, "mkt-2"),
            message_id: None,
        };
        let value: Value = serde_json::from_str(&cmd.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "unsubscribe");
        assert_eq!(value["channel"], "trades");
        assert_eq!(value["market_id"], "mkt-2");
    }

    #[test]
    fn test_encode_ping() {
        let cmd = ClientCommand::Ping { timestamp: 1234 };
        let value: Value = serde_json::from_str(&cmd.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "ping");
        assert_eq!(value["timestamp"], 1234);
    }

    #[test]
    fn test_decode_market_data_with_string_numbers() {
        let text = r#"{"type":"market_data","market_id":"X",
            "data":{"price":"0.42","volume":"1000.5"},"timestamp":1000}"#;
        let frame = decode(text).unwrap();
        match frame {
            ServerFrame::MarketData(f) => {
                assert_eq!(f.market_id, "X");
                assert_eq!(f.data.price, 0.42);
                assert_eq!(f.data.volume, 1000.5);
                // missing fields default to zero
                assert_eq!(f.data.best_bid, 0.0);
                assert_eq!(f.timestamp, 1000);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_decode_market_data_without_payload() {
        let frame = decode(r#"{"type":"market_data","market_id":"X"}"#).unwrap();
        match frame {
            ServerFrame::MarketData(f) => {
                assert_eq!(f.data.price, 0.0);
                assert_eq!(f.timestamp, 0);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_decode_orderbook_levels() {
        let text = r#"{"type":"orderbook","market_id":"X",
            "bids":[{"price":"0.40","size":"10"},{"price":0.39,"size":5}],
            "asks":[{"price":"0.44","size":"2"}],"timestamp":"2000"}"#;
        let frame = decode(text).unwrap();
        match frame {
            ServerFrame::OrderBook(f) => {
                assert_eq!(f.bids.len(), 2);
                assert_eq!(f.bids[0].price, 0.40);
                assert_eq!(f.bids[1].size, 5.0);
                assert_eq!(f.asks[0].price, 0.44);
                assert_eq!(f.timestamp, 2000);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_decode_subscription_error() {
        let text = r#"{"type":"subscription_error","channel":"orderbook",
            "market_id":"X","messageId":3,"error":"unknown market"}"#;
        let frame = decode(text).unwrap();
        match frame {
            ServerFrame::SubscriptionError(ack) => {
                assert_eq!(ack.channel, Some(Channel::Orderbook));
                assert_eq!(ack.subject(), Some("X"));
                assert_eq!(ack.message_id, Some(3));
                assert_eq!(ack.error.as_deref(), Some("unknown market"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_decode_pong() {
        let frame = decode(r#"{"type":"pong","timestamp":99}"#).unwrap();
        assert!(matches!(frame, ServerFrame::Pong(p) if p.timestamp == 99));
    }

    #[test]
    fn test_decode_unknown_type_fails() {
        assert!(decode(r#"{"type":"mystery"}"#).is_err());
        assert!(decode("not json at all").is_err());
    }

    #[test]
    fn test_coerce_garbage_to_zero() {
        assert_eq!(coerce_f64(&json!("not a number")), 0.0);
        assert_eq!(coerce_f64(&json!(null)), 0.0);
        assert_eq!(coerce_i64(&json!([1, 2])), 0);
        assert_eq!(coerce_i64(&json!(12.9)), 12);
    }

    #[test]
    fn test_subscription_ordering_is_stable() {
        let mut subs = vec![
            Subscription::new(Channel::Trades, "B"),
            Subscription::new(Channel::Market, "B"),
            Subscription::new(Channel::Market, "A"),
        ];
        subs.sort();
        assert_eq!(subs[0], Subscription::new(Channel::Market, "A"));
        assert_eq!(subs[1], Subscription::new(Channel::Market, "B"));
        assert_eq!(subs[2], Subscription::new(Channel::Trades, "B"));
    }
}
