//! Normalized stream events and their value objects.
//!
//! Every event carries a `received_at` timestamp so a consumer can replay
//! or order them deterministically. Numeric fields are already coerced to
//! `f64` by the codec (strings parsed, missing values defaulted to 0).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::{MarketDataFrame, MidpointFrame, OrderBookFrame, RawLevel, TradeFrame};

/// Primary event enum - the dashboard layer consumes ONLY this type.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Link established, queue flushed and subscriptions replayed.
    Connected { received_at: DateTime<Utc> },

    /// Link lost or closed; `code` is the WebSocket close code
    /// (1000 for a caller-initiated disconnect).
    Disconnected {
        code: u16,
        reason: String,
        received_at: DateTime<Utc>,
    },

    MarketUpdate(MarketUpdate),
    OrderBookUpdate(OrderBookUpdate),
    Trade(TradeUpdate),
    MidpointUpdate(MidpointUpdate),

    /// Server-reported or local non-fatal error.
    Error {
        message: String,
        received_at: DateTime<Utc>,
    },

    /// A queued command could not be transmitted after reconnect.
    SendFailed {
        detail: String,
        received_at: DateTime<Utc>,
    },

    /// Terminal: reconnect attempts exhausted. The client stays down until
    /// `connect()` is called again.
    ReconnectFailed {
        attempts: u32,
        received_at: DateTime<Utc>,
    },
}

impl StreamEvent {
    pub fn connected() -> Self {
        StreamEvent::Connected {
            received_at: Utc::now(),
        }
    }

    pub fn disconnected(code: u16, reason: impl Into<String>) -> Self {
        StreamEvent::Disconnected {
            code,
            reason: reason.into(),
            received_at: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
            received_at: Utc::now(),
        }
    }

    pub fn send_failed(detail: impl Into<String>) -> Self {
        StreamEvent::SendFailed {
            detail: detail.into(),
            received_at: Utc::now(),
        }
    }

    pub fn reconnect_failed(attempts: u32) -> Self {
        StreamEvent::ReconnectFailed {
            attempts,
            received_at: Utc::now(),
        }
    }

    /// Short name for logging and filtering.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Connected { .. } => "connected",
            StreamEvent::Disconnected { .. } => "disconnected",
            StreamEvent::MarketUpdate(_) => "market_update",
            StreamEvent::OrderBookUpdate(_) => "orderbook_update",
            StreamEvent::Trade(_) => "trade",
            StreamEvent::MidpointUpdate(_) => "midpoint_update",
            StreamEvent::Error { .. } => "error",
            StreamEvent::SendFailed { .. } => "send_failed",
            StreamEvent::ReconnectFailed { .. } => "reconnect_failed",
        }
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        match self {
            StreamEvent::Connected { received_at }
            | StreamEvent::Disconnected { received_at, .. }
            | StreamEvent::Error { received_at, .. }
            | StreamEvent::SendFailed { received_at, .. }
            | StreamEvent::ReconnectFailed { received_at, .. } => *received_at,
            StreamEvent::MarketUpdate(u) => u.received_at,
            StreamEvent::OrderBookUpdate(u) => u.received_at,
            StreamEvent::Trade(u) => u.received_at,
            StreamEvent::MidpointUpdate(u) => u.received_at,
        }
    }
}

/// Market-level update (price, top of book, volume).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketUpdate {
    pub market_id: String,
    pub price: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub volume: f64,
    /// Server timestamp, epoch milliseconds.
    pub timestamp: i64,
    pub received_at: DateTime<Utc>,
}

impl From<MarketDataFrame> for MarketUpdate {
    fn from(frame: MarketDataFrame) -> Self {
        Self {
            market_id: frame.market_id,
            price: frame.data.price,
            best_bid: frame.data.best_bid,
            best_ask: frame.data.best_ask,
            volume: frame.data.volume,
            timestamp: frame.timestamp,
            received_at: Utc::now(),
        }
    }
}

/// A single price level in the order book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

impl From<RawLevel> for PriceLevel {
    fn from(level: RawLevel) -> Self {
        Self {
            price: level.price,
            size: level.size,
        }
    }
}

/// Order book update with full bid/ask ladders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookUpdate {
    pub market_id: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: i64,
    pub received_at: DateTime<Utc>,
}

impl OrderBookUpdate {
    /// Highest-priced bid, if any.
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids
            .iter()
            .max_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal))
    }

    /// Lowest-priced ask, if any.
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks
            .iter()
            .min_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal))
    }
}

impl From<OrderBookFrame> for OrderBookUpdate {
    fn from(frame: OrderBookFrame) -> Self {
        Self {
            market_id: frame.market_id,
            bids: frame.bids.into_iter().map(PriceLevel::from).collect(),
            asks: frame.asks.into_iter().map(PriceLevel::from).collect(),
            timestamp: frame.timestamp,
            received_at: Utc::now(),
        }
    }
}

/// Executed trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeUpdate {
    pub market_id: String,
    pub price: f64,
    pub size: f64,
    pub side: String,
    pub timestamp: i64,
    pub received_at: DateTime<Utc>,
}

impl From<TradeFrame> for TradeUpdate {
    fn from(frame: TradeFrame) -> Self {
        Self {
            market_id: frame.market_id,
            price: frame.price,
            size: frame.size,
            side: frame.side,
            timestamp: frame.timestamp,
            received_at: Utc::now(),
        }
    }
}

/// Midpoint price update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MidpointUpdate {
    pub market_id: String,
    pub midpoint: f64,
    pub timestamp: i64,
    pub received_at: DateTime<Utc>,
}

impl From<MidpointFrame> for MidpointUpdate {
    fn from(frame: MidpointFrame) -> Self {
        Self {
            market_id: frame.market_id,
            midpoint: frame.midpoint,
            timestamp: frame.timestamp,
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode, ServerFrame};

    #[test]
    fn test_market_update_from_frame() {
        let frame = decode(
            r#"{"type":"market_data","market_id":"X",
                "data":{"price":"0.55","volume":42},"timestamp":1000}"#,
        )
        .unwrap();
        let ServerFrame::MarketData(frame) = frame else {
            panic!("wrong frame");
        };
        let update = MarketUpdate::from(frame);
        assert_eq!(update.market_id, "X");
        assert_eq!(update.price, 0.55);
        assert_eq!(update.volume, 42.0);
        assert_eq!(update.timestamp, 1000);
    }

    #[test]
    fn test_orderbook_best_levels() {
        let update = OrderBookUpdate {
            market_id: "X".to_string(),
            bids: vec![
                PriceLevel { price: 0.40, size: 1.0 },
                PriceLevel { price: 0.42, size: 2.0 },
            ],
            asks: vec![
                PriceLevel { price: 0.45, size: 3.0 },
                PriceLevel { price: 0.44, size: 4.0 },
            ],
            timestamp: 0,
            received_at: Utc::now(),
        };
        assert_eq!(update.best_bid().unwrap().price, 0.42);
        assert_eq!(update.best_ask().unwrap().price, 0.44);
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(StreamEvent::connected().kind(), "connected");
        assert_eq!(StreamEvent::disconnected(1000, "bye").kind(), "disconnected");
        assert_eq!(StreamEvent::reconnect_failed(10).kind(), "reconnect_failed");
    }
}
