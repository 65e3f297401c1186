//! Wire protocol for the market-data stream server.
//!
//! This module is the codec boundary: it serializes outgoing commands to
//! the JSON wire format and parses incoming frames into typed values. It is
//! pure and stateless - connection handling lives in the client layer, and
//! raw frames never reach consumers directly.

mod frames;

pub use frames::{
    decode,
    AckFrame,
    Channel,
    ClientCommand,
    DecodeError,
    ErrorFrame,
    MarketDataFrame,
    MarketPayload,
    MidpointFrame,
    OrderBookFrame,
    PongFrame,
    RawLevel,
    ServerFrame,
    Subscription,
    TradeFrame,
};
