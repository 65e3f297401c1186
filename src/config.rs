//! Stream client configuration.
//!
//! All knobs are externally injected: construct a `StreamConfig` directly or
//! read it from the environment. Nothing in the client core hard-codes an
//! endpoint or a timing policy.

use std::time::Duration;

/// Default WebSocket endpoint for live market data.
const DEFAULT_WS_URL: &str = "wss://ws-live-data.polymarket.com";

/// Configuration for one stream client instance.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// WebSocket endpoint URL.
    pub ws_url: String,
    /// How long a connect attempt may take before it counts as failed.
    pub connect_timeout: Duration,
    /// Interval between outgoing pings while the link is open.
    pub heartbeat_interval: Duration,
    /// Tolerance beyond the interval before the link counts as stale.
    pub heartbeat_timeout: Duration,
    /// First reconnect delay; doubles per failed attempt.
    pub reconnect_base: Duration,
    /// Hard cap on the reconnect delay.
    pub reconnect_cap: Duration,
    /// Consecutive failed attempts before giving up for good.
    pub max_reconnect_attempts: u32,
    /// How long a correlated request may wait for its response.
    pub request_timeout: Duration,
    /// Maximum commands buffered while disconnected; oldest are dropped.
    pub outbound_queue_cap: usize,
    /// Capacity of the emitted-event channel.
    pub event_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(30),
            reconnect_base: Duration::from_millis(1000),
            reconnect_cap: Duration::from_millis(30_000),
            max_reconnect_attempts: 10,
            request_timeout: Duration::from_secs(5),
            outbound_queue_cap: 256,
            event_buffer: 1000,
        }
    }
}

impl StreamConfig {
    /// Reads configuration from `MARKET_STREAM_*` environment variables,
    /// falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ws_url: std::env::var("MARKET_STREAM_WS_URL").unwrap_or(defaults.ws_url),
            connect_timeout: env_ms("MARKET_STREAM_CONNECT_TIMEOUT_MS", defaults.connect_timeout),
            heartbeat_interval: env_ms(
                "MARKET_STREAM_HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval,
            ),
            heartbeat_timeout: env_ms(
                "MARKET_STREAM_HEARTBEAT_TIMEOUT_MS",
                defaults.heartbeat_timeout,
            ),
            reconnect_base: env_ms("MARKET_STREAM_RECONNECT_BASE_MS", defaults.reconnect_base),
            reconnect_cap: env_ms("MARKET_STREAM_RECONNECT_CAP_MS", defaults.reconnect_cap),
            max_reconnect_attempts: env_parse(
                "MARKET_STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            request_timeout: env_ms("MARKET_STREAM_REQUEST_TIMEOUT_MS", defaults.request_timeout),
            outbound_queue_cap: env_parse(
                "MARKET_STREAM_OUTBOUND_QUEUE_CAP",
                defaults.outbound_queue_cap,
            ),
            event_buffer: defaults.event_buffer,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based):
    /// `min(base * 2^(attempt-1), cap)`.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base_ms = self.reconnect_base.as_millis() as u64;
        let cap_ms = self.reconnect_cap.as_millis() as u64;
        Duration::from_millis(base_ms.saturating_mul(1u64 << exponent).min(cap_ms))
    }
}

fn env_ms(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy() {
        let config = StreamConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(config.reconnect_base, Duration::from_millis(1000));
        assert_eq!(config.reconnect_cap, Duration::from_millis(30_000));
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_reconnect_delay_doubles_to_cap() {
        let config = StreamConfig::default();
        assert_eq!(config.reconnect_delay(1), Duration::from_millis(1000));
        assert_eq!(config.reconnect_delay(2), Duration::from_millis(2000));
        assert_eq!(config.reconnect_delay(5), Duration::from_millis(16_000));
        // 1000 * 2^5 = 32000 > cap
        assert_eq!(config.reconnect_delay(6), Duration::from_millis(30_000));
        assert_eq!(config.reconnect_delay(10), Duration::from_millis(30_000));
    }

    #[test]
    fn test_reconnect_delay_extremes() {
        let config = StreamConfig::default();
        // attempt 0 is treated as the first attempt
        assert_eq!(config.reconnect_delay(0), Duration::from_millis(1000));
        // huge attempt numbers must not overflow
        assert_eq!(config.reconnect_delay(u32::MAX), Duration::from_millis(30_000));
    }
}
