//! Market stream demo runner.
//!
//! Connects to the configured stream endpoint, subscribes to the market ids
//! given on the command line, and logs every emitted event until Ctrl+C.

use tracing::{info, warn};

use market_stream::utils::init_telemetry;
use market_stream::{StreamClient, StreamConfig, StreamEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Note: No .env file found or error loading it: {}", e);
    }

    init_telemetry();

    let config = StreamConfig::from_env();
    info!(url = %config.ws_url, "starting market stream client");

    let (client, mut events) = StreamClient::new(config);
    client.connect()?;

    let markets: Vec<String> = std::env::args().skip(1).collect();
    if markets.is_empty() {
        warn!("no market ids given; connecting without subscriptions");
    }
    for market_id in &markets {
        client.subscribe_market(market_id.clone())?;
        client.subscribe_orderbook(market_id.clone())?;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(StreamEvent::ReconnectFailed { attempts, .. }) => {
                    warn!(attempts, "stream gave up reconnecting, exiting");
                    break;
                }
                Some(event) => {
                    info!(kind = event.kind(), "{:?}", event);
                }
                None => {
                    warn!("event stream closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                client.disconnect().await?;
                break;
            }
        }
    }

    info!("market stream client stopped");
    Ok(())
}
