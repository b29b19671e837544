//! Streams every configured market and logs the normalized records.
//!
//! Usage: `exchange-feed [config.json]`. Set `EXCHANGE_FEED_LOG_JSON=1` for
//! JSON log lines.

use anyhow::Context;
use exchange_feed::feed::{MarketFeed, data_channel};
use exchange_feed::logging::init_tracing;
use exchange_feed::{FeedConfig, MarketId};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(std::env::var_os("EXCHANGE_FEED_LOG_JSON").is_some());

    let config = match std::env::args().nth(1) {
        Some(path) => FeedConfig::load(&path)?,
        None => FeedConfig::default(),
    }
    .with_env_overrides();
    config.validate().context("invalid endpoint override")?;

    let (on_data, mut updates) = data_channel(1_000);
    let mut feed = MarketFeed::new(&config);
    feed.connect(MarketId::ALL, on_data);

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some((market, data)) = update else { break };
                for record in data.values() {
                    info!(
                        market = %market,
                        token = %record.token,
                        price = %record.trade_price,
                        change_rate = %record.change_rate,
                        direction = ?record.change_direction,
                        "ticker"
                    );
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                info!("shutting down");
                break;
            }
        }
    }

    feed.shutdown().await;
    Ok(())
}
