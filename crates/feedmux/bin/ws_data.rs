// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2025 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Connects to a multiplexed feed endpoint and streams bars for the given symbols.
//! Useful when manually validating the client against a live server.
//!
//! # Environment Variables
//!
//! - `FEEDMUX_URL`: WebSocket endpoint (default `ws://127.0.0.1:9000/feed`)
//! - `FEEDMUX_*`: connection settings, see `FeedMuxConfig::from_env`
//! - `RUST_LOG`: log filter (default `info`)
//!
//! # Usage
//!
//! ```bash
//! cargo run -p nautilus-feedmux --bin feedmux-ws-data -- AAPL MSFT
//! ```

use std::env;

use nautilus_feedmux::{
    common::domain::FeedDomain, config::FeedMuxConfig, factory::ConnectionRegistry,
};
use tokio::signal;
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "ws://127.0.0.1:9000/feed";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let url = env::var("FEEDMUX_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let mut symbols: Vec<String> = env::args().skip(1).collect();
    if symbols.is_empty() {
        symbols.push("AAPL".to_string());
    }

    let registry = ConnectionRegistry::with_config(FeedMuxConfig::from_env(url.as_str()));
    let client = registry.connect(&url).await?;
    tracing::info!("Connected to {}", client.url());

    let bars = registry.feed(&url, FeedDomain::new("bars", &["symbol", "resolution"]));

    let mut ids = Vec::with_capacity(symbols.len());
    for symbol in &symbols {
        let params = serde_json::json!({"symbol": symbol, "resolution": "1"});
        let id = bars
            .subscribe(params, |payload| {
                tracing::info!("bar: {payload}");
                Ok(())
            })
            .await?;
        tracing::info!("Subscribed to bars for {symbol} ({id})");
        ids.push(id);
    }

    tracing::info!("Streaming bars; press Ctrl+C to exit");
    signal::ctrl_c().await?;

    for id in &ids {
        if let Err(e) = bars.unsubscribe(id).await {
            tracing::warn!("Failed to unsubscribe {id}: {e}");
        }
    }

    let stats = client.router_stats().await?;
    tracing::info!(
        "Routed {} frames, dropped {}, {} callback failures",
        stats.routed,
        stats.dropped,
        stats.callback_failures
    );

    registry.shutdown().await;
    Ok(())
}
