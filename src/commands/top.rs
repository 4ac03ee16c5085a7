use crate::error::Result;
use crate::services::{CoinGeckoClient, ReqwestTransport, ThrottledTransport};
use crate::utils::{upstream_api_key, upstream_base_url};
use std::sync::Arc;

pub async fn run(limit: usize) {
    match print_top(limit).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn print_top(limit: usize) -> Result<()> {
    let transport = ReqwestTransport::new(upstream_api_key())?;
    let client = CoinGeckoClient::new(
        ThrottledTransport::new(Arc::new(transport)),
        upstream_base_url(),
    );

    let rows = client.fetch_markets().await?;

    println!(
        "{:<4} {:<14} {:<8} {:>14} {:>18} {:>10}",
        "#", "ID", "SYMBOL", "PRICE", "MARKET CAP", "24H %"
    );
    for (idx, row) in rows.iter().take(limit).enumerate() {
        println!(
            "{:<4} {:<14} {:<8} {:>14} {:>18} {:>10}",
            idx + 1,
            row.id,
            row.symbol.as_deref().unwrap_or("-"),
            row.current_price
                .map(|p| format!("{:.2}", p))
                .unwrap_or_else(|| "-".to_string()),
            row.market_cap
                .map(|c| format!("{:.0}", c))
                .unwrap_or_else(|| "-".to_string()),
            row.price_change_percentage_24h
                .map(|c| format!("{:+.2}", c))
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    Ok(())
}
