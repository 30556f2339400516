use quote_refresh::{util, TiingoFetcher, UpdateConfig, UpdateService};

use anyhow::{bail, Context};
use log::info;
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let paths: Vec<String> = env::args().skip(1).collect();
    if paths.is_empty() {
        bail!("usage: refresh_file <csv> [<csv> ...]");
    }
    let token = env::var("TIINGO_TOKEN").context("TIINGO_TOKEN is not set")?;

    // 可选：回补天数
    let backfill = env::var("BACKFILL_DAYS")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(5);

    let mut config = UpdateConfig::new()
        .with_token(&token)
        .with_backfill_days(backfill)
        .with_full_redownload(env::var("FULL_REDOWNLOAD").is_ok());
    if let Ok(end) = env::var("END_DATE") {
        config = config.with_end(util::parse_date_string(&end)?);
    }
    let service = UpdateService::new(config, Arc::new(TiingoFetcher::new()?));
    info!(
        "backfill {} day(s), {} worker(s), full redownload {}",
        service.config().backfill_days,
        service.config().concurrency,
        service.config().full_redownload
    );

    for path in &paths {
        let summary = service
            .update_file(path)
            .await
            .with_context(|| format!("updating {}", path))?;
        info!(
            "{}: {} ({} refreshed, {} not found, {} kept, {} fresh)",
            summary.path.display(),
            summary.phase,
            summary.refreshed.len(),
            summary.not_found.len(),
            summary.rows.kept,
            summary.rows.appended
        );
        if !summary.not_found.is_empty() {
            println!("{}: not found: {}", path, summary.not_found.join(", "));
        }
    }

    Ok(())
}
