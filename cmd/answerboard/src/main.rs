//! # answerboard binary
//!
//! The event drain: reads newline-delimited JSON event envelopes on stdin
//! (the shape the write paths emit), feeds them through the consistency
//! engine, and prints a reputation/notification summary at the end.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};

use configs::{LoggingSettings, Settings};
use domains::events::EventEnvelope;
use domains::ports::ConsistencyStore;
use services::{ConsistencyEngine, InboxView};
use storage_adapters::MemoryStore;

#[cfg(feature = "db-sqlite")]
use secrecy::ExposeSecret;
#[cfg(feature = "db-sqlite")]
use storage_adapters::SqliteStore;

fn init_logging(logging: &LoggingSettings) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(logging.tracing_level().to_string()));
    if logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn build_store(settings: &Settings) -> anyhow::Result<Arc<dyn ConsistencyStore>> {
    #[cfg(feature = "db-sqlite")]
    if let Some(url) = settings.database.url.as_ref() {
        let store = SqliteStore::connect(url.expose_secret())
            .await
            .context("connecting sqlite store")?;
        info!("using sqlite store");
        return Ok(Arc::new(store));
    }
    info!("no database configured, using in-memory store");
    Ok(Arc::new(MemoryStore::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading configuration")?;
    init_logging(&settings.logging);

    let store = build_store(&settings).await?;
    let engine = ConsistencyEngine::new(store.clone())
        .with_retry_backoff(Duration::from_millis(settings.engine.retry_backoff_ms));

    info!("answerboard event drain started, reading envelopes from stdin");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut committed = 0usize;
    let mut failed = 0usize;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let envelope: EventEnvelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "unparseable envelope line skipped");
                failed += 1;
                continue;
            }
        };
        match engine.process(&envelope).await {
            Ok(receipt) => {
                committed += 1;
                info!(
                    event_id = %receipt.event_id,
                    kind = %envelope.kind,
                    disposition = ?receipt.disposition,
                    delta = receipt.reputation_delta,
                    notifications = receipt.notifications_created,
                    "event committed"
                );
            }
            Err(err) => {
                failed += 1;
                warn!(event_id = %envelope.id, kind = %envelope.kind, error = %err,
                    "event failed");
            }
        }
    }

    info!(committed, failed, "drain finished");

    let inbox = InboxView::new(store.clone());
    println!("user                   points  tier     unread");
    for user in store.list_users().await? {
        let unread = inbox.unread_count(user.id).await?;
        println!(
            "{:<22} {:>6}  {:<8} {:>5}",
            user.username, user.reputation_points, user.badge_tier, unread
        );
    }

    Ok(())
}
