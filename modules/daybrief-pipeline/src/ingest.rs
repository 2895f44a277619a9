use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{info, warn};

use daybrief_common::{NewItem, Source};

use crate::normalize::{compute_content_hash, normalize_text};
use crate::stats::IngestStats;
use crate::traits::{RawItem, SourceTransport, Store, TransportError};

/// How many times one source fetch is attempted across rate-limit waits.
const MAX_FETCH_ATTEMPTS: u32 = 5;

/// Ingest every active source for the window: fetch, normalize, hash,
/// upsert. Re-running for an already-ingested window updates rows in place
/// and never duplicates `(source, message)` pairs.
pub async fn run_ingest(
    store: &dyn Store,
    transport: &dyn SourceTransport,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
) -> anyhow::Result<IngestStats> {
    let sources = store.active_sources().await?;
    let mut stats = IngestStats::default();

    for source in &sources {
        let raw_items = match fetch_with_backoff(transport, source, start_at, end_at).await {
            Ok(items) => items,
            Err(err) => {
                warn!(
                    source = source.display_name().as_str(),
                    error = %err,
                    "Source fetch failed, continuing with remaining sources"
                );
                stats.source_errors += 1;
                continue;
            }
        };

        let candidate_ids: Vec<i64> = raw_items.iter().map(|item| item.external_message_id).collect();
        let existing = store.existing_message_ids(source.id, &candidate_ids).await?;

        for raw in &raw_items {
            let normalized = raw.text.as_deref().map(normalize_text);
            let text = normalized.filter(|value| !value.is_empty());
            let content_hash = compute_content_hash(
                text.as_deref(),
                raw.has_media,
                raw.permalink.as_deref(),
                raw.posted_at,
            );

            let item = NewItem {
                source_id: source.id,
                external_message_id: raw.external_message_id,
                posted_at: raw.posted_at,
                edited_at: raw.edited_at,
                text,
                has_media: raw.has_media,
                views: raw.views,
                forwards: raw.forwards,
                reactions: raw.reactions.clone(),
                permalink: raw.permalink.clone(),
                content_hash,
                lang: None,
            };
            store.upsert_item(&item).await?;

            if existing.contains(&raw.external_message_id) {
                stats.items_updated += 1;
            } else {
                stats.items_inserted += 1;
            }
        }

        stats.items_fetched += raw_items.len() as u32;
        stats.sources_fetched += 1;
        store.touch_source_fetched(source.id, Utc::now()).await?;

        info!(
            source = source.display_name().as_str(),
            fetched = raw_items.len(),
            "Source ingested"
        );
    }

    Ok(stats)
}

/// Fetch one source's window, honoring server-provided rate-limit backoff
/// (plus jitter) between attempts.
async fn fetch_with_backoff(
    transport: &dyn SourceTransport,
    source: &Source,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
) -> Result<Vec<RawItem>, TransportError> {
    let mut attempt = 1u32;
    loop {
        match transport.fetch_window(source, start_at, end_at).await {
            Ok(items) => return Ok(items),
            Err(TransportError::RateLimited { retry_after }) if attempt < MAX_FETCH_ATTEMPTS => {
                let jitter = Duration::from_millis(rand::rng().random_range(300..1000));
                let wait = retry_after + jitter;
                warn!(
                    source = source.display_name().as_str(),
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    "Rate limited while fetching, backing off"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
