use chrono::{DateTime, Utc};
use tracing::info;

use daybrief_common::DaybriefError;

use crate::render::render_digest_html;
use crate::select::{build_digest_data, SelectionPolicy};
use crate::stats::PublishStats;
use crate::traits::{Delivery, Store};

const MESSAGE_BREAK: &str = "\n\n----- MESSAGE BREAK -----\n\n";

/// Publish the window's digest. The stored digest's non-null `published_at`
/// is the idempotency marker: a second publish without `force` sends
/// nothing and returns the already-delivered message ids.
#[allow(clippy::too_many_arguments)]
pub async fn run_publish(
    store: &dyn Store,
    delivery: &dyn Delivery,
    policy: &SelectionPolicy,
    window_id: i64,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    destination_id: i64,
    force: bool,
) -> anyhow::Result<PublishStats> {
    if !force {
        if let Some(existing) = store.digest_for_window(window_id).await? {
            if let Some(published_at) = existing.published_at {
                info!(
                    window_id,
                    %published_at,
                    "Digest already published, skipping send"
                );
                return Ok(PublishStats {
                    messages_sent: 0,
                    message_ids: existing.message_ids,
                    already_published: true,
                });
            }
        }
    }

    let digest = build_digest_data(store, start_at, end_at, Some(window_id), policy).await?;
    let messages = render_digest_html(&digest);
    if messages.is_empty() {
        return Err(DaybriefError::Publish("digest rendering produced no messages".to_string()).into());
    }

    // Sends are sequential and each is independently retryable inside the
    // delivery client; a failure here aborts the run, it is never swallowed.
    let mut message_ids = Vec::with_capacity(messages.len());
    for message in &messages {
        let message_id = delivery
            .send(destination_id, message)
            .await
            .map_err(|err| DaybriefError::Publish(err.to_string()))?;
        message_ids.push(message_id);
    }

    let total_posts: usize = digest.sections.iter().map(|section| section.posts.len()).sum();
    let stats_json = serde_json::json!({
        "messages": messages.len(),
        "top_clusters": digest.top_clusters.len(),
        "sections": digest.sections.len(),
        "posts": total_posts,
    });
    let content = messages.join(MESSAGE_BREAK);

    store
        .upsert_digest(
            window_id,
            destination_id,
            &message_ids,
            &content,
            Some(&stats_json),
            Some(Utc::now()),
        )
        .await?;

    info!(
        window_id,
        messages_sent = message_ids.len(),
        "Digest published"
    );
    Ok(PublishStats {
        messages_sent: message_ids.len() as u32,
        message_ids,
        already_published: false,
    })
}
