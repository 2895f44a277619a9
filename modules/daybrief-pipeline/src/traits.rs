// Trait abstractions for the pipeline's collaborators.
//
// Store — every read/write contract the stages need, behind one seam.
// SourceTransport — fetches raw channel posts for a window.
// Delivery — sends rendered digest messages.
//
// These enable deterministic testing with the in-memory store and scripted
// transports in `testing.rs`: no network, no database.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use daybrief_common::{
    ClusterItemRecord, ClusterMember, ContentItem, DedupCandidate, DigestItemRecord, DigestRecord,
    NewItem, SimilarItem, Source, SummaryContent, Window, WindowStatus,
};
use daybrief_store::PgStore;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Store: Send + Sync {
    // --- Windows ---

    /// Atomically get or create the window for the exact range. Concurrent
    /// callers converge on the same row.
    async fn get_or_create_window(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Window>;

    /// Unconditional status write; the orchestrator owns transition order.
    async fn set_window_status(&self, window_id: i64, status: WindowStatus) -> Result<()>;

    // --- Sources ---

    async fn active_sources(&self) -> Result<Vec<Source>>;

    async fn touch_source_fetched(&self, source_id: i64, at: DateTime<Utc>) -> Result<()>;

    // --- Items ---

    async fn upsert_item(&self, item: &NewItem) -> Result<ContentItem>;

    async fn existing_message_ids(
        &self,
        source_id: i64,
        candidate_ids: &[i64],
    ) -> Result<HashSet<i64>>;

    async fn count_items_in_window(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<u64>;

    async fn items_missing_summary(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Vec<ContentItem>>;

    async fn items_missing_embedding(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Vec<ContentItem>>;

    // --- Summaries ---

    /// Global exact-dedup lookup: any existing summary whose item carries
    /// this content hash, across all windows.
    async fn find_summary_by_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<(i64, SummaryContent)>>;

    async fn upsert_summary(&self, item_id: i64, content: &SummaryContent) -> Result<()>;

    // --- Embeddings ---

    async fn set_embedding(&self, item_id: i64, embedding: Vec<f32>) -> Result<()>;

    async fn count_items_without_embedding(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<u64>;

    /// Embedded items in clustering priority order
    /// (importance DESC NULLS LAST, posted_at ASC, id ASC).
    async fn dedup_candidates(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Vec<DedupCandidate>>;

    /// Top-k nearest neighbors by cosine similarity among embedded items in
    /// the window, excluding `exclude_item_ids`, similarity descending.
    async fn similar_items(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        embedding: &[f32],
        exclude_item_ids: &[i64],
        top_k: usize,
    ) -> Result<Vec<SimilarItem>>;

    // --- Clusters ---

    async fn clear_clusters(&self, window_id: i64) -> Result<()>;

    async fn create_cluster(&self, window_id: i64, representative_item_id: i64) -> Result<i64>;

    async fn add_cluster_members(
        &self,
        cluster_id: i64,
        members: &[ClusterMember],
    ) -> Result<()>;

    async fn cluster_records(&self, window_id: i64) -> Result<Vec<ClusterItemRecord>>;

    // --- Digests ---

    async fn digest_items(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Vec<DigestItemRecord>>;

    async fn digest_for_window(&self, window_id: i64) -> Result<Option<DigestRecord>>;

    #[allow(clippy::too_many_arguments)]
    async fn upsert_digest(
        &self,
        window_id: i64,
        destination_id: i64,
        message_ids: &[i64],
        content: &str,
        stats: Option<&serde_json::Value>,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<DigestRecord>;
}

#[async_trait]
impl Store for PgStore {
    async fn get_or_create_window(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Window> {
        daybrief_store::windows::get_or_create(&self.pool, start_at, end_at).await
    }

    async fn set_window_status(&self, window_id: i64, status: WindowStatus) -> Result<()> {
        daybrief_store::windows::set_status(&self.pool, window_id, status).await
    }

    async fn active_sources(&self) -> Result<Vec<Source>> {
        daybrief_store::sources::active(&self.pool).await
    }

    async fn touch_source_fetched(&self, source_id: i64, at: DateTime<Utc>) -> Result<()> {
        daybrief_store::sources::touch_last_fetched(&self.pool, source_id, at).await
    }

    async fn upsert_item(&self, item: &NewItem) -> Result<ContentItem> {
        daybrief_store::items::upsert(&self.pool, item).await
    }

    async fn existing_message_ids(
        &self,
        source_id: i64,
        candidate_ids: &[i64],
    ) -> Result<HashSet<i64>> {
        daybrief_store::items::existing_message_ids(&self.pool, source_id, candidate_ids).await
    }

    async fn count_items_in_window(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<u64> {
        daybrief_store::items::count_in_window(&self.pool, start_at, end_at).await
    }

    async fn items_missing_summary(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Vec<ContentItem>> {
        daybrief_store::items::missing_summary(&self.pool, start_at, end_at).await
    }

    async fn items_missing_embedding(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Vec<ContentItem>> {
        daybrief_store::items::missing_embedding(&self.pool, start_at, end_at).await
    }

    async fn find_summary_by_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<(i64, SummaryContent)>> {
        daybrief_store::summaries::find_by_content_hash(&self.pool, content_hash).await
    }

    async fn upsert_summary(&self, item_id: i64, content: &SummaryContent) -> Result<()> {
        daybrief_store::summaries::upsert(&self.pool, item_id, content).await
    }

    async fn set_embedding(&self, item_id: i64, embedding: Vec<f32>) -> Result<()> {
        daybrief_store::embeddings::set(&self.pool, item_id, embedding).await
    }

    async fn count_items_without_embedding(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<u64> {
        daybrief_store::embeddings::count_missing_in_window(&self.pool, start_at, end_at).await
    }

    async fn dedup_candidates(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Vec<DedupCandidate>> {
        daybrief_store::embeddings::dedup_candidates(&self.pool, start_at, end_at).await
    }

    async fn similar_items(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        embedding: &[f32],
        exclude_item_ids: &[i64],
        top_k: usize,
    ) -> Result<Vec<SimilarItem>> {
        daybrief_store::embeddings::similar_items(
            &self.pool,
            start_at,
            end_at,
            embedding,
            exclude_item_ids,
            top_k,
        )
        .await
    }

    async fn clear_clusters(&self, window_id: i64) -> Result<()> {
        daybrief_store::clusters::clear_for_window(&self.pool, window_id).await
    }

    async fn create_cluster(&self, window_id: i64, representative_item_id: i64) -> Result<i64> {
        daybrief_store::clusters::create(&self.pool, window_id, representative_item_id, None).await
    }

    async fn add_cluster_members(
        &self,
        cluster_id: i64,
        members: &[ClusterMember],
    ) -> Result<()> {
        daybrief_store::clusters::add_members(&self.pool, cluster_id, members).await
    }

    async fn cluster_records(&self, window_id: i64) -> Result<Vec<ClusterItemRecord>> {
        daybrief_store::clusters::records_for_window(&self.pool, window_id).await
    }

    async fn digest_items(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Vec<DigestItemRecord>> {
        daybrief_store::clusters::digest_items(&self.pool, start_at, end_at).await
    }

    async fn digest_for_window(&self, window_id: i64) -> Result<Option<DigestRecord>> {
        daybrief_store::digests::find_by_window(&self.pool, window_id).await
    }

    async fn upsert_digest(
        &self,
        window_id: i64,
        destination_id: i64,
        message_ids: &[i64],
        content: &str,
        stats: Option<&serde_json::Value>,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<DigestRecord> {
        daybrief_store::digests::upsert(
            &self.pool,
            window_id,
            destination_id,
            message_ids,
            content,
            stats,
            published_at,
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// SourceTransport
// ---------------------------------------------------------------------------

/// One post as returned by the source transport, before normalization.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub external_message_id: i64,
    pub posted_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub has_media: bool,
    pub views: Option<i64>,
    pub forwards: Option<i64>,
    pub reactions: Option<serde_json::Value>,
    pub permalink: Option<String>,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait SourceTransport: Send + Sync {
    /// Fetch every post from `source` with `start_at <= posted_at < end_at`.
    async fn fetch_window(
        &self,
        source: &Source,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Vec<RawItem>, TransportError>;
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Delivery: Send + Sync {
    /// Send one rendered message; returns the delivered message id.
    async fn send(&self, destination: i64, html: &str) -> Result<i64>;
}

#[async_trait]
impl Delivery for telegram_client::BotClient {
    async fn send(&self, destination: i64, html: &str) -> Result<i64> {
        Ok(self.send_html(destination, html).await?)
    }
}
