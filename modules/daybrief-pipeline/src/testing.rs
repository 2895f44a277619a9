// Deterministic test doubles: an in-memory Store plus scripted transport,
// model, and delivery fakes. No network, no database; the full pipeline
// runs in-process in milliseconds.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ai_client::{AiError, ChatModel, EmbedModel};
use daybrief_common::{
    ClusterItemRecord, ClusterMember, ContentItem, DedupCandidate, DigestItemRecord, DigestRecord,
    NewItem, SimilarItem, Source, SummaryContent, Window, WindowStatus,
};

use crate::dedup::cosine_similarity;
use crate::traits::{Delivery, RawItem, SourceTransport, Store, TransportError};

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemState {
    next_source_id: i64,
    next_item_id: i64,
    next_window_id: i64,
    next_cluster_id: i64,
    next_digest_id: i64,
    sources: BTreeMap<i64, Source>,
    items: BTreeMap<i64, ContentItem>,
    embeddings: BTreeMap<i64, Vec<f32>>,
    summaries: BTreeMap<i64, SummaryContent>,
    windows: BTreeMap<i64, Window>,
    clusters: BTreeMap<i64, (i64, i64)>, // cluster_id -> (window_id, representative)
    members: BTreeMap<i64, Vec<ClusterMember>>,
    digests: BTreeMap<i64, DigestRecord>, // keyed by window_id
}

/// In-memory [`Store`] with the same contracts as the Postgres store.
#[derive(Default)]
pub struct MemStore {
    state: Mutex<MemState>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an active source and return it.
    pub fn add_source(&self, username: &str, title: &str) -> Source {
        let mut state = self.state.lock().unwrap();
        state.next_source_id += 1;
        let source = Source {
            id: state.next_source_id,
            external_peer_id: 1_000 + state.next_source_id,
            username: Some(username.to_string()),
            title: title.to_string(),
            is_active: true,
            added_at: Utc::now(),
            last_fetched_at: None,
        };
        state.sources.insert(source.id, source.clone());
        source
    }

    pub fn item_count(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn window_status(&self, window_id: i64) -> Option<WindowStatus> {
        self.state
            .lock()
            .unwrap()
            .windows
            .get(&window_id)
            .map(|window| window.status)
    }

    pub fn summary_of(&self, item_id: i64) -> Option<SummaryContent> {
        self.state.lock().unwrap().summaries.get(&item_id).cloned()
    }

    pub fn distinct_summary_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .summaries
            .values()
            .map(|summary| format!("{:?}", summary))
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn cluster_count(&self, window_id: i64) -> usize {
        let state = self.state.lock().unwrap();
        state
            .clusters
            .values()
            .filter(|(cluster_window, _)| *cluster_window == window_id)
            .count()
    }

    fn record_for(state: &MemState, item: &ContentItem) -> DigestItemRecord {
        let source = state.sources.get(&item.source_id);
        DigestItemRecord {
            item_id: item.id,
            source_id: item.source_id,
            source_title: source.map(|s| s.title.clone()).unwrap_or_default(),
            source_username: source.and_then(|s| s.username.clone()),
            posted_at: item.posted_at,
            text: item.text.clone(),
            permalink: item.permalink.clone(),
            content_hash: item.content_hash.clone(),
            summary: state.summaries.get(&item.id).cloned(),
        }
    }

    fn in_window(item: &ContentItem, start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> bool {
        item.posted_at >= start_at && item.posted_at < end_at
    }
}

#[async_trait]
impl Store for MemStore {
    async fn get_or_create_window(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Window> {
        let mut state = self.state.lock().unwrap();
        if let Some(window) = state
            .windows
            .values()
            .find(|window| window.start_at == start_at && window.end_at == end_at)
        {
            return Ok(window.clone());
        }
        state.next_window_id += 1;
        let window = Window {
            id: state.next_window_id,
            start_at,
            end_at,
            status: WindowStatus::New,
            created_at: Utc::now(),
        };
        state.windows.insert(window.id, window.clone());
        Ok(window)
    }

    async fn set_window_status(&self, window_id: i64, status: WindowStatus) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.windows.get_mut(&window_id) {
            Some(window) => {
                window.status = status;
                Ok(())
            }
            None => Err(anyhow::anyhow!("window {window_id} not found")),
        }
    }

    async fn active_sources(&self) -> Result<Vec<Source>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .sources
            .values()
            .filter(|source| source.is_active)
            .cloned()
            .collect())
    }

    async fn touch_source_fetched(&self, source_id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(source) = state.sources.get_mut(&source_id) {
            source.last_fetched_at = Some(at);
        }
        Ok(())
    }

    async fn upsert_item(&self, item: &NewItem) -> Result<ContentItem> {
        let mut state = self.state.lock().unwrap();
        let existing_id = state
            .items
            .values()
            .find(|existing| {
                existing.source_id == item.source_id
                    && existing.external_message_id == item.external_message_id
            })
            .map(|existing| existing.id);

        let (id, created_at) = match existing_id {
            Some(id) => (id, state.items[&id].created_at),
            None => {
                state.next_item_id += 1;
                (state.next_item_id, Utc::now())
            }
        };

        let stored = ContentItem {
            id,
            source_id: item.source_id,
            external_message_id: item.external_message_id,
            posted_at: item.posted_at,
            edited_at: item.edited_at,
            text: item.text.clone(),
            has_media: item.has_media,
            views: item.views,
            forwards: item.forwards,
            reactions: item.reactions.clone(),
            permalink: item.permalink.clone(),
            content_hash: item.content_hash.clone(),
            lang: item.lang.clone(),
            created_at,
        };
        state.items.insert(id, stored.clone());
        Ok(stored)
    }

    async fn existing_message_ids(
        &self,
        source_id: i64,
        candidate_ids: &[i64],
    ) -> Result<HashSet<i64>> {
        let candidates: HashSet<i64> = candidate_ids.iter().copied().collect();
        let state = self.state.lock().unwrap();
        Ok(state
            .items
            .values()
            .filter(|item| {
                item.source_id == source_id && candidates.contains(&item.external_message_id)
            })
            .map(|item| item.external_message_id)
            .collect())
    }

    async fn count_items_in_window(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<u64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .items
            .values()
            .filter(|item| Self::in_window(item, start_at, end_at))
            .count() as u64)
    }

    async fn items_missing_summary(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Vec<ContentItem>> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<ContentItem> = state
            .items
            .values()
            .filter(|item| {
                Self::in_window(item, start_at, end_at) && !state.summaries.contains_key(&item.id)
            })
            .cloned()
            .collect();
        items.sort_by_key(|item| (item.posted_at, item.id));
        Ok(items)
    }

    async fn items_missing_embedding(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Vec<ContentItem>> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<ContentItem> = state
            .items
            .values()
            .filter(|item| {
                Self::in_window(item, start_at, end_at) && !state.embeddings.contains_key(&item.id)
            })
            .cloned()
            .collect();
        items.sort_by_key(|item| (item.posted_at, item.id));
        Ok(items)
    }

    async fn find_summary_by_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<(i64, SummaryContent)>> {
        let state = self.state.lock().unwrap();
        let mut hits: Vec<(i64, SummaryContent)> = state
            .summaries
            .iter()
            .filter(|(item_id, _)| {
                state
                    .items
                    .get(item_id)
                    .map(|item| item.content_hash == content_hash)
                    .unwrap_or(false)
            })
            .map(|(item_id, summary)| (*item_id, summary.clone()))
            .collect();
        hits.sort_by_key(|(item_id, _)| *item_id);
        Ok(hits.into_iter().next())
    }

    async fn upsert_summary(&self, item_id: i64, content: &SummaryContent) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .summaries
            .insert(item_id, content.clone());
        Ok(())
    }

    async fn set_embedding(&self, item_id: i64, embedding: Vec<f32>) -> Result<()> {
        self.state.lock().unwrap().embeddings.insert(item_id, embedding);
        Ok(())
    }

    async fn count_items_without_embedding(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<u64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .items
            .values()
            .filter(|item| {
                Self::in_window(item, start_at, end_at) && !state.embeddings.contains_key(&item.id)
            })
            .count() as u64)
    }

    async fn dedup_candidates(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Vec<DedupCandidate>> {
        let state = self.state.lock().unwrap();
        let mut candidates: Vec<DedupCandidate> = state
            .items
            .values()
            .filter(|item| Self::in_window(item, start_at, end_at))
            .filter_map(|item| {
                state.embeddings.get(&item.id).map(|embedding| DedupCandidate {
                    item_id: item.id,
                    posted_at: item.posted_at,
                    embedding: embedding.clone(),
                    importance: state.summaries.get(&item.id).map(|summary| summary.importance),
                })
            })
            .collect();
        // importance DESC NULLS LAST, posted_at ASC, id ASC
        candidates.sort_by(|a, b| {
            b.importance
                .unwrap_or(0)
                .cmp(&a.importance.unwrap_or(0))
                .then_with(|| a.posted_at.cmp(&b.posted_at))
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        Ok(candidates)
    }

    async fn similar_items(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        embedding: &[f32],
        exclude_item_ids: &[i64],
        top_k: usize,
    ) -> Result<Vec<SimilarItem>> {
        let excluded: HashSet<i64> = exclude_item_ids.iter().copied().collect();
        let state = self.state.lock().unwrap();
        let mut hits: Vec<SimilarItem> = state
            .items
            .values()
            .filter(|item| {
                Self::in_window(item, start_at, end_at) && !excluded.contains(&item.id)
            })
            .filter_map(|item| {
                state.embeddings.get(&item.id).map(|other| SimilarItem {
                    item_id: item.id,
                    similarity: cosine_similarity(embedding, other),
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn clear_clusters(&self, window_id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let cluster_ids: Vec<i64> = state
            .clusters
            .iter()
            .filter(|(_, (cluster_window, _))| *cluster_window == window_id)
            .map(|(id, _)| *id)
            .collect();
        for cluster_id in cluster_ids {
            state.clusters.remove(&cluster_id);
            state.members.remove(&cluster_id);
        }
        Ok(())
    }

    async fn create_cluster(&self, window_id: i64, representative_item_id: i64) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        state.next_cluster_id += 1;
        let id = state.next_cluster_id;
        state.clusters.insert(id, (window_id, representative_item_id));
        Ok(id)
    }

    async fn add_cluster_members(
        &self,
        cluster_id: i64,
        members: &[ClusterMember],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .members
            .entry(cluster_id)
            .or_default()
            .extend_from_slice(members);
        Ok(())
    }

    async fn cluster_records(&self, window_id: i64) -> Result<Vec<ClusterItemRecord>> {
        let state = self.state.lock().unwrap();
        let mut records = Vec::new();
        for (cluster_id, (cluster_window, representative)) in &state.clusters {
            if *cluster_window != window_id {
                continue;
            }
            for member in state.members.get(cluster_id).into_iter().flatten() {
                if let Some(item) = state.items.get(&member.item_id) {
                    records.push(ClusterItemRecord {
                        cluster_id: *cluster_id,
                        representative_item_id: Some(*representative),
                        similarity: Some(member.similarity),
                        item: Self::record_for(&state, item),
                    });
                }
            }
        }
        records.sort_by_key(|record| (record.cluster_id, record.item.posted_at, record.item.item_id));
        Ok(records)
    }

    async fn digest_items(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Vec<DigestItemRecord>> {
        let state = self.state.lock().unwrap();
        let mut records: Vec<DigestItemRecord> = state
            .items
            .values()
            .filter(|item| Self::in_window(item, start_at, end_at))
            .filter(|item| {
                state
                    .sources
                    .get(&item.source_id)
                    .map(|source| source.is_active)
                    .unwrap_or(false)
            })
            .map(|item| Self::record_for(&state, item))
            .collect();
        records.sort_by_key(|record| (record.posted_at, record.item_id));
        Ok(records)
    }

    async fn digest_for_window(&self, window_id: i64) -> Result<Option<DigestRecord>> {
        Ok(self.state.lock().unwrap().digests.get(&window_id).cloned())
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
        let mut state = self.state.lock().unwrap();
        let id = match state.digests.get(&window_id) {
            Some(existing) => existing.id,
            None => {
                state.next_digest_id += 1;
                state.next_digest_id
            }
        };
        let digest = DigestRecord {
            id,
            window_id,
            destination_id,
            message_ids: message_ids.to_vec(),
            content: content.to_string(),
            stats: stats.cloned(),
            published_at,
        };
        state.digests.insert(window_id, digest.clone());
        Ok(digest)
    }
}

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

/// Transport fake fed with canned posts per source. Optionally fails the
/// first N fetches with a rate-limit to exercise backoff.
#[derive(Default)]
pub struct ScriptedTransport {
    posts: Mutex<HashMap<i64, Vec<RawItem>>>,
    rate_limit_first: AtomicU32,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_post(&self, source_id: i64, raw: RawItem) {
        self.posts.lock().unwrap().entry(source_id).or_default().push(raw);
    }

    pub fn rate_limit_first(&self, times: u32) {
        self.rate_limit_first.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceTransport for ScriptedTransport {
    async fn fetch_window(
        &self,
        source: &Source,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Vec<RawItem>, TransportError> {
        let remaining = self.rate_limit_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.rate_limit_first.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::RateLimited {
                retry_after: std::time::Duration::from_millis(1),
            });
        }

        let posts = self.posts.lock().unwrap();
        Ok(posts
            .get(&source.id)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.posted_at >= start_at && item.posted_at < end_at)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Scripted models
// ---------------------------------------------------------------------------

/// Chat fake: picks the first response whose marker appears in the user
/// prompt, else a default payload. Can fail the first N calls.
pub struct ScriptedChat {
    by_marker: Mutex<Vec<(String, serde_json::Value)>>,
    default: serde_json::Value,
    fail_first: AtomicU32,
}

impl ScriptedChat {
    pub fn new(default: serde_json::Value) -> Self {
        Self {
            by_marker: Mutex::new(Vec::new()),
            default,
            fail_first: AtomicU32::new(0),
        }
    }

    pub fn respond_for(&self, marker: &str, payload: serde_json::Value) {
        self.by_marker
            .lock()
            .unwrap()
            .push((marker.to_string(), payload));
    }

    pub fn fail_first(&self, times: u32) {
        self.fail_first.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn chat_json(&self, _system: &str, user: &str) -> Result<serde_json::Value, AiError> {
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(AiError::InvalidResponse("scripted failure".to_string()));
        }

        let by_marker = self.by_marker.lock().unwrap();
        for (marker, payload) in by_marker.iter() {
            if user.contains(marker) {
                return Ok(payload.clone());
            }
        }
        Ok(self.default.clone())
    }
}

/// Embedder fake: returns the scripted vector for texts containing a
/// marker, else a deterministic unit vector derived from the text bytes.
pub struct ScriptedEmbedder {
    dim: usize,
    by_marker: Mutex<Vec<(String, Vec<f32>)>>,
}

impl ScriptedEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            by_marker: Mutex::new(Vec::new()),
        }
    }

    pub fn embed_for(&self, marker: &str, vector: Vec<f32>) {
        self.by_marker
            .lock()
            .unwrap()
            .push((marker.to_string(), vector));
    }

    fn default_vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        if self.dim == 0 {
            return vector;
        }
        let index = text.bytes().map(|b| b as usize).sum::<usize>() % self.dim;
        vector[index] = 1.0;
        vector
    }
}

#[async_trait]
impl EmbedModel for ScriptedEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AiError> {
        let by_marker = self.by_marker.lock().unwrap();
        Ok(texts
            .iter()
            .map(|text| {
                by_marker
                    .iter()
                    .find(|(marker, _)| text.contains(marker))
                    .map(|(_, vector)| vector.clone())
                    .unwrap_or_else(|| self.default_vector(text))
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Recording delivery
// ---------------------------------------------------------------------------

/// Delivery fake that records every message and hands out sequential ids.
#[derive(Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<(i64, String)>>,
    next_id: AtomicI64,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_messages(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn send(&self, destination: i64, html: &str) -> Result<i64> {
        self.sent
            .lock()
            .unwrap()
            .push((destination, html.to_string()));
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A raw post fixture with sane defaults.
pub fn raw_post(message_id: i64, posted_at: DateTime<Utc>, text: &str) -> RawItem {
    RawItem {
        external_message_id: message_id,
        posted_at,
        edited_at: None,
        text: Some(text.to_string()),
        has_media: false,
        views: Some(100),
        forwards: Some(1),
        reactions: None,
        permalink: Some(format!("https://t.me/test/{message_id}")),
    }
}

/// A summary payload fixture as the external model would return it.
pub fn summary_payload(key_point: &str, category: &str, importance: i64) -> serde_json::Value {
    serde_json::json!({
        "key_point": key_point,
        "why_it_matters": "Open the post to judge the impact on your own setup.",
        "tags": ["News"],
        "category": category,
        "importance": importance,
    })
}
