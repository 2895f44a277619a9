use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DaybriefError;

// --- Closed vocabularies ---

/// Editorial category assigned by the summarizer. Closed set; anything the
/// external model returns outside it maps to [`Category::OtherUseful`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    LlmRelease,
    PracticeInsight,
    AnalysisOpinion,
    Deals,
    OtherUseful,
    Noise,
}

impl Category {
    /// Map an externally-returned category string onto the closed set.
    /// Unknown values land in the default bucket.
    pub fn from_external(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LLM_RELEASE" => Category::LlmRelease,
            "PRACTICE_INSIGHT" => Category::PracticeInsight,
            "ANALYSIS_OPINION" => Category::AnalysisOpinion,
            "DEALS" => Category::Deals,
            "NOISE" => Category::Noise,
            _ => Category::OtherUseful,
        }
    }

    /// The importance band `[low, high]` this category admits.
    pub fn importance_band(&self) -> (u8, u8) {
        match self {
            Category::LlmRelease => (5, 5),
            Category::PracticeInsight => (4, 4),
            Category::AnalysisOpinion => (4, 4),
            Category::Deals => (3, 4),
            Category::OtherUseful => (3, 3),
            Category::Noise => (1, 2),
        }
    }

    /// Clamp an externally-returned importance into this category's band.
    pub fn clamp_importance(&self, raw: i64) -> u8 {
        let (low, high) = self.importance_band();
        raw.clamp(low as i64, high as i64) as u8
    }

    pub fn is_noise(&self) -> bool {
        matches!(self, Category::Noise)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::LlmRelease => "LLM_RELEASE",
            Category::PracticeInsight => "PRACTICE_INSIGHT",
            Category::AnalysisOpinion => "ANALYSIS_OPINION",
            Category::Deals => "DEALS",
            Category::OtherUseful => "OTHER_USEFUL",
            Category::Noise => "NOISE",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topic tag attached to a summary. Closed set; unknown external values map
/// to [`Tag::News`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    News,
    Research,
    Tools,
    Product,
    Opinion,
    Safety,
    Policy,
    Business,
}

impl Tag {
    pub fn from_external(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "research" => Tag::Research,
            "tools" => Tag::Tools,
            "product" => Tag::Product,
            "opinion" => Tag::Opinion,
            "safety" => Tag::Safety,
            "policy" => Tag::Policy,
            "business" => Tag::Business,
            _ => Tag::News,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::News => "News",
            Tag::Research => "Research",
            Tag::Tools => "Tools",
            Tag::Product => "Product",
            Tag::Opinion => "Opinion",
            Tag::Safety => "Safety",
            Tag::Policy => "Policy",
            Tag::Business => "Business",
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Window ---

/// Pipeline progress marker for a window. The orchestrator is the only
/// writer and advances it strictly forward within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    New,
    Ingested,
    Summarized,
    Embedded,
    Deduped,
    Published,
    Failed,
}

impl WindowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowStatus::New => "new",
            WindowStatus::Ingested => "ingested",
            WindowStatus::Summarized => "summarized",
            WindowStatus::Embedded => "embedded",
            WindowStatus::Deduped => "deduped",
            WindowStatus::Published => "published",
            WindowStatus::Failed => "failed",
        }
    }

    /// Strict parse. An unknown persisted status is a validation error, not
    /// a silent default.
    pub fn parse(raw: &str) -> Result<Self, DaybriefError> {
        match raw {
            "new" => Ok(WindowStatus::New),
            "ingested" => Ok(WindowStatus::Ingested),
            "summarized" => Ok(WindowStatus::Summarized),
            "embedded" => Ok(WindowStatus::Embedded),
            "deduped" => Ok(WindowStatus::Deduped),
            "published" => Ok(WindowStatus::Published),
            "failed" => Ok(WindowStatus::Failed),
            other => Err(DaybriefError::Validation(format!(
                "unknown window status: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for WindowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One 24-hour batch boundary, half-open `[start_at, end_at)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub id: i64,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: WindowStatus,
    pub created_at: DateTime<Utc>,
}

// --- Sources and items ---

/// A registered content source (channel). Only active sources are ingested
/// and rendered.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: i64,
    pub external_peer_id: i64,
    pub username: Option<String>,
    pub title: String,
    pub is_active: bool,
    pub added_at: DateTime<Utc>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl Source {
    /// Display name: `@username` when present, else the stored title.
    pub fn display_name(&self) -> String {
        match self.username.as_deref() {
            Some(username) if !username.trim_start_matches('@').is_empty() => {
                format!("@{}", username.trim_start_matches('@'))
            }
            _ => self.title.clone(),
        }
    }
}

/// One ingested unit of source content.
#[derive(Debug, Clone)]
pub struct ContentItem {
    pub id: i64,
    pub source_id: i64,
    pub external_message_id: i64,
    pub posted_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub has_media: bool,
    pub views: Option<i64>,
    pub forwards: Option<i64>,
    pub reactions: Option<serde_json::Value>,
    pub permalink: Option<String>,
    pub content_hash: String,
    pub lang: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Upsert payload for a content item; the store resolves the surrogate id.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub source_id: i64,
    pub external_message_id: i64,
    pub posted_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub has_media: bool,
    pub views: Option<i64>,
    pub forwards: Option<i64>,
    pub reactions: Option<serde_json::Value>,
    pub permalink: Option<String>,
    pub content_hash: String,
    pub lang: Option<String>,
}

// --- Summaries ---

/// Normalized summary content, detached from any particular item so it can
/// be copied verbatim between exact-duplicate items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryContent {
    pub key_point: String,
    pub why_it_matters: Option<String>,
    pub tags: Vec<Tag>,
    pub category: Category,
    pub importance: u8,
}

/// A summary row bound to its item.
#[derive(Debug, Clone)]
pub struct ItemSummary {
    pub item_id: i64,
    pub content: SummaryContent,
    pub created_at: DateTime<Utc>,
}

// --- Clusters ---

/// A semantic-duplicate cluster scoped to one window.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: i64,
    pub window_id: i64,
    pub representative_item_id: Option<i64>,
    pub label: Option<String>,
}

/// Membership of one item in one cluster, with cosine similarity relative to
/// the cluster representative (1.0 for the representative itself).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterMember {
    pub item_id: i64,
    pub similarity: f64,
}

// --- Read models ---

/// A clustering candidate: an embedded item with its ranking attributes.
/// The store returns candidates already in priority order
/// (importance DESC NULLS LAST, posted_at ASC, id ASC).
#[derive(Debug, Clone)]
pub struct DedupCandidate {
    pub item_id: i64,
    pub posted_at: DateTime<Utc>,
    pub embedding: Vec<f32>,
    pub importance: Option<u8>,
}

/// A nearest-neighbor hit from the similarity query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarItem {
    pub item_id: i64,
    pub similarity: f64,
}

/// One item joined with its source and (optional) summary, as read by the
/// digest selection stage.
#[derive(Debug, Clone)]
pub struct DigestItemRecord {
    pub item_id: i64,
    pub source_id: i64,
    pub source_title: String,
    pub source_username: Option<String>,
    pub posted_at: DateTime<Utc>,
    pub text: Option<String>,
    pub permalink: Option<String>,
    pub content_hash: String,
    pub summary: Option<SummaryContent>,
}

impl DigestItemRecord {
    /// Display name of the originating source.
    pub fn source_name(&self) -> String {
        match self.source_username.as_deref() {
            Some(username) if !username.trim_start_matches('@').is_empty() => {
                format!("@{}", username.trim_start_matches('@'))
            }
            _ => self.source_title.clone(),
        }
    }
}

/// One cluster membership row joined with the member item, as read by the
/// digest selection stage.
#[derive(Debug, Clone)]
pub struct ClusterItemRecord {
    pub cluster_id: i64,
    pub representative_item_id: Option<i64>,
    pub similarity: Option<f64>,
    pub item: DigestItemRecord,
}

// --- Digest ---

/// The persisted digest for one window. A non-null `published_at` is the
/// durable publish-idempotency marker.
#[derive(Debug, Clone)]
pub struct DigestRecord {
    pub id: i64,
    pub window_id: i64,
    pub destination_id: i64,
    pub message_ids: Vec<i64>,
    pub content: String,
    pub stats: Option<serde_json::Value>,
    pub published_at: Option<DateTime<Utc>>,
}
