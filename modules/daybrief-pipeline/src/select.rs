use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use daybrief_common::{
    Category, ClusterItemRecord, Config, DaybriefError, DigestItemRecord, Source, Tag,
};

use crate::traits::Store;

/// Selection knobs, derived from [`Config`]. Global and per-source
/// thresholds are independent so the per-source view can be more permissive
/// than the curated cross-source top.
#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    pub top_n: usize,
    pub source_top_k: usize,
    pub min_importance_global: u8,
    pub min_importance_source: u8,
    pub timezone: String,
}

impl SelectionPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_n: config.digest_top_n,
            source_top_k: config.source_top_k,
            min_importance_global: config.min_importance_global,
            min_importance_source: config.min_importance_source,
            timezone: config.timezone.clone(),
        }
    }
}

/// One ranked digest entry, with summary fields coalesced so unsummarized
/// items still rank (at floor importance, below every signal threshold).
#[derive(Debug, Clone)]
pub struct DigestEntry {
    pub item_id: i64,
    pub posted_at: DateTime<Utc>,
    pub category: Category,
    pub importance: u8,
    pub key_point: String,
    pub why_it_matters: Option<String>,
    pub tags: Vec<Tag>,
    pub permalink: Option<String>,
    pub content_hash: String,
    pub source: String,
}

/// A global top entry: a cluster represented by one entry plus its size.
#[derive(Debug, Clone)]
pub struct TopCluster {
    pub entry: DigestEntry,
    pub size: usize,
}

/// Per-source section with the signal survivors and a hidden count for
/// transparency.
#[derive(Debug, Clone)]
pub struct SourceSection {
    pub source_id: i64,
    pub source_name: String,
    pub posts: Vec<DigestEntry>,
    pub hidden_posts: usize,
    pub total_posts: usize,
}

#[derive(Debug, Clone)]
pub struct DigestHeader {
    pub digest_date: String,
    pub timezone: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DigestData {
    pub header: DigestHeader,
    pub top_clusters: Vec<TopCluster>,
    pub sections: Vec<SourceSection>,
    pub top_limit: usize,
}

/// Build the digest selection for a window. Global top comes from the
/// dedup clusters when they exist; otherwise raw items are ranked directly,
/// de-duplicated only by exact content hash.
pub async fn build_digest_data(
    store: &dyn Store,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    window_id: Option<i64>,
    policy: &SelectionPolicy,
) -> anyhow::Result<DigestData> {
    let timezone: Tz = policy
        .timezone
        .parse()
        .map_err(|_| DaybriefError::Config(format!("unknown timezone: {}", policy.timezone)))?;

    let items = store.digest_items(start_at, end_at).await?;
    let sources = store.active_sources().await?;

    let cluster_records = match window_id {
        Some(window_id) => store.cluster_records(window_id).await?,
        None => Vec::new(),
    };

    let top_clusters = if cluster_records.is_empty() {
        top_from_raw_items(&items, policy)
    } else {
        top_from_clusters(&cluster_records, policy)
    };

    let sections = build_sections(&sources, &items, policy);

    Ok(DigestData {
        header: DigestHeader {
            digest_date: end_at.with_timezone(&timezone).date_naive().to_string(),
            timezone: policy.timezone.clone(),
            start_at,
            end_at,
        },
        top_clusters,
        sections,
        top_limit: policy.top_n,
    })
}

/// Coalesce an item with its optional summary into a rankable entry.
/// Missing summaries get floor importance 2 and the default tag, so they
/// never pass a signal threshold but still render in permissive setups.
pub fn coalesce(record: &DigestItemRecord) -> DigestEntry {
    let text = record.text.as_deref().unwrap_or("");
    let (key_point, why_it_matters, tags, category, importance) = match &record.summary {
        Some(summary) => (
            if summary.key_point.trim().is_empty() {
                fallback_key_point(text)
            } else {
                summary.key_point.clone()
            },
            summary.why_it_matters.clone().filter(|why| !why.trim().is_empty()),
            if summary.tags.is_empty() {
                vec![Tag::News]
            } else {
                summary.tags.clone()
            },
            summary.category,
            summary.importance.clamp(1, 5),
        ),
        None => (
            fallback_key_point(text),
            None,
            vec![Tag::News],
            Category::OtherUseful,
            2,
        ),
    };

    DigestEntry {
        item_id: record.item_id,
        posted_at: record.posted_at,
        category,
        importance,
        key_point,
        why_it_matters,
        tags,
        permalink: record.permalink.clone(),
        content_hash: record.content_hash.clone(),
        source: record.source_name(),
    }
}

fn fallback_key_point(text: &str) -> String {
    let compact = text.trim();
    if compact.is_empty() {
        return "Post without text".to_string();
    }
    crate::normalize::truncate_chars(compact, 120)
}

fn is_signal(entry: &DigestEntry, min_importance: u8) -> bool {
    !entry.category.is_noise() && entry.importance >= min_importance
}

/// Deterministic ranking: importance desc, recency desc, id asc as the
/// final stable tie-break.
fn rank_order(a: &DigestEntry, b: &DigestEntry) -> Ordering {
    b.importance
        .cmp(&a.importance)
        .then_with(|| b.posted_at.cmp(&a.posted_at))
        .then_with(|| a.item_id.cmp(&b.item_id))
}

fn top_from_clusters(records: &[ClusterItemRecord], policy: &SelectionPolicy) -> Vec<TopCluster> {
    let mut grouped: BTreeMap<i64, Vec<&ClusterItemRecord>> = BTreeMap::new();
    for record in records {
        grouped.entry(record.cluster_id).or_default().push(record);
    }

    let mut ranked: Vec<TopCluster> = grouped
        .values()
        .filter_map(|rows| {
            let representative = pick_representative(rows)?;
            Some(TopCluster {
                entry: coalesce(&representative.item),
                size: rows.len(),
            })
        })
        .filter(|cluster| is_signal(&cluster.entry, policy.min_importance_global))
        .collect();

    ranked.sort_by(|a, b| rank_order(&a.entry, &b.entry));
    ranked.truncate(policy.top_n);
    ranked
}

/// The cluster's designated representative when its row is present,
/// otherwise the highest-importance, most recent member.
fn pick_representative<'a>(rows: &[&'a ClusterItemRecord]) -> Option<&'a ClusterItemRecord> {
    if let Some(preferred_id) = rows.first().and_then(|row| row.representative_item_id) {
        if let Some(row) = rows.iter().find(|row| row.item.item_id == preferred_id) {
            return Some(*row);
        }
    }

    rows.iter()
        .max_by(|a, b| {
            let entry_a = coalesce(&a.item);
            let entry_b = coalesce(&b.item);
            entry_a
                .importance
                .cmp(&entry_b.importance)
                .then_with(|| entry_a.posted_at.cmp(&entry_b.posted_at))
                .then_with(|| entry_b.item_id.cmp(&entry_a.item_id))
        })
        .copied()
}

/// Fallback when the dedup stage has not run: rank raw items, dropping
/// exact-hash duplicates after ranking so the best copy survives.
fn top_from_raw_items(items: &[DigestItemRecord], policy: &SelectionPolicy) -> Vec<TopCluster> {
    let mut entries: Vec<DigestEntry> = items
        .iter()
        .map(coalesce)
        .filter(|entry| is_signal(entry, policy.min_importance_global))
        .collect();
    entries.sort_by(rank_order);

    let mut seen_hashes = std::collections::HashSet::new();
    let mut selected = Vec::new();
    for entry in entries {
        if !seen_hashes.insert(entry.content_hash.clone()) {
            continue;
        }
        selected.push(TopCluster { entry, size: 1 });
        if selected.len() >= policy.top_n {
            break;
        }
    }
    selected
}

fn build_sections(
    sources: &[Source],
    items: &[DigestItemRecord],
    policy: &SelectionPolicy,
) -> Vec<SourceSection> {
    let mut by_source: BTreeMap<i64, Vec<&DigestItemRecord>> = BTreeMap::new();
    for item in items {
        by_source.entry(item.source_id).or_default().push(item);
    }

    sources
        .iter()
        .map(|source| {
            let records = by_source.get(&source.id).map(Vec::as_slice).unwrap_or(&[]);
            let total_posts = records.len();

            let mut posts: Vec<DigestEntry> = records
                .iter()
                .map(|record| coalesce(record))
                .filter(|entry| is_signal(entry, policy.min_importance_source))
                .collect();
            posts.sort_by(rank_order);
            posts.truncate(policy.source_top_k);

            SourceSection {
                source_id: source.id,
                source_name: source.display_name(),
                hidden_posts: total_posts - posts.len(),
                total_posts,
                posts,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use daybrief_common::SummaryContent;

    fn policy() -> SelectionPolicy {
        SelectionPolicy {
            top_n: 2,
            source_top_k: 2,
            min_importance_global: 4,
            min_importance_source: 3,
            timezone: "Europe/Riga".to_string(),
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 7, hour, minute, 0).unwrap()
    }

    fn record(
        item_id: i64,
        source_id: i64,
        posted_at: DateTime<Utc>,
        importance: u8,
        category: Category,
        content_hash: &str,
    ) -> DigestItemRecord {
        DigestItemRecord {
            item_id,
            source_id,
            source_title: format!("Source {source_id}"),
            source_username: Some(format!("src{source_id}")),
            posted_at,
            text: Some(format!("text-{item_id}")),
            permalink: Some(format!("https://t.me/src{source_id}/{item_id}")),
            content_hash: content_hash.to_string(),
            summary: Some(SummaryContent {
                key_point: format!("kp-{item_id}"),
                why_it_matters: Some(format!("why-{item_id}.")),
                tags: vec![Tag::News],
                category,
                importance,
            }),
        }
    }

    fn cluster_row(
        cluster_id: i64,
        representative_item_id: Option<i64>,
        item: DigestItemRecord,
    ) -> ClusterItemRecord {
        ClusterItemRecord {
            cluster_id,
            representative_item_id,
            similarity: Some(0.9),
            item,
        }
    }

    fn source(id: i64) -> Source {
        Source {
            id,
            external_peer_id: 1000 + id,
            username: Some(format!("src{id}")),
            title: format!("Source {id}"),
            is_active: true,
            added_at: at(0, 0),
            last_fetched_at: None,
        }
    }

    #[test]
    fn sections_apply_top_k_and_hidden_counts() {
        let items = vec![
            record(1, 1, at(10, 0), 4, Category::OtherUseful, "h1"),
            record(2, 1, at(11, 0), 4, Category::PracticeInsight, "h2"),
            record(3, 1, at(12, 0), 5, Category::LlmRelease, "h3"),
            record(4, 1, at(12, 30), 5, Category::Noise, "h4"),
            record(5, 1, at(13, 0), 2, Category::OtherUseful, "h5"),
            record(6, 2, at(9, 0), 2, Category::OtherUseful, "h6"),
            record(7, 2, at(9, 30), 1, Category::Noise, "h7"),
        ];
        let sources = vec![source(1), source(2)];

        let sections = build_sections(&sources, &items, &policy());

        let first = &sections[0];
        let shown: Vec<i64> = first.posts.iter().map(|post| post.item_id).collect();
        assert_eq!(shown, vec![3, 2]);
        assert_eq!(first.hidden_posts, 3);
        assert_eq!(first.total_posts, 5);

        let second = &sections[1];
        assert!(second.posts.is_empty());
        assert_eq!(second.hidden_posts, 2);
        assert_eq!(second.total_posts, 2);
    }

    #[test]
    fn global_top_uses_cluster_representatives_and_signal_filter() {
        let rows = vec![
            cluster_row(1, Some(11), record(11, 1, at(10, 0), 5, Category::LlmRelease, "h11")),
            cluster_row(2, Some(21), record(21, 1, at(11, 0), 5, Category::Noise, "h21")),
            cluster_row(3, Some(31), record(31, 1, at(12, 0), 4, Category::AnalysisOpinion, "h31")),
            cluster_row(4, Some(41), record(41, 1, at(13, 0), 3, Category::OtherUseful, "h41")),
            cluster_row(5, Some(51), record(51, 1, at(14, 0), 3, Category::OtherUseful, "h51")),
            cluster_row(5, Some(51), record(52, 1, at(14, 5), 5, Category::LlmRelease, "h52")),
        ];

        let mut permissive = policy();
        permissive.top_n = 5;
        let top = top_from_clusters(&rows, &permissive);

        let ids: Vec<i64> = top.iter().map(|cluster| cluster.entry.item_id).collect();
        assert_eq!(ids, vec![11, 31]);
        assert!(top.iter().all(|cluster| !cluster.entry.category.is_noise()));
        assert!(top.iter().all(|cluster| cluster.entry.importance >= 4));
    }

    #[test]
    fn missing_representative_row_falls_back_to_best_member() {
        let rows = vec![
            cluster_row(1, Some(99), record(11, 1, at(10, 0), 4, Category::PracticeInsight, "h11")),
            cluster_row(1, Some(99), record(12, 1, at(11, 0), 5, Category::LlmRelease, "h12")),
        ];
        let top = top_from_clusters(&rows, &policy());
        assert_eq!(top[0].entry.item_id, 12);
        assert_eq!(top[0].size, 2);
    }

    #[test]
    fn fallback_ranking_dedups_by_exact_hash() {
        let items = vec![
            record(1, 1, at(10, 0), 5, Category::LlmRelease, "same"),
            record(2, 1, at(11, 0), 5, Category::LlmRelease, "same"),
            record(3, 1, at(9, 0), 4, Category::PracticeInsight, "other"),
        ];
        let top = top_from_raw_items(&items, &policy());

        // Item 2 wins the hash group on recency; item 1 is dropped as an
        // exact duplicate, item 3 fills the remaining slot.
        let ids: Vec<i64> = top.iter().map(|cluster| cluster.entry.item_id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn top_output_is_bounded_and_sorted() {
        let items: Vec<DigestItemRecord> = (1..=6)
            .map(|id| {
                record(
                    id,
                    1,
                    at(8 + id as u32, 0),
                    if id % 2 == 0 { 5 } else { 4 },
                    Category::LlmRelease,
                    &format!("h{id}"),
                )
            })
            .collect();
        let top = top_from_raw_items(&items, &policy());

        assert!(top.len() <= 2);
        assert_eq!(top[0].entry.importance, 5);
        assert!(top[0].entry.posted_at >= top[1].entry.posted_at || top[0].entry.importance > top[1].entry.importance);
    }

    #[test]
    fn unsummarized_items_rank_below_signal_thresholds() {
        let mut raw = record(1, 1, at(10, 0), 5, Category::LlmRelease, "h1");
        raw.summary = None;
        let entry = coalesce(&raw);
        assert_eq!(entry.importance, 2);
        assert_eq!(entry.category, Category::OtherUseful);
        assert!(!is_signal(&entry, 3));
    }
}
