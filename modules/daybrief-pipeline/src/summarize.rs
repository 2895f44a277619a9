use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{info, warn};

use ai_client::{ChatModel, RetryPolicy};
use daybrief_common::{Category, SummaryContent, Tag};

use crate::prompts::{build_item_prompt, SYSTEM_PROMPT};
use crate::stats::SummarizeStats;
use crate::traits::Store;

/// Minimum length (in words) of a verbatim run from the source text that
/// disqualifies a `why_it_matters` sentence.
const PLAGIARISM_RUN_WORDS: usize = 6;

/// Vocabulary that marks promotional/noise content.
const NOISE_VOCAB: [&str; 14] = [
    "giveaway", "contest", "promo", "promotion", "discount", "casino", "meme", "memes",
    "subscribe", "prize", "prizes", "lottery", "airdrop", "referral",
];

/// Vocabulary that marks on-topic content; its presence vetoes the noise
/// override even when promotional words appear.
const DOMAIN_VOCAB: [&str; 18] = [
    "ai", "llm", "llms", "model", "models", "agent", "agents", "benchmark", "dataset",
    "prompt", "inference", "gpu", "release", "api", "training", "paper", "research",
    "embedding",
];

/// Produce a summary for every item in the window that lacks one. Exact
/// duplicates (same content hash, any window) reuse the existing summary
/// verbatim instead of a model call.
pub async fn run_summarize(
    store: &dyn Store,
    model: &dyn ChatModel,
    policy: &RetryPolicy,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
) -> anyhow::Result<SummarizeStats> {
    let total_in_window = store.count_items_in_window(start_at, end_at).await?;
    let items = store.items_missing_summary(start_at, end_at).await?;

    let source_names: HashMap<i64, String> = store
        .active_sources()
        .await?
        .into_iter()
        .map(|source| (source.id, source.display_name()))
        .collect();

    let mut stats = SummarizeStats {
        total_candidates: items.len() as u32,
        skipped_existing: (total_in_window as u32).saturating_sub(items.len() as u32),
        ..SummarizeStats::default()
    };

    let total = items.len();
    for (index, item) in items.into_iter().enumerate() {
        // Exact-dedup reuse: global hash lookup, copied verbatim.
        if let Some((source_item_id, content)) =
            store.find_summary_by_hash(&item.content_hash).await?
        {
            store.upsert_summary(item.id, &content).await?;
            info!(
                source_item_id,
                target_item_id = item.id,
                content_hash = item.content_hash.as_str(),
                "Copied exact-duplicate summary"
            );
            stats.copied_exact_dup += 1;
            continue;
        }

        let source_name = source_names
            .get(&item.source_id)
            .cloned()
            .unwrap_or_default();
        let prompt = build_item_prompt(&item, &source_name);

        let payload = policy
            .run("summarize", || model.chat_json(SYSTEM_PROMPT, &prompt))
            .await;

        match payload {
            Ok(value) => {
                let content = normalize_summary_payload(&value, item.text.as_deref().unwrap_or(""));
                store.upsert_summary(item.id, &content).await?;
                stats.summarized += 1;
            }
            Err(err) => {
                warn!(item_id = item.id, error = %err, "Summarization failed for item");
                stats.errors += 1;
            }
        }

        if index + 1 < total {
            let pause = Duration::from_millis(rand::rng().random_range(100..300));
            tokio::time::sleep(pause).await;
        }
    }

    Ok(stats)
}

/// Validate and normalize whatever the external model returned into the
/// closed vocabulary: unknown categories land in the default bucket,
/// importance is clamped into the category band, the why-sentence is
/// replaced by a category fallback when empty, multi-sentence, or copying
/// the source, and obvious noise overrides the model's classification.
pub fn normalize_summary_payload(payload: &serde_json::Value, source_text: &str) -> SummaryContent {
    let raw_key_point = payload["key_point"].as_str().unwrap_or("").trim();
    let key_point = if raw_key_point.is_empty() {
        fallback_key_point(source_text)
    } else {
        raw_key_point.to_string()
    };

    let mut category = Category::from_external(payload["category"].as_str().unwrap_or(""));

    // Defense in depth: promotional vocabulary without any domain vocabulary
    // forces the lowest-priority bucket regardless of the model's answer.
    if is_noise_text(source_text) || is_noise_text(&key_point) {
        category = Category::Noise;
    }

    let importance = category.clamp_importance(payload["importance"].as_i64().unwrap_or(3));

    let mut tags: Vec<Tag> = Vec::new();
    if let Some(raw_tags) = payload["tags"].as_array() {
        for raw in raw_tags {
            if let Some(name) = raw.as_str() {
                let tag = Tag::from_external(name);
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
        }
    }
    if tags.is_empty() {
        tags.push(Tag::News);
    }

    let why_it_matters = sanitize_why(
        payload["why_it_matters"].as_str().unwrap_or(""),
        source_text,
        category,
    );

    SummaryContent {
        key_point,
        why_it_matters: Some(why_it_matters),
        tags,
        category,
        importance,
    }
}

fn fallback_key_point(source_text: &str) -> String {
    let compact = source_text.trim();
    if compact.is_empty() {
        return "Post without text".to_string();
    }
    crate::normalize::truncate_chars(compact, 160)
}

/// The why-sentence is analysis, never quotation. Anything empty,
/// multi-sentence, or sharing a long verbatim run with the source is
/// replaced wholesale by the category fallback.
fn sanitize_why(raw: &str, source_text: &str, category: Category) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return fallback_why(category);
    }
    if sentence_count(trimmed) > 1 {
        return fallback_why(category);
    }
    if has_verbatim_run(trimmed, source_text, PLAGIARISM_RUN_WORDS) {
        return fallback_why(category);
    }

    if trimmed.ends_with(['.', '!', '?']) {
        trimmed.to_string()
    } else {
        format!("{trimmed}.")
    }
}

fn fallback_why(category: Category) -> String {
    let sentence = match category {
        Category::LlmRelease => "Open the post to see what shipped and whether it affects your stack.",
        Category::PracticeInsight => "Open the post to lift a working technique into your own workflow.",
        Category::AnalysisOpinion => "Open the post for the reasoning behind the headline.",
        Category::Deals => "Open the post to check the offer before it expires.",
        Category::OtherUseful => "Open the post for the practical details.",
        Category::Noise => "Skip unless you have time to spare.",
    };
    sentence.to_string()
}

fn sentence_count(text: &str) -> usize {
    text.chars().filter(|c| matches!(c, '.' | '!' | '?')).count().max(1)
}

fn words_of(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| word.to_lowercase())
        .collect()
}

/// True when `candidate` contains a run of `run_len` or more consecutive
/// words that also appear consecutively in `source`.
fn has_verbatim_run(candidate: &str, source: &str, run_len: usize) -> bool {
    let candidate_words = words_of(candidate);
    let source_words = words_of(source);
    if candidate_words.len() < run_len || source_words.len() < run_len {
        return false;
    }

    for window in candidate_words.windows(run_len) {
        if source_words
            .windows(run_len)
            .any(|source_window| source_window == window)
        {
            return true;
        }
    }
    false
}

fn is_noise_text(text: &str) -> bool {
    let words: HashSet<String> = words_of(text).into_iter().collect();
    let has_noise = NOISE_VOCAB.iter().any(|word| words.contains(*word));
    let has_domain = DOMAIN_VOCAB.iter().any(|word| words.contains(*word));
    has_noise && !has_domain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(category: &str, importance: i64) -> serde_json::Value {
        serde_json::json!({
            "key_point": "A short description of the update.",
            "why_it_matters": "Open the post to judge the practical impact on your work.",
            "tags": ["News"],
            "category": category,
            "importance": importance,
        })
    }

    #[test]
    fn category_importance_mapping() {
        let cases = [
            ("LLM_RELEASE", 1, Category::LlmRelease, 5),
            ("PRACTICE_INSIGHT", 2, Category::PracticeInsight, 4),
            ("ANALYSIS_OPINION", 5, Category::AnalysisOpinion, 4),
            ("DEALS", 5, Category::Deals, 4),
            ("DEALS", 2, Category::Deals, 3),
            ("OTHER_USEFUL", 5, Category::OtherUseful, 3),
            ("NOISE", 5, Category::Noise, 2),
            ("NOISE", 0, Category::Noise, 1),
        ];

        for (raw_category, raw_importance, expected_category, expected_importance) in cases {
            let summary =
                normalize_summary_payload(&payload(raw_category, raw_importance), "AI release notes");
            assert_eq!(summary.category, expected_category);
            assert_eq!(summary.importance, expected_importance);
        }
    }

    #[test]
    fn unknown_category_defaults_to_other_useful() {
        let summary =
            normalize_summary_payload(&payload("SOMETHING_ELSE", 1), "tool update for llm workflows");
        assert_eq!(summary.category, Category::OtherUseful);
        assert_eq!(summary.importance, 3);
    }

    #[test]
    fn multi_sentence_why_replaced_by_fallback() {
        let mut value = payload("OTHER_USEFUL", 3);
        value["why_it_matters"] =
            serde_json::json!("Open the post for value. The second phrase is unnecessary!");
        let summary = normalize_summary_payload(&value, "tool update for llm workflows");
        let why = summary.why_it_matters.unwrap();
        assert_eq!(why, fallback_why(Category::OtherUseful));
        assert!(!why.contains("second phrase"));
    }

    #[test]
    fn noise_detection_overrides_category_and_importance() {
        let mut value = payload("PRACTICE_INSIGHT", 5);
        value["key_point"] = serde_json::json!("Giveaway with memes and prizes.");
        let summary = normalize_summary_payload(
            &value,
            "Big giveaway, memes and a contest for subscribers",
        );
        assert_eq!(summary.category, Category::Noise);
        assert!((1..=2).contains(&summary.importance));
    }

    #[test]
    fn domain_vocabulary_vetoes_noise_override() {
        let summary = normalize_summary_payload(
            &payload("PRACTICE_INSIGHT", 4),
            "Subscribe to try the new LLM benchmark we released",
        );
        assert_eq!(summary.category, Category::PracticeInsight);
    }

    #[test]
    fn why_copying_source_fragment_uses_fallback() {
        let source =
            "The new model is available today in the API and supports long context for complex tasks.";
        let mut value = payload("LLM_RELEASE", 5);
        value["why_it_matters"] = serde_json::json!(source);
        let summary = normalize_summary_payload(&value, source);
        let why = summary.why_it_matters.unwrap();
        assert!(why.starts_with("Open the post"));
        assert!(why.ends_with('.'));
        assert_ne!(why, source);
    }

    #[test]
    fn empty_why_uses_fallback_and_missing_period_is_added() {
        let mut value = payload("DEALS", 3);
        value["why_it_matters"] = serde_json::json!("");
        let summary = normalize_summary_payload(&value, "discounted llm credits");
        assert_eq!(summary.why_it_matters.unwrap(), fallback_why(Category::Deals));

        let mut value = payload("DEALS", 3);
        value["why_it_matters"] = serde_json::json!("Open the post to grab the credits");
        let summary = normalize_summary_payload(&value, "discounted llm credits");
        assert_eq!(
            summary.why_it_matters.unwrap(),
            "Open the post to grab the credits."
        );
    }

    #[test]
    fn empty_key_point_falls_back_to_truncated_text() {
        let mut value = payload("OTHER_USEFUL", 3);
        value["key_point"] = serde_json::json!("");
        let summary = normalize_summary_payload(&value, "short llm note");
        assert_eq!(summary.key_point, "short llm note");

        let summary = normalize_summary_payload(&value, "");
        assert_eq!(summary.key_point, "Post without text");
    }
}
