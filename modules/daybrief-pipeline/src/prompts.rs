use daybrief_common::ContentItem;

pub const ALLOWED_TAGS: [&str; 8] = [
    "News", "Research", "Tools", "Product", "Opinion", "Safety", "Policy", "Business",
];

pub const SYSTEM_PROMPT: &str = "You are a strict summarizer. Return only valid JSON. \
    Do not include markdown. Keep key_point concise and factual. \
    why_it_matters must be exactly one sentence and must explain why the reader should open the post.";

/// Build the per-item summarization prompt. The model is asked for strict
/// JSON matching the closed category/tag vocabulary; everything it returns
/// is still validated and clamped on our side.
pub fn build_item_prompt(item: &ContentItem, source_name: &str) -> String {
    let text = item.text.as_deref().unwrap_or("").trim();
    let text_block = if text.is_empty() { "<EMPTY_TEXT>" } else { text };
    let permalink = item.permalink.as_deref().unwrap_or("");

    format!(
        "Summarize this channel post for an AI-news digest.\n\
         Return JSON with keys: key_point, why_it_matters, tags, category, importance.\n\
         Rules:\n\
         - key_point: required, <= 160 chars.\n\
         - why_it_matters: required, exactly ONE sentence, <= 200 chars.\n\
         - why_it_matters must explain why the reader should open the post now.\n\
         - why_it_matters must NOT include quotes, excerpts, or copied fragments from the post.\n\
         - tags: array, allowed values only: {tags}.\n\
         - category: one of LLM_RELEASE, PRACTICE_INSIGHT, ANALYSIS_OPINION, DEALS, OTHER_USEFUL, NOISE.\n\
         - category rules:\n\
           * LLM_RELEASE for new model/product release announcements from AI vendors.\n\
           * PRACTICE_INSIGHT for practical workflows, implementation tips, prompts, evals.\n\
           * ANALYSIS_OPINION for analysis, commentary, comparisons, long-form opinions.\n\
           * DEALS for discounts, promo access, paid offers.\n\
           * OTHER_USEFUL for useful AI updates that do not fit above.\n\
           * NOISE for ads, giveaways, games, memes, and non-AI topics.\n\
         - importance must follow category mapping:\n\
           * LLM_RELEASE => 5\n\
           * PRACTICE_INSIGHT => 4\n\
           * ANALYSIS_OPINION => 4\n\
           * DEALS => 3..4\n\
           * OTHER_USEFUL => 3\n\
           * NOISE => 1..2\n\
         Post metadata:\n\
         - item_id: {item_id}\n\
         - source: {source_name}\n\
         - posted_at: {posted_at}\n\
         - has_media: {has_media}\n\
         - permalink: {permalink}\n\
         Post text:\n\
         {text_block}\n",
        tags = ALLOWED_TAGS.join(", "),
        item_id = item.id,
        source_name = source_name,
        posted_at = item.posted_at.to_rfc3339(),
        has_media = item.has_media,
        permalink = permalink,
        text_block = text_block,
    )
}
