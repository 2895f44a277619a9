use chrono_tz::Tz;

use crate::normalize::truncate_chars;
use crate::select::{DigestData, DigestEntry, SourceSection, TopCluster};

/// Delivery transports cap message length; blocks are packed into as few
/// messages as possible without ever exceeding this.
pub const MAX_MESSAGE_LEN: usize = 3900;

const TITLE_LIMIT: usize = 120;

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn split_block(block: &str, limit: usize) -> Vec<String> {
    if block.chars().count() <= limit {
        return vec![block.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest: String = block.to_string();
    while rest.chars().count() > limit {
        let window: String = rest.chars().take(limit).collect();
        let split_at = match window.rfind('\n') {
            Some(index) if index >= limit / 3 => index,
            _ => window.len(),
        };
        let chunk = rest[..split_at].trim().to_string();
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
        rest = rest[split_at..].trim_start_matches('\n').to_string();
    }
    if !rest.trim().is_empty() {
        chunks.push(rest.trim().to_string());
    }
    if chunks.is_empty() {
        chunks.push(truncate_chars(block, limit));
    }
    chunks
}

fn append_block(messages: &mut Vec<String>, mut current: String, block: &str) -> String {
    for chunk in split_block(block, MAX_MESSAGE_LEN) {
        if current.is_empty() {
            current = chunk;
            continue;
        }
        let candidate_len = current.chars().count() + 2 + chunk.chars().count();
        if candidate_len <= MAX_MESSAGE_LEN {
            current = format!("{current}\n\n{chunk}");
        } else {
            messages.push(std::mem::take(&mut current));
            current = chunk;
        }
    }
    current
}

fn render_top_cluster(rank: usize, cluster: &TopCluster) -> String {
    let entry = &cluster.entry;
    let title = escape_html(&truncate_chars(&entry.key_point, TITLE_LIMIT));
    let mut line = format!(
        "{rank}) <b>[{category}][⭐{importance}]</b> {title}",
        category = entry.category,
        importance = entry.importance,
    );
    if cluster.size > 1 {
        line.push_str(&format!(" (×{})", cluster.size));
    }
    if let Some(permalink) = &entry.permalink {
        line.push_str(&format!(" <a href=\"{}\">🔗</a>", escape_html(permalink)));
    }
    if let Some(why) = &entry.why_it_matters {
        line.push_str(&format!("\n   — {}", escape_html(why)));
    }
    line
}

fn render_post(entry: &DigestEntry, tz: Tz) -> String {
    let posted_time = entry.posted_at.with_timezone(&tz).format("%H:%M");
    let key_point = escape_html(&truncate_chars(&entry.key_point, TITLE_LIMIT));
    let mut line = format!(
        "• <b>{posted_time}</b> [{category}][⭐{importance}] {key_point}",
        category = entry.category,
        importance = entry.importance,
    );
    if let Some(permalink) = &entry.permalink {
        line.push_str(&format!(" <a href=\"{}\">🔗</a>", escape_html(permalink)));
    }
    if let Some(why) = &entry.why_it_matters {
        line.push_str(&format!("\n  — {}", escape_html(why)));
    }
    line
}

fn render_section(section: &SourceSection, tz: Tz) -> String {
    let mut lines = vec![format!(
        "<b>{}</b> — {} of {} posts",
        escape_html(&section.source_name),
        section.posts.len(),
        section.total_posts,
    )];

    if section.posts.is_empty() {
        lines.push("No posts matching the signal criteria in this window.".to_string());
    } else {
        for entry in &section.posts {
            lines.push(render_post(entry, tz));
        }
    }

    if section.hidden_posts > 0 {
        lines.push(format!(
            "<i>Hidden: {} low-value posts</i>",
            section.hidden_posts
        ));
    }
    lines.join("\n")
}

/// Render the digest into HTML messages, each within the transport's length
/// cap. Returns at least one message whenever there is anything to say.
pub fn render_digest_html(data: &DigestData) -> Vec<String> {
    let tz: Tz = data
        .header
        .timezone
        .parse()
        .unwrap_or(chrono_tz::UTC);
    let start = data.header.start_at.with_timezone(&tz).format("%Y-%m-%d %H:%M");
    let end = data.header.end_at.with_timezone(&tz).format("%Y-%m-%d %H:%M");

    let title = format!(
        "<b>AI Digest</b> — {date}\n<i>Window: {start} → {end} ({tz})</i>\n\n<b>Top-{limit} of the day (no duplicates)</b>",
        date = escape_html(&data.header.digest_date),
        tz = escape_html(&data.header.timezone),
        limit = data.top_limit,
    );

    let mut messages: Vec<String> = Vec::new();
    let mut current = title;

    if data.top_clusters.is_empty() {
        current = append_block(&mut messages, current, "— Nothing cleared the bar today");
    } else {
        for (index, cluster) in data.top_clusters.iter().enumerate() {
            let block = render_top_cluster(index + 1, cluster);
            current = append_block(&mut messages, current, &block);
        }
    }

    for section in &data.sections {
        let block = render_section(section, tz);
        current = append_block(&mut messages, current, &block);
    }

    if !current.is_empty() {
        messages.push(current);
    }
    messages
}
