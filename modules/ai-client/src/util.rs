/// Strip markdown code fences from a model response.
pub fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Extract the first JSON object from a model response. Tolerates code
/// fences and prose around the object.
pub fn extract_json_object(raw: &str) -> Option<serde_json::Value> {
    let text = strip_code_blocks(raw);
    if text.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        if value.is_object() {
            return Some(value);
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<serde_json::Value>(&text[start..=end])
        .ok()
        .filter(|value| value.is_object())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("{}"), "{}");
    }

    #[test]
    fn extracts_object_from_fenced_response() {
        let value = extract_json_object("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn extracts_object_surrounded_by_prose() {
        let value = extract_json_object("Here you go: {\"key\": \"v\"} hope it helps").unwrap();
        assert_eq!(value["key"], "v");
    }

    #[test]
    fn rejects_non_object_payloads() {
        assert!(extract_json_object("[1, 2, 3]").is_none());
        assert!(extract_json_object("").is_none());
        assert!(extract_json_object("no json here").is_none());
    }
}
