/// Citation marker written into prompts and expected back in model output.
pub const MARKER_PREFIX: &str = "[[chunk:";
const MARKER_SUFFIX: &str = "]]";

pub fn marker(chunk_id: &str) -> String {
    format!("{MARKER_PREFIX}{chunk_id}{MARKER_SUFFIX}")
}

/// Parse `[[chunk:<id>]]` markers, in order of first appearance, without duplicates.
pub fn extract_cited_chunk_ids(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find(MARKER_PREFIX) {
        let after_prefix = &rest[pos + MARKER_PREFIX.len()..];
        match after_prefix.find(']') {
            Some(end) if after_prefix[end..].starts_with(MARKER_SUFFIX) => {
                let id = after_prefix[..end].trim();
                if !id.is_empty() && !id.contains('[') && !out.iter().any(|x| x == id) {
                    out.push(id.to_string());
                }
                rest = &after_prefix[end + MARKER_SUFFIX.len()..];
            }
            Some(end) => rest = &after_prefix[end..],
            None => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extracts_in_first_appearance_order() {
        let text = "B first [[chunk:b]] then [[chunk:a]] and again [[chunk:b]].";
        assert_eq!(extract_cited_chunk_ids(text), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn ignores_malformed_markers() {
        assert!(extract_cited_chunk_ids("[[chunk:]] [[chunk:x] [[chunk:").is_empty());
        assert_eq!(
            extract_cited_chunk_ids("[[chunk:x] [[chunk:y]]"),
            vec!["y".to_string()]
        );
    }

    #[test]
    fn marker_round_trips() {
        assert_eq!(extract_cited_chunk_ids(&marker("abc")), vec!["abc".to_string()]);
    }
}
