//! Fenced code block extraction for the final answer.

use std::sync::LazyLock;

use regex::Regex;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[ \t]*\r?\n(.*?)```").expect("fence regex is valid")
});

/// Return the body of the first fenced block labeled `lang` (case-insensitive).
pub fn extract_fenced_block<'a>(text: &'a str, lang: &str) -> Option<&'a str> {
    FENCE_RE
        .captures_iter(text)
        .find(|caps| caps[1].eq_ignore_ascii_case(lang))
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_yaml_block() {
        let text = "Here you go:\n```yaml\napp:\n  name: recipes\n```\n\n```yaml\nsecond: true\n```\n";
        assert_eq!(
            extract_fenced_block(text, "yaml"),
            Some("app:\n  name: recipes\n")
        );
    }

    #[test]
    fn skips_blocks_with_other_labels() {
        let text = "```json\n{}\n```\n```YAML\nkind: workflow\n```";
        assert_eq!(extract_fenced_block(text, "yaml"), Some("kind: workflow\n"));
    }

    #[test]
    fn missing_block_returns_none() {
        assert_eq!(extract_fenced_block("app:\n  name: x\n", "yaml"), None);
        assert_eq!(extract_fenced_block("```\nplain\n```", "yaml"), None);
    }
}
