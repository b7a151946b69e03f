//! Reply sanitizer: strips leaked context-metadata lines and clamps length.
//! Platform markup escaping happens in the adapter right before send.

/// Lines starting with this sentinel are internal annotations and must
/// never reach the user.
const META_SENTINEL: &str = "[meta]";
/// Hard cap on outbound reply length, in characters.
const MAX_REPLY_CHARS: usize = 4000;

pub fn sanitize_reply(raw: &str) -> String {
    let cleaned: String = raw
        .lines()
        .filter(|line| !line.trim_start().starts_with(META_SENTINEL))
        .collect::<Vec<_>>()
        .join("\n");
    let trimmed = cleaned.trim();
    if trimmed.chars().count() <= MAX_REPLY_CHARS {
        trimmed.to_string()
    } else {
        let mut out: String = trimmed.chars().take(MAX_REPLY_CHARS - 1).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_lines_are_stripped() {
        let raw = "нормальний текст\n[meta] chat_id=100 user=42\nще текст";
        let clean = sanitize_reply(raw);
        assert!(!clean.contains("[meta]"));
        assert!(clean.contains("нормальний текст"));
        assert!(clean.contains("ще текст"));
    }

    #[test]
    fn indented_meta_lines_are_stripped_too() {
        let raw = "текст\n   [meta] leak";
        assert_eq!(sanitize_reply(raw), "текст");
    }

    #[test]
    fn long_replies_are_clamped() {
        let raw = "б".repeat(10_000);
        let clean = sanitize_reply(&raw);
        assert!(clean.chars().count() <= MAX_REPLY_CHARS);
        assert!(clean.ends_with('…'));
    }

    #[test]
    fn whitespace_is_trimmed() {
        assert_eq!(sanitize_reply("  привіт  \n"), "привіт");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(sanitize_reply("все добре"), "все добре");
    }
}
