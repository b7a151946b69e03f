//! Outbound sending: MarkdownV2 escaping, 4096-char chunking, plain-text
//! fallback when Telegram rejects the parse mode.

use std::time::Duration;

use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode, ReplyParameters};
use tracing::warn;

/// Telegram's hard limit is 4096; leave headroom for escaping slips.
const CHUNK_MAX: usize = 4000;

/// Escape MarkdownV2 reserved characters.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        if matches!(
            ch,
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '='
                | '|' | '{' | '}' | '.' | '!'
        ) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Split on line boundaries under the chunk cap, force-splitting any single
/// line that alone exceeds it. Splits count characters, not bytes, so a
/// chunk boundary can never land inside a multi-byte letter.
pub fn split_chunks(text: &str) -> Vec<String> {
    if text.chars().count() <= CHUNK_MAX {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        if current_len > 0 && current_len + 1 + line_len > CHUNK_MAX {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > CHUNK_MAX {
            // A single oversized line: hard-split by characters.
            let mut piece = String::new();
            let mut piece_len = 0usize;
            for ch in line.chars() {
                if piece_len == CHUNK_MAX {
                    chunks.push(std::mem::take(&mut piece));
                    piece_len = 0;
                }
                piece.push(ch);
                piece_len += 1;
            }
            if piece_len > 0 {
                if current_len > 0 {
                    chunks.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                current = piece;
                current_len = piece_len;
            }
            continue;
        }
        if current_len > 0 {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if current_len > 0 {
        chunks.push(current);
    }
    chunks
}

/// Send `text` to `chat_id`, optionally as a reply. MarkdownV2 first,
/// plain text when Telegram rejects the formatting.
pub async fn send_reply(bot: &Bot, chat_id: ChatId, reply_to: Option<i64>, text: &str) {
    let chunks = split_chunks(text);
    for (i, chunk) in chunks.iter().enumerate() {
        let escaped = escape_markdown_v2(chunk);
        let mut request = bot
            .send_message(chat_id, &escaped)
            .parse_mode(ParseMode::MarkdownV2);
        // Only the first chunk replies to the triggering message.
        if i == 0 {
            if let Some(reply_id) = reply_to {
                request = request
                    .reply_parameters(ReplyParameters::new(MessageId(reply_id as i32)));
            }
        }

        if request.await.is_err() {
            let mut plain = bot.send_message(chat_id, chunk);
            if i == 0 {
                if let Some(reply_id) = reply_to {
                    plain = plain
                        .reply_parameters(ReplyParameters::new(MessageId(reply_id as i32)));
                }
            }
            if let Err(e) = plain.await {
                warn!(error = %e, chunk = i, "send failed in both modes");
            }
        }

        if i + 1 < chunks.len() {
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_chunks("привіт"), vec!["привіт"]);
    }

    #[test]
    fn long_text_splits_on_lines() {
        let line = "я".repeat(1500);
        let text = format!("{line}\n{line}\n{line}");
        let chunks = split_chunks(&text);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.chars().count() <= CHUNK_MAX);
        }
    }

    #[test]
    fn oversized_single_line_is_hard_split() {
        let text = "ї".repeat(9000);
        let chunks = split_chunks(&text);
        assert!(chunks.len() >= 3);
        for c in &chunks {
            assert!(c.chars().count() <= CHUNK_MAX);
        }
        let total: usize = chunks.iter().map(|c| c.chars().count()).sum();
        assert_eq!(total, 9000);
    }

    #[test]
    fn escape_covers_reserved_set() {
        let escaped = escape_markdown_v2("a.b!c(d)e_f*g");
        assert_eq!(escaped, r"a\.b\!c\(d\)e\_f\*g");
    }

    #[test]
    fn escape_keeps_cyrillic_untouched() {
        assert_eq!(escape_markdown_v2("привіт світ"), "привіт світ");
    }
}
