//! Transport → core mapping: teloxide `Message` into the normalized
//! `Inbound`, downloading media the model can consume.

use base64::Engine;
use chrono::Utc;
use teloxide::net::Download;
use teloxide::prelude::*;
use tracing::warn;

use gryag_core::types::{Inbound, MediaKind, MediaPart};

/// Files above this size are referenced but not downloaded.
pub const MAX_MEDIA_BYTES: u64 = 20 * 1024 * 1024;

/// Normalize a Telegram message. `bot_id` marks replies to the bot itself.
pub async fn normalize(bot: &Bot, msg: &Message, bot_id: u64) -> Inbound {
    let from = msg.from.as_ref();
    let reply_to = msg.reply_to_message();

    Inbound {
        chat_id: msg.chat.id.0,
        thread_id: msg.thread_id.map(|t| t.0 .0 as i64),
        message_id: msg.id.0 as i64,
        user_id: from.map(|u| u.id.0 as i64),
        user_is_bot: from.map(|u| u.is_bot).unwrap_or(false),
        user_name: from.map(|u| u.full_name()),
        reply_to: reply_to.map(|r| r.id.0 as i64),
        reply_to_bot: reply_to
            .and_then(|r| r.from.as_ref())
            .map(|u| u.id.0 == bot_id)
            .unwrap_or(false),
        is_private: msg.chat.is_private(),
        text: msg.text().or(msg.caption()).unwrap_or("").to_string(),
        media: extract_media(bot, msg).await,
        ts: Utc::now(),
    }
}

/// Collect and download the message's media as normalized parts.
async fn extract_media(bot: &Bot, msg: &Message) -> Vec<MediaPart> {
    let mut parts = Vec::new();

    // Photo: highest resolution is the last element.
    if let Some(photo) = msg.photo().and_then(|p| p.last()) {
        parts.push(make_part(bot, &photo.file.id, MediaKind::Photo, "image/jpeg").await);
    }
    if let Some(doc) = msg.document() {
        let mime = doc
            .mime_type
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        parts.push(make_part(bot, &doc.file.id, MediaKind::Document, &mime).await);
    }
    if let Some(audio) = msg.audio() {
        let mime = audio
            .mime_type
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "audio/mpeg".to_string());
        parts.push(make_part(bot, &audio.file.id, MediaKind::Audio, &mime).await);
    }
    if let Some(voice) = msg.voice() {
        let mime = voice
            .mime_type
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "audio/ogg".to_string());
        parts.push(make_part(bot, &voice.file.id, MediaKind::Voice, &mime).await);
    }
    if let Some(video) = msg.video() {
        let mime = video
            .mime_type
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "video/mp4".to_string());
        parts.push(make_part(bot, &video.file.id, MediaKind::Video, &mime).await);
    }

    parts
}

async fn make_part(bot: &Bot, file_id: &str, kind: MediaKind, mime: &str) -> MediaPart {
    let mut part = MediaPart {
        kind,
        mime: mime.to_string(),
        file_id: file_id.to_string(),
        data: None,
        size: None,
    };

    let file = match bot.get_file(file_id).await {
        Ok(file) => file,
        Err(e) => {
            warn!(file_id, error = %e, "get_file failed");
            return part;
        }
    };
    part.size = Some(u64::from(file.size));

    if u64::from(file.size) > MAX_MEDIA_BYTES {
        warn!(file_id, size = file.size, "media exceeds size limit, not downloaded");
        return part;
    }

    let mut buf: Vec<u8> = Vec::new();
    match bot.download_file(&file.path, &mut buf).await {
        Ok(()) => {
            part.data = Some(base64::engine::general_purpose::STANDARD.encode(&buf));
        }
        Err(e) => warn!(file_id, error = %e, "download_file failed"),
    }
    part
}
