use std::path::Path;

use anyhow::anyhow;
use grammers_client::types::photo_sizes::VecExt;
use grammers_client::types::{Downloadable, Media, Message};
use grammers_client::InputMessage;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::bot::App;
use crate::error::IntakeError;
use crate::registry::SenderIdentity;

/// Media kinds the intake pipeline accepts. Everything else is ignored at
/// the routing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn classify(media: &Media) -> Option<Self> {
        match media {
            Media::Photo(_) => Some(MediaKind::Photo),
            Media::Document(doc)
                if doc
                    .mime_type()
                    .map(|m| m.starts_with("video/"))
                    .unwrap_or(false) =>
            {
                Some(MediaKind::Video)
            }
            _ => None,
        }
    }

    fn fallback_extension(self) -> &'static str {
        match self {
            MediaKind::Photo => "jpg",
            MediaKind::Video => "mp4",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Photo => write!(f, "photo"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Renders `(current, total)` download progress as periodic log lines.
/// Regressing updates are ignored so reported progress never decreases.
pub struct ProgressReporter {
    label: String,
    total: u64,
    current: u64,
    last_logged_decile: u64,
}

impl ProgressReporter {
    pub fn new(label: impl Into<String>, total: u64) -> Self {
        Self {
            label: label.into(),
            total,
            current: 0,
            last_logged_decile: 0,
        }
    }

    pub fn report(&mut self, current: u64, total: u64) {
        if total > 0 {
            self.total = total;
        }
        if current < self.current {
            return;
        }
        self.current = current;

        if self.total == 0 {
            return;
        }
        let decile = (self.current * 10 / self.total).min(10);
        if decile > self.last_logged_decile {
            self.last_logged_decile = decile;
            debug!(
                "Downloading {}: {}% ({}/{} bytes)",
                self.label,
                decile * 10,
                self.current,
                self.total
            );
        }
    }

    pub fn current(&self) -> u64 {
        self.current
    }
}

/// Byte size reported by the transport, used for progress only.
fn media_total_size(media: &Media) -> u64 {
    match media {
        Media::Photo(photo) => photo
            .thumbs()
            .largest()
            .map(|thumb| thumb.size() as u64)
            .unwrap_or(0),
        Media::Document(doc) => doc.size().max(0) as u64,
        _ => 0,
    }
}

/// Filename for the stored artifact: the document's own name when it has
/// one, otherwise a per-message fallback.
fn artifact_name(media: &Media, kind: MediaKind, message_id: i32) -> String {
    if let Media::Document(doc) = media {
        let name = doc.name();
        if !name.is_empty() {
            // Strip any path components a malicious client might send.
            if let Some(base) = Path::new(name).file_name() {
                return base.to_string_lossy().to_string();
            }
        }
    }
    fallback_name(kind, message_id)
}

fn fallback_name(kind: MediaKind, message_id: i32) -> String {
    format!("msg_{}.{}", message_id, kind.fallback_extension())
}

/// Intake pipeline for one inbound media message: resolve the sender's
/// folder, stream the bytes to disk, then relay a copy to Saved Messages
/// with an attribution caption.
///
/// Errors are terminal for the event; the caller reports them back to the
/// sender. A folder-resolution failure aborts before any download starts.
pub async fn handle_media(
    app: &App,
    msg: &Message,
    sender: &SenderIdentity,
) -> Result<(), IntakeError> {
    let media = msg
        .media()
        .ok_or_else(|| IntakeError::Other(anyhow!("message carried no media")))?;
    let kind = MediaKind::classify(&media)
        .ok_or_else(|| IntakeError::Other(anyhow!("unsupported media kind")))?;

    info!(
        "Received {} from @{} ({}). Starting download...",
        kind,
        sender.username_tag(),
        sender.id
    );

    let folder = app.registry.resolve(sender).await?;
    let dest = folder.join(artifact_name(&media, kind, msg.id()));
    download_to(app, &media, &dest).await?;

    info!(
        "{} downloaded successfully from @{} ({}) to {}",
        kind,
        sender.username_tag(),
        sender.id,
        dest.display()
    );

    relay_to_owner(app, &dest, kind, sender).await?;
    Ok(())
}

/// True for the owner's reply text that requests an on-demand save.
pub fn is_save_trigger(text: &str) -> bool {
    text.trim() == "/save"
}

/// Owner-only, reply-triggered save: replying `/save` to a media message
/// stores that message's media through the regular intake pipeline, even
/// when it was already read. The folder belongs to the replied message's
/// sender.
pub async fn handle_reply_save(app: &App, msg: &Message) -> Result<(), IntakeError> {
    let replied = msg
        .get_reply()
        .await?
        .ok_or_else(|| IntakeError::Other(anyhow!("replied-to message is gone")))?;

    let sender = match replied.sender() {
        Some(sender) => SenderIdentity::new(sender.id(), sender.username().map(str::to_string)),
        // Messages without sender info fall back to the chat peer.
        None => SenderIdentity::new(
            replied.chat().id(),
            replied.chat().username().map(str::to_string),
        ),
    };

    handle_media(app, &replied, &sender).await
}

async fn download_to(app: &App, media: &Media, dest: &Path) -> Result<(), IntakeError> {
    let dest_label = dest.display().to_string();
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| IntakeError::from_io(e, &dest_label))?;

    let total = media_total_size(media);
    let mut reporter = ProgressReporter::new(dest_label.clone(), total);
    let mut download = app.client.iter_download(&Downloadable::Media(media.clone()));

    let mut current = 0u64;
    while let Some(chunk) = download.next().await? {
        file.write_all(&chunk)
            .await
            .map_err(|e| IntakeError::from_io(e, &dest_label))?;
        current += chunk.len() as u64;
        reporter.report(current, total);
    }
    file.flush()
        .await
        .map_err(|e| IntakeError::from_io(e, &dest_label))?;

    Ok(())
}

async fn relay_to_owner(
    app: &App,
    path: &Path,
    kind: MediaKind,
    sender: &SenderIdentity,
) -> Result<(), IntakeError> {
    let uploaded = app
        .client
        .upload_file(path)
        .await
        .map_err(|e| IntakeError::from_io(e, &path.display().to_string()))?;

    let caption = format!(
        "Saved by mediakeep from @{} ({})",
        sender.username_tag(),
        sender.id
    );
    let message = match kind {
        MediaKind::Photo => InputMessage::text(caption).photo(uploaded),
        MediaKind::Video => InputMessage::text(caption).document(uploaded),
    };
    app.client.send_message(app.me.pack(), message).await?;
    Ok(())
}
