use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use grammers_client::types::Message;
use grammers_client::InputMessage;
use tracing::{error, info, warn};

use crate::archive;
use crate::bot::App;
use crate::error::IntakeError;
use crate::gate::AdminGate;

/// Telegram caps messages at 4096 chars; leave headroom.
const MAX_REPLY_LEN: usize = 4000;

const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "avi", "webm"];

const HELP_TEXT: &str = "mediakeep commands:\n\
    /help - this message\n\
    /ping - health check against the configured URL\n\
    /status - media counts and uptime\n\
    /files - recursive listing of the media root\n\
    /check - verify the media root is present and writable\n\
    /download <path> - send back a stored file\n\
    /delete <path> - delete a stored file\n\
    /all - zip the whole media root and send it\n\
    /zip <folder> - zip one sender folder and send it";

/// Admin commands recognized in private chats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Ping,
    Status,
    Files,
    Check,
    Download(String),
    Delete(String),
    All,
    Zip(String),
}

/// Parse a text message into a command. The first whitespace splits the
/// command name from its (optional) argument; the argument keeps internal
/// spaces so paths like `A - @alice - 555/pic.jpg` survive.
pub fn parse(text: &str) -> Option<Command> {
    let text = text.trim();
    let (name, arg) = match text.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim().to_string()),
        None => (text, String::new()),
    };

    match name {
        "/help" => Some(Command::Help),
        "/ping" => Some(Command::Ping),
        "/status" => Some(Command::Status),
        "/files" => Some(Command::Files),
        "/check" => Some(Command::Check),
        "/download" => Some(Command::Download(arg)),
        "/delete" => Some(Command::Delete(arg)),
        "/all" => Some(Command::All),
        "/zip" => Some(Command::Zip(arg)),
        _ => None,
    }
}

/// Gate check, applied before any I/O. Returns `None` for unauthorized
/// senders: the command is dropped with no reply of any kind.
pub fn authorized_command(gate: &AdminGate, sender_id: i64, cmd: Command) -> Option<Command> {
    if gate.is_authorized(sender_id) {
        Some(cmd)
    } else {
        warn!(
            "Dropping command from unauthorized user {} without reply",
            sender_id
        );
        None
    }
}

/// What a command handler produced.
enum Reply {
    Text(String),
    /// A file to upload, its caption, and whether to delete it afterwards
    /// (temporary archives are cleaned up, stored media is not).
    File {
        path: PathBuf,
        caption: String,
        cleanup: bool,
    },
}

/// Dispatch one already-parsed command from `sender_id` and reply in-chat.
///
/// Unauthorized senders get no response at all. Handler failures are
/// logged and reported as categorized text.
pub async fn handle(app: &App, msg: &Message, sender_id: i64, cmd: Command) -> anyhow::Result<()> {
    let cmd = match authorized_command(&app.gate, sender_id, cmd) {
        Some(cmd) => cmd,
        None => return Ok(()),
    };

    info!("Admin command from {}: {:?}", sender_id, cmd);
    let root = app.registry.root().to_path_buf();

    let outcome = match cmd {
        Command::Help => Ok(Reply::Text(HELP_TEXT.to_string())),
        Command::Ping => ping(app).await,
        Command::Status => status_summary(&root, app.started_at)
            .await
            .map(Reply::Text),
        Command::Files => render_tree(&root).await.map(Reply::Text),
        Command::Check => check_summary(&root).await.map(Reply::Text),
        Command::Download(arg) => download(&root, &arg),
        Command::Delete(arg) => delete(&root, &arg).await.map(Reply::Text),
        Command::All => zip_target(&root, &root).await,
        Command::Zip(arg) => {
            if arg.is_empty() {
                Ok(Reply::Text("Usage: /zip <folder>".to_string()))
            } else {
                match resolve_media_path(&root, &arg) {
                    Ok(path) if path.is_dir() => zip_target(&root, &path).await,
                    Ok(path) => Err(IntakeError::Other(anyhow!(
                        "not a folder: {}",
                        path.display()
                    ))),
                    Err(e) => Err(e),
                }
            }
        }
    };

    match outcome {
        Ok(Reply::Text(text)) => {
            msg.respond(truncate_for_chat(text)).await?;
        }
        Ok(Reply::File {
            path,
            caption,
            cleanup,
        }) => {
            let send_result = send_file(app, msg, &path, &caption).await;
            if cleanup {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to remove temporary archive {}: {}", path.display(), e);
                }
            }
            if let Err(e) = send_result {
                error!("Failed to send {}: {:#}", path.display(), e);
                msg.respond(e.user_message()).await?;
            }
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            msg.respond(e.user_message()).await?;
        }
    }

    Ok(())
}

async fn send_file(
    app: &App,
    msg: &Message,
    path: &Path,
    caption: &str,
) -> Result<(), IntakeError> {
    let uploaded = app
        .client
        .upload_file(path)
        .await
        .map_err(|e| IntakeError::from_io(e, &path.display().to_string()))?;
    msg.respond(InputMessage::text(caption).document(uploaded))
        .await?;
    Ok(())
}

/// `/ping`: one HTTP round-trip against the configured URL.
async fn ping(app: &App) -> Result<Reply, IntakeError> {
    let url = app.settings.ping_url.clone();
    let started = Instant::now();
    let response = app
        .http
        .get(&url)
        .send()
        .await
        .map_err(|e| IntakeError::Transport(e.to_string()))?;
    let elapsed = started.elapsed();
    Ok(Reply::Text(format!(
        "Pong! {} answered HTTP {} in {} ms",
        url,
        response.status().as_u16(),
        elapsed.as_millis()
    )))
}

async fn zip_target(root: &Path, target: &Path) -> Result<Reply, IntakeError> {
    let archive_path = archive::zip_dir(target).await?;
    let what = if target == root {
        "entire media root".to_string()
    } else {
        target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    };
    Ok(Reply::File {
        path: archive_path,
        caption: format!("Archive of {}", what),
        cleanup: true,
    })
}

fn download(root: &Path, arg: &str) -> Result<Reply, IntakeError> {
    if arg.is_empty() {
        return Ok(Reply::Text("Usage: /download <path>".to_string()));
    }
    let path = resolve_media_path(root, arg)?;
    if !path.is_file() {
        return Err(IntakeError::Other(anyhow!("not a file: {}", path.display())));
    }
    Ok(Reply::File {
        path,
        caption: arg.to_string(),
        cleanup: false,
    })
}

async fn delete(root: &Path, arg: &str) -> Result<String, IntakeError> {
    if arg.is_empty() {
        return Ok("Usage: /delete <path>".to_string());
    }
    let path = resolve_media_path(root, arg)?;
    if !path.is_file() {
        return Err(IntakeError::Other(anyhow!("not a file: {}", path.display())));
    }
    tokio::fs::remove_file(&path)
        .await
        .map_err(|e| IntakeError::from_io(e, arg))?;
    Ok(format!("Deleted {}", arg))
}

/// Resolve a user-supplied path against the media root, rejecting anything
/// that escapes it. A missing target is reported as NotFound.
fn resolve_media_path(root: &Path, requested: &str) -> Result<PathBuf, IntakeError> {
    let root_canonical = root
        .canonicalize()
        .map_err(|e| IntakeError::from_io(e, &root.display().to_string()))?;

    let requested_path = if Path::new(requested).is_absolute() {
        PathBuf::from(requested)
    } else {
        root.join(requested)
    };
    let canonical = requested_path
        .canonicalize()
        .map_err(|e| IntakeError::from_io(e, requested))?;

    if !canonical.starts_with(&root_canonical) {
        return Err(IntakeError::PermissionDenied(requested.to_string()));
    }
    Ok(canonical)
}

#[derive(Debug, Default, PartialEq, Eq)]
struct MediaStats {
    folders: usize,
    photos: usize,
    videos: usize,
    other: usize,
    bytes: u64,
}

async fn scan_media(root: &Path) -> Result<MediaStats, IntakeError> {
    let root_label = root.display().to_string();
    let mut stats = MediaStats::default();
    let mut stack = vec![(root.to_path_buf(), 0usize)];

    while let Some((dir, depth)) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| IntakeError::from_io(e, &root_label))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| IntakeError::from_io(e, &root_label))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| IntakeError::from_io(e, &root_label))?;
            if file_type.is_dir() {
                if depth == 0 {
                    stats.folders += 1;
                }
                stack.push((path, depth + 1));
            } else {
                let metadata = entry
                    .metadata()
                    .await
                    .map_err(|e| IntakeError::from_io(e, &root_label))?;
                stats.bytes += metadata.len();
                let ext = path
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                if PHOTO_EXTENSIONS.contains(&ext.as_str()) {
                    stats.photos += 1;
                } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
                    stats.videos += 1;
                } else {
                    stats.other += 1;
                }
            }
        }
    }

    Ok(stats)
}

/// `/status` body: counts by kind, plus size and uptime.
async fn status_summary(root: &Path, started_at: DateTime<Utc>) -> Result<String, IntakeError> {
    let stats = scan_media(root).await?;
    let uptime = Utc::now() - started_at;
    let secs = uptime.num_seconds().max(0);
    Ok(format!(
        "Media root: {}\n\
         Sender folders: {}\n\
         Total Photos: {}\n\
         Total Videos: {}\n\
         Other files: {}\n\
         Total size: {} bytes\n\
         Uptime: {}h {}m {}s",
        root.display(),
        stats.folders,
        stats.photos,
        stats.videos,
        stats.other,
        stats.bytes,
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    ))
}

/// `/check` body: storage health probe.
async fn check_summary(root: &Path) -> Result<String, IntakeError> {
    let root_label = root.display().to_string();
    if !root.is_dir() {
        return Err(IntakeError::NotFound(root_label));
    }

    // Probe writability the direct way: create and remove a marker file.
    let marker = root.join(".mediakeep-check");
    let writable = match tokio::fs::write(&marker, b"check").await {
        Ok(()) => {
            tokio::fs::remove_file(&marker)
                .await
                .map_err(|e| IntakeError::from_io(e, &root_label))?;
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(e) => return Err(IntakeError::from_io(e, &root_label)),
    };

    let stats = scan_media(root).await?;
    Ok(format!(
        "Media root: {}\nWritable: {}\nSender folders: {}",
        root.display(),
        if writable { "yes" } else { "no" },
        stats.folders
    ))
}

/// `/files` body: sorted, indented tree of the media root.
async fn render_tree(root: &Path) -> Result<String, IntakeError> {
    let root_label = root.display().to_string();
    let mut out = format!("{}/\n", root_label);
    // Depth-first; children pushed in reverse name order so output is sorted.
    let mut stack: Vec<(PathBuf, usize)> = Vec::new();
    push_children(root, 1, &mut stack, &root_label).await?;

    while let Some((path, depth)) = stack.pop() {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let is_dir = path.is_dir();
        out.push_str(&"  ".repeat(depth));
        out.push_str(&name);
        if is_dir {
            out.push('/');
        }
        out.push('\n');
        if is_dir {
            push_children(&path, depth + 1, &mut stack, &root_label).await?;
        }
    }

    if out.lines().count() == 1 {
        out.push_str("  (empty)\n");
    }
    Ok(out)
}

async fn push_children(
    dir: &Path,
    depth: usize,
    stack: &mut Vec<(PathBuf, usize)>,
    root_label: &str,
) -> Result<(), IntakeError> {
    let mut children = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| IntakeError::from_io(e, root_label))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| IntakeError::from_io(e, root_label))?
    {
        children.push(entry.path());
    }
    children.sort();
    for child in children.into_iter().rev() {
        stack.push((child, depth));
    }
    Ok(())
}

fn truncate_for_chat(mut text: String) -> String {
    if text.len() > MAX_REPLY_LEN {
        let mut end = MAX_REPLY_LEN;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
        text.push_str("\n…(truncated)");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_commands() {
        assert_eq!(parse("/help"), Some(Command::Help));
        assert_eq!(parse("/ping"), Some(Command::Ping));
        assert_eq!(parse("/status"), Some(Command::Status));
        assert_eq!(parse("/files"), Some(Command::Files));
        assert_eq!(parse("/check"), Some(Command::Check));
        assert_eq!(parse("/all"), Some(Command::All));
    }

    #[test]
    fn parses_arguments_with_spaces() {
        assert_eq!(
            parse("/download A - @alice - 555/pic.jpg"),
            Some(Command::Download("A - @alice - 555/pic.jpg".to_string()))
        );
        assert_eq!(
            parse("/zip A - @alice - 555"),
            Some(Command::Zip("A - @alice - 555".to_string()))
        );
        assert_eq!(parse("/delete  x.mp4 "), Some(Command::Delete("x.mp4".to_string())));
    }

    #[test]
    fn rejects_non_commands() {
        assert_eq!(parse("hello"), None);
        assert_eq!(parse("/unknown"), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn unauthorized_commands_are_dropped() {
        let gate = AdminGate::new(42);
        assert_eq!(
            authorized_command(&gate, 7, Command::Download("secrets.txt".into())),
            None
        );
        assert_eq!(
            authorized_command(&gate, 42, Command::Status),
            Some(Command::Status)
        );
    }

    #[tokio::test]
    async fn status_counts_photos_and_videos() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("A - @alice - 555");
        std::fs::create_dir(&folder).unwrap();
        std::fs::write(folder.join("a.jpg"), b"1").unwrap();
        std::fs::write(folder.join("b.jpg"), b"2").unwrap();
        std::fs::write(folder.join("c.JPG"), b"3").unwrap();
        std::fs::write(folder.join("d.mp4"), b"4").unwrap();

        let text = status_summary(dir.path(), Utc::now()).await.unwrap();
        assert!(text.contains("Total Photos: 3"), "{}", text);
        assert!(text.contains("Total Videos: 1"), "{}", text);
        assert!(text.contains("Sender folders: 1"), "{}", text);
    }

    #[tokio::test]
    async fn scan_counts_bytes_and_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("B - @bob - 7");
        std::fs::create_dir(&folder).unwrap();
        std::fs::write(folder.join("clip.webm"), b"12345").unwrap();
        std::fs::write(folder.join("notes.txt"), b"123").unwrap();

        let stats = scan_media(dir.path()).await.unwrap();
        assert_eq!(stats.videos, 1);
        assert_eq!(stats.other, 1);
        assert_eq!(stats.bytes, 8);
    }

    #[tokio::test]
    async fn tree_lists_nested_entries_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let b = dir.path().join("B - @bob - 7");
        let a = dir.path().join("A - @alice - 555");
        std::fs::create_dir(&b).unwrap();
        std::fs::create_dir(&a).unwrap();
        std::fs::write(a.join("pic.jpg"), b"x").unwrap();

        let tree = render_tree(dir.path()).await.unwrap();
        let alice_pos = tree.find("A - @alice - 555/").unwrap();
        let bob_pos = tree.find("B - @bob - 7/").unwrap();
        let pic_pos = tree.find("    pic.jpg").unwrap();
        assert!(alice_pos < pic_pos && pic_pos < bob_pos, "{}", tree);
    }

    #[tokio::test]
    async fn tree_of_empty_root_says_so() {
        let dir = tempfile::tempdir().unwrap();
        let tree = render_tree(dir.path()).await.unwrap();
        assert!(tree.contains("(empty)"));
    }

    #[test]
    fn missing_download_target_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_media_path(dir.path(), "missing.txt").unwrap_err();
        assert!(matches!(err, IntakeError::NotFound(_)));
        assert_eq!(
            err.user_message(),
            "File or folder does not exist: missing.txt"
        );
    }

    #[test]
    fn path_escape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("media");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(dir.path().join("outside.txt"), b"secret").unwrap();

        let err = resolve_media_path(&root, "../outside.txt").unwrap_err();
        assert!(matches!(err, IntakeError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn delete_removes_file_then_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("A - @alice - 555");
        std::fs::create_dir(&folder).unwrap();
        let rel = "A - @alice - 555/pic.jpg";
        std::fs::write(dir.path().join(rel), b"x").unwrap();

        let reply = delete(dir.path(), rel).await.unwrap();
        assert_eq!(reply, format!("Deleted {}", rel));
        assert!(!dir.path().join(rel).exists());

        let err = delete(dir.path(), rel).await.unwrap_err();
        assert!(matches!(err, IntakeError::NotFound(_)));
    }

    #[tokio::test]
    async fn check_reports_writable_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("A - @alice - 555")).unwrap();

        let text = check_summary(dir.path()).await.unwrap();
        assert!(text.contains("Writable: yes"), "{}", text);
        assert!(text.contains("Sender folders: 1"), "{}", text);
        // The probe file must not linger.
        assert!(!dir.path().join(".mediakeep-check").exists());
    }

    #[tokio::test]
    async fn check_on_missing_root_is_not_found() {
        let err = check_summary(Path::new("/nonexistent/mediakeep-root"))
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::NotFound(_)));
    }

    #[test]
    fn long_replies_are_truncated() {
        let text = "line\n".repeat(2000);
        let truncated = truncate_for_chat(text);
        assert!(truncated.len() <= MAX_REPLY_LEN + 20);
        assert!(truncated.ends_with("…(truncated)"));
    }
}
