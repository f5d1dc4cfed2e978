use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::IntakeError;

/// Who sent a message, as resolved by the Telegram client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderIdentity {
    /// Stable numeric user id.
    pub id: i64,
    /// Public username, if the account has one.
    pub username: Option<String>,
}

impl SenderIdentity {
    pub fn new(id: i64, username: Option<String>) -> Self {
        Self { id, username }
    }

    /// Username as written into folder names. Accounts without a username
    /// get the literal "None", matching folders created by earlier versions.
    pub fn username_tag(&self) -> &str {
        self.username.as_deref().unwrap_or("None")
    }

    /// The token used to recognize this sender's folder among existing
    /// directory names, independent of its letter prefix.
    pub fn folder_token(&self) -> String {
        format!("@{} - {}", self.username_tag(), self.id)
    }
}

/// Cyclic A..Z counter. Each call advances exactly one position; after 'Z'
/// it wraps back to 'A'. Letters already handed out are not reclaimed, so
/// two senders can share a letter once more than 26 have been seen.
#[derive(Debug, Default)]
pub struct LetterSequence {
    issued: usize,
}

impl LetterSequence {
    pub fn next_letter(&mut self) -> char {
        let letter = (b'A' + (self.issued % 26) as u8) as char;
        self.issued += 1;
        letter
    }
}

struct RegistryInner {
    cache: HashMap<i64, PathBuf>,
    letters: LetterSequence,
}

/// Maps senders to stable on-disk folders under the media root.
///
/// Folders are named `{letter} - @{username} - {id}`. A returning sender is
/// recognized by scanning existing directory names for their token; only a
/// genuinely new sender consumes a letter. The scan-then-create sequence
/// runs under one lock so concurrent first contacts from the same sender
/// cannot each create a folder.
pub struct FolderRegistry {
    root: PathBuf,
    inner: Mutex<RegistryInner>,
}

impl FolderRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            inner: Mutex::new(RegistryInner {
                cache: HashMap::new(),
                letters: LetterSequence::default(),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the folder for `sender`, creating it on first contact.
    ///
    /// The same sender id always resolves to the same path for the life of
    /// the process. On creation failure the caller must not download.
    pub async fn resolve(&self, sender: &SenderIdentity) -> Result<PathBuf, IntakeError> {
        let mut inner = self.inner.lock().await;

        if let Some(path) = inner.cache.get(&sender.id) {
            return Ok(path.clone());
        }

        let token = sender.folder_token();
        if let Some(existing) = self.scan_for(&token).await? {
            debug!("Reusing folder {} for sender {}", existing.display(), sender.id);
            inner.cache.insert(sender.id, existing.clone());
            return Ok(existing);
        }

        let letter = inner.letters.next_letter();
        let name = format!("{} - {}", letter, token);
        let path = self.root.join(&name);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| IntakeError::from_io(e, &path.display().to_string()))?;
        info!("Created folder {:?} for sender {}", name, sender.id);

        inner.cache.insert(sender.id, path.clone());
        Ok(path)
    }

    /// Scan existing subdirectory names for one containing `token`.
    async fn scan_for(&self, token: &str) -> Result<Option<PathBuf>, IntakeError> {
        let root_label = self.root.display().to_string();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| IntakeError::from_io(e, &root_label))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| IntakeError::from_io(e, &root_label))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| IntakeError::from_io(e, &root_label))?;
            if !file_type.is_dir() {
                continue;
            }
            // Folder names always end with the token, so match on the
            // suffix: a bare substring check would let id 5 claim the
            // folder of id 55.
            if entry.file_name().to_string_lossy().ends_with(token) {
                return Ok(Some(entry.path()));
            }
        }

        Ok(None)
    }
}
