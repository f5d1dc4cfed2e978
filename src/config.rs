use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Runtime settings, persisted as `settings.json`.
///
/// `admin_id` is stored as a string holding a numeric Telegram user id, as
/// written by earlier versions of this tool; it is parsed once at startup.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub api_id: i32,
    #[serde(default)]
    pub api_hash: String,
    #[serde(default)]
    pub admin_id: String,
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,
    #[serde(default = "default_ping_url")]
    pub ping_url: String,
}

fn default_media_root() -> PathBuf {
    PathBuf::from("media")
}

fn default_session_file() -> PathBuf {
    PathBuf::from("mediakeep.session")
}

fn default_ping_url() -> String {
    "https://api.telegram.org".to_string()
}

/// Prompt on stdin for a single line, returning it trimmed.
pub fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    std::io::stdout().flush().context("Failed to flush stdout")?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

impl Settings {
    /// Load settings from `path`, prompting interactively for anything
    /// required but missing and persisting the answers back.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse settings file: {}", path.display()))?
        } else {
            Settings {
                api_id: 0,
                api_hash: String::new(),
                admin_id: String::new(),
                media_root: default_media_root(),
                session_file: default_session_file(),
                ping_url: default_ping_url(),
            }
        };

        let mut dirty = !path.exists();

        if settings.api_id == 0 {
            let raw = prompt("Enter your API_ID: ")?;
            settings.api_id = raw
                .parse()
                .with_context(|| format!("API_ID is not a number: {:?}", raw))?;
            dirty = true;
        }
        if settings.api_hash.is_empty() {
            settings.api_hash = prompt("Enter your API_HASH: ")?;
            dirty = true;
        }
        if settings.admin_id.trim().is_empty() {
            settings.admin_id = prompt("Enter the admin user id: ")?;
            dirty = true;
        }

        // Validate early so a typo fails at startup, not on the first command.
        settings.admin_id()?;

        if dirty {
            settings.save(path)?;
        }

        if !settings.media_root.exists() {
            std::fs::create_dir_all(&settings.media_root).with_context(|| {
                format!(
                    "Failed to create media root: {}",
                    settings.media_root.display()
                )
            })?;
        }

        Ok(settings)
    }

    /// The configured administrator id as a numeric Telegram user id.
    pub fn admin_id(&self) -> Result<i64> {
        self.admin_id
            .trim()
            .parse()
            .with_context(|| format!("admin_id is not a numeric user id: {:?}", self.admin_id))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings file: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let root = dir.path().join("media");
        std::fs::write(
            &path,
            format!(
                r#"{{"api_id": 12345, "api_hash": "abc", "admin_id": "42",
                    "media_root": {:?}, "session_file": "s.session"}}"#,
                root
            ),
        )
        .unwrap();

        let settings = Settings::load_or_init(&path).unwrap();
        assert_eq!(settings.api_id, 12345);
        assert_eq!(settings.api_hash, "abc");
        assert_eq!(settings.admin_id().unwrap(), 42);
        assert_eq!(settings.ping_url, "https://api.telegram.org");
        assert!(root.is_dir());
    }

    #[test]
    fn non_numeric_admin_id_is_a_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"api_id": 1, "api_hash": "h", "admin_id": "not-a-number"}"#,
        )
        .unwrap();

        assert!(Settings::load_or_init(&path).is_err());
    }

    #[test]
    fn save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings {
            api_id: 7,
            api_hash: "hash".into(),
            admin_id: "99".into(),
            media_root: dir.path().join("m"),
            session_file: "x.session".into(),
            ping_url: default_ping_url(),
        };
        settings.save(&path).unwrap();

        let loaded = Settings::load_or_init(&path).unwrap();
        assert_eq!(loaded.api_id, 7);
        assert_eq!(loaded.admin_id().unwrap(), 99);
    }
}
