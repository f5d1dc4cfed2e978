use std::io;

use thiserror::Error;

/// How much of a generic error's detail is shown to the user. The full
/// detail always goes to the log.
const GENERIC_DETAIL_LIMIT: usize = 200;

/// Errors surfaced to users by the intake and command handlers.
///
/// Every handler catches these at its boundary, logs them, and replies with
/// [`IntakeError::user_message`]. Nothing here crashes the process.
#[derive(Error, Debug)]
pub enum IntakeError {
    /// A requested file or directory does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The filesystem refused access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A download or send through the Telegram client failed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A required setting was absent at startup.
    #[error("missing configuration: {0}")]
    ConfigurationMissing(String),

    /// Anything else. Logged with full detail, shown truncated.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntakeError {
    /// Classify an I/O error against the path (or operation) it hit.
    pub fn from_io(err: io::Error, what: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => IntakeError::NotFound(what.to_string()),
            io::ErrorKind::PermissionDenied => IntakeError::PermissionDenied(what.to_string()),
            _ => IntakeError::Other(anyhow::Error::new(err).context(what.to_string())),
        }
    }

    /// The text sent back to the user in chat.
    pub fn user_message(&self) -> String {
        match self {
            IntakeError::NotFound(what) => {
                format!("File or folder does not exist: {}", what)
            }
            IntakeError::PermissionDenied(what) => {
                format!("Permission denied: {}", what)
            }
            IntakeError::Transport(detail) => {
                format!("Transport error: {}", detail)
            }
            IntakeError::ConfigurationMissing(key) => {
                format!("Missing configuration: {}", key)
            }
            IntakeError::Other(err) => {
                let mut detail = format!("{:#}", err);
                if detail.len() > GENERIC_DETAIL_LIMIT {
                    let mut end = GENERIC_DETAIL_LIMIT;
                    while end > 0 && !detail.is_char_boundary(end) {
                        end -= 1;
                    }
                    detail.truncate(end);
                    detail.push('…');
                }
                format!("Error: {}", detail)
            }
        }
    }
}

impl From<grammers_client::InvocationError> for IntakeError {
    fn from(err: grammers_client::InvocationError) -> Self {
        IntakeError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = IntakeError::from_io(
            io::Error::new(io::ErrorKind::NotFound, "gone"),
            "missing.txt",
        );
        assert!(matches!(err, IntakeError::NotFound(_)));
        assert_eq!(
            err.user_message(),
            "File or folder does not exist: missing.txt"
        );
    }

    #[test]
    fn io_permission_denied_maps_to_permission_denied() {
        let err = IntakeError::from_io(
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
            "locked.txt",
        );
        assert!(matches!(err, IntakeError::PermissionDenied(_)));
        assert_eq!(err.user_message(), "Permission denied: locked.txt");
    }

    #[test]
    fn other_io_errors_stay_generic() {
        let err = IntakeError::from_io(
            io::Error::new(io::ErrorKind::UnexpectedEof, "short read"),
            "partial.bin",
        );
        assert!(matches!(err, IntakeError::Other(_)));
        assert!(err.user_message().starts_with("Error: "));
    }

    #[test]
    fn generic_detail_is_truncated() {
        let long = "x".repeat(500);
        let err = IntakeError::Other(anyhow::anyhow!(long));
        let msg = err.user_message();
        assert!(msg.len() < 300);
        assert!(msg.ends_with('…'));
    }
}
