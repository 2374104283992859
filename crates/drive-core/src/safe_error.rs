//! User-safe errors.
//!
//! Internal failures are classified into a small fixed taxonomy. The message
//! shown to users always comes from a table; the original text is sanitized
//! and kept only as a local diagnostic.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::OnceLock;

use regex_lite::Regex;
use tracing::debug;

use crate::bridge::BridgeError;
use crate::error::{ConfigError, CryptoError, EscrowError, SessionError, StoreError};

pub const GENERIC_MESSAGE: &str = "An unexpected error occurred.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AuthenticationFailure,
    NetworkTimeout,
    NotFound,
    InvalidConfig,
    StorageFull,
    PermissionDenied,
    DatabaseError,
    InternalError,
    /// Nothing in the cause chain was recognised.
    Unknown,
}

impl ErrorKind {
    pub fn safe_message(self) -> &'static str {
        match self {
            ErrorKind::AuthenticationFailure => {
                "Authentication failed. Please check your credentials."
            }
            ErrorKind::NetworkTimeout => {
                "Network timeout occurred. Please check your connection and try again."
            }
            ErrorKind::NotFound => "The requested file could not be found.",
            ErrorKind::InvalidConfig => {
                "The application configuration is invalid. Consider resetting or reviewing the config."
            }
            ErrorKind::StorageFull => "Storage is full. Free up space and try again.",
            ErrorKind::PermissionDenied => {
                "Permission denied. Ensure you have proper access rights."
            }
            ErrorKind::DatabaseError => "A database error occurred. Please try again later.",
            ErrorKind::InternalError => "An internal error occurred. Please contact support.",
            ErrorKind::Unknown => GENERIC_MESSAGE,
        }
    }

    pub fn recovery_suggestion(self) -> Option<&'static str> {
        let hint = match self {
            ErrorKind::AuthenticationFailure => "Try logging in again or resetting your password.",
            ErrorKind::NetworkTimeout => "Check your internet connection or try again later.",
            ErrorKind::NotFound => "Verify the file path or restore the missing file.",
            ErrorKind::InvalidConfig => {
                "Restore a valid config or delete the corrupted one to regenerate defaults."
            }
            ErrorKind::StorageFull => "Clear disk space and retry the operation.",
            ErrorKind::PermissionDenied => "Run the application with appropriate permissions.",
            ErrorKind::DatabaseError => {
                "Wait and retry, or contact support if the problem persists."
            }
            ErrorKind::InternalError => {
                "Contact support with error details for further assistance."
            }
            ErrorKind::Unknown => return None,
        };
        Some(hint)
    }

    pub fn is_temporary(self) -> bool {
        matches!(self, ErrorKind::NetworkTimeout)
    }

    pub fn is_user_caused(self) -> bool {
        matches!(
            self,
            ErrorKind::AuthenticationFailure
                | ErrorKind::NotFound
                | ErrorKind::InvalidConfig
                | ErrorKind::StorageFull
                | ErrorKind::PermissionDenied
        )
    }
}

pub struct SafeError {
    kind: ErrorKind,
    safe_message: String,
    is_temporary: bool,
    is_user_caused: bool,
    diagnostic: String,
    cause: Option<anyhow::Error>,
}

impl SafeError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            safe_message: kind.safe_message().to_string(),
            is_temporary: kind.is_temporary(),
            is_user_caused: kind.is_user_caused(),
            diagnostic: String::new(),
            cause: None,
        }
    }

    /// Classify `err` by walking its cause chain.
    pub fn classify(err: anyhow::Error) -> Self {
        let kind = err
            .chain()
            .find_map(kind_of)
            .unwrap_or(ErrorKind::Unknown);
        let diagnostic = sanitize(&format!("{err:#}"));
        debug!(?kind, %diagnostic, "error classified");
        Self {
            diagnostic,
            cause: Some(err),
            ..Self::new(kind)
        }
    }

    /// Shorthand for `classify(err.into())`.
    pub fn from_error<E: Into<anyhow::Error>>(err: E) -> Self {
        Self::classify(err.into())
    }

    /// Replace the table message with a caller-chosen one. The text must
    /// already be safe to show.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.safe_message = message.into();
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn safe_message(&self) -> &str {
        &self.safe_message
    }

    pub fn is_temporary(&self) -> bool {
        self.is_temporary
    }

    pub fn is_user_caused(&self) -> bool {
        self.is_user_caused
    }

    /// Sanitized cause text for local logs.
    pub fn diagnostic(&self) -> &str {
        &self.diagnostic
    }

    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        self.kind.recovery_suggestion()
    }
}

impl fmt::Display for SafeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.safe_message)
    }
}

impl fmt::Debug for SafeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeError")
            .field("kind", &self.kind)
            .field("safe_message", &self.safe_message)
            .field("is_temporary", &self.is_temporary)
            .field("is_user_caused", &self.is_user_caused)
            .field("diagnostic", &self.diagnostic)
            .finish()
    }
}

impl StdError for SafeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(<anyhow::Error as AsRef<dyn StdError>>::as_ref)
    }
}

impl From<ErrorKind> for SafeError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

pub fn classify(err: anyhow::Error) -> SafeError {
    SafeError::classify(err)
}

/// Message to show a user for any error.
pub fn user_message(err: &anyhow::Error) -> &'static str {
    err.chain()
        .find_map(kind_of)
        .unwrap_or(ErrorKind::Unknown)
        .safe_message()
}

fn kind_of(cause: &(dyn StdError + 'static)) -> Option<ErrorKind> {
    if let Some(e) = cause.downcast_ref::<SafeError>() {
        return Some(e.kind);
    }
    if let Some(e) = cause.downcast_ref::<CryptoError>() {
        return Some(crypto_kind(e));
    }
    if let Some(e) = cause.downcast_ref::<EscrowError>() {
        return Some(match e {
            EscrowError::NotFound { .. } => ErrorKind::NotFound,
            EscrowError::AccessDenied(_) => ErrorKind::PermissionDenied,
            EscrowError::Malformed { .. } | EscrowError::Stale { .. } => {
                ErrorKind::AuthenticationFailure
            }
            EscrowError::Unavailable(_) | EscrowError::Backend(_) => ErrorKind::InternalError,
            EscrowError::Crypto(c) => crypto_kind(c),
        });
    }
    if let Some(e) = cause.downcast_ref::<SessionError>() {
        return Some(match e {
            SessionError::NotFound => ErrorKind::NotFound,
            SessionError::Decrypt => ErrorKind::AuthenticationFailure,
            SessionError::UnsupportedFormat(_) | SessionError::Malformed(_) => {
                ErrorKind::InvalidConfig
            }
            SessionError::Io(io) => io_kind(io),
            SessionError::Serialisation(_) => ErrorKind::InternalError,
            SessionError::Crypto(c) => crypto_kind(c),
        });
    }
    if let Some(e) = cause.downcast_ref::<StoreError>() {
        return Some(match e {
            StoreError::WrongKeyOrCorrupt | StoreError::Migration(_) => ErrorKind::DatabaseError,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::InvalidRecord(_) => ErrorKind::InternalError,
            StoreError::Database(db) => sqlite_kind(db),
            StoreError::Io(io) => io_kind(io),
            StoreError::Crypto(c) => crypto_kind(c),
        });
    }
    if let Some(e) = cause.downcast_ref::<ConfigError>() {
        return Some(match e {
            ConfigError::Io(io) => io_kind(io),
            _ => ErrorKind::InvalidConfig,
        });
    }
    if let Some(e) = cause.downcast_ref::<BridgeError>() {
        return Some(match e {
            BridgeError::InvalidCredentials => ErrorKind::AuthenticationFailure,
            BridgeError::Timeout | BridgeError::Network(_) => ErrorKind::NetworkTimeout,
            BridgeError::Rejected(_) => ErrorKind::InternalError,
        });
    }
    if let Some(e) = cause.downcast_ref::<rusqlite::Error>() {
        return Some(sqlite_kind(e));
    }
    if cause.is::<tokio::time::error::Elapsed>() {
        return Some(ErrorKind::NetworkTimeout);
    }
    cause.downcast_ref::<io::Error>().map(io_kind)
}

fn crypto_kind(e: &CryptoError) -> ErrorKind {
    match e {
        CryptoError::Authentication | CryptoError::EmptyPassword => {
            ErrorKind::AuthenticationFailure
        }
        CryptoError::InvalidSaltLength { .. }
        | CryptoError::InvalidIterations
        | CryptoError::InvalidKeyLength { .. } => ErrorKind::InvalidConfig,
        CryptoError::Io(io) => io_kind(io),
        CryptoError::Encrypt | CryptoError::Task(_) => ErrorKind::InternalError,
    }
}

fn io_kind(e: &io::Error) -> ErrorKind {
    if is_disk_full(e) {
        return ErrorKind::StorageFull;
    }
    match e.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
        io::ErrorKind::TimedOut
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => ErrorKind::NetworkTimeout,
        _ => ErrorKind::InternalError,
    }
}

fn is_disk_full(e: &io::Error) -> bool {
    #[cfg(unix)]
    const DISK_FULL: &[i32] = &[28]; // ENOSPC
    #[cfg(windows)]
    const DISK_FULL: &[i32] = &[39, 112]; // ERROR_HANDLE_DISK_FULL, ERROR_DISK_FULL
    #[cfg(not(any(unix, windows)))]
    const DISK_FULL: &[i32] = &[];

    e.raw_os_error().is_some_and(|code| DISK_FULL.contains(&code))
}

fn sqlite_kind(e: &rusqlite::Error) -> ErrorKind {
    use rusqlite::ErrorCode;
    match e.sqlite_error_code() {
        Some(ErrorCode::DiskFull) => ErrorKind::StorageFull,
        Some(ErrorCode::PermissionDenied) | Some(ErrorCode::ReadOnly) => {
            ErrorKind::PermissionDenied
        }
        Some(ErrorCode::CannotOpen) => ErrorKind::NotFound,
        _ => ErrorKind::DatabaseError,
    }
}

struct Patterns {
    home: Regex,
    system: Regex,
    ip: Regex,
    id: Regex,
}

fn build_patterns() -> Result<Patterns, regex_lite::Error> {
    Ok(Patterns {
        home: Regex::new(r#"(^|[\s'"(=:])/(?:home|Users)/[^/\s]+"#)?,
        system: Regex::new(
            r#"(^|[\s'"(=:])/(?:var/log|var/tmp|var/lib|var/cache|tmp|var|etc|usr|opt|run)/"#,
        )?,
        ip: Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}(?::\d{1,5})?\b")?,
        id: Regex::new(
            r"(?i)\b(?:request_id|session_id|txn_id|id|uuid|key|token)\s*[=:]\s*[A-Za-z0-9._-]+",
        )?,
    })
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS.get_or_init(|| build_patterns().ok()).as_ref()
}

/// Strip path prefixes and redact addresses and identifiers.
pub fn sanitize(message: &str) -> String {
    let Some(p) = patterns() else {
        return "[REDACTED]".to_string();
    };
    let out = p.home.replace_all(message, "${1}~");
    let out = p.system.replace_all(&out, "${1}/");
    let out = p.ip.replace_all(&out, "[REDACTED_IP]");
    let out = p.id.replace_all(&out, "[REDACTED_ID]");
    out.into_owned()
}
