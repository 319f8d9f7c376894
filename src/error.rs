//! The error taxonomy for the TDS core: configuration, transport, TLS, protocol,
//! authentication, execution and column-encryption failures all flow through this one enum so
//! that callers branch on a stable discriminant instead of a localized message (see
//! `DESIGN.md`, "stable error kinds instead of message text").

use std::fmt;
use std::io;

/// A message sent by the server in an `ERR` or `INFO` token.
#[derive(Debug, Clone)]
pub struct ServerMessage {
    pub number: i32,
    pub state: u8,
    pub class: u8,
    pub message: String,
    pub server_name: String,
    pub procedure_name: String,
    pub line_number: u32,
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Why a TLS handshake failed, used to decide whether an `open()` retry is worthwhile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsFailureKind {
    /// The handshake never started (bad config, unreachable trust anchor). Fatal.
    HandshakeNotStarted,
    /// The handshake started but the server closed the connection mid-record. Recoverable by
    /// the connection director: the caller may retry `open()`.
    HandshakeStarted,
    /// The server's handshake response was truncated (EOF before a complete TLS record).
    TruncatedResponse,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("network error resolving `{host}:{port}`: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("TLS error ({kind:?}): {message}")]
    Tls {
        kind: TlsFailureKind,
        message: String,
    },

    #[error("invalid TDS protocol data: {0}")]
    Protocol(String),

    #[error("column encryption is required by this statement but not supported by the server")]
    ColumnEncryptionNotSupportedByServer,

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error(transparent)]
    Server(#[from] MssqlDatabaseError),

    #[error("CEK decryption failed after exhausting all key-store providers: {0}")]
    CekDecryptionFailed(String),

    #[error("unexpected server schema in describe-parameter-encryption result set: {0}")]
    UnexpectedServerSchema(String),

    #[error("enclave attestation failed: {0}")]
    EnclaveAttestation(String),

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("FIPS configuration is invalid: encryption must be required, trust-server-certificate must be false, and a trust store type must accompany a trust store path")]
    InvalidFipsConfig,

    #[error("unsupported configuration: {0}")]
    UnsupportedConfig(String),

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("server redirected the connection to {host}:{port}")]
    Redirect { host: String, port: u16 },
}

/// A server-reported SQL error (the payload of an `ERR` token), wrapped so it can flow through
/// [`Error::Server`] while still exposing the fields a higher layer needs for a `DatabaseError`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct MssqlDatabaseError(pub ServerMessage);

impl MssqlDatabaseError {
    pub fn message(&self) -> &str {
        &self.0.message
    }

    pub fn number(&self) -> i32 {
        self.0.number
    }

    pub fn state(&self) -> u8 {
        self.0.state
    }

    pub fn class(&self) -> u8 {
        self.0.class
    }
}

impl Error {
    pub fn tls(kind: TlsFailureKind, message: impl fmt::Display) -> Self {
        Error::Tls {
            kind,
            message: message.to_string(),
        }
    }

    pub fn protocol(message: impl fmt::Display) -> Self {
        Error::Protocol(message.to_string())
    }

    pub fn configuration(message: impl fmt::Display) -> Self {
        Error::Configuration(message.to_string())
    }

    /// `true` for error classes the connection director is allowed to retry `open()` on.
    pub fn is_intermittent(&self) -> bool {
        matches!(
            self,
            Error::Tls {
                kind: TlsFailureKind::HandshakeStarted | TlsFailureKind::TruncatedResponse,
                ..
            }
        )
    }

    /// `true` when the connection itself died underneath an in-flight query rather than the
    /// server rejecting the query — the case connection resiliency (§4.4/§9 scenario S4) covers
    /// by reconnecting and resubmitting, as opposed to a `Server`/`Protocol` error that a retry
    /// would just reproduce.
    pub fn is_broken_connection(&self) -> bool {
        matches!(self, Error::Io(_) | Error::ConnectionClosed)
            || matches!(
                self,
                Error::Tls {
                    kind: TlsFailureKind::HandshakeStarted | TlsFailureKind::TruncatedResponse,
                    ..
                }
            )
    }
}

/// Mirrors the teacher's `err_protocol!` macro: formats a message and wraps it in
/// [`Error::Protocol`] without requiring the caller to import `format!` plumbing at each call
/// site.
macro_rules! err_protocol {
    ($($fmt_args:tt)*) => {
        $crate::error::Error::protocol(format!($($fmt_args)*))
    };
}

pub(crate) use err_protocol;

pub type Result<T> = std::result::Result<T, Error>;
