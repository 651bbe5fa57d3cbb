//! Error types for the protocol core.

use std::io;
use std::panic::Location;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// ORA numbers that indicate the session or transport is gone; any of these
/// forces a full connection teardown.
const FATAL_ORA_NUMBERS: &[u32] = &[
    28, 600, 602, 603, 604, 609, 1012, 1033, 1034, 1089, 1090, 1092, 3111, 3113, 3114, 12152,
    12203, 12500, 12571, 27146, 28511,
];

/// One failed row of a batch DML execution (ORA-24381).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchError {
    /// Zero-based row offset within the submitted batch.
    pub row_offset: u32,
    /// ORA error number for that row.
    pub number: u16,
}

/// An error reported by the database server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerError {
    /// ORA error number.
    pub number: u32,
    /// Error message as sent by the server.
    pub message: String,
    /// Offset of the error within the SQL text, when the server supplies one.
    pub position: u16,
    /// Cursor the error relates to.
    pub cursor_id: u16,
    /// Row count at the point of failure.
    pub row_count: u64,
    /// ROWID associated with the error, if any.
    pub rowid: Option<String>,
    /// Per-row errors for batch DML.
    pub batch_errors: Vec<BatchError>,
}

impl ServerError {
    /// Whether this error means the connection itself is unusable.
    pub fn is_fatal(&self) -> bool {
        FATAL_ORA_NUMBERS.contains(&self.number)
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ORA-{:05}: {}", self.number, self.message)
    }
}

/// Error type for the protocol core.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during network communication.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic transport-level failure.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// The server closed the connection without a logoff exchange.
    #[error("connection closed by server without logoff")]
    UncleanShutdown,

    /// A TNS frame or TTC message could not be decoded.
    #[error("message decoding failed: {message} (at {location})")]
    MessageDecodingFailure {
        message: String,
        location: &'static Location<'static>,
    },

    /// The TLS handler could not be installed on the transport.
    #[error("failed to install TLS handler: {message}")]
    FailedToAddTlsHandler { message: String },

    /// TLS certificate verification failed.
    #[error("failed to verify TLS certificates: {message}")]
    FailedToVerifyTlsCertificates { message: String },

    /// The server sent a message type that is not valid in the current state.
    #[error("unexpected message type {message_type} while {context}")]
    UnexpectedBackendMessage {
        message_type: u8,
        context: &'static str,
    },

    /// Unexpected packet type received.
    #[error("unexpected packet type: expected {expected}, got {actual}")]
    UnexpectedPacketType { expected: u8, actual: u8 },

    /// Server offered a protocol version below the supported floor.
    #[error("server protocol version {version} not supported (minimum {minimum})")]
    ServerVersionNotSupported { version: u16, minimum: u16 },

    /// The server's national character set is not the UTF-16 variant.
    #[error("national character set {ncharset_id} not supported (AL16UTF16 required)")]
    NationalCharsetNotSupported { ncharset_id: u16 },

    /// Connecting by SID was requested but the listener does not allow it.
    #[error("connecting by SID is not supported by this listener")]
    SidNotSupported,

    /// A required authentication parameter was missing from a server reply.
    #[error("missing parameter in server reply: {name}")]
    MissingParameter { name: String },

    /// A task was rejected because the connection is shutting down.
    #[error("connection is closing")]
    ClientClosesConnection,

    /// A task was rejected because the connection is already closed.
    #[error("connection is closed")]
    ClientClosedConnection,

    /// The statement was cancelled via the row stream.
    #[error("query cancelled")]
    QueryCancelled,

    /// The SQL text could not be analyzed.
    #[error("malformed query: {message}")]
    MalformedQuery { message: String },

    /// A bind placeholder has no bound value at execute time.
    #[error("no value bound for parameter {position} (:{name})")]
    MissingBindValue { position: usize, name: String },

    /// Connection refused by the listener.
    #[error("connection refused: {message}")]
    ConnectionRefused { message: String },

    /// The listener does not know the requested service.
    #[error("invalid service name: {service_name}")]
    InvalidServiceName { service_name: String },

    /// The listener does not know the requested SID.
    #[error("invalid SID: {sid}")]
    InvalidSid { sid: String },

    /// Unsupported verifier type offered during authentication.
    #[error("unsupported verifier type: {verifier_type:#x}")]
    UnsupportedVerifierType { verifier_type: u32 },

    /// The server's authentication response failed verification.
    #[error("invalid server response during authentication")]
    InvalidServerResponse,

    /// Connection timed out during TCP connect.
    #[error("connection to {host}:{port} timed out after {timeout:?}")]
    ConnectionTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    /// The connect descriptor could not be built or parsed.
    #[error("invalid connect descriptor: {message}")]
    InvalidConnectDescriptor { message: String },

    /// An error reported by the database server.
    #[error("{0}")]
    Server(ServerError),
}

impl Error {
    /// Create a transport-level connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a decoding failure recording the caller's location.
    #[track_caller]
    pub fn decoding(message: impl Into<String>) -> Self {
        Self::MessageDecodingFailure {
            message: message.into(),
            location: Location::caller(),
        }
    }

    /// Create a malformed-query error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedQuery {
            message: message.into(),
        }
    }

    /// Create a server error from a bare number and message.
    pub fn server(number: u32, message: impl Into<String>) -> Self {
        Self::Server(ServerError {
            number,
            message: message.into(),
            ..ServerError::default()
        })
    }

    /// Whether this error requires tearing down the connection.
    ///
    /// Decoding and transport failures are always fatal; server errors only
    /// for the operational ORA numbers. Cancellation is never fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Io(_)
            | Error::Connection { .. }
            | Error::UncleanShutdown
            | Error::MessageDecodingFailure { .. }
            | Error::UnexpectedBackendMessage { .. }
            | Error::UnexpectedPacketType { .. } => true,
            Error::Server(e) => e.is_fatal(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_server_errors() {
        assert!(Error::server(28, "your session has been killed").is_fatal());
        assert!(Error::server(3113, "end-of-file on communication channel").is_fatal());
        assert!(Error::server(12571, "TNS:packet writer failure").is_fatal());
        assert!(!Error::server(1, "unique constraint violated").is_fatal());
        assert!(!Error::server(1722, "invalid number").is_fatal());
        assert!(!Error::server(1403, "no data found").is_fatal());
    }

    #[test]
    fn test_cancellation_not_fatal() {
        assert!(!Error::QueryCancelled.is_fatal());
    }

    #[test]
    fn test_decoding_is_fatal() {
        assert!(Error::decoding("bad length").is_fatal());
    }

    #[test]
    fn test_server_error_display() {
        let err = Error::server(942, "table or view does not exist");
        assert_eq!(err.to_string(), "ORA-00942: table or view does not exist");
    }
}
