//! # Sync Error Types
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  InvalidMessage         │ │
//! │  │  InvalidUrl     │  │  Disconnected   │  │  SerializationFailed    │ │
//! │  │  ConfigLoad/Save│  │  Timeout, TLS   │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │     Agent       │  │     Core        │                              │
//! │  │                 │  │                 │                              │
//! │  │  ChannelError   │  │  CoreError      │  (user errors, overruns,     │
//! │  │  AlreadyConnect │  │  (wrapped)      │   storage failures)          │
//! │  │  ShuttingDown   │  │                 │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use servo_core::CoreError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid panel configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid controller URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Disconnected from controller")]
    Disconnected,

    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// The controller answered the upgrade with a 4xx status.
    #[error("Controller rejected the WebSocket handshake (HTTP {0})")]
    HandshakeRejected(u16),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// A frame parsed as JSON but its payload did not match its event name.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Agent Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Channel is already connected")]
    AlreadyConnected,

    #[error("Control agent is shutting down")]
    ShuttingDown,

    // =========================================================================
    // Core Errors
    // =========================================================================
    #[error(transparent)]
    Core(#[from] CoreError),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => SyncError::Disconnected,
            WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => SyncError::TlsError(tls.to_string()),
            WsError::Url(url) => SyncError::InvalidUrl(url.to_string()),
            WsError::Http(response) if response.status().is_client_error() => {
                SyncError::HandshakeRejected(response.status().as_u16())
            }
            WsError::Http(response) => {
                SyncError::ConnectionFailed(format!("HTTP {}", response.status()))
            }
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if reconnecting may clear the error. The transport gives
    /// up at once on anything else.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Disconnected
                | SyncError::Timeout(_)
                | SyncError::WebSocketError(_)
        )
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::HandshakeRejected(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Operator input errors. These are reported back, never logged as faults.
    pub fn is_user_error(&self) -> bool {
        matches!(self, SyncError::Core(core) if core.is_user_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servo_core::ValidationError;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("refused".into()).is_retryable());
        assert!(SyncError::Disconnected.is_retryable());
        assert!(SyncError::Timeout(10).is_retryable());

        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
        assert!(!SyncError::AlreadyConnected.is_retryable());
    }

    #[test]
    fn test_categories() {
        let overrun = SyncError::from(CoreError::ProtocolOverrun {
            total: 3,
            received: 4,
        });
        assert!(!overrun.is_user_error());
        assert!(!overrun.is_retryable());

        let missing = SyncError::from(CoreError::Validation(ValidationError::Required {
            field: "preset name".into(),
        }));
        assert!(missing.is_user_error());
        assert_eq!(
            missing.to_string(),
            "Validation error: preset name is required"
        );

        assert!(SyncError::InvalidUrl("x".into()).is_config_error());
        assert!(SyncError::HandshakeRejected(403).is_config_error());
        assert!(!SyncError::HandshakeRejected(403).is_retryable());
    }
}
