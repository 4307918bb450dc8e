//! IPC error types

use thiserror::Error;

/// IPC error types
#[derive(Debug, Error)]
pub enum IpcError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Protocol version mismatch
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersionMismatch { expected: u32, actual: u32 },

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Payload does not match the shape the command expects
    #[error("Invalid payload for '{command}': {reason}")]
    InvalidPayload { command: String, reason: String },
}

impl IpcError {
    /// Check if this error means the frame itself was bad.
    ///
    /// The channel is still usable after a malformed frame; the receiver
    /// should report it and keep reading.
    pub fn is_malformed_frame(&self) -> bool {
        matches!(
            self,
            IpcError::DeserializationError(_)
                | IpcError::ProtocolVersionMismatch { .. }
                | IpcError::InvalidMessage(_)
        )
    }
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        IpcError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            IpcError::IoError(err.to_string())
        } else if err.is_data() || err.is_syntax() || err.is_eof() {
            IpcError::DeserializationError(err.to_string())
        } else {
            IpcError::SerializationError(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_malformed_frame() {
        assert!(IpcError::ProtocolVersionMismatch { expected: 1, actual: 2 }.is_malformed_frame());
        assert!(IpcError::DeserializationError("eof".to_string()).is_malformed_frame());
        assert!(!IpcError::IoError("broken pipe".to_string()).is_malformed_frame());
        assert!(!IpcError::ConnectionClosed.is_malformed_frame());
    }

    #[test]
    fn test_from_serde_error_is_deserialization() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(IpcError::from(err), IpcError::DeserializationError(_)));
    }
}
