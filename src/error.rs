//! Error handling for the chat service

use std::fmt;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat service error types
#[derive(Debug, Clone)]
pub enum ChatError {
    /// Transport-level failures (accept/connect/read/write)
    Network(String),
    /// Malformed or unexpected frame in a command sequence
    Protocol(String),
    /// Connection-level failures
    Connection(String),
    /// Configuration error
    Config(String),
    /// Room name not present in the registry
    RoomNotFound(String),
    /// Room name already taken
    RoomExists(String),
    /// Room registry is at capacity
    RegistryFull(String),
    /// The server refused a request without giving a reason
    Refused(String),
    /// Server internal error
    Internal(String),
}

impl ChatError {
    /// Create a network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        ChatError::Network(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        ChatError::Protocol(msg.into())
    }

    /// Create a connection error
    pub fn connection<T: Into<String>>(msg: T) -> Self {
        ChatError::Connection(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        ChatError::Config(msg.into())
    }

    /// Create a room not found error
    pub fn room_not_found<T: Into<String>>(msg: T) -> Self {
        ChatError::RoomNotFound(msg.into())
    }

    /// Create a room exists error
    pub fn room_exists<T: Into<String>>(msg: T) -> Self {
        ChatError::RoomExists(msg.into())
    }

    /// Create a registry full error
    pub fn registry_full<T: Into<String>>(msg: T) -> Self {
        ChatError::RegistryFull(msg.into())
    }

    /// Create a refused error
    pub fn refused<T: Into<String>>(msg: T) -> Self {
        ChatError::Refused(msg.into())
    }

    /// Create an internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        ChatError::Internal(msg.into())
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Network(msg) => write!(f, "Network error: {}", msg),
            ChatError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            ChatError::Connection(msg) => write!(f, "Connection error: {}", msg),
            ChatError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ChatError::RoomNotFound(msg) => write!(f, "Room not found: {}", msg),
            ChatError::RoomExists(msg) => write!(f, "Room already exists: {}", msg),
            ChatError::RegistryFull(msg) => write!(f, "Room registry full: {}", msg),
            ChatError::Refused(msg) => write!(f, "Request refused: {}", msg),
            ChatError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Network(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Config(format!("JSON error: {}", err))
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        ChatError::Internal(format!("Anyhow error: {}", err))
    }
}
