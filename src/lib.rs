//! SudoChat — a multi-room TCP chat service
//!
//! This library provides:
//! - a directory server that lets clients discover, create, and join chat rooms
//! - a per-room broadcast engine with its own listener, member set, and message cache
//! - a length-prefixed wire framer shared by the directory and every room
//! - protocol clients used by the terminal front end and the tests

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::{DirectoryClient, RoomClient};
pub use error::{ChatError, Result};
pub use protocol::{Framer, Incoming, ACK, NACK};
pub use server::{ChatRoom, DirectoryServer, RoomRegistry};

use std::path::Path;

use serde::Deserialize;

/// Control command tokens exchanged with the directory server
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Commands {
    /// Request the list of open rooms
    pub list_rooms: String,
    /// Request the port of a named room
    pub get_room: String,
    /// Request creation of a new room
    pub create_room: String,
}

impl Default for Commands {
    fn default() -> Self {
        Self {
            list_rooms: "LIST_ROOMS".to_string(),
            get_room: "GET_ROOM".to_string(),
            create_room: "CREATE_ROOM".to_string(),
        }
    }
}

/// Chat service configuration
///
/// Constructed once at startup and passed by reference into the directory
/// and into every room. Loadable from a JSON file with the same kebab-case
/// keys as the original `config.json`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Address the directory server binds to
    pub server_ip: String,
    /// Directory listening port; rooms occupy the ports above it
    pub server_port: u16,
    /// Width in bytes of the big-endian frame length header
    pub header_bytes: usize,
    /// Sentinel frame signaling voluntary departure from a connection
    pub disconnect_msg: String,
    /// Token a user types to leave a chat session
    pub exit_msg: String,
    /// Maximum number of rooms the registry will hold
    #[serde(rename = "max-chat-rooms")]
    pub max_rooms: usize,
    /// Control command tokens
    pub commands: Commands,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_ip: "127.0.0.1".to_string(),
            server_port: 5050,
            header_bytes: 4,
            disconnect_msg: "!DISCONNECT".to_string(),
            exit_msg: "!exit".to_string(),
            max_rooms: 5,
            commands: Commands::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ChatError::config(format!("Failed to read config file: {}", e)))?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Address the directory server listens on
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_ip, self.server_port)
    }

    /// Address of a room listening on the given port
    pub fn room_addr(&self, port: u16) -> String {
        format!("{}:{}", self.server_ip, port)
    }

    /// Port of the main room pre-registered at startup
    pub fn main_room_port(&self) -> u16 {
        self.server_port + 1
    }
}
