//! Server side of the chat service
//!
//! This module provides:
//! - **Directory Dispatcher**: accepts control connections and executes the
//!   list/get/create room protocol
//! - **Room Registry**: name → room metadata with uniqueness and a capacity
//!   ceiling, allocating monotone never-reused ports
//! - **Chat Room**: one independently addressed listener and event loop per
//!   room, owning its member set, message cache, and broadcast logic

pub mod directory;
pub mod registry;
pub mod room;

pub use directory::{DirectoryServer, MAIN_ROOM_NAME};
pub use registry::RoomRegistry;
pub use room::{ChatRoom, MESSAGE_CACHE_LIMIT, REPLAY_COUNT};

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::Arc;

    use tokio::net::TcpListener;

    use crate::Config;

    /// Find a base port with `span` consecutive free ports above it.
    ///
    /// The listeners are dropped before returning, so the caller must bind
    /// promptly; good enough for loopback tests.
    pub async fn free_port_span(span: u16) -> u16 {
        for _ in 0..16 {
            let probe = match TcpListener::bind(("127.0.0.1", 0)).await {
                Ok(probe) => probe,
                Err(_) => continue,
            };
            let base = probe.local_addr().unwrap().port();
            if base.checked_add(span).is_none() {
                continue;
            }

            let mut held = vec![probe];
            let mut all_free = true;
            for offset in 1..=span {
                match TcpListener::bind(("127.0.0.1", base + offset)).await {
                    Ok(listener) => held.push(listener),
                    Err(_) => {
                        all_free = false;
                        break;
                    }
                }
            }
            if all_free {
                return base;
            }
        }
        panic!("could not find {} consecutive free ports", span + 1);
    }

    /// Loopback configuration for server tests
    pub fn test_config(base_port: u16, max_rooms: usize) -> Arc<Config> {
        Arc::new(Config {
            server_port: base_port,
            max_rooms,
            ..Config::default()
        })
    }
}
