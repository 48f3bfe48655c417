//! Room registry: name → room metadata with a capacity ceiling
//!
//! The registry is the single allocator of room ports. Ports are assigned
//! monotonically (`base_port + 1 + creation_index`) and never reused while
//! registered; rooms are never removed, so registered names and ports stay
//! valid for the life of the process.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{ChatError, Result};
use crate::server::room::ChatRoom;
use crate::Config;

/// Registry of open rooms, shared between control connection handlers
pub struct RoomRegistry {
    config: Arc<Config>,
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// Room name → listening port
    ports: HashMap<String, u16>,
    /// Names in registration order, for `list`
    order: Vec<String>,
}

impl RoomRegistry {
    /// Create an empty registry
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Create and register a new room bound to the next sequential port.
    ///
    /// Capacity and uniqueness are checked, the port allocated, and the
    /// listener bound all under one write guard, so a failure on any step
    /// leaves the registry unchanged. The returned room is not yet running;
    /// the caller spawns its event loop.
    pub async fn create(&self, name: &str) -> Result<ChatRoom> {
        let mut inner = self.inner.write().await;

        if inner.order.len() >= self.config.max_rooms {
            return Err(ChatError::registry_full(format!(
                "Registry already holds {} rooms",
                inner.order.len()
            )));
        }
        if inner.ports.contains_key(name) {
            return Err(ChatError::room_exists(name));
        }

        let next = u64::from(self.config.server_port) + 1 + inner.order.len() as u64;
        let port = u16::try_from(next).map_err(|_| {
            ChatError::config(format!("Room port {} is beyond the valid port range", next))
        })?;
        let room = ChatRoom::bind(Arc::clone(&self.config), name, port).await?;

        inner.ports.insert(name.to_string(), room.port());
        inner.order.push(name.to_string());

        Ok(room)
    }

    /// Look up the listening port of a registered room
    pub async fn lookup(&self, name: &str) -> Option<u16> {
        self.inner.read().await.ports.get(name).copied()
    }

    /// Room names in registration order
    pub async fn list(&self) -> Vec<String> {
        self.inner.read().await.order.clone()
    }

    /// Number of registered rooms
    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    /// Whether the registry can hold another room
    pub async fn has_capacity(&self) -> bool {
        self.inner.read().await.order.len() < self.config.max_rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_util::{free_port_span, test_config};

    #[tokio::test]
    async fn test_sequential_port_assignment() {
        let base = free_port_span(4).await;
        let registry = RoomRegistry::new(test_config(base, 4));

        let main = registry.create("Group Chat").await.unwrap();
        assert_eq!(main.port(), base + 1);

        let trivia = registry.create("Trivia").await.unwrap();
        assert_eq!(trivia.port(), base + 2);

        let games = registry.create("Games").await.unwrap();
        assert_eq!(games.port(), base + 3);

        assert_eq!(registry.lookup("Trivia").await, Some(base + 2));
        assert_eq!(registry.lookup("Nowhere").await, None);
    }

    #[tokio::test]
    async fn test_duplicate_name_leaves_registry_unchanged() {
        let base = free_port_span(3).await;
        let registry = RoomRegistry::new(test_config(base, 4));

        registry.create("Group Chat").await.unwrap();
        registry.create("Trivia").await.unwrap();

        let err = registry.create("Trivia").await.unwrap_err();
        assert!(matches!(err, ChatError::RoomExists(_)));

        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.list().await, vec!["Group Chat", "Trivia"]);
        // Next creation still gets the next sequential port
        let room = registry.create("Games").await.unwrap();
        assert_eq!(room.port(), base + 3);
    }

    #[tokio::test]
    async fn test_capacity_ceiling() {
        let base = free_port_span(3).await;
        let registry = RoomRegistry::new(test_config(base, 2));

        registry.create("Group Chat").await.unwrap();
        registry.create("Trivia").await.unwrap();
        assert!(!registry.has_capacity().await);

        for name in ["Overflow", "Trivia", "Another"] {
            let err = registry.create(name).await.unwrap_err();
            assert!(matches!(err, ChatError::RegistryFull(_)));
        }
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_port_range_exhaustion_fails_without_mutation() {
        // A base port at the top of the range leaves no room ports at all
        let registry = RoomRegistry::new(test_config(u16::MAX, 4));

        let err = registry.create("Group Chat").await.unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
        assert_eq!(registry.len().await, 0);
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_preserves_registration_order() {
        let base = free_port_span(5).await;
        let registry = RoomRegistry::new(test_config(base, 5));

        for name in ["Group Chat", "Zebra", "Alpha", "Middle"] {
            registry.create(name).await.unwrap();
        }
        assert_eq!(
            registry.list().await,
            vec!["Group Chat", "Zebra", "Alpha", "Middle"]
        );
    }
}
