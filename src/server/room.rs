//! Chat room engine: one listener and one event loop per room
//!
//! Each room runs on its own task from the moment it is spawned until
//! shutdown, owning its member set and message cache outright. Per-member
//! reader tasks decode frames and feed a single event channel, so membership
//! and cache mutation stay single-writer with no locking. Broadcast delivery
//! is at-most-once and fire-and-forget.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::protocol::{Framer, Incoming};
use crate::Config;

/// Maximum number of cached messages per room
pub const MESSAGE_CACHE_LIMIT: usize = 10;

/// Number of cached messages replayed to a newly joined member
pub const REPLAY_COUNT: usize = 5;

/// Events delivered to a room's event loop
enum RoomEvent {
    /// A connection completed its username handshake
    Join { username: String, stream: TcpStream },
    /// A member sent a chat frame
    Message { id: Uuid, text: String },
    /// A member disconnected, voluntarily or not
    Leave { id: Uuid },
}

/// A member currently registered in the room
struct Member {
    username: String,
    writer: OwnedWriteHalf,
}

/// An independently addressed chat room, bound but not yet running
#[derive(Debug)]
pub struct ChatRoom {
    name: String,
    port: u16,
    listener: TcpListener,
    framer: Framer,
    config: Arc<Config>,
}

impl ChatRoom {
    /// Bind the room's listener on the given port (0 picks an ephemeral port)
    pub async fn bind(config: Arc<Config>, name: &str, port: u16) -> Result<Self> {
        let framer = Framer::from_config(&config)?;
        let listener = TcpListener::bind(config.room_addr(port)).await?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            name: name.to_string(),
            port,
            listener,
            framer,
            config,
        })
    }

    /// Room name (unique key in the registry)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Port the room listens on
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the room's event loop until the shutdown signal fires.
    ///
    /// The loop multiplexes the listener, the room event channel, and the
    /// shutdown channel; sockets are closed deterministically on exit.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let ChatRoom {
            name,
            port,
            listener,
            framer,
            config,
        } = self;

        let mut state = RoomState {
            name,
            framer,
            config,
            members: HashMap::new(),
            roster: Vec::new(),
            cache: VecDeque::with_capacity(MESSAGE_CACHE_LIMIT),
        };

        // Kept alive for the life of the loop so `rx` never yields None
        let (tx, mut rx) = mpsc::unbounded_channel();

        info!("<Welcome to the {} Room!>", state.name);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        tokio::spawn(handshake(state.framer, stream, tx.clone()));
                    }
                    Err(e) => error!("room {:?}: accept failed: {}", state.name, e),
                },
                Some(event) = rx.recv() => state.handle_event(event, &tx).await,
                _ = shutdown.changed() => break,
            }
        }

        debug!("room {:?} on port {} shutting down", state.name, port);
        // Dropping the members closes their sockets
        state.members.clear();
        drop(listener);
    }
}

/// Mutable room state, owned exclusively by the room's event loop
struct RoomState {
    name: String,
    framer: Framer,
    config: Arc<Config>,
    members: HashMap<Uuid, Member>,
    /// Member ids in join order, for the population notice
    roster: Vec<Uuid>,
    /// Bounded FIFO of relayed messages, oldest first
    cache: VecDeque<String>,
}

impl RoomState {
    async fn handle_event(&mut self, event: RoomEvent, tx: &mpsc::UnboundedSender<RoomEvent>) {
        match event {
            RoomEvent::Join { username, stream } => self.handle_join(username, stream, tx).await,
            RoomEvent::Message { id, text } => self.handle_message(id, text).await,
            RoomEvent::Leave { id } => self.handle_leave(id).await,
        }
    }

    /// Greet a new member, replay recent messages, register, and announce.
    ///
    /// The greeting sequence (welcome, population notice, replay) goes out
    /// strictly before registration, so the new member never sees a post-join
    /// broadcast ahead of the replay.
    async fn handle_join(
        &mut self,
        username: String,
        stream: TcpStream,
        tx: &mpsc::UnboundedSender<RoomEvent>,
    ) {
        let (reader, mut writer) = stream.into_split();

        let mut greeting = vec![
            format!("<Welcome to the {} Room!>", self.name),
            self.population_notice(),
        ];
        greeting.extend(self.replay_messages());

        for line in &greeting {
            if let Err(e) = self.framer.write_frame(&mut writer, line).await {
                warn!(
                    "room {:?}: greeting '{}' failed, dropping connection: {}",
                    self.name, username, e
                );
                return;
            }
        }

        let id = Uuid::new_v4();
        tokio::spawn(pump_member(
            self.framer,
            Arc::clone(&self.config),
            reader,
            id,
            tx.clone(),
        ));
        self.members.insert(
            id,
            Member {
                username: username.clone(),
                writer,
            },
        );
        self.roster.push(id);

        let notice = format!(
            "<{} has entered the chat! ({} users online)>",
            username,
            self.members.len() - 1
        );
        info!("{}", notice);
        self.broadcast(Some(id), &notice).await;
    }

    /// Relay one chat frame: prefix with the sender, cache, broadcast
    async fn handle_message(&mut self, id: Uuid, text: String) {
        let Some(member) = self.members.get(&id) else {
            return;
        };

        let line = format!("<{}> {}", member.username, text);
        info!("{}", line);
        self.remember(line.clone());
        self.broadcast(Some(id), &line).await;
    }

    /// Deregister a member and announce the updated head count
    async fn handle_leave(&mut self, id: Uuid) {
        // The reader task and a failed broadcast may both report the same
        // departure; only the first one wins
        let Some(member) = self.members.remove(&id) else {
            return;
        };
        self.roster.retain(|m| *m != id);

        let notice = format!(
            "<{} has disconnected ({} users online)>",
            member.username,
            self.members.len()
        );
        info!("{}", notice);
        self.broadcast(None, &notice).await;
    }

    /// Append to the bounded cache, evicting the oldest entry at the limit
    fn remember(&mut self, line: String) {
        if self.cache.len() >= MESSAGE_CACHE_LIMIT {
            self.cache.pop_front();
        }
        self.cache.push_back(line);
    }

    /// The most recent cached messages, oldest first
    fn replay_messages(&self) -> Vec<String> {
        self.cache
            .iter()
            .skip(self.cache.len().saturating_sub(REPLAY_COUNT))
            .cloned()
            .collect()
    }

    /// Phrase the current population for a member about to join
    fn population_notice(&self) -> String {
        let users: Vec<&str> = self
            .roster
            .iter()
            .filter_map(|id| self.members.get(id))
            .map(|m| m.username.as_str())
            .collect();

        match users.len() {
            0 => "<You are the only user in the room!>".to_string(),
            1 => format!("<{} is in the room!>", users[0]),
            2 => format!("<{} and {} are in the room!>", users[0], users[1]),
            3 => format!(
                "<{}, {} and {} are in the room!>",
                users[0], users[1], users[2]
            ),
            n => format!(
                "<{}, {} and {} others are in the room!>",
                users[0],
                users[1],
                n - 2
            ),
        }
    }

    /// Send a frame to every member except `exclude`, fire-and-forget
    async fn broadcast(&mut self, exclude: Option<Uuid>, line: &str) {
        let encoded = match self.framer.encode(line) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("room {:?}: cannot encode broadcast: {}", self.name, e);
                return;
            }
        };

        for (id, member) in self.members.iter_mut() {
            if Some(*id) == exclude {
                continue;
            }
            if let Err(e) = member.writer.write_all(&encoded).await {
                // Abandoned, no retry; the member's reader task reports the
                // disconnect when it sees the close
                warn!(
                    "room {:?}: send to '{}' failed: {}",
                    self.name, member.username, e
                );
            }
        }
    }
}

/// Read the username frame from a freshly accepted connection.
///
/// Runs off the room loop so a slow client cannot stall the room; a failed
/// handshake drops the connection silently.
async fn handshake(framer: Framer, mut stream: TcpStream, tx: mpsc::UnboundedSender<RoomEvent>) {
    match framer.read_frame(&mut stream).await {
        Ok(Incoming::Frame(username)) if !username.is_empty() => {
            let _ = tx.send(RoomEvent::Join { username, stream });
        }
        Ok(_) => debug!("connection dropped before sending a username"),
        Err(e) => warn!("username handshake failed: {}", e),
    }
}

/// Pump decoded frames from one member into the room's event channel.
///
/// Only a closed peer, an empty frame, or the disconnect token deregisters
/// the member; a malformed frame is logged and skipped.
async fn pump_member(
    framer: Framer,
    config: Arc<Config>,
    mut reader: OwnedReadHalf,
    id: Uuid,
    tx: mpsc::UnboundedSender<RoomEvent>,
) {
    loop {
        match framer.read_frame(&mut reader).await {
            Ok(Incoming::Frame(text)) => {
                if text.is_empty() || text == config.disconnect_msg {
                    let _ = tx.send(RoomEvent::Leave { id });
                    break;
                }
                if tx.send(RoomEvent::Message { id, text }).is_err() {
                    break;
                }
            }
            Ok(Incoming::Closed) => {
                let _ = tx.send(RoomEvent::Leave { id });
                break;
            }
            Err(ChatError::Protocol(msg)) => {
                warn!("dropping malformed frame from member: {}", msg);
            }
            Err(e) => {
                error!("member read failed: {}", e);
                let _ = tx.send(RoomEvent::Leave { id });
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RoomClient;
    use crate::server::test_util::test_config;
    use std::time::Duration;

    async fn recv_text(client: &mut RoomClient) -> String {
        let incoming = tokio::time::timeout(Duration::from_secs(5), client.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("recv failed");
        match incoming {
            Incoming::Frame(text) => text,
            Incoming::Closed => panic!("room closed the connection"),
        }
    }

    async fn spawn_room(config: Arc<Config>, name: &str) -> (u16, watch::Sender<bool>) {
        let room = ChatRoom::bind(config, name, 0).await.unwrap();
        let port = room.port();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(room.run(rx));
        (port, tx)
    }

    #[tokio::test]
    async fn test_join_replay_and_broadcast_scenario() {
        let config = test_config(0, 5);
        let (port, _shutdown) = spawn_room(Arc::clone(&config), "Group Chat").await;

        let mut a = RoomClient::join(Arc::clone(&config), port, "A").await.unwrap();
        assert_eq!(recv_text(&mut a).await, "<Welcome to the Group Chat Room!>");
        assert_eq!(recv_text(&mut a).await, "<You are the only user in the room!>");

        let mut b = RoomClient::join(Arc::clone(&config), port, "B").await.unwrap();
        assert_eq!(recv_text(&mut b).await, "<Welcome to the Group Chat Room!>");
        assert_eq!(recv_text(&mut b).await, "<A is in the room!>");
        assert_eq!(
            recv_text(&mut a).await,
            "<B has entered the chat! (1 users online)>"
        );

        // A's message reaches B but is never echoed back to A
        a.send("hi").await.unwrap();
        assert_eq!(recv_text(&mut b).await, "<A> hi");
        b.send("yo").await.unwrap();
        assert_eq!(recv_text(&mut a).await, "<B> yo");

        // C joins with cache ["<A> hi", "<B> yo"]: welcome, population notice
        // naming A and B, then the replay in original order
        let mut c = RoomClient::join(Arc::clone(&config), port, "C").await.unwrap();
        assert_eq!(recv_text(&mut c).await, "<Welcome to the Group Chat Room!>");
        assert_eq!(recv_text(&mut c).await, "<A and B are in the room!>");
        assert_eq!(recv_text(&mut c).await, "<A> hi");
        assert_eq!(recv_text(&mut c).await, "<B> yo");

        let join_notice = "<C has entered the chat! (2 users online)>";
        assert_eq!(recv_text(&mut a).await, join_notice);
        assert_eq!(recv_text(&mut b).await, join_notice);
    }

    #[tokio::test]
    async fn test_replay_is_capped_and_ordered() {
        let config = test_config(0, 5);
        let (port, _shutdown) = spawn_room(Arc::clone(&config), "Busy").await;

        let mut a = RoomClient::join(Arc::clone(&config), port, "A").await.unwrap();
        recv_text(&mut a).await;
        recv_text(&mut a).await;
        let mut b = RoomClient::join(Arc::clone(&config), port, "B").await.unwrap();
        recv_text(&mut b).await;
        recv_text(&mut b).await;
        recv_text(&mut a).await; // join notice for B

        // Drain each message on B so the room is known to have processed it
        // before the next one is sent
        for n in 1..=12 {
            a.send(&format!("msg-{}", n)).await.unwrap();
            assert_eq!(recv_text(&mut b).await, format!("<A> msg-{}", n));
        }

        // A new member sees exactly the last 5, in original order, before
        // anything else from the room
        let mut c = RoomClient::join(Arc::clone(&config), port, "C").await.unwrap();
        recv_text(&mut c).await;
        recv_text(&mut c).await;
        for n in 8..=12 {
            assert_eq!(recv_text(&mut c).await, format!("<A> msg-{}", n));
        }
        a.send("after-join").await.unwrap();
        assert_eq!(recv_text(&mut c).await, "<A> after-join");
    }

    #[tokio::test]
    async fn test_cache_evicts_oldest_at_limit() {
        let config = test_config(0, 5);
        let mut state = RoomState {
            name: "t".to_string(),
            framer: Framer::from_config(&config).unwrap(),
            config,
            members: HashMap::new(),
            roster: Vec::new(),
            cache: VecDeque::new(),
        };

        for n in 1..=13 {
            state.remember(format!("line-{}", n));
        }

        assert_eq!(state.cache.len(), MESSAGE_CACHE_LIMIT);
        let retained: Vec<String> = state.cache.iter().cloned().collect();
        let expected: Vec<String> = (4..=13).map(|n| format!("line-{}", n)).collect();
        assert_eq!(retained, expected);

        assert_eq!(
            state.replay_messages(),
            (9..=13).map(|n| format!("line-{}", n)).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_population_notice_phrasing() {
        let config = test_config(0, 5);
        let (port, _shutdown) = spawn_room(Arc::clone(&config), "Crowd").await;

        let names = ["A", "B", "C", "D", "E"];
        let expected_notices = [
            "<You are the only user in the room!>",
            "<A is in the room!>",
            "<A and B are in the room!>",
            "<A, B and C are in the room!>",
            "<A, B and 2 others are in the room!>",
        ];

        let mut clients = Vec::new();
        for (name, expected) in names.iter().zip(expected_notices) {
            let mut client = RoomClient::join(Arc::clone(&config), port, name).await.unwrap();
            assert_eq!(recv_text(&mut client).await, "<Welcome to the Crowd Room!>");
            assert_eq!(recv_text(&mut client).await, expected);
            // Drain the join notice everyone else receives
            for earlier in clients.iter_mut() {
                recv_text(earlier).await;
            }
            clients.push(client);
        }
    }

    #[tokio::test]
    async fn test_disconnect_token_broadcasts_leave_notice() {
        let config = test_config(0, 5);
        let (port, _shutdown) = spawn_room(Arc::clone(&config), "Quiet").await;

        let mut a = RoomClient::join(Arc::clone(&config), port, "A").await.unwrap();
        recv_text(&mut a).await;
        recv_text(&mut a).await;
        let b = RoomClient::join(Arc::clone(&config), port, "B").await.unwrap();
        recv_text(&mut a).await; // join notice

        b.leave().await.unwrap();
        assert_eq!(
            recv_text(&mut a).await,
            "<B has disconnected (1 users online)>"
        );
    }

    #[tokio::test]
    async fn test_abrupt_close_is_treated_as_departure() {
        let config = test_config(0, 5);
        let (port, _shutdown) = spawn_room(Arc::clone(&config), "Flaky").await;

        let mut a = RoomClient::join(Arc::clone(&config), port, "A").await.unwrap();
        recv_text(&mut a).await;
        recv_text(&mut a).await;
        let b = RoomClient::join(Arc::clone(&config), port, "B").await.unwrap();
        recv_text(&mut a).await;

        drop(b); // socket closed without the disconnect token
        assert_eq!(
            recv_text(&mut a).await,
            "<B has disconnected (1 users online)>"
        );
    }

    #[tokio::test]
    async fn test_shutdown_closes_member_sockets() {
        let config = test_config(0, 5);
        let (port, shutdown) = spawn_room(Arc::clone(&config), "Closing").await;

        let mut a = RoomClient::join(Arc::clone(&config), port, "A").await.unwrap();
        recv_text(&mut a).await;
        recv_text(&mut a).await;

        shutdown.send(true).unwrap();
        let incoming = tokio::time::timeout(Duration::from_secs(5), a.recv())
            .await
            .expect("timed out waiting for close")
            .expect("recv failed");
        assert_eq!(incoming, Incoming::Closed);
    }
}
