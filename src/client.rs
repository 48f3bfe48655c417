//! Protocol clients for the directory and for chat rooms
//!
//! A client speaks the control protocol over one connection to discover or
//! create a room, then opens a second connection to the returned port and
//! exchanges raw chat frames until it sends the disconnect token or closes
//! the socket. Used by the terminal front end and by the tests.

use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ChatError, Result};
use crate::protocol::{Framer, Incoming, ACK, NACK};
use crate::Config;

/// Client side of the control protocol
pub struct DirectoryClient {
    framer: Framer,
    config: Arc<Config>,
    stream: TcpStream,
}

impl DirectoryClient {
    /// Connect to the directory and present a username
    pub async fn connect(config: Arc<Config>, username: &str) -> Result<Self> {
        let framer = Framer::from_config(&config)?;
        let mut stream = TcpStream::connect(config.server_addr()).await?;
        framer.write_frame(&mut stream, username).await?;
        debug!("'{}' connected to the directory", username);

        Ok(Self {
            framer,
            config,
            stream,
        })
    }

    /// Request the names of all open rooms, in registry order
    pub async fn list_rooms(&mut self) -> Result<Vec<String>> {
        let command = self.config.commands.list_rooms.clone();
        self.framer.write_frame(&mut self.stream, &command).await?;
        self.expect_ack().await?;

        let count: usize = self.read_reply().await?.parse().map_err(|_| {
            ChatError::protocol("Room count reply is not a decimal number")
        })?;
        self.framer.write_frame(&mut self.stream, ACK).await?;

        let mut names = Vec::with_capacity(count);
        for _ in 0..count {
            names.push(self.read_reply().await?);
        }
        Ok(names)
    }

    /// Request the listening port of a named room
    pub async fn room_port(&mut self, name: &str) -> Result<u16> {
        let command = self.config.commands.get_room.clone();
        self.framer.write_frame(&mut self.stream, &command).await?;
        self.expect_ack().await?;

        self.framer.write_frame(&mut self.stream, name).await?;
        let reply = self.read_reply().await?;
        if reply == NACK {
            return Err(ChatError::room_not_found(name));
        }
        parse_port(&reply)
    }

    /// Request creation of a new room; returns the port it listens on
    pub async fn create_room(&mut self, name: &str) -> Result<u16> {
        let command = self.config.commands.create_room.clone();
        self.framer.write_frame(&mut self.stream, &command).await?;

        // First reply is the capacity check
        match self.read_reply().await?.as_str() {
            ACK => {}
            NACK => return Err(ChatError::registry_full("Server refused a new room")),
            other => {
                return Err(ChatError::protocol(format!(
                    "Expected {}/{}, got {:?}",
                    ACK, NACK, other
                )));
            }
        }

        self.framer.write_frame(&mut self.stream, name).await?;
        let reply = self.read_reply().await?;
        if reply == NACK {
            // The server gives the same answer for a taken name and for a
            // room it could not open, so the error stays neutral
            return Err(ChatError::refused(format!(
                "Server would not create room {:?}",
                name
            )));
        }
        parse_port(&reply)
    }

    /// Announce departure and close the control connection
    pub async fn disconnect(mut self) -> Result<()> {
        let token = self.config.disconnect_msg.clone();
        self.framer.write_frame(&mut self.stream, &token).await?;
        Ok(())
    }

    async fn expect_ack(&mut self) -> Result<()> {
        let reply = self.read_reply().await?;
        if reply != ACK {
            return Err(ChatError::protocol(format!(
                "Expected {} from server, got {:?}",
                ACK, reply
            )));
        }
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<String> {
        match self.framer.read_frame(&mut self.stream).await? {
            Incoming::Frame(reply) => Ok(reply),
            Incoming::Closed => Err(ChatError::connection("Server closed the connection")),
        }
    }
}

fn parse_port(reply: &str) -> Result<u16> {
    reply
        .parse()
        .map_err(|_| ChatError::protocol(format!("Port reply is not numeric: {:?}", reply)))
}

/// Client side of a chat room connection
pub struct RoomClient {
    framer: Framer,
    config: Arc<Config>,
    stream: TcpStream,
}

impl RoomClient {
    /// Connect to a room's port and present a username
    pub async fn join(config: Arc<Config>, port: u16, username: &str) -> Result<Self> {
        let framer = Framer::from_config(&config)?;
        let mut stream = TcpStream::connect(config.room_addr(port)).await?;
        framer.write_frame(&mut stream, username).await?;
        debug!("'{}' joined the room on port {}", username, port);

        Ok(Self {
            framer,
            config,
            stream,
        })
    }

    /// Send one chat frame
    pub async fn send(&mut self, text: &str) -> Result<()> {
        self.framer.write_frame(&mut self.stream, text).await
    }

    /// Receive the next frame from the room
    pub async fn recv(&mut self) -> Result<Incoming> {
        self.framer.read_frame(&mut self.stream).await
    }

    /// Send the disconnect token and close the connection
    pub async fn leave(mut self) -> Result<()> {
        let token = self.config.disconnect_msg.clone();
        self.framer.write_frame(&mut self.stream, &token).await?;
        Ok(())
    }

    /// Split into independent receive and send halves, for sessions that
    /// listen and type at the same time
    pub fn into_split(self) -> (RoomReceiver, RoomSender) {
        let (reader, writer) = self.stream.into_split();
        (
            RoomReceiver {
                framer: self.framer,
                reader,
            },
            RoomSender {
                framer: self.framer,
                config: self.config,
                writer,
            },
        )
    }
}

/// Receiving half of a split room connection
pub struct RoomReceiver {
    framer: Framer,
    reader: OwnedReadHalf,
}

impl RoomReceiver {
    /// Receive the next frame from the room.
    ///
    /// Not cancellation-safe: dropping the future mid-frame loses the bytes
    /// already consumed. Callers that race room traffic against other input
    /// should use [`spawn_pump`] and select on the channel instead.
    ///
    /// [`spawn_pump`]: RoomReceiver::spawn_pump
    pub async fn recv(&mut self) -> Result<Incoming> {
        self.framer.read_frame(&mut self.reader).await
    }

    /// Move the receiver into a dedicated task that pumps every decoded
    /// frame into the returned channel. The channel closes after
    /// [`Incoming::Closed`] or the first error.
    pub fn spawn_pump(mut self) -> mpsc::UnboundedReceiver<Result<Incoming>> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let incoming = self.recv().await;
                let done = matches!(incoming, Ok(Incoming::Closed) | Err(_));
                if tx.send(incoming).is_err() || done {
                    break;
                }
            }
        });
        rx
    }
}

/// Sending half of a split room connection
pub struct RoomSender {
    framer: Framer,
    config: Arc<Config>,
    writer: OwnedWriteHalf,
}

impl RoomSender {
    /// Send one chat frame
    pub async fn send(&mut self, text: &str) -> Result<()> {
        self.framer.write_frame(&mut self.writer, text).await
    }

    /// Send the disconnect token and close the connection
    pub async fn leave(mut self) -> Result<()> {
        let token = self.config.disconnect_msg.clone();
        self.framer.write_frame(&mut self.writer, &token).await?;
        Ok(())
    }
}
