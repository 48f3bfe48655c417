//! Directory dispatcher: the control-plane server
//!
//! Accepts control connections, executes the list/get/create room protocol,
//! and provisions new rooms through the registry. Each control connection is
//! served by its own task; a failure inside one command sequence aborts only
//! that command and the connection keeps serving further commands.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{ChatError, Result};
use crate::protocol::{Framer, Incoming, ACK, NACK};
use crate::server::registry::RoomRegistry;
use crate::Config;

/// Name of the room pre-registered at startup
pub const MAIN_ROOM_NAME: &str = "Group Chat";

/// The directory server, bound and ready to run
pub struct DirectoryServer {
    config: Arc<Config>,
    framer: Framer,
    listener: TcpListener,
    registry: Arc<RoomRegistry>,
    main_room: Option<crate::server::room::ChatRoom>,
}

impl DirectoryServer {
    /// Bind the control listener and pre-register the main room.
    ///
    /// The main room occupies the registry's first slot and listens on
    /// `server_port + 1`; its event loop starts when [`run`] is called.
    ///
    /// [`run`]: DirectoryServer::run
    pub async fn bind(config: Arc<Config>) -> Result<Self> {
        let framer = Framer::from_config(&config)?;
        let listener = TcpListener::bind(config.server_addr()).await?;
        let registry = Arc::new(RoomRegistry::new(Arc::clone(&config)));
        let main_room = registry.create(MAIN_ROOM_NAME).await?;

        Ok(Self {
            config,
            framer,
            listener,
            registry,
            main_room: Some(main_room),
        })
    }

    /// The shared room registry
    pub fn registry(&self) -> Arc<RoomRegistry> {
        Arc::clone(&self.registry)
    }

    /// Run the dispatcher until the shutdown signal fires.
    ///
    /// The same signal is propagated to every room loop, so one flip tears
    /// the whole service down and closes all sockets deterministically.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("<SudoChat>");
        info!("Directory listening on {}", self.config.server_addr());

        // Separate handle for spawned tasks; `shutdown` itself is polled below
        let spawn_shutdown = shutdown.clone();

        if let Some(room) = self.main_room.take() {
            info!("Main room {:?} on port {}", room.name(), room.port());
            tokio::spawn(room.run(spawn_shutdown.clone()));
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("control connection from {}", addr);
                        tokio::spawn(handle_control(
                            self.framer,
                            Arc::clone(&self.config),
                            Arc::clone(&self.registry),
                            spawn_shutdown.clone(),
                            stream,
                        ));
                    }
                    Err(e) => error!("directory accept failed: {}", e),
                },
                _ = shutdown.changed() => break,
            }
        }

        debug!("directory shutting down");
    }
}

/// Serve one control connection: username handshake, then a command loop
async fn handle_control(
    framer: Framer,
    config: Arc<Config>,
    registry: Arc<RoomRegistry>,
    shutdown: watch::Receiver<bool>,
    mut stream: TcpStream,
) {
    // A connection that fails to present a username is dropped silently
    let username = match framer.read_frame(&mut stream).await {
        Ok(Incoming::Frame(username)) if !username.is_empty() => username,
        Ok(_) => return,
        Err(e) => {
            warn!("control handshake failed: {}", e);
            return;
        }
    };
    debug!("'{}' connected to the directory", username);

    loop {
        let command = match framer.read_frame(&mut stream).await {
            Ok(Incoming::Frame(command)) => command,
            Ok(Incoming::Closed) => break,
            Err(ChatError::Protocol(msg)) => {
                warn!("malformed command frame from '{}': {}", username, msg);
                continue;
            }
            Err(e) => {
                warn!("control read for '{}' failed: {}", username, e);
                break;
            }
        };

        if command.is_empty() || command == config.disconnect_msg {
            break;
        }

        let outcome = if command == config.commands.list_rooms {
            list_rooms(framer, &registry, &mut stream).await
        } else if command == config.commands.get_room {
            send_port(framer, &registry, &mut stream).await
        } else if command == config.commands.create_room {
            open_room(framer, &registry, &shutdown, &mut stream).await
        } else {
            warn!("unknown command {:?} from '{}'", command, username);
            Ok(())
        };

        // The failed command is abandoned; the connection stays registered
        if let Err(e) = outcome {
            warn!("<{:?} command from '{}' failed: {}>", command, username, e);
        }
    }

    debug!("'{}' left the directory", username);
}

/// LIST_ROOMS: ACK, room count, await client ACK, one frame per name
async fn list_rooms(
    framer: Framer,
    registry: &RoomRegistry,
    stream: &mut TcpStream,
) -> Result<()> {
    framer.write_frame(stream, ACK).await?;

    let names = registry.list().await;
    framer.write_frame(stream, &names.len().to_string()).await?;

    match framer.read_frame(stream).await? {
        Incoming::Frame(reply) if reply == ACK => {}
        Incoming::Frame(reply) => {
            return Err(ChatError::protocol(format!(
                "Expected {} from client, got {:?}",
                ACK, reply
            )));
        }
        Incoming::Closed => {
            return Err(ChatError::connection("Client closed mid-command"));
        }
    }

    for name in &names {
        framer.write_frame(stream, name).await?;
    }
    Ok(())
}

/// GET_ROOM: ACK, read the name, reply the port or NACK
async fn send_port(framer: Framer, registry: &RoomRegistry, stream: &mut TcpStream) -> Result<()> {
    framer.write_frame(stream, ACK).await?;

    let name = match framer.read_frame(stream).await? {
        Incoming::Frame(name) => name,
        Incoming::Closed => return Err(ChatError::connection("Client closed mid-command")),
    };

    match registry.lookup(&name).await {
        Some(port) => framer.write_frame(stream, &port.to_string()).await?,
        None => framer.write_frame(stream, NACK).await?,
    }
    Ok(())
}

/// CREATE_ROOM: capacity ACK/NACK, read the name, create and spawn the room
async fn open_room(
    framer: Framer,
    registry: &RoomRegistry,
    shutdown: &watch::Receiver<bool>,
    stream: &mut TcpStream,
) -> Result<()> {
    if !registry.has_capacity().await {
        framer.write_frame(stream, NACK).await?;
        return Ok(());
    }
    framer.write_frame(stream, ACK).await?;

    let name = match framer.read_frame(stream).await? {
        Incoming::Frame(name) => name,
        Incoming::Closed => return Err(ChatError::connection("Client closed mid-command")),
    };

    match registry.create(&name).await {
        Ok(room) => {
            let port = room.port();
            info!("Opened room {:?} on port {}", room.name(), port);
            tokio::spawn(room.run(shutdown.clone()));
            framer.write_frame(stream, &port.to_string()).await?;
        }
        // Name collision, a lost capacity race, or a failed bind; the client
        // always gets an answer
        Err(e) => {
            if !matches!(e, ChatError::RoomExists(_) | ChatError::RegistryFull(_)) {
                warn!("room creation for {:?} failed: {}", name, e);
            }
            framer.write_frame(stream, NACK).await?;
        }
    }
    Ok(())
}
