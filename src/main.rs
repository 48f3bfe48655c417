//! SudoChat — multi-room TCP chat
//!
//! Usage:
//!   cargo run -- server                    # Run the directory server
//!   cargo run -- server --port 5050        # Run on a specific base port
//!   cargo run -- client                    # Run the terminal client

use std::env;
use std::io::Write;
use std::sync::Arc;

use sudochat::{ChatError, Config, DirectoryClient, DirectoryServer, Incoming, RoomClient};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::watch;
use tracing::info;

type StdinLines = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "server" => {
            run_server(load_config(&args)?).await?;
        }
        "client" => {
            run_client(load_config(&args)?).await?;
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    println!("SudoChat - Multi-Room TCP Chat");
    println!();
    println!("USAGE:");
    println!("    cargo run -- <COMMAND> [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    server              Start the directory server and main room");
    println!("    client              Start the interactive terminal client");
    println!("    help                Show this help message");
    println!();
    println!("OPTIONS:");
    println!("    --config <PATH>     Load configuration from a JSON file");
    println!("    --ip <ADDR>         Server IP (default: 127.0.0.1)");
    println!("    --port <PORT>       Directory base port (default: 5050)");
    println!();
    println!("The directory listens on the base port; the main room listens on");
    println!("base port + 1 and each created room on the next port above it.");
    println!();
    println!("EXAMPLES:");
    println!("    cargo run -- server");
    println!("    cargo run -- server --config config.json");
    println!("    RUST_LOG=debug cargo run -- server");
    println!("    cargo run -- client --port 5050");
}

fn load_config(args: &[String]) -> anyhow::Result<Config> {
    let mut config = match option_value(args, "--config") {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(ip) = option_value(args, "--ip") {
        config.server_ip = ip.to_string();
    }
    if let Some(port) = option_value(args, "--port") {
        config.server_port = port
            .parse()
            .map_err(|_| ChatError::config(format!("Invalid port: {}", port)))?;
    }

    Ok(config)
}

fn option_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let server = DirectoryServer::bind(Arc::clone(&config)).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    server.run(shutdown_rx).await;
    Ok(())
}

async fn run_client(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("\n<Welcome to SudoChat!>");
    let username = prompt(&mut lines, "Please enter your username: ").await?;
    println!("\n<Hello, {}!>", username);

    let mut directory = match DirectoryClient::connect(Arc::clone(&config), &username).await {
        Ok(directory) => directory,
        Err(_) => {
            println!("<Connection to server failed.>");
            return Ok(());
        }
    };

    loop {
        println!("\nInput a number for one of the following options:");
        println!("1 - Enter main chat room");
        println!("2 - Show all chat rooms");
        println!("3 - Create a chat room");
        println!("4 - Close");

        match prompt(&mut lines, "").await?.as_str() {
            "1" => {
                chat_session(
                    Arc::clone(&config),
                    config.main_room_port(),
                    &username,
                    &mut lines,
                )
                .await?;
            }
            "2" => {
                show_chatrooms(Arc::clone(&config), &mut directory, &username, &mut lines).await?;
            }
            "3" => {
                create_chatroom(Arc::clone(&config), &mut directory, &username, &mut lines)
                    .await?;
            }
            "4" => break,
            _ => println!("<Invalid input - please try again!>"),
        }
    }

    directory.disconnect().await.ok();
    println!("\n<Goodbye, {}>", username);
    Ok(())
}

/// List the open rooms and join the one the user picks
async fn show_chatrooms(
    config: Arc<Config>,
    directory: &mut DirectoryClient,
    username: &str,
    lines: &mut StdinLines,
) -> anyhow::Result<()> {
    let rooms = match directory.list_rooms().await {
        Ok(rooms) => rooms,
        Err(_) => {
            println!("<Error in showing chat rooms>");
            return Ok(());
        }
    };

    println!("\nInput a number to enter a chat or return to main menu:");
    for (i, name) in rooms.iter().enumerate() {
        println!("{} - {}", i + 1, name);
    }
    println!("{} - Exit to main menu", rooms.len() + 1);

    let choice = prompt(lines, "").await?;
    let picked = match choice.parse::<usize>() {
        Ok(n) if n >= 1 && n <= rooms.len() => &rooms[n - 1],
        _ => return Ok(()),
    };

    match directory.room_port(picked).await {
        Ok(port) => chat_session(config, port, username, lines).await?,
        Err(_) => println!("<Error in connecting to {}>", picked),
    }
    Ok(())
}

/// Ask the server for a new room and enter it
async fn create_chatroom(
    config: Arc<Config>,
    directory: &mut DirectoryClient,
    username: &str,
    lines: &mut StdinLines,
) -> anyhow::Result<()> {
    println!("\n<What would you like to name the chat room?>");
    let name = prompt(lines, "").await?;

    match directory.create_room(&name).await {
        Ok(port) => chat_session(config, port, username, lines).await?,
        Err(ChatError::Refused(_)) => {
            println!("<The room was not created - the name may already be in use>")
        }
        Err(_) => println!("\n<Failed to create chat room>"),
    }
    Ok(())
}

/// Exchange chat frames with a room until the user types the exit token
async fn chat_session(
    config: Arc<Config>,
    port: u16,
    username: &str,
    lines: &mut StdinLines,
) -> anyhow::Result<()> {
    let client = match RoomClient::join(Arc::clone(&config), port, username).await {
        Ok(client) => client,
        Err(_) => {
            println!("<Connection to chat failed>");
            return Ok(());
        }
    };
    let (receiver, mut sender) = client.into_split();
    // Room frames arrive through a pump task; selecting on the channel never
    // drops a partially read frame when the stdin branch completes first
    let mut frames = receiver.spawn_pump();
    println!();

    loop {
        tokio::select! {
            incoming = frames.recv() => match incoming {
                Some(Ok(Incoming::Frame(text))) => println!("{}", text),
                Some(Ok(Incoming::Closed)) | None => {
                    println!("<The room closed the connection.>");
                    break;
                }
                Some(Err(e)) => {
                    println!("<Receive failed: {}>", e);
                    break;
                }
            },
            line = lines.next_line() => match line? {
                Some(line) if line == config.exit_msg => {
                    sender.send(&config.disconnect_msg).await.ok();
                    println!("<You have exited the chat room.>");
                    break;
                }
                Some(line) if !line.is_empty() => {
                    if sender.send(&line).await.is_err() {
                        println!("<Message send failed>");
                        break;
                    }
                }
                Some(_) => {}
                None => {
                    sender.send(&config.disconnect_msg).await.ok();
                    break;
                }
            },
        }
    }

    Ok(())
}

async fn prompt(lines: &mut StdinLines, text: &str) -> anyhow::Result<String> {
    if !text.is_empty() {
        print!("{}", text);
        std::io::stdout().flush()?;
    }
    match lines.next_line().await? {
        Some(line) => Ok(line.trim().to_string()),
        None => Err(ChatError::connection("stdin closed").into()),
    }
}
