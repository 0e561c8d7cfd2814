use std::fmt::Write as _;
use std::sync::Arc;

use clap::Parser;
use lovesync::config::{ConfigError, SyncConfig};
use lovesync::connection::{ConnectionManager, WsConnector};
use lovesync::error::{ErrorCode, SyncError};
use lovesync::history::RestHistory;
use lovesync::media::{HttpUploader, MediaRef};
use lovesync::room::{ChatRoom, RoomUpdate};
use lovesync::types::{ConnectionState, Message};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("stdin read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("http client init failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Parser, Debug)]
#[command(name = "lovesync", about = "Realtime client for one private conversation")]
struct Cli {
    #[arg(long, env = "CHAT_USER_ID")]
    user_id: String,

    #[arg(long, env = "CHAT_ROOM_ID")]
    room_id: String,

    #[arg(long, env = "CHAT_PARTNER_ID")]
    partner_id: String,

    #[arg(long, help = "Websocket endpoint, overrides CHAT_WS_URL")]
    ws_url: Option<String>,

    #[arg(long, help = "REST base URL, overrides CHAT_API_URL")]
    api_url: Option<String>,
}

/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Say(String),
    More,
    Resync,
    Edit { id: String, text: String },
    Delete { id: String },
    React { id: String, reaction: Option<String> },
    Read { id: String },
    Attach { path: String, caption: Option<String> },
    Quit,
    Usage(&'static str),
}

const USAGE: &str = "commands: /more /resync /edit <id> <text> /delete <id> /react <id> [emoji] /read <id> /attach <path> [caption] /quit";

fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Some(Input::Say(line.to_owned()));
    };

    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    let rest = rest.trim();
    let (first, tail) = rest.split_once(' ').map_or((rest, ""), |(a, b)| (a, b.trim()));
    let tail = (!tail.is_empty()).then(|| tail.to_owned());

    let input = match (name, first.is_empty()) {
        ("more", _) => Input::More,
        ("resync", _) => Input::Resync,
        ("quit" | "q", _) => Input::Quit,
        ("edit", false) => match tail {
            Some(text) => Input::Edit { id: first.to_owned(), text },
            None => Input::Usage("/edit <id> <text>"),
        },
        ("delete", false) => Input::Delete { id: first.to_owned() },
        ("react", false) => Input::React { id: first.to_owned(), reaction: tail },
        ("read", false) => Input::Read { id: first.to_owned() },
        ("attach", false) => Input::Attach { path: first.to_owned(), caption: tail },
        _ => Input::Usage(USAGE),
    };
    Some(input)
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = SyncConfig::from_env()?;
    if let Some(ws_url) = cli.ws_url {
        config.ws_url = ws_url;
    }
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url.trim_end_matches('/').to_owned();
    }

    let client = reqwest::Client::builder().connect_timeout(config.connect_timeout).build()?;
    let manager = ConnectionManager::new(Arc::new(WsConnector::new(&config)), config.clone());
    let history = Arc::new(RestHistory::new(client.clone(), &config.api_url)?);
    let uploader = Arc::new(HttpUploader::new(client, &config.api_url));

    let info = manager.connect(&cli.user_id).await?;
    tracing::info!(user_id = %info.user_id, connection_id = %info.connection_id, "lovesync connected");

    let mut room = ChatRoom::open(manager.clone(), history, uploader, &config, cli.room_id, cli.user_id, cli.partner_id);
    if let Err(e) = room.load_next_page().await {
        eprintln!("history unavailable: {e}");
    }
    print_timeline(room.messages());
    eprintln!("{USAGE}");

    let result = run(&mut room).await;
    room.dispose();
    manager.dispose();
    result
}

async fn run(room: &mut ChatRoom) -> Result<(), CliError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                let Some(input) = parse_input(&line) else {
                    continue;
                };
                if input == Input::Quit {
                    return Ok(());
                }
                if let Err(e) = handle_input(room, input).await {
                    eprintln!("! {e}");
                }
            }
            update = room.next_update() => {
                let Some(update) = update else {
                    return Ok(());
                };
                if !handle_update(room, update).await {
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_input(room: &mut ChatRoom, input: Input) -> Result<(), SyncError> {
    let now = Instant::now();
    match input {
        Input::Say(text) => {
            room.send_text(&text, now)?;
            print_timeline(room.messages());
        }
        Input::More => {
            if room.load_next_page().await? {
                print_timeline(room.messages());
            } else {
                eprintln!("(no older messages)");
            }
        }
        Input::Resync => {
            room.resync().await?;
            print_timeline(room.messages());
        }
        Input::Edit { id, text } => room.edit(&id, &text, now).await?,
        Input::Delete { id } => room.delete(&id, now).await?,
        Input::React { id, reaction } => room.react(&id, reaction)?,
        Input::Read { id } => room.mark_read(&id)?,
        Input::Attach { path, caption } => {
            room.send_media(caption, &[MediaRef::parse(&path)]).await?;
            print_timeline(room.messages());
        }
        Input::Usage(usage) => eprintln!("usage: {usage}"),
        Input::Quit => {}
    }
    Ok(())
}

/// Returns `false` once the room can produce no more updates.
async fn handle_update(room: &mut ChatRoom, update: RoomUpdate) -> bool {
    match update {
        RoomUpdate::Messages => print_timeline(room.messages()),
        RoomUpdate::Typing { partner_typing } => {
            if partner_typing {
                eprintln!("({} is typing...)", room.typing().partner_id());
            }
        }
        RoomUpdate::Presence { partner_online } => {
            let status = if partner_online { "online" } else { "offline" };
            eprintln!("({} is {status})", room.typing().partner_id());
        }
        RoomUpdate::Connection(state) => {
            eprintln!("(connection: {state:?})");
            if state == ConnectionState::Connected {
                resync(room).await;
            }
        }
        RoomUpdate::EchoTimeout(expired) => {
            eprintln!("({} change(s) unconfirmed, resyncing)", expired.len());
            resync(room).await;
        }
        RoomUpdate::Error(e) => eprintln!("! {}: {e}", e.error_code()),
        RoomUpdate::Closed => return false,
    }
    true
}

async fn resync(room: &mut ChatRoom) {
    match room.resync().await {
        Ok(()) => print_timeline(room.messages()),
        Err(e) => eprintln!("! resync failed: {e}"),
    }
}

fn print_timeline(messages: &[Message]) {
    println!("----");
    // Newest first in the view; print oldest first like a transcript.
    for msg in messages.iter().rev() {
        println!("{}", render(msg));
    }
}

fn render(msg: &Message) -> String {
    let mut line = format!("[{}] {}: {}", msg.id, msg.sender_id, msg.content.as_deref().unwrap_or(""));
    for url in &msg.media {
        let _ = write!(line, " <{url}>");
    }
    if msg.edited {
        line.push_str(" (edited)");
    }
    if let Some(reaction) = &msg.reaction {
        let _ = write!(line, " {reaction}");
    }
    if !msg.sent {
        line.push_str(" (sending)");
    } else if msg.read {
        line.push_str(" (read)");
    }
    line
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
