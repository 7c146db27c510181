use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use musicmatch_rust::http::UreqHttpClient;
use musicmatch_rust::store::{FileStore, PersistenceManager};
use musicmatch_rust::transport::WebSocketTransportFactory;
use musicmatch_rust::{ChatMessage, Client, ClientConfig, DeliveryState, UserId};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

// Interactive demo: log in with a provider credential, print the ranked
// matches, then chat with one of them from the terminal.
//
// Usage:
//   cargo run -- --token <credential>              # log in, print matches
//   cargo run -- -t <credential> -p <peer-id>      # open a chat REPL
//   cargo run -- -p <peer-id>                      # reuse stored login

#[derive(Parser)]
#[command(name = "musicmatch")]
#[command(about = "Terminal client for the music match service")]
struct Cli {
    /// Base URL of the match backend.
    #[arg(long, default_value = "http://localhost:8000")]
    backend_url: String,

    /// Base URL for live chat WebSocket channels.
    #[arg(long, default_value = "ws://localhost:8000")]
    ws_url: String,

    /// Bearer credential from the identity provider. Omit to reuse the
    /// stored one.
    #[arg(short, long)]
    token: Option<String>,

    /// Peer to chat with. Omit to only print the match list.
    #[arg(short, long)]
    peer: Option<String>,

    /// Directory for persisted session state.
    #[arg(long, default_value = "./musicmatch-data")]
    data_dir: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let cli = Cli::parse();

    let backend = Arc::new(FileStore::new(&cli.data_dir).await?);
    let persistence = Arc::new(PersistenceManager::new(backend).await?);
    persistence.clone().run_background_saver(Duration::from_secs(5));

    let client = Client::new(
        persistence,
        Arc::new(WebSocketTransportFactory),
        Arc::new(UreqHttpClient::new()),
        ClientConfig::new(cli.backend_url, cli.ws_url),
    )
    .await;

    let user_id = match cli.token {
        Some(token) => client.login(&token).await?,
        None => match client.current_user().await {
            Some(user_id) => user_id,
            None => anyhow::bail!("no stored credential; pass one with --token"),
        },
    };
    info!(target: "Client", "Session user: {user_id}");

    match client.refresh_matches().await {
        Ok(matches) => {
            println!("Your matches:");
            for (rank, m) in matches.iter().enumerate() {
                println!(
                    "  {}. {} [{}] {:.0}% similar, shared: {}",
                    rank + 1,
                    m.display_name,
                    m.peer_id,
                    m.similarity_score * 100.0,
                    m.shared_artists.join(", ")
                );
            }
        }
        Err(e) => warn!(target: "Client", "Could not refresh matches: {e}"),
    }

    let Some(peer) = cli.peer else {
        client.shutdown().await;
        return Ok(());
    };
    let peer_id = UserId::new(peer);
    let session = client.open_chat(&peer_id).await?;
    println!(
        "Chatting with {}. Type a message, or /history, /retry, /resend <id>, /quit.",
        session.header().display_name
    );

    let bus = client.event_bus();
    let printer = tokio::spawn(async move {
        let mut message = bus.message.subscribe();
        let mut send_failed = bus.send_failed.subscribe();
        let mut opened = bus.channel_opened.subscribe();
        let mut closed = bus.channel_closed.subscribe();
        let mut history_unavailable = bus.history_unavailable.subscribe();
        let mut logged_out = bus.logged_out.subscribe();
        loop {
            tokio::select! {
                Ok(event) = message.recv() => print_message(&event.message),
                Ok(event) = send_failed.recv() => {
                    println!("!! {} was not delivered: {} (use /resend {})",
                        event.client_id, event.reason, event.client_id);
                }
                Ok(_) = opened.recv() => println!("-- live channel open --"),
                Ok(event) = closed.recv() => {
                    if event.will_retry {
                        println!("-- live channel lost, reconnecting --");
                    } else {
                        println!("-- live channel closed; /retry to reconnect --");
                    }
                }
                Ok(event) = history_unavailable.recv() => {
                    println!("-- history unavailable ({}); live messages only --", event.detail);
                }
                Ok(_) = logged_out.recv() => {
                    println!("-- the server rejected the credential; logged out --");
                    break;
                }
                else => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                match line {
                    "" => continue,
                    "/quit" => break,
                    "/history" => match session.snapshot().await {
                        Ok(messages) => messages.iter().for_each(print_message),
                        Err(e) => error!(target: "Client", "Snapshot failed: {e}"),
                    },
                    "/retry" => {
                        if let Err(e) = session.reopen_channel().await {
                            error!(target: "Client", "Reopen failed: {e}");
                        }
                    }
                    _ if line.starts_with("/resend ") => {
                        let client_id = line.trim_start_matches("/resend ").trim();
                        if let Err(e) = session.resend(client_id).await {
                            error!(target: "Client", "Resend failed: {e}");
                        }
                    }
                    text => {
                        if let Err(e) = session.send(text).await {
                            error!(target: "Client", "Send failed: {e}");
                        }
                    }
                }
            }
        }
    }

    printer.abort();
    client.shutdown().await;
    Ok(())
}

fn print_message(message: &ChatMessage) {
    let tag = match message.state {
        DeliveryState::Pending => " (sending)",
        DeliveryState::Failed => " (failed)",
        DeliveryState::Confirmed => "",
    };
    println!(
        "[{}] {}: {}{}",
        message.timestamp.with_timezone(&Local).format("%H:%M"),
        message.sender_id,
        message.text,
        tag
    );
}
