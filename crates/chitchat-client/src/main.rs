//! # ChitChat Client
//!
//! ```bash
//! chitchat                          # ws://127.0.0.1:50051/ws
//! chitchat ws://10.0.0.5:50051/ws
//! CHITCHAT_URL=ws://chat.local/ws chitchat
//! ```
//!
//! Every non-empty line is published; `/exit` leaves and quits.

use anyhow::{Context, Result};
use chitchat_client::{is_exit_command, ChatSession, Incoming, DEFAULT_URL};
use chitchat_transport::WebSocketConnection;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn prompt(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{}", text)?;
    stdout.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chitchat_client=info,chitchat_transport=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let url = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CHITCHAT_URL").ok())
        .unwrap_or_else(|| DEFAULT_URL.to_string());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt("Enter your username: ")?;
    let username = lines
        .next_line()
        .await?
        .map(|line| line.trim().to_string())
        .context("No username given")?;

    let conn = WebSocketConnection::connect(&url)
        .await
        .with_context(|| format!("Could not connect to {}", url))?;
    let mut session = ChatSession::new(conn, username);
    session.join_and_wait().await.context("Could not join chat")?;
    info!(client = %session.client_id(), url = %url, "Joined");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    // stdin closed
                    session.leave_and_wait().await.context("Error leaving chat")?;
                    break;
                };
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                if is_exit_command(text) {
                    if let Err(e) = session.leave_and_wait().await {
                        warn!(error = %e, "Error leaving chat");
                    }
                    break;
                }
                session.publish(text).await.context("Error sending message")?;
            }

            incoming = session.next() => {
                match incoming? {
                    Incoming::Event(event) => println!("{}", event),
                    Incoming::Rejected { message, .. } => eprintln!("Message rejected: {}", message),
                    Incoming::Ack { .. } => {}
                    Incoming::Closed => {
                        info!("Server closed connection");
                        break;
                    }
                }
            }
        }
    }

    let _ = session.close().await;
    info!(local_clock = session.local_clock(), "Bye");
    Ok(())
}
