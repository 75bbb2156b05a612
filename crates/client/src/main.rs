//! Interactive console consumer for the chatwire session core.
//!
//! Connects with `CHATWIRE_TOKEN`, prints inbound messages and status
//! changes, and sends stdin lines as chat messages. `/status` shows the
//! current snapshot, `/portfolio` fires the legacy probe, `/quit` exits.

use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use chatwire_client::{ClientConfig, Credential, Sender, WsEvent, WsManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ClientConfig::from_env().context("invalid CHATWIRE_* configuration")?;
    let token = std::env::var("CHATWIRE_TOKEN").context("CHATWIRE_TOKEN is required")?;
    let mut credential = Credential::new(token);
    if let Ok(user_id) = std::env::var("CHATWIRE_USER_ID") {
        credential = credential.with_user_id(user_id);
    }

    let handle = WsManager::spawn(config);
    let mut events = handle.subscribe_events();
    handle.connect(credential);

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(WsEvent::Message(msg)) => {
                    let who = match msg.sender {
                        Sender::User => "you",
                        Sender::Assistant => "assistant",
                    };
                    println!("[{}] {}: {}", msg.timestamp.format("%H:%M:%S"), who, msg.content);
                }
                Ok(WsEvent::StatusChanged(status)) => eprintln!("* status: {status:?}"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    eprintln!("* fell behind, missed {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/status" => eprintln!(
                "* status: {:?}, last error: {:?}, {} messages cached",
                handle.status(),
                handle.last_error(),
                handle.messages().len()
            ),
            "/portfolio" => {
                if let Err(e) = handle.request_portfolio() {
                    eprintln!("* {e}");
                }
            }
            content => {
                if let Err(e) = handle.send(content) {
                    eprintln!("* {e}");
                }
            }
        }
    }

    handle.disconnect();
    // Give the close frame a moment to go out.
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}
