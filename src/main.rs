use std::env;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::io::{AsyncBufReadExt, BufReader};

use duoroom::livekit::{LiveKitBackend, LiveKitBackendConfig};
use duoroom::{ClientConfig, SessionManager, TokenClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let mut config = ClientConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;

    // Handle CLI flags
    let mut args = env::args();
    let _ = args.next();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--room" => {
                config.room_name = args
                    .next()
                    .ok_or_else(|| anyhow!("--room requires a value"))?;
            }
            "--relay" => {
                config.force_relay = true;
            }
            other => {
                anyhow::bail!("Unknown option '{other}'. Supported: --room <name>, --relay");
            }
        }
    }

    let credentials = Arc::new(TokenClient::new(config.backend_url.clone())?);
    let backend = Arc::new(LiveKitBackend::new(LiveKitBackendConfig::default()));
    let manager = Arc::new(SessionManager::new(config, credentials, backend));

    manager.connect().await?;
    println!("Connected. Type a message and press enter; ctrl-d to leave.");

    // Print new transcript entries as they arrive.
    let transcript = manager.transcript_log();
    let printer = {
        let transcript = transcript.clone();
        tokio::spawn(async move {
            let mut printed = 0;
            loop {
                let entries = transcript.snapshot();
                for entry in &entries[printed..] {
                    println!("{}: {}", entry.speaker, entry.text);
                }
                printed = entries.len();
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(text) => manager.send_text(&text).await,
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    printer.abort();
    manager.shutdown().await;
    println!("Left the room.");

    Ok(())
}
