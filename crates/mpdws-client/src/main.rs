use std::time::Duration;

use mpdws_client::core::SyncCore;
use mpdws_client::input::{self, Input};
use mpdws_client::transport::{self, TransportEvent};
use mpdws_proto::protocol::ClientCommand;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = mpdws_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let log_path = mpdws_proto::platform::log_path();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; reconciliation details at debug by default.
    let log_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,mpdws_sync=debug".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    // Print log path to stderr so the operator can tail it immediately.
    eprintln!("mpdws log: {}", log_path.display());

    // ── Load config ──────────────────────────────────────────────────────────
    let config = match mpdws_proto::config::Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("config: {:#}, using defaults", e);
            mpdws_proto::config::Config::default()
        }
    };
    tracing::info!("mpdws starting, server {}", config.server.url);
    eprintln!("connecting to {} (type `help` for commands)", config.server.url);

    // ── Channels (transport ⇄ core, stdin → core) ────────────────────────────
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(1024);
    let (command_tx, command_rx) = mpsc::channel::<ClientCommand>(1024);
    let (input_tx, input_rx) = mpsc::channel::<Input>(64);

    // ── Core ─────────────────────────────────────────────────────────────────
    let mut core = SyncCore::new(config.sync.clone(), command_tx);

    // Report connection changes on stderr.
    let mut last_link = None;
    core.subscribe(move |state| {
        let conn = &state.connection;
        let link = (conn.connected, conn.reconnecting, conn.reconnect_error);
        if last_link == Some(link) {
            return;
        }
        last_link = Some(link);
        match link {
            (true, _, _) => eprintln!("connected"),
            (false, true, _) => eprintln!("reconnecting (attempt {})", conn.reconnect_attempts),
            (false, false, true) => eprintln!("gave up reconnecting"),
            (false, false, false) => eprintln!("disconnected"),
        }
    });

    // ── Transport and input tasks ────────────────────────────────────────────
    let transport_task = transport::spawn(
        config.server.url.clone(),
        config.reconnect.clone(),
        event_tx,
        command_rx,
    );
    input::spawn_stdin_reader(input_tx.clone());

    // Ctrl-C behaves like `quit`.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = input_tx.send(Input::Quit).await;
        }
    });

    // ── Run ──────────────────────────────────────────────────────────────────
    core.run(event_rx, input_rx).await?;

    // The core dropped its command sender; the transport closes the socket.
    if tokio::time::timeout(Duration::from_secs(2), transport_task)
        .await
        .is_err()
    {
        tracing::warn!("transport did not stop in time");
    }
    tracing::info!("mpdws stopped");
    Ok(())
}
