//! WebSocket transport to the API server.
//!
//! One background task owns the socket.  It forwards every text frame and
//! every lifecycle change to the sync core, writes outbound commands, and on
//! any disconnect reconnects with exponential backoff plus jitter.  Commands
//! issued while disconnected are dropped; the core resyncs after reconnect.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mpdws_proto::config::ReconnectConfig;
use mpdws_proto::protocol::ClientCommand;
use mpdws_sync::ConnectionEvent;
use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// Everything the transport reports to the core.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connection(ConnectionEvent),
    Frame(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Why a connected session ended.
enum SessionEnd {
    /// Command channel or event channel closed; stop for good.
    Shutdown,
    /// Socket lost; reconnect.
    Lost(Option<TransportError>),
}

/// Spawn the transport task.  It runs until the command sender or the event
/// receiver is dropped, or until `max_attempts` consecutive reconnects fail.
pub fn spawn(
    url: String,
    reconnect: ReconnectConfig,
    event_tx: mpsc::Sender<TransportEvent>,
    command_rx: mpsc::Receiver<ClientCommand>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(url, reconnect, event_tx, command_rx))
}

async fn run(
    url: String,
    reconnect: ReconnectConfig,
    event_tx: mpsc::Sender<TransportEvent>,
    mut command_rx: mpsc::Receiver<ClientCommand>,
) {
    let mut attempt: u32 = 0;

    loop {
        info!("transport: connecting to {}", url);
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _response)) => {
                attempt = 0;
                if !report(&event_tx, ConnectionEvent::Open).await {
                    return;
                }

                let end = session(ws, &event_tx, &mut command_rx).await;
                let _ = report(&event_tx, ConnectionEvent::Close).await;
                match end {
                    SessionEnd::Shutdown => {
                        info!("transport: shutting down");
                        return;
                    }
                    SessionEnd::Lost(Some(err)) => {
                        if !report(&event_tx, ConnectionEvent::Error(err.to_string())).await {
                            return;
                        }
                    }
                    SessionEnd::Lost(None) => {}
                }
            }
            Err(e) => {
                let err = TransportError::from(e);
                if !report(&event_tx, ConnectionEvent::Error(err.to_string())).await {
                    return;
                }
            }
        }

        attempt = attempt.saturating_add(1);
        if let Some(max) = reconnect.max_attempts {
            if attempt > max {
                warn!("transport: giving up after {} reconnect attempts", max);
                let _ = report(&event_tx, ConnectionEvent::ReconnectFailed).await;
                return;
            }
        }

        let delay = backoff_delay(&reconnect, attempt);
        info!(
            "transport: reconnecting in {}ms (attempt {})",
            delay.as_millis(),
            attempt
        );
        if !report(
            &event_tx,
            ConnectionEvent::ReconnectAttempt(Some(i64::from(attempt))),
        )
        .await
        {
            return;
        }

        // Wait out the backoff, still watching for shutdown.
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = command_rx.recv() => match cmd {
                    None => return,
                    Some(cmd) => warn!("transport: dropping {} while disconnected", cmd.name()),
                },
            }
        }
    }
}

async fn session<S>(
    ws: WebSocketStream<S>,
    event_tx: &mpsc::Sender<TransportEvent>,
    command_rx: &mut mpsc::Receiver<ClientCommand>,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if event_tx.send(TransportEvent::Frame(text)).await.is_err() {
                        return SessionEnd::Shutdown;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        if event_tx.send(TransportEvent::Frame(text)).await.is_err() {
                            return SessionEnd::Shutdown;
                        }
                    }
                    Err(_) => warn!("transport: dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(reason))) => {
                    info!("transport: server closed connection: {:?}", reason);
                    return SessionEnd::Lost(None);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Lost(Some(e.into())),
                None => return SessionEnd::Lost(None),
            },

            cmd = command_rx.recv() => match cmd {
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
                Some(cmd) if cmd.is_noop() => {
                    debug!("transport: skipping no-op {:?}", cmd);
                }
                Some(cmd) => {
                    let text = match cmd.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("transport: encoding {}: {}", cmd.name(), e);
                            continue;
                        }
                    };
                    debug!("transport: → {}", text);
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        return SessionEnd::Lost(Some(e.into()));
                    }
                }
            },
        }
    }
}

/// Send a lifecycle event; false once the core has gone away.
async fn report(event_tx: &mpsc::Sender<TransportEvent>, event: ConnectionEvent) -> bool {
    event_tx
        .send(TransportEvent::Connection(event))
        .await
        .is_ok()
}

/// `initial * 2^(attempt-1)`, capped at `max_delay_ms`, plus up to
/// `jitter_ms` of random delay.
pub fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(32);
    let base = config
        .initial_delay_ms
        .saturating_mul(2u64.saturating_pow(exp))
        .min(config.max_delay_ms);
    let jitter = if config.jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=config.jitter_ms)
    } else {
        0
    };
    Duration::from_millis(base.saturating_add(jitter))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter_ms: u64) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay_ms: 500,
            max_delay_ms: 4_000,
            max_attempts: None,
            jitter_ms,
        }
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let cfg = config(0);
        let delays: Vec<u128> = (1..=6)
            .map(|a| backoff_delay(&cfg, a).as_millis())
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 4000, 4000]);
        assert_eq!(backoff_delay(&cfg, u32::MAX).as_millis(), 4000);
    }

    #[test]
    fn test_backoff_jitter_is_bounded() {
        let cfg = config(250);
        for _ in 0..50 {
            let ms = backoff_delay(&cfg, 1).as_millis();
            assert!((500..=750).contains(&ms), "delay {} out of range", ms);
        }
    }
}
