//! SyncCore: single-owner event loop for the client.
//!
//! Owns the [`SyncEngine`] exclusively.  The transport task feeds it frames
//! and lifecycle events, the input task feeds it user commands, and it writes
//! outbound commands back to the transport.  Besides dispatching, it decides
//! which follow-up requests keep the local state converging on the server:
//! fetching placeholder slots, correcting the playlist length from `status`,
//! and resyncing after a reconnect.

use std::ops::Range;

use mpdws_proto::config::SyncConfig;
use mpdws_proto::protocol::{ClientCommand, InboundMessage};
use mpdws_sync::{ConnectionEvent, Entry, Snapshot, Subscription, SyncEngine, Target};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::input::Input;
use crate::transport::TransportEvent;

// ── Follow-ups ────────────────────────────────────────────────────────────────

/// Requests implied by an inbound message, decided before it is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowUp {
    None,
    /// Structural playlist delta: request whatever slots are now pending.
    FetchPending,
    /// Compare the status queue length with the local playlist.
    CheckLength,
    /// Database changed: refresh the current search.
    RefreshSearch,
}

impl FollowUp {
    fn of(msg: &InboundMessage) -> Self {
        match msg {
            InboundMessage::PlaylistAdd { .. }
            | InboundMessage::PlaylistChange { .. }
            | InboundMessage::PlaylistVersion { .. }
            | InboundMessage::PlaylistLength(_) => Self::FetchPending,
            InboundMessage::Status(_) => Self::CheckLength,
            InboundMessage::UpdateDb => Self::RefreshSearch,
            _ => Self::None,
        }
    }
}

/// Split `ranges` into `playlistquery` requests of at most `chunk` slots.
pub fn range_queries(ranges: &[Range<usize>], chunk: usize) -> Vec<ClientCommand> {
    let chunk = chunk.max(1);
    let mut out = Vec::new();
    for range in ranges {
        let mut start = range.start;
        while start < range.end {
            let end = range.end.min(start.saturating_add(chunk));
            out.push(ClientCommand::PlaylistQuery { start, end });
            start = end;
        }
    }
    out
}

// ── SyncCore ──────────────────────────────────────────────────────────────────

pub struct SyncCore {
    engine: SyncEngine,
    config: SyncConfig,
    command_tx: mpsc::Sender<ClientCommand>,
    /// Query of the active search, re-issued on reconnect and database updates.
    last_search: Option<String>,
}

impl SyncCore {
    pub fn new(config: SyncConfig, command_tx: mpsc::Sender<ClientCommand>) -> Self {
        Self {
            engine: SyncEngine::new(),
            config,
            command_tx,
            last_search: None,
        }
    }

    pub fn state(&self) -> &Snapshot {
        self.engine.state()
    }

    pub fn subscribe<F>(&mut self, observer: F) -> Subscription
    where
        F: FnMut(&Snapshot) + Send + 'static,
    {
        self.engine.subscribe(observer)
    }

    pub fn last_search(&self) -> Option<&str> {
        self.last_search.as_deref()
    }

    /// Run the event loop.  Returns on `quit`, or once the transport has
    /// stopped for good.  End of stdin alone does not stop the loop.
    pub async fn run(
        mut self,
        mut transport_rx: mpsc::Receiver<TransportEvent>,
        mut input_rx: mpsc::Receiver<Input>,
    ) -> anyhow::Result<()> {
        info!("SyncCore: starting event loop");
        let mut input_open = true;

        loop {
            tokio::select! {
                evt = transport_rx.recv() => match evt {
                    None => {
                        info!("SyncCore: transport stopped, shutting down");
                        break;
                    }
                    Some(evt) => self.handle_transport(evt),
                },

                input = input_rx.recv(), if input_open => match input {
                    None => {
                        debug!("SyncCore: input closed");
                        input_open = false;
                    }
                    Some(Input::Quit) => {
                        info!("SyncCore: quit requested");
                        break;
                    }
                    Some(input) => self.handle_input(input),
                },
            }
        }

        Ok(())
    }

    // ── Transport ─────────────────────────────────────────────────────────────

    pub fn handle_transport(&mut self, evt: TransportEvent) {
        match evt {
            TransportEvent::Frame(text) => self.handle_frame(&text),
            TransportEvent::Connection(event) => self.handle_connection(event),
        }
    }

    fn handle_frame(&mut self, text: &str) {
        let msg = match InboundMessage::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("SyncCore: dropping frame: {}", e);
                return;
            }
        };

        let follow_up = FollowUp::of(&msg);
        self.engine.dispatch(msg);

        match follow_up {
            FollowUp::None => {}
            FollowUp::FetchPending => self.fetch_pending(),
            FollowUp::CheckLength => self.check_length(),
            FollowUp::RefreshSearch => {
                if let Some(query) = self.last_search.clone() {
                    info!("SyncCore: database updated, refreshing search");
                    self.issue_search(query);
                }
            }
        }
    }

    fn handle_connection(&mut self, event: ConnectionEvent) {
        let opened = matches!(event, ConnectionEvent::Open);
        match &event {
            ConnectionEvent::ReconnectFailed => error!("SyncCore: reconnecting gave up"),
            ConnectionEvent::Error(e) => warn!("SyncCore: connection error: {}", e),
            _ => {}
        }

        let resync = self.engine.connection_event(event);
        if !opened {
            return;
        }

        self.send(ClientCommand::CurrentSong);
        if resync {
            info!("SyncCore: reconnected, resyncing");
            let len = self.engine.state().playlist.len();
            self.send_all(range_queries(&[0..len], self.config.fetch_chunk));
        }

        let query = self
            .last_search
            .clone()
            .or_else(|| self.config.initial_search.clone());
        if let Some(query) = query {
            self.issue_search(query);
        }
    }

    /// Request every placeholder run in the playlist.  An outstanding range
    /// may be requested twice; positional writes are idempotent.
    fn fetch_pending(&mut self) {
        let ranges = self.engine.state().playlist.pending_ranges();
        if ranges.is_empty() {
            return;
        }
        debug!("SyncCore: fetching pending ranges {:?}", ranges);
        self.send_all(range_queries(&ranges, self.config.fetch_chunk));
    }

    fn check_length(&mut self) {
        let state = self.engine.state();
        let Some(declared) = state.status_playlist_length() else {
            return;
        };
        let local = state.playlist.len();
        if declared == local {
            return;
        }
        info!(
            "SyncCore: status declares {} entries, have {}; fixing length",
            declared, local
        );
        self.engine
            .dispatch(InboundMessage::PlaylistLength(declared as i64));
        self.fetch_pending();
    }

    // ── Input ─────────────────────────────────────────────────────────────────

    pub fn handle_input(&mut self, input: Input) {
        match input {
            Input::Command(cmd) => self.send(cmd),
            Input::Search(query) => {
                self.engine.clear(Target::Search);
                self.issue_search(query);
            }
            Input::MoreResults => match self.last_search.clone() {
                Some(query) => {
                    let start = self.engine.state().search.len();
                    self.send(ClientCommand::Search {
                        query,
                        start,
                        size: self.config.search_page_size,
                    });
                }
                None => eprintln!("no active search"),
            },
            Input::ClearSearch => {
                self.last_search = None;
                self.engine.clear(Target::Search);
            }
            Input::Show => println!("{}", summary(self.engine.state())),
            Input::Quit => {}
        }
    }

    fn issue_search(&mut self, query: String) {
        self.last_search = Some(query.clone());
        self.send(ClientCommand::Search {
            query,
            start: 0,
            size: self.config.search_page_size,
        });
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    fn send_all(&self, cmds: Vec<ClientCommand>) {
        for cmd in cmds {
            self.send(cmd);
        }
    }

    /// Never blocks: a full or closed command channel drops the command, and
    /// the next resync repairs whatever it would have fetched.
    fn send(&self, cmd: ClientCommand) {
        debug!("SyncCore: sending {}", cmd.name());
        if let Err(e) = self.command_tx.try_send(cmd) {
            warn!("SyncCore: command not sent: {}", e);
        }
    }
}

// ── Rendering ─────────────────────────────────────────────────────────────────

/// Human-readable dump of a snapshot for `show`.
pub fn summary(state: &Snapshot) -> String {
    let mut out = String::new();

    let conn = &state.connection;
    let link = if conn.connected {
        "connected".to_string()
    } else if conn.reconnecting {
        format!("reconnecting (attempt {})", conn.reconnect_attempts)
    } else if conn.reconnect_error {
        "disconnected, gave up reconnecting".to_string()
    } else {
        "disconnected".to_string()
    };
    out.push_str(&format!("connection: {}\n", link));
    if let Some(err) = &conn.last_error {
        out.push_str(&format!("  last error: {}\n", err));
    }

    let playing = state
        .current_track
        .as_ref()
        .map(|t| t.display_name().to_string())
        .unwrap_or_else(|| "-".to_string());
    out.push_str(&format!(
        "state: {}  current: {}",
        state.status_str("state").unwrap_or("?"),
        playing
    ));
    if let (Some(elapsed), Some(duration)) = (state.elapsed(), state.duration()) {
        out.push_str(&format!("  [{:.0}/{:.0}s]", elapsed, duration));
    }
    out.push('\n');

    out.push_str(&format!(
        "playlist: {} entries ({} pending)\n",
        state.playlist.len(),
        state.playlist.pending_count()
    ));
    for (pos, entry) in state.playlist.iter().enumerate() {
        out.push_str(&format!("  {:>4}  {}\n", pos, entry_line(entry)));
    }

    out.push_str(&format!(
        "search: {} results ({} pending)\n",
        state.search.len(),
        state.search.pending_count()
    ));
    for (pos, entry) in state.search.iter().enumerate() {
        out.push_str(&format!("  {:>4}  {}\n", pos, entry_line(entry)));
    }

    out.push_str(&format!(
        "database updates: {}",
        state.database_update_counter
    ));
    out
}

fn entry_line(entry: &Entry) -> String {
    match entry {
        Entry::Pending(id) => format!("… ({})", id),
        Entry::Resolved(track) => match track.artist() {
            Some(artist) => format!("{} - {}", artist, track.display_name()),
            None => track.display_name().to_string(),
        },
    }
}
