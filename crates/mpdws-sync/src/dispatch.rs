//! Routes decoded messages and lifecycle events into the store.
//!
//! Dispatch is a single match over [`InboundMessage`]; each arm runs one
//! reconciler operation or projector to completion inside
//! [`SnapshotStore::mutate`] before the next message is looked at.  Unknown
//! message types and undecodable frames are logged and dropped.

use mpdws_proto::protocol::InboundMessage;
use tracing::{debug, warn};

use crate::connection::ConnectionEvent;
use crate::store::{Snapshot, SnapshotStore, Subscription};

/// Which collection an explicit clear applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Playlist,
    Search,
}

#[derive(Debug, Default)]
pub struct SyncEngine {
    store: SnapshotStore,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &Snapshot {
        self.store.get_state()
    }

    pub fn subscribe<F>(&mut self, observer: F) -> Subscription
    where
        F: FnMut(&Snapshot) + Send + 'static,
    {
        self.store.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, handle: Subscription) -> bool {
        self.store.unsubscribe(handle)
    }

    /// Decode and dispatch one text frame.  Returns false if the frame was
    /// dropped as undecodable.
    pub fn handle_text(&mut self, text: &str) -> bool {
        match InboundMessage::decode(text) {
            Ok(msg) => {
                self.dispatch(msg);
                true
            }
            Err(e) => {
                warn!("dropping frame: {}", e);
                false
            }
        }
    }

    /// Apply one message.  Returns true if the snapshot changed.
    pub fn dispatch(&mut self, msg: InboundMessage) -> bool {
        debug!("dispatch: {}", msg.kind());
        match msg {
            InboundMessage::PlaylistAdd { start, count } => self
                .store
                .mutate(|s, ids| s.playlist.add_run(start, count, ids)),
            InboundMessage::PlaylistDelete { start, count } => self
                .store
                .mutate(|s, _| s.playlist.delete_run(start, count)),
            InboundMessage::PlaylistChange { start, count, trim } => self
                .store
                .mutate(|s, ids| s.playlist.change_run(start, count, trim, ids)),
            InboundMessage::PlaylistItems(items) => self
                .store
                .mutate(|s, _| s.playlist.positional_write(items)),
            InboundMessage::PlaylistSnapshot(tracks) => {
                self.store.mutate(|s, _| s.playlist.replace_all(tracks))
            }
            InboundMessage::PlaylistVersion { version, length } => {
                self.store.mutate(|s, ids| {
                    s.observe_playlist_version(version) | s.playlist.length_fix(length, ids)
                })
            }
            InboundMessage::PlaylistLength(length) => self
                .store
                .mutate(|s, ids| s.playlist.length_fix(length, ids)),
            InboundMessage::SearchWindow { results, start } => self
                .store
                .mutate(|s, _| s.search.write_window(results, start)),
            InboundMessage::SearchSnapshot(tracks) => {
                self.store.mutate(|s, _| s.search.replace_all(tracks))
            }
            InboundMessage::Status(status) => self.store.mutate(|s, _| {
                let changed = s.project_status(status);
                match s.status_playlist_version() {
                    Some(version) => s.observe_playlist_version(version) | changed,
                    None => changed,
                }
            }),
            InboundMessage::CurrentTrack(track) => {
                self.store.mutate(|s, _| s.project_current_track(track))
            }
            InboundMessage::Seek { elapsed, duration } => self
                .store
                .mutate(|s, _| s.project_seek(elapsed, duration)),
            InboundMessage::Elapsed(elapsed) => {
                self.store.mutate(|s, _| s.project_elapsed(elapsed))
            }
            InboundMessage::UpdateDb => self.store.mutate(|s, _| s.bump_database_counter()),
            InboundMessage::Unknown(kind) => {
                debug!("dispatch: ignoring unknown message type {:?}", kind);
                false
            }
        }
    }

    /// Apply a transport lifecycle event.  Returns true when the connection
    /// just reopened after an earlier session and the caller should resync.
    pub fn connection_event(&mut self, event: ConnectionEvent) -> bool {
        let mut resync = false;
        self.store.mutate(|s, _| {
            resync = s.connection.apply(&event);
            true
        });
        resync
    }

    /// Empty a collection on an explicit clear.
    pub fn clear(&mut self, target: Target) -> bool {
        self.store.mutate(|s, _| match target {
            Target::Playlist => s.playlist.clear(),
            Target::Search => s.search.clear(),
        })
    }
}
