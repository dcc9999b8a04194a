//! Snapshot store: the single owner of reconciled state.
//!
//! Readers get `&Snapshot` and cannot mutate it.  Writes go through
//! [`SnapshotStore::mutate`], which is crate-private: only the connection
//! tracker, the collection reconciler and the scalar projectors (all driven by
//! the dispatcher) reach it.  Observers run after every write that changed
//! something, never in the middle of one.

use mpdws_proto::protocol::Track;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::collection::{Collection, PlaceholderIds};
use crate::connection::ConnectionStatus;

/// Elapsed and duration of the current song, always replaced together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Timeline {
    pub elapsed: Option<f64>,
    pub duration: Option<f64>,
}

/// Everything a presentation layer reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub connection: ConnectionStatus,
    pub playlist: Collection,
    pub search: Collection,
    /// Raw MPD status, replaced wholesale.
    pub status: Map<String, Value>,
    pub current_track: Option<Track>,
    pub timeline: Timeline,
    /// Incremented once per completed database rescan.
    pub database_update_counter: u64,
    /// Playlist version from the last `[version, length]` message.
    pub playlist_version: Option<i64>,
}

impl Snapshot {
    pub fn elapsed(&self) -> Option<f64> {
        self.timeline.elapsed
    }

    pub fn duration(&self) -> Option<f64> {
        self.timeline.duration
    }

    /// A status attribute as a string (`"state"` → `"play"`).
    pub fn status_str(&self, key: &str) -> Option<&str> {
        self.status.get(key).and_then(Value::as_str)
    }

    /// Playlist version declared by the last status message.
    pub fn status_playlist_version(&self) -> Option<i64> {
        self.status
            .get("playlist")
            .and_then(mpdws_proto::protocol::as_index)
    }

    /// Queue length declared by the last status message.
    pub fn status_playlist_length(&self) -> Option<usize> {
        self.status
            .get("playlistlength")
            .and_then(mpdws_proto::protocol::as_index)
            .and_then(|len| usize::try_from(len).ok())
    }
}

/// Handle returned by [`SnapshotStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

pub type Observer = Box<dyn FnMut(&Snapshot) + Send>;

pub struct SnapshotStore {
    state: Snapshot,
    placeholders: PlaceholderIds,
    observers: Vec<(Subscription, Observer)>,
    next_subscription: u64,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("state", &self.state)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            state: Snapshot::default(),
            placeholders: PlaceholderIds::default(),
            observers: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn get_state(&self) -> &Snapshot {
        &self.state
    }

    /// Register an observer called after every completed change.
    pub fn subscribe<F>(&mut self, observer: F) -> Subscription
    where
        F: FnMut(&Snapshot) + Send + 'static,
    {
        let handle = Subscription(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((handle, Box::new(observer)));
        handle
    }

    /// Returns false if the handle was already removed.
    pub fn unsubscribe(&mut self, handle: Subscription) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(h, _)| *h != handle);
        self.observers.len() != before
    }

    /// Run one write to completion, then notify observers if it reported a
    /// change.
    pub(crate) fn mutate<F>(&mut self, write: F) -> bool
    where
        F: FnOnce(&mut Snapshot, &mut PlaceholderIds) -> bool,
    {
        let changed = write(&mut self.state, &mut self.placeholders);
        if changed {
            let Self {
                state, observers, ..
            } = self;
            for (_, observer) in observers.iter_mut() {
                observer(state);
            }
        }
        changed
    }
}
