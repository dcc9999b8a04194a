//! Whole-value projections for the scalar message types.
//!
//! Each projector replaces its field in one assignment, so an observer sees
//! either the old value or the new one.

use mpdws_proto::protocol::Track;
use serde_json::{Map, Value};
use tracing::info;

use crate::store::{Snapshot, Timeline};

impl Snapshot {
    pub(crate) fn project_status(&mut self, status: Map<String, Value>) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        true
    }

    pub(crate) fn project_current_track(&mut self, track: Option<Track>) -> bool {
        if self.current_track == track {
            return false;
        }
        self.current_track = track;
        true
    }

    /// `seek`: elapsed and duration land together.
    pub(crate) fn project_seek(&mut self, elapsed: f64, duration: f64) -> bool {
        let timeline = Timeline {
            elapsed: Some(elapsed),
            duration: Some(duration),
        };
        if self.timeline == timeline {
            return false;
        }
        self.timeline = timeline;
        true
    }

    pub(crate) fn project_elapsed(&mut self, elapsed: f64) -> bool {
        if self.timeline.elapsed == Some(elapsed) {
            return false;
        }
        self.timeline = Timeline {
            elapsed: Some(elapsed),
            ..self.timeline
        };
        true
    }

    /// Record the server playlist version.  A version lower than the last
    /// one means the queue was recreated, so the playlist is cleared.
    pub(crate) fn observe_playlist_version(&mut self, version: i64) -> bool {
        let mut changed = false;
        if let Some(prev) = self.playlist_version {
            if version < prev {
                info!("playlist version went back {} → {}, clearing", prev, version);
                changed |= self.playlist.clear();
            }
        }
        if self.playlist_version != Some(version) {
            self.playlist_version = Some(version);
            changed = true;
        }
        changed
    }

    pub(crate) fn bump_database_counter(&mut self) -> bool {
        self.database_update_counter += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_replaces_pair() {
        let mut s = Snapshot::default();
        assert!(s.project_seek(10.0, 200.0));
        assert_eq!(s.elapsed(), Some(10.0));
        assert_eq!(s.duration(), Some(200.0));

        assert!(s.project_elapsed(11.0));
        assert_eq!(s.elapsed(), Some(11.0));
        assert_eq!(s.duration(), Some(200.0));

        assert!(!s.project_seek(11.0, 200.0));
    }

    #[test]
    fn test_status_and_track_replace_wholesale() {
        let mut s = Snapshot::default();
        let mut status = Map::new();
        status.insert("state".into(), Value::from("play"));
        status.insert("volume".into(), Value::from("80"));
        assert!(s.project_status(status));

        let mut next = Map::new();
        next.insert("state".into(), Value::from("pause"));
        assert!(s.project_status(next.clone()));
        assert_eq!(s.status, next);
        assert!(!s.project_status(next));

        let track = Track {
            id: Some("3".into()),
            ..Track::default()
        };
        assert!(s.project_current_track(Some(track.clone())));
        assert_eq!(s.current_track, Some(track));
        assert!(s.project_current_track(None));
        assert!(s.current_track.is_none());
    }

    #[test]
    fn test_database_counter_always_increments() {
        let mut s = Snapshot::default();
        s.bump_database_counter();
        s.bump_database_counter();
        assert_eq!(s.database_update_counter, 2);
    }
}
