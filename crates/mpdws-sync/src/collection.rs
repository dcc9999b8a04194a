//! Position-addressed collections and the delta operations that keep them in
//! step with the server.
//!
//! A [`Collection`] is a plain `Vec<Entry>`.  Structural deltas (add, delete,
//! change, length fix) only ever insert placeholders or remove slots; content
//! arrives separately through positional writes.  Either kind of message may
//! arrive first, so a positional write always finds a slot to land in.
//!
//! Positions are indices into the collection.  Every write stamps
//! `Track::pos` with the slot it lands in, and every shift re-stamps the
//! resolved entries it moved, so `pos` always equals the index.
//!
//! Every operation clamps out-of-range or negative input to a no-op and logs
//! it.  Nothing here returns an error: a bad delta leaves the collection as it
//! was and the next resync repairs it.

use std::fmt;
use std::ops::Range;

use mpdws_proto::protocol::{PositionedTrack, Track, Trim};
use tracing::{debug, warn};

/// Upper bound on the number of slots a single delta may create.
pub const MAX_COLLECTION_LEN: usize = 1 << 20;

/// Synthetic identifier of a slot whose content has not arrived.
///
/// Lives in its own namespace (it is never compared with server song ids),
/// and the allocator never hands out the same value twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaceholderId(u64);

impl fmt::Display for PlaceholderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "placeholder{}", self.0)
    }
}

/// Monotonic allocator shared by every collection in a store.
#[derive(Debug, Default)]
pub struct PlaceholderIds {
    next: u64,
}

impl PlaceholderIds {
    pub fn allocate(&mut self) -> PlaceholderId {
        let id = PlaceholderId(self.next);
        self.next += 1;
        id
    }

    /// Number of ids handed out so far.
    pub fn issued(&self) -> u64 {
        self.next
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// Slot reserved, content pending.
    Pending(PlaceholderId),
    Resolved(Track),
}

impl Entry {
    pub fn is_pending(&self) -> bool {
        matches!(self, Entry::Pending(_))
    }

    pub fn track(&self) -> Option<&Track> {
        match self {
            Entry::Pending(_) => None,
            Entry::Resolved(track) => Some(track),
        }
    }
}

/// An ordered, position-indexed view of a server collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    entries: Vec<Entry>,
    /// Length most recently declared by the server, adjusted by every
    /// structural delta.  `None` until the first declaration.
    declared_len: Option<usize>,
    /// Bumped on every change that actually altered the collection.
    revision: u64,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, pos: usize) -> Option<&Entry> {
        self.entries.get(pos)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Resolved tracks in position order, placeholders skipped.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.entries.iter().filter_map(Entry::track)
    }

    pub fn declared_len(&self) -> Option<usize> {
        self.declared_len
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_pending()).count()
    }

    /// True when the physical length matches the last declared length.
    pub fn is_consistent(&self) -> bool {
        self.declared_len.map_or(true, |len| len == self.entries.len())
    }

    /// Contiguous runs of placeholders, in position order.
    pub fn pending_ranges(&self) -> Vec<Range<usize>> {
        let mut ranges = Vec::new();
        let mut run_start = None;
        for (pos, entry) in self.entries.iter().enumerate() {
            match (entry.is_pending(), run_start) {
                (true, None) => run_start = Some(pos),
                (false, Some(start)) => {
                    ranges.push(start..pos);
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(start) = run_start {
            ranges.push(start..self.entries.len());
        }
        ranges
    }

    // ── Delta operations ──────────────────────────────────────────────────────

    /// Insert `count` placeholders at `start`, shifting later entries back.
    /// A `start` past the end appends.
    pub fn add_run(&mut self, start: i64, count: i64, ids: &mut PlaceholderIds) -> bool {
        let (Some(start), Some(count)) = (
            index("add", "start", start),
            index("add", "count", count),
        ) else {
            return false;
        };
        let Some(count) = self.room_for("add", count) else {
            return false;
        };
        if count == 0 {
            return false;
        }

        let at = start.min(self.entries.len());
        if at != start {
            debug!("add: start {} past end {}, appending", start, self.entries.len());
        }
        self.entries
            .splice(at..at, (0..count).map(|_| Entry::Pending(ids.allocate())));
        self.renumber(at + count);
        self.declared_len = self.declared_len.map(|len| len + count);
        self.touch()
    }

    /// Remove up to `count` entries starting at `start`.
    pub fn delete_run(&mut self, start: i64, count: i64) -> bool {
        let (Some(start), Some(count)) = (
            index("delete", "start", start),
            index("delete", "count", count),
        ) else {
            return false;
        };
        if count == 0 {
            return false;
        }
        if start >= self.entries.len() {
            debug!(
                "delete: start {} past end {}, nothing to remove",
                start,
                self.entries.len()
            );
            return false;
        }

        let end = start.saturating_add(count).min(self.entries.len());
        let removed = end - start;
        if removed < count {
            debug!("delete: clamped {} → {} entries at {}", count, removed, start);
        }
        self.entries.drain(start..end);
        self.renumber(start);
        self.declared_len = self.declared_len.map(|len| len.saturating_sub(removed));
        self.touch()
    }

    /// Mark `count` entries at `start` as pending (their content was
    /// reordered and will be re-sent by position), then apply `trim`.
    ///
    /// A negative `start` disables the change half only; the backend sends
    /// `-1` when nothing but the tail changed.
    pub fn change_run(
        &mut self,
        start: i64,
        count: i64,
        trim: Option<Trim>,
        ids: &mut PlaceholderIds,
    ) -> bool {
        let mut changed = false;

        if start >= 0 && count > 0 {
            if let Some(count) = self.room_for("change", count as usize) {
                changed |= self.mark_pending(start as usize, count, ids);
            }
        } else if start >= 0 && count < 0 {
            warn!("change: negative count {}, ignoring", count);
        }

        if let Some(trim) = trim {
            changed |= self.trim(trim);
        }

        if changed {
            self.touch()
        } else {
            false
        }
    }

    /// Overwrite each position with its content.  Positions past the end
    /// append; negative positions are dropped.
    pub fn positional_write(&mut self, mut items: Vec<PositionedTrack>) -> bool {
        items.sort_by_key(|item| item.pos);

        let mut changed = false;
        for PositionedTrack { pos, mut track } in items {
            let Some(pos) = index("write", "position", pos) else {
                continue;
            };
            if pos < self.entries.len() {
                track.pos = Some(pos);
                let entry = Entry::Resolved(track);
                if self.entries[pos] != entry {
                    self.entries[pos] = entry;
                    changed = true;
                }
            } else {
                if self.entries.len() >= MAX_COLLECTION_LEN {
                    warn!("write: collection full, dropping position {}", pos);
                    continue;
                }
                if pos > self.entries.len() {
                    debug!("write: position {} past end {}, appending", pos, self.entries.len());
                }
                track.pos = Some(self.entries.len());
                self.entries.push(Entry::Resolved(track));
                changed = true;
            }
        }

        // Appending is growth the server already knows about.
        let len = self.entries.len();
        self.declared_len = self.declared_len.map(|declared| declared.max(len));

        if changed {
            self.touch()
        } else {
            false
        }
    }

    /// Pad with placeholders or truncate so the length is exactly `new_len`.
    pub fn length_fix(&mut self, new_len: i64, ids: &mut PlaceholderIds) -> bool {
        let Some(new_len) = index("length fix", "length", new_len) else {
            return false;
        };
        if new_len > MAX_COLLECTION_LEN {
            warn!(
                "length fix: {} exceeds limit {}, ignoring",
                new_len, MAX_COLLECTION_LEN
            );
            return false;
        }

        let declared_changed = self.declared_len != Some(new_len);
        self.declared_len = Some(new_len);

        let len = self.entries.len();
        if len < new_len {
            self.entries
                .extend((len..new_len).map(|_| Entry::Pending(ids.allocate())));
        } else if len > new_len {
            self.entries.truncate(new_len);
        } else {
            return declared_changed;
        }
        self.touch()
    }

    /// Wholesale replacement: `tracks[i]` lands at position `i` and anything
    /// past the new length is dropped.
    pub fn replace_all(&mut self, tracks: Vec<Track>) -> bool {
        let entries: Vec<Entry> = tracks
            .into_iter()
            .take(MAX_COLLECTION_LEN)
            .enumerate()
            .map(|(pos, mut track)| {
                track.pos = Some(pos);
                Entry::Resolved(track)
            })
            .collect();

        let declared_changed = self.declared_len != Some(entries.len());
        self.declared_len = Some(entries.len());
        if entries == self.entries {
            return declared_changed;
        }
        self.entries = entries;
        self.touch()
    }

    /// Write `results` starting at `start`, then cut everything past the
    /// end of the window.  `None` results only truncate.
    pub fn write_window(&mut self, results: Option<Vec<Track>>, start: i64) -> bool {
        let Some(start) = index("window", "start", start) else {
            return false;
        };
        let mut at = start.min(self.entries.len());
        if at != start {
            debug!("window: start {} past end {}, appending", start, self.entries.len());
        }

        let mut changed = false;
        for mut track in results.unwrap_or_default() {
            if at >= MAX_COLLECTION_LEN {
                warn!("window: collection full, dropping remaining results");
                break;
            }
            track.pos = Some(at);
            let entry = Entry::Resolved(track);
            if at < self.entries.len() {
                if self.entries[at] != entry {
                    self.entries[at] = entry;
                    changed = true;
                }
            } else {
                self.entries.push(entry);
                changed = true;
            }
            at += 1;
        }
        if self.entries.len() > at {
            self.entries.truncate(at);
            changed = true;
        }
        self.declared_len = Some(self.entries.len());

        if changed {
            self.touch()
        } else {
            false
        }
    }

    pub fn clear(&mut self) -> bool {
        let changed = !self.entries.is_empty() || self.declared_len != Some(0);
        self.entries.clear();
        self.declared_len = Some(0);
        if changed {
            self.touch()
        } else {
            false
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn mark_pending(&mut self, start: usize, count: usize, ids: &mut PlaceholderIds) -> bool {
        let end = start.saturating_add(count);
        if end > MAX_COLLECTION_LEN {
            warn!("change: range {}..{} exceeds limit, ignoring", start, end);
            return false;
        }

        // Changed positions that lie past our end exist on the server; back
        // them (and any gap before them) with placeholders.
        let len = self.entries.len();
        if end > len {
            debug!("change: range {}..{} past end {}, padding", start, end, len);
            self.entries
                .extend((len..end).map(|_| Entry::Pending(ids.allocate())));
            self.declared_len = self.declared_len.map(|declared| declared.max(end));
        }
        if start < len {
            for entry in &mut self.entries[start..end.min(len)] {
                *entry = Entry::Pending(ids.allocate());
            }
        }
        true
    }

    /// Remove `trim.count` entries at `trim.start`.  The window is slid back
    /// so it always ends inside the collection: the backend anchors the trim
    /// at the previous length when the queue shrank.
    fn trim(&mut self, trim: Trim) -> bool {
        if trim.count <= 0 {
            return false;
        }
        let Some(anchor) = index("trim", "start", trim.start) else {
            return false;
        };

        let len = self.entries.len();
        let count = (trim.count as u64).min(len as u64) as usize;
        if count == 0 {
            return false;
        }
        let start = anchor.min(len - count);
        if start != anchor {
            debug!("trim: anchor {} slid to {} (len {})", anchor, start, len);
        }
        self.entries.drain(start..start + count);
        self.renumber(start);
        self.declared_len = self.declared_len.map(|declared| declared.saturating_sub(count));
        true
    }

    /// Re-stamp `Track::pos` on resolved entries from `from` to the end.
    fn renumber(&mut self, from: usize) {
        for (pos, entry) in self.entries.iter_mut().enumerate().skip(from) {
            if let Entry::Resolved(track) = entry {
                track.pos = Some(pos);
            }
        }
    }

    fn room_for(&self, op: &str, count: usize) -> Option<usize> {
        if self.entries.len().saturating_add(count) > MAX_COLLECTION_LEN {
            warn!(
                "{}: {} more entries would exceed limit {}, ignoring",
                op, count, MAX_COLLECTION_LEN
            );
            return None;
        }
        Some(count)
    }

    fn touch(&mut self) -> bool {
        self.revision += 1;
        true
    }
}

/// Convert a signed wire value, logging and rejecting negatives.
fn index(op: &str, field: &str, value: i64) -> Option<usize> {
    match usize::try_from(value) {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("{}: negative {} {}, ignoring", op, field, value);
            None
        }
    }
}
