use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// A frame exactly as the API server pushes it over the socket.
///
/// The server names the tag `mutation`; older builds and the browser client
/// called it `type`.  Both are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type", alias = "mutation")]
    pub kind: String,
    #[serde(default)]
    pub value: Value,
}

/// Reasons an inbound payload could not be turned into an [`InboundMessage`].
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{kind}: expected {expected}")]
    Shape {
        kind: &'static str,
        expected: &'static str,
    },
    #[error("{kind}: field `{field}` is not numeric")]
    NotNumeric {
        kind: &'static str,
        field: &'static str,
    },
}

/// One track record as reported by MPD or the search index.
///
/// MPD reports every attribute as a string, so `fields` is string→string.
/// `Id` and `Pos` are lifted out of the mapping.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Track {
    pub id: Option<String>,
    /// Current position.  Collections re-stamp it whenever the entry moves.
    pub pos: Option<usize>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Track {
    pub fn from_object(obj: &Map<String, Value>) -> Self {
        let mut id = None;
        let mut pos = None;
        let mut fields = BTreeMap::new();

        for (key, value) in obj {
            match key.as_str() {
                "Id" => id = scalar_string(value),
                "Pos" => pos = as_index(value).and_then(|p| usize::try_from(p).ok()),
                _ => {
                    if let Some(s) = scalar_string(value) {
                        fields.insert(key.clone(), s);
                    }
                }
            }
        }

        // Search hits come from the index without an MPD song id.
        if id.is_none() {
            id = fields.get("file").cloned();
        }

        Self { id, pos, fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.get("Title")
    }

    pub fn artist(&self) -> Option<&str> {
        self.get("Artist")
    }

    /// Title if known, else the file path, else the id.
    pub fn display_name(&self) -> &str {
        self.title()
            .or_else(|| self.get("file"))
            .or(self.id.as_deref())
            .unwrap_or("")
    }
}

/// A track paired with the position the server says it occupies.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionedTrack {
    pub pos: i64,
    pub track: Track,
}

/// Trailing trim of a `playlistchange` delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trim {
    pub start: i64,
    pub count: i64,
}

/// Decoded inbound message.  Counts and positions stay signed so the
/// reconciler can see (and drop) negative values instead of the decoder
/// silently wrapping them.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    PlaylistAdd {
        start: i64,
        count: i64,
    },
    PlaylistDelete {
        start: i64,
        count: i64,
    },
    /// `playlistmove` and `playlistchange`.
    PlaylistChange {
        start: i64,
        count: i64,
        trim: Option<Trim>,
    },
    /// `playlistquery`: a batch of positional writes.
    PlaylistItems(Vec<PositionedTrack>),
    /// `playlist` carrying the full queue.
    PlaylistSnapshot(Vec<Track>),
    /// `playlist` in the `[version, length]` form.
    PlaylistVersion {
        version: i64,
        length: i64,
    },
    PlaylistLength(i64),
    /// `search` in the windowed `[results, start]` form.
    SearchWindow {
        results: Option<Vec<Track>>,
        start: i64,
    },
    /// `search` carrying the whole result list.
    SearchSnapshot(Vec<Track>),
    Status(Map<String, Value>),
    CurrentTrack(Option<Track>),
    Seek {
        elapsed: f64,
        duration: f64,
    },
    Elapsed(f64),
    UpdateDb,
    Unknown(String),
}

impl InboundMessage {
    pub fn decode(text: &str) -> Result<Self, PayloadError> {
        let frame: Frame = serde_json::from_str(text)?;
        Self::from_frame(frame)
    }

    pub fn from_frame(frame: Frame) -> Result<Self, PayloadError> {
        let Frame { kind, value } = frame;
        match kind.as_str() {
            "playlistadd" => {
                let [start, count] = int_pair("playlistadd", &value)?;
                Ok(Self::PlaylistAdd { start, count })
            }
            "playlistdelete" => {
                let [start, count] = int_pair("playlistdelete", &value)?;
                Ok(Self::PlaylistDelete { start, count })
            }
            "playlistmove" => decode_change("playlistmove", &value),
            "playlistchange" => decode_change("playlistchange", &value),
            "playlistquery" => Ok(Self::PlaylistItems(positioned_tracks(
                "playlistquery",
                &value,
            )?)),
            "playlist" => decode_playlist(&value),
            "playlistlengthquery" => as_index(&value)
                .map(Self::PlaylistLength)
                .ok_or(PayloadError::NotNumeric {
                    kind: "playlistlengthquery",
                    field: "length",
                }),
            "search" => decode_search(&value),
            "status" => match value {
                Value::Object(map) => Ok(Self::Status(map)),
                Value::Null => Ok(Self::Status(Map::new())),
                _ => Err(PayloadError::Shape {
                    kind: "status",
                    expected: "an object",
                }),
            },
            "currentsong" | "currenttrack" => match &value {
                Value::Object(map) if map.is_empty() => Ok(Self::CurrentTrack(None)),
                Value::Object(map) => Ok(Self::CurrentTrack(Some(Track::from_object(map)))),
                Value::Null => Ok(Self::CurrentTrack(None)),
                _ => Err(PayloadError::Shape {
                    kind: "currentsong",
                    expected: "an object",
                }),
            },
            "seek" => {
                let items = value.as_array().ok_or(PayloadError::Shape {
                    kind: "seek",
                    expected: "[elapsed, duration]",
                })?;
                let elapsed = items.first().and_then(as_seconds).ok_or(
                    PayloadError::NotNumeric {
                        kind: "seek",
                        field: "elapsed",
                    },
                )?;
                let duration = items.get(1).and_then(as_seconds).ok_or(
                    PayloadError::NotNumeric {
                        kind: "seek",
                        field: "duration",
                    },
                )?;
                Ok(Self::Seek { elapsed, duration })
            }
            "elapsed" => as_seconds(&value)
                .map(Self::Elapsed)
                .ok_or(PayloadError::NotNumeric {
                    kind: "elapsed",
                    field: "elapsed",
                }),
            "updatedb" => Ok(Self::UpdateDb),
            _ => Ok(Self::Unknown(kind.clone())),
        }
    }

    /// Tag name used for logging.
    pub fn kind(&self) -> &str {
        match self {
            Self::PlaylistAdd { .. } => "playlistadd",
            Self::PlaylistDelete { .. } => "playlistdelete",
            Self::PlaylistChange { .. } => "playlistchange",
            Self::PlaylistItems(_) => "playlistquery",
            Self::PlaylistSnapshot(_) | Self::PlaylistVersion { .. } => "playlist",
            Self::PlaylistLength(_) => "playlistlengthquery",
            Self::SearchWindow { .. } | Self::SearchSnapshot(_) => "search",
            Self::Status(_) => "status",
            Self::CurrentTrack(_) => "currentsong",
            Self::Seek { .. } => "seek",
            Self::Elapsed(_) => "elapsed",
            Self::UpdateDb => "updatedb",
            Self::Unknown(kind) => kind,
        }
    }
}

fn decode_change(kind: &'static str, value: &Value) -> Result<InboundMessage, PayloadError> {
    let items = value.as_array().ok_or(PayloadError::Shape {
        kind,
        expected: "[start, count, trimStart?, trimCount?]",
    })?;
    let start = items
        .first()
        .and_then(as_index)
        .ok_or(PayloadError::NotNumeric {
            kind,
            field: "start",
        })?;
    let count = items
        .get(1)
        .and_then(as_index)
        .ok_or(PayloadError::NotNumeric {
            kind,
            field: "count",
        })?;
    // A missing or non-numeric trim half disables the trim rather than
    // rejecting the whole delta.
    let trim = match (items.get(2).and_then(as_index), items.get(3).and_then(as_index)) {
        (Some(start), Some(count)) => Some(Trim { start, count }),
        _ => None,
    };
    Ok(InboundMessage::PlaylistChange { start, count, trim })
}

fn decode_playlist(value: &Value) -> Result<InboundMessage, PayloadError> {
    let items = value.as_array().ok_or(PayloadError::Shape {
        kind: "playlist",
        expected: "a track list or [version, length]",
    })?;
    if items.len() == 2 && items.iter().all(|v| as_index(v).is_some()) {
        let [version, length] = int_pair("playlist", value)?;
        return Ok(InboundMessage::PlaylistVersion { version, length });
    }
    Ok(InboundMessage::PlaylistSnapshot(tracks("playlist", items)?))
}

fn decode_search(value: &Value) -> Result<InboundMessage, PayloadError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Null => return Ok(InboundMessage::SearchSnapshot(Vec::new())),
        _ => {
            return Err(PayloadError::Shape {
                kind: "search",
                expected: "[results, start] or a result list",
            })
        }
    };

    let windowed = items.len() == 2
        && matches!(items[0], Value::Array(_) | Value::Null)
        && as_index(&items[1]).is_some();
    if !windowed {
        return Ok(InboundMessage::SearchSnapshot(tracks("search", items)?));
    }

    let results = match &items[0] {
        Value::Array(hits) => Some(tracks("search", hits)?),
        _ => None,
    };
    let start = as_index(&items[1]).ok_or(PayloadError::NotNumeric {
        kind: "search",
        field: "start",
    })?;
    Ok(InboundMessage::SearchWindow { results, start })
}

fn int_pair(kind: &'static str, value: &Value) -> Result<[i64; 2], PayloadError> {
    let items = value.as_array().ok_or(PayloadError::Shape {
        kind,
        expected: "[int, int]",
    })?;
    let first = items
        .first()
        .and_then(as_index)
        .ok_or(PayloadError::NotNumeric {
            kind,
            field: "start",
        })?;
    let second = items
        .get(1)
        .and_then(as_index)
        .ok_or(PayloadError::NotNumeric {
            kind,
            field: "count",
        })?;
    Ok([first, second])
}

fn tracks(kind: &'static str, items: &[Value]) -> Result<Vec<Track>, PayloadError> {
    items
        .iter()
        .map(|item| match item {
            Value::Object(map) => Ok(Track::from_object(map)),
            _ => Err(PayloadError::Shape {
                kind,
                expected: "a list of objects",
            }),
        })
        .collect()
}

/// Items without an object body or a numeric `Pos` are skipped one by one;
/// the rest of the batch still applies.
fn positioned_tracks(
    kind: &'static str,
    value: &Value,
) -> Result<Vec<PositionedTrack>, PayloadError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Null => return Ok(Vec::new()),
        _ => {
            return Err(PayloadError::Shape {
                kind,
                expected: "a list of objects",
            })
        }
    };
    let batch = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let Some(map) = item.as_object() else {
                warn!("{}: item {} is not an object, skipping", kind, i);
                return None;
            };
            let Some(pos) = map.get("Pos").and_then(as_index) else {
                warn!("{}: item {} has no numeric Pos, skipping", kind, i);
                return None;
            };
            Some(PositionedTrack {
                pos,
                track: Track::from_object(map),
            })
        })
        .collect();
    Ok(batch)
}

/// Integer from a JSON number or a numeric string (`"Pos": "3"`).
pub fn as_index(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Seconds from a JSON number or a numeric string (`"elapsed": "12.304"`).
pub fn as_seconds(value: &Value) -> Option<f64> {
    let secs = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    secs.is_finite().then_some(secs)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(scalar_string)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        other => Some(other.to_string()),
    }
}

// ── Outbound ──────────────────────────────────────────────────────────────────

/// Commands the client writes back over the socket.  The server answers
/// queries with inbound frames; everything else comes back as deltas.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// Fetch playlist positions `start..end` (end exclusive).
    PlaylistQuery { start: usize, end: usize },
    /// Move positions `start..end` so the block begins at `pos`.
    PlaylistMove { start: usize, end: usize, pos: usize },
    PlaylistDelete { start: usize, end: usize },
    RemoveId(u64),
    /// Add a database path; `None` appends.
    AddPath { path: String, pos: Option<usize> },
    Clear,
    Search { query: String, start: usize, size: usize },
    CurrentSong,
    Seek(f64),
    /// `None` resumes the current song.
    PlayId(Option<u64>),
    Stop,
    Pause,
    PlayNext,
    PlayPrev,
}

#[derive(Debug, Clone, Serialize)]
struct OutboundFrame {
    mutation: &'static str,
    value: Value,
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlaylistQuery { .. } => "playlistquery",
            Self::PlaylistMove { .. } => "playlistmove",
            Self::PlaylistDelete { .. } => "playlistdelete",
            Self::RemoveId(_) => "removeid",
            Self::AddPath { .. } => "addpath",
            Self::Clear => "clear",
            Self::Search { .. } => "search",
            Self::CurrentSong => "currentsong",
            Self::Seek(_) => "seek",
            Self::PlayId(_) => "playid",
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::PlayNext => "playnext",
            Self::PlayPrev => "playprev",
        }
    }

    fn value(&self) -> Value {
        use serde_json::json;
        match self {
            Self::PlaylistQuery { start, end } => json!([start, end]),
            Self::PlaylistMove { start, end, pos } => json!([start, end, pos]),
            Self::PlaylistDelete { start, end } => json!([start, end]),
            Self::RemoveId(id) => json!(id),
            Self::AddPath { path, pos } => {
                let pos = pos.map(|p| p as i64).unwrap_or(-1);
                json!([path, pos])
            }
            Self::Search { query, start, size } => json!([query, start, size]),
            Self::Seek(secs) => json!(secs),
            Self::PlayId(id) => json!(id.map(|i| i as i64).unwrap_or(-1)),
            Self::Clear
            | Self::CurrentSong
            | Self::Stop
            | Self::Pause
            | Self::PlayNext
            | Self::PlayPrev => Value::Null,
        }
    }

    /// Moves onto the same position are no-ops on the server; callers can
    /// skip sending them.
    pub fn is_noop(&self) -> bool {
        match self {
            Self::PlaylistMove { start, end, pos } => start == pos || start >= end,
            Self::PlaylistQuery { start, end } | Self::PlaylistDelete { start, end } => {
                start >= end
            }
            _ => false,
        }
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        let frame = OutboundFrame {
            mutation: self.name(),
            value: self.value(),
        };
        Ok(serde_json::to_string(&frame)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(v: Value) -> InboundMessage {
        InboundMessage::decode(&v.to_string()).unwrap()
    }

    #[test]
    fn test_mutation_key_is_accepted() {
        let msg = decode(json!({"mutation": "playlistadd", "value": [2, 3]}));
        assert_eq!(msg, InboundMessage::PlaylistAdd { start: 2, count: 3 });
        let msg = decode(json!({"type": "playlistdelete", "value": [1, 2]}));
        assert_eq!(msg, InboundMessage::PlaylistDelete { start: 1, count: 2 });
    }

    #[test]
    fn test_change_with_and_without_trim() {
        let msg = decode(json!({"type": "playlistchange", "value": [0, 1, 2, 1]}));
        assert_eq!(
            msg,
            InboundMessage::PlaylistChange {
                start: 0,
                count: 1,
                trim: Some(Trim { start: 2, count: 1 }),
            }
        );
        let msg = decode(json!({"type": "playlistmove", "value": [4, 2]}));
        assert_eq!(
            msg,
            InboundMessage::PlaylistChange {
                start: 4,
                count: 2,
                trim: None
            }
        );
    }

    #[test]
    fn test_playlistquery_accepts_string_positions() {
        let msg = decode(json!({
            "mutation": "playlistquery",
            "value": [
                {"Pos": "0", "Id": "17", "Title": "A", "file": "a.flac"},
                {"Pos": 1, "Id": "18", "Title": "B", "file": "b.flac"}
            ]
        }));
        let InboundMessage::PlaylistItems(items) = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].pos, 0);
        assert_eq!(items[0].track.id.as_deref(), Some("17"));
        assert_eq!(items[0].track.title(), Some("A"));
        assert!(!items[0].track.fields.contains_key("Pos"));
        assert_eq!(items[1].pos, 1);
    }

    #[test]
    fn test_playlistquery_skips_bad_items_only() {
        let msg = decode(json!({
            "mutation": "playlistquery",
            "value": [
                {"Pos": 0, "Title": "A"},
                {"Pos": "x", "Title": "B"},
                "garbage",
                {"Title": "no position"},
                {"Pos": "2", "Title": "C"}
            ]
        }));
        let InboundMessage::PlaylistItems(items) = msg else {
            panic!("Wrong message type");
        };
        let kept: Vec<(i64, Option<&str>)> =
            items.iter().map(|i| (i.pos, i.track.title())).collect();
        assert_eq!(kept, vec![(0, Some("A")), (2, Some("C"))]);
    }

    #[test]
    fn test_playlist_forms() {
        assert_eq!(
            decode(json!({"type": "playlist", "value": [12, 40]})),
            InboundMessage::PlaylistVersion {
                version: 12,
                length: 40
            }
        );
        let msg = decode(json!({"type": "playlist", "value": [{"Id": "1"}, {"Id": "2"}]}));
        assert!(matches!(msg, InboundMessage::PlaylistSnapshot(ref t) if t.len() == 2));
    }

    #[test]
    fn test_search_forms() {
        let msg = decode(json!({"type": "search", "value": [[{"file": "x"}, {"file": "y"}], 0]}));
        let InboundMessage::SearchWindow { results, start } = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(start, 0);
        let results = results.unwrap();
        assert_eq!(results[1].id.as_deref(), Some("y"));

        let msg = decode(json!({"type": "search", "value": [null, 2]}));
        assert_eq!(
            msg,
            InboundMessage::SearchWindow {
                results: None,
                start: 2
            }
        );

        let msg = decode(json!({"type": "search", "value": [{"file": "only"}]}));
        assert!(matches!(msg, InboundMessage::SearchSnapshot(ref t) if t.len() == 1));
    }

    #[test]
    fn test_scalars() {
        assert_eq!(
            decode(json!({"type": "seek", "value": [12.5, "200.0"]})),
            InboundMessage::Seek {
                elapsed: 12.5,
                duration: 200.0
            }
        );
        assert_eq!(
            decode(json!({"type": "elapsed", "value": 3})),
            InboundMessage::Elapsed(3.0)
        );
        assert_eq!(decode(json!({"mutation": "updatedb"})), InboundMessage::UpdateDb);
        assert_eq!(
            decode(json!({"type": "currentsong", "value": {}})),
            InboundMessage::CurrentTrack(None)
        );
        let msg = decode(json!({"type": "currenttrack", "value": {"Id": "4", "Pos": "2"}}));
        let InboundMessage::CurrentTrack(Some(track)) = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(track.pos, Some(2));
    }

    #[test]
    fn test_unknown_and_malformed() {
        assert_eq!(
            decode(json!({"type": "sticker", "value": 1})),
            InboundMessage::Unknown("sticker".into())
        );
        let err = InboundMessage::decode(r#"{"type":"playlistadd","value":["a",1]}"#).unwrap_err();
        assert!(matches!(err, PayloadError::NotNumeric { field: "start", .. }));
        let err = InboundMessage::decode(r#"{"type":"status","value":3}"#).unwrap_err();
        assert!(matches!(err, PayloadError::Shape { kind: "status", .. }));
        assert!(InboundMessage::decode("not json").is_err());
    }

    #[test]
    fn test_negative_counts_survive_decoding() {
        assert_eq!(
            decode(json!({"type": "playlistadd", "value": [-1, -4]})),
            InboundMessage::PlaylistAdd {
                start: -1,
                count: -4
            }
        );
    }

    #[test]
    fn test_command_encode() {
        let cmd = ClientCommand::PlaylistQuery { start: 0, end: 50 };
        let v: Value = serde_json::from_str(&cmd.encode().unwrap()).unwrap();
        assert_eq!(v, json!({"mutation": "playlistquery", "value": [0, 50]}));

        let cmd = ClientCommand::AddPath {
            path: "music/a.flac".into(),
            pos: None,
        };
        let v: Value = serde_json::from_str(&cmd.encode().unwrap()).unwrap();
        assert_eq!(v, json!({"mutation": "addpath", "value": ["music/a.flac", -1]}));

        let v: Value = serde_json::from_str(&ClientCommand::Clear.encode().unwrap()).unwrap();
        assert_eq!(v, json!({"mutation": "clear", "value": null}));
    }

    #[test]
    fn test_move_onto_itself_is_noop() {
        assert!(ClientCommand::PlaylistMove {
            start: 3,
            end: 5,
            pos: 3
        }
        .is_noop());
        assert!(!ClientCommand::PlaylistMove {
            start: 3,
            end: 5,
            pos: 0
        }
        .is_noop());
    }
}
