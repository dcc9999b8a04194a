//! End-to-end reconciliation scenarios driven by raw frames, the way the API
//! server sends them.

use mpdws_sync::{ConnectionEvent, Entry, SyncEngine};
use serde_json::{json, Value};

fn send(engine: &mut SyncEngine, v: Value) {
    assert!(engine.handle_text(&v.to_string()), "frame dropped: {}", v);
}

fn song(pos: usize, title: &str) -> Value {
    json!({"Pos": pos.to_string(), "Id": format!("{}", 100 + pos), "Title": title, "file": format!("{}.flac", title)})
}

/// Titles in order, `_` for placeholders.
fn playlist(engine: &SyncEngine) -> Vec<String> {
    engine
        .state()
        .playlist
        .iter()
        .map(|e| match e {
            Entry::Pending(_) => "_".to_string(),
            Entry::Resolved(t) => t.title().unwrap_or("?").to_string(),
        })
        .collect()
}

fn search(engine: &SyncEngine) -> Vec<String> {
    engine
        .state()
        .search
        .tracks()
        .map(|t| t.id.clone().unwrap_or_default())
        .collect()
}

fn seeded(titles: &[&str]) -> SyncEngine {
    let mut engine = SyncEngine::new();
    let songs: Vec<Value> = titles
        .iter()
        .enumerate()
        .map(|(i, t)| song(i, t))
        .collect();
    send(&mut engine, json!({"type": "playlist", "value": songs}));
    engine
}

#[test]
fn length_fix_then_positional_writes() {
    let mut engine = SyncEngine::new();
    send(&mut engine, json!({"type": "playlistlengthquery", "value": 3}));
    assert_eq!(playlist(&engine), ["_", "_", "_"]);

    send(
        &mut engine,
        json!({"mutation": "playlistquery", "value": [song(0, "A"), song(1, "B"), song(2, "C")]}),
    );
    assert_eq!(playlist(&engine), ["A", "B", "C"]);
}

#[test]
fn delete_run_in_the_middle() {
    let mut engine = seeded(&["A", "B", "C", "D"]);
    send(&mut engine, json!({"type": "playlistdelete", "value": [1, 2]}));
    assert_eq!(playlist(&engine), ["A", "D"]);
}

#[test]
fn move_with_trim() {
    let mut engine = seeded(&["A", "B", "C"]);
    send(&mut engine, json!({"type": "playlistmove", "value": [0, 1, 2, 1]}));
    assert_eq!(playlist(&engine), ["_", "B"]);
}

#[test]
fn windowed_search_results() {
    let mut engine = SyncEngine::new();
    send(
        &mut engine,
        json!({"type": "search", "value": [[{"file": "X"}, {"file": "Y"}], 0]}),
    );
    assert_eq!(search(&engine), ["X", "Y"]);

    send(&mut engine, json!({"type": "search", "value": [null, 2]}));
    assert_eq!(search(&engine), ["X", "Y"]);

    send(&mut engine, json!({"type": "search", "value": [[{"file": "Z"}], 1]}));
    assert_eq!(search(&engine), ["X", "Z"]);
}

#[test]
fn add_run_keeps_later_entries_in_order() {
    let mut engine = seeded(&["A", "B", "C", "D", "E"]);
    send(&mut engine, json!({"type": "playlistadd", "value": [2, 3]}));
    assert_eq!(playlist(&engine), ["A", "B", "_", "_", "_", "C", "D", "E"]);
    assert_eq!(engine.state().playlist.pending_ranges(), vec![2..5]);
}

#[test]
fn positional_writes_fill_announced_slots() {
    let mut first = seeded(&["A", "B"]);
    send(&mut first, json!({"type": "playlistadd", "value": [1, 1]}));
    send(&mut first, json!({"type": "playlistquery", "value": [song(1, "N")]}));

    // Appended slot, with the shifted neighbour re-sent alongside.
    let mut second = seeded(&["A", "B"]);
    send(&mut second, json!({"type": "playlistadd", "value": [2, 1]}));
    send(&mut second, json!({"type": "playlistquery", "value": [song(1, "N"), song(2, "B")]}));

    assert_eq!(playlist(&first), ["A", "N", "B"]);
    assert_eq!(playlist(&second), ["A", "N", "B"]);
}

#[test]
fn length_matches_last_declaration_after_any_deltas() {
    let mut engine = SyncEngine::new();
    let deltas = [
        json!({"type": "playlistadd", "value": [0, 5]}),
        json!({"type": "playlistdelete", "value": [3, 10]}),
        json!({"type": "playlistchange", "value": [1, 4]}),
        json!({"type": "playlistadd", "value": [50, 2]}),
        json!({"type": "playlistquery", "value": [song(9, "late")]}),
    ];
    for delta in deltas {
        send(&mut engine, delta);
    }
    send(&mut engine, json!({"type": "playlistlengthquery", "value": 4}));

    let state = engine.state();
    assert_eq!(state.playlist.len(), 4);
    assert_eq!(state.playlist.declared_len(), Some(4));
    assert!(state.playlist.is_consistent());
}

#[test]
fn malformed_deltas_leave_state_untouched() {
    let mut engine = seeded(&["A", "B", "C"]);
    let before = engine.state().clone();

    send(&mut engine, json!({"type": "playlistadd", "value": [-1, 3]}));
    send(&mut engine, json!({"type": "playlistdelete", "value": [0, -2]}));
    send(&mut engine, json!({"type": "playlistlengthquery", "value": -4}));
    send(&mut engine, json!({"type": "playlistquery", "value": [{"Pos": -1, "Title": "Q"}]}));
    assert!(!engine.handle_text(r#"{"type":"playlistdelete","value":["one",2]}"#));

    assert_eq!(engine.state(), &before);
}

#[test]
fn bad_items_in_a_write_batch_do_not_sink_the_rest() {
    let mut engine = SyncEngine::new();
    send(&mut engine, json!({"type": "playlistlengthquery", "value": 3}));
    send(
        &mut engine,
        json!({"type": "playlistquery", "value": [
            song(0, "A"),
            {"Pos": "x", "Title": "lost"},
            song(2, "C"),
        ]}),
    );

    assert_eq!(playlist(&engine), ["A", "_", "C"]);
    assert_eq!(engine.state().playlist.pending_ranges(), vec![1..2]);
}

#[test]
fn positions_track_the_index_after_an_add_run() {
    let mut engine = seeded(&["A", "B"]);
    send(&mut engine, json!({"type": "playlistadd", "value": [0, 1]}));

    let positions: Vec<Option<usize>> = engine
        .state()
        .playlist
        .iter()
        .map(|e| e.track().and_then(|t| t.pos))
        .collect();
    assert_eq!(positions, [None, Some(1), Some(2)]);
}

#[test]
fn scalars_project_atomically() {
    let mut engine = SyncEngine::new();
    send(
        &mut engine,
        json!({"mutation": "status", "value": {"state": "play", "playlistlength": "3"}}),
    );
    send(&mut engine, json!({"mutation": "currentsong", "value": song(1, "B")}));
    send(&mut engine, json!({"mutation": "seek", "value": [42.5, 180.0]}));
    send(&mut engine, json!({"mutation": "updatedb"}));
    send(&mut engine, json!({"mutation": "updatedb"}));

    let state = engine.state();
    assert_eq!(state.status_str("state"), Some("play"));
    assert_eq!(state.status_playlist_length(), Some(3));
    assert_eq!(
        state.current_track.as_ref().and_then(|t| t.title()),
        Some("B")
    );
    assert_eq!(state.elapsed(), Some(42.5));
    assert_eq!(state.duration(), Some(180.0));
    assert_eq!(state.database_update_counter, 2);
}

#[test]
fn disconnect_keeps_contents_and_resync_overwrites() {
    let mut engine = seeded(&["A", "B", "C"]);
    assert!(!engine.connection_event(ConnectionEvent::Open));
    send(&mut engine, json!({"type": "playlistadd", "value": [1, 2]}));

    engine.connection_event(ConnectionEvent::Close);
    assert!(!engine.state().connection.connected);
    assert_eq!(playlist(&engine), ["A", "_", "_", "B", "C"]);

    engine.connection_event(ConnectionEvent::ReconnectAttempt(Some(1)));
    assert!(engine.state().connection.reconnecting);
    assert!(engine.connection_event(ConnectionEvent::Open));
    assert!(engine.state().connection.connected);

    send(
        &mut engine,
        json!({"type": "playlist", "value": [song(0, "X"), song(1, "Y")]}),
    );
    assert_eq!(playlist(&engine), ["X", "Y"]);
}
