//! `mpdws` client: WebSocket transport, command input and the single-owner
//! sync loop that drives [`mpdws_sync::SyncEngine`].

pub mod core;
pub mod input;
pub mod transport;
