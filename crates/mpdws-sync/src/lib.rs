//! Client-side reconciliation of MPD playlist and search deltas.
//!
//! The API server pushes small `{type, value}` deltas over a WebSocket.
//! [`SyncEngine`] folds them, one at a time, into a [`Snapshot`] holding the
//! play queue, the search results and the scalar player fields.

pub mod collection;
pub mod connection;
pub mod dispatch;
mod scalar;
pub mod store;

pub use collection::{Collection, Entry, PlaceholderId};
pub use connection::{ConnectionEvent, ConnectionStatus};
pub use dispatch::{SyncEngine, Target};
pub use store::{Snapshot, Subscription, Timeline};
