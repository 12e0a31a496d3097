//! Client-side synchronization engine for channel chat, forum posts and
//! direct messages.
//!
//! Three sources of truth feed one in-memory [`Reconciler`]: REST snapshots
//! taken when a thread is entered, push events broadcast by the server, and
//! optimistic writes issued by the local user. All mutation goes through the
//! [`Store`], one atomic patch at a time.

pub mod config;
pub mod cursor;
pub mod error;
pub mod forum;
pub mod mentions;
pub mod outbox;
pub mod poller;
pub mod reactions;
pub mod recents;
pub mod reconciler;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod thread;
pub mod transport;

pub use config::SyncConfig;
pub use cursor::{CursorTracker, ReadCursor, ScrollMetrics};
pub use error::{Result, SyncError, TransportError};
pub use mentions::{Mention, MentionKind};
pub use outbox::{Draft, Outbox};
pub use reactions::ReactionGroup;
pub use recents::RecentReactions;
pub use reconciler::Reconciler;
pub use session::Session;
pub use snapshot::SnapshotLoader;
pub use store::{Store, StoreUpdate};
pub use thread::{ThreadPhase, ThreadState};
pub use transport::{PushChannel, RestApi};
