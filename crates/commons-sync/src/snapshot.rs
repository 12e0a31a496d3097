use std::sync::Arc;

use tracing::{debug, warn};

use commons_types::api::ThreadSnapshot;
use commons_types::{DeliveryState, ThreadId};

use crate::error::Result;
use crate::store::Store;
use crate::transport::RestApi;

/// Fetches the authoritative state of a thread.
///
/// Fetching has no side effects; applying the result goes through the
/// reconciler, which decides what happens to optimistic entries.
#[derive(Clone)]
pub struct SnapshotLoader {
    rest: Arc<dyn RestApi>,
    limit: u32,
}

impl SnapshotLoader {
    pub fn new(rest: Arc<dyn RestApi>, limit: u32) -> Self {
        Self { rest, limit }
    }

    /// Fetch and normalize, without touching the store.
    pub async fn fetch(&self, thread: ThreadId) -> Result<ThreadSnapshot> {
        Ok(normalize(thread, self.fetch_raw(thread).await?))
    }

    async fn fetch_raw(&self, thread: ThreadId) -> Result<ThreadSnapshot> {
        let snapshot = self.rest.fetch_snapshot(thread, self.limit).await.map_err(|e| {
            warn!("Snapshot of {} failed: {}", thread, e);
            e
        })?;
        Ok(snapshot)
    }

    /// Fetch and apply in one step; the thread normalizes what it loads.
    /// Returns the number of messages in the snapshot.
    pub async fn load(&self, store: &Store, thread: ThreadId) -> Result<usize> {
        let snapshot = self.fetch_raw(thread).await?;
        let count = snapshot.messages.len();
        store.with_state(|state| state.load_snapshot(thread, snapshot))?;
        Ok(count)
    }
}

/// Bring a server snapshot into the shape the reconciler expects: sorted by
/// id, one entry per id, all confirmed, tagged with the thread they belong to.
pub fn normalize(thread: ThreadId, mut snapshot: ThreadSnapshot) -> ThreadSnapshot {
    let before = snapshot.messages.len();
    snapshot.messages.retain(|m| !m.id.is_temporary());
    snapshot.messages.sort_by_key(|m| m.id);
    snapshot.messages.dedup_by_key(|m| m.id);
    if snapshot.messages.len() != before {
        debug!(
            "Snapshot of {} had {} duplicate or invalid rows",
            thread,
            before - snapshot.messages.len()
        );
    }

    for message in &mut snapshot.messages {
        message.state = DeliveryState::Confirmed;
        message.pending_attachments.clear();
        match thread {
            ThreadId::Channel(channel_id) => {
                message.channel_id = channel_id;
                message.post_id = None;
            }
            ThreadId::Post(post_id) => message.post_id = Some(post_id),
            ThreadId::Direct(peer) => {
                message.post_id = None;
                message.direct_peer = Some(peer);
            }
        }
    }
    snapshot
}
