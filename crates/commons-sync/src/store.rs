use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::trace;

use commons_types::{ChannelId, CurrentUser, Message, Post, PushEvent, Subject, ThreadId};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::reactions::ReactionGroup;
use crate::reconciler::Reconciler;

/// What changed after a patch. Renderers re-read the named projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreUpdate {
    Thread(ThreadId),
    Forum(ChannelId),
    Cursor(ThreadId),
}

/// Shared handle to the reconciler.
///
/// Every event and every write outcome is applied as one closure call under
/// the lock, and the lock is never held across an await.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: Mutex<Reconciler>,
    updates_tx: broadcast::Sender<StoreUpdate>,
}

impl Store {
    pub fn new(me: CurrentUser, config: &SyncConfig) -> Self {
        let (updates_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(Reconciler::new(me, config.supersede_window)),
                updates_tx,
            }),
        }
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate> {
        self.inner.updates_tx.subscribe()
    }

    /// Apply one atomic patch, then notify subscribers of what it touched.
    pub fn with_state<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Reconciler) -> T,
    {
        let (out, updates) = {
            let mut state = self.inner.state.lock().map_err(|_| SyncError::Poisoned)?;
            let out = f(&mut state);
            (out, state.drain_updates())
        };

        for update in updates {
            trace!("Store update: {:?}", update);
            // No receivers is fine
            let _ = self.inner.updates_tx.send(update);
        }
        Ok(out)
    }

    /// Read-only access for projections.
    pub fn read<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Reconciler) -> T,
    {
        let state = self.inner.state.lock().map_err(|_| SyncError::Poisoned)?;
        Ok(f(&state))
    }

    /// Merge a push event. Returns whether anything changed.
    pub fn apply(&self, event: PushEvent) -> Result<bool> {
        self.with_state(|state| state.apply(event))
    }

    /// Render-ordered copy of a thread's messages.
    pub fn messages(&self, thread: ThreadId) -> Result<Vec<Message>> {
        self.read(|state| {
            state
                .thread(thread)
                .map(|t| t.messages().cloned().collect())
                .ok_or(SyncError::UnknownThread(thread))
        })?
    }

    /// Copy of a forum's post list, most recently active first.
    pub fn posts(&self, channel_id: ChannelId) -> Result<Vec<Post>> {
        self.read(|state| {
            state
                .forum(channel_id)
                .map(|f| f.posts().to_vec())
                .unwrap_or_default()
        })
    }

    pub fn reaction_groups(&self, subject: Subject) -> Result<Vec<ReactionGroup>> {
        self.read(|state| state.reaction_groups(subject))?
    }
}
