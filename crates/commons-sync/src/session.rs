use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use commons_types::{ChannelId, CurrentUser, PushCall, PushEvent, ThreadId};

use crate::config::SyncConfig;
use crate::cursor::CursorTracker;
use crate::error::Result;
use crate::outbox::Outbox;
use crate::poller;
use crate::snapshot::SnapshotLoader;
use crate::store::Store;
use crate::transport::{PushChannel, RestApi};

/// Wires the engine together for one signed-in user. Collaborators are
/// passed in; nothing here is global.
pub struct Session {
    store: Store,
    outbox: Outbox,
    cursors: CursorTracker,
    loader: SnapshotLoader,
    push: Arc<dyn PushChannel>,
    rest: Arc<dyn RestApi>,
    config: SyncConfig,
    pollers: Mutex<HashMap<ThreadId, (CancellationToken, JoinHandle<()>)>>,
}

impl Session {
    pub fn new(
        me: CurrentUser,
        push: Arc<dyn PushChannel>,
        rest: Arc<dyn RestApi>,
        config: SyncConfig,
    ) -> Self {
        let store = Store::new(me, &config);
        let outbox = Outbox::new(store.clone(), push.clone(), rest.clone(), &config);
        let cursors = CursorTracker::new(store.clone(), rest.clone(), config.scroll_threshold_px);
        let loader = SnapshotLoader::new(rest.clone(), config.snapshot_limit);
        Self {
            store,
            outbox,
            cursors,
            loader,
            push,
            rest,
            config,
            pollers: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn cursors(&self) -> &CursorTracker {
        &self.cursors
    }

    fn pollers(&self) -> MutexGuard<'_, HashMap<ThreadId, (CancellationToken, JoinHandle<()>)>> {
        self.pollers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Load a thread's snapshot, then start following it: channels subscribe
    /// on the push channel, direct messages fall back to polling. An unread
    /// thread is acknowledged right away.
    pub async fn enter_thread(&self, thread: ThreadId) -> Result<()> {
        let count = self.loader.load(&self.store, thread).await?;
        self.store.with_state(|s| s.go_live(thread))??;

        let subscribe = match thread {
            ThreadId::Channel(channel_id) => Some(channel_id),
            // Replies travel on the forum channel's group
            ThreadId::Post(_) => self
                .store
                .read(|s| s.send_target(thread).ok())?
                .map(|(channel_id, _)| channel_id),
            ThreadId::Direct(_) => {
                self.start_polling(thread);
                None
            }
        };
        if let Some(channel_id) = subscribe {
            if let Err(e) = self.push.invoke(PushCall::JoinChannel { channel_id }).await {
                warn!("Subscribing to {} failed: {}", thread, e);
                self.store.with_state(|s| s.go_idle(thread))?;
                return Err(e.into());
            }
        }

        info!("Entered {} ({} messages)", thread, count);
        self.cursors.on_enter(thread).await;
        Ok(())
    }

    pub async fn leave_thread(&self, thread: ThreadId) -> Result<()> {
        self.store.with_state(|s| s.go_idle(thread))?;
        match thread {
            ThreadId::Channel(channel_id) => {
                if let Err(e) = self.push.invoke(PushCall::LeaveChannel { channel_id }).await {
                    warn!("Unsubscribing from {} failed: {}", thread, e);
                }
            }
            ThreadId::Post(_) => {}
            ThreadId::Direct(_) => self.stop_polling(thread),
        }
        info!("Left {}", thread);
        Ok(())
    }

    /// Load a forum channel's post list and follow its changes.
    pub async fn open_forum(&self, channel_id: ChannelId) -> Result<()> {
        let posts = self.rest.fetch_posts(channel_id).await?;
        self.store.with_state(|s| s.load_forum(channel_id, posts))?;
        if let Err(e) = self.push.invoke(PushCall::JoinChannel { channel_id }).await {
            warn!("Subscribing to forum {} failed: {}", channel_id, e);
            self.store.with_state(|s| s.close_forum(channel_id))?;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn close_forum(&self, channel_id: ChannelId) -> Result<()> {
        self.store.with_state(|s| s.close_forum(channel_id))?;
        if let Err(e) = self.push.invoke(PushCall::LeaveChannel { channel_id }).await {
            warn!("Unsubscribing from forum {} failed: {}", channel_id, e);
        }
        Ok(())
    }

    fn start_polling(&self, thread: ThreadId) {
        let mut pollers = self.pollers();
        if pollers.contains_key(&thread) {
            return;
        }
        let token = CancellationToken::new();
        let handle = poller::spawn(
            self.store.clone(),
            self.loader.clone(),
            thread,
            self.config.poll_interval,
            token.clone(),
        );
        debug!("Polling {} every {:?}", thread, self.config.poll_interval);
        pollers.insert(thread, (token, handle));
    }

    fn stop_polling(&self, thread: ThreadId) {
        if let Some((token, _)) = self.pollers().remove(&thread) {
            token.cancel();
        }
    }

    /// Apply push events in delivery order until the sender side closes.
    pub async fn pump(&self, mut events: mpsc::Receiver<PushEvent>) {
        while let Some(event) = events.recv().await {
            let name = event.name();
            if let Err(e) = self.store.apply(event) {
                warn!("Dropping {} event: {}", name, e);
            }
        }
        debug!("Push event stream closed");
    }

    /// Stop every background task.
    pub fn shutdown(&self) {
        for (thread, (token, _)) in self.pollers().drain() {
            token.cancel();
            debug!("Stopped polling {}", thread);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
