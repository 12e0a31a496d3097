//! Interval re-fetch for threads that have no push subscription (direct
//! messages). Fetched messages are fed through the same `ReceiveMessage`
//! path as push events, so repeats are absorbed by deduplication.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use commons_types::{PushEvent, ThreadId};

use crate::error::Result;
use crate::snapshot::SnapshotLoader;
use crate::store::Store;

/// Poll `thread` every `interval` until `token` is cancelled.
pub fn spawn(
    store: Store,
    loader: SnapshotLoader,
    thread: ThreadId,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the snapshot was just loaded
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match poll_once(&store, &loader, thread).await {
                        Ok(0) => trace!("No new messages in {}", thread),
                        Ok(n) => debug!("Polled {} new messages in {}", n, thread),
                        Err(e) => warn!("Polling {} failed: {}", thread, e),
                    }
                }
            }
        }
        debug!("Stopped polling {}", thread);
    })
}

/// One fetch-and-merge round. Returns how many messages were new.
pub async fn poll_once(store: &Store, loader: &SnapshotLoader, thread: ThreadId) -> Result<usize> {
    let snapshot = loader.fetch(thread).await?;
    store.with_state(|state| {
        snapshot
            .messages
            .into_iter()
            .map(|message| state.apply(PushEvent::ReceiveMessage(message)))
            .filter(|&changed| changed)
            .count()
    })
}
