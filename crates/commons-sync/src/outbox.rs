use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use commons_types::{
    Author, ChannelId, DeliveryState, Message, MessageId, OutgoingFile, PendingAttachment,
    PostId, PushCall, PushEvent, Subject, ThreadId, UploadState,
};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::reconciler::{ReactionIntent, ReactionKey};
use crate::recents::RecentReactions;
use crate::store::Store;
use crate::transport::{PushChannel, RestApi};

/// A message the user is about to send.
#[derive(Debug, Clone)]
pub struct Draft {
    pub thread: ThreadId,
    pub content: String,
    pub reply_to: Option<MessageId>,
    pub files: Vec<OutgoingFile>,
}

impl Draft {
    pub fn text(thread: ThreadId, content: impl Into<String>) -> Self {
        Self {
            thread,
            content: content.into(),
            reply_to: None,
            files: Vec::new(),
        }
    }
}

/// Issues the current user's writes: shows them in the store first, then
/// performs the network call and records its outcome. Nothing is retried
/// automatically.
#[derive(Clone)]
pub struct Outbox {
    inner: Arc<OutboxInner>,
}

struct OutboxInner {
    store: Store,
    push: Arc<dyn PushChannel>,
    rest: Arc<dyn RestApi>,
    next_temp_id: AtomicI64,
    /// In-flight edit per message; a newer edit cancels the older one.
    edits: Mutex<HashMap<MessageId, (u64, CancellationToken)>>,
    edit_seq: AtomicU64,
    recents: Mutex<RecentReactions>,
    quick_reactions: usize,
}

/// One send attempt, first try or retry.
struct Outgoing {
    thread: ThreadId,
    temp: MessageId,
    target: Option<(ChannelId, Option<PostId>)>,
    content: String,
    reply_to: Option<MessageId>,
    attachment_urls: Vec<String>,
    client_ref: Option<String>,
}

impl Outbox {
    pub fn new(
        store: Store,
        push: Arc<dyn PushChannel>,
        rest: Arc<dyn RestApi>,
        config: &SyncConfig,
    ) -> Self {
        // Temporary ids count down from the negated launch time
        let seed = Utc::now().timestamp_micros().max(1);
        Self {
            inner: Arc::new(OutboxInner {
                store,
                push,
                rest,
                next_temp_id: AtomicI64::new(-seed),
                edits: Mutex::new(HashMap::new()),
                edit_seq: AtomicU64::new(0),
                recents: Mutex::new(RecentReactions::new(config.recent_reactions_max)),
                quick_reactions: config.quick_reactions,
            }),
        }
    }

    fn next_temp_id(&self) -> MessageId {
        MessageId(self.inner.next_temp_id.fetch_sub(1, Ordering::Relaxed))
    }

    /// Channel and post a push send must name, or `None` for direct
    /// messages, which go over REST.
    fn target(&self, thread: ThreadId) -> Result<Option<(ChannelId, Option<PostId>)>> {
        match thread {
            ThreadId::Direct(_) => Ok(None),
            _ => Ok(Some(self.inner.store.read(|s| s.send_target(thread))??)),
        }
    }

    // -- Send --

    /// Show `draft` as a pending message, upload its files in parallel, then
    /// send it. Returns the temporary id of the entry.
    ///
    /// A failed upload only marks that attachment; the text goes out with
    /// whatever uploaded. If the send call itself fails the entry is marked
    /// failed and kept for [`Outbox::retry_send`] or
    /// [`Outbox::discard_failed`].
    pub async fn send_message(&self, draft: Draft) -> Result<MessageId> {
        let Draft {
            thread,
            content,
            reply_to,
            files,
        } = draft;

        if matches!(thread, ThreadId::Direct(_)) && !files.is_empty() {
            return Err(SyncError::Unsupported(thread));
        }
        let target = self.target(thread)?;

        let temp = self.next_temp_id();
        let client_ref = Uuid::new_v4().to_string();
        let pending = self.inner.store.read(|s| {
            let me = s.me();
            let (channel_id, post_id) = target.unwrap_or((0, None));
            Message {
                id: temp,
                channel_id,
                post_id,
                direct_peer: match thread {
                    ThreadId::Direct(peer) => Some(peer),
                    _ => None,
                },
                user_id: me.id,
                user: Some(Author {
                    id: me.id,
                    username: me.username.clone(),
                    nickname: me.nickname.clone(),
                    avatar_url: None,
                }),
                content: content.clone(),
                created_at: Utc::now(),
                updated_at: None,
                attachment_urls: Vec::new(),
                reply_to_id: reply_to,
                reply_to_user_id: None,
                reactions: Vec::new(),
                client_ref: Some(client_ref.clone()),
                state: DeliveryState::Pending,
                pending_attachments: files
                    .iter()
                    .map(|f| PendingAttachment {
                        file_name: f.file_name.clone(),
                        state: UploadState::Pending,
                    })
                    .collect(),
            }
        })?;
        self.inner.store.with_state(|s| s.insert_pending(pending))??;
        debug!("Queued message {} in {}", temp, thread);

        let uploads = files
            .iter()
            .enumerate()
            .map(|(index, file)| self.upload_one(thread, temp, index, file));
        let attachment_urls: Vec<String> = join_all(uploads).await.into_iter().flatten().collect();

        self.dispatch(Outgoing {
            thread,
            temp,
            target,
            content,
            reply_to,
            attachment_urls,
            client_ref: Some(client_ref),
        })
        .await?;
        Ok(temp)
    }

    async fn upload_one(
        &self,
        thread: ThreadId,
        temp: MessageId,
        index: usize,
        file: &OutgoingFile,
    ) -> Option<String> {
        self.set_upload_state(thread, temp, index, UploadState::Uploading);

        match self.inner.rest.upload(file).await {
            Ok(url) => {
                debug!("Uploaded {} for message {}", file.file_name, temp);
                self.set_upload_state(thread, temp, index, UploadState::Done { url: url.clone() });
                Some(url)
            }
            Err(source) => {
                let err = SyncError::Upload {
                    file_name: file.file_name.clone(),
                    source,
                };
                warn!("{}", err);
                self.set_upload_state(
                    thread,
                    temp,
                    index,
                    UploadState::Error {
                        reason: err.to_string(),
                    },
                );
                None
            }
        }
    }

    fn set_upload_state(&self, thread: ThreadId, temp: MessageId, index: usize, state: UploadState) {
        if let Err(e) = self
            .inner
            .store
            .with_state(|s| s.set_attachment_state(thread, temp, index, state))
        {
            warn!("Cannot record upload state for {}: {}", temp, e);
        }
    }

    async fn dispatch(&self, out: Outgoing) -> Result<()> {
        let Outgoing {
            thread,
            temp,
            target,
            content,
            reply_to,
            attachment_urls,
            client_ref,
        } = out;

        let result = match (thread, target) {
            (ThreadId::Direct(peer), _) => self
                .inner
                .rest
                .send_direct_message(peer, &content)
                .await
                .map(Some),
            (_, Some((channel_id, post_id))) => {
                let call = PushCall::SendMessage {
                    channel_id,
                    content,
                    reply_to_id: reply_to,
                    attachment_urls: if attachment_urls.is_empty() {
                        None
                    } else {
                        serde_json::to_string(&attachment_urls).ok()
                    },
                    post_id,
                    client_ref,
                };
                self.inner.push.invoke(call).await.map(|()| None)
            }
            (_, None) => {
                self.inner
                    .store
                    .with_state(|s| s.fail_send(thread, temp, attachment_urls))?;
                return Err(SyncError::UnknownThread(thread));
            }
        };

        match result {
            Ok(confirmed) => {
                self.inner.store.with_state(|s| {
                    s.complete_send(thread, temp);
                    if let Some(message) = confirmed {
                        s.apply(PushEvent::ReceiveMessage(message));
                    }
                })?;
                info!("Sent message {} in {}", temp, thread);
                Ok(())
            }
            Err(e) => {
                warn!("Send of {} in {} failed: {}", temp, thread, e);
                self.inner
                    .store
                    .with_state(|s| s.fail_send(thread, temp, attachment_urls))?;
                Err(e.into())
            }
        }
    }

    /// Re-issue a failed send with the same correlation id and the
    /// attachments that already uploaded.
    pub async fn retry_send(&self, temp: MessageId) -> Result<()> {
        let thread = self
            .inner
            .store
            .read(|s| s.locate(temp))?
            .ok_or(SyncError::UnknownMessage(temp))?;
        let target = self.target(thread)?;
        let plan = self.inner.store.with_state(|s| s.begin_retry(temp))??;
        info!("Retrying message {} in {}", temp, thread);

        self.dispatch(Outgoing {
            thread: plan.thread,
            temp,
            target,
            content: plan.content,
            reply_to: plan.reply_to,
            attachment_urls: plan.attachment_urls,
            client_ref: plan.client_ref,
        })
        .await
    }

    pub fn discard_failed(&self, temp: MessageId) -> Result<()> {
        self.inner.store.with_state(|s| s.discard_failed(temp))?
    }

    // -- Edit / delete --

    fn lock_edits(&self) -> Result<MutexGuard<'_, HashMap<MessageId, (u64, CancellationToken)>>> {
        self.inner.edits.lock().map_err(|_| SyncError::Poisoned)
    }

    /// Edit locally, then send. A newer edit of the same message cancels
    /// this one, which then returns [`SyncError::Cancelled`]. The local
    /// copy is not rolled back when the call fails.
    pub async fn edit_message(&self, id: MessageId, content: &str) -> Result<()> {
        let thread = self.inner.store.with_state(|s| s.edit_local(id, content))??;

        let token = CancellationToken::new();
        let seq = self.inner.edit_seq.fetch_add(1, Ordering::Relaxed);
        let previous = self.lock_edits()?.insert(id, (seq, token.clone()));
        if let Some((_, previous)) = previous {
            debug!("Cancelling superseded edit of {}", id);
            previous.cancel();
        }

        let result = tokio::select! {
            _ = token.cancelled() => Err(SyncError::Cancelled),
            r = self.inner.rest.edit_message(id, content) => r.map_err(SyncError::from),
        };

        {
            let mut edits = self.lock_edits()?;
            if edits.get(&id).is_some_and(|(current, _)| *current == seq) {
                edits.remove(&id);
            }
        }

        match &result {
            Ok(()) => info!("Edited message {} in {}", id, thread),
            Err(SyncError::Cancelled) => {}
            Err(e) => warn!("Edit of {} failed, keeping local text: {}", id, e),
        }
        result
    }

    /// Delete a confirmed message, or discard a failed optimistic one.
    pub async fn delete_message(&self, id: MessageId) -> Result<()> {
        if id.is_temporary() {
            return self.discard_failed(id);
        }

        if let Err(e) = self.inner.rest.delete_message(id).await {
            warn!("Delete of {} failed: {}", id, e);
            return Err(e.into());
        }
        self.inner.store.with_state(|s| s.remove_message(id))?;
        info!("Deleted message {}", id);
        Ok(())
    }

    // -- Reactions --

    /// Flip the current user's `emoji` reaction on `subject`.
    ///
    /// The store changes immediately. Only one call per subject and emoji
    /// is on the wire; toggles made meanwhile collapse into the final wanted
    /// state, which is sent once the current call succeeds.
    pub async fn toggle_reaction(&self, subject: Subject, emoji: &str) -> Result<()> {
        let intent = self
            .inner
            .store
            .with_state(|s| s.toggle_own_reaction(subject, emoji))??;

        let mut add = match intent {
            ReactionIntent::Send(add) => add,
            ReactionIntent::Queued(add) => {
                if add {
                    self.touch_recent(emoji);
                }
                return Ok(());
            }
        };
        if add {
            self.touch_recent(emoji);
        }

        let key = ReactionKey {
            subject,
            emoji: emoji.to_string(),
        };
        loop {
            let result = self
                .inner
                .push
                .invoke(PushCall::reaction(subject, emoji, add))
                .await;
            let ok = result.is_ok();
            let next = self
                .inner
                .store
                .with_state(|s| s.settle_reaction(&key, ok))?;

            match (result, next) {
                (Err(e), _) => {
                    warn!("Reaction {} on {:?} failed, reverted: {}", emoji, subject, e);
                    return Err(e.into());
                }
                (Ok(()), Some(next)) => {
                    debug!("Sending queued reaction {} on {:?} -> {}", emoji, subject, next);
                    add = next;
                }
                (Ok(()), None) => return Ok(()),
            }
        }
    }

    fn recents(&self) -> MutexGuard<'_, RecentReactions> {
        self.inner
            .recents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn touch_recent(&self, emoji: &str) {
        self.recents().touch(emoji);
    }

    /// Recently used emoji, most recent first.
    pub fn recent_reactions(&self) -> RecentReactions {
        self.recents().clone()
    }

    /// The first few recent emoji, for the quick-reaction bar.
    pub fn quick_reactions(&self) -> Vec<String> {
        self.recents().quick(self.inner.quick_reactions).to_vec()
    }

    /// Replace the recent list, e.g. with one persisted by the host.
    pub fn restore_recent_reactions(&self, recents: RecentReactions) {
        *self.recents() = recents;
    }
}
