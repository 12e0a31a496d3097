use std::collections::HashMap;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tracing::{debug, info, trace};

use commons_types::api::ThreadSnapshot;
use commons_types::events::{MessageReaction, PostReaction};
use commons_types::{
    ChannelId, CurrentUser, DeliveryState, Message, MessageId, Post, PostId, PushEvent, Reaction,
    Role, Subject, ThreadId, UploadState, UserId,
};

use crate::error::{Result, SyncError};
use crate::forum::ForumState;
use crate::mentions::{self, Mention};
use crate::reactions::{self, ReactionGroup};
use crate::store::StoreUpdate;
use crate::thread::{Merge, ThreadPhase, ThreadState};

/// Identifies one reaction pill the current user can toggle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ReactionKey {
    pub subject: Subject,
    pub emoji: String,
}

/// At most one add/remove call per key is on the wire. Toggles made while
/// it is in flight collapse into `queued`.
#[derive(Debug, Clone)]
struct ReactionSlot {
    /// Last state the server accepted.
    confirmed: bool,
    /// State the in-flight call asks for.
    sending: bool,
    queued: Option<bool>,
}

/// What the caller should do after a local reaction toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReactionIntent {
    /// Issue the add (`true`) or remove (`false`) call now.
    Send(bool),
    /// A call for this key is already in flight. The wanted state was
    /// recorded and is sent when that call settles.
    Queued(bool),
}

/// Everything needed to re-issue a failed send.
#[derive(Debug, Clone)]
pub(crate) struct RetryPlan {
    pub thread: ThreadId,
    pub content: String,
    pub reply_to: Option<MessageId>,
    pub attachment_urls: Vec<String>,
    pub client_ref: Option<String>,
}

/// Canonical in-memory state of every open thread and forum, and the only
/// place it is mutated.
pub struct Reconciler {
    me: CurrentUser,
    threads: HashMap<ThreadId, ThreadState>,
    forums: HashMap<ChannelId, ForumState>,
    reactions_in_flight: HashMap<ReactionKey, ReactionSlot>,
    supersede_window: TimeDelta,
    updates: Vec<StoreUpdate>,
}

impl Reconciler {
    pub fn new(me: CurrentUser, supersede_window: Duration) -> Self {
        Self {
            me,
            threads: HashMap::new(),
            forums: HashMap::new(),
            reactions_in_flight: HashMap::new(),
            supersede_window: TimeDelta::from_std(supersede_window)
                .unwrap_or_else(|_| TimeDelta::seconds(30)),
            updates: Vec::new(),
        }
    }

    pub fn me(&self) -> &CurrentUser {
        &self.me
    }

    pub fn thread(&self, id: ThreadId) -> Option<&ThreadState> {
        self.threads.get(&id)
    }

    pub fn forum(&self, channel_id: ChannelId) -> Option<&ForumState> {
        self.forums.get(&channel_id)
    }

    pub fn reaction_groups(&self, subject: Subject) -> Result<Vec<ReactionGroup>> {
        let reactions = match subject {
            Subject::Message(id) => self
                .threads
                .values()
                .find_map(|t| t.get(id))
                .map(|m| &m.reactions),
            Subject::Post(id) => self
                .forums
                .values()
                .find_map(|f| f.get(id))
                .or_else(|| self.threads.get(&ThreadId::Post(id)).and_then(|t| t.header()))
                .map(|p| &p.reactions),
        };
        reactions
            .map(|r| reactions::aggregate(r, self.me.id))
            .ok_or(SyncError::UnknownSubject(subject))
    }

    /// Mention highlight of `message` for the current user. The reply
    /// target's author is looked up in the thread when the server did not
    /// expand it.
    pub fn mention_for(&self, message: &Message, roles: &[Role]) -> Mention {
        let reply_author = message.reply_to_user_id.or_else(|| {
            let target = message.reply_to_id?;
            self.threads
                .get(&message.thread())
                .and_then(|t| t.get(target))
                .map(|m| m.user_id)
        });
        mentions::resolve(&message.content, roles, &self.me, reply_author)
    }

    // -- Thread lifecycle --

    /// Replace a thread's confirmed messages with a fresh snapshot.
    pub fn load_snapshot(&mut self, id: ThreadId, snapshot: ThreadSnapshot) {
        let count = snapshot.messages.len();
        let thread = self
            .threads
            .entry(id)
            .or_insert_with(|| ThreadState::new(id));
        let dropped = thread.load_snapshot(snapshot);

        info!("Loaded {} with {} messages", id, count);
        if dropped > 0 {
            debug!("Dropped {} pending entries covered by the snapshot of {}", dropped, id);
        }
        self.notify(StoreUpdate::Thread(id));
        self.notify(StoreUpdate::Cursor(id));
    }

    /// Start merging push events for a loaded thread.
    pub fn go_live(&mut self, id: ThreadId) -> Result<()> {
        let thread = self
            .threads
            .get_mut(&id)
            .ok_or(SyncError::UnknownThread(id))?;
        match thread.phase() {
            ThreadPhase::Idle => Err(SyncError::UnknownThread(id)),
            ThreadPhase::Live => Ok(()),
            ThreadPhase::Loaded => {
                thread.set_phase(ThreadPhase::Live);
                info!("{} is live", id);
                Ok(())
            }
        }
    }

    /// Stop merging push events. Local state is kept until the next snapshot.
    pub fn go_idle(&mut self, id: ThreadId) {
        if let Some(thread) = self.threads.get_mut(&id) {
            thread.set_phase(ThreadPhase::Idle);
            debug!("{} is idle", id);
        }
    }

    pub fn load_forum(&mut self, channel_id: ChannelId, posts: Vec<Post>) {
        info!("Loaded forum {} with {} posts", channel_id, posts.len());
        self.forums
            .insert(channel_id, ForumState::new(channel_id, posts));
        self.notify(StoreUpdate::Forum(channel_id));
    }

    pub fn close_forum(&mut self, channel_id: ChannelId) {
        self.forums.remove(&channel_id);
    }

    // -- Push events --

    /// Merge one push event. Duplicates and events for threads that are not
    /// live are absorbed. Returns whether anything changed.
    pub fn apply(&mut self, event: PushEvent) -> bool {
        trace!("Applying {}", event.name());
        match event {
            PushEvent::ReceiveMessage(message) => self.receive_message(message),
            PushEvent::MessageUpdated(message) => self.update_message(&message),
            PushEvent::MessageDeleted(id) => self.remove_message(id),
            PushEvent::PostCreated(post) => self.create_post(post),
            PushEvent::PostUpdated(post) => self.update_post(&post),
            PushEvent::PostDeleted(id) => self.delete_post(id),
            PushEvent::MessageReactionAdded(MessageReaction {
                message_id,
                user_id,
                emoji,
            }) => self.apply_reaction(Subject::Message(message_id), user_id, &emoji, true),
            PushEvent::MessageReactionRemoved(MessageReaction {
                message_id,
                user_id,
                emoji,
            }) => self.apply_reaction(Subject::Message(message_id), user_id, &emoji, false),
            PushEvent::PostReactionAdded(PostReaction {
                post_id,
                user_id,
                emoji,
            }) => self.apply_reaction(Subject::Post(post_id), user_id, &emoji, true),
            PushEvent::PostReactionRemoved(PostReaction {
                post_id,
                user_id,
                emoji,
            }) => self.apply_reaction(Subject::Post(post_id), user_id, &emoji, false),
        }
    }

    fn receive_message(&mut self, message: Message) -> bool {
        let mut changed = false;

        if message.post_id.is_some() {
            let me = self.me.id;
            let mut bumped = Vec::new();
            for forum in self.forums.values_mut() {
                if forum.bump(&message, me) {
                    bumped.push(forum.channel_id());
                }
            }
            changed |= !bumped.is_empty();
            for channel_id in bumped {
                self.notify(StoreUpdate::Forum(channel_id));
            }
        }

        let id = message.thread();
        let Some(thread) = self.threads.get_mut(&id) else {
            trace!("Dropping message {} for unopened {}", message.id, id);
            return changed;
        };
        if thread.phase() != ThreadPhase::Live {
            trace!("Dropping message {} for {} (not live)", message.id, id);
            return changed;
        }

        let from_other = message.user_id != self.me.id;
        let message_id = message.id;
        match thread.merge_confirmed(message, self.supersede_window) {
            Merge::Duplicate => {
                debug!("Ignoring duplicate message {} in {}", message_id, id);
                changed
            }
            Merge::Inserted { superseded } => {
                if let Some(temp) = superseded {
                    debug!("Message {} superseded {} in {}", message_id, temp, id);
                }
                if from_other {
                    thread.set_has_unread(true);
                }
                self.notify(StoreUpdate::Thread(id));
                true
            }
        }
    }

    fn update_message(&mut self, updated: &Message) -> bool {
        let id = updated.thread();
        let Some(thread) = self.threads.get_mut(&id) else {
            return false;
        };
        if thread.phase() != ThreadPhase::Live {
            return false;
        }
        let Some(message) = thread.get_mut(updated.id) else {
            debug!("Update for unknown message {} in {}", updated.id, id);
            return false;
        };
        if message.content == updated.content
            && message.attachment_urls == updated.attachment_urls
            && message.updated_at == updated.updated_at
        {
            return false;
        }
        message.content = updated.content.clone();
        message.attachment_urls = updated.attachment_urls.clone();
        message.updated_at = updated.updated_at;
        self.notify(StoreUpdate::Thread(id));
        true
    }

    /// Remove a confirmed message from whichever thread holds it.
    pub(crate) fn remove_message(&mut self, id: MessageId) -> bool {
        let mut removed = Vec::new();
        for (thread_id, thread) in self.threads.iter_mut() {
            if thread.remove_confirmed(id).is_some() {
                removed.push(*thread_id);
            }
        }
        if removed.is_empty() {
            debug!("Delete for unknown message {}", id);
            return false;
        }
        for thread_id in removed {
            self.notify(StoreUpdate::Thread(thread_id));
        }
        true
    }

    fn create_post(&mut self, post: Post) -> bool {
        let channel_id = post.channel_id;
        let Some(forum) = self.forums.get_mut(&channel_id) else {
            trace!("Dropping post {} for closed forum {}", post.id, channel_id);
            return false;
        };
        forum.prepend(post);
        self.notify(StoreUpdate::Forum(channel_id));
        true
    }

    fn update_post(&mut self, post: &Post) -> bool {
        let mut changed = false;
        if let Some(forum) = self.forums.get_mut(&post.channel_id) {
            if forum.update(post) {
                changed = true;
                self.notify(StoreUpdate::Forum(post.channel_id));
            }
        }

        let thread_id = ThreadId::Post(post.id);
        if let Some(header) = self
            .threads
            .get_mut(&thread_id)
            .and_then(|t| t.header_mut())
        {
            header.title = post.title.clone();
            header.content = post.content.clone();
            header.updated_at = post.updated_at;
            header.attachment_urls = post.attachment_urls.clone();
            header.is_pinned = post.is_pinned;
            header.is_locked = post.is_locked;
            changed = true;
            self.notify(StoreUpdate::Thread(thread_id));
        }
        changed
    }

    fn delete_post(&mut self, id: PostId) -> bool {
        let mut removed = Vec::new();
        for forum in self.forums.values_mut() {
            if forum.remove(id) {
                removed.push(forum.channel_id());
            }
        }
        let mut changed = !removed.is_empty();
        for channel_id in removed {
            self.notify(StoreUpdate::Forum(channel_id));
        }

        let thread_id = ThreadId::Post(id);
        if self.threads.remove(&thread_id).is_some() {
            info!("{} was deleted", thread_id);
            changed = true;
            self.notify(StoreUpdate::Thread(thread_id));
        }
        self.reactions_in_flight
            .retain(|key, _| key.subject != Subject::Post(id));
        changed
    }

    fn apply_reaction(
        &mut self,
        subject: Subject,
        user_id: UserId,
        emoji: &str,
        present: bool,
    ) -> bool {
        if user_id == self.me.id {
            let key = ReactionKey {
                subject,
                emoji: emoji.to_string(),
            };
            if self.reactions_in_flight.contains_key(&key) {
                trace!("Ignoring echo of own reaction {} on {:?}", emoji, subject);
                return false;
            }
        }

        let mut touched = Vec::new();
        for (update, list) in self.reaction_lists(subject) {
            if reactions::set(list, user_id, emoji, present) {
                touched.push(update);
            }
        }
        if touched.is_empty() {
            trace!("Reaction {} on {:?} already in target state", emoji, subject);
            return false;
        }
        for update in touched {
            self.notify(update);
        }
        true
    }

    /// Every stored copy of a subject's reaction list, paired with the
    /// update that announces a change to it. A post lives both in its
    /// forum list and as the header of its thread.
    fn reaction_lists(&mut self, subject: Subject) -> Vec<(StoreUpdate, &mut Vec<Reaction>)> {
        let mut lists = Vec::new();
        match subject {
            Subject::Message(id) => {
                for (thread_id, thread) in self.threads.iter_mut() {
                    if let Some(message) = thread.get_mut(id) {
                        lists.push((StoreUpdate::Thread(*thread_id), &mut message.reactions));
                    }
                }
            }
            Subject::Post(id) => {
                for forum in self.forums.values_mut() {
                    let channel_id = forum.channel_id();
                    if let Some(post) = forum.get_mut(id) {
                        lists.push((StoreUpdate::Forum(channel_id), &mut post.reactions));
                    }
                }
                let thread_id = ThreadId::Post(id);
                if let Some(header) = self
                    .threads
                    .get_mut(&thread_id)
                    .and_then(|t| t.header_mut())
                {
                    lists.push((StoreUpdate::Thread(thread_id), &mut header.reactions));
                }
            }
        }
        lists
    }

    fn set_own_reaction(&mut self, subject: Subject, emoji: &str, present: bool) {
        let me = self.me.id;
        let mut touched = Vec::new();
        for (update, list) in self.reaction_lists(subject) {
            if reactions::set(list, me, emoji, present) {
                touched.push(update);
            }
        }
        for update in touched {
            self.notify(update);
        }
    }

    // -- Optimistic reactions --

    /// Flip the current user's reaction locally and decide whether a call
    /// goes out now or waits for the one in flight.
    pub(crate) fn toggle_own_reaction(
        &mut self,
        subject: Subject,
        emoji: &str,
    ) -> Result<ReactionIntent> {
        if let Subject::Message(id) = subject {
            if id.is_temporary() {
                return Err(SyncError::UnknownSubject(subject));
            }
        }

        let me = self.me.id;
        let current = {
            let lists = self.reaction_lists(subject);
            let Some((_, first)) = lists.first() else {
                return Err(SyncError::UnknownSubject(subject));
            };
            reactions::contains(first, me, emoji)
        };
        let desired = !current;
        self.set_own_reaction(subject, emoji, desired);

        let key = ReactionKey {
            subject,
            emoji: emoji.to_string(),
        };
        match self.reactions_in_flight.get_mut(&key) {
            Some(slot) => {
                slot.queued = Some(desired);
                debug!("Queued reaction {} on {:?} -> {}", emoji, subject, desired);
                Ok(ReactionIntent::Queued(desired))
            }
            None => {
                self.reactions_in_flight.insert(
                    key,
                    ReactionSlot {
                        confirmed: current,
                        sending: desired,
                        queued: None,
                    },
                );
                Ok(ReactionIntent::Send(desired))
            }
        }
    }

    /// Record the outcome of a reaction call. Returns the next state to send
    /// if a queued toggle still differs from what the server now has.
    ///
    /// On failure the local state goes back to the last accepted one and
    /// queued toggles are dropped.
    pub(crate) fn settle_reaction(&mut self, key: &ReactionKey, ok: bool) -> Option<bool> {
        let slot = self.reactions_in_flight.get_mut(key)?;

        if ok {
            slot.confirmed = slot.sending;
            match slot.queued.take() {
                Some(next) if next != slot.confirmed => {
                    slot.sending = next;
                    return Some(next);
                }
                _ => {
                    self.reactions_in_flight.remove(key);
                    return None;
                }
            }
        }

        let confirmed = slot.confirmed;
        self.reactions_in_flight.remove(key);
        self.set_own_reaction(key.subject, &key.emoji, confirmed);
        None
    }

    // -- Optimistic sends --

    pub(crate) fn insert_pending(&mut self, message: Message) -> Result<()> {
        let id = message.thread();
        let thread = self
            .threads
            .get_mut(&id)
            .ok_or(SyncError::UnknownThread(id))?;
        thread.push_local(message);
        self.notify(StoreUpdate::Thread(id));
        Ok(())
    }

    /// Channel and post ids a `SendMessage` for `thread` must carry.
    pub(crate) fn send_target(&self, thread: ThreadId) -> Result<(ChannelId, Option<PostId>)> {
        match thread {
            ThreadId::Channel(channel_id) => Ok((channel_id, None)),
            ThreadId::Post(post_id) => self
                .threads
                .get(&thread)
                .and_then(|t| t.header())
                .map(|p| p.channel_id)
                .or_else(|| {
                    self.forums
                        .values()
                        .find(|f| f.get(post_id).is_some())
                        .map(|f| f.channel_id())
                })
                .map(|channel_id| (channel_id, Some(post_id)))
                .ok_or(SyncError::UnknownThread(thread)),
            ThreadId::Direct(_) => Err(SyncError::Unsupported(thread)),
        }
    }

    pub(crate) fn set_attachment_state(
        &mut self,
        thread: ThreadId,
        temp: MessageId,
        index: usize,
        state: UploadState,
    ) {
        let Some(attachment) = self
            .threads
            .get_mut(&thread)
            .and_then(|t| t.get_mut(temp))
            .and_then(|m| m.pending_attachments.get_mut(index))
        else {
            return;
        };
        attachment.state = state;
        self.notify(StoreUpdate::Thread(thread));
    }

    /// The send call succeeded. The temporary entry is dropped outright; the
    /// real message arrives through the push path.
    pub(crate) fn complete_send(&mut self, thread: ThreadId, temp: MessageId) {
        let removed = self
            .threads
            .get_mut(&thread)
            .and_then(|t| t.remove_local(temp));
        if removed.is_some() {
            self.notify(StoreUpdate::Thread(thread));
        }
    }

    /// The send call failed. Uploaded URLs are kept for a retry.
    pub(crate) fn fail_send(&mut self, thread: ThreadId, temp: MessageId, uploaded: Vec<String>) {
        let Some(message) = self
            .threads
            .get_mut(&thread)
            .and_then(|t| t.get_mut(temp))
        else {
            // Already superseded: the server got it after all
            return;
        };
        if !message.is_pending() {
            return;
        }
        message.state = DeliveryState::Failed;
        message.attachment_urls = uploaded;
        message.pending_attachments.clear();
        self.notify(StoreUpdate::Thread(thread));
    }

    /// Put a failed entry back to pending and return what to resend.
    pub(crate) fn begin_retry(&mut self, temp: MessageId) -> Result<RetryPlan> {
        let thread_id = self.locate(temp).ok_or(SyncError::UnknownMessage(temp))?;
        let message = self
            .threads
            .get_mut(&thread_id)
            .and_then(|t| t.get_mut(temp))
            .ok_or(SyncError::UnknownMessage(temp))?;
        if !message.is_failed() {
            return Err(SyncError::NotRetryable(temp));
        }
        message.state = DeliveryState::Pending;
        message.created_at = Utc::now();
        let plan = RetryPlan {
            thread: thread_id,
            content: message.content.clone(),
            reply_to: message.reply_to_id,
            attachment_urls: message.attachment_urls.clone(),
            client_ref: message.client_ref.clone(),
        };
        self.notify(StoreUpdate::Thread(thread_id));
        Ok(plan)
    }

    /// Drop a failed entry the user gave up on.
    pub fn discard_failed(&mut self, temp: MessageId) -> Result<()> {
        let thread_id = self.locate(temp).ok_or(SyncError::UnknownMessage(temp))?;
        let Some(thread) = self.threads.get_mut(&thread_id) else {
            return Err(SyncError::UnknownMessage(temp));
        };
        if !thread.get(temp).is_some_and(|m| m.is_failed()) {
            return Err(SyncError::NotRetryable(temp));
        }
        thread.remove_local(temp);
        self.notify(StoreUpdate::Thread(thread_id));
        Ok(())
    }

    /// Apply an edit locally. It is never rolled back.
    pub(crate) fn edit_local(&mut self, id: MessageId, content: &str) -> Result<ThreadId> {
        if id.is_temporary() {
            return Err(SyncError::UnknownMessage(id));
        }
        let thread_id = self.locate(id).ok_or(SyncError::UnknownMessage(id))?;
        let message = self
            .threads
            .get_mut(&thread_id)
            .and_then(|t| t.get_mut(id))
            .ok_or(SyncError::UnknownMessage(id))?;
        message.content = content.to_string();
        message.updated_at = Some(Utc::now());
        self.notify(StoreUpdate::Thread(thread_id));
        Ok(thread_id)
    }

    /// Thread holding message `id`, optimistic or confirmed.
    pub fn locate(&self, id: MessageId) -> Option<ThreadId> {
        self.threads
            .iter()
            .find(|(_, t)| t.get(id).is_some())
            .map(|(thread_id, _)| *thread_id)
    }

    // -- Read cursor --

    pub(crate) fn begin_ack(&mut self, thread: ThreadId, candidate: MessageId, allow_equal: bool) -> bool {
        match self.threads.get_mut(&thread) {
            Some(t) => t.cursor.begin_flush(candidate, allow_equal),
            None => false,
        }
    }

    pub(crate) fn finish_ack(&mut self, thread: ThreadId, id: MessageId, ok: bool) {
        let Some(t) = self.threads.get_mut(&thread) else {
            return;
        };
        t.cursor.finish_flush(id, ok);
        if !ok {
            return;
        }
        t.set_has_unread(false);
        if let ThreadId::Post(post_id) = thread {
            let last_read = t.cursor.last_read();
            if let Some(header) = t.header_mut() {
                header.has_unread = false;
                header.last_read_message_id = last_read;
            }
            let mut cleared = Vec::new();
            for forum in self.forums.values_mut() {
                if let Some(post) = forum.get_mut(post_id) {
                    post.has_unread = false;
                    cleared.push(forum.channel_id());
                }
            }
            for channel_id in cleared {
                self.notify(StoreUpdate::Forum(channel_id));
            }
        }
        self.notify(StoreUpdate::Cursor(thread));
    }

    pub(crate) fn claim_auto_flush(&mut self, thread: ThreadId) -> bool {
        self.threads
            .get_mut(&thread)
            .is_some_and(|t| t.cursor.claim_auto_flush())
    }

    // -- Notifications --

    fn notify(&mut self, update: StoreUpdate) {
        if !self.updates.contains(&update) {
            self.updates.push(update);
        }
    }

    pub(crate) fn drain_updates(&mut self) -> Vec<StoreUpdate> {
        std::mem::take(&mut self.updates)
    }
}
