use chrono::TimeDelta;

use commons_types::api::ThreadSnapshot;
use commons_types::{DeliveryState, Message, MessageId, Post, ThreadId};

use crate::cursor::ReadCursor;
use crate::snapshot::normalize;

/// Lifecycle of a thread inside the reconciler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThreadPhase {
    /// Not shown; push events for it are ignored.
    #[default]
    Idle,
    /// Snapshot applied, push subscription not yet active.
    Loaded,
    /// Subscribed; push events are merged.
    Live,
}

/// Outcome of merging a server-confirmed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Merge {
    /// The id was already present.
    Duplicate,
    Inserted {
        /// Optimistic entry that this message replaced, if any.
        superseded: Option<MessageId>,
    },
}

/// Canonical client-side view of one thread.
///
/// Confirmed messages are kept sorted by server id. Optimistic entries
/// (pending or failed) live in a separate list in submit order and always
/// render after the confirmed ones.
#[derive(Debug, Clone)]
pub struct ThreadState {
    id: ThreadId,
    phase: ThreadPhase,
    confirmed: Vec<Message>,
    local: Vec<Message>,
    header: Option<Post>,
    has_unread: bool,
    pub(crate) cursor: ReadCursor,
}

impl ThreadState {
    pub fn new(id: ThreadId) -> Self {
        Self {
            id,
            phase: ThreadPhase::Idle,
            confirmed: Vec::new(),
            local: Vec::new(),
            header: None,
            has_unread: false,
            cursor: ReadCursor::default(),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn phase(&self) -> ThreadPhase {
        self.phase
    }

    pub fn has_unread(&self) -> bool {
        self.has_unread
    }

    pub fn cursor(&self) -> &ReadCursor {
        &self.cursor
    }

    /// The forum post heading this thread, for post threads.
    pub fn header(&self) -> Option<&Post> {
        self.header.as_ref()
    }

    /// Render order: confirmed by id, then optimistic entries.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.confirmed.iter().chain(self.local.iter())
    }

    pub fn len(&self) -> usize {
        self.confirmed.len() + self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn newest_confirmed_id(&self) -> Option<MessageId> {
        self.confirmed.last().map(|m| m.id)
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        if id.is_temporary() {
            self.local.iter().find(|m| m.id == id)
        } else {
            self.confirmed
                .binary_search_by_key(&id, |m| m.id)
                .ok()
                .map(|idx| &self.confirmed[idx])
        }
    }

    pub(crate) fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        if id.is_temporary() {
            self.local.iter_mut().find(|m| m.id == id)
        } else {
            match self.confirmed.binary_search_by_key(&id, |m| m.id) {
                Ok(idx) => Some(&mut self.confirmed[idx]),
                Err(_) => None,
            }
        }
    }

    pub(crate) fn set_phase(&mut self, phase: ThreadPhase) {
        self.phase = phase;
    }

    pub(crate) fn header_mut(&mut self) -> Option<&mut Post> {
        self.header.as_mut()
    }

    pub(crate) fn set_has_unread(&mut self, has_unread: bool) {
        self.has_unread = has_unread;
    }

    /// Load a fresh snapshot.
    ///
    /// A thread that is not live takes the snapshot as is. A live thread
    /// kept merging push events while the snapshot was fetched, so its
    /// confirmed messages outside the snapshot's id range are kept.
    ///
    /// Pending entries created before the snapshot's newest message are
    /// dropped: the snapshot already holds whatever became of them. Failed
    /// entries are kept for the user to retry or discard. Returns how many
    /// pending entries were dropped.
    pub(crate) fn load_snapshot(&mut self, snapshot: ThreadSnapshot) -> usize {
        let ThreadSnapshot {
            mut messages,
            last_read_message_id,
            has_unread,
            post,
        } = normalize(self.id, snapshot);

        let newest_at = messages.iter().map(|m| m.created_at).max();
        let before = self.local.len();
        self.local.retain(|m| match newest_at {
            Some(newest) => m.is_failed() || m.created_at > newest,
            None => true,
        });

        if self.phase == ThreadPhase::Live {
            let covered = messages.first().zip(messages.last()).map(|(o, n)| (o.id, n.id));
            let outside = std::mem::take(&mut self.confirmed)
                .into_iter()
                .filter(|m| match covered {
                    Some((oldest, newest)) => m.id < oldest || m.id > newest,
                    None => true,
                });
            messages.extend(outside);
            messages.sort_by_key(|m| m.id);
        }

        self.confirmed = messages;
        self.cursor.observe_server(last_read_message_id);
        self.cursor.reset_auto_flush();
        self.has_unread = has_unread;
        if post.is_some() {
            self.header = post;
        }
        if self.phase == ThreadPhase::Idle {
            self.phase = ThreadPhase::Loaded;
        }

        before - self.local.len()
    }

    /// Merge a server-confirmed message, superseding the optimistic entry it
    /// confirms.
    ///
    /// An echoed correlation id is matched exactly and may also clear a
    /// failed entry (the server got it even though the call errored). Without
    /// one, the oldest pending entry by the same author with identical
    /// content inside `window` is taken, so identical texts sent in a row
    /// are consumed one for one.
    pub(crate) fn merge_confirmed(&mut self, mut message: Message, window: TimeDelta) -> Merge {
        let pos = match self.confirmed.binary_search_by_key(&message.id, |m| m.id) {
            Ok(_) => return Merge::Duplicate,
            Err(pos) => pos,
        };

        let superseded = match message.client_ref.as_deref() {
            Some(client_ref) => self
                .local
                .iter()
                .position(|m| m.client_ref.as_deref() == Some(client_ref)),
            None => self.local.iter().position(|m| {
                m.is_pending()
                    && m.user_id == message.user_id
                    && m.content == message.content
                    && (message.created_at - m.created_at).abs() <= window
            }),
        }
        .map(|idx| self.local.remove(idx).id);

        message.state = DeliveryState::Confirmed;
        message.pending_attachments.clear();
        self.confirmed.insert(pos, message);

        Merge::Inserted { superseded }
    }

    pub(crate) fn push_local(&mut self, message: Message) {
        self.local.push(message);
    }

    pub(crate) fn remove_local(&mut self, id: MessageId) -> Option<Message> {
        let idx = self.local.iter().position(|m| m.id == id)?;
        Some(self.local.remove(idx))
    }

    pub(crate) fn remove_confirmed(&mut self, id: MessageId) -> Option<Message> {
        let idx = self.confirmed.binary_search_by_key(&id, |m| m.id).ok()?;
        Some(self.confirmed.remove(idx))
    }
}
