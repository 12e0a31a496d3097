use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type ChannelId = i64;
pub type PostId = i64;

/// Message identity. Server ids are positive and monotonic per thread;
/// ids handed out locally for optimistic entries are negative so the two
/// ranges never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl MessageId {
    pub fn is_temporary(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An independent ordered message stream with its own read cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum ThreadId {
    Channel(ChannelId),
    Post(PostId),
    /// Direct-message conversation, keyed by the other participant.
    Direct(UserId),
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(id) => write!(f, "channel:{}", id),
            Self::Post(id) => write!(f, "post:{}", id),
            Self::Direct(id) => write!(f, "dm:{}", id),
        }
    }
}

/// Something that can carry reactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum Subject {
    Message(MessageId),
    Post(PostId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// The signed-in user, as seen by mention matching and reaction ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

/// One user's reaction on a subject. The subject is implied by whichever
/// message or post owns the list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: UserId,
    pub emoji: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryState {
    /// Shown locally, not yet confirmed by the server.
    Pending,
    #[default]
    Confirmed,
    /// The write call errored. Kept visible for retry or discard.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum UploadState {
    Pending,
    Uploading,
    Done { url: String },
    Error { reason: String },
}

/// Upload progress for a file attached to a pending message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAttachment {
    pub file_name: String,
    pub state: UploadState,
}

/// A file picked by the user, ready to upload.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    #[serde(default)]
    pub channel_id: ChannelId,
    #[serde(default)]
    pub post_id: Option<PostId>,
    /// Set only for direct messages: the other participant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_peer: Option<UserId>,
    pub user_id: UserId,
    #[serde(default)]
    pub user: Option<Author>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachment_urls: Vec<String>,
    #[serde(default)]
    pub reply_to_id: Option<MessageId>,
    /// Author of the reply target, when the server expands it.
    #[serde(default)]
    pub reply_to_user_id: Option<UserId>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    /// Correlation id echoed back by servers that support it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
    #[serde(default)]
    pub state: DeliveryState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_attachments: Vec<PendingAttachment>,
}

impl Message {
    /// The thread this message belongs to.
    pub fn thread(&self) -> ThreadId {
        if let Some(post_id) = self.post_id {
            ThreadId::Post(post_id)
        } else if let Some(peer) = self.direct_peer {
            ThreadId::Direct(peer)
        } else {
            ThreadId::Channel(self.channel_id)
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == DeliveryState::Pending
    }

    pub fn is_failed(&self) -> bool {
        self.state == DeliveryState::Failed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    #[serde(default)]
    pub author: Option<Author>,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub view_count: u32,
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default)]
    pub message_count: u32,
    #[serde(default)]
    pub attachment_urls: Vec<String>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub has_unread: bool,
    #[serde(default)]
    pub last_read_message_id: Option<MessageId>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}
