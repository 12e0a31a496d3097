use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{DeliveryState, Message, MessageId, Post, UserId};

// -- Snapshot --

/// Authoritative state of a thread as returned by the REST API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSnapshot {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub last_read_message_id: Option<MessageId>,
    #[serde(default)]
    pub has_unread: bool,
    /// Header post, present when the thread is a forum post.
    #[serde(default)]
    pub post: Option<Post>,
}

/// Older servers answer the messages endpoint with a bare array; newer
/// ones wrap it together with the read cursor.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SnapshotPayload {
    Wrapped(ThreadSnapshot),
    Bare(Vec<Message>),
}

impl From<SnapshotPayload> for ThreadSnapshot {
    fn from(payload: SnapshotPayload) -> Self {
        match payload {
            SnapshotPayload::Wrapped(snapshot) => snapshot,
            SnapshotPayload::Bare(messages) => ThreadSnapshot {
                messages,
                ..Default::default()
            },
        }
    }
}

// -- Read cursor --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
    pub last_read_message_id: MessageId,
}

// -- Uploads --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub url: String,
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessageRequest {
    pub content: String,
}

// -- Direct messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendDirectMessageRequest {
    pub receiver_id: UserId,
    pub content: String,
}

/// Row shape of the direct-message endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessageRow {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendDirectMessageResponse {
    pub data: DirectMessageRow,
}

impl DirectMessageRow {
    /// Convert to a thread message as seen by `me`.
    pub fn into_message(self, me: UserId) -> Message {
        let peer = if self.sender_id == me {
            self.receiver_id
        } else {
            self.sender_id
        };
        Message {
            id: self.id,
            channel_id: 0,
            post_id: None,
            direct_peer: Some(peer),
            user_id: self.sender_id,
            user: None,
            content: self.content,
            created_at: self.created_at,
            updated_at: None,
            attachment_urls: Vec::new(),
            reply_to_id: None,
            reply_to_user_id: None,
            reactions: Vec::new(),
            client_ref: None,
            state: DeliveryState::Confirmed,
            pending_attachments: Vec::new(),
        }
    }
}
