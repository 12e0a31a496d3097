//! Seams to the collaborators the engine talks to. Both are passed in
//! explicitly so the engine can run against a fake in tests.

use async_trait::async_trait;

use commons_types::api::ThreadSnapshot;
use commons_types::{ChannelId, Message, MessageId, OutgoingFile, Post, PushCall, ThreadId, UserId};

use crate::error::TransportError;

/// Request-style half of the persistent push connection.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Invoke a server method and wait for its acknowledgement.
    async fn invoke(&self, call: PushCall) -> Result<(), TransportError>;
}

/// Request/response API.
#[async_trait]
pub trait RestApi: Send + Sync {
    /// `GET thread/messages`: the newest `limit` messages plus the read cursor.
    async fn fetch_snapshot(&self, thread: ThreadId, limit: u32)
    -> Result<ThreadSnapshot, TransportError>;

    /// `GET channels/{id}/posts`: the forum post list of a channel.
    async fn fetch_posts(&self, channel_id: ChannelId) -> Result<Vec<Post>, TransportError>;

    /// `POST thread/ack`
    async fn ack(&self, thread: ThreadId, last_read: MessageId) -> Result<(), TransportError>;

    /// `POST upload`, returning the public URL of the stored file.
    async fn upload(&self, file: &OutgoingFile) -> Result<String, TransportError>;

    /// `PUT message/{id}`
    async fn edit_message(&self, id: MessageId, content: &str) -> Result<(), TransportError>;

    /// `DELETE message/{id}`
    async fn delete_message(&self, id: MessageId) -> Result<(), TransportError>;

    /// Direct messages have no push path; the created message is returned.
    async fn send_direct_message(&self, peer: UserId, content: &str)
    -> Result<Message, TransportError>;
}
