use serde::{Deserialize, Serialize};

use crate::models::{ChannelId, Message, MessageId, Post, PostId, Subject, UserId};

/// Events pushed by the server to every participant of a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PushEvent {
    /// A message was posted to a channel, a forum post, or a DM conversation
    ReceiveMessage(Message),

    /// An existing message was edited
    MessageUpdated(Message),

    /// A message was removed
    MessageDeleted(MessageId),

    /// A new forum post was opened
    PostCreated(Post),

    /// A forum post's title or body changed
    PostUpdated(Post),

    /// A forum post was removed together with its replies
    PostDeleted(PostId),

    MessageReactionAdded(MessageReaction),
    MessageReactionRemoved(MessageReaction),
    PostReactionAdded(PostReaction),
    PostReactionRemoved(PostReaction),
}

impl PushEvent {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReceiveMessage(_) => "ReceiveMessage",
            Self::MessageUpdated(_) => "MessageUpdated",
            Self::MessageDeleted(_) => "MessageDeleted",
            Self::PostCreated(_) => "PostCreated",
            Self::PostUpdated(_) => "PostUpdated",
            Self::PostDeleted(_) => "PostDeleted",
            Self::MessageReactionAdded(_) => "MessageReactionAdded",
            Self::MessageReactionRemoved(_) => "MessageReactionRemoved",
            Self::PostReactionAdded(_) => "PostReactionAdded",
            Self::PostReactionRemoved(_) => "PostReactionRemoved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReaction {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostReaction {
    pub post_id: PostId,
    pub user_id: UserId,
    pub emoji: String,
}

/// Request-style methods invoked on the push channel. Each one is awaited
/// until the server acknowledges or rejects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args")]
pub enum PushCall {
    JoinChannel {
        channel_id: ChannelId,
    },

    LeaveChannel {
        channel_id: ChannelId,
    },

    SendMessage {
        channel_id: ChannelId,
        content: String,
        reply_to_id: Option<MessageId>,
        /// JSON array of uploaded attachment URLs, or `None` when there are none.
        attachment_urls: Option<String>,
        post_id: Option<PostId>,
        client_ref: Option<String>,
    },

    AddReaction {
        message_id: MessageId,
        emoji: String,
    },

    RemoveReaction {
        message_id: MessageId,
        emoji: String,
    },

    AddPostReaction {
        post_id: PostId,
        emoji: String,
    },

    RemovePostReaction {
        post_id: PostId,
        emoji: String,
    },
}

impl PushCall {
    /// The add or remove call that moves `subject` to the wanted state.
    pub fn reaction(subject: Subject, emoji: &str, add: bool) -> Self {
        let emoji = emoji.to_string();
        match (subject, add) {
            (Subject::Message(message_id), true) => Self::AddReaction { message_id, emoji },
            (Subject::Message(message_id), false) => Self::RemoveReaction { message_id, emoji },
            (Subject::Post(post_id), true) => Self::AddPostReaction { post_id, emoji },
            (Subject::Post(post_id), false) => Self::RemovePostReaction { post_id, emoji },
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::JoinChannel { .. } => "JoinChannel",
            Self::LeaveChannel { .. } => "LeaveChannel",
            Self::SendMessage { .. } => "SendMessage",
            Self::AddReaction { .. } => "AddReaction",
            Self::RemoveReaction { .. } => "RemoveReaction",
            Self::AddPostReaction { .. } => "AddPostReaction",
            Self::RemovePostReaction { .. } => "RemovePostReaction",
        }
    }
}

/// Frames sent FROM client TO server over the push socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Authenticate the socket
    Identify { token: String },

    /// Invoke a server method; answered by a `Completion` with the same id
    Invoke {
        invocation_id: u64,
        call: PushCall,
    },
}

/// Frames sent FROM server TO client over the push socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    /// Server accepted the Identify token
    Ready { user_id: UserId },

    /// A broadcast event
    Event { event: PushEvent },

    /// Outcome of an `Invoke`. `error` is set when the server rejected it.
    Completion {
        invocation_id: u64,
        #[serde(default)]
        error: Option<String>,
    },
}
