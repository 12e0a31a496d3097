pub mod api;
pub mod events;
pub mod models;

pub use events::{PushCall, PushEvent};
pub use models::{
    Author, ChannelId, CurrentUser, DeliveryState, Message, MessageId, OutgoingFile,
    PendingAttachment, Post, PostId, Reaction, Role, Subject, ThreadId, UploadState, UserId,
};
