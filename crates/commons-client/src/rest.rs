use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, multipart};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use commons_sync::{RestApi, TransportError};
use commons_types::api::{
    AckRequest, DirectMessageRow, EditMessageRequest, SendDirectMessageRequest,
    SendDirectMessageResponse, SnapshotPayload, ThreadSnapshot, UploadResponse,
};
use commons_types::{ChannelId, Message, MessageId, OutgoingFile, Post, ThreadId, UserId};

use crate::error::ClientError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `reqwest` implementation of the community REST API.
pub struct HttpApi {
    client: Client,
    base: Url,
    token: String,
    me: UserId,
}

impl HttpApi {
    pub fn new(base_url: &str, token: impl Into<String>, me: UserId) -> Result<Self, ClientError> {
        // Paths are joined relative to the base, which needs a trailing slash
        let base = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base,
            token: token.into(),
            me,
        })
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        self.base
            .join(path)
            .map_err(|e| TransportError::Decode(format!("bad path {}: {}", path, e)))
    }

    fn get(&self, path: &str) -> Result<RequestBuilder, TransportError> {
        Ok(self.client.get(self.url(path)?).bearer_auth(&self.token))
    }

    fn post(&self, path: &str) -> Result<RequestBuilder, TransportError> {
        Ok(self.client.post(self.url(path)?).bearer_auth(&self.token))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            debug!("{} {}", status, response.url());
            return Err(TransportError::Http {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, TransportError> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

fn transport_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if let Some(status) = e.status() {
        TransportError::Http {
            status: status.as_u16(),
        }
    } else if e.is_decode() {
        TransportError::Decode(e.to_string())
    } else {
        TransportError::Disconnected
    }
}

#[async_trait]
impl RestApi for HttpApi {
    async fn fetch_snapshot(
        &self,
        thread: ThreadId,
        limit: u32,
    ) -> Result<ThreadSnapshot, TransportError> {
        match thread {
            ThreadId::Channel(id) => {
                let path = format!("Community/channels/{}/messages?limit={}", id, limit);
                let payload: SnapshotPayload = self.json(self.get(&path)?).await?;
                Ok(payload.into())
            }
            ThreadId::Post(id) => {
                let payload: SnapshotPayload = self
                    .json(self.get(&format!("Community/posts/{}/messages", id))?)
                    .await?;
                let mut snapshot: ThreadSnapshot = payload.into();
                if snapshot.post.is_none() {
                    let post: Post = self.json(self.get(&format!("Community/posts/{}", id))?).await?;
                    snapshot.last_read_message_id = snapshot
                        .last_read_message_id
                        .or(post.last_read_message_id);
                    snapshot.has_unread |= post.has_unread;
                    snapshot.post = Some(post);
                }
                Ok(snapshot)
            }
            ThreadId::Direct(peer) => {
                let rows: Vec<DirectMessageRow> =
                    self.json(self.get(&format!("DirectMessages/{}", peer))?).await?;
                let me = self.me;
                let has_unread = rows.iter().any(|r| r.sender_id != me && !r.is_read);
                Ok(ThreadSnapshot {
                    messages: rows.into_iter().map(|r| r.into_message(me)).collect(),
                    last_read_message_id: None,
                    has_unread,
                    post: None,
                })
            }
        }
    }

    async fn fetch_posts(&self, channel_id: ChannelId) -> Result<Vec<Post>, TransportError> {
        self.json(self.get(&format!("Community/channels/{}/posts", channel_id))?)
            .await
    }

    async fn ack(&self, thread: ThreadId, last_read: MessageId) -> Result<(), TransportError> {
        let path = match thread {
            ThreadId::Channel(id) => format!("Community/channels/{}/ack", id),
            ThreadId::Post(id) => format!("Community/posts/{}/ack", id),
            ThreadId::Direct(peer) => format!("DirectMessages/mark-read/{}", peer),
        };
        let body = AckRequest {
            last_read_message_id: last_read,
        };
        self.send(self.post(&path)?.json(&body)).await?;
        Ok(())
    }

    async fn upload(&self, file: &OutgoingFile) -> Result<String, TransportError> {
        let part = multipart::Part::bytes(file.bytes.to_vec())
            .file_name(file.file_name.clone())
            .mime_str(&file.content_type)
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        let form = multipart::Form::new().part("file", part);

        let response: UploadResponse = self
            .json(self.post("Upload/image?type=community")?.multipart(form))
            .await?;
        Ok(response.url)
    }

    async fn edit_message(&self, id: MessageId, content: &str) -> Result<(), TransportError> {
        let request = self
            .client
            .put(self.url(&format!("Community/messages/{}", id))?)
            .bearer_auth(&self.token)
            .json(&EditMessageRequest {
                content: content.to_string(),
            });
        self.send(request).await?;
        Ok(())
    }

    async fn delete_message(&self, id: MessageId) -> Result<(), TransportError> {
        let request = self
            .client
            .delete(self.url(&format!("Community/messages/{}", id))?)
            .bearer_auth(&self.token);
        self.send(request).await?;
        Ok(())
    }

    async fn send_direct_message(
        &self,
        peer: UserId,
        content: &str,
    ) -> Result<Message, TransportError> {
        let body = SendDirectMessageRequest {
            receiver_id: peer,
            content: content.to_string(),
        };
        let response: SendDirectMessageResponse =
            self.json(self.post("DirectMessages")?.json(&body)).await?;
        Ok(response.data.into_message(self.me))
    }
}
