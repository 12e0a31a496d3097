//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use commons_sync::{PushChannel, RestApi, Session, SyncConfig, TransportError};
use commons_types::api::ThreadSnapshot;
use commons_types::{
    ChannelId, CurrentUser, DeliveryState, Message, MessageId, OutgoingFile, Post, PushCall,
    ThreadId, UserId,
};

pub const ME: UserId = 1;
pub const OTHER: UserId = 2;

pub fn me() -> CurrentUser {
    CurrentUser {
        id: ME,
        username: "alice".into(),
        nickname: None,
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

pub fn message(id: i64, channel_id: ChannelId, user_id: UserId, content: &str) -> Message {
    Message {
        id: MessageId(id),
        channel_id,
        post_id: None,
        direct_peer: None,
        user_id,
        user: None,
        content: content.into(),
        created_at: Utc::now(),
        updated_at: None,
        attachment_urls: vec![],
        reply_to_id: None,
        reply_to_user_id: None,
        reactions: vec![],
        client_ref: None,
        state: DeliveryState::Confirmed,
        pending_attachments: vec![],
    }
}

pub fn post(id: i64, channel_id: ChannelId) -> Post {
    Post {
        id,
        channel_id,
        author_id: OTHER,
        author: None,
        title: format!("post {}", id),
        content: String::new(),
        created_at: at(0),
        updated_at: None,
        last_activity_at: at(0),
        view_count: 0,
        reply_count: 0,
        message_count: 0,
        attachment_urls: vec![],
        is_pinned: false,
        is_locked: false,
        has_unread: false,
        last_read_message_id: None,
        reactions: vec![],
    }
}

pub fn file(name: &str) -> OutgoingFile {
    OutgoingFile {
        file_name: name.into(),
        content_type: "image/png".into(),
        bytes: bytes::Bytes::from_static(b"\x89PNG"),
    }
}

/// Fake REST API and push channel in one. Records every call; push calls
/// can be held in flight behind a gate.
pub struct FakeTransport {
    pub calls: Mutex<Vec<PushCall>>,
    pub acks: Mutex<Vec<(ThreadId, MessageId)>>,
    pub edits: Mutex<Vec<(MessageId, String)>>,
    pub deletes: Mutex<Vec<MessageId>>,
    pub uploads: Mutex<Vec<String>>,
    pub snapshots: Mutex<HashMap<ThreadId, ThreadSnapshot>>,
    pub posts: Mutex<HashMap<ChannelId, Vec<Post>>>,
    pub failing_uploads: Mutex<HashSet<String>>,
    pub fail_push: AtomicBool,
    pub fail_acks: AtomicBool,
    pub fail_edits: AtomicBool,
    pub edit_delay: Mutex<Option<Duration>>,
    gated: AtomicBool,
    gate: Semaphore,
    snapshot_fetches: AtomicUsize,
    snapshots_held: AtomicBool,
    snapshot_gate: Semaphore,
    next_id: Mutex<i64>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            acks: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            snapshots: Mutex::new(HashMap::new()),
            posts: Mutex::new(HashMap::new()),
            failing_uploads: Mutex::new(HashSet::new()),
            fail_push: AtomicBool::new(false),
            fail_acks: AtomicBool::new(false),
            fail_edits: AtomicBool::new(false),
            edit_delay: Mutex::new(None),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            snapshot_fetches: AtomicUsize::new(0),
            snapshots_held: AtomicBool::new(false),
            snapshot_gate: Semaphore::new(0),
            next_id: Mutex::new(1000),
        })
    }

    pub fn session(self: &Arc<Self>) -> Session {
        self.session_with(SyncConfig::default())
    }

    pub fn session_with(self: &Arc<Self>, config: SyncConfig) -> Session {
        Session::new(me(), self.clone(), self.clone(), config)
    }

    pub fn set_snapshot(&self, thread: ThreadId, snapshot: ThreadSnapshot) {
        self.snapshots.lock().unwrap().insert(thread, snapshot);
    }

    pub fn calls(&self) -> Vec<PushCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Push calls other than channel joins and leaves.
    pub fn writes(&self) -> Vec<PushCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, PushCall::JoinChannel { .. } | PushCall::LeaveChannel { .. }))
            .collect()
    }

    pub fn acked(&self) -> Vec<i64> {
        self.acks.lock().unwrap().iter().map(|(_, id)| id.0).collect()
    }

    /// Hold every following push call until released.
    pub fn hold(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Hold every following snapshot fetch until released.
    pub fn hold_snapshots(&self) {
        self.snapshots_held.store(true, Ordering::SeqCst);
    }

    pub fn release_snapshot(&self) {
        self.snapshot_gate.add_permits(1);
    }

    pub async fn wait_for_fetches(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.snapshot_fetches.load(Ordering::SeqCst) < n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("snapshot fetches never arrived");
    }

    pub async fn wait_for_writes(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.writes().len() < n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("push calls never arrived");
    }
}

#[async_trait]
impl PushChannel for FakeTransport {
    async fn invoke(&self, call: PushCall) -> Result<(), TransportError> {
        let is_write = !matches!(call, PushCall::JoinChannel { .. } | PushCall::LeaveChannel { .. });
        self.calls.lock().unwrap().push(call);
        if is_write && self.gated.load(Ordering::SeqCst) {
            self.gate.acquire().await.unwrap().forget();
        }
        if is_write && self.fail_push.load(Ordering::SeqCst) {
            return Err(TransportError::Timeout);
        }
        Ok(())
    }
}

#[async_trait]
impl RestApi for FakeTransport {
    async fn fetch_snapshot(
        &self,
        thread: ThreadId,
        _limit: u32,
    ) -> Result<ThreadSnapshot, TransportError> {
        // Taken before any hold, like a server answering at request time
        let snapshot = self
            .snapshots
            .lock()
            .unwrap()
            .get(&thread)
            .cloned()
            .unwrap_or_default();
        self.snapshot_fetches.fetch_add(1, Ordering::SeqCst);
        if self.snapshots_held.load(Ordering::SeqCst) {
            self.snapshot_gate.acquire().await.unwrap().forget();
        }
        Ok(snapshot)
    }

    async fn fetch_posts(&self, channel_id: ChannelId) -> Result<Vec<Post>, TransportError> {
        Ok(self
            .posts
            .lock()
            .unwrap()
            .get(&channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn ack(&self, thread: ThreadId, last_read: MessageId) -> Result<(), TransportError> {
        self.acks.lock().unwrap().push((thread, last_read));
        if self.fail_acks.load(Ordering::SeqCst) {
            return Err(TransportError::Http { status: 503 });
        }
        Ok(())
    }

    async fn upload(&self, file: &OutgoingFile) -> Result<String, TransportError> {
        self.uploads.lock().unwrap().push(file.file_name.clone());
        if self.failing_uploads.lock().unwrap().contains(&file.file_name) {
            return Err(TransportError::Http { status: 413 });
        }
        Ok(format!("https://cdn.test/{}", file.file_name))
    }

    async fn edit_message(&self, id: MessageId, content: &str) -> Result<(), TransportError> {
        let delay = *self.edit_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.edits.lock().unwrap().push((id, content.to_string()));
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(TransportError::Http { status: 500 });
        }
        Ok(())
    }

    async fn delete_message(&self, id: MessageId) -> Result<(), TransportError> {
        self.deletes.lock().unwrap().push(id);
        Ok(())
    }

    async fn send_direct_message(
        &self,
        peer: UserId,
        content: &str,
    ) -> Result<Message, TransportError> {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        let mut sent = message(id, 0, ME, content);
        sent.direct_peer = Some(peer);
        Ok(sent)
    }
}
