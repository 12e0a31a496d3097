//! Push events, snapshots and the polling fallback flowing through a
//! session against the in-memory transport.

mod common;

use std::time::Duration;

use commons_sync::{poller, Draft, SnapshotLoader, StoreUpdate, SyncConfig};
use commons_types::api::ThreadSnapshot;
use commons_types::events::PostReaction;
use commons_types::{MessageId, PushEvent, Subject, ThreadId};

use common::{message, post, FakeTransport, ME, OTHER};

const CHANNEL: ThreadId = ThreadId::Channel(1);

fn ids(messages: &[commons_types::Message]) -> Vec<i64> {
    messages.iter().map(|m| m.id.0).collect()
}

#[tokio::test]
async fn repeated_delivery_keeps_one_entry_per_id() {
    let fake = FakeTransport::new();
    fake.set_snapshot(
        CHANNEL,
        ThreadSnapshot {
            messages: vec![message(4, 1, OTHER, "seed")],
            ..Default::default()
        },
    );
    let session = fake.session();
    session.enter_thread(CHANNEL).await.unwrap();

    let store = session.store();
    for id in [5, 4, 5, 6, 5, 6] {
        store
            .apply(PushEvent::ReceiveMessage(message(id, 1, OTHER, "x")))
            .unwrap();
    }

    assert_eq!(ids(&store.messages(CHANNEL).unwrap()), vec![4, 5, 6]);
}

#[tokio::test]
async fn out_of_order_delivery_is_sorted_by_id() {
    let fake = FakeTransport::new();
    let session = fake.session();
    session.enter_thread(CHANNEL).await.unwrap();

    for id in [9, 7, 8] {
        session
            .store()
            .apply(PushEvent::ReceiveMessage(message(id, 1, OTHER, "x")))
            .unwrap();
    }
    assert_eq!(ids(&session.store().messages(CHANNEL).unwrap()), vec![7, 8, 9]);
}

#[tokio::test]
async fn entering_subscribes_and_leaving_stops_merging() {
    let fake = FakeTransport::new();
    let session = fake.session();
    session.enter_thread(CHANNEL).await.unwrap();
    session.leave_thread(CHANNEL).await.unwrap();

    let changed = session
        .store()
        .apply(PushEvent::ReceiveMessage(message(3, 1, OTHER, "late")))
        .unwrap();
    assert!(!changed);
    assert!(session.store().messages(CHANNEL).unwrap().is_empty());

    let calls = fake.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].method(), "JoinChannel");
    assert_eq!(calls[1].method(), "LeaveChannel");
}

#[tokio::test]
async fn subscribers_are_told_what_changed() {
    let fake = FakeTransport::new();
    let session = fake.session();
    session.enter_thread(CHANNEL).await.unwrap();

    let mut updates = session.store().subscribe();
    session
        .store()
        .apply(PushEvent::ReceiveMessage(message(1, 1, OTHER, "hello")))
        .unwrap();

    assert_eq!(updates.try_recv().unwrap(), StoreUpdate::Thread(CHANNEL));
    assert!(updates.try_recv().is_err());
}

#[tokio::test]
async fn reply_bumps_post_to_top_of_forum() {
    let fake = FakeTransport::new();
    fake.posts
        .lock()
        .unwrap()
        .insert(3, vec![post(10, 3), post(11, 3), post(12, 3)]);
    let session = fake.session();
    session.open_forum(3).await.unwrap();

    let mut reply = message(500, 3, OTHER, "first!");
    reply.post_id = Some(12);
    session.store().apply(PushEvent::ReceiveMessage(reply.clone())).unwrap();
    session.store().apply(PushEvent::ReceiveMessage(reply)).unwrap();

    let posts = session.store().posts(3).unwrap();
    let order: Vec<i64> = posts.iter().map(|p| p.id).collect();
    assert_eq!(order, vec![12, 10, 11]);
    assert_eq!(posts[0].message_count, 1);
    assert!(posts[0].has_unread);
}

#[tokio::test]
async fn post_lifecycle_events() {
    let fake = FakeTransport::new();
    fake.posts.lock().unwrap().insert(3, vec![post(10, 3)]);
    let session = fake.session();
    session.open_forum(3).await.unwrap();
    let store = session.store();

    store.apply(PushEvent::PostCreated(post(11, 3))).unwrap();
    assert_eq!(store.posts(3).unwrap()[0].id, 11);

    let mut edited = post(10, 3);
    edited.title = "renamed".into();
    store.apply(PushEvent::PostUpdated(edited)).unwrap();
    assert_eq!(store.posts(3).unwrap()[1].title, "renamed");

    store
        .apply(PushEvent::PostReactionAdded(PostReaction {
            post_id: 10,
            user_id: OTHER,
            emoji: "🔥".into(),
        }))
        .unwrap();
    let groups = store.reaction_groups(Subject::Post(10)).unwrap();
    assert_eq!(groups[0].count, 1);

    store.apply(PushEvent::PostDeleted(10)).unwrap();
    let order: Vec<i64> = store.posts(3).unwrap().iter().map(|p| p.id).collect();
    assert_eq!(order, vec![11]);
}

#[tokio::test]
async fn post_thread_sends_on_its_forum_channel() {
    let fake = FakeTransport::new();
    fake.posts.lock().unwrap().insert(3, vec![post(10, 3)]);
    let session = fake.session();
    session.open_forum(3).await.unwrap();
    session.enter_thread(ThreadId::Post(10)).await.unwrap();

    let mut reply = message(40, 3, OTHER, "reply");
    reply.post_id = Some(10);
    session.store().apply(PushEvent::ReceiveMessage(reply)).unwrap();
    assert_eq!(
        ids(&session.store().messages(ThreadId::Post(10)).unwrap()),
        vec![40]
    );
}

#[tokio::test]
async fn polling_feeds_the_receive_path() {
    let peer = ThreadId::Direct(OTHER);
    let fake = FakeTransport::new();
    fake.set_snapshot(
        peer,
        ThreadSnapshot {
            messages: vec![message(1, 0, OTHER, "hey")],
            ..Default::default()
        },
    );
    let session = fake.session_with(SyncConfig {
        poll_interval: Duration::from_secs(3600),
        ..SyncConfig::default()
    });
    session.enter_thread(peer).await.unwrap();

    fake.set_snapshot(
        peer,
        ThreadSnapshot {
            messages: vec![message(1, 0, OTHER, "hey"), message(2, 0, ME, "hi")],
            ..Default::default()
        },
    );
    let loader = SnapshotLoader::new(fake.clone(), 50);
    let added = poller::poll_once(session.store(), &loader, peer).await.unwrap();
    assert_eq!(added, 1);
    let again = poller::poll_once(session.store(), &loader, peer).await.unwrap();
    assert_eq!(again, 0);

    assert_eq!(ids(&session.store().messages(peer).unwrap()), vec![1, 2]);
}

#[tokio::test]
async fn background_poller_picks_up_new_messages() {
    let peer = ThreadId::Direct(OTHER);
    let fake = FakeTransport::new();
    let session = fake.session_with(SyncConfig {
        poll_interval: Duration::from_millis(10),
        ..SyncConfig::default()
    });
    session.enter_thread(peer).await.unwrap();

    fake.set_snapshot(
        peer,
        ThreadSnapshot {
            messages: vec![message(7, 0, OTHER, "ping")],
            ..Default::default()
        },
    );

    tokio::time::timeout(Duration::from_secs(5), async {
        while session.store().messages(peer).unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("poller never delivered");

    session.leave_thread(peer).await.unwrap();
}

#[tokio::test]
async fn deleted_message_disappears_everywhere() {
    let fake = FakeTransport::new();
    fake.set_snapshot(
        CHANNEL,
        ThreadSnapshot {
            messages: vec![message(1, 1, OTHER, "a"), message(2, 1, OTHER, "b")],
            ..Default::default()
        },
    );
    let session = fake.session();
    session.enter_thread(CHANNEL).await.unwrap();

    session
        .store()
        .apply(PushEvent::MessageDeleted(MessageId(1)))
        .unwrap();
    assert_eq!(ids(&session.store().messages(CHANNEL).unwrap()), vec![2]);
}

#[tokio::test]
async fn reentering_live_thread_keeps_messages_merged_during_fetch() {
    let fake = FakeTransport::new();
    fake.set_snapshot(
        CHANNEL,
        ThreadSnapshot {
            messages: vec![message(10, 1, OTHER, "seed")],
            ..Default::default()
        },
    );
    let session = fake.session();
    session.enter_thread(CHANNEL).await.unwrap();

    fake.hold();
    let outbox = session.outbox().clone();
    let send = tokio::spawn(async move { outbox.send_message(Draft::text(CHANNEL, "hi")).await });
    fake.wait_for_writes(1).await;

    // The echo of our send lands while the second snapshot is on the wire
    fake.hold_snapshots();
    let store = session.store().clone();
    let (entered, ()) = tokio::join!(session.enter_thread(CHANNEL), async {
        fake.wait_for_fetches(2).await;
        store
            .apply(PushEvent::ReceiveMessage(message(11, 1, ME, "hi")))
            .unwrap();
        fake.release_snapshot();
    });
    entered.unwrap();

    fake.release(1);
    send.await.unwrap().unwrap();

    let shown = session.store().messages(CHANNEL).unwrap();
    assert_eq!(ids(&shown), vec![10, 11]);
    assert_eq!(shown.iter().filter(|m| m.content == "hi").count(), 1);
}
