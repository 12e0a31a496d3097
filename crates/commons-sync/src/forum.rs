use std::collections::HashMap;

use commons_types::{ChannelId, Message, MessageId, Post, PostId, UserId};

/// Post list of a forum channel, most recently active first.
#[derive(Debug, Clone)]
pub struct ForumState {
    channel_id: ChannelId,
    posts: Vec<Post>,
    /// Newest reply counted into each post's `message_count`. Replies of a
    /// post arrive in id order, so anything at or below it was seen before.
    last_counted: HashMap<PostId, MessageId>,
}

impl ForumState {
    pub fn new(channel_id: ChannelId, posts: Vec<Post>) -> Self {
        Self {
            channel_id,
            posts,
            last_counted: HashMap::new(),
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn get(&self, id: PostId) -> Option<&Post> {
        self.posts.iter().find(|p| p.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: PostId) -> Option<&mut Post> {
        self.posts.iter_mut().find(|p| p.id == id)
    }

    /// New posts go to the top. Posts are never created optimistically, so
    /// there is nothing to deduplicate against.
    pub(crate) fn prepend(&mut self, post: Post) {
        self.posts.insert(0, post);
    }

    /// Move the post a reply belongs to to the top and update its counters.
    /// Returns false if the post is not listed or the reply was seen before.
    pub(crate) fn bump(&mut self, reply: &Message, me: UserId) -> bool {
        let Some(post_id) = reply.post_id else {
            return false;
        };
        let Some(idx) = self.posts.iter().position(|p| p.id == post_id) else {
            return false;
        };
        if self.last_counted.get(&post_id).is_some_and(|&seen| reply.id <= seen) {
            return false;
        }
        self.last_counted.insert(post_id, reply.id);

        let mut post = self.posts.remove(idx);
        post.message_count += 1;
        post.last_activity_at = reply.created_at;
        if reply.user_id != me {
            post.has_unread = true;
        }
        self.posts.insert(0, post);
        true
    }

    /// Merge an edited post, keeping local counters and reactions.
    pub(crate) fn update(&mut self, updated: &Post) -> bool {
        let Some(post) = self.get_mut(updated.id) else {
            return false;
        };
        post.title = updated.title.clone();
        post.content = updated.content.clone();
        post.updated_at = updated.updated_at;
        post.attachment_urls = updated.attachment_urls.clone();
        post.is_pinned = updated.is_pinned;
        post.is_locked = updated.is_locked;
        true
    }

    pub(crate) fn remove(&mut self, id: PostId) -> bool {
        let before = self.posts.len();
        self.posts.retain(|p| p.id != id);
        self.last_counted.remove(&id);
        self.posts.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use commons_types::DeliveryState;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap_or_default()
    }

    fn post(id: PostId) -> Post {
        Post {
            id,
            channel_id: 5,
            author_id: 1,
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

    fn reply(id: i64, post_id: PostId, user_id: UserId) -> Message {
        Message {
            id: MessageId(id),
            channel_id: 5,
            post_id: Some(post_id),
            direct_peer: None,
            user_id,
            user: None,
            content: "re".into(),
            created_at: at(60),
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

    #[test]
    fn reply_bumps_post_to_top_once() {
        let mut forum = ForumState::new(5, vec![post(1), post(2), post(3)]);

        assert!(forum.bump(&reply(100, 3, 2), 1));
        assert!(!forum.bump(&reply(100, 3, 2), 1));

        let order: Vec<PostId> = forum.posts().iter().map(|p| p.id).collect();
        assert_eq!(order, vec![3, 1, 2]);
        let bumped = &forum.posts()[0];
        assert_eq!(bumped.message_count, 1);
        assert_eq!(bumped.last_activity_at, at(60));
        assert!(bumped.has_unread);
    }

    #[test]
    fn replay_of_older_reply_is_not_counted() {
        let mut forum = ForumState::new(5, vec![post(1)]);
        assert!(forum.bump(&reply(100, 1, 2), 1));
        assert!(forum.bump(&reply(101, 1, 2), 1));
        assert!(!forum.bump(&reply(100, 1, 2), 1));
        assert_eq!(forum.posts()[0].message_count, 2);
    }

    #[test]
    fn removing_a_post_forgets_its_replies() {
        let mut forum = ForumState::new(5, vec![post(1), post(2)]);
        forum.bump(&reply(100, 1, 2), 1);
        forum.bump(&reply(101, 2, 2), 1);
        assert_eq!(forum.last_counted.len(), 2);

        forum.remove(1);
        assert_eq!(forum.last_counted.len(), 1);
        assert!(!forum.last_counted.contains_key(&1));
    }

    #[test]
    fn own_reply_does_not_mark_unread() {
        let mut forum = ForumState::new(5, vec![post(1)]);
        forum.bump(&reply(100, 1, 7), 7);
        assert!(!forum.posts()[0].has_unread);
    }

    #[test]
    fn prepend_and_remove() {
        let mut forum = ForumState::new(5, vec![post(1)]);
        forum.prepend(post(2));
        assert_eq!(forum.posts()[0].id, 2);
        assert!(forum.remove(1));
        assert!(!forum.remove(1));
        assert_eq!(forum.posts().len(), 1);
    }
}
