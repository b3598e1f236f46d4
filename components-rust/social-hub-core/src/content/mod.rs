use crate::badge::{BadgeCategory, BadgesAgentClient};
use crate::common::error::Error;
use crate::common::{pagination, LikeTarget, Privacy};
use crate::media::{upload_image, ImageUpload};
use crate::notification::{
    send_notification, NewNotification, NotificationKind, NotificationsAgentClient,
};
use crate::presence::PresenceAgentClient;
use crate::realtime::RealtimeEvent;
use crate::user::{FriendshipStatus, UserAgentClient, UserDirectoryAgentClient, UserSummary};
use crate::user_posts::{PostRef, UserPostsAgentClient};
use crate::user_timeline::{FeedEntry, PublicEntry, PublicTimelineAgentClient, UserTimelineAgentClient};
use crate::visibility::{can_view, CommentView, ReplyView};
use golem_rust::{agent_definition, agent_implementation, Schema};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Schema, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    Post,
    /// Repost of the given original post.
    Repost(String),
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct Comment {
    pub comment_id: String,
    pub text: String,
    pub image_url: Option<String>,
    pub likes: HashSet<String>,
    pub likes_count: u32,
    pub reply_count: u32,
    pub pinned: bool,
    pub edited: bool,
    pub created_by: String,
    pub sequence: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct Reply {
    pub reply_id: String,
    pub comment_id: String,
    pub text: String,
    pub image_url: Option<String>,
    pub likes: HashSet<String>,
    pub likes_count: u32,
    pub edited: bool,
    pub created_by: String,
    pub sequence: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Post or repost root, owning its comments and replies.
#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct Content {
    pub content_id: String,
    pub kind: ContentKind,
    pub owner_id: String,
    pub text: String,
    pub image_url: Option<String>,
    pub privacy: Privacy,
    pub pinned: bool,
    pub edited: bool,
    pub likes: HashSet<String>,
    pub likes_count: u32,
    pub comment_count: u32,
    pub share_count: u32,
    pub comments: HashMap<String, Comment>,
    pub replies: HashMap<String, Reply>,
    /// Receivers of notifications linked to this root.
    pub notified_users: HashSet<String>,
    pub next_sequence: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LikeToggled {
    pub target: LikeTarget,
    pub liked: bool,
    pub likes_count: u32,
    pub target_owner: String,
}

/// Short description of a root item used by indexes and push events.
#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentAlert {
    pub content_id: String,
    pub owner_id: String,
    pub kind: ContentKind,
    pub privacy: Privacy,
    pub text: String,
    pub image_url: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl ContentAlert {
    pub fn feed_entry(&self) -> FeedEntry {
        FeedEntry {
            content_id: self.content_id.clone(),
            owner_id: self.owner_id.clone(),
            created_at: self.created_at,
            sequence: 0,
        }
    }

    pub fn public_entry(&self) -> PublicEntry {
        PublicEntry {
            entry: self.feed_entry(),
            text: self.text.clone(),
        }
    }
}

pub(crate) fn validate_text(text: &str, has_image: bool, max_length: usize, what: &str) -> Result<String, Error> {
    let text = text.trim();

    if text.is_empty() && !has_image {
        return Err(Error::validation(format!("{what} must have text or an image")));
    }
    if text.chars().count() > max_length {
        return Err(Error::validation(format!(
            "{what} is longer than {max_length} characters"
        )));
    }

    Ok(text.to_string())
}

fn flip_like(likes: &mut HashSet<String>, likes_count: &mut u32, actor: &str) -> bool {
    if likes.remove(actor) {
        *likes_count = likes_count.saturating_sub(1);
        false
    } else {
        likes.insert(actor.to_string());
        *likes_count += 1;
        true
    }
}

fn sorted_likers(likes: &HashSet<String>) -> Vec<String> {
    let mut likers: Vec<String> = likes.iter().cloned().collect();
    likers.sort();
    likers
}

impl Content {
    fn new(
        content_id: String,
        kind: ContentKind,
        owner_id: String,
        text: String,
        image_url: Option<String>,
        privacy: Privacy,
    ) -> Self {
        let now = chrono::Utc::now();
        Content {
            content_id,
            kind,
            owner_id,
            text,
            image_url,
            privacy,
            pinned: false,
            edited: false,
            likes: HashSet::new(),
            likes_count: 0,
            comment_count: 0,
            share_count: 0,
            comments: HashMap::new(),
            replies: HashMap::new(),
            notified_users: HashSet::new(),
            next_sequence: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new_post(
        content_id: String,
        owner_id: String,
        text: String,
        image_url: Option<String>,
        privacy: Privacy,
    ) -> Result<Self, Error> {
        let text = validate_text(
            &text,
            image_url.is_some(),
            crate::config::get().max_post_length,
            "Post",
        )?;

        Ok(Content::new(
            content_id,
            ContentKind::Post,
            owner_id,
            text,
            image_url,
            privacy,
        ))
    }

    /// Repost text is optional.
    pub fn new_repost(
        content_id: String,
        owner_id: String,
        original_id: String,
        text: String,
        privacy: Privacy,
    ) -> Result<Self, Error> {
        let text = text.trim().to_string();
        if text.chars().count() > crate::config::get().max_post_length {
            return Err(Error::validation("Repost text is too long"));
        }

        Ok(Content::new(
            content_id,
            ContentKind::Repost(original_id),
            owner_id,
            text,
            None,
            privacy,
        ))
    }

    pub fn like_target(&self) -> LikeTarget {
        match self.kind {
            ContentKind::Post => LikeTarget::Post(self.content_id.clone()),
            ContentKind::Repost(_) => LikeTarget::Repost(self.content_id.clone()),
        }
    }

    pub fn original_id(&self) -> Option<&str> {
        match &self.kind {
            ContentKind::Post => None,
            ContentKind::Repost(original_id) => Some(original_id),
        }
    }

    pub fn alert(&self) -> ContentAlert {
        ContentAlert {
            content_id: self.content_id.clone(),
            owner_id: self.owner_id.clone(),
            kind: self.kind.clone(),
            privacy: self.privacy,
            text: self.text.clone(),
            image_url: self.image_url.clone(),
            created_at: self.created_at,
        }
    }

    pub fn post_ref(&self) -> PostRef {
        PostRef {
            content_id: self.content_id.clone(),
            kind: self.kind.clone(),
            privacy: self.privacy,
            pinned: self.pinned,
            created_at: self.created_at,
            sequence: 0,
        }
    }

    fn ensure_owner(&self, actor: &str) -> Result<(), Error> {
        if self.owner_id == actor {
            Ok(())
        } else {
            Err(Error::forbidden("Only the owner can modify this content"))
        }
    }

    fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    fn edit(&mut self, actor: &str, text: String) -> Result<(), Error> {
        self.ensure_owner(actor)?;
        let text = match self.kind {
            ContentKind::Post => validate_text(
                &text,
                self.image_url.is_some(),
                crate::config::get().max_post_length,
                "Post",
            )?,
            ContentKind::Repost(_) => validate_text(
                &text,
                true,
                crate::config::get().max_post_length,
                "Repost",
            )?,
        };

        self.text = text;
        self.edited = true;
        self.updated_at = chrono::Utc::now();
        Ok(())
    }

    fn set_privacy(&mut self, actor: &str, privacy: Privacy) -> Result<(), Error> {
        self.ensure_owner(actor)?;
        self.privacy = privacy;
        self.updated_at = chrono::Utc::now();
        Ok(())
    }

    fn toggle_pin(&mut self, actor: &str) -> Result<bool, Error> {
        self.ensure_owner(actor)?;
        self.pinned = !self.pinned;
        self.updated_at = chrono::Utc::now();
        Ok(self.pinned)
    }

    /// Flips the like of `actor` on `target`; the counter moves by exactly one.
    pub fn toggle_like(&mut self, actor: &str, target: &LikeTarget) -> Result<LikeToggled, Error> {
        let (likes, likes_count, target_owner) = match target {
            LikeTarget::Post(id) | LikeTarget::Repost(id) => {
                if *target != self.like_target() || *id != self.content_id {
                    return Err(Error::not_found(format!("Like target not found: {target}")));
                }
                (
                    &mut self.likes,
                    &mut self.likes_count,
                    self.owner_id.clone(),
                )
            }
            LikeTarget::Comment(id) => {
                let comment = self
                    .comments
                    .get_mut(id)
                    .ok_or(Error::not_found(format!("Comment not found: {id}")))?;
                (
                    &mut comment.likes,
                    &mut comment.likes_count,
                    comment.created_by.clone(),
                )
            }
            LikeTarget::Reply(id) => {
                let reply = self
                    .replies
                    .get_mut(id)
                    .ok_or(Error::not_found(format!("Reply not found: {id}")))?;
                (
                    &mut reply.likes,
                    &mut reply.likes_count,
                    reply.created_by.clone(),
                )
            }
        };

        let liked = flip_like(likes, likes_count, actor);
        let likes_count = *likes_count;
        self.updated_at = chrono::Utc::now();

        Ok(LikeToggled {
            target: target.clone(),
            liked,
            likes_count,
            target_owner,
        })
    }

    pub fn likers(&self, target: &LikeTarget) -> Result<Vec<String>, Error> {
        match target {
            LikeTarget::Post(id) | LikeTarget::Repost(id) => {
                if *target != self.like_target() || *id != self.content_id {
                    Err(Error::not_found(format!("Like target not found: {target}")))
                } else {
                    Ok(sorted_likers(&self.likes))
                }
            }
            LikeTarget::Comment(id) => self
                .comments
                .get(id)
                .map(|c| sorted_likers(&c.likes))
                .ok_or(Error::not_found(format!("Comment not found: {id}"))),
            LikeTarget::Reply(id) => self
                .replies
                .get(id)
                .map(|r| sorted_likers(&r.likes))
                .ok_or(Error::not_found(format!("Reply not found: {id}"))),
        }
    }

    fn ensure_capacity(&self) -> Result<(), Error> {
        if self.comments.len() + self.replies.len()
            >= crate::config::get().max_comments_per_content
        {
            Err(Error::validation("Max comments reached"))
        } else {
            Ok(())
        }
    }

    fn add_comment(
        &mut self,
        actor: &str,
        text: String,
        image_url: Option<String>,
    ) -> Result<Comment, Error> {
        self.ensure_capacity()?;
        let text = validate_text(
            &text,
            image_url.is_some(),
            crate::config::get().max_comment_length,
            "Comment",
        )?;

        let now = chrono::Utc::now();
        let comment = Comment {
            comment_id: uuid::Uuid::new_v4().to_string(),
            text,
            image_url,
            likes: HashSet::new(),
            likes_count: 0,
            reply_count: 0,
            pinned: false,
            edited: false,
            created_by: actor.to_string(),
            sequence: self.next_sequence(),
            created_at: now,
            updated_at: now,
        };

        self.comments
            .insert(comment.comment_id.clone(), comment.clone());
        self.comment_count += 1;
        self.updated_at = now;

        Ok(comment)
    }

    /// Adds a reply; both the parent comment's `reply_count` and the root's
    /// `comment_count` grow by one.
    fn add_reply(
        &mut self,
        actor: &str,
        comment_id: &str,
        text: String,
        image_url: Option<String>,
    ) -> Result<(Reply, String), Error> {
        if !self.comments.contains_key(comment_id) {
            return Err(Error::not_found(format!("Comment not found: {comment_id}")));
        }
        self.ensure_capacity()?;
        let text = validate_text(
            &text,
            image_url.is_some(),
            crate::config::get().max_comment_length,
            "Reply",
        )?;

        let now = chrono::Utc::now();
        let reply = Reply {
            reply_id: uuid::Uuid::new_v4().to_string(),
            comment_id: comment_id.to_string(),
            text,
            image_url,
            likes: HashSet::new(),
            likes_count: 0,
            edited: false,
            created_by: actor.to_string(),
            sequence: self.next_sequence(),
            created_at: now,
            updated_at: now,
        };

        let comment_owner = match self.comments.get_mut(comment_id) {
            Some(comment) => {
                comment.reply_count += 1;
                comment.created_by.clone()
            }
            None => return Err(Error::not_found(format!("Comment not found: {comment_id}"))),
        };

        self.replies.insert(reply.reply_id.clone(), reply.clone());
        self.comment_count += 1;
        self.updated_at = now;

        Ok((reply, comment_owner))
    }

    fn edit_comment(&mut self, actor: &str, comment_id: &str, text: String) -> Result<Comment, Error> {
        let max_length = crate::config::get().max_comment_length;
        let comment = self
            .comments
            .get_mut(comment_id)
            .ok_or(Error::not_found(format!("Comment not found: {comment_id}")))?;

        if comment.created_by != actor {
            return Err(Error::forbidden("Only the author can edit this comment"));
        }

        comment.text = validate_text(&text, comment.image_url.is_some(), max_length, "Comment")?;
        comment.edited = true;
        comment.updated_at = chrono::Utc::now();
        Ok(comment.clone())
    }

    fn edit_reply(&mut self, actor: &str, reply_id: &str, text: String) -> Result<Reply, Error> {
        let max_length = crate::config::get().max_comment_length;
        let reply = self
            .replies
            .get_mut(reply_id)
            .ok_or(Error::not_found(format!("Reply not found: {reply_id}")))?;

        if reply.created_by != actor {
            return Err(Error::forbidden("Only the author can edit this reply"));
        }

        reply.text = validate_text(&text, reply.image_url.is_some(), max_length, "Reply")?;
        reply.edited = true;
        reply.updated_at = chrono::Utc::now();
        Ok(reply.clone())
    }

    /// Pinning a comment is reserved for the owner of the root.
    fn toggle_comment_pin(&mut self, actor: &str, comment_id: &str) -> Result<bool, Error> {
        self.ensure_owner(actor)?;
        let comment = self
            .comments
            .get_mut(comment_id)
            .ok_or(Error::not_found(format!("Comment not found: {comment_id}")))?;

        comment.pinned = !comment.pinned;
        comment.updated_at = chrono::Utc::now();
        Ok(comment.pinned)
    }

    /// Removes a comment together with its replies. The root `comment_count`
    /// drops by `1 + replies`. Returns the ids of every removed item.
    fn remove_comment(&mut self, actor: &str, comment_id: &str) -> Result<Vec<String>, Error> {
        let comment = self
            .comments
            .get(comment_id)
            .ok_or(Error::not_found(format!("Comment not found: {comment_id}")))?;

        if comment.created_by != actor {
            return Err(Error::forbidden("Only the author can delete this comment"));
        }

        let reply_ids: Vec<String> = self
            .replies
            .values()
            .filter(|r| r.comment_id == comment_id)
            .map(|r| r.reply_id.clone())
            .collect();

        for reply_id in reply_ids.iter() {
            self.replies.remove(reply_id);
        }
        self.comments.remove(comment_id);

        let removed = 1 + reply_ids.len() as u32;
        self.comment_count = self.comment_count.saturating_sub(removed);
        self.updated_at = chrono::Utc::now();

        let mut removed_ids = vec![comment_id.to_string()];
        removed_ids.extend(reply_ids);
        Ok(removed_ids)
    }

    fn remove_reply(&mut self, actor: &str, reply_id: &str) -> Result<(), Error> {
        let reply = self
            .replies
            .get(reply_id)
            .ok_or(Error::not_found(format!("Reply not found: {reply_id}")))?;

        if reply.created_by != actor {
            return Err(Error::forbidden("Only the author can delete this reply"));
        }

        let comment_id = reply.comment_id.clone();
        self.replies.remove(reply_id);

        if let Some(comment) = self.comments.get_mut(&comment_id) {
            comment.reply_count = comment.reply_count.saturating_sub(1);
        }
        self.comment_count = self.comment_count.saturating_sub(1);
        self.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Records receivers of notifications linked to this root. The owner is skipped.
    fn add_notified_users(&mut self, user_ids: Vec<String>) -> u32 {
        let mut added = 0;
        for user_id in user_ids {
            if user_id != self.owner_id && self.notified_users.insert(user_id) {
                added += 1;
            }
        }
        added
    }

    /// Ids of the root and of every comment and reply under it.
    fn linked_ids(&self) -> Vec<String> {
        let mut ids = vec![self.content_id.clone()];
        ids.extend(self.comments.keys().cloned());
        ids.extend(self.replies.keys().cloned());
        ids
    }

    /// Pinned first, then newest first. A highlighted comment leads the first page.
    fn sorted_comments(&self, highlight: Option<&str>) -> Vec<&Comment> {
        let mut comments: Vec<&Comment> = self.comments.values().collect();
        comments.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then(b.created_at.cmp(&a.created_at))
                .then(b.sequence.cmp(&a.sequence))
        });

        if let Some(highlight) = highlight {
            if let Some(position) = comments.iter().position(|c| c.comment_id == highlight) {
                let comment = comments.remove(position);
                comments.insert(0, comment);
            }
        }

        comments
    }

    fn comments_page(
        &self,
        viewer_id: &str,
        page: u32,
        size: u32,
        highlight: Option<&str>,
    ) -> Vec<CommentView> {
        let views: Vec<CommentView> = self
            .sorted_comments(highlight)
            .into_iter()
            .map(|c| CommentView::new(&self.content_id, c, viewer_id))
            .collect();
        pagination::paginate(&views, page, size)
    }

    fn replies_page(
        &self,
        viewer_id: &str,
        comment_id: &str,
        page: u32,
        size: u32,
    ) -> Result<Vec<ReplyView>, Error> {
        if !self.comments.contains_key(comment_id) {
            return Err(Error::not_found(format!("Comment not found: {comment_id}")));
        }

        let mut replies: Vec<&Reply> = self
            .replies
            .values()
            .filter(|r| r.comment_id == comment_id)
            .collect();
        replies.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.sequence.cmp(&a.sequence))
        });

        let views: Vec<ReplyView> = replies
            .into_iter()
            .map(|r| ReplyView::new(r, viewer_id))
            .collect();
        Ok(pagination::paginate(&views, page, size))
    }

    fn add_share(&mut self) -> Result<u32, Error> {
        match self.kind {
            ContentKind::Post => {
                self.share_count += 1;
                self.updated_at = chrono::Utc::now();
                Ok(self.share_count)
            }
            ContentKind::Repost(_) => Err(Error::validation("Only posts can be shared")),
        }
    }

    fn remove_share(&mut self) -> u32 {
        self.share_count = self.share_count.saturating_sub(1);
        self.updated_at = chrono::Utc::now();
        self.share_count
    }
}

/// Checks read access of `actor` to a root owned by `owner_id`.
pub async fn ensure_visible(owner_id: &str, privacy: Privacy, actor: &str) -> Result<(), Error> {
    let is_friend = privacy == Privacy::Friends
        && actor != owner_id
        && UserAgentClient::get(owner_id.to_string())
            .get_relationship(actor.to_string())
            .await
            == Some(FriendshipStatus::Accepted);

    if can_view(actor, owner_id, privacy, is_friend) {
        Ok(())
    } else {
        Err(Error::forbidden("Content is not visible"))
    }
}

fn record_badge(user_id: &str, category: BadgeCategory) {
    BadgesAgentClient::get(user_id.to_string()).trigger_record_action(category);
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct CommentsPage {
    pub comments: Vec<CommentView>,
    pub count: u32,
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct CommentAdded {
    pub comment: CommentView,
    pub warnings: Vec<String>,
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct ReplyAdded {
    pub reply: ReplyView,
    pub warnings: Vec<String>,
}

#[agent_definition]
trait ContentAgent {
    fn new(id: String) -> Self;

    fn get_content(&self) -> Option<Content>;

    fn init_post(
        &mut self,
        owner_id: String,
        text: String,
        image_url: Option<String>,
        privacy: Privacy,
    ) -> Result<Content, Error>;

    async fn init_repost(
        &mut self,
        owner_id: String,
        original_id: String,
        text: String,
        privacy: Privacy,
    ) -> Result<Content, Error>;

    fn edit(&mut self, actor: String, text: String) -> Result<Content, Error>;

    fn set_privacy(&mut self, actor: String, privacy: Privacy) -> Result<Content, Error>;

    fn toggle_pin(&mut self, actor: String) -> Result<bool, Error>;

    fn delete(&mut self, actor: String) -> Result<(), Error>;

    async fn toggle_like(&mut self, actor: String, target: LikeTarget) -> Result<LikeToggled, Error>;

    async fn get_likers(
        &self,
        viewer: String,
        target: LikeTarget,
        page: u32,
    ) -> Result<Vec<UserSummary>, Error>;

    async fn add_comment(
        &mut self,
        actor: String,
        text: String,
        image: Option<ImageUpload>,
    ) -> Result<CommentAdded, Error>;

    fn edit_comment(&mut self, actor: String, comment_id: String, text: String) -> Result<CommentView, Error>;

    fn delete_comment(&mut self, actor: String, comment_id: String) -> Result<u32, Error>;

    fn toggle_comment_pin(&mut self, actor: String, comment_id: String) -> Result<bool, Error>;

    async fn add_reply(
        &mut self,
        actor: String,
        comment_id: String,
        text: String,
        image: Option<ImageUpload>,
    ) -> Result<ReplyAdded, Error>;

    fn edit_reply(&mut self, actor: String, reply_id: String, text: String) -> Result<ReplyView, Error>;

    fn delete_reply(&mut self, actor: String, reply_id: String) -> Result<(), Error>;

    async fn get_comments_view(
        &self,
        viewer: String,
        page: u32,
        highlight: Option<String>,
    ) -> Result<CommentsPage, Error>;

    async fn get_replies_view(
        &self,
        viewer: String,
        comment_id: String,
        page: u32,
    ) -> Result<Vec<ReplyView>, Error>;

    fn add_share(&mut self) -> Result<u32, Error>;

    fn remove_share(&mut self) -> u32;

    fn record_notified(&mut self, user_ids: Vec<String>) -> u32;
}

struct ContentAgentImpl {
    _id: String,
    state: Option<Content>,
}

impl ContentAgentImpl {
    fn existing(&mut self) -> Result<&mut Content, Error> {
        self.state
            .as_mut()
            .ok_or(Error::not_found("Content not exists"))
    }

    fn with_existing<T>(&mut self, f: impl FnOnce(&mut Content) -> Result<T, Error>) -> Result<T, Error> {
        f(self.existing()?)
    }

    fn current(&self) -> Result<&Content, Error> {
        self.state
            .as_ref()
            .ok_or(Error::not_found("Content not exists"))
    }

    fn ensure_absent(&self) -> Result<(), Error> {
        if self.state.is_some() {
            Err(Error::conflict("Content already exists"))
        } else {
            Ok(())
        }
    }

    fn remember_notified(&mut self, user_id: &str, actor: &str) {
        if user_id != actor {
            if let Some(state) = self.state.as_mut() {
                state.notified_users.insert(user_id.to_string());
            }
        }
    }

    fn notify_removed(&self, ids: Vec<String>) {
        if let Some(state) = &self.state {
            for user_id in state.notified_users.iter() {
                NotificationsAgentClient::get(user_id.clone()).trigger_remove_linked(ids.clone());
            }
        }
    }
}

#[agent_implementation]
impl ContentAgent for ContentAgentImpl {
    fn new(id: String) -> Self {
        ContentAgentImpl {
            _id: id,
            state: None,
        }
    }

    fn get_content(&self) -> Option<Content> {
        self.state.clone()
    }

    fn init_post(
        &mut self,
        owner_id: String,
        text: String,
        image_url: Option<String>,
        privacy: Privacy,
    ) -> Result<Content, Error> {
        self.ensure_absent()?;

        let content = Content::new_post(self._id.clone(), owner_id, text, image_url, privacy)?;

        log::info!(
            "init post - content id: {}, owner id: {}, privacy: {privacy}",
            content.content_id,
            content.owner_id
        );

        ContentFanoutAgentClient::new_phantom().trigger_content_created(content.alert());
        self.state = Some(content.clone());
        Ok(content)
    }

    async fn init_repost(
        &mut self,
        owner_id: String,
        original_id: String,
        text: String,
        privacy: Privacy,
    ) -> Result<Content, Error> {
        self.ensure_absent()?;

        let mut original = ContentAgentClient::get(original_id.clone())
            .get_content()
            .await
            .ok_or(Error::not_found(format!("Post not found: {original_id}")))?;

        if let ContentKind::Repost(source_id) = original.kind.clone() {
            original = ContentAgentClient::get(source_id.clone())
                .get_content()
                .await
                .ok_or(Error::not_found(format!("Post not found: {source_id}")))?;
        }

        ensure_visible(&original.owner_id, original.privacy, &owner_id).await?;

        let content = Content::new_repost(
            self._id.clone(),
            owner_id,
            original.content_id.clone(),
            text,
            privacy,
        )?;

        let share_count = ContentAgentClient::get(original.content_id.clone())
            .add_share()
            .await?;

        log::info!(
            "init repost - content id: {}, original id: {}, owner id: {}, share count: {share_count}",
            content.content_id,
            original.content_id,
            content.owner_id
        );

        ContentFanoutAgentClient::new_phantom().trigger_content_created(content.alert());
        self.state = Some(content.clone());
        Ok(content)
    }

    fn edit(&mut self, actor: String, text: String) -> Result<Content, Error> {
        let content = self.with_existing(|state| {
            state.edit(&actor, text)?;
            Ok(state.clone())
        })?;

        log::info!("edit content - content id: {}, actor: {actor}", content.content_id);

        ContentFanoutAgentClient::new_phantom().trigger_content_updated(content.alert());
        Ok(content)
    }

    fn set_privacy(&mut self, actor: String, privacy: Privacy) -> Result<Content, Error> {
        let content = self.with_existing(|state| {
            state.set_privacy(&actor, privacy)?;
            Ok(state.clone())
        })?;

        log::info!(
            "set privacy - content id: {}, privacy: {privacy}",
            content.content_id
        );

        UserPostsAgentClient::get(content.owner_id.clone()).trigger_post_updated(content.post_ref());
        ContentFanoutAgentClient::new_phantom().trigger_content_updated(content.alert());
        Ok(content)
    }

    fn toggle_pin(&mut self, actor: String) -> Result<bool, Error> {
        let (pinned, post_ref, owner_id) = self.with_existing(|state| {
            let pinned = state.toggle_pin(&actor)?;
            Ok((pinned, state.post_ref(), state.owner_id.clone()))
        })?;

        log::info!("toggle pin - content id: {}, pinned: {pinned}", post_ref.content_id);

        UserPostsAgentClient::get(owner_id).trigger_post_updated(post_ref);
        Ok(pinned)
    }

    fn delete(&mut self, actor: String) -> Result<(), Error> {
        let content = self.current()?.clone();
        content.ensure_owner(&actor)?;

        let linked_ids = content.linked_ids();

        log::info!(
            "delete content - content id: {}, owner id: {}, linked items: {}",
            content.content_id,
            content.owner_id,
            linked_ids.len()
        );

        self.notify_removed(linked_ids.clone());

        if let Some(original_id) = content.original_id() {
            ContentAgentClient::get(original_id.to_string()).trigger_remove_share();
        }

        UserPostsAgentClient::get(content.owner_id.clone())
            .trigger_remove_post(content.content_id.clone());
        ContentFanoutAgentClient::new_phantom().trigger_content_deleted(
            content.content_id.clone(),
            content.owner_id.clone(),
            linked_ids,
        );

        self.state = None;
        Ok(())
    }

    async fn toggle_like(&mut self, actor: String, target: LikeTarget) -> Result<LikeToggled, Error> {
        let (owner_id, privacy, content_id) = {
            let state = self.current()?;
            (state.owner_id.clone(), state.privacy, state.content_id.clone())
        };

        ensure_visible(&owner_id, privacy, &actor).await?;

        let toggled = self.with_existing(|state| state.toggle_like(&actor, &target))?;

        log::info!(
            "toggle like - user id: {actor}, target: {target}, liked: {}, likes count: {}",
            toggled.liked,
            toggled.likes_count
        );

        if toggled.liked {
            record_badge(&actor, BadgeCategory::Like);

            if toggled.target_owner != actor {
                self.remember_notified(&toggled.target_owner, &actor);
                send_notification(NewNotification {
                    sender_id: actor.clone(),
                    receiver_id: toggled.target_owner.clone(),
                    kind: NotificationKind::Like,
                    description: format!("liked your {}", target_label(&target)),
                    link_id: target.id().to_string(),
                    content_id: Some(content_id),
                });
            }
        }

        Ok(toggled)
    }

    async fn get_likers(
        &self,
        viewer: String,
        target: LikeTarget,
        page: u32,
    ) -> Result<Vec<UserSummary>, Error> {
        let state = self.current()?;
        ensure_visible(&state.owner_id, state.privacy, &viewer).await?;

        let likers = state.likers(&target)?;
        let likers = pagination::paginate(&likers, page, crate::config::get().likes_page_size);

        Ok(UserDirectoryAgentClient::get()
            .get_user_summaries(likers)
            .await)
    }

    async fn add_comment(
        &mut self,
        actor: String,
        text: String,
        image: Option<ImageUpload>,
    ) -> Result<CommentAdded, Error> {
        let (owner_id, privacy, content_id) = {
            let state = self.current()?;
            (state.owner_id.clone(), state.privacy, state.content_id.clone())
        };

        ensure_visible(&owner_id, privacy, &actor).await?;
        validate_text(
            &text,
            image.is_some(),
            crate::config::get().max_comment_length,
            "Comment",
        )?;

        let mut warnings = vec![];
        let image_url = upload_image(image, &mut warnings).await;

        let comment = self.with_existing(|state| state.add_comment(&actor, text, image_url))?;

        log::info!(
            "add comment - content id: {content_id}, comment id: {}, user id: {actor}",
            comment.comment_id
        );

        record_badge(&actor, BadgeCategory::Comment);
        self.remember_notified(&owner_id, &actor);
        send_notification(NewNotification {
            sender_id: actor.clone(),
            receiver_id: owner_id,
            kind: NotificationKind::Comment,
            description: "commented on your post".to_string(),
            link_id: comment.comment_id.clone(),
            content_id: Some(content_id.clone()),
        });

        Ok(CommentAdded {
            comment: CommentView::new(&content_id, &comment, &actor),
            warnings,
        })
    }

    fn edit_comment(&mut self, actor: String, comment_id: String, text: String) -> Result<CommentView, Error> {
        let content_id = self._id.clone();
        let comment = self.with_existing(|state| state.edit_comment(&actor, &comment_id, text))?;

        log::info!("edit comment - content id: {content_id}, comment id: {comment_id}");

        Ok(CommentView::new(&content_id, &comment, &actor))
    }

    fn delete_comment(&mut self, actor: String, comment_id: String) -> Result<u32, Error> {
        let removed_ids = self.with_existing(|state| state.remove_comment(&actor, &comment_id))?;

        log::info!(
            "delete comment - content id: {}, comment id: {comment_id}, removed items: {}",
            self._id,
            removed_ids.len()
        );

        let removed = removed_ids.len() as u32;
        self.notify_removed(removed_ids);
        Ok(removed)
    }

    fn toggle_comment_pin(&mut self, actor: String, comment_id: String) -> Result<bool, Error> {
        let pinned = self.with_existing(|state| state.toggle_comment_pin(&actor, &comment_id))?;

        log::info!(
            "toggle comment pin - content id: {}, comment id: {comment_id}, pinned: {pinned}",
            self._id
        );
        Ok(pinned)
    }

    async fn add_reply(
        &mut self,
        actor: String,
        comment_id: String,
        text: String,
        image: Option<ImageUpload>,
    ) -> Result<ReplyAdded, Error> {
        let (owner_id, privacy, content_id) = {
            let state = self.current()?;
            if !state.comments.contains_key(&comment_id) {
                return Err(Error::not_found(format!("Comment not found: {comment_id}")));
            }
            (state.owner_id.clone(), state.privacy, state.content_id.clone())
        };

        ensure_visible(&owner_id, privacy, &actor).await?;
        validate_text(
            &text,
            image.is_some(),
            crate::config::get().max_comment_length,
            "Reply",
        )?;

        let mut warnings = vec![];
        let image_url = upload_image(image, &mut warnings).await;

        let (reply, comment_owner) =
            self.with_existing(|state| state.add_reply(&actor, &comment_id, text, image_url))?;

        log::info!(
            "add reply - content id: {content_id}, comment id: {comment_id}, reply id: {}, user id: {actor}",
            reply.reply_id
        );

        record_badge(&actor, BadgeCategory::Reply);
        self.remember_notified(&comment_owner, &actor);
        send_notification(NewNotification {
            sender_id: actor.clone(),
            receiver_id: comment_owner,
            kind: NotificationKind::Reply,
            description: "replied to your comment".to_string(),
            link_id: reply.reply_id.clone(),
            content_id: Some(content_id),
        });

        Ok(ReplyAdded {
            reply: ReplyView::new(&reply, &actor),
            warnings,
        })
    }

    fn edit_reply(&mut self, actor: String, reply_id: String, text: String) -> Result<ReplyView, Error> {
        let reply = self.with_existing(|state| state.edit_reply(&actor, &reply_id, text))?;

        log::info!("edit reply - content id: {}, reply id: {reply_id}", self._id);

        Ok(ReplyView::new(&reply, &actor))
    }

    fn delete_reply(&mut self, actor: String, reply_id: String) -> Result<(), Error> {
        self.with_existing(|state| state.remove_reply(&actor, &reply_id))?;

        log::info!("delete reply - content id: {}, reply id: {reply_id}", self._id);

        self.notify_removed(vec![reply_id]);
        Ok(())
    }

    async fn get_comments_view(
        &self,
        viewer: String,
        page: u32,
        highlight: Option<String>,
    ) -> Result<CommentsPage, Error> {
        let state = self.current()?;
        ensure_visible(&state.owner_id, state.privacy, &viewer).await?;

        let comments = state.comments_page(
            &viewer,
            page,
            crate::config::get().comments_page_size,
            highlight.as_deref(),
        );

        Ok(CommentsPage {
            comments,
            count: state.comments.len() as u32,
        })
    }

    async fn get_replies_view(
        &self,
        viewer: String,
        comment_id: String,
        page: u32,
    ) -> Result<Vec<ReplyView>, Error> {
        let state = self.current()?;
        ensure_visible(&state.owner_id, state.privacy, &viewer).await?;

        state.replies_page(
            &viewer,
            &comment_id,
            page,
            crate::config::get().replies_page_size,
        )
    }

    fn add_share(&mut self) -> Result<u32, Error> {
        self.with_existing(|state| state.add_share())
    }

    fn remove_share(&mut self) -> u32 {
        match self.state.as_mut() {
            Some(state) => state.remove_share(),
            None => 0,
        }
    }

    fn record_notified(&mut self, user_ids: Vec<String>) -> u32 {
        match self.state.as_mut() {
            Some(state) => state.add_notified_users(user_ids),
            None => {
                // deleted before fan-out finished; its inbox entries are cleared by content_deleted
                log::warn!("record notified - content id: {}, content not exists", self._id);
                0
            }
        }
    }

    async fn load_snapshot(&mut self, bytes: Vec<u8>) -> Result<(), String> {
        let data: Option<Content> = crate::common::snapshot::deserialize(&bytes)?;
        self.state = data;
        Ok(())
    }

    async fn save_snapshot(&self) -> Result<Vec<u8>, String> {
        crate::common::snapshot::serialize(&self.state)
    }
}

fn target_label(target: &LikeTarget) -> &'static str {
    match target {
        LikeTarget::Post(_) => "post",
        LikeTarget::Repost(_) => "repost",
        LikeTarget::Comment(_) => "comment",
        LikeTarget::Reply(_) => "reply",
    }
}

/// Propagates root lifecycle changes to timelines, the public index,
/// notification inboxes and online friends.
#[agent_definition]
trait ContentFanoutAgent {
    fn new() -> Self;

    async fn content_created(&mut self, alert: ContentAlert) -> u32;

    async fn content_updated(&mut self, alert: ContentAlert) -> u32;

    async fn content_deleted(&mut self, content_id: String, owner_id: String, linked_ids: Vec<String>) -> u32;
}

struct ContentFanoutAgentImpl {}

async fn get_friend_ids(user_id: &str) -> Vec<String> {
    let mut friend_ids: Vec<String> = UserAgentClient::get(user_id.to_string())
        .get_friend_ids()
        .await
        .into_iter()
        .collect();
    friend_ids.sort();
    friend_ids
}

fn update_public_index(alert: &ContentAlert) {
    if alert.privacy == Privacy::Public {
        PublicTimelineAgentClient::get().trigger_add_entry(alert.public_entry());
    } else {
        PublicTimelineAgentClient::get().trigger_remove_entry(alert.content_id.clone());
    }
}

#[agent_implementation]
impl ContentFanoutAgent for ContentFanoutAgentImpl {
    fn new() -> Self {
        Self {}
    }

    async fn content_created(&mut self, alert: ContentAlert) -> u32 {
        let entry = alert.feed_entry();

        UserTimelineAgentClient::get(alert.owner_id.clone()).trigger_add_entry(entry.clone());
        update_public_index(&alert);

        if alert.privacy == Privacy::Private {
            log::debug!("content created - content id: {}, private", alert.content_id);
            return 0;
        }

        let friend_ids = get_friend_ids(&alert.owner_id).await;

        for friend_id in friend_ids.iter() {
            UserTimelineAgentClient::get(friend_id.clone()).trigger_add_entry(entry.clone());
            send_notification(NewNotification {
                sender_id: alert.owner_id.clone(),
                receiver_id: friend_id.clone(),
                kind: NotificationKind::NewPost,
                description: "shared a new post".to_string(),
                link_id: alert.content_id.clone(),
                content_id: Some(alert.content_id.clone()),
            });
        }

        if !friend_ids.is_empty() {
            ContentAgentClient::get(alert.content_id.clone()).trigger_record_notified(friend_ids.clone());
            PresenceAgentClient::get()
                .trigger_deliver_many(friend_ids.clone(), RealtimeEvent::NewPost(alert.clone()));
        }

        log::info!(
            "content created - content id: {}, owner id: {}, friends: {}",
            alert.content_id,
            alert.owner_id,
            friend_ids.len()
        );

        friend_ids.len() as u32
    }

    async fn content_updated(&mut self, alert: ContentAlert) -> u32 {
        update_public_index(&alert);

        if alert.privacy == Privacy::Private {
            return 0;
        }

        // timelines keep their first entry, so a re-add only reaches friends that missed it
        let entry = alert.feed_entry();
        let friend_ids = get_friend_ids(&alert.owner_id).await;
        for friend_id in friend_ids.iter() {
            UserTimelineAgentClient::get(friend_id.clone()).trigger_add_entry(entry.clone());
        }

        log::debug!(
            "content updated - content id: {}, privacy: {}, friends: {}",
            alert.content_id,
            alert.privacy,
            friend_ids.len()
        );

        friend_ids.len() as u32
    }

    async fn content_deleted(&mut self, content_id: String, owner_id: String, linked_ids: Vec<String>) -> u32 {
        PublicTimelineAgentClient::get().trigger_remove_entry(content_id.clone());
        UserTimelineAgentClient::get(owner_id.clone()).trigger_remove_entry(content_id.clone());

        let friend_ids = get_friend_ids(&owner_id).await;
        for friend_id in friend_ids.iter() {
            UserTimelineAgentClient::get(friend_id.clone()).trigger_remove_entry(content_id.clone());
            NotificationsAgentClient::get(friend_id.clone()).trigger_remove_linked(linked_ids.clone());
        }

        log::info!(
            "content deleted - content id: {content_id}, owner id: {owner_id}, friends: {}",
            friend_ids.len()
        );

        friend_ids.len() as u32
    }
}
