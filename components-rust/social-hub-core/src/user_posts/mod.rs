use crate::badge::{BadgeCategory, BadgesAgentClient};
use crate::common::error::Error;
use crate::common::Privacy;
use crate::content::{validate_text, Content, ContentAgentClient, ContentKind};
use crate::media::{upload_image, ImageUpload};
use crate::user::UserAgentClient;
use golem_rust::{agent_definition, agent_implementation, Schema};
use serde::{Deserialize, Serialize};

/// Owner index entry of a post or repost.
#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostRef {
    pub content_id: String,
    pub kind: ContentKind,
    pub privacy: Privacy,
    pub pinned: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub sequence: u64,
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct UserPosts {
    pub user_id: String,
    pub posts: Vec<PostRef>,
    pub next_sequence: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl UserPosts {
    fn new(user_id: String) -> Self {
        let now = chrono::Utc::now();
        UserPosts {
            user_id,
            posts: Vec::new(),
            next_sequence: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn add_post(&mut self, mut post: PostRef) {
        if self.posts.iter().any(|p| p.content_id == post.content_id) {
            self.update_post(post);
            return;
        }

        post.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.posts.push(post);
        self.updated_at = chrono::Utc::now();
    }

    /// Refreshes privacy and pin flag, keeping the insertion sequence.
    fn update_post(&mut self, post: PostRef) -> bool {
        match self
            .posts
            .iter_mut()
            .find(|p| p.content_id == post.content_id)
        {
            Some(existing) => {
                existing.privacy = post.privacy;
                existing.pinned = post.pinned;
                self.updated_at = chrono::Utc::now();
                true
            }
            None => false,
        }
    }

    fn remove_post(&mut self, content_id: &str) -> bool {
        let before = self.posts.len();
        self.posts.retain(|p| p.content_id != content_id);
        self.updated_at = chrono::Utc::now();
        before != self.posts.len()
    }

    /// Profile order: pinned first, then newest first.
    fn profile_posts(&self) -> Vec<PostRef> {
        let mut posts = self.posts.clone();
        posts.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then(b.created_at.cmp(&a.created_at))
                .then(b.sequence.cmp(&a.sequence))
        });
        posts
    }
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct PostCreated {
    pub content: Content,
    pub warnings: Vec<String>,
}

#[agent_definition]
trait UserPostsAgent {
    fn new(id: String) -> Self;

    fn get_posts(&self) -> Vec<PostRef>;

    async fn create_post(
        &mut self,
        actor: String,
        text: String,
        privacy: Privacy,
        image: Option<ImageUpload>,
    ) -> Result<PostCreated, Error>;

    async fn create_repost(
        &mut self,
        actor: String,
        original_id: String,
        text: String,
        privacy: Privacy,
    ) -> Result<Content, Error>;

    fn post_updated(&mut self, post: PostRef) -> bool;

    fn remove_post(&mut self, content_id: String) -> bool;
}

struct UserPostsAgentImpl {
    _id: String,
    state: Option<UserPosts>,
}

impl UserPostsAgentImpl {
    fn get_state(&mut self) -> &mut UserPosts {
        self.state.get_or_insert(UserPosts::new(self._id.clone()))
    }

    fn with_state<T>(&mut self, f: impl FnOnce(&mut UserPosts) -> T) -> T {
        f(self.get_state())
    }

    async fn ensure_author(&self, actor: &str) -> Result<(), Error> {
        if actor != self._id {
            return Err(Error::forbidden("Only the account owner can publish"));
        }

        UserAgentClient::get(actor.to_string())
            .get_user()
            .await
            .map(|_| ())
            .ok_or(Error::not_found("User not exists"))
    }
}

#[agent_implementation]
impl UserPostsAgent for UserPostsAgentImpl {
    fn new(id: String) -> Self {
        UserPostsAgentImpl {
            _id: id,
            state: None,
        }
    }

    fn get_posts(&self) -> Vec<PostRef> {
        self.state
            .as_ref()
            .map(|state| state.profile_posts())
            .unwrap_or_default()
    }

    async fn create_post(
        &mut self,
        actor: String,
        text: String,
        privacy: Privacy,
        image: Option<ImageUpload>,
    ) -> Result<PostCreated, Error> {
        self.ensure_author(&actor).await?;
        validate_text(
            &text,
            image.is_some(),
            crate::config::get().max_post_length,
            "Post",
        )?;

        let mut warnings = vec![];
        let image_url = upload_image(image, &mut warnings).await;

        let content_id = uuid::Uuid::now_v7().to_string();

        log::info!("create post - user id: {actor}, content id: {content_id}, privacy: {privacy}");

        let content = ContentAgentClient::get(content_id)
            .init_post(actor.clone(), text, image_url, privacy)
            .await?;

        self.with_state(|state| state.add_post(content.post_ref()));
        BadgesAgentClient::get(actor).trigger_record_action(BadgeCategory::Post);

        Ok(PostCreated { content, warnings })
    }

    async fn create_repost(
        &mut self,
        actor: String,
        original_id: String,
        text: String,
        privacy: Privacy,
    ) -> Result<Content, Error> {
        self.ensure_author(&actor).await?;

        let content_id = uuid::Uuid::now_v7().to_string();

        log::info!(
            "create repost - user id: {actor}, content id: {content_id}, original id: {original_id}"
        );

        let content = ContentAgentClient::get(content_id)
            .init_repost(actor.clone(), original_id, text, privacy)
            .await?;

        self.with_state(|state| state.add_post(content.post_ref()));
        BadgesAgentClient::get(actor).trigger_record_action(BadgeCategory::Share);

        Ok(content)
    }

    fn post_updated(&mut self, post: PostRef) -> bool {
        log::debug!(
            "post updated - user id: {}, content id: {}, pinned: {}, privacy: {}",
            self._id,
            post.content_id,
            post.pinned,
            post.privacy
        );
        self.with_state(|state| state.update_post(post))
    }

    fn remove_post(&mut self, content_id: String) -> bool {
        log::debug!("remove post - user id: {}, content id: {content_id}", self._id);
        self.with_state(|state| state.remove_post(&content_id))
    }

    async fn load_snapshot(&mut self, bytes: Vec<u8>) -> Result<(), String> {
        let data: Option<UserPosts> = crate::common::snapshot::deserialize(&bytes)?;
        self.state = data;
        Ok(())
    }

    async fn save_snapshot(&self) -> Result<Vec<u8>, String> {
        crate::common::snapshot::serialize(&self.state)
    }
}
