use crate::common::Privacy;
use crate::content::{Comment, Content, ContentKind, Reply};
use golem_rust::Schema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// `public` is visible to everyone, `friends` to the owner and accepted friends,
/// `private` to the owner only.
pub fn can_view(viewer_id: &str, owner_id: &str, privacy: Privacy, is_friend: bool) -> bool {
    match privacy {
        Privacy::Public => true,
        Privacy::Friends => viewer_id == owner_id || is_friend,
        Privacy::Private => viewer_id == owner_id,
    }
}

/// Reader identity together with its accepted friends.
#[derive(Clone, Debug, Default)]
pub struct Viewer {
    pub user_id: String,
    pub friend_ids: HashSet<String>,
}

impl Viewer {
    pub fn new(user_id: String, friend_ids: HashSet<String>) -> Self {
        Self {
            user_id,
            friend_ids,
        }
    }

    pub fn is_friend(&self, user_id: &str) -> bool {
        self.friend_ids.contains(user_id)
    }

    pub fn can_view(&self, owner_id: &str, privacy: Privacy) -> bool {
        can_view(&self.user_id, owner_id, privacy, self.is_friend(owner_id))
    }

    pub fn can_view_content(&self, content: &Content) -> bool {
        self.can_view(&content.owner_id, content.privacy)
    }
}

#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostView {
    pub content_id: String,
    pub kind: ContentKind,
    pub owner_id: String,
    pub text: String,
    pub image_url: Option<String>,
    pub privacy: Privacy,
    pub pinned: bool,
    pub edited: bool,
    pub likes_count: u32,
    pub comment_count: u32,
    pub share_count: u32,
    pub is_liked: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl PostView {
    pub fn new(content: &Content, viewer_id: &str) -> Self {
        PostView {
            content_id: content.content_id.clone(),
            kind: content.kind.clone(),
            owner_id: content.owner_id.clone(),
            text: content.text.clone(),
            image_url: content.image_url.clone(),
            privacy: content.privacy,
            pinned: content.pinned,
            edited: content.edited,
            likes_count: content.likes_count,
            comment_count: content.comment_count,
            share_count: content.share_count,
            is_liked: content.likes.contains(viewer_id),
            created_at: content.created_at,
            updated_at: content.updated_at,
        }
    }
}

/// Embedded original of a repost, as seen by one viewer.
///
/// `Restricted` and `Deleted` are distinct so clients can tell a hidden
/// original apart from a removed one.
#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OriginalPost {
    Available(PostView),
    Restricted,
    Deleted,
}

#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RepostOrigin {
    pub original_id: String,
    pub original: OriginalPost,
}

#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentView {
    pub item: PostView,
    pub repost_of: Option<RepostOrigin>,
}

pub fn resolve_original(original: Option<&Content>, viewer: &Viewer) -> OriginalPost {
    match original {
        None => OriginalPost::Deleted,
        Some(original) if viewer.can_view_content(original) => {
            OriginalPost::Available(PostView::new(original, &viewer.user_id))
        }
        Some(_) => OriginalPost::Restricted,
    }
}

/// View of a root item, `None` when the viewer may not see it.
/// `original` is the looked-up original of a repost and is ignored for posts.
pub fn content_view(
    content: &Content,
    original: Option<&Content>,
    viewer: &Viewer,
) -> Option<ContentView> {
    if !viewer.can_view_content(content) {
        return None;
    }

    let repost_of = match &content.kind {
        ContentKind::Post => None,
        ContentKind::Repost(original_id) => Some(RepostOrigin {
            original_id: original_id.clone(),
            original: resolve_original(
                original.filter(|o| &o.content_id == original_id),
                viewer,
            ),
        }),
    };

    Some(ContentView {
        item: PostView::new(content, &viewer.user_id),
        repost_of,
    })
}

#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommentView {
    pub comment_id: String,
    pub content_id: String,
    pub text: String,
    pub image_url: Option<String>,
    pub likes_count: u32,
    pub reply_count: u32,
    pub pinned: bool,
    pub edited: bool,
    pub created_by: String,
    pub is_liked: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl CommentView {
    pub fn new(content_id: &str, comment: &Comment, viewer_id: &str) -> Self {
        CommentView {
            comment_id: comment.comment_id.clone(),
            content_id: content_id.to_string(),
            text: comment.text.clone(),
            image_url: comment.image_url.clone(),
            likes_count: comment.likes_count,
            reply_count: comment.reply_count,
            pinned: comment.pinned,
            edited: comment.edited,
            created_by: comment.created_by.clone(),
            is_liked: comment.likes.contains(viewer_id),
            created_at: comment.created_at,
            updated_at: comment.updated_at,
        }
    }
}

#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplyView {
    pub reply_id: String,
    pub comment_id: String,
    pub text: String,
    pub image_url: Option<String>,
    pub likes_count: u32,
    pub edited: bool,
    pub created_by: String,
    pub is_liked: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl ReplyView {
    pub fn new(reply: &Reply, viewer_id: &str) -> Self {
        ReplyView {
            reply_id: reply.reply_id.clone(),
            comment_id: reply.comment_id.clone(),
            text: reply.text.clone(),
            image_url: reply.image_url.clone(),
            likes_count: reply.likes_count,
            edited: reply.edited,
            created_by: reply.created_by.clone(),
            is_liked: reply.likes.contains(viewer_id),
            created_at: reply.created_at,
            updated_at: reply.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewer(id: &str, friends: &[&str]) -> Viewer {
        Viewer::new(
            id.to_string(),
            friends.iter().map(|f| f.to_string()).collect(),
        )
    }

    fn post(id: &str, owner: &str, privacy: Privacy) -> Content {
        Content::new_post(
            id.to_string(),
            owner.to_string(),
            format!("post {id}"),
            None,
            privacy,
        )
        .unwrap()
    }

    #[test]
    fn test_can_view_rules() {
        assert!(can_view("a", "b", Privacy::Public, false));

        assert!(can_view("b", "b", Privacy::Friends, false));
        assert!(can_view("a", "b", Privacy::Friends, true));
        assert!(!can_view("a", "b", Privacy::Friends, false));

        assert!(can_view("b", "b", Privacy::Private, false));
        // friendship does not open private content
        assert!(!can_view("a", "b", Privacy::Private, true));
    }

    #[test]
    fn test_content_view_hides_invisible_items() {
        let private = post("p1", "b", Privacy::Private);

        assert!(content_view(&private, None, &viewer("a", &["b"])).is_none());
        assert!(content_view(&private, None, &viewer("b", &[])).is_some());
    }

    #[test]
    fn test_content_view_sets_is_liked_for_viewer() {
        let mut p = post("p1", "b", Privacy::Public);
        p.toggle_like("a", &crate::common::LikeTarget::Post("p1".to_string()))
            .unwrap();

        let as_a = content_view(&p, None, &viewer("a", &[])).unwrap();
        let as_c = content_view(&p, None, &viewer("c", &[])).unwrap();

        assert!(as_a.item.is_liked);
        assert!(!as_c.item.is_liked);
        assert!(as_a.repost_of.is_none());
    }

    #[test]
    fn test_repost_original_restricted_vs_deleted() {
        let original = post("p1", "b", Privacy::Friends);
        let repost = Content::new_repost(
            "r1".to_string(),
            "c".to_string(),
            "p1".to_string(),
            String::new(),
            Privacy::Public,
        )
        .unwrap();

        let friend_of_b = viewer("a", &["b"]);
        let stranger = viewer("d", &[]);

        let view = content_view(&repost, Some(&original), &friend_of_b).unwrap();
        assert!(matches!(
            view.repost_of.unwrap().original,
            OriginalPost::Available(_)
        ));

        let view = content_view(&repost, Some(&original), &stranger).unwrap();
        assert_eq!(view.repost_of.unwrap().original, OriginalPost::Restricted);

        let view = content_view(&repost, None, &stranger).unwrap();
        assert_eq!(view.repost_of.unwrap().original, OriginalPost::Deleted);
    }
}
