use crate::common::error::Error;
use crate::common::pagination;
use crate::presence::PresenceAgentClient;
use crate::realtime::RealtimeEvent;
use golem_rust::{agent_definition, agent_implementation, Schema};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{Display, Formatter};

#[derive(Schema, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    Like,
    Comment,
    Reply,
    Message,
    NewPost,
    FriendRequest,
    FriendAccepted,
    BadgeEarned,
}

impl Display for NotificationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
            NotificationKind::Reply => "reply",
            NotificationKind::Message => "message",
            NotificationKind::NewPost => "new-post",
            NotificationKind::FriendRequest => "friend-request",
            NotificationKind::FriendAccepted => "friend-accepted",
            NotificationKind::BadgeEarned => "badge-earned",
        };
        write!(f, "{value}")
    }
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct NewNotification {
    pub sender_id: String,
    pub receiver_id: String,
    pub kind: NotificationKind,
    pub description: String,
    /// Id of the entity the notification points at (content, comment, reply, user, badge).
    pub link_id: String,
    /// Root post or repost the linked entity belongs to, if any.
    pub content_id: Option<String>,
}

#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub kind: NotificationKind,
    pub description: String,
    pub link_id: String,
    pub content_id: Option<String>,
    pub watched: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Notification {
    fn new(notification: NewNotification) -> Self {
        Notification {
            notification_id: uuid::Uuid::new_v4().to_string(),
            sender_id: notification.sender_id,
            receiver_id: notification.receiver_id,
            kind: notification.kind,
            description: notification.description,
            link_id: notification.link_id,
            content_id: notification.content_id,
            watched: false,
            created_at: chrono::Utc::now(),
        }
    }

    fn links_to_any(&self, ids: &HashSet<String>) -> bool {
        ids.contains(&self.link_id)
            || self
                .content_id
                .as_ref()
                .is_some_and(|content_id| ids.contains(content_id))
    }

    /// Realtime event announcing this notification.
    pub fn realtime_event(&self) -> RealtimeEvent {
        match self.kind {
            NotificationKind::NewPost => RealtimeEvent::FriendNewPost(self.clone()),
            _ => RealtimeEvent::Notification(self.clone()),
        }
    }
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct Notifications {
    pub user_id: String,
    /// Insertion order, oldest first.
    pub notifications: Vec<Notification>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Notifications {
    fn new(user_id: String) -> Self {
        let now = chrono::Utc::now();
        Notifications {
            user_id,
            notifications: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn add(&mut self, notification: NewNotification) -> Result<Notification, Error> {
        if notification.receiver_id != self.user_id {
            return Err(Error::validation("Notification receiver mismatch"));
        }
        if notification.sender_id == notification.receiver_id
            && notification.kind != NotificationKind::BadgeEarned
        {
            return Err(Error::validation("Self notification"));
        }

        let notification = Notification::new(notification);
        self.updated_at = notification.created_at;
        self.notifications.push(notification.clone());
        Ok(notification)
    }

    /// Newest first, ties broken by insertion order.
    fn page(&self, page: u32, size: u32) -> Vec<Notification> {
        let newest_first: Vec<Notification> = self.notifications.iter().rev().cloned().collect();
        pagination::paginate(&newest_first, page, size)
    }

    fn unwatched_count(&self) -> u32 {
        self.notifications.iter().filter(|n| !n.watched).count() as u32
    }

    fn watch_all(&mut self) -> u32 {
        let mut count = 0;
        for notification in self.notifications.iter_mut().filter(|n| !n.watched) {
            notification.watched = true;
            count += 1;
        }
        if count > 0 {
            self.updated_at = chrono::Utc::now();
        }
        count
    }

    fn delete_all(&mut self) -> u32 {
        let count = self.notifications.len() as u32;
        self.notifications.clear();
        self.updated_at = chrono::Utc::now();
        count
    }

    fn remove_linked(&mut self, ids: &HashSet<String>) -> u32 {
        let before = self.notifications.len();
        self.notifications.retain(|n| !n.links_to_any(ids));
        let removed = (before - self.notifications.len()) as u32;
        if removed > 0 {
            self.updated_at = chrono::Utc::now();
        }
        removed
    }
}

/// Persists a notification in the receiver's inbox. Self notifications are skipped,
/// except for badge awards.
pub fn send_notification(notification: NewNotification) {
    if notification.sender_id == notification.receiver_id
        && notification.kind != NotificationKind::BadgeEarned
    {
        return;
    }
    NotificationsAgentClient::get(notification.receiver_id.clone())
        .trigger_add_notification(notification);
}

#[agent_definition]
trait NotificationsAgent {
    fn new(id: String) -> Self;

    fn add_notification(&mut self, notification: NewNotification) -> Result<Notification, Error>;

    fn get_notifications(&self, actor: String, page: u32) -> Result<Vec<Notification>, Error>;

    fn get_unwatched_count(&self, actor: String) -> Result<u32, Error>;

    fn watch_all(&mut self, actor: String) -> Result<u32, Error>;

    fn delete_all(&mut self, actor: String) -> Result<u32, Error>;

    fn remove_linked(&mut self, ids: Vec<String>) -> u32;
}

struct NotificationsAgentImpl {
    _id: String,
    state: Option<Notifications>,
}

impl NotificationsAgentImpl {
    fn get_state(&mut self) -> &mut Notifications {
        self.state
            .get_or_insert(Notifications::new(self._id.clone()))
    }

    fn with_state<T>(&mut self, f: impl FnOnce(&mut Notifications) -> T) -> T {
        f(self.get_state())
    }

    fn ensure_owner(&self, actor: &str) -> Result<(), Error> {
        if actor == self._id {
            Ok(())
        } else {
            Err(Error::forbidden("Notifications belong to another user"))
        }
    }
}

#[agent_implementation]
impl NotificationsAgent for NotificationsAgentImpl {
    fn new(id: String) -> Self {
        NotificationsAgentImpl {
            _id: id,
            state: None,
        }
    }

    fn add_notification(&mut self, notification: NewNotification) -> Result<Notification, Error> {
        let notification = self.with_state(|state| state.add(notification))?;

        log::info!(
            "add notification - receiver id: {}, kind: {}, link id: {}",
            notification.receiver_id,
            notification.kind,
            notification.link_id
        );

        // durable first, realtime push is best effort
        PresenceAgentClient::get().trigger_deliver(
            notification.receiver_id.clone(),
            notification.realtime_event(),
        );

        Ok(notification)
    }

    fn get_notifications(&self, actor: String, page: u32) -> Result<Vec<Notification>, Error> {
        self.ensure_owner(&actor)?;
        let size = crate::config::get().notifications_page_size;
        Ok(self
            .state
            .as_ref()
            .map(|state| state.page(page, size))
            .unwrap_or_default())
    }

    fn get_unwatched_count(&self, actor: String) -> Result<u32, Error> {
        self.ensure_owner(&actor)?;
        Ok(self
            .state
            .as_ref()
            .map(|state| state.unwatched_count())
            .unwrap_or(0))
    }

    fn watch_all(&mut self, actor: String) -> Result<u32, Error> {
        self.ensure_owner(&actor)?;
        let count = self.with_state(|state| state.watch_all());
        log::info!("watch all notifications - user id: {actor}, count: {count}");
        Ok(count)
    }

    fn delete_all(&mut self, actor: String) -> Result<u32, Error> {
        self.ensure_owner(&actor)?;
        let count = self.with_state(|state| state.delete_all());
        log::info!("delete all notifications - user id: {actor}, count: {count}");
        Ok(count)
    }

    fn remove_linked(&mut self, ids: Vec<String>) -> u32 {
        let ids: HashSet<String> = ids.into_iter().collect();
        let removed = self.with_state(|state| state.remove_linked(&ids));
        log::debug!(
            "remove linked notifications - user id: {}, removed: {removed}",
            self._id
        );
        removed
    }

    async fn load_snapshot(&mut self, bytes: Vec<u8>) -> Result<(), String> {
        let data: Option<Notifications> = crate::common::snapshot::deserialize(&bytes)?;
        self.state = data;
        Ok(())
    }

    async fn save_snapshot(&self) -> Result<Vec<u8>, String> {
        crate::common::snapshot::serialize(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_notification(sender: &str, link_id: &str, content_id: Option<&str>) -> NewNotification {
        NewNotification {
            sender_id: sender.to_string(),
            receiver_id: "receiver".to_string(),
            kind: NotificationKind::Like,
            description: "liked your post".to_string(),
            link_id: link_id.to_string(),
            content_id: content_id.map(|id| id.to_string()),
        }
    }

    #[test]
    fn test_add_and_page_newest_first() {
        let mut inbox = Notifications::new("receiver".to_string());

        for i in 0..7 {
            inbox
                .add(new_notification("sender", &format!("link-{i}"), None))
                .unwrap();
        }

        let first = inbox.page(1, 5);
        assert_eq!(first.len(), 5);
        assert_eq!(first[0].link_id, "link-6");
        assert_eq!(first[4].link_id, "link-2");

        let second = inbox.page(2, 5);
        let links: Vec<&str> = second.iter().map(|n| n.link_id.as_str()).collect();
        assert_eq!(links, vec!["link-1", "link-0"]);
    }

    #[test]
    fn test_add_rejects_self_and_foreign_receiver() {
        let mut inbox = Notifications::new("receiver".to_string());

        assert!(matches!(
            inbox.add(new_notification("receiver", "l", None)),
            Err(Error::Validation(_))
        ));

        let mut foreign = new_notification("sender", "l", None);
        foreign.receiver_id = "other".to_string();
        assert!(matches!(inbox.add(foreign), Err(Error::Validation(_))));

        let mut badge = new_notification("receiver", "badge-1", None);
        badge.kind = NotificationKind::BadgeEarned;
        assert!(inbox.add(badge).is_ok());
    }

    #[test]
    fn test_watch_all_and_unwatched_count() {
        let mut inbox = Notifications::new("receiver".to_string());
        inbox.add(new_notification("s", "l1", None)).unwrap();
        inbox.add(new_notification("s", "l2", None)).unwrap();

        assert_eq!(inbox.unwatched_count(), 2);
        assert_eq!(inbox.watch_all(), 2);
        assert_eq!(inbox.unwatched_count(), 0);
        assert_eq!(inbox.watch_all(), 0);

        inbox.add(new_notification("s", "l3", None)).unwrap();
        assert_eq!(inbox.unwatched_count(), 1);
    }

    #[test]
    fn test_remove_linked_by_link_or_root() {
        let mut inbox = Notifications::new("receiver".to_string());
        inbox.add(new_notification("s", "post-1", Some("post-1"))).unwrap();
        inbox.add(new_notification("s", "comment-1", Some("post-1"))).unwrap();
        inbox.add(new_notification("s", "comment-2", Some("post-2"))).unwrap();
        inbox.add(new_notification("s", "user-9", None)).unwrap();

        let removed = inbox.remove_linked(&HashSet::from(["comment-2".to_string()]));
        assert_eq!(removed, 1);

        // removing a root also removes notifications on its comments
        let removed = inbox.remove_linked(&HashSet::from(["post-1".to_string()]));
        assert_eq!(removed, 2);

        assert_eq!(inbox.notifications.len(), 1);
        assert_eq!(inbox.notifications[0].link_id, "user-9");
    }

    #[test]
    fn test_delete_all() {
        let mut inbox = Notifications::new("receiver".to_string());
        inbox.add(new_notification("s", "l1", None)).unwrap();
        assert_eq!(inbox.delete_all(), 1);
        assert!(inbox.page(1, 5).is_empty());
    }

    #[test]
    fn test_realtime_event_for_new_post() {
        let mut inbox = Notifications::new("receiver".to_string());
        let mut new_post = new_notification("s", "post-1", Some("post-1"));
        new_post.kind = NotificationKind::NewPost;
        let notification = inbox.add(new_post).unwrap();

        assert!(matches!(
            notification.realtime_event(),
            RealtimeEvent::FriendNewPost(_)
        ));

        let like = inbox.add(new_notification("s", "post-1", None)).unwrap();
        assert!(matches!(like.realtime_event(), RealtimeEvent::Notification(_)));
    }
}
