use crate::chat::{conversation_id, ConversationAgentClient, Message};
use crate::common::error::Error;
use crate::common::{pagination, poll_for_updates};
use crate::content::validate_text;
use crate::media::{upload_image, ImageUpload};
use crate::notification::{send_notification, NewNotification, NotificationKind};
use crate::presence::PresenceAgentClient;
use crate::realtime::RealtimeEvent;
use crate::user::UserDirectoryAgentClient;
use golem_rust::{agent_definition, agent_implementation, Schema};
use serde::{Deserialize, Serialize};

/// Latest message exchanged with one peer. A read cache over the conversation.
#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LastMessageSummary {
    pub peer_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub message: String,
    pub has_image: bool,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl LastMessageSummary {
    fn from_message(message: &Message, owner_id: &str) -> Self {
        let peer_id = if message.sender_id == owner_id {
            message.receiver_id.clone()
        } else {
            message.sender_id.clone()
        };

        LastMessageSummary {
            peer_id,
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            message: message.text.clone(),
            has_image: message.image_url.is_some(),
            updated_at: message.created_at,
        }
    }
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct UserChats {
    pub user_id: String,
    pub summaries: Vec<LastMessageSummary>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl UserChats {
    fn new(user_id: String) -> Self {
        let now = chrono::Utc::now();
        UserChats {
            user_id,
            summaries: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// One row per peer; an older message never overwrites a newer summary.
    fn upsert(&mut self, summary: LastMessageSummary) {
        match self
            .summaries
            .iter_mut()
            .find(|s| s.peer_id == summary.peer_id)
        {
            Some(existing) if existing.updated_at > summary.updated_at => {}
            Some(existing) => *existing = summary.clone(),
            None => self.summaries.push(summary.clone()),
        }

        if self.updated_at < summary.updated_at {
            self.updated_at = summary.updated_at;
        }
    }

    fn sorted(&self) -> Vec<LastMessageSummary> {
        let mut summaries = self.summaries.clone();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    fn updated_since(&self, since: chrono::DateTime<chrono::Utc>) -> Vec<LastMessageSummary> {
        self.sorted()
            .into_iter()
            .filter(|s| s.updated_at > since)
            .collect()
    }
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct MessageSent {
    pub message: Message,
    pub warnings: Vec<String>,
}

#[agent_definition]
trait UserChatsAgent {
    fn new(id: String) -> Self;

    async fn send_message(
        &mut self,
        actor: String,
        receiver_id: String,
        text: String,
        image: Option<ImageUpload>,
    ) -> Result<MessageSent, Error>;

    fn message_received(&mut self, message: Message);

    fn get_last_messages(&self, actor: String, page: u32) -> Result<Vec<LastMessageSummary>, Error>;

    fn get_updates(&self, updates_since: chrono::DateTime<chrono::Utc>) -> Option<Vec<LastMessageSummary>>;
}

struct UserChatsAgentImpl {
    _id: String,
    state: Option<UserChats>,
}

impl UserChatsAgentImpl {
    fn get_state(&mut self) -> &mut UserChats {
        self.state.get_or_insert(UserChats::new(self._id.clone()))
    }

    fn with_state<T>(&mut self, f: impl FnOnce(&mut UserChats) -> T) -> T {
        f(self.get_state())
    }
}

#[agent_implementation]
impl UserChatsAgent for UserChatsAgentImpl {
    fn new(id: String) -> Self {
        UserChatsAgentImpl {
            _id: id,
            state: None,
        }
    }

    async fn send_message(
        &mut self,
        actor: String,
        receiver_id: String,
        text: String,
        image: Option<ImageUpload>,
    ) -> Result<MessageSent, Error> {
        if actor != self._id {
            return Err(Error::forbidden("Only the account owner can send messages"));
        }
        if actor == receiver_id {
            return Err(Error::validation("Cannot send a message to yourself"));
        }

        UserDirectoryAgentClient::get()
            .get_user_summary(receiver_id.clone())
            .await
            .ok_or(Error::not_found(format!("User not found: {receiver_id}")))?;

        validate_text(
            &text,
            image.is_some(),
            crate::config::get().max_message_length,
            "Message",
        )?;

        let mut warnings = vec![];
        let image_url = upload_image(image, &mut warnings).await;

        let message = ConversationAgentClient::get(conversation_id(&actor, &receiver_id))
            .add_message(actor.clone(), receiver_id.clone(), text, image_url)
            .await?;

        self.with_state(|state| state.upsert(LastMessageSummary::from_message(&message, &actor)));
        UserChatsAgentClient::get(receiver_id.clone()).trigger_message_received(message.clone());

        let delivered = PresenceAgentClient::get()
            .deliver(
                receiver_id.clone(),
                RealtimeEvent::ReceiveMessage(message.clone()),
            )
            .await;

        if !delivered {
            send_notification(NewNotification {
                sender_id: actor.clone(),
                receiver_id: receiver_id.clone(),
                kind: NotificationKind::Message,
                description: "sent you a message".to_string(),
                link_id: message.message_id.clone(),
                content_id: None,
            });
        }

        log::info!(
            "send message - sender id: {actor}, receiver id: {receiver_id}, message id: {}, delivered: {delivered}",
            message.message_id
        );

        Ok(MessageSent { message, warnings })
    }

    fn message_received(&mut self, message: Message) {
        log::debug!(
            "message received - user id: {}, sender id: {}, message id: {}",
            self._id,
            message.sender_id,
            message.message_id
        );
        let owner_id = self._id.clone();
        self.with_state(|state| state.upsert(LastMessageSummary::from_message(&message, &owner_id)));
    }

    fn get_last_messages(&self, actor: String, page: u32) -> Result<Vec<LastMessageSummary>, Error> {
        if actor != self._id {
            return Err(Error::forbidden("Only the account owner can read conversations"));
        }

        Ok(self
            .state
            .as_ref()
            .map(|state| {
                pagination::paginate(
                    &state.sorted(),
                    page,
                    crate::config::get().last_messages_page_size,
                )
            })
            .unwrap_or_default())
    }

    fn get_updates(&self, updates_since: chrono::DateTime<chrono::Utc>) -> Option<Vec<LastMessageSummary>> {
        self.state
            .as_ref()
            .map(|state| state.updated_since(updates_since))
    }

    async fn load_snapshot(&mut self, bytes: Vec<u8>) -> Result<(), String> {
        let data: Option<UserChats> = crate::common::snapshot::deserialize(&bytes)?;
        self.state = data;
        Ok(())
    }

    async fn save_snapshot(&self) -> Result<Vec<u8>, String> {
        crate::common::snapshot::serialize(&self.state)
    }
}

#[agent_definition(mode = "ephemeral")]
trait UserChatsUpdatesAgent {
    fn new() -> Self;

    async fn get_chats_updates(
        &mut self,
        user_id: String,
        updates_since: Option<chrono::DateTime<chrono::Utc>>,
        iter_wait_time: Option<u32>,
        max_wait_time: Option<u32>,
    ) -> Option<Vec<LastMessageSummary>>;
}

struct UserChatsUpdatesAgentImpl {}

#[agent_implementation]
impl UserChatsUpdatesAgent for UserChatsUpdatesAgentImpl {
    fn new() -> Self {
        Self {}
    }

    async fn get_chats_updates(
        &mut self,
        user_id: String,
        updates_since: Option<chrono::DateTime<chrono::Utc>>,
        iter_wait_time: Option<u32>,
        max_wait_time: Option<u32>,
    ) -> Option<Vec<LastMessageSummary>> {
        poll_for_updates(
            user_id,
            updates_since.unwrap_or(chrono::Utc::now()),
            iter_wait_time,
            max_wait_time,
            |uid, since| async move { UserChatsAgentClient::get(uid).get_updates(since).await },
            "get chats updates",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(sender: &str, receiver: &str, text: &str, minute: u32) -> Message {
        Message {
            message_id: format!("m-{text}"),
            conversation_id: conversation_id(sender, receiver),
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            text: text.to_string(),
            image_url: None,
            created_at: chrono::Utc
                .with_ymd_and_hms(2024, 1, 1, 12, minute, 0)
                .unwrap(),
        }
    }

    #[test]
    fn test_summary_peer_from_both_sides() {
        let m = message("a", "b", "hi", 1);

        assert_eq!(LastMessageSummary::from_message(&m, "a").peer_id, "b");
        assert_eq!(LastMessageSummary::from_message(&m, "b").peer_id, "a");
    }

    #[test]
    fn test_upsert_keeps_one_row_per_peer() {
        let mut chats = UserChats::new("a".to_string());

        chats.upsert(LastMessageSummary::from_message(&message("a", "b", "one", 1), "a"));
        chats.upsert(LastMessageSummary::from_message(&message("b", "a", "two", 2), "a"));
        chats.upsert(LastMessageSummary::from_message(&message("a", "c", "three", 3), "a"));

        assert_eq!(chats.summaries.len(), 2);

        let sorted = chats.sorted();
        assert_eq!(sorted[0].peer_id, "c");
        assert_eq!(sorted[1].message, "two");
        assert_eq!(sorted[1].sender_id, "b");
    }

    #[test]
    fn test_upsert_ignores_older_message() {
        let mut chats = UserChats::new("a".to_string());

        chats.upsert(LastMessageSummary::from_message(&message("a", "b", "new", 5), "a"));
        chats.upsert(LastMessageSummary::from_message(&message("b", "a", "old", 4), "a"));

        assert_eq!(chats.summaries[0].message, "new");
    }

    #[test]
    fn test_updated_since() {
        let mut chats = UserChats::new("a".to_string());
        chats.upsert(LastMessageSummary::from_message(&message("a", "b", "one", 1), "a"));
        chats.upsert(LastMessageSummary::from_message(&message("a", "c", "two", 3), "a"));

        let since = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 12, 2, 0).unwrap();
        let updates = chats.updated_since(since);

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].peer_id, "c");
    }
}
