use crate::common::error::Error;
use crate::common::pagination;
use crate::content::validate_text;
use golem_rust::{agent_definition, agent_implementation, Schema};
use serde::{Deserialize, Serialize};

const ID_SEPARATOR: char = ':';

/// Conversation key of an unordered user pair: `<len>:<lower id>:<higher id>`.
/// The length prefix keeps the key unambiguous for ids containing the separator.
pub fn conversation_id(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}{ID_SEPARATOR}{first}{ID_SEPARATOR}{second}", first.len())
}

fn participants_of(conversation_id: &str) -> Option<(&str, &str)> {
    let (length, rest) = conversation_id.split_once(ID_SEPARATOR)?;
    let length: usize = length.parse().ok()?;
    let first = rest.get(..length)?;
    let second = rest.get(length..)?.strip_prefix(ID_SEPARATOR)?;
    Some((first, second))
}

#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: String,
    pub image_url: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub first_user_id: String,
    pub second_user_id: String,
    pub messages: Vec<Message>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Conversation {
    fn new(first_user_id: &str, second_user_id: &str) -> Self {
        let (first, second) = if first_user_id <= second_user_id {
            (first_user_id, second_user_id)
        } else {
            (second_user_id, first_user_id)
        };
        let now = chrono::Utc::now();
        Conversation {
            conversation_id: conversation_id(first, second),
            first_user_id: first.to_string(),
            second_user_id: second.to_string(),
            messages: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn add_message(
        &mut self,
        sender_id: String,
        receiver_id: String,
        text: String,
        image_url: Option<String>,
    ) -> Result<Message, Error> {
        if sender_id == receiver_id {
            return Err(Error::validation("Cannot send a message to yourself"));
        }
        self.ensure_participant(&sender_id)?;
        self.ensure_participant(&receiver_id)?;

        let text = validate_text(
            &text,
            image_url.is_some(),
            crate::config::get().max_message_length,
            "Message",
        )?;

        let message = Message {
            message_id: uuid::Uuid::new_v4().to_string(),
            conversation_id: self.conversation_id.clone(),
            sender_id,
            receiver_id,
            text,
            image_url,
            created_at: chrono::Utc::now(),
        };

        self.updated_at = message.created_at;
        self.messages.push(message.clone());
        Ok(message)
    }

    fn ensure_participant(&self, user_id: &str) -> Result<(), Error> {
        if user_id == self.first_user_id || user_id == self.second_user_id {
            Ok(())
        } else {
            Err(Error::forbidden("Not a participant of this conversation"))
        }
    }

    /// Newest first.
    fn messages_page(&self, page: u32, size: u32) -> Vec<Message> {
        let newest_first: Vec<Message> = self.messages.iter().rev().cloned().collect();
        pagination::paginate(&newest_first, page, size)
    }
}

#[agent_definition]
trait ConversationAgent {
    fn new(id: String) -> Self;

    fn add_message(
        &mut self,
        sender_id: String,
        receiver_id: String,
        text: String,
        image_url: Option<String>,
    ) -> Result<Message, Error>;

    fn get_messages(&self, viewer: String, page: u32) -> Result<Vec<Message>, Error>;
}

struct ConversationAgentImpl {
    _id: String,
    state: Option<Conversation>,
}

impl ConversationAgentImpl {
    fn get_state(&mut self) -> Result<&mut Conversation, Error> {
        if self.state.is_none() {
            let (first, second) = participants_of(&self._id)
                .ok_or(Error::validation(format!("Invalid conversation id: {}", self._id)))?;
            let conversation = Conversation::new(first, second);
            if conversation.conversation_id != self._id {
                return Err(Error::validation(format!("Invalid conversation id: {}", self._id)));
            }
            self.state = Some(conversation);
        }

        self.state
            .as_mut()
            .ok_or(Error::not_found("Conversation not exists"))
    }

    fn with_state<T>(&mut self, f: impl FnOnce(&mut Conversation) -> Result<T, Error>) -> Result<T, Error> {
        f(self.get_state()?)
    }
}

#[agent_implementation]
impl ConversationAgent for ConversationAgentImpl {
    fn new(id: String) -> Self {
        ConversationAgentImpl {
            _id: id,
            state: None,
        }
    }

    fn add_message(
        &mut self,
        sender_id: String,
        receiver_id: String,
        text: String,
        image_url: Option<String>,
    ) -> Result<Message, Error> {
        let message =
            self.with_state(|state| state.add_message(sender_id, receiver_id, text, image_url))?;

        log::info!(
            "add message - conversation id: {}, message id: {}, sender id: {}",
            message.conversation_id,
            message.message_id,
            message.sender_id
        );
        Ok(message)
    }

    fn get_messages(&self, viewer: String, page: u32) -> Result<Vec<Message>, Error> {
        match &self.state {
            Some(state) => {
                state.ensure_participant(&viewer)?;
                Ok(state.messages_page(page, crate::config::get().messages_page_size))
            }
            None => match participants_of(&self._id) {
                Some((first, second)) if viewer == first || viewer == second => Ok(vec![]),
                _ => Err(Error::forbidden("Not a participant of this conversation")),
            },
        }
    }

    async fn load_snapshot(&mut self, bytes: Vec<u8>) -> Result<(), String> {
        let data: Option<Conversation> = crate::common::snapshot::deserialize(&bytes)?;
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

    #[test]
    fn test_conversation_id_is_unordered() {
        assert_eq!(conversation_id("a", "b"), conversation_id("b", "a"));
        assert_eq!(participants_of(&conversation_id("b", "a")), Some(("a", "b")));
    }

    #[test]
    fn test_add_message_validation() {
        let mut conversation = Conversation::new("a", "b");

        assert!(matches!(
            conversation.add_message("a".into(), "a".into(), "hi".into(), None),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            conversation.add_message("a".into(), "c".into(), "hi".into(), None),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            conversation.add_message("a".into(), "b".into(), "   ".into(), None),
            Err(Error::Validation(_))
        ));

        let too_long = "x".repeat(crate::config::get().max_message_length + 1);
        assert!(conversation
            .add_message("a".into(), "b".into(), too_long, None)
            .is_err());

        // image only
        assert!(conversation
            .add_message("b".into(), "a".into(), "".into(), Some("https://img/1".into()))
            .is_ok());
        assert_eq!(conversation.messages.len(), 1);
    }

    #[test]
    fn test_messages_page_newest_first() {
        let mut conversation = Conversation::new("a", "b");
        for i in 0..20 {
            conversation
                .add_message("a".into(), "b".into(), format!("m{i}"), None)
                .unwrap();
        }

        let first = conversation.messages_page(1, 15);
        assert_eq!(first.len(), 15);
        assert_eq!(first[0].text, "m19");

        let second = conversation.messages_page(2, 15);
        assert_eq!(second.len(), 5);
        assert_eq!(second[4].text, "m0");
    }

    #[test]
    fn test_ensure_participant() {
        let conversation = Conversation::new("b", "a");
        assert!(conversation.ensure_participant("a").is_ok());
        assert!(conversation.ensure_participant("b").is_ok());
        assert!(matches!(
            conversation.ensure_participant("c"),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn test_conversation_id_with_separator_in_user_ids() {
        let left = conversation_id("a:b", "c");
        let right = conversation_id("a", "b:c");
        assert_ne!(left, right);

        assert_eq!(participants_of(&left), Some(("a:b", "c")));
        assert_eq!(participants_of(&right), Some(("a", "b:c")));

        let conversation = Conversation::new("c", "a:b");
        assert_eq!(conversation.conversation_id, left);
        assert!(conversation.ensure_participant("a:b").is_ok());
        assert!(matches!(
            conversation.ensure_participant("a"),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn test_participants_of_rejects_malformed_ids() {
        assert_eq!(participants_of("a:b"), None);
        assert_eq!(participants_of("5:a:b"), None);
        assert_eq!(participants_of("1:ab"), None);
    }
}
