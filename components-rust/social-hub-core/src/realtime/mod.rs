use crate::chat::Message;
use crate::common::poll_for_updates;
use crate::content::ContentAlert;
use crate::notification::Notification;
use golem_rust::{agent_definition, agent_implementation, Schema};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::{Display, Formatter};

/// Ephemeral push event. Never persisted beyond the channel queue.
#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RealtimeEvent {
    UserOnline(String),
    UserOffline(String),
    ReceiveMessage(Message),
    NewPost(ContentAlert),
    Notification(Notification),
    FriendNewPost(Notification),
}

impl Display for RealtimeEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            RealtimeEvent::UserOnline(_) => "user-online",
            RealtimeEvent::UserOffline(_) => "user-offline",
            RealtimeEvent::ReceiveMessage(_) => "receive-message",
            RealtimeEvent::NewPost(_) => "new-post",
            RealtimeEvent::Notification(_) => "notification",
            RealtimeEvent::FriendNewPost(_) => "friend-new-post",
        };
        write!(f, "{value}")
    }
}

#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEnvelope {
    pub sequence: u64,
    pub event: RealtimeEvent,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Delivery queue of one connected session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RealtimeChannel {
    pub channel_id: String,
    pub user_id: Option<String>,
    pub open: bool,
    pub next_sequence: u64,
    pub dropped: u64,
    pub events: VecDeque<RealtimeEnvelope>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl RealtimeChannel {
    fn new(channel_id: String) -> Self {
        let now = chrono::Utc::now();
        RealtimeChannel {
            channel_id,
            user_id: None,
            open: false,
            next_sequence: 1,
            dropped: 0,
            events: VecDeque::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Binds the channel to `user_id`. Events queued for another user are dropped.
    fn open(&mut self, user_id: String) {
        if self.user_id.as_deref() != Some(user_id.as_str()) {
            self.events.clear();
        }
        self.user_id = Some(user_id);
        self.open = true;
        self.updated_at = chrono::Utc::now();
    }

    fn close(&mut self) -> bool {
        let was_open = self.open;
        self.open = false;
        self.events.clear();
        self.updated_at = chrono::Utc::now();
        was_open
    }

    /// Appends an event, evicting the oldest one when the queue is full.
    /// Returns the assigned sequence, or `None` when the channel is closed.
    fn push(&mut self, event: RealtimeEvent, capacity: usize) -> Option<u64> {
        if !self.open {
            return None;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let now = chrono::Utc::now();
        self.events.push_back(RealtimeEnvelope {
            sequence,
            event,
            created_at: now,
        });

        while self.events.len() > capacity.max(1) {
            self.events.pop_front();
            self.dropped += 1;
        }

        self.updated_at = now;
        Some(sequence)
    }

    fn events_after(&self, sequence: u64) -> Vec<RealtimeEnvelope> {
        self.events
            .iter()
            .filter(|e| e.sequence > sequence)
            .cloned()
            .collect()
    }

    fn acknowledge(&mut self, sequence: u64) -> u32 {
        let before = self.events.len();
        self.events.retain(|e| e.sequence > sequence);
        (before - self.events.len()) as u32
    }
}

#[agent_definition]
trait RealtimeChannelAgent {
    fn new(id: String) -> Self;

    fn open(&mut self, user_id: String);

    fn close(&mut self) -> bool;

    fn push(&mut self, event: RealtimeEvent) -> Option<u64>;

    fn get_events(&self, after_sequence: u64) -> Option<Vec<RealtimeEnvelope>>;

    fn acknowledge(&mut self, sequence: u64) -> u32;
}

struct RealtimeChannelAgentImpl {
    _id: String,
    state: Option<RealtimeChannel>,
}

impl RealtimeChannelAgentImpl {
    fn get_state(&mut self) -> &mut RealtimeChannel {
        self.state
            .get_or_insert(RealtimeChannel::new(self._id.clone()))
    }

    fn with_state<T>(&mut self, f: impl FnOnce(&mut RealtimeChannel) -> T) -> T {
        f(self.get_state())
    }
}

#[agent_implementation]
impl RealtimeChannelAgent for RealtimeChannelAgentImpl {
    fn new(id: String) -> Self {
        RealtimeChannelAgentImpl {
            _id: id,
            state: None,
        }
    }

    fn open(&mut self, user_id: String) {
        log::info!("open channel - id: {}, user id: {user_id}", self._id);
        self.with_state(|state| state.open(user_id));
    }

    fn close(&mut self) -> bool {
        log::info!("close channel - id: {}", self._id);
        match &mut self.state {
            Some(state) => state.close(),
            None => false,
        }
    }

    fn push(&mut self, event: RealtimeEvent) -> Option<u64> {
        let capacity = crate::config::get().realtime_queue_capacity;
        let channel_id = self._id.clone();

        match &mut self.state {
            Some(state) => {
                let sequence = state.push(event.clone(), capacity);
                log::debug!(
                    "push event - channel id: {channel_id}, event: {event}, sequence: {sequence:?}"
                );
                sequence
            }
            None => {
                log::debug!("push event - channel id: {channel_id}, event: {event}, channel not open");
                None
            }
        }
    }

    fn get_events(&self, after_sequence: u64) -> Option<Vec<RealtimeEnvelope>> {
        match &self.state {
            Some(state) if state.open => Some(state.events_after(after_sequence)),
            _ => None,
        }
    }

    fn acknowledge(&mut self, sequence: u64) -> u32 {
        match &mut self.state {
            Some(state) => state.acknowledge(sequence),
            None => 0,
        }
    }

    async fn load_snapshot(&mut self, bytes: Vec<u8>) -> Result<(), String> {
        let data: Option<RealtimeChannel> = crate::common::snapshot::deserialize(&bytes)?;
        self.state = data;
        Ok(())
    }

    async fn save_snapshot(&self) -> Result<Vec<u8>, String> {
        crate::common::snapshot::serialize(&self.state)
    }
}

#[agent_definition(mode = "ephemeral")]
trait RealtimeUpdatesAgent {
    fn new() -> Self;

    /// Long-polls a channel until it has events after `after_sequence` or the wait time elapses.
    /// `None` when the channel is not open.
    async fn get_events(
        &mut self,
        channel_id: String,
        after_sequence: Option<u64>,
        iter_wait_time: Option<u32>,
        max_wait_time: Option<u32>,
    ) -> Option<Vec<RealtimeEnvelope>>;
}

struct RealtimeUpdatesAgentImpl {}

#[agent_implementation]
impl RealtimeUpdatesAgent for RealtimeUpdatesAgentImpl {
    fn new() -> Self {
        Self {}
    }

    async fn get_events(
        &mut self,
        channel_id: String,
        after_sequence: Option<u64>,
        iter_wait_time: Option<u32>,
        max_wait_time: Option<u32>,
    ) -> Option<Vec<RealtimeEnvelope>> {
        poll_for_updates(
            channel_id,
            after_sequence.unwrap_or(0),
            iter_wait_time,
            max_wait_time,
            |channel_id, after_sequence| async move {
                let client = RealtimeChannelAgentClient::get(channel_id);
                client.get_events(after_sequence).await
            },
            "get realtime events",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_channel() -> RealtimeChannel {
        let mut channel = RealtimeChannel::new("c1".to_string());
        channel.open("u1".to_string());
        channel
    }

    #[test]
    fn test_push_requires_open_channel() {
        let mut channel = RealtimeChannel::new("c1".to_string());
        assert!(channel
            .push(RealtimeEvent::UserOnline("u2".to_string()), 10)
            .is_none());

        channel.open("u1".to_string());
        assert_eq!(
            channel.push(RealtimeEvent::UserOnline("u2".to_string()), 10),
            Some(1)
        );

        assert!(channel.close());
        assert!(channel
            .push(RealtimeEvent::UserOffline("u2".to_string()), 10)
            .is_none());
        assert!(channel.events.is_empty());
    }

    #[test]
    fn test_queue_is_bounded_and_drops_oldest() {
        let mut channel = open_channel();

        for i in 0..5 {
            channel.push(RealtimeEvent::UserOnline(format!("u{i}")), 3);
        }

        let sequences: Vec<u64> = channel.events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![3, 4, 5]);
        assert_eq!(channel.dropped, 2);
    }

    #[test]
    fn test_events_after_and_acknowledge() {
        let mut channel = open_channel();

        for i in 0..4 {
            channel.push(RealtimeEvent::UserOnline(format!("u{i}")), 10);
        }

        let after: Vec<u64> = channel.events_after(2).iter().map(|e| e.sequence).collect();
        assert_eq!(after, vec![3, 4]);

        assert_eq!(channel.acknowledge(3), 3);
        assert_eq!(channel.events.len(), 1);
        assert!(channel.events_after(4).is_empty());
    }

    #[test]
    fn test_reopen_for_another_user_drops_queued_events() {
        let mut channel = open_channel();
        channel.push(RealtimeEvent::UserOnline("u2".to_string()), 10);

        channel.open("u1".to_string());
        assert_eq!(channel.events.len(), 1);

        channel.open("u9".to_string());
        assert!(channel.events.is_empty());
        assert_eq!(channel.user_id.as_deref(), Some("u9"));
    }
}
