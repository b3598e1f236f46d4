use crate::realtime::{RealtimeChannelAgentClient, RealtimeEvent};
use crate::user::UserAgentClient;
use golem_rust::{agent_definition, agent_implementation, Schema};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Proof of one registration. Disconnecting with an outdated token is a no-op.
#[derive(Schema, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub user_id: String,
    pub channel_id: String,
    pub generation: u64,
}

#[derive(Schema, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBinding {
    pub user_id: String,
    pub channel_id: String,
    pub generation: u64,
    pub registered_at: chrono::DateTime<chrono::Utc>,
}

impl ChannelBinding {
    fn token(&self) -> SessionToken {
        SessionToken {
            user_id: self.user_id.clone(),
            channel_id: self.channel_id.clone(),
            generation: self.generation,
        }
    }
}

struct Registration {
    token: SessionToken,
    replaced: Option<ChannelBinding>,
    evicted: Vec<ChannelBinding>,
}

/// At most one live channel per user and one user per channel, each binding
/// stamped with a generation that increases on every registration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PresenceRegistry {
    bindings: HashMap<String, ChannelBinding>,
    next_generation: u64,
}

impl PresenceRegistry {
    /// Binds `channel_id` to the user, replacing any previous binding of the user.
    /// Bindings of other users to the same channel are evicted.
    fn register(&mut self, user_id: String, channel_id: String) -> Registration {
        self.next_generation += 1;

        let evicted_ids: Vec<String> = self
            .bindings
            .values()
            .filter(|b| b.channel_id == channel_id && b.user_id != user_id)
            .map(|b| b.user_id.clone())
            .collect();
        let evicted = evicted_ids
            .iter()
            .filter_map(|id| self.bindings.remove(id))
            .collect();

        let binding = ChannelBinding {
            user_id: user_id.clone(),
            channel_id,
            generation: self.next_generation,
            registered_at: chrono::Utc::now(),
        };
        let token = binding.token();
        let replaced = self.bindings.insert(user_id, binding);

        Registration {
            token,
            replaced,
            evicted,
        }
    }

    /// Removes the binding matching both channel and generation, found by value.
    fn disconnect(&mut self, channel_id: &str, generation: u64) -> Option<ChannelBinding> {
        let user_id = self
            .bindings
            .values()
            .find(|b| b.channel_id == channel_id && b.generation == generation)
            .map(|b| b.user_id.clone())?;

        self.bindings.remove(&user_id)
    }

    fn binding(&self, user_id: &str) -> Option<&ChannelBinding> {
        self.bindings.get(user_id)
    }

    fn is_bound(&self, channel_id: &str) -> bool {
        self.bindings.values().any(|b| b.channel_id == channel_id)
    }

    fn is_online(&self, user_id: &str) -> bool {
        self.bindings.contains_key(user_id)
    }
}

#[agent_definition]
trait PresenceAgent {
    fn new() -> Self;

    fn register(&mut self, user_id: String, channel_id: String) -> SessionToken;

    fn disconnect(&mut self, channel_id: String, generation: u64) -> bool;

    fn deliver(&mut self, user_id: String, event: RealtimeEvent) -> bool;

    fn deliver_many(&mut self, user_ids: Vec<String>, event: RealtimeEvent) -> u32;

    fn get_session(&self, user_id: String) -> Option<SessionToken>;

    fn is_online(&self, user_id: String) -> bool;

    fn get_online(&self, user_ids: Vec<String>) -> Vec<String>;
}

struct PresenceAgentImpl {
    state: PresenceRegistry,
}

impl PresenceAgentImpl {
    fn push(&self, user_id: &str, event: RealtimeEvent) -> bool {
        match self.state.binding(user_id) {
            Some(binding) => {
                RealtimeChannelAgentClient::get(binding.channel_id.clone()).trigger_push(event);
                true
            }
            None => false,
        }
    }
}

#[agent_implementation]
impl PresenceAgent for PresenceAgentImpl {
    fn new() -> Self {
        PresenceAgentImpl {
            state: PresenceRegistry::default(),
        }
    }

    fn register(&mut self, user_id: String, channel_id: String) -> SessionToken {
        let Registration {
            token,
            replaced,
            evicted,
        } = self.state.register(user_id.clone(), channel_id.clone());

        log::info!(
            "register - user id: {user_id}, channel id: {channel_id}, generation: {}",
            token.generation
        );

        if let Some(replaced) = replaced {
            if replaced.channel_id != channel_id {
                log::info!(
                    "register - user id: {user_id}, replaced channel id: {}, generation: {}",
                    replaced.channel_id,
                    replaced.generation
                );
                RealtimeChannelAgentClient::get(replaced.channel_id).trigger_close();
            }
        }

        for binding in evicted {
            log::info!(
                "register - channel id: {channel_id}, evicted user id: {}, generation: {}",
                binding.user_id,
                binding.generation
            );
            UserAgentClient::get(binding.user_id).trigger_set_online(false);
        }

        RealtimeChannelAgentClient::get(channel_id).trigger_open(user_id.clone());
        UserAgentClient::get(user_id).trigger_set_online(true);

        token
    }

    fn disconnect(&mut self, channel_id: String, generation: u64) -> bool {
        let removed = self.state.disconnect(&channel_id, generation);

        if !self.state.is_bound(&channel_id) {
            RealtimeChannelAgentClient::get(channel_id.clone()).trigger_close();
        }

        match removed {
            Some(binding) => {
                log::info!(
                    "disconnect - user id: {}, channel id: {channel_id}, generation: {generation}",
                    binding.user_id
                );
                UserAgentClient::get(binding.user_id).trigger_set_online(false);
                true
            }
            None => {
                log::debug!(
                    "disconnect - channel id: {channel_id}, generation: {generation}, stale session"
                );
                false
            }
        }
    }

    fn deliver(&mut self, user_id: String, event: RealtimeEvent) -> bool {
        let delivered = self.push(&user_id, event.clone());
        log::debug!("deliver - user id: {user_id}, event: {event}, delivered: {delivered}");
        delivered
    }

    fn deliver_many(&mut self, user_ids: Vec<String>, event: RealtimeEvent) -> u32 {
        let mut delivered = 0;
        for user_id in user_ids.iter() {
            if self.push(user_id, event.clone()) {
                delivered += 1;
            }
        }

        log::debug!(
            "deliver many - users: {}, event: {event}, delivered: {delivered}",
            user_ids.len()
        );
        delivered
    }

    fn get_session(&self, user_id: String) -> Option<SessionToken> {
        self.state.binding(&user_id).map(|b| b.token())
    }

    fn is_online(&self, user_id: String) -> bool {
        self.state.is_online(&user_id)
    }

    fn get_online(&self, user_ids: Vec<String>) -> Vec<String> {
        user_ids
            .into_iter()
            .filter(|id| self.state.is_online(id))
            .collect()
    }

    async fn load_snapshot(&mut self, bytes: Vec<u8>) -> Result<(), String> {
        let data: PresenceRegistry = crate::common::snapshot::deserialize(&bytes)?;
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
    fn test_register_then_disconnect_removes_binding() {
        let mut registry = PresenceRegistry::default();

        let registration = registry.register("u1".to_string(), "c1".to_string());
        assert!(registration.replaced.is_none());
        assert!(registration.evicted.is_empty());
        let token = registration.token;
        assert!(registry.is_online("u1"));

        let removed = registry.disconnect(&token.channel_id, token.generation);
        assert_eq!(removed.map(|b| b.user_id), Some("u1".to_string()));
        assert!(!registry.is_online("u1"));
    }

    #[test]
    fn test_stale_disconnect_keeps_newer_session() {
        let mut registry = PresenceRegistry::default();

        let first = registry.register("u1".to_string(), "c1".to_string()).token;
        let registration = registry.register("u1".to_string(), "c2".to_string());
        let second = registration.token;

        assert_eq!(registration.replaced.map(|b| b.channel_id), Some("c1".to_string()));
        assert!(second.generation > first.generation);

        // first session goes away after being replaced
        assert!(registry
            .disconnect(&first.channel_id, first.generation)
            .is_none());

        let binding = registry.binding("u1").unwrap();
        assert_eq!(binding.channel_id, "c2");
        assert_eq!(binding.generation, second.generation);
    }

    #[test]
    fn test_reregistering_same_channel_invalidates_old_generation() {
        let mut registry = PresenceRegistry::default();

        let first = registry.register("u1".to_string(), "c1".to_string()).token;
        let registration = registry.register("u1".to_string(), "c1".to_string());
        let second = registration.token;

        assert!(registration.evicted.is_empty());

        assert!(registry.disconnect("c1", first.generation).is_none());
        assert!(registry.is_online("u1"));
        assert!(registry.disconnect("c1", second.generation).is_some());
        assert!(!registry.is_bound("c1"));
    }

    #[test]
    fn test_bindings_are_per_user() {
        let mut registry = PresenceRegistry::default();

        let a = registry.register("a".to_string(), "ca".to_string()).token;
        registry.register("b".to_string(), "cb".to_string());

        registry.disconnect(&a.channel_id, a.generation);

        assert!(!registry.is_online("a"));
        assert!(registry.is_online("b"));
        assert!(registry.is_bound("cb"));
    }

    #[test]
    fn test_channel_taken_over_by_another_user() {
        let mut registry = PresenceRegistry::default();

        let x = registry.register("x".to_string(), "c1".to_string()).token;
        let registration = registry.register("y".to_string(), "c1".to_string());

        let evicted: Vec<String> = registration.evicted.iter().map(|b| b.user_id.clone()).collect();
        assert_eq!(evicted, vec!["x"]);
        assert!(registration.replaced.is_none());

        assert!(!registry.is_online("x"));
        assert!(registry.binding("x").is_none());
        assert_eq!(registry.binding("y").map(|b| b.channel_id.as_str()), Some("c1"));

        // the evicted session cannot tear down the new owner of the channel
        assert!(registry.disconnect("c1", x.generation).is_none());
        assert!(registry.is_online("y"));
    }
}
