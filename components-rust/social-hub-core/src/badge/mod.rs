use crate::notification::{send_notification, NewNotification, NotificationKind};
use golem_rust::{agent_definition, agent_implementation, Schema};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Lifetime action count needed for each badge level, lowest first.
pub const MILESTONES: [Milestone; 5] = [
    Milestone { count: 5, level: 1, title: "Bronze" },
    Milestone { count: 10, level: 2, title: "Silver" },
    Milestone { count: 25, level: 3, title: "Gold" },
    Milestone { count: 50, level: 4, title: "Platinum" },
    Milestone { count: 250, level: 5, title: "Diamond" },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Milestone {
    pub count: u32,
    pub level: u8,
    pub title: &'static str,
}

#[derive(Schema, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BadgeCategory {
    Post,
    Comment,
    Like,
    Friend,
    Reply,
    Share,
}

/// Per-category naming used to render a badge.
struct CategoryInfo {
    name: &'static str,
    action: &'static str,
    icon: &'static str,
}

impl BadgeCategory {
    fn info(&self) -> CategoryInfo {
        match self {
            BadgeCategory::Post => CategoryInfo {
                name: "Storyteller",
                action: "posts published",
                icon: "post",
            },
            BadgeCategory::Comment => CategoryInfo {
                name: "Commentator",
                action: "comments written",
                icon: "comment",
            },
            BadgeCategory::Like => CategoryInfo {
                name: "Cheerleader",
                action: "likes given",
                icon: "like",
            },
            BadgeCategory::Friend => CategoryInfo {
                name: "Connector",
                action: "friends made",
                icon: "friend",
            },
            BadgeCategory::Reply => CategoryInfo {
                name: "Conversationalist",
                action: "replies written",
                icon: "reply",
            },
            BadgeCategory::Share => CategoryInfo {
                name: "Amplifier",
                action: "posts shared",
                icon: "share",
            },
        }
    }
}

impl Display for BadgeCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.info().icon)
    }
}

/// Highest milestone reached by `count`, if any.
pub fn milestone_for(count: u32) -> Option<&'static Milestone> {
    MILESTONES.iter().rev().find(|m| count >= m.count)
}

#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    pub badge_id: String,
    pub owner_id: String,
    pub category: BadgeCategory,
    pub level: u8,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub criteria: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Badge {
    fn render(&mut self, milestone: &Milestone) {
        let info = self.category.info();
        self.level = milestone.level;
        self.name = format!("{} {}", milestone.title, info.name);
        self.description = format!("Reached {} {}", milestone.count, info.action);
        self.icon = format!("{}-{}.svg", info.icon, milestone.title.to_lowercase());
        self.criteria = format!("{} {}", milestone.count, info.action);
    }
}

#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionCounter {
    pub category: BadgeCategory,
    pub count: u32,
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct Badges {
    pub user_id: String,
    pub counters: Vec<ActionCounter>,
    pub badges: Vec<Badge>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Badges {
    fn new(user_id: String) -> Self {
        let now = chrono::Utc::now();
        Badges {
            user_id,
            counters: Vec::new(),
            badges: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn count(&self, category: BadgeCategory) -> u32 {
        self.counters
            .iter()
            .find(|c| c.category == category)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    pub fn level(&self, category: BadgeCategory) -> u8 {
        self.badges
            .iter()
            .find(|b| b.category == category)
            .map(|b| b.level)
            .unwrap_or(0)
    }

    /// Counts one qualifying action and upserts the category badge when a higher
    /// milestone is reached. Returns the badge only when it was awarded or escalated.
    fn record_action(&mut self, category: BadgeCategory) -> Option<Badge> {
        let now = chrono::Utc::now();
        self.updated_at = now;

        let count = match self.counters.iter_mut().find(|c| c.category == category) {
            Some(counter) => {
                counter.count = counter.count.saturating_add(1);
                counter.count
            }
            None => {
                self.counters.push(ActionCounter { category, count: 1 });
                1
            }
        };

        let milestone = milestone_for(count)?;
        if milestone.level <= self.level(category) {
            return None;
        }

        let badge = match self.badges.iter_mut().find(|b| b.category == category) {
            Some(badge) => badge,
            None => {
                self.badges.push(Badge {
                    badge_id: uuid::Uuid::new_v4().to_string(),
                    owner_id: self.user_id.clone(),
                    category,
                    level: 0,
                    name: String::new(),
                    description: String::new(),
                    icon: String::new(),
                    criteria: String::new(),
                    created_at: now,
                    updated_at: now,
                });
                self.badges.last_mut()?
            }
        };
        badge.render(milestone);
        badge.updated_at = now;

        Some(badge.clone())
    }

    fn sorted_badges(&self) -> Vec<Badge> {
        let mut badges = self.badges.clone();
        badges.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        badges
    }
}

#[agent_definition]
trait BadgesAgent {
    fn new(id: String) -> Self;

    fn record_action(&mut self, category: BadgeCategory) -> Option<Badge>;

    fn get_badges(&self) -> Vec<Badge>;

    fn get_action_count(&self, category: BadgeCategory) -> u32;
}

struct BadgesAgentImpl {
    _id: String,
    state: Option<Badges>,
}

impl BadgesAgentImpl {
    fn get_state(&mut self) -> &mut Badges {
        self.state.get_or_insert(Badges::new(self._id.clone()))
    }

    fn with_state<T>(&mut self, f: impl FnOnce(&mut Badges) -> T) -> T {
        f(self.get_state())
    }
}

#[agent_implementation]
impl BadgesAgent for BadgesAgentImpl {
    fn new(id: String) -> Self {
        BadgesAgentImpl {
            _id: id,
            state: None,
        }
    }

    fn record_action(&mut self, category: BadgeCategory) -> Option<Badge> {
        let badge = self.with_state(|state| state.record_action(category));

        if let Some(badge) = &badge {
            log::info!(
                "badge earned - user id: {}, category: {category}, level: {}",
                badge.owner_id,
                badge.level
            );
            send_notification(NewNotification {
                sender_id: badge.owner_id.clone(),
                receiver_id: badge.owner_id.clone(),
                kind: NotificationKind::BadgeEarned,
                description: format!("You earned the {} badge", badge.name),
                link_id: badge.badge_id.clone(),
                content_id: None,
            });
        }

        badge
    }

    fn get_badges(&self) -> Vec<Badge> {
        self.state
            .as_ref()
            .map(|state| state.sorted_badges())
            .unwrap_or_default()
    }

    fn get_action_count(&self, category: BadgeCategory) -> u32 {
        self.state
            .as_ref()
            .map(|state| state.count(category))
            .unwrap_or(0)
    }

    async fn load_snapshot(&mut self, bytes: Vec<u8>) -> Result<(), String> {
        let data: Option<Badges> = crate::common::snapshot::deserialize(&bytes)?;
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
    fn test_milestone_for() {
        assert!(milestone_for(0).is_none());
        assert!(milestone_for(4).is_none());
        assert_eq!(milestone_for(5).unwrap().level, 1);
        assert_eq!(milestone_for(9).unwrap().level, 1);
        assert_eq!(milestone_for(10).unwrap().level, 2);
        assert_eq!(milestone_for(49).unwrap().level, 3);
        assert_eq!(milestone_for(250).unwrap().level, 5);
        assert_eq!(milestone_for(10_000).unwrap().level, 5);
    }

    #[test]
    fn test_badge_awarded_exactly_at_milestones() {
        let mut badges = Badges::new("u1".to_string());
        let mut awarded_at = vec![];

        for i in 1..=260u32 {
            if let Some(badge) = badges.record_action(BadgeCategory::Comment) {
                awarded_at.push((i, badge.level));
            }
        }

        assert_eq!(
            awarded_at,
            vec![(5, 1), (10, 2), (25, 3), (50, 4), (250, 5)]
        );
        assert_eq!(badges.count(BadgeCategory::Comment), 260);
        // one row per category
        assert_eq!(badges.badges.len(), 1);
    }

    #[test]
    fn test_badge_level_never_regresses() {
        let mut badges = Badges::new("u1".to_string());
        let mut previous = 0;

        for _ in 0..60 {
            badges.record_action(BadgeCategory::Like);
            let level = badges.level(BadgeCategory::Like);
            assert!(level >= previous);
            previous = level;
        }

        assert_eq!(previous, 4);
    }

    #[test]
    fn test_categories_are_independent() {
        let mut badges = Badges::new("u1".to_string());

        for _ in 0..5 {
            badges.record_action(BadgeCategory::Post);
        }
        for _ in 0..4 {
            badges.record_action(BadgeCategory::Share);
        }

        assert_eq!(badges.level(BadgeCategory::Post), 1);
        assert_eq!(badges.level(BadgeCategory::Share), 0);
        assert_eq!(badges.badges.len(), 1);
    }

    #[test]
    fn test_badge_rendering() {
        let mut badges = Badges::new("u1".to_string());
        let mut last = None;
        for _ in 0..10 {
            if let Some(badge) = badges.record_action(BadgeCategory::Friend) {
                last = Some(badge);
            }
        }

        let badge = last.unwrap();
        assert_eq!(badge.owner_id, "u1");
        assert_eq!(badge.name, "Silver Connector");
        assert_eq!(badge.icon, "friend-silver.svg");
        assert_eq!(badge.criteria, "10 friends made");
    }
}
