use crate::badge::{BadgeCategory, BadgesAgentClient};
use crate::common::error::Error;
use crate::common::{pagination, query};
use crate::media::{upload_image, ImageUpload};
use crate::notification::{send_notification, NewNotification, NotificationKind};
use crate::presence::PresenceAgentClient;
use crate::realtime::RealtimeEvent;
use crate::user_timeline::UserTimelineAgentClient;
use email_address::EmailAddress;
use futures::future::join_all;
use golem_rust::{agent_definition, agent_implementation, Schema};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

const MAX_NAME_LENGTH: usize = 20;
const MIN_FIRST_NAME_LENGTH: usize = 2;
const MAX_USERNAME_LENGTH: usize = 20;
const MAX_BIO_LENGTH: usize = 500;

/// Friendship edge as seen from the owning user.
#[derive(Schema, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FriendshipStatus {
    OutgoingPending,
    IncomingPending,
    Accepted,
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct Friendship {
    pub user_id: String,
    pub status: FriendshipStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Schema, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FriendRequestOutcome {
    Requested,
    Accepted,
}

#[derive(Schema, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialLinks {
    pub facebook: Option<String>,
    pub instagram: Option<String>,
    pub linkedin: Option<String>,
    pub x: Option<String>,
    pub youtube: Option<String>,
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub gender: Option<String>,
    pub birthdate: Option<String>,
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub username: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub gender: Option<String>,
    pub birthdate: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub occupation: Option<String>,
    pub links: SocialLinks,
}

#[derive(Schema, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileImage {
    Picture,
    Background,
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct ProfileImageUpdated {
    pub url: Option<String>,
    pub warnings: Vec<String>,
}

/// Directory entry, the public face of a user.
#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub picture_url: Option<String>,
    pub verified: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub gender: Option<String>,
    pub birthdate: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub occupation: Option<String>,
    pub picture_url: Option<String>,
    pub background_url: Option<String>,
    pub links: SocialLinks,
    pub verified: bool,
    pub online: bool,
    pub password_changed_at: chrono::DateTime<chrono::Utc>,
    pub friends: HashMap<String, Friendship>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

fn validate_username(username: &str) -> Result<(), Error> {
    let length = username.chars().count();
    if length == 0 || length > MAX_USERNAME_LENGTH {
        Err(Error::validation(format!(
            "Username must have 1 to {MAX_USERNAME_LENGTH} characters"
        )))
    } else if username.chars().any(char::is_whitespace) {
        Err(Error::validation("Username must not contain whitespace"))
    } else {
        Ok(())
    }
}

fn validate_names(first_name: &str, last_name: Option<&str>) -> Result<(), Error> {
    let first_length = first_name.trim().chars().count();
    if !(MIN_FIRST_NAME_LENGTH..=MAX_NAME_LENGTH).contains(&first_length) {
        return Err(Error::validation(format!(
            "First name must have {MIN_FIRST_NAME_LENGTH} to {MAX_NAME_LENGTH} characters"
        )));
    }
    if last_name.is_some_and(|name| name.chars().count() > MAX_NAME_LENGTH) {
        return Err(Error::validation(format!(
            "Last name must have at most {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(())
}

fn validate_email(email: Option<&str>) -> Result<(), Error> {
    let _ = email
        .map(|email| {
            EmailAddress::from_str(email).map_err(|e| Error::validation(format!("Invalid email: {e}")))
        })
        .transpose()?;
    Ok(())
}

impl User {
    fn new(user_id: String, new_user: NewUser) -> Result<Self, Error> {
        validate_username(&new_user.username)?;
        validate_names(&new_user.first_name, new_user.last_name.as_deref())?;
        validate_email(new_user.email.as_deref())?;

        let now = chrono::Utc::now();
        Ok(User {
            user_id,
            username: new_user.username,
            first_name: new_user.first_name.trim().to_string(),
            last_name: new_user.last_name,
            email: new_user.email,
            gender: new_user.gender,
            birthdate: new_user.birthdate,
            bio: None,
            location: None,
            occupation: None,
            picture_url: None,
            background_url: None,
            links: SocialLinks::default(),
            verified: false,
            online: false,
            password_changed_at: now,
            friends: HashMap::new(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            picture_url: self.picture_url.clone(),
            verified: self.verified,
            created_at: self.created_at,
        }
    }

    pub fn display_name(&self) -> String {
        match &self.last_name {
            Some(last_name) if !last_name.is_empty() => format!("{} {}", self.first_name, last_name),
            _ => self.first_name.clone(),
        }
    }

    fn ensure_self(&self, actor: &str) -> Result<(), Error> {
        if actor == self.user_id {
            Ok(())
        } else {
            Err(Error::forbidden("Only the account owner can do this"))
        }
    }

    fn apply_profile_update(&mut self, update: ProfileUpdate) -> Result<(), Error> {
        validate_username(&update.username)?;
        validate_names(&update.first_name, update.last_name.as_deref())?;
        validate_email(update.email.as_deref())?;
        if update
            .bio
            .as_ref()
            .is_some_and(|bio| bio.chars().count() > MAX_BIO_LENGTH)
        {
            return Err(Error::validation(format!(
                "Bio must have at most {MAX_BIO_LENGTH} characters"
            )));
        }

        self.username = update.username;
        self.first_name = update.first_name.trim().to_string();
        self.last_name = update.last_name;
        self.email = update.email;
        self.gender = update.gender;
        self.birthdate = update.birthdate;
        self.bio = update.bio;
        self.location = update.location;
        self.occupation = update.occupation;
        self.links = update.links;
        self.updated_at = chrono::Utc::now();
        Ok(())
    }

    fn mark_password_changed(&mut self) -> chrono::DateTime<chrono::Utc> {
        let now = chrono::Utc::now();
        self.password_changed_at = now;
        self.updated_at = now;
        now
    }

    fn upsert_friendship(&mut self, user_id: &str, status: FriendshipStatus) {
        let now = chrono::Utc::now();
        match self.friends.get_mut(user_id) {
            Some(friendship) => {
                friendship.status = status;
                friendship.updated_at = now;
            }
            None => {
                self.friends.insert(
                    user_id.to_string(),
                    Friendship {
                        user_id: user_id.to_string(),
                        status,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        self.updated_at = now;
    }

    /// Sends a request to `target`. A pending request from `target` is accepted instead,
    /// so the pair never holds two edges.
    fn request_friend(&mut self, target: &str) -> Result<FriendRequestOutcome, Error> {
        if target == self.user_id {
            return Err(Error::validation("Cannot befriend yourself"));
        }
        match self.friends.get(target).map(|f| f.status) {
            None => {
                self.upsert_friendship(target, FriendshipStatus::OutgoingPending);
                Ok(FriendRequestOutcome::Requested)
            }
            Some(FriendshipStatus::IncomingPending) => {
                self.upsert_friendship(target, FriendshipStatus::Accepted);
                Ok(FriendRequestOutcome::Accepted)
            }
            Some(FriendshipStatus::OutgoingPending) => {
                Err(Error::conflict("Friend request already sent"))
            }
            Some(FriendshipStatus::Accepted) => Err(Error::conflict("Already friends")),
        }
    }

    /// Mirror side of `request_friend`. Crossed requests resolve to `Accepted` on both sides.
    fn receive_friend_request(&mut self, from: &str) -> Result<FriendRequestOutcome, Error> {
        if from == self.user_id {
            return Err(Error::validation("Cannot befriend yourself"));
        }
        match self.friends.get(from).map(|f| f.status) {
            None | Some(FriendshipStatus::IncomingPending) => {
                self.upsert_friendship(from, FriendshipStatus::IncomingPending);
                Ok(FriendRequestOutcome::Requested)
            }
            Some(FriendshipStatus::OutgoingPending) => {
                self.upsert_friendship(from, FriendshipStatus::Accepted);
                Ok(FriendRequestOutcome::Accepted)
            }
            Some(FriendshipStatus::Accepted) => Ok(FriendRequestOutcome::Accepted),
        }
    }

    fn accept_friend_request(&mut self, from: &str) -> Result<(), Error> {
        match self.friends.get(from).map(|f| f.status) {
            Some(FriendshipStatus::IncomingPending) => {
                self.upsert_friendship(from, FriendshipStatus::Accepted);
                Ok(())
            }
            Some(FriendshipStatus::Accepted) => Err(Error::conflict("Already friends")),
            _ => Err(Error::not_found("Friend request not found")),
        }
    }

    /// Mirror side of `accept_friend_request`. Returns true when the edge changed.
    fn friend_request_accepted(&mut self, by: &str) -> Result<bool, Error> {
        match self.friends.get(by).map(|f| f.status) {
            Some(FriendshipStatus::OutgoingPending) | Some(FriendshipStatus::IncomingPending) => {
                self.upsert_friendship(by, FriendshipStatus::Accepted);
                Ok(true)
            }
            Some(FriendshipStatus::Accepted) => Ok(false),
            None => Err(Error::not_found("Friend request not found")),
        }
    }

    fn remove_friend(&mut self, other: &str) -> Result<FriendshipStatus, Error> {
        match self.friends.remove(other) {
            Some(friendship) => {
                self.updated_at = chrono::Utc::now();
                Ok(friendship.status)
            }
            None => Err(Error::not_found("Friendship not found")),
        }
    }

    pub fn is_friend(&self, other: &str) -> bool {
        self.friends
            .get(other)
            .is_some_and(|f| f.status == FriendshipStatus::Accepted)
    }

    pub fn friend_ids(&self) -> HashSet<String> {
        self.friends
            .values()
            .filter(|f| f.status == FriendshipStatus::Accepted)
            .map(|f| f.user_id.clone())
            .collect()
    }

    fn friendships_with_status(&self, status: FriendshipStatus) -> Vec<Friendship> {
        let mut result: Vec<Friendship> = self
            .friends
            .values()
            .filter(|f| f.status == status)
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        result
    }
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct FriendsPage {
    pub friends: Vec<Friendship>,
    pub count: u32,
}

#[agent_definition]
trait UserAgent {
    fn new(id: String) -> Self;

    fn get_user(&self) -> Option<User>;

    async fn register(&mut self, new_user: NewUser) -> Result<User, Error>;

    async fn update_profile(&mut self, actor: String, update: ProfileUpdate) -> Result<User, Error>;

    async fn set_profile_image(
        &mut self,
        actor: String,
        kind: ProfileImage,
        image: ImageUpload,
    ) -> Result<ProfileImageUpdated, Error>;

    fn mark_password_changed(&mut self, actor: String) -> Result<chrono::DateTime<chrono::Utc>, Error>;

    fn check_session_epoch(&self, epoch: chrono::DateTime<chrono::Utc>) -> Result<bool, Error>;

    fn set_online(&mut self, online: bool) -> Result<(), Error>;

    async fn send_friend_request(
        &mut self,
        actor: String,
        target: String,
    ) -> Result<FriendRequestOutcome, Error>;

    fn receive_friend_request(&mut self, from: String) -> Result<FriendRequestOutcome, Error>;

    fn accept_friend_request(&mut self, actor: String, from: String) -> Result<Friendship, Error>;

    fn friend_request_accepted(&mut self, by: String) -> Result<(), Error>;

    fn remove_friend(&mut self, actor: String, other: String) -> Result<(), Error>;

    fn friend_removed(&mut self, other: String) -> Result<(), Error>;

    fn get_relationship(&self, other: String) -> Option<FriendshipStatus>;

    fn get_friend_ids(&self) -> HashSet<String>;

    fn get_friends(&self, page: u32) -> Result<FriendsPage, Error>;

    fn get_friend_requests(&self, actor: String) -> Result<Vec<Friendship>, Error>;
}

struct UserAgentImpl {
    _id: String,
    state: Option<User>,
}

impl UserAgentImpl {
    fn registered(&mut self) -> Result<&mut User, Error> {
        self.state
            .as_mut()
            .ok_or_else(|| Error::not_found("User not exists"))
    }

    fn with_registered<T>(&mut self, f: impl FnOnce(&mut User) -> Result<T, Error>) -> Result<T, Error> {
        f(self.registered()?)
    }
}

/// Side effects of one side's edge turning `Accepted`.
fn friendship_accepted(user_id: &str, friend_id: &str) {
    BadgesAgentClient::get(user_id.to_string()).trigger_record_action(BadgeCategory::Friend);
    UserTimelineAgentClient::get(user_id.to_string()).trigger_backfill_from(friend_id.to_string());
}

#[agent_implementation]
impl UserAgent for UserAgentImpl {
    fn new(id: String) -> Self {
        UserAgentImpl {
            _id: id,
            state: None,
        }
    }

    fn get_user(&self) -> Option<User> {
        self.state.clone()
    }

    async fn register(&mut self, new_user: NewUser) -> Result<User, Error> {
        if self.state.is_some() {
            return Err(Error::conflict("User already exists"));
        }

        let user = User::new(self._id.clone(), new_user)?;

        UserDirectoryAgentClient::get()
            .upsert_user(user.summary())
            .await?;

        log::info!(
            "register user - user id: {}, username: {}",
            user.user_id,
            user.username
        );

        self.state = Some(user.clone());
        Ok(user)
    }

    async fn update_profile(&mut self, actor: String, update: ProfileUpdate) -> Result<User, Error> {
        let user = self.registered()?;
        user.ensure_self(&actor)?;

        let mut updated = user.clone();
        updated.apply_profile_update(update)?;

        UserDirectoryAgentClient::get()
            .upsert_user(updated.summary())
            .await?;

        log::info!("update profile - user id: {actor}");

        *user = updated.clone();
        Ok(updated)
    }

    async fn set_profile_image(
        &mut self,
        actor: String,
        kind: ProfileImage,
        image: ImageUpload,
    ) -> Result<ProfileImageUpdated, Error> {
        self.registered()?.ensure_self(&actor)?;

        let mut warnings = vec![];
        let url = upload_image(Some(image), &mut warnings).await;

        let user = self.registered()?;
        if let Some(url) = url.clone() {
            match kind {
                ProfileImage::Picture => user.picture_url = Some(url),
                ProfileImage::Background => user.background_url = Some(url),
            }
            user.updated_at = chrono::Utc::now();

            if kind == ProfileImage::Picture {
                UserDirectoryAgentClient::get().trigger_upsert_user(user.summary());
            }
        }

        Ok(ProfileImageUpdated { url, warnings })
    }

    fn mark_password_changed(&mut self, actor: String) -> Result<chrono::DateTime<chrono::Utc>, Error> {
        self.with_registered(|state| {
            state.ensure_self(&actor)?;
            log::info!("password changed - user id: {actor}");
            Ok(state.mark_password_changed())
        })
    }

    fn check_session_epoch(&self, epoch: chrono::DateTime<chrono::Utc>) -> Result<bool, Error> {
        match &self.state {
            Some(state) => Ok(state.password_changed_at == epoch),
            None => Err(Error::not_found("User not exists")),
        }
    }

    fn set_online(&mut self, online: bool) -> Result<(), Error> {
        let result = self.with_registered(|state| {
            let changed = state.online != online;
            state.online = online;
            Ok((changed, state.friendships_with_status(FriendshipStatus::Accepted)))
        });

        match result {
            Ok((changed, friends)) => {
                if changed && !friends.is_empty() {
                    let event = if online {
                        RealtimeEvent::UserOnline(self._id.clone())
                    } else {
                        RealtimeEvent::UserOffline(self._id.clone())
                    };
                    let friend_ids = friends.into_iter().map(|f| f.user_id).collect();
                    PresenceAgentClient::get().trigger_deliver_many(friend_ids, event);
                }
                Ok(())
            }
            Err(err) => {
                log::warn!("set online - user id: {}, online: {online}, error: {err}", self._id);
                Err(err)
            }
        }
    }

    async fn send_friend_request(
        &mut self,
        actor: String,
        target: String,
    ) -> Result<FriendRequestOutcome, Error> {
        self.registered()?.ensure_self(&actor)?;

        if UserDirectoryAgentClient::get()
            .get_user_summary(target.clone())
            .await
            .is_none()
        {
            return Err(Error::not_found("Target user not exists"));
        }

        let state = self.registered()?;
        let outcome = state.request_friend(&target)?;

        log::info!("send friend request - user id: {actor}, target: {target}, outcome: {outcome:?}");

        match outcome {
            FriendRequestOutcome::Requested => {
                UserAgentClient::get(target.clone()).trigger_receive_friend_request(actor.clone());
                send_notification(NewNotification {
                    sender_id: actor.clone(),
                    receiver_id: target,
                    kind: NotificationKind::FriendRequest,
                    description: format!("{} sent you a friend request", state.display_name()),
                    link_id: actor,
                    content_id: None,
                });
            }
            FriendRequestOutcome::Accepted => {
                UserAgentClient::get(target.clone()).trigger_friend_request_accepted(actor.clone());
                friendship_accepted(&actor, &target);
                send_notification(NewNotification {
                    sender_id: actor.clone(),
                    receiver_id: target,
                    kind: NotificationKind::FriendAccepted,
                    description: format!("{} accepted your friend request", state.display_name()),
                    link_id: actor,
                    content_id: None,
                });
            }
        }

        Ok(outcome)
    }

    fn receive_friend_request(&mut self, from: String) -> Result<FriendRequestOutcome, Error> {
        let user_id = self._id.clone();
        self.with_registered(|state| {
            let was_friend = state.is_friend(&from);
            let outcome = state.receive_friend_request(&from)?;
            log::info!("receive friend request - user id: {user_id}, from: {from}, outcome: {outcome:?}");
            if outcome == FriendRequestOutcome::Accepted && !was_friend {
                friendship_accepted(&user_id, &from);
            }
            Ok(outcome)
        })
    }

    fn accept_friend_request(&mut self, actor: String, from: String) -> Result<Friendship, Error> {
        self.with_registered(|state| {
            state.ensure_self(&actor)?;
            state.accept_friend_request(&from)?;

            log::info!("accept friend request - user id: {actor}, from: {from}");

            UserAgentClient::get(from.clone()).trigger_friend_request_accepted(actor.clone());
            friendship_accepted(&actor, &from);
            send_notification(NewNotification {
                sender_id: actor.clone(),
                receiver_id: from.clone(),
                kind: NotificationKind::FriendAccepted,
                description: format!("{} accepted your friend request", state.display_name()),
                link_id: actor.clone(),
                content_id: None,
            });

            state
                .friends
                .get(&from)
                .cloned()
                .ok_or_else(|| Error::not_found("Friend request not found"))
        })
    }

    fn friend_request_accepted(&mut self, by: String) -> Result<(), Error> {
        let user_id = self._id.clone();
        self.with_registered(|state| {
            if state.friend_request_accepted(&by)? {
                log::info!("friend request accepted - user id: {user_id}, by: {by}");
                friendship_accepted(&user_id, &by);
            }
            Ok(())
        })
    }

    fn remove_friend(&mut self, actor: String, other: String) -> Result<(), Error> {
        self.with_registered(|state| {
            state.ensure_self(&actor)?;
            let status = state.remove_friend(&other)?;
            log::info!("remove friend - user id: {actor}, other: {other}, status: {status:?}");
            UserAgentClient::get(other).trigger_friend_removed(actor);
            Ok(())
        })
    }

    fn friend_removed(&mut self, other: String) -> Result<(), Error> {
        self.with_registered(|state| {
            // already gone on this side is fine
            let _ = state.remove_friend(&other);
            Ok(())
        })
    }

    fn get_relationship(&self, other: String) -> Option<FriendshipStatus> {
        self.state
            .as_ref()
            .and_then(|state| state.friends.get(&other).map(|f| f.status))
    }

    fn get_friend_ids(&self) -> HashSet<String> {
        self.state
            .as_ref()
            .map(|state| state.friend_ids())
            .unwrap_or_default()
    }

    fn get_friends(&self, page: u32) -> Result<FriendsPage, Error> {
        match &self.state {
            Some(state) => {
                let friends = state.friendships_with_status(FriendshipStatus::Accepted);
                Ok(FriendsPage {
                    count: friends.len() as u32,
                    friends: pagination::paginate(
                        &friends,
                        page,
                        crate::config::get().friends_page_size,
                    ),
                })
            }
            None => Err(Error::not_found("User not exists")),
        }
    }

    fn get_friend_requests(&self, actor: String) -> Result<Vec<Friendship>, Error> {
        match &self.state {
            Some(state) => {
                state.ensure_self(&actor)?;
                let limit = crate::config::get().friend_requests_limit as usize;
                Ok(state
                    .friendships_with_status(FriendshipStatus::IncomingPending)
                    .into_iter()
                    .take(limit)
                    .collect())
            }
            None => Err(Error::not_found("User not exists")),
        }
    }

    async fn load_snapshot(&mut self, bytes: Vec<u8>) -> Result<(), String> {
        let data: Option<User> = crate::common::snapshot::deserialize(&bytes)?;
        self.state = data;
        Ok(())
    }

    async fn save_snapshot(&self) -> Result<Vec<u8>, String> {
        crate::common::snapshot::serialize(&self.state)
    }
}

#[derive(Schema, Clone, Debug, Default, Serialize, Deserialize)]
pub struct UserDirectory {
    pub users: HashMap<String, UserSummary>,
    pub usernames: HashMap<String, String>,
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct UserSearchResults {
    pub users: Vec<UserSummary>,
    pub count: u32,
}

impl UserDirectory {
    /// Inserts or refreshes an entry. Usernames are unique case-insensitively.
    fn upsert(&mut self, summary: UserSummary) -> Result<(), Error> {
        let key = summary.username.to_lowercase();

        if let Some(owner) = self.usernames.get(&key) {
            if *owner != summary.user_id {
                return Err(Error::conflict("Username exists"));
            }
        }

        if let Some(previous) = self.users.get(&summary.user_id) {
            let previous_key = previous.username.to_lowercase();
            if previous_key != key {
                self.usernames.remove(&previous_key);
            }
        }

        self.usernames.insert(key, summary.user_id.clone());
        self.users.insert(summary.user_id.clone(), summary);
        Ok(())
    }

    /// Matches the first word against first name and username, the second against last name.
    fn search(&self, query: &str) -> Vec<UserSummary> {
        let mut words = query.split_whitespace();
        let first_word = match words.next() {
            Some(word) => word,
            None => return vec![],
        };
        let second_word = words.next();

        let mut result: Vec<UserSummary> = self
            .users
            .values()
            .filter(|u| {
                query::text_matches(&u.first_name, first_word)
                    || query::text_matches(&u.username, first_word)
                    || second_word.is_some_and(|word| {
                        u.last_name
                            .as_deref()
                            .is_some_and(|last_name| query::text_matches(last_name, word))
                    })
            })
            .cloned()
            .collect();

        result.sort_by(|a, b| {
            b.verified
                .cmp(&a.verified)
                .then_with(|| a.first_name.cmp(&b.first_name))
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        result
    }
}

#[agent_definition]
trait UserDirectoryAgent {
    fn new() -> Self;

    fn upsert_user(&mut self, summary: UserSummary) -> Result<(), Error>;

    fn get_user_summary(&self, user_id: String) -> Option<UserSummary>;

    fn get_user_summaries(&self, user_ids: Vec<String>) -> Vec<UserSummary>;

    fn search_users(&self, query: String, page: u32) -> UserSearchResults;
}

struct UserDirectoryAgentImpl {
    state: UserDirectory,
}

#[agent_implementation]
impl UserDirectoryAgent for UserDirectoryAgentImpl {
    fn new() -> Self {
        UserDirectoryAgentImpl {
            state: UserDirectory::default(),
        }
    }

    fn upsert_user(&mut self, summary: UserSummary) -> Result<(), Error> {
        log::debug!(
            "upsert user - user id: {}, username: {}",
            summary.user_id,
            summary.username
        );
        self.state.upsert(summary)
    }

    fn get_user_summary(&self, user_id: String) -> Option<UserSummary> {
        self.state.users.get(&user_id).cloned()
    }

    fn get_user_summaries(&self, user_ids: Vec<String>) -> Vec<UserSummary> {
        user_ids
            .iter()
            .filter_map(|id| self.state.users.get(id).cloned())
            .collect()
    }

    fn search_users(&self, query: String, page: u32) -> UserSearchResults {
        let users = self.state.search(&query);
        log::debug!("search users - query: {query}, matches: {}", users.len());
        UserSearchResults {
            count: users.len() as u32,
            users: pagination::paginate(&users, page, crate::config::get().search_users_page_size),
        }
    }

    async fn load_snapshot(&mut self, bytes: Vec<u8>) -> Result<(), String> {
        self.state = crate::common::snapshot::deserialize(&bytes)?;
        Ok(())
    }

    async fn save_snapshot(&self) -> Result<Vec<u8>, String> {
        crate::common::snapshot::serialize(&self.state)
    }
}

#[agent_definition(mode = "ephemeral")]
trait UserViewAgent {
    fn new() -> Self;

    async fn get_online_friends(&mut self, actor: String, user_id: String) -> Result<Vec<UserSummary>, Error>;
}

struct UserViewAgentImpl {}

pub async fn fetch_users_by_ids(user_ids: &[String]) -> Vec<User> {
    let mut result: Vec<User> = vec![];

    for chunk in user_ids.chunks(10) {
        let clients = chunk
            .iter()
            .map(|user_id| UserAgentClient::get(user_id.clone()))
            .collect::<Vec<_>>();

        let tasks: Vec<_> = clients.iter().map(|client| client.get_user()).collect();
        let responses = join_all(tasks).await;

        result.extend(responses.into_iter().flatten());
    }

    result
}

#[agent_implementation]
impl UserViewAgent for UserViewAgentImpl {
    fn new() -> Self {
        Self {}
    }

    async fn get_online_friends(&mut self, actor: String, user_id: String) -> Result<Vec<UserSummary>, Error> {
        if actor != user_id {
            return Err(Error::forbidden("Only the account owner can do this"));
        }

        let mut friend_ids: Vec<String> = UserAgentClient::get(user_id.clone())
            .get_friend_ids()
            .await
            .into_iter()
            .collect();
        friend_ids.sort();

        log::debug!("get online friends - user id: {user_id}, friends: {}", friend_ids.len());

        let friends = fetch_users_by_ids(&friend_ids).await;

        Ok(friends
            .into_iter()
            .filter(|f| f.online)
            .map(|f| f.summary())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            first_name: "Alice".to_string(),
            last_name: Some("Smith".to_string()),
            email: None,
            gender: None,
            birthdate: None,
        }
    }

    fn create_test_user(id: &str) -> User {
        User::new(id.to_string(), new_user(id)).unwrap()
    }

    fn profile_update(username: &str) -> ProfileUpdate {
        ProfileUpdate {
            username: username.to_string(),
            first_name: "Alicia".to_string(),
            last_name: None,
            email: Some("alicia@example.com".to_string()),
            gender: None,
            birthdate: None,
            bio: Some("hello".to_string()),
            location: None,
            occupation: None,
            links: SocialLinks::default(),
        }
    }

    #[test]
    fn test_user_new_validates_input() {
        assert!(User::new("u1".to_string(), new_user("alice")).is_ok());

        assert!(matches!(
            User::new("u1".to_string(), new_user("")),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            User::new("u1".to_string(), new_user("has space")),
            Err(Error::Validation(_))
        ));

        let mut bad_name = new_user("alice");
        bad_name.first_name = "A".to_string();
        assert!(matches!(
            User::new("u1".to_string(), bad_name),
            Err(Error::Validation(_))
        ));

        let mut bad_email = new_user("alice");
        bad_email.email = Some("not-an-email".to_string());
        assert!(matches!(
            User::new("u1".to_string(), bad_email),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_new_user_is_offline_without_friends() {
        let user = create_test_user("u1");
        assert!(!user.online);
        assert!(user.friends.is_empty());
        assert_eq!(user.display_name(), "Alice Smith");
    }

    #[test]
    fn test_profile_update() {
        let mut user = create_test_user("u1");
        user.apply_profile_update(profile_update("alicia")).unwrap();

        assert_eq!(user.username, "alicia");
        assert_eq!(user.first_name, "Alicia");
        assert_eq!(user.bio.as_deref(), Some("hello"));
        assert_eq!(user.display_name(), "Alicia");

        let mut invalid = profile_update("alicia");
        invalid.bio = Some("x".repeat(MAX_BIO_LENGTH + 1));
        assert!(matches!(
            user.apply_profile_update(invalid),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_ensure_self() {
        let user = create_test_user("u1");
        assert!(user.ensure_self("u1").is_ok());
        assert!(matches!(user.ensure_self("u2"), Err(Error::Forbidden(_))));
    }

    #[test]
    fn test_password_change_moves_session_epoch() {
        let mut user = create_test_user("u1");
        let initial = user.password_changed_at;

        let epoch = user.mark_password_changed();

        assert_eq!(user.password_changed_at, epoch);
        assert!(epoch >= initial);
    }

    #[test]
    fn test_friend_request_then_accept() {
        let mut a = create_test_user("a");
        let mut b = create_test_user("b");

        assert_eq!(a.request_friend("b").unwrap(), FriendRequestOutcome::Requested);
        assert_eq!(
            b.receive_friend_request("a").unwrap(),
            FriendRequestOutcome::Requested
        );

        assert_eq!(a.friends["b"].status, FriendshipStatus::OutgoingPending);
        assert_eq!(b.friends["a"].status, FriendshipStatus::IncomingPending);
        assert!(!a.is_friend("b"));
        assert!(!b.is_friend("a"));

        b.accept_friend_request("a").unwrap();
        assert!(a.friend_request_accepted("b").unwrap());

        assert!(a.is_friend("b"));
        assert!(b.is_friend("a"));
        assert_eq!(a.friend_ids(), HashSet::from(["b".to_string()]));
        assert_eq!(b.friend_ids(), HashSet::from(["a".to_string()]));
    }

    #[test]
    fn test_duplicate_friend_request_conflicts() {
        let mut a = create_test_user("a");

        a.request_friend("b").unwrap();
        assert!(matches!(a.request_friend("b"), Err(Error::Conflict(_))));
        assert_eq!(a.friends.len(), 1);

        assert!(matches!(a.request_friend("a"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_request_against_pending_incoming_accepts() {
        let mut b = create_test_user("b");
        b.receive_friend_request("a").unwrap();

        assert_eq!(b.request_friend("a").unwrap(), FriendRequestOutcome::Accepted);
        assert!(b.is_friend("a"));
        assert_eq!(b.friends.len(), 1);
    }

    #[test]
    fn test_crossed_requests_converge_to_accepted() {
        let mut a = create_test_user("a");
        let mut b = create_test_user("b");

        a.request_friend("b").unwrap();
        b.request_friend("a").unwrap();

        assert_eq!(
            a.receive_friend_request("b").unwrap(),
            FriendRequestOutcome::Accepted
        );
        assert_eq!(
            b.receive_friend_request("a").unwrap(),
            FriendRequestOutcome::Accepted
        );
        assert!(a.is_friend("b"));
        assert!(b.is_friend("a"));
    }

    #[test]
    fn test_accept_without_request_fails() {
        let mut b = create_test_user("b");
        assert!(matches!(
            b.accept_friend_request("a"),
            Err(Error::NotFound(_))
        ));

        let mut a = create_test_user("a");
        a.request_friend("b").unwrap();
        // an outgoing request cannot be accepted by its sender
        assert!(matches!(
            a.accept_friend_request("b"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_friend() {
        let mut a = create_test_user("a");
        a.request_friend("b").unwrap();
        a.friend_request_accepted("b").unwrap();

        assert_eq!(a.remove_friend("b").unwrap(), FriendshipStatus::Accepted);
        assert!(!a.is_friend("b"));
        assert!(matches!(a.remove_friend("b"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_pending_requests_listing() {
        let mut u = create_test_user("u");
        u.receive_friend_request("x").unwrap();
        u.receive_friend_request("y").unwrap();
        u.request_friend("z").unwrap();

        let incoming = u.friendships_with_status(FriendshipStatus::IncomingPending);
        let ids: HashSet<String> = incoming.iter().map(|f| f.user_id.clone()).collect();
        assert_eq!(ids, HashSet::from(["x".to_string(), "y".to_string()]));
    }

    #[test]
    fn test_directory_username_uniqueness() {
        let mut directory = UserDirectory::default();
        let a = create_test_user("a").summary();
        let mut b = create_test_user("b").summary();

        directory.upsert(a.clone()).unwrap();

        b.username = "A".to_string();
        assert!(matches!(directory.upsert(b.clone()), Err(Error::Conflict(_))));

        // the owner may re-upsert its own username
        directory.upsert(a.clone()).unwrap();

        // renaming releases the old username
        let mut renamed = a.clone();
        renamed.username = "alice2".to_string();
        directory.upsert(renamed).unwrap();
        directory.upsert(b).unwrap();

        assert_eq!(directory.usernames.len(), 2);
        assert_eq!(directory.usernames["a"], "b");
    }

    #[test]
    fn test_directory_search_orders_verified_first() {
        let mut directory = UserDirectory::default();

        let mut zed = create_test_user("zed").summary();
        zed.first_name = "Zed".to_string();
        zed.username = "zed_rust".to_string();
        zed.verified = true;

        let mut amy = create_test_user("amy").summary();
        amy.first_name = "Amy".to_string();
        amy.username = "amy_rust".to_string();

        let mut bob = create_test_user("bob").summary();
        bob.first_name = "Bob".to_string();
        bob.username = "bob".to_string();

        directory.upsert(zed).unwrap();
        directory.upsert(amy).unwrap();
        directory.upsert(bob).unwrap();

        let result = directory.search("RUST");
        let ids: Vec<&str> = result.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, vec!["zed", "amy"]);

        assert!(directory.search("   ").is_empty());
    }

    #[test]
    fn test_directory_search_matches_last_name_with_second_word() {
        let mut directory = UserDirectory::default();
        let mut user = create_test_user("u1").summary();
        user.first_name = "John".to_string();
        user.last_name = Some("Doe".to_string());
        user.username = "jd".to_string();
        directory.upsert(user).unwrap();

        assert_eq!(directory.search("nobody doe").len(), 1);
        assert!(directory.search("nobody").is_empty());
    }
}
