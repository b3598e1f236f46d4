use crate::common::error::Error;
use crate::common::{pagination, poll_for_updates, query, Privacy};
use crate::content::{Content, ContentAgentClient};
use crate::user::UserAgentClient;
use crate::user_posts::{PostRef, UserPostsAgentClient};
use crate::visibility::{content_view, ContentView, Viewer};
use futures::future::join_all;
use golem_rust::{agent_definition, agent_implementation, Schema};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};

/// Timeline index entry. `sequence` is the insertion order within one index
/// and only drives update polling.
#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub content_id: String,
    pub owner_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub sequence: u64,
}

#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublicEntry {
    pub entry: FeedEntry,
    pub text: String,
}

/// Position of the last item a reader has seen.
#[derive(Schema, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedCursor {
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub content_id: String,
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct FeedPage {
    pub items: Vec<ContentView>,
    pub next_cursor: Option<FeedCursor>,
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct UserTimeline {
    pub user_id: String,
    pub entries: Vec<FeedEntry>,
    pub next_sequence: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl UserTimeline {
    fn new(user_id: String) -> Self {
        let now = chrono::Utc::now();
        UserTimeline {
            user_id,
            entries: Vec::new(),
            next_sequence: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Keeps the first entry of a content id.
    fn add_entry(&mut self, mut entry: FeedEntry) -> bool {
        if self.entries.iter().any(|e| e.content_id == entry.content_id) {
            return false;
        }

        entry.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push(entry);
        self.updated_at = chrono::Utc::now();
        true
    }

    /// Adds the non-private posts of a new friend. Returns the number of new entries.
    fn backfill(&mut self, owner_id: &str, posts: Vec<PostRef>) -> u32 {
        let mut added = 0;
        for post in posts.into_iter().filter(|p| p.privacy != Privacy::Private) {
            let entry = FeedEntry {
                content_id: post.content_id,
                owner_id: owner_id.to_string(),
                created_at: post.created_at,
                sequence: 0,
            };
            if self.add_entry(entry) {
                added += 1;
            }
        }
        added
    }

    fn remove_entry(&mut self, content_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.content_id != content_id);
        self.updated_at = chrono::Utc::now();
        before != self.entries.len()
    }

    fn entries_after(&self, sequence: u64) -> Vec<FeedEntry> {
        self.entries
            .iter()
            .filter(|e| e.sequence > sequence)
            .cloned()
            .collect()
    }
}

#[agent_definition]
trait UserTimelineAgent {
    fn new(id: String) -> Self;

    fn get_entries(&self) -> Vec<FeedEntry>;

    fn add_entry(&mut self, entry: FeedEntry) -> bool;

    fn remove_entry(&mut self, content_id: String) -> bool;

    async fn backfill_from(&mut self, friend_id: String) -> u32;

    fn get_updates(&self, after_sequence: u64) -> Option<Vec<FeedEntry>>;
}

struct UserTimelineAgentImpl {
    _id: String,
    state: Option<UserTimeline>,
}

impl UserTimelineAgentImpl {
    fn get_state(&mut self) -> &mut UserTimeline {
        self.state
            .get_or_insert(UserTimeline::new(self._id.clone()))
    }

    fn with_state<T>(&mut self, f: impl FnOnce(&mut UserTimeline) -> T) -> T {
        f(self.get_state())
    }
}

#[agent_implementation]
impl UserTimelineAgent for UserTimelineAgentImpl {
    fn new(id: String) -> Self {
        UserTimelineAgentImpl {
            _id: id,
            state: None,
        }
    }

    fn get_entries(&self) -> Vec<FeedEntry> {
        self.state
            .as_ref()
            .map(|state| state.entries.clone())
            .unwrap_or_default()
    }

    fn add_entry(&mut self, entry: FeedEntry) -> bool {
        log::debug!(
            "add entry - user id: {}, content id: {}, owner id: {}",
            self._id,
            entry.content_id,
            entry.owner_id
        );
        self.with_state(|state| state.add_entry(entry))
    }

    fn remove_entry(&mut self, content_id: String) -> bool {
        match self.state.as_mut() {
            Some(state) => state.remove_entry(&content_id),
            None => false,
        }
    }

    async fn backfill_from(&mut self, friend_id: String) -> u32 {
        let posts = UserPostsAgentClient::get(friend_id.clone()).get_posts().await;
        let added = self.with_state(|state| state.backfill(&friend_id, posts));

        log::info!(
            "backfill from - user id: {}, friend id: {friend_id}, added: {added}",
            self._id
        );
        added
    }

    fn get_updates(&self, after_sequence: u64) -> Option<Vec<FeedEntry>> {
        self.state
            .as_ref()
            .map(|state| state.entries_after(after_sequence))
    }

    async fn load_snapshot(&mut self, bytes: Vec<u8>) -> Result<(), String> {
        let data: Option<UserTimeline> = crate::common::snapshot::deserialize(&bytes)?;
        self.state = data;
        Ok(())
    }

    async fn save_snapshot(&self) -> Result<Vec<u8>, String> {
        crate::common::snapshot::serialize(&self.state)
    }
}

/// Bounded index of public roots, oldest evicted first.
#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct PublicTimeline {
    pub entries: Vec<PublicEntry>,
    pub next_sequence: u64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl PublicTimeline {
    fn new() -> Self {
        PublicTimeline {
            entries: Vec::new(),
            next_sequence: 1,
            updated_at: chrono::Utc::now(),
        }
    }

    fn add_entry(&mut self, mut entry: PublicEntry, capacity: usize) -> bool {
        self.updated_at = chrono::Utc::now();

        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.entry.content_id == entry.entry.content_id)
        {
            existing.text = entry.text;
            return false;
        }

        entry.entry.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push(entry);

        if self.entries.len() > capacity.max(1) {
            let excess = self.entries.len() - capacity.max(1);
            self.entries.drain(0..excess);
        }
        true
    }

    fn remove_entry(&mut self, content_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.entry.content_id != content_id);
        self.updated_at = chrono::Utc::now();
        before != self.entries.len()
    }

    /// Matching entries ordered by text, then newest first.
    fn search(&self, matcher: &PostQueryMatcher) -> Vec<FeedEntry> {
        let mut matches: Vec<&PublicEntry> = self
            .entries
            .iter()
            .filter(|e| matcher.matches(&e.entry.owner_id, &e.text))
            .collect();

        matches.sort_by(|a, b| {
            a.text
                .to_lowercase()
                .cmp(&b.text.to_lowercase())
                .then(b.entry.created_at.cmp(&a.entry.created_at))
        });

        matches.into_iter().map(|e| e.entry.clone()).collect()
    }
}

#[agent_definition]
trait PublicTimelineAgent {
    fn new() -> Self;

    fn get_entries(&self) -> Vec<FeedEntry>;

    fn add_entry(&mut self, entry: PublicEntry) -> bool;

    fn remove_entry(&mut self, content_id: String) -> bool;

    fn search(&self, query: String) -> Vec<FeedEntry>;
}

struct PublicTimelineAgentImpl {
    state: PublicTimeline,
}

#[agent_implementation]
impl PublicTimelineAgent for PublicTimelineAgentImpl {
    fn new() -> Self {
        PublicTimelineAgentImpl {
            state: PublicTimeline::new(),
        }
    }

    fn get_entries(&self) -> Vec<FeedEntry> {
        self.state.entries.iter().map(|e| e.entry.clone()).collect()
    }

    fn add_entry(&mut self, entry: PublicEntry) -> bool {
        log::debug!("add public entry - content id: {}", entry.entry.content_id);
        self.state
            .add_entry(entry, crate::config::get().public_index_capacity)
    }

    fn remove_entry(&mut self, content_id: String) -> bool {
        self.state.remove_entry(&content_id)
    }

    fn search(&self, query: String) -> Vec<FeedEntry> {
        let matcher = PostQueryMatcher::new(&query);
        log::debug!("search public entries - query matcher: {matcher}");
        self.state.search(&matcher)
    }

    async fn load_snapshot(&mut self, bytes: Vec<u8>) -> Result<(), String> {
        let data: PublicTimeline = crate::common::snapshot::deserialize(&bytes)?;
        self.state = data;
        Ok(())
    }

    async fn save_snapshot(&self) -> Result<Vec<u8>, String> {
        crate::common::snapshot::serialize(&self.state)
    }
}

#[derive(Clone, Debug)]
struct PostQueryMatcher {
    terms: Vec<String>,
    field_filters: Vec<(String, String)>,
}

impl Display for PostQueryMatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PostQueryMatcher(terms: {:?}, field_filters: {:?})",
            self.terms, self.field_filters
        )
    }
}

impl PostQueryMatcher {
    fn new(query: &str) -> Self {
        let q = query::Query::new(query);

        Self {
            terms: q.terms,
            field_filters: q.field_filters,
        }
    }

    fn matches(&self, owner_id: &str, text: &str) -> bool {
        for (field, value) in self.field_filters.iter() {
            let matches = match field.as_str() {
                "created-by" | "createdby" | "owner" => query::text_exact_matches(owner_id, value),
                "content" | "text" => query::text_matches(text, value),
                _ => false,
            };

            if !matches {
                return false;
            }
        }

        // the free terms form one phrase, like a typed search box
        if self.terms.is_empty() {
            return !self.field_filters.is_empty();
        }

        query::text_matches(text, &self.terms.join(" "))
    }
}

/// Feed order key. Content ids are time-ordered, so equal timestamps still
/// sort by creation across every index.
fn feed_key(entry: &FeedEntry) -> (chrono::DateTime<chrono::Utc>, &str) {
    (entry.created_at, entry.content_id.as_str())
}

/// Merges the reader's own timeline with the public index: duplicates removed,
/// newest first.
pub fn merge_feed(own: Vec<FeedEntry>, public: Vec<FeedEntry>) -> Vec<FeedEntry> {
    let mut seen = HashSet::new();
    let mut merged: Vec<FeedEntry> = own
        .into_iter()
        .chain(public)
        .filter(|e| seen.insert(e.content_id.clone()))
        .collect();

    merged.sort_by(|a, b| feed_key(b).cmp(&feed_key(a)));
    merged
}

/// Index of the first entry strictly older than `cursor`. Works whether or not
/// the cursor item is still present.
fn page_start(entries: &[FeedEntry], cursor: Option<&FeedCursor>) -> usize {
    match cursor {
        None => 0,
        Some(cursor) => {
            let cursor_key = (cursor.created_at, cursor.content_id.as_str());
            entries
                .iter()
                .position(|e| feed_key(e) < cursor_key)
                .unwrap_or(entries.len())
        }
    }
}

/// Matches whose content still exists and is public, in match order.
fn public_matches(matches: Vec<String>, contents: &HashMap<String, Content>) -> Vec<String> {
    matches
        .into_iter()
        .filter(|id| {
            contents
                .get(id)
                .is_some_and(|c| c.privacy == Privacy::Public)
        })
        .collect()
}

pub async fn fetch_contents_by_ids(content_ids: &[String]) -> HashMap<String, Content> {
    let mut result: HashMap<String, Content> = HashMap::new();

    for chunk in content_ids.chunks(10) {
        let clients = chunk
            .iter()
            .map(|content_id| ContentAgentClient::get(content_id.clone()))
            .collect::<Vec<_>>();

        let tasks: Vec<_> = clients.iter().map(|client| client.get_content()).collect();
        let responses = join_all(tasks).await;

        for content in responses.into_iter().flatten() {
            result.insert(content.content_id.clone(), content);
        }
    }

    result
}

/// Views of `content_ids` in the given order, skipping missing or invisible items.
async fn build_views(content_ids: &[String], viewer: &Viewer) -> Vec<ContentView> {
    let contents = fetch_contents_by_ids(content_ids).await;

    let mut original_ids: Vec<String> = contents
        .values()
        .filter_map(|c| c.original_id().map(|id| id.to_string()))
        .filter(|id| !contents.contains_key(id))
        .collect();
    original_ids.sort();
    original_ids.dedup();

    let originals = fetch_contents_by_ids(&original_ids).await;

    content_ids
        .iter()
        .filter_map(|id| contents.get(id))
        .filter_map(|content| {
            let original = content
                .original_id()
                .and_then(|id| contents.get(id).or(originals.get(id)));
            content_view(content, original, viewer)
        })
        .collect()
}

async fn load_viewer(user_id: &str) -> Result<Viewer, Error> {
    let user = UserAgentClient::get(user_id.to_string())
        .get_user()
        .await
        .ok_or(Error::not_found("User not exists"))?;

    Ok(Viewer::new(user_id.to_string(), user.friend_ids()))
}

#[derive(Schema, Clone, Debug, Serialize, Deserialize)]
pub struct PostSearchResults {
    pub posts: Vec<ContentView>,
    pub count: u32,
}

#[agent_definition(mode = "ephemeral")]
trait FeedViewAgent {
    fn new() -> Self;

    async fn get_feed(
        &mut self,
        viewer: String,
        cursor: Option<FeedCursor>,
        size: Option<u32>,
    ) -> Result<FeedPage, Error>;

    async fn get_profile_posts(
        &mut self,
        viewer: String,
        owner: String,
        page: u32,
    ) -> Result<Vec<ContentView>, Error>;

    async fn get_content_view(&mut self, viewer: String, content_id: String) -> Result<ContentView, Error>;

    async fn search_posts(&mut self, viewer: String, query: String, page: u32) -> Result<PostSearchResults, Error>;
}

struct FeedViewAgentImpl {}

#[agent_implementation]
impl FeedViewAgent for FeedViewAgentImpl {
    fn new() -> Self {
        Self {}
    }

    async fn get_feed(
        &mut self,
        viewer: String,
        cursor: Option<FeedCursor>,
        size: Option<u32>,
    ) -> Result<FeedPage, Error> {
        let viewer = load_viewer(&viewer).await?;
        let size = size
            .unwrap_or(crate::config::get().feed_page_size)
            .max(1) as usize;

        let own = UserTimelineAgentClient::get(viewer.user_id.clone())
            .get_entries()
            .await;
        let public = PublicTimelineAgentClient::get().get_entries().await;
        let entries = merge_feed(own, public);

        let mut position = page_start(&entries, cursor.as_ref());

        log::debug!(
            "get feed - user id: {}, entries: {}, start: {position}, size: {size}",
            viewer.user_id,
            entries.len()
        );

        let mut items: Vec<ContentView> = vec![];
        let mut last_seen: Option<&FeedEntry> = None;

        while items.len() < size && position < entries.len() {
            let batch_end = (position + size - items.len()).min(entries.len());
            let batch = &entries[position..batch_end];
            let ids: Vec<String> = batch.iter().map(|e| e.content_id.clone()).collect();

            items.extend(build_views(&ids, &viewer).await);
            last_seen = batch.last();
            position = batch_end;
        }

        let next_cursor = match last_seen {
            Some(entry) if position < entries.len() => Some(FeedCursor {
                created_at: entry.created_at,
                content_id: entry.content_id.clone(),
            }),
            _ => None,
        };

        Ok(FeedPage { items, next_cursor })
    }

    async fn get_profile_posts(
        &mut self,
        viewer: String,
        owner: String,
        page: u32,
    ) -> Result<Vec<ContentView>, Error> {
        let viewer = load_viewer(&viewer).await?;

        let refs: Vec<String> = UserPostsAgentClient::get(owner.clone())
            .get_posts()
            .await
            .into_iter()
            .filter(|p| viewer.can_view(&owner, p.privacy))
            .map(|p| p.content_id)
            .collect();

        let page_ids = pagination::paginate(&refs, page, crate::config::get().profile_page_size);

        log::debug!(
            "get profile posts - viewer id: {}, owner id: {owner}, visible: {}, page: {page}",
            viewer.user_id,
            refs.len()
        );

        Ok(build_views(&page_ids, &viewer).await)
    }

    async fn get_content_view(&mut self, viewer: String, content_id: String) -> Result<ContentView, Error> {
        let viewer = load_viewer(&viewer).await?;

        let content = ContentAgentClient::get(content_id.clone())
            .get_content()
            .await
            .ok_or(Error::not_found(format!("Content not found: {content_id}")))?;

        if !viewer.can_view_content(&content) {
            return Err(Error::forbidden("Content is not visible"));
        }

        let ids = vec![content_id];
        build_views(&ids, &viewer)
            .await
            .into_iter()
            .next()
            .ok_or(Error::not_found("Content not found"))
    }

    async fn search_posts(&mut self, viewer: String, query: String, page: u32) -> Result<PostSearchResults, Error> {
        let viewer = load_viewer(&viewer).await?;

        let matches: Vec<String> = PublicTimelineAgentClient::get()
            .search(query.clone())
            .await
            .into_iter()
            .map(|e| e.content_id)
            .collect();

        let contents = fetch_contents_by_ids(&matches).await;
        let matches = public_matches(matches, &contents);

        let page_ids =
            pagination::paginate(&matches, page, crate::config::get().search_posts_page_size);

        log::debug!(
            "search posts - viewer id: {}, query: {query}, matches: {}",
            viewer.user_id,
            matches.len()
        );

        Ok(PostSearchResults {
            posts: build_views(&page_ids, &viewer).await,
            count: matches.len() as u32,
        })
    }
}

#[agent_definition(mode = "ephemeral")]
trait UserTimelineUpdatesAgent {
    fn new() -> Self;

    async fn get_updates(
        &mut self,
        user_id: String,
        after_sequence: Option<u64>,
        iter_wait_time: Option<u32>,
        max_wait_time: Option<u32>,
    ) -> Option<Vec<FeedEntry>>;
}

struct UserTimelineUpdatesAgentImpl {}

#[agent_implementation]
impl UserTimelineUpdatesAgent for UserTimelineUpdatesAgentImpl {
    fn new() -> Self {
        Self {}
    }

    async fn get_updates(
        &mut self,
        user_id: String,
        after_sequence: Option<u64>,
        iter_wait_time: Option<u32>,
        max_wait_time: Option<u32>,
    ) -> Option<Vec<FeedEntry>> {
        poll_for_updates(
            user_id,
            after_sequence.unwrap_or(0),
            iter_wait_time,
            max_wait_time,
            |user_id, after_sequence| async move {
                let client = UserTimelineAgentClient::get(user_id);
                client.get_updates(after_sequence).await
            },
            "get timeline updates",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(id: &str, minute: u32, sequence: u64) -> FeedEntry {
        FeedEntry {
            content_id: id.to_string(),
            owner_id: "o".to_string(),
            created_at: chrono::Utc
                .with_ymd_and_hms(2024, 1, 1, 10, minute, 0)
                .unwrap(),
            sequence,
        }
    }

    fn ids(entries: &[FeedEntry]) -> Vec<String> {
        entries.iter().map(|e| e.content_id.clone()).collect()
    }

    #[test]
    fn test_timeline_add_dedupes_and_sequences() {
        let mut timeline = UserTimeline::new("u1".to_string());

        assert!(timeline.add_entry(entry("a", 1, 0)));
        assert!(timeline.add_entry(entry("b", 2, 0)));
        assert!(!timeline.add_entry(entry("a", 1, 0)));

        assert_eq!(timeline.entries.len(), 2);
        assert_eq!(ids(&timeline.entries_after(1)), vec!["b"]);

        assert!(timeline.remove_entry("a"));
        assert!(!timeline.remove_entry("a"));
    }

    #[test]
    fn test_merge_feed_orders_and_dedupes() {
        let own = vec![entry("a", 1, 1), entry("b", 3, 2), entry("c", 3, 3)];
        let public = vec![entry("b", 3, 7), entry("d", 2, 8)];

        let merged = merge_feed(own, public);

        assert_eq!(ids(&merged), vec!["c", "b", "d", "a"]);
        // the own timeline copy wins
        assert_eq!(merged[1].sequence, 2);
    }

    #[test]
    fn test_merge_feed_ties_ignore_index_sequences() {
        // own and public sequences come from separate counters
        let own = vec![entry("x1", 5, 1)];
        let public = vec![entry("x2", 5, 1), entry("x0", 5, 9)];

        let merged = merge_feed(own, public);

        assert_eq!(ids(&merged), vec!["x2", "x1", "x0"]);
        assert_eq!(
            ids(&merge_feed(vec![], vec![entry("x0", 5, 9), entry("x1", 5, 1), entry("x2", 5, 1)])),
            ids(&merged)
        );
    }

    #[test]
    fn test_page_start_with_cursor() {
        let entries = vec![entry("d", 4, 4), entry("c", 3, 3), entry("b", 2, 2), entry("a", 1, 1)];

        assert_eq!(page_start(&entries, None), 0);

        let cursor = FeedCursor {
            created_at: entries[1].created_at,
            content_id: "c".to_string(),
        };
        assert_eq!(page_start(&entries, Some(&cursor)), 2);

        // cursor item gone: continue with strictly older items
        let gone = FeedCursor {
            created_at: entries[1].created_at,
            content_id: "c0".to_string(),
        };
        assert_eq!(page_start(&entries, Some(&gone)), 2);
    }

    #[test]
    fn test_page_start_keeps_same_timestamp_items_after_deleted_cursor() {
        let entries = merge_feed(
            vec![entry("t3", 5, 1), entry("t1", 5, 2), entry("old", 4, 3)],
            vec![],
        );

        // the page ended at t2, which was deleted before the next request
        let cursor = FeedCursor {
            created_at: entries[0].created_at,
            content_id: "t2".to_string(),
        };
        let start = page_start(&entries, Some(&cursor));

        assert_eq!(ids(&entries[start..]), vec!["t1", "old"]);
    }

    #[test]
    fn test_cursor_is_stable_under_new_inserts() {
        let first = merge_feed(vec![entry("b", 2, 2), entry("a", 1, 1)], vec![]);
        let cursor = FeedCursor {
            created_at: first[0].created_at,
            content_id: first[0].content_id.clone(),
        };

        // a newer item arrives between page requests
        let second = merge_feed(
            vec![entry("c", 3, 3), entry("b", 2, 2), entry("a", 1, 1)],
            vec![],
        );
        let start = page_start(&second, Some(&cursor));

        assert_eq!(ids(&second[start..]), vec!["a"]);
    }

    #[test]
    fn test_public_timeline_is_bounded() {
        let mut public = PublicTimeline::new();

        for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
            public.add_entry(
                PublicEntry {
                    entry: entry(id, i as u32, 0),
                    text: format!("text {id}"),
                },
                3,
            );
        }

        let remaining: Vec<String> = public
            .entries
            .iter()
            .map(|e| e.entry.content_id.clone())
            .collect();
        assert_eq!(remaining, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_public_search_matches_text_case_insensitive() {
        let mut public = PublicTimeline::new();
        public.add_entry(
            PublicEntry {
                entry: entry("a", 1, 0),
                text: "Learning Rust today".to_string(),
            },
            10,
        );
        public.add_entry(
            PublicEntry {
                entry: entry("b", 2, 0),
                text: "another RUST post".to_string(),
            },
            10,
        );
        public.add_entry(
            PublicEntry {
                entry: entry("c", 3, 0),
                text: "nothing to see".to_string(),
            },
            10,
        );

        let found = public.search(&PostQueryMatcher::new("rust"));
        assert_eq!(ids(&found), vec!["b", "a"]);

        let found = public.search(&PostQueryMatcher::new("created-by:o rust today"));
        assert_eq!(ids(&found), vec!["a"]);

        assert!(public.search(&PostQueryMatcher::new("")).is_empty());
    }

    #[test]
    fn test_public_entry_update_keeps_position() {
        let mut public = PublicTimeline::new();
        let mut e = PublicEntry {
            entry: entry("a", 1, 0),
            text: "old".to_string(),
        };
        assert!(public.add_entry(e.clone(), 10));

        e.text = "new".to_string();
        assert!(!public.add_entry(e, 10));
        assert_eq!(public.entries.len(), 1);
        assert_eq!(public.entries[0].text, "new");
        assert_eq!(public.entries[0].entry.sequence, 1);
    }

    #[test]
    fn test_public_matches_filters_before_paging() {
        let mut contents = HashMap::new();
        for (id, privacy) in [
            ("a", Privacy::Public),
            ("b", Privacy::Friends),
            ("c", Privacy::Public),
            ("d", Privacy::Public),
        ] {
            let content =
                Content::new_post(id.to_string(), "o".to_string(), format!("post {id}"), None, privacy).unwrap();
            contents.insert(id.to_string(), content);
        }

        let matches: Vec<String> = ["a", "b", "gone", "c", "d"].iter().map(|s| s.to_string()).collect();
        let public = public_matches(matches, &contents);

        assert_eq!(public, vec!["a", "c", "d"]);
        // every page is full until the last one
        assert_eq!(pagination::paginate(&public, 1, 2), vec!["a", "c"]);
        assert_eq!(pagination::paginate(&public, 2, 2), vec!["d"]);
    }

    fn post_ref(id: &str, privacy: Privacy, minute: u32) -> PostRef {
        PostRef {
            content_id: id.to_string(),
            kind: crate::content::ContentKind::Post,
            privacy,
            pinned: false,
            created_at: chrono::Utc
                .with_ymd_and_hms(2024, 1, 1, 9, minute, 0)
                .unwrap(),
            sequence: 0,
        }
    }

    #[test]
    fn test_backfill_adds_friend_posts_made_before_friendship() {
        // A posted before A and B became friends
        let a_posts = vec![
            post_ref("p-friends", Privacy::Friends, 1),
            post_ref("p-private", Privacy::Private, 2),
            post_ref("p-public", Privacy::Public, 3),
        ];

        let mut b_timeline = UserTimeline::new("b".to_string());
        assert_eq!(b_timeline.backfill("a", a_posts.clone()), 2);
        assert_eq!(b_timeline.backfill("a", a_posts), 0);

        let feed = merge_feed(b_timeline.entries.clone(), vec![]);
        assert_eq!(ids(&feed), vec!["p-public", "p-friends"]);
        assert!(feed.iter().all(|e| e.owner_id == "a"));

        let mut friends = HashSet::new();
        friends.insert("a".to_string());
        let b = Viewer::new("b".to_string(), friends);
        assert!(b.can_view("a", Privacy::Friends));
    }

    #[test]
    fn test_friends_post_reaches_friend_feed_but_not_stranger() {
        // A and B are friends, then A posts with friends privacy
        let mut b_timeline = UserTimeline::new("b".to_string());
        b_timeline.backfill("a", vec![]);
        assert!(b_timeline.add_entry(FeedEntry {
            content_id: "p".to_string(),
            owner_id: "a".to_string(),
            created_at: chrono::Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
            sequence: 0,
        }));
        // a later backfill from the same friend does not duplicate it
        assert_eq!(b_timeline.backfill("a", vec![post_ref("p", Privacy::Friends, 0)]), 0);

        let c_timeline = UserTimeline::new("c".to_string());

        assert_eq!(ids(&merge_feed(b_timeline.entries.clone(), vec![])), vec!["p"]);
        assert!(merge_feed(c_timeline.entries.clone(), vec![]).is_empty());

        let c = Viewer::new("c".to_string(), HashSet::new());
        assert!(!c.can_view("a", Privacy::Friends));
    }
}
