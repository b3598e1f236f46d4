use golem_rust::Schema;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::{thread, time};

pub(crate) mod snapshot {
    use serde::{de, Serialize};

    pub const SERIALIZATION_VERSION_V1: u8 = 1u8;

    pub(crate) fn serialize<T>(value: &T) -> Result<Vec<u8>, String>
    where
        T: ?Sized + Serialize,
    {
        let data = serde_json::to_vec_pretty(value).map_err(|err| err.to_string())?;

        let mut result = vec![SERIALIZATION_VERSION_V1];
        result.extend(data);

        Ok(result)
    }

    pub(crate) fn deserialize<'a, T>(bytes: &'a [u8]) -> Result<T, String>
    where
        T: de::Deserialize<'a>,
    {
        if bytes.is_empty() {
            return Err("Empty snapshot".to_string());
        }

        let (version, data) = bytes.split_at(1);

        match version[0] {
            SERIALIZATION_VERSION_V1 => {
                let value: T = serde_json::from_slice(data).map_err(|err| err.to_string())?;

                Ok(value)
            }
            _ => Err("Unsupported serialization version".to_string()),
        }
    }
}

pub mod error {
    use golem_rust::Schema;
    use serde::{Deserialize, Serialize};

    /// Caller-visible failure of an operation.
    ///
    /// Crosses agent boundaries unchanged, so every agent method returning a
    /// `Result` uses this type as its error side.
    #[derive(Schema, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
    pub enum Error {
        /// Entity absent. Not retried.
        #[error("Not found: {0}")]
        NotFound(String),

        /// Actor is not allowed to perform the operation.
        #[error("Forbidden: {0}")]
        Forbidden(String),

        /// Unique key already taken or state already exists.
        #[error("Conflict: {0}")]
        Conflict(String),

        /// External image store failure.
        #[error("Upload error: {0}")]
        Upload(String),

        /// Malformed input.
        #[error("Validation error: {0}")]
        Validation(String),
    }

    impl Error {
        pub fn not_found<T: ToString>(msg: T) -> Self {
            Self::NotFound(msg.to_string())
        }

        pub fn forbidden<T: ToString>(msg: T) -> Self {
            Self::Forbidden(msg.to_string())
        }

        pub fn conflict<T: ToString>(msg: T) -> Self {
            Self::Conflict(msg.to_string())
        }

        pub fn upload<T: ToString>(msg: T) -> Self {
            Self::Upload(msg.to_string())
        }

        pub fn validation<T: ToString>(msg: T) -> Self {
            Self::Validation(msg.to_string())
        }
    }

}

pub mod pagination {
    /// Number of items skipped for a 1-based page index. Page 0 is treated as page 1.
    pub fn skip(page: u32, size: u32) -> usize {
        (page.max(1) as usize - 1) * size as usize
    }

    pub fn paginate<T: Clone>(items: &[T], page: u32, size: u32) -> Vec<T> {
        items
            .iter()
            .skip(skip(page, size))
            .take(size as usize)
            .cloned()
            .collect()
    }
}

pub mod query {
    use regex::Regex;

    #[derive(Clone, Debug, Default)]
    pub struct Query {
        pub terms: Vec<String>,
        pub field_filters: Vec<(String, String)>,
    }

    impl Query {
        /// Splits a query into free terms and `field:value` filters.
        pub fn new(query: &str) -> Self {
            let mut terms = Vec::new();
            let mut field_filters = Vec::new();

            for token in query.split_whitespace() {
                match token.split_once(':') {
                    Some((field, value)) if !field.is_empty() && !value.is_empty() => {
                        field_filters.push((field.to_lowercase(), value.to_string()));
                    }
                    _ => terms.push(token.to_string()),
                }
            }

            Self {
                terms,
                field_filters,
            }
        }
    }

    /// Case-insensitive substring match.
    pub fn text_matches(text: &str, term: &str) -> bool {
        match Regex::new(&format!("(?i){}", regex::escape(term))) {
            Ok(re) => re.is_match(text),
            Err(_) => false,
        }
    }

    pub fn text_exact_matches(text: &str, value: &str) -> bool {
        text == value
    }
}

/// Privacy scope of a post or repost. Comments and replies inherit the scope of their root.
#[derive(Schema, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Privacy {
    #[default]
    Public,
    Friends,
    Private,
}

impl Display for Privacy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            Privacy::Public => "public",
            Privacy::Friends => "friends",
            Privacy::Private => "private",
        };
        write!(f, "{value}")
    }
}

/// Entity a like refers to. Exactly one id per target.
#[derive(Schema, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LikeTarget {
    Post(String),
    Repost(String),
    Comment(String),
    Reply(String),
}

impl LikeTarget {
    pub fn id(&self) -> &str {
        match self {
            LikeTarget::Post(id)
            | LikeTarget::Repost(id)
            | LikeTarget::Comment(id)
            | LikeTarget::Reply(id) => id,
        }
    }
}

impl Display for LikeTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LikeTarget::Post(id) => write!(f, "post({id})"),
            LikeTarget::Repost(id) => write!(f, "repost({id})"),
            LikeTarget::Comment(id) => write!(f, "comment({id})"),
            LikeTarget::Reply(id) => write!(f, "reply({id})"),
        }
    }
}

pub async fn poll_for_updates<C, T, F, Fut>(
    id: String,
    cursor: C,
    iter_wait_time: Option<u32>,
    max_wait_time: Option<u32>,
    fetch: F,
    label: &str,
) -> Option<Vec<T>>
where
    C: Clone + Display,
    F: Fn(String, C) -> Fut,
    Fut: Future<Output = Option<Vec<T>>>,
{
    let config = crate::config::get();
    let max_wait_time = time::Duration::from_secs(
        max_wait_time.unwrap_or(config.realtime_max_wait_secs) as u64,
    );
    let iter_wait_time = time::Duration::from_millis(
        iter_wait_time.unwrap_or(config.realtime_poll_interval_millis) as u64,
    );
    let now = time::Instant::now();

    loop {
        log::debug!(
            "{label} - id: {id}, cursor: {cursor}, elapsed time: {}ms, max wait time: {}ms",
            now.elapsed().as_millis(),
            max_wait_time.as_millis()
        );

        match fetch(id.clone(), cursor.clone()).await {
            Some(updates) if !updates.is_empty() => return Some(updates),
            Some(updates) => {
                if now.elapsed() >= max_wait_time {
                    return Some(updates);
                }
                thread::sleep(iter_wait_time);
            }
            None => return None,
        }
    }
}
