use std::str::FromStr;
use std::sync::OnceLock;

/// Runtime settings, read once from `SOCIAL_*` environment variables of the component.
#[derive(Clone, Debug)]
pub struct Config {
    pub feed_page_size: u32,
    pub profile_page_size: u32,
    pub comments_page_size: u32,
    pub replies_page_size: u32,
    pub likes_page_size: u32,
    pub friends_page_size: u32,
    pub friend_requests_limit: u32,
    pub notifications_page_size: u32,
    pub messages_page_size: u32,
    pub last_messages_page_size: u32,
    pub search_users_page_size: u32,
    pub search_posts_page_size: u32,
    pub max_post_length: usize,
    pub max_comment_length: usize,
    pub max_comments_per_content: usize,
    pub max_message_length: usize,
    pub realtime_queue_capacity: usize,
    pub realtime_poll_interval_millis: u32,
    pub realtime_max_wait_secs: u32,
    pub public_index_capacity: usize,
    pub image_store_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            feed_page_size: 5,
            profile_page_size: 5,
            comments_page_size: 5,
            replies_page_size: 6,
            likes_page_size: 10,
            friends_page_size: 6,
            friend_requests_limit: 9,
            notifications_page_size: 5,
            messages_page_size: 15,
            last_messages_page_size: 10,
            search_users_page_size: 10,
            search_posts_page_size: 5,
            max_post_length: 2000,
            max_comment_length: 2000,
            max_comments_per_content: 2000,
            max_message_length: 1500,
            realtime_queue_capacity: 100,
            realtime_poll_interval_millis: 1000,
            realtime_max_wait_secs: 10,
            public_index_capacity: 1000,
            image_store_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Config {
            feed_page_size: env_or("SOCIAL_FEED_PAGE_SIZE", defaults.feed_page_size),
            profile_page_size: env_or("SOCIAL_PROFILE_PAGE_SIZE", defaults.profile_page_size),
            comments_page_size: env_or("SOCIAL_COMMENTS_PAGE_SIZE", defaults.comments_page_size),
            replies_page_size: env_or("SOCIAL_REPLIES_PAGE_SIZE", defaults.replies_page_size),
            likes_page_size: env_or("SOCIAL_LIKES_PAGE_SIZE", defaults.likes_page_size),
            friends_page_size: env_or("SOCIAL_FRIENDS_PAGE_SIZE", defaults.friends_page_size),
            friend_requests_limit: env_or(
                "SOCIAL_FRIEND_REQUESTS_LIMIT",
                defaults.friend_requests_limit,
            ),
            notifications_page_size: env_or(
                "SOCIAL_NOTIFICATIONS_PAGE_SIZE",
                defaults.notifications_page_size,
            ),
            messages_page_size: env_or("SOCIAL_MESSAGES_PAGE_SIZE", defaults.messages_page_size),
            last_messages_page_size: env_or(
                "SOCIAL_LAST_MESSAGES_PAGE_SIZE",
                defaults.last_messages_page_size,
            ),
            search_users_page_size: env_or(
                "SOCIAL_SEARCH_USERS_PAGE_SIZE",
                defaults.search_users_page_size,
            ),
            search_posts_page_size: env_or(
                "SOCIAL_SEARCH_POSTS_PAGE_SIZE",
                defaults.search_posts_page_size,
            ),
            max_post_length: env_or("SOCIAL_MAX_POST_LENGTH", defaults.max_post_length),
            max_comment_length: env_or("SOCIAL_MAX_COMMENT_LENGTH", defaults.max_comment_length),
            max_comments_per_content: env_or(
                "SOCIAL_MAX_COMMENTS_PER_CONTENT",
                defaults.max_comments_per_content,
            ),
            max_message_length: env_or("SOCIAL_MAX_MESSAGE_LENGTH", defaults.max_message_length),
            realtime_queue_capacity: env_or(
                "SOCIAL_REALTIME_QUEUE_CAPACITY",
                defaults.realtime_queue_capacity,
            ),
            realtime_poll_interval_millis: env_or(
                "SOCIAL_REALTIME_POLL_INTERVAL_MILLIS",
                defaults.realtime_poll_interval_millis,
            ),
            realtime_max_wait_secs: env_or(
                "SOCIAL_REALTIME_MAX_WAIT_SECS",
                defaults.realtime_max_wait_secs,
            ),
            public_index_capacity: env_or(
                "SOCIAL_PUBLIC_INDEX_CAPACITY",
                defaults.public_index_capacity,
            ),
            image_store_url: std::env::var("SOCIAL_IMAGE_STORE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) => match value.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                log::warn!("config - invalid value for {key}: {value}, using default");
                default
            }
        },
        Err(_) => default,
    }
}

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}
