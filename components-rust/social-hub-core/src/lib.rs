mod badge;
mod chat;
mod common;
mod config;
mod content;
mod media;
mod notification;
mod presence;
mod realtime;
mod user;
mod user_chats;
mod user_posts;
mod user_timeline;
mod visibility;
