pub mod auth;
pub mod chat;
pub mod config;
pub mod connections;
pub mod conversations;
pub mod error;
pub mod feeds;
pub mod models;
pub mod notes;
pub mod openapi;
pub mod optimistic;
pub mod presence;
pub mod profiles;
pub mod rate_limit;
pub mod realtime;
pub mod repo;
pub mod routes;
pub mod security;
pub mod storage;
pub mod uploads;

pub use routes::{config, AppState};
pub use security::SecurityHeaders;
