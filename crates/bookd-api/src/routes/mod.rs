pub mod auth;
pub mod download;
pub mod info;
pub mod queue;
pub mod search;
