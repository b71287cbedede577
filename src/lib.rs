pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod matcher;
pub mod notify;
pub mod scheduler;
pub mod state;
pub mod types;
