pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod jobs;
pub mod lookup;
pub mod provider;
pub mod securities;
pub mod server;
