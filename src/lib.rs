pub mod app;
pub mod config;
pub mod deliver;
pub mod http_client;
pub mod models;
pub mod notify;
pub mod scheduler;
pub mod storage;
pub mod sync;
pub mod telegram;
pub mod telegraph;
pub mod urls;

pub use app::{App, Settings};
pub use config::Config;
