/// Settings defaults and free tier limits from config.toml
pub mod app;

/// Database connection and table creation
pub mod database;
