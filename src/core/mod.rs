pub mod browser;
pub mod config;
pub mod downloads;
pub mod executor;
pub mod jobs;
pub mod lifecycle;
pub mod plan;
pub mod session;
pub mod stability;
pub mod terminal;
