pub mod config;
pub mod gateway;
pub mod language;
pub mod queue;
pub mod redis;
pub mod types;
