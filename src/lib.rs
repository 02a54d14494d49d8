// Core modules
pub mod broker;
pub mod config;
pub mod data;
pub mod execution;
pub mod indicators;
pub mod journal;
pub mod models;
pub mod news;
pub mod notify;
pub mod portfolio;
pub mod reconcile;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use models::*;
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
