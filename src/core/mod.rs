pub mod adapters;
pub mod config;
pub mod connections;
pub mod engine;
pub mod error;
pub mod intent;
pub mod lifecycle;
pub mod services;
pub mod terminal;
pub mod vault;
pub mod workflow;
