pub mod chat;
pub mod integrations;
pub mod workflows;
