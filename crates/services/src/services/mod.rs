pub mod agents;
pub mod config;
pub mod discovery_chat;
pub mod llm;
pub mod orchestrator;
pub mod progress;
pub mod retry;
