pub mod backend;
pub mod config;
pub mod lifecycle;
pub mod orchestrator;
pub mod store;
pub mod terminal;
