pub mod agent_status;
pub mod app;
pub mod cache;
pub mod git;
pub mod logging;
pub mod matching;
pub mod notification;
pub mod provider;
pub mod remote;
pub mod resources;
pub mod settings;
pub mod tmux;
pub mod types;
pub mod ui;
