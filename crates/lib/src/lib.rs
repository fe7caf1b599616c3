//! kbchat core library: REST clients for the chat and management backends, persisted
//! preferences, token claims, and the chat session coordinator used by the CLI.

pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod prefs;
