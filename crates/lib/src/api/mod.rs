//! Typed REST clients for the chat backend and the management backend.
//!
//! One `ApiClient` per backend; endpoint wrappers are grouped by area as inherent methods.

pub mod chat;
mod client;
pub mod llm_providers;
pub mod users;

pub use chat::{
    AvailableKnowledgebase, AvailableModel, CompletionRequest, Conversation, Dialog, Message,
    Reference, ReferenceChunk, Reply, Role,
};
pub use client::{ApiClient, ApiError, Envelope, Page};
