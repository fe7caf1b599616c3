//! Message-send operation: deliver one user message to a conversation and stream the answer.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::ChatError;
use crate::api::{ApiClient, ApiError, CompletionRequest, Message, Reply};
use crate::prefs::PrefStore;

/// Everything one send needs. `history` ends with the user message being sent.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub conversation_id: String,
    pub text: String,
    pub document_ids: Vec<String>,
    pub temp_file_ids: Option<Vec<String>>,
    pub temp_file_infos: Option<Vec<serde_json::Value>>,
    pub history: Vec<Message>,
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send and stream. `on_chunk` gets incremental text; `cancel` aborts the stream.
    async fn send(
        &self,
        request: SendRequest,
        cancel: &CancellationToken,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Reply, ChatError>;
}

/// Model and knowledge-base overrides taken from the user's saved selections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    pub model: Option<String>,
    pub kb_ids: Option<Vec<String>>,
}

impl CompletionOptions {
    /// Empty model means "assistant default". Knowledge disabled sends an empty kb list; enabled with
    /// nothing selected leaves the assistant's own knowledge bases in effect.
    pub fn from_prefs(prefs: &PrefStore) -> Self {
        let model = Some(prefs.selected_model()).filter(|m| !m.trim().is_empty());
        let kb_ids = if !prefs.knowledge_enabled() {
            Some(Vec::new())
        } else {
            Some(prefs.selected_kbs()).filter(|k| !k.is_empty())
        };
        Self { model, kb_ids }
    }
}

/// Sender backed by the chat backend's streaming completion endpoint.
pub struct RemoteSender {
    api: ApiClient,
    options: CompletionOptions,
}

impl RemoteSender {
    pub fn new(api: ApiClient, options: CompletionOptions) -> Self {
        Self { api, options }
    }

    pub fn set_options(&mut self, options: CompletionOptions) {
        self.options = options;
    }
}

#[async_trait]
impl MessageSender for RemoteSender {
    async fn send(
        &self,
        request: SendRequest,
        cancel: &CancellationToken,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Reply, ChatError> {
        let body = CompletionRequest {
            conversation_id: request.conversation_id,
            messages: request.history,
            temp_file_ids: request.temp_file_ids,
            temp_file_infos: request.temp_file_infos,
            model: self.options.model.clone(),
            kb_ids: self.options.kb_ids.clone(),
        };
        self.api
            .completion(&body, cancel, on_chunk)
            .await
            .map_err(|e| match e {
                ApiError::Cancelled => ChatError::Cancelled,
                other => ChatError::Api(other),
            })
    }
}
