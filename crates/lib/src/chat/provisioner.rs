//! Conversation provisioning: obtain a durable id for a conversation that does not exist yet.

use async_trait::async_trait;

use super::conversation::{ConversationPublisher, ConversationRef};
use super::ChatError;
use crate::api::ApiClient;

/// Creates a conversation and publishes its id on the current-conversation channel.
/// Success is observed through the channel, not the return value.
#[async_trait]
pub trait ConversationProvisioner: Send + Sync {
    async fn create_temporary_conversation(&self) -> Result<(), ChatError>;
}

/// Provisioner backed by the chat backend's conversation-creation endpoint.
pub struct RemoteProvisioner {
    api: ApiClient,
    dialog_id: String,
    name: String,
    publisher: ConversationPublisher,
}

impl RemoteProvisioner {
    pub fn new(
        api: ApiClient,
        dialog_id: impl Into<String>,
        name: impl Into<String>,
        publisher: ConversationPublisher,
    ) -> Self {
        Self {
            api,
            dialog_id: dialog_id.into(),
            name: name.into(),
            publisher,
        }
    }
}

#[async_trait]
impl ConversationProvisioner for RemoteProvisioner {
    async fn create_temporary_conversation(&self) -> Result<(), ChatError> {
        let client_id = uuid::Uuid::new_v4().simple().to_string();
        self.publisher.publish(ConversationRef::temporary());
        let conversation = self
            .api
            .create_conversation(&self.dialog_id, &self.name, &client_id)
            .await
            .map_err(|e| ChatError::Provision(e.to_string()))?;
        log::info!(
            "chat: created conversation {} under dialog {}",
            conversation.id,
            self.dialog_id
        );
        self.publisher
            .publish(ConversationRef::durable(conversation.id, true));
        Ok(())
    }
}
