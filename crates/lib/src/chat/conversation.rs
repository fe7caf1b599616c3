//! The current conversation of a chat session, published through a watch channel.
//!
//! The publisher side belongs to whoever decides which conversation is current (provisioning,
//! the user picking one from history). Sessions only subscribe.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationRef {
    /// Durable id; absent until the backend has assigned one.
    pub id: Option<String>,
    /// True for a conversation created in this session that has no history yet.
    pub is_new: bool,
}

impl ConversationRef {
    /// Placeholder shown while the backend creates the conversation.
    pub fn temporary() -> Self {
        Self {
            id: None,
            is_new: true,
        }
    }

    pub fn durable(id: impl Into<String>, is_new: bool) -> Self {
        Self {
            id: Some(id.into()),
            is_new,
        }
    }
}

/// Writer half of the current-conversation channel. Cheap to clone.
#[derive(Clone)]
pub struct ConversationPublisher {
    tx: Arc<watch::Sender<ConversationRef>>,
}

/// Create a channel starting at `initial`.
pub fn conversation_channel(
    initial: ConversationRef,
) -> (ConversationPublisher, watch::Receiver<ConversationRef>) {
    let (tx, rx) = watch::channel(initial);
    (ConversationPublisher { tx: Arc::new(tx) }, rx)
}

impl ConversationPublisher {
    /// Publish unconditionally. Subscribers are notified even when the value is unchanged.
    pub fn publish(&self, conversation: ConversationRef) {
        log::debug!("chat: current conversation -> {:?}", conversation.id);
        self.tx.send_replace(conversation);
    }

    pub fn current(&self) -> ConversationRef {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationRef> {
        self.tx.subscribe()
    }
}
