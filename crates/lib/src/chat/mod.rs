//! Chat session coordination: lets a message be sent before its conversation exists.
//!
//! The draft is kept independent of any conversation. When a send is attempted without a
//! durable conversation id, the request waits in a single slot while the provisioner creates
//! one; the dispatch trigger fires it once, when the new id is observed.

pub mod conversation;
pub mod draft;
pub mod pending;
pub mod provisioner;
pub mod sender;
pub mod session;
pub mod trigger;

pub use conversation::{conversation_channel, ConversationPublisher, ConversationRef};
pub use draft::DraftInput;
pub use pending::{PendingSend, PendingSendSlot};
pub use provisioner::{ConversationProvisioner, RemoteProvisioner};
pub use sender::{CompletionOptions, MessageSender, RemoteSender, SendRequest};
pub use session::{transcript_from_conversation, ChatSession, StopHandle, SubmitOutcome, TranscriptEntry};
pub use trigger::{DispatchTrigger, TriggerState};

use crate::api::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("could not create conversation: {0}")]
    Provision(String),
    #[error("no current conversation")]
    NoConversation,
    #[error("message text is empty")]
    EmptyMessage,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("send failed: {0}")]
    Send(String),
    #[error("send cancelled")]
    Cancelled,
}
