//! Fires once per transition of the conversation id to a concrete, not-yet-seen value.

use super::conversation::ConversationRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    /// No durable id yet.
    Waiting,
    /// A durable id is present; a deferred send may or may not have fired.
    ArmedOrIdle,
}

#[derive(Debug, Default)]
pub struct DispatchTrigger {
    last_seen: Option<String>,
}

impl DispatchTrigger {
    /// Start from `current` so an id that already exists never counts as a transition.
    pub fn starting_at(current: &ConversationRef) -> Self {
        Self {
            last_seen: current.id.clone(),
        }
    }

    pub fn state(&self) -> TriggerState {
        match self.last_seen {
            Some(_) => TriggerState::ArmedOrIdle,
            None => TriggerState::Waiting,
        }
    }

    /// Record `current`; true only when its id is present and differs from the last one observed.
    pub fn observe(&mut self, current: &ConversationRef) -> bool {
        match &current.id {
            Some(id) if self.last_seen.as_deref() == Some(id.as_str()) => false,
            Some(id) => {
                self.last_seen = Some(id.clone());
                true
            }
            None => {
                self.last_seen = None;
                false
            }
        }
    }
}
