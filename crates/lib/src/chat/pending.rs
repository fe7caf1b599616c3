//! Single-slot holding area for a send attempted before the conversation has an id.

/// Attachments of a deferred send. The message text is taken from the draft when it fires.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingSend {
    pub document_ids: Vec<String>,
    pub temp_file_ids: Option<Vec<String>>,
    pub temp_file_infos: Option<Vec<serde_json::Value>>,
}

/// Holds at most one request. Storing again replaces the previous one.
#[derive(Debug, Default)]
pub struct PendingSendSlot {
    slot: Option<PendingSend>,
}

impl PendingSendSlot {
    /// Last write wins; returns the request that was replaced, if any.
    pub fn store(&mut self, request: PendingSend) -> Option<PendingSend> {
        let replaced = self.slot.replace(request);
        if replaced.is_some() {
            log::debug!("chat: pending send replaced before conversation was ready");
        }
        replaced
    }

    pub fn take_if_present(&mut self) -> Option<PendingSend> {
        self.slot.take()
    }

    pub fn is_occupied(&self) -> bool {
        self.slot.is_some()
    }

    pub fn peek(&self) -> Option<&PendingSend> {
        self.slot.as_ref()
    }
}
