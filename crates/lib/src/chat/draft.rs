//! The user's in-progress input: text plus attachments, independent of any conversation.

use super::pending::PendingSend;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DraftInput {
    pub text: String,
    pub pending_document_ids: Vec<String>,
    pub pending_temp_file_ids: Option<Vec<String>>,
    pub pending_temp_file_infos: Option<Vec<serde_json::Value>>,
}

impl DraftInput {
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn attach_document(&mut self, document_id: impl Into<String>) {
        let id = document_id.into();
        if !self.pending_document_ids.contains(&id) {
            self.pending_document_ids.push(id);
        }
    }

    /// Attach a file uploaded to temporary storage. `info` is passed through to the backend untouched.
    pub fn attach_temp_file(&mut self, file_id: impl Into<String>, info: serde_json::Value) {
        self.pending_temp_file_ids
            .get_or_insert_with(Vec::new)
            .push(file_id.into());
        self.pending_temp_file_infos
            .get_or_insert_with(Vec::new)
            .push(info);
    }

    /// Whitespace-only text never sends.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Attachments as a send request. Text is read separately at dispatch time.
    pub fn to_request(&self) -> PendingSend {
        PendingSend {
            document_ids: self.pending_document_ids.clone(),
            temp_file_ids: self.pending_temp_file_ids.clone(),
            temp_file_infos: self.pending_temp_file_infos.clone(),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
