//! Chat backend: assistants, conversations, and streaming completion (`/v1/...`).
//!
//! Completion is a server-sent event stream. Each `data:` line carries an envelope whose data is
//! either the answer so far (cumulative, not a delta) with its reference, or `true` when done.

use futures_util::StreamExt;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::client::{ApiClient, ApiError, Envelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message of a conversation as stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Documents attached to a user message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub doc_ids: Vec<String>,
}

impl Message {
    pub fn user(content: impl Into<String>, doc_ids: Vec<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            id: Some(uuid::Uuid::new_v4().to_string()),
            doc_ids,
        }
    }

    pub fn assistant(content: impl Into<String>, id: Option<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            id,
            doc_ids: Vec::new(),
        }
    }
}

/// A retrieved chunk cited by an answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceChunk {
    #[serde(default, alias = "chunk_id")]
    pub id: String,
    #[serde(default, alias = "content_with_weight")]
    pub content: String,
    #[serde(default, alias = "doc_id")]
    pub document_id: String,
    #[serde(default, alias = "docnm_kwd")]
    pub document_name: String,
    #[serde(default)]
    pub similarity: Option<f64>,
}

/// Per-document hit count in a reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocAgg {
    #[serde(default)]
    pub doc_id: String,
    #[serde(default)]
    pub doc_name: String,
    #[serde(default)]
    pub count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default)]
    pub chunks: Vec<ReferenceChunk>,
    #[serde(default)]
    pub doc_aggs: Vec<DocAgg>,
}

impl Reference {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.doc_aggs.is_empty()
    }
}

impl ReferenceChunk {
    /// Similarity as a percentage with one decimal ("87.5%"), when the score is a real number.
    pub fn similarity_percent(&self) -> Option<String> {
        self.similarity
            .filter(|s| s.is_finite())
            .map(|s| format!("{:.1}%", s * 100.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub dialog_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: Vec<Message>,
    /// One entry per assistant message, in order.
    #[serde(default)]
    pub reference: Vec<Reference>,
    #[serde(default)]
    pub create_time: Option<i64>,
    #[serde(default)]
    pub update_time: Option<i64>,
}

impl Conversation {
    /// `update_time` is milliseconds since the epoch.
    pub fn updated_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.update_time
            .and_then(chrono::DateTime::from_timestamp_millis)
    }
}

/// An assistant configuration that conversations belong to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dialog {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableModel {
    pub llm_name: String,
    #[serde(default)]
    pub llm_factory: String,
    #[serde(default)]
    pub model_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableKnowledgebase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub doc_num: u64,
}

/// Body of `POST /v1/conversation/completion`.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub conversation_id: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_file_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_file_infos: Option<Vec<serde_json::Value>>,
    /// Model override from the user's selection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Knowledge bases to retrieve from; absent disables retrieval overrides.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kb_ids: Option<Vec<String>>,
}

/// Final answer of a completion.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub id: Option<String>,
    pub answer: String,
    pub reference: Reference,
}

#[derive(Debug, Deserialize)]
struct CompletionEvent {
    #[serde(default)]
    answer: String,
    #[serde(default)]
    reference: Option<Reference>,
    #[serde(default)]
    id: Option<String>,
}

/// The part of `next` not yet emitted. A non-extending answer is emitted whole.
fn answer_delta<'a>(prev: &str, next: &'a str) -> &'a str {
    match next.strip_prefix(prev) {
        Some(rest) => rest,
        None => next,
    }
}

impl ApiClient {
    pub async fn list_dialogs(&self) -> Result<Vec<Dialog>, ApiError> {
        self.get("v1/dialog/list", &[]).await
    }

    /// Create a conversation under `dialog_id`. `client_id` is the temporary id chosen locally.
    pub async fn create_conversation(
        &self,
        dialog_id: &str,
        name: &str,
        client_id: &str,
    ) -> Result<Conversation, ApiError> {
        let body = serde_json::json!({
            "dialog_id": dialog_id,
            "name": name,
            "is_new": true,
            "conversation_id": client_id,
        });
        self.post("v1/conversation/set", &body).await
    }

    pub async fn rename_conversation(&self, conversation_id: &str, name: &str) -> Result<Conversation, ApiError> {
        let body = serde_json::json!({
            "conversation_id": conversation_id,
            "is_new": false,
            "name": name,
        });
        self.post("v1/conversation/set", &body).await
    }

    pub async fn list_conversations(&self, dialog_id: &str) -> Result<Vec<Conversation>, ApiError> {
        self.get("v1/conversation/list", &[("dialog_id", dialog_id.to_string())])
            .await
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, ApiError> {
        self.get(
            "v1/conversation/get",
            &[("conversation_id", conversation_id.to_string())],
        )
        .await
    }

    pub async fn delete_conversations(&self, dialog_id: &str, ids: &[String]) -> Result<String, ApiError> {
        let body = serde_json::json!({ "conversation_ids": ids, "dialog_id": dialog_id });
        self.send_unit(self.request(Method::POST, "v1/conversation/rm").json(&body))
            .await
    }

    pub async fn available_models(&self) -> Result<Vec<AvailableModel>, ApiError> {
        Ok(self
            .send_optional(self.request(Method::GET, "v1/conversation/available_models"))
            .await?
            .unwrap_or_default())
    }

    pub async fn available_knowledgebases(&self) -> Result<Vec<AvailableKnowledgebase>, ApiError> {
        Ok(self
            .send_optional(self.request(Method::GET, "v1/conversation/available_kbs"))
            .await?
            .unwrap_or_default())
    }

    /// Stream a completion. `on_chunk` receives only newly generated text. Returns when the
    /// server sends the terminal event or closes the stream, or `Cancelled` when `cancel` fires.
    pub async fn completion(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Reply, ApiError> {
        let rb = self
            .request(Method::POST, "v1/conversation/completion")
            .json(request);
        tokio::select! {
            _ = cancel.cancelled() => {
                log::debug!("chat: completion cancelled for {}", request.conversation_id);
                Err(ApiError::Cancelled)
            }
            res = self.read_completion(rb, on_chunk) => res,
        }
    }

    async fn read_completion(
        &self,
        rb: reqwest::RequestBuilder,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Reply, ApiError> {
        let res = self.send_checked(rb).await?;
        let mut stream = res.bytes_stream();
        let mut buffer = Vec::new();
        let mut reply = Reply::default();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
            while let Some(i) = buffer.iter().position(|&b| b == b'\n') {
                let line_bytes: Vec<u8> = buffer.drain(..i).collect();
                buffer.drain(..1);
                let line = String::from_utf8_lossy(&line_bytes).trim().to_string();
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                if apply_event(data.trim(), &mut reply, on_chunk)? {
                    return Ok(reply);
                }
            }
        }
        let tail = String::from_utf8_lossy(&buffer).trim().to_string();
        if let Some(data) = tail.strip_prefix("data:") {
            apply_event(data.trim(), &mut reply, on_chunk)?;
        }
        Ok(reply)
    }
}

/// Fold one `data:` payload into `reply`. Returns true on the terminal event.
fn apply_event(
    data: &str,
    reply: &mut Reply,
    on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
) -> Result<bool, ApiError> {
    if data.is_empty() {
        return Ok(false);
    }
    let env: Envelope<serde_json::Value> =
        serde_json::from_str(data).map_err(|e| ApiError::Stream(e.to_string()))?;
    let value = env.into_result()?;
    match value {
        Some(serde_json::Value::Bool(true)) => Ok(true),
        Some(v @ serde_json::Value::Object(_)) => {
            let event: CompletionEvent =
                serde_json::from_value(v).map_err(|e| ApiError::Stream(e.to_string()))?;
            let delta = answer_delta(&reply.answer, &event.answer);
            if !delta.is_empty() {
                on_chunk(delta);
            }
            reply.answer = event.answer;
            if let Some(r) = event.reference {
                reply.reference = r;
            }
            if event.id.is_some() {
                reply.id = event.id;
            }
            Ok(false)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_of_cumulative_answers() {
        assert_eq!(answer_delta("", "Hel"), "Hel");
        assert_eq!(answer_delta("Hel", "Hello"), "lo");
        assert_eq!(answer_delta("Hello", "Hello"), "");
        assert_eq!(answer_delta("Hello", "Bye"), "Bye");
    }

    #[test]
    fn events_accumulate_until_terminal() {
        let mut reply = Reply::default();
        let mut seen = Vec::new();
        let mut cb = |s: &str| seen.push(s.to_string());
        assert!(!apply_event(r#"{"code":0,"data":{"answer":"Hi","id":"m1"}}"#, &mut reply, &mut cb).unwrap());
        assert!(!apply_event(
            r#"{"code":0,"data":{"answer":"Hi there","reference":{"chunks":[{"chunk_id":"c1","content_with_weight":"text","doc_id":"d1","docnm_kwd":"a.pdf","similarity":0.875}],"doc_aggs":[]}}}"#,
            &mut reply,
            &mut cb
        )
        .unwrap());
        assert!(apply_event(r#"{"code":0,"data":true}"#, &mut reply, &mut cb).unwrap());
        assert_eq!(seen, vec!["Hi", " there"]);
        assert_eq!(reply.answer, "Hi there");
        assert_eq!(reply.id.as_deref(), Some("m1"));
        let chunk = &reply.reference.chunks[0];
        assert_eq!(chunk.id, "c1");
        assert_eq!(chunk.document_name, "a.pdf");
        assert_eq!(chunk.similarity_percent().as_deref(), Some("87.5%"));
    }

    #[test]
    fn error_event_is_api_error() {
        let mut reply = Reply::default();
        let mut cb = |_: &str| {};
        let err = apply_event(r#"{"code":102,"message":"no knowledge base"}"#, &mut reply, &mut cb)
            .unwrap_err();
        assert!(matches!(err, ApiError::Api { code: 102, .. }));
    }

    #[test]
    fn nan_similarity_is_hidden() {
        let chunk = ReferenceChunk {
            similarity: Some(f64::NAN),
            ..Default::default()
        };
        assert_eq!(chunk.similarity_percent(), None);
    }

    #[test]
    fn conversation_parses_history() {
        let c: Conversation = serde_json::from_str(
            r#"{"id":"c1","dialog_id":"d1","name":"n","message":[{"role":"assistant","content":"Hi!"},{"role":"user","content":"q","id":"u1","doc_ids":["x"]}],"reference":[],"update_time":1700000000000}"#,
        )
        .unwrap();
        assert_eq!(c.message.len(), 2);
        assert_eq!(c.message[1].role, Role::User);
        assert_eq!(c.message[1].doc_ids, vec!["x"]);
        assert!(c.updated_at().is_some());
    }
}
