//! One chat screen's worth of state: draft, pending send, transcript, and the dispatch trigger.
//!
//! A session is driven by a single task through `&mut self`, so slot and draft need no locking.
//! Sends attempted before the conversation has an id are parked in the slot, the provisioner is
//! asked for a conversation, and the send fires when the id shows up on the watch channel.

use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::conversation::ConversationRef;
use super::draft::DraftInput;
use super::pending::{PendingSend, PendingSendSlot};
use super::provisioner::ConversationProvisioner;
use super::sender::{MessageSender, SendRequest};
use super::trigger::{DispatchTrigger, TriggerState};
use super::ChatError;
use crate::api::{Conversation, Message, Reference, Reply, Role};

/// A transcript line; assistant lines carry the reference their answer cited.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub message: Message,
    pub reference: Option<Reference>,
}

/// Build a transcript from stored history. References are matched to assistant messages by order.
pub fn transcript_from_conversation(conversation: &Conversation) -> Vec<TranscriptEntry> {
    let mut assistant_index = 0;
    conversation
        .message
        .iter()
        .map(|m| {
            let reference = if m.role == Role::Assistant {
                let r = conversation
                    .reference
                    .get(assistant_index)
                    .filter(|r| !r.is_empty())
                    .cloned();
                assistant_index += 1;
                r
            } else {
                None
            };
            TranscriptEntry {
                message: m.clone(),
                reference,
            }
        })
        .collect()
}

#[derive(Debug)]
pub enum SubmitOutcome {
    /// Sent right away; the conversation already had an id.
    Sent(Reply),
    /// Parked until the conversation id arrives.
    Deferred,
    /// Nothing to send (blank text).
    Ignored,
}

/// Cancels whichever send is in flight, from any task. No-op when idle.
#[derive(Clone, Default)]
pub struct StopHandle {
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl StopHandle {
    pub fn stop(&self) -> bool {
        if let Ok(guard) = self.current.lock() {
            if let Some(ref token) = *guard {
                token.cancel();
                return true;
            }
        }
        false
    }

    fn register(&self, token: CancellationToken) {
        if let Ok(mut guard) = self.current.lock() {
            *guard = Some(token);
        }
    }

    fn clear(&self) {
        if let Ok(mut guard) = self.current.lock() {
            *guard = None;
        }
    }
}

pub struct ChatSession<S, P> {
    draft: DraftInput,
    pending: PendingSendSlot,
    trigger: DispatchTrigger,
    conversation: watch::Receiver<ConversationRef>,
    transcript: Vec<TranscriptEntry>,
    sender: S,
    provisioner: P,
    cancel: CancellationToken,
    stop: StopHandle,
}

impl<S: MessageSender, P: ConversationProvisioner> ChatSession<S, P> {
    pub fn new(sender: S, provisioner: P, mut conversation: watch::Receiver<ConversationRef>) -> Self {
        let trigger = DispatchTrigger::starting_at(&conversation.borrow_and_update());
        Self {
            draft: DraftInput::default(),
            pending: PendingSendSlot::default(),
            trigger,
            conversation,
            transcript: Vec::new(),
            sender,
            provisioner,
            cancel: CancellationToken::new(),
            stop: StopHandle::default(),
        }
    }

    pub fn draft(&self) -> &DraftInput {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut DraftInput {
        &mut self.draft
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn current_conversation(&self) -> ConversationRef {
        self.conversation.borrow().clone()
    }

    pub fn trigger_state(&self) -> TriggerState {
        self.trigger.state()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_occupied()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Session-wide token; cancelling it tears down the session's sends and waits.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Send the draft with its own attachments.
    pub async fn submit_draft(
        &mut self,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<SubmitOutcome, ChatError> {
        let request = self.draft.to_request();
        self.submit(request, on_chunk).await
    }

    /// Send now if the conversation has an id, otherwise park `request` and ask for a conversation.
    pub async fn submit(
        &mut self,
        request: PendingSend,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<SubmitOutcome, ChatError> {
        if self.draft.is_blank() {
            return Ok(SubmitOutcome::Ignored);
        }
        let current = self.conversation.borrow_and_update().clone();
        if current.id.is_some() {
            // An id that arrived unobserved still carries the parked request; this send replaces it.
            self.trigger.observe(&current);
            if let Some(stale) = self.pending.take_if_present() {
                log::debug!(
                    "chat: parked send with {} document(s) superseded by a direct send",
                    stale.document_ids.len()
                );
            }
            return self.dispatch(request, on_chunk).await.map(SubmitOutcome::Sent);
        }
        self.pending.store(request);
        if let Err(e) = self.provisioner.create_temporary_conversation().await {
            log::warn!("chat: conversation provisioning failed: {}", e);
            return Err(e);
        }
        Ok(SubmitOutcome::Deferred)
    }

    /// Handle the latest conversation value: fire the parked send if the id just arrived.
    pub async fn on_conversation_changed(
        &mut self,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Option<Reply>, ChatError> {
        let current = self.conversation.borrow_and_update().clone();
        if !self.trigger.observe(&current) {
            return Ok(None);
        }
        match self.pending.take_if_present() {
            Some(request) => self.dispatch(request, on_chunk).await.map(Some),
            None => Ok(None),
        }
    }

    /// Wait for the parked send to fire. Returns Ok(None) when nothing is parked, the publisher is
    /// gone, or the session is cancelled; the slot is left as it was in the latter two cases.
    pub async fn drive_pending(
        &mut self,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Option<Reply>, ChatError> {
        loop {
            // The provisioner may have published before we started waiting.
            if self.conversation.has_changed().unwrap_or(false) {
                if let Some(reply) = self.on_conversation_changed(on_chunk).await? {
                    return Ok(Some(reply));
                }
            }
            if !self.pending.is_occupied() {
                return Ok(None);
            }
            let changed = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                res = self.conversation.changed() => res,
            };
            if changed.is_err() {
                log::debug!("chat: conversation publisher dropped with a send still pending");
                return Ok(None);
            }
        }
    }

    /// Drop the parked send (e.g. after provisioning failed) and hand it back for reporting.
    pub fn abandon_pending(&mut self) -> Option<PendingSend> {
        self.pending.take_if_present()
    }

    /// The publisher moved to another conversation: stop the in-flight send, drop anything parked,
    /// and start the trigger from the new value so it cannot fire for this switch.
    pub fn switch_conversation(&mut self, history: Vec<TranscriptEntry>) {
        self.stop.stop();
        if let Some(dropped) = self.pending.take_if_present() {
            log::debug!(
                "chat: dropping pending send with {} document(s) on conversation switch",
                dropped.document_ids.len()
            );
        }
        let current = self.conversation.borrow_and_update().clone();
        self.trigger = DispatchTrigger::starting_at(&current);
        self.transcript = history;
    }

    /// Resend the last user message, replacing everything after it in the transcript.
    /// Ok(None) when there is no user message to resend. On failure the transcript is restored.
    pub async fn regenerate_last(
        &mut self,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Option<Reply>, ChatError> {
        let Some(index) = self
            .transcript
            .iter()
            .rposition(|e| e.message.role == Role::User)
        else {
            return Ok(None);
        };
        let tail = self.transcript.split_off(index);
        let last = &tail[0].message;
        let request = PendingSend {
            document_ids: last.doc_ids.clone(),
            ..Default::default()
        };
        match self.send_turn(last.content.clone(), request, on_chunk).await {
            Ok(reply) => Ok(Some(reply)),
            Err(e) => {
                self.transcript.extend(tail);
                Err(e)
            }
        }
    }

    /// Remove a message from the transcript. A user message takes its answer with it.
    /// Returns the ids of the removed messages, empty when `id` is unknown.
    pub fn remove_message(&mut self, id: &str) -> Vec<String> {
        let Some(index) = self
            .transcript
            .iter()
            .position(|e| e.message.id.as_deref() == Some(id))
        else {
            return Vec::new();
        };
        let mut end = index + 1;
        if self.transcript[index].message.role == Role::User
            && self
                .transcript
                .get(end)
                .is_some_and(|e| e.message.role == Role::Assistant)
        {
            end += 1;
        }
        self.transcript
            .drain(index..end)
            .filter_map(|e| e.message.id)
            .collect()
    }

    async fn dispatch(
        &mut self,
        request: PendingSend,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Reply, ChatError> {
        let text = self.draft.text.clone();
        match self.send_turn(text, request, on_chunk).await {
            Ok(reply) => {
                self.draft.clear();
                Ok(reply)
            }
            Err(e) => {
                log::warn!("chat: send failed, draft kept for retry: {}", e);
                Err(e)
            }
        }
    }

    /// One outbound message: send `text` with the transcript as history, then record the turn.
    async fn send_turn(
        &mut self,
        text: String,
        request: PendingSend,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<Reply, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let conversation_id = self
            .conversation
            .borrow()
            .id
            .clone()
            .ok_or(ChatError::NoConversation)?;
        let user = Message::user(text.clone(), request.document_ids.clone());
        let mut history: Vec<Message> = self.transcript.iter().map(|e| e.message.clone()).collect();
        history.push(user.clone());

        let send = SendRequest {
            conversation_id,
            text,
            document_ids: request.document_ids,
            temp_file_ids: request.temp_file_ids,
            temp_file_infos: request.temp_file_infos,
            history,
        };
        let token = self.cancel.child_token();
        self.stop.register(token.clone());
        let result = self.sender.send(send, &token, on_chunk).await;
        self.stop.clear();

        let reply = result?;
        self.transcript.push(TranscriptEntry {
            message: user,
            reference: None,
        });
        self.transcript.push(TranscriptEntry {
            message: Message::assistant(reply.answer.clone(), reply.id.clone()),
            reference: Some(reply.reference.clone()).filter(|r| !r.is_empty()),
        });
        Ok(reply)
    }
}

impl<S, P> Drop for ChatSession<S, P> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ReferenceChunk;
    use crate::chat::conversation::{conversation_channel, ConversationPublisher};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum SendMode {
        Answer,
        Fail,
        /// Fails the first attempt only.
        FailFirst,
        WaitForCancel,
    }

    #[derive(Clone)]
    struct FakeSender {
        sent: Arc<Mutex<Vec<SendRequest>>>,
        mode: SendMode,
    }

    impl FakeSender {
        fn new(mode: SendMode) -> Self {
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                mode,
            }
        }

        fn sent(&self) -> Vec<SendRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSender for FakeSender {
        async fn send(
            &self,
            request: SendRequest,
            cancel: &CancellationToken,
            on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
        ) -> Result<Reply, ChatError> {
            let attempt = {
                let mut sent = self.sent.lock().unwrap();
                sent.push(request);
                sent.len()
            };
            match self.mode {
                SendMode::FailFirst if attempt == 1 => Err(ChatError::Send("stream broke".to_string())),
                SendMode::Answer | SendMode::FailFirst => {
                    on_chunk("ok");
                    Ok(Reply {
                        id: Some("a1".to_string()),
                        answer: "ok".to_string(),
                        reference: Reference::default(),
                    })
                }
                SendMode::Fail => Err(ChatError::Send("stream broke".to_string())),
                SendMode::WaitForCancel => {
                    cancel.cancelled().await;
                    Err(ChatError::Cancelled)
                }
            }
        }
    }

    /// Publishes `assign` (if any) the way a backend round trip would, or fails.
    #[derive(Clone)]
    struct FakeProvisioner {
        publisher: ConversationPublisher,
        assign: Option<&'static str>,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ConversationProvisioner for FakeProvisioner {
        async fn create_temporary_conversation(&self) -> Result<(), ChatError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.publisher.publish(ConversationRef::temporary());
            if self.fail {
                return Err(ChatError::Provision("backend unavailable".to_string()));
            }
            if let Some(id) = self.assign {
                self.publisher.publish(ConversationRef::durable(id, true));
            }
            Ok(())
        }
    }

    struct Fixture {
        session: ChatSession<FakeSender, FakeProvisioner>,
        sender: FakeSender,
        provisioner: FakeProvisioner,
        publisher: ConversationPublisher,
    }

    fn fixture(
        initial: ConversationRef,
        mode: SendMode,
        assign: Option<&'static str>,
        fail: bool,
    ) -> Fixture {
        let (publisher, rx) = conversation_channel(initial);
        let sender = FakeSender::new(mode);
        let provisioner = FakeProvisioner {
            publisher: publisher.clone(),
            assign,
            fail,
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let session = ChatSession::new(sender.clone(), provisioner.clone(), rx);
        Fixture {
            session,
            sender,
            provisioner,
            publisher,
        }
    }

    fn docs(id: &str) -> PendingSend {
        PendingSend {
            document_ids: vec![id.to_string()],
            ..Default::default()
        }
    }

    fn no_output() -> impl for<'a> FnMut(&'a str) + Send {
        |_: &str| {}
    }

    #[tokio::test]
    async fn deferred_send_fires_once_when_id_arrives() {
        let mut f = fixture(ConversationRef::default(), SendMode::Answer, Some("c1"), false);
        f.session.draft_mut().set_text("hello");
        let mut out = String::new();
        let mut on_chunk = |s: &str| out.push_str(s);

        let outcome = f.session.submit(docs("A"), &mut on_chunk).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Deferred));
        assert!(f.sender.sent().is_empty());
        assert!(f.session.has_pending());

        let reply = f.session.drive_pending(&mut on_chunk).await.unwrap();
        assert_eq!(reply.map(|r| r.answer).as_deref(), Some("ok"));
        let sent = f.sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].conversation_id, "c1");
        assert_eq!(sent[0].text, "hello");
        assert_eq!(sent[0].document_ids, vec!["A"]);
        assert_eq!(sent[0].history.last().map(|m| m.content.as_str()), Some("hello"));
        assert!(!f.session.has_pending());
        assert!(f.session.draft().is_blank());
        assert_eq!(f.session.transcript().len(), 2);
        assert_eq!(f.session.trigger_state(), TriggerState::ArmedOrIdle);
        drop(on_chunk);
        assert_eq!(out, "ok");

        // Same id published again is not a transition.
        f.publisher.publish(ConversationRef::durable("c1", false));
        let again = f.session.on_conversation_changed(&mut no_output()).await.unwrap();
        assert!(again.is_none());
        assert_eq!(f.sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn second_attempt_overwrites_the_first() {
        let mut f = fixture(ConversationRef::default(), SendMode::Answer, None, false);
        f.session.draft_mut().set_text("first");
        f.session.submit(docs("A"), &mut no_output()).await.unwrap();
        f.session.draft_mut().set_text("second");
        f.session.submit(docs("B"), &mut no_output()).await.unwrap();
        assert_eq!(f.provisioner.calls.load(Ordering::SeqCst), 2);

        f.publisher.publish(ConversationRef::durable("c9", true));
        let reply = f.session.drive_pending(&mut no_output()).await.unwrap();
        assert!(reply.is_some());
        let sent = f.sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].document_ids, vec!["B"]);
        assert_eq!(sent[0].text, "second");
    }

    #[tokio::test]
    async fn provisioning_failure_keeps_request_until_abandoned() {
        let mut f = fixture(ConversationRef::default(), SendMode::Answer, None, true);
        f.session.draft_mut().set_text("hello");
        let err = f.session.submit(docs("A"), &mut no_output()).await.unwrap_err();
        assert!(matches!(err, ChatError::Provision(_)));
        assert!(f.sender.sent().is_empty());
        assert!(f.session.has_pending());

        assert_eq!(f.session.abandon_pending(), Some(docs("A")));
        assert!(!f.session.has_pending());
        assert_eq!(f.session.draft().text, "hello");
    }

    #[tokio::test]
    async fn existing_conversation_sends_immediately() {
        let mut f = fixture(ConversationRef::durable("c1", false), SendMode::Answer, None, false);
        f.session.draft_mut().set_text("hi");
        let outcome = f.session.submit(docs("A"), &mut no_output()).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Sent(_)));
        assert_eq!(f.provisioner.calls.load(Ordering::SeqCst), 0);
        assert!(!f.session.has_pending());
        assert_eq!(f.sender.sent().len(), 1);

        // Without anything parked, a new id dispatches nothing.
        f.publisher.publish(ConversationRef::durable("c2", false));
        assert!(f.session.on_conversation_changed(&mut no_output()).await.unwrap().is_none());
        assert_eq!(f.sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn blank_draft_is_ignored() {
        let mut f = fixture(ConversationRef::default(), SendMode::Answer, Some("c1"), false);
        f.session.draft_mut().set_text("   ");
        let outcome = f.session.submit(docs("A"), &mut no_output()).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Ignored));
        assert_eq!(f.provisioner.calls.load(Ordering::SeqCst), 0);
        assert!(!f.session.has_pending());
    }

    #[tokio::test]
    async fn send_failure_keeps_the_draft() {
        let mut f = fixture(ConversationRef::durable("c1", false), SendMode::Fail, None, false);
        f.session.draft_mut().set_text("retry me");
        f.session.draft_mut().attach_document("d1");
        let err = f.session.submit_draft(&mut no_output()).await.unwrap_err();
        assert!(matches!(err, ChatError::Send(_)));
        assert_eq!(f.session.draft().text, "retry me");
        assert_eq!(f.session.draft().pending_document_ids, vec!["d1"]);
        assert!(f.session.transcript().is_empty());
    }

    #[tokio::test]
    async fn resubmitting_kept_draft_after_failure() {
        let mut f = fixture(ConversationRef::durable("c1", false), SendMode::FailFirst, None, false);
        f.session.draft_mut().set_text("retry me");
        f.session.draft_mut().attach_document("d1");
        assert!(f.session.submit_draft(&mut no_output()).await.is_err());

        let outcome = f.session.submit_draft(&mut no_output()).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Sent(_)));
        let sent = f.sender.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].text, "retry me");
        assert_eq!(sent[1].document_ids, vec!["d1"]);
        assert_eq!(sent[1].history.len(), 1);
        assert!(f.session.draft().is_blank());
    }

    #[tokio::test]
    async fn switching_conversation_discards_pending_send() {
        let mut f = fixture(ConversationRef::default(), SendMode::Answer, None, false);
        f.session.draft_mut().set_text("hello");
        f.session.submit(docs("A"), &mut no_output()).await.unwrap();

        f.publisher.publish(ConversationRef::durable("other", false));
        f.session.switch_conversation(Vec::new());
        assert!(!f.session.has_pending());
        assert!(f.session.on_conversation_changed(&mut no_output()).await.unwrap().is_none());
        assert!(f.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn stop_handle_cancels_in_flight_send() {
        let mut f = fixture(ConversationRef::durable("c1", false), SendMode::WaitForCancel, None, false);
        f.session.draft_mut().set_text("long question");
        assert!(!f.session.stop_handle().stop());

        let stop = f.session.stop_handle();
        let stopper = tokio::spawn(async move {
            while !stop.stop() {
                tokio::task::yield_now().await;
            }
        });
        let err = f.session.submit_draft(&mut no_output()).await.unwrap_err();
        stopper.await.unwrap();
        assert!(matches!(err, ChatError::Cancelled));
        assert_eq!(f.session.draft().text, "long question");
        assert!(!f.session.stop_handle().stop());
    }

    #[tokio::test]
    async fn cancelled_session_stops_waiting() {
        let mut f = fixture(ConversationRef::default(), SendMode::Answer, None, false);
        f.session.draft_mut().set_text("hello");
        f.session.submit(docs("A"), &mut no_output()).await.unwrap();
        // Drain the temporary publish so the wait has to block.
        assert!(f.session.on_conversation_changed(&mut no_output()).await.unwrap().is_none());

        f.session.cancellation_token().cancel();
        assert!(f.session.drive_pending(&mut no_output()).await.unwrap().is_none());
        assert!(f.session.has_pending());
        assert!(f.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn direct_send_after_unobserved_id_replaces_parked_request() {
        let mut f = fixture(ConversationRef::default(), SendMode::Answer, Some("c1"), false);
        f.session.draft_mut().set_text("first");
        let outcome = f.session.submit(docs("A"), &mut no_output()).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Deferred));

        // The id has been published but the trigger has not run yet.
        f.session.draft_mut().set_text("second");
        let outcome = f.session.submit(docs("B"), &mut no_output()).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Sent(_)));
        assert!(!f.session.has_pending());

        assert!(f.session.on_conversation_changed(&mut no_output()).await.unwrap().is_none());
        assert!(f.session.drive_pending(&mut no_output()).await.unwrap().is_none());
        let sent = f.sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].conversation_id, "c1");
        assert_eq!(sent[0].text, "second");
        assert_eq!(sent[0].document_ids, vec!["B"]);
    }

    #[tokio::test]
    async fn parked_send_with_cleared_text_is_not_sent() {
        let mut f = fixture(ConversationRef::default(), SendMode::Answer, None, false);
        f.session.draft_mut().set_text("hello");
        f.session.submit(docs("A"), &mut no_output()).await.unwrap();
        f.session.draft_mut().set_text("");

        f.publisher.publish(ConversationRef::durable("c1", true));
        let err = f.session.on_conversation_changed(&mut no_output()).await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyMessage));
        assert!(f.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn regenerate_resends_last_user_message() {
        let mut f = fixture(ConversationRef::durable("c1", false), SendMode::Answer, None, false);
        assert!(f.session.regenerate_last(&mut no_output()).await.unwrap().is_none());

        f.session.draft_mut().set_text("q1");
        f.session.submit_draft(&mut no_output()).await.unwrap();
        f.session.draft_mut().set_text("q2");
        f.session.draft_mut().attach_document("d2");
        f.session.submit_draft(&mut no_output()).await.unwrap();
        f.session.draft_mut().set_text("unsent");

        let reply = f.session.regenerate_last(&mut no_output()).await.unwrap();
        assert!(reply.is_some());
        let sent = f.sender.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2].text, "q2");
        assert_eq!(sent[2].document_ids, vec!["d2"]);
        let history: Vec<&str> = sent[2].history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(history, vec!["q1", "ok", "q2"]);
        assert_eq!(f.session.transcript().len(), 4);
        assert_eq!(f.session.draft().text, "unsent");
    }

    #[tokio::test]
    async fn failed_regenerate_keeps_transcript() {
        let mut f = fixture(ConversationRef::durable("c1", false), SendMode::Fail, None, false);
        f.session.switch_conversation(vec![
            TranscriptEntry {
                message: Message::user("q", Vec::new()),
                reference: None,
            },
            TranscriptEntry {
                message: Message::assistant("old answer", Some("a0".to_string())),
                reference: None,
            },
        ]);
        assert!(f.session.regenerate_last(&mut no_output()).await.is_err());
        assert_eq!(f.session.transcript().len(), 2);
        assert_eq!(f.session.transcript()[1].message.content, "old answer");
    }

    #[tokio::test]
    async fn removing_user_message_takes_its_answer() {
        let mut f = fixture(ConversationRef::durable("c1", false), SendMode::Answer, None, false);
        for q in ["q1", "q2"] {
            f.session.draft_mut().set_text(q);
            f.session.submit_draft(&mut no_output()).await.unwrap();
        }
        let first_user = f.session.transcript()[0].message.id.clone().unwrap();

        assert!(f.session.remove_message("missing").is_empty());
        let removed = f.session.remove_message(&first_user);
        assert_eq!(removed, vec![first_user, "a1".to_string()]);
        assert_eq!(f.session.transcript().len(), 2);
        assert_eq!(f.session.transcript()[0].message.content, "q2");

        // An assistant message goes alone.
        assert_eq!(f.session.remove_message("a1"), vec!["a1".to_string()]);
        assert_eq!(f.session.transcript().len(), 1);
    }

    #[test]
    fn history_attaches_references_to_assistant_messages() {
        let conversation = Conversation {
            id: "c1".to_string(),
            dialog_id: "d1".to_string(),
            name: "n".to_string(),
            message: vec![
                Message::assistant("Hi! How can I help?", None),
                Message::user("q", Vec::new()),
                Message::assistant("answer", None),
            ],
            reference: vec![
                Reference::default(),
                Reference {
                    chunks: vec![ReferenceChunk {
                        id: "k1".to_string(),
                        ..Default::default()
                    }],
                    doc_aggs: Vec::new(),
                },
            ],
            create_time: None,
            update_time: None,
        };
        let transcript = transcript_from_conversation(&conversation);
        assert_eq!(transcript.len(), 3);
        assert!(transcript[0].reference.is_none());
        assert!(transcript[1].reference.is_none());
        assert_eq!(transcript[2].reference.as_ref().unwrap().chunks[0].id, "k1");
    }
}
