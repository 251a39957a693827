//! In-memory transcript and observable session state for one conversation.
//!
//! The store is the only owner of the message sequence. Writers are the
//! session orchestrator and the reveal scheduler; readers subscribe to
//! [`StoreEvent`]s and take snapshots. All access goes through one mutex that
//! is never held across an `.await`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{ConversationDetail, Message};
use crate::notice::Notice;

const EVENT_CAPACITY: usize = 256;

/// Change notification emitted after every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The whole transcript was replaced by an authoritative fetch.
    TranscriptReplaced { len: usize },
    MessageAppended { index: usize },
    MessageRemoved { index: usize },
    /// The body of a revealing message grew.
    MessageUpdated { index: usize },
    RevealFinished { index: usize },
    StatusChanged,
}

/// Message lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum MessagePhase {
    #[default]
    Idle,
    Sending,
    AwaitingProcessing {
        job_id: String,
    },
    Revealing,
}

impl MessagePhase {
    /// Whether the reply to `job_id` is the one being awaited.
    pub fn is_awaiting(&self, job_id: &str) -> bool {
        matches!(self, MessagePhase::AwaitingProcessing { job_id: current } if current == job_id)
    }
}

/// Document upload lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum UploadPhase {
    #[default]
    Idle,
    Uploading {
        file_name: String,
    },
    AwaitingIndex {
        file_name: String,
        document_id: String,
    },
    Attaching {
        file_name: String,
    },
    /// Finished, waiting for the settle delay before going idle.
    Done {
        file_name: String,
        succeeded: bool,
    },
}

impl UploadPhase {
    /// Whether an upload is still in flight.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            UploadPhase::Uploading { .. }
                | UploadPhase::AwaitingIndex { .. }
                | UploadPhase::Attaching { .. }
        )
    }

    /// Progress line for the UI.
    pub fn progress_text(&self) -> Option<String> {
        match self {
            UploadPhase::Idle => None,
            UploadPhase::Uploading { file_name } => Some(format!("Enviando {file_name}...")),
            UploadPhase::AwaitingIndex { file_name, .. } => {
                Some(format!("Indexando {file_name}..."))
            }
            UploadPhase::Attaching { file_name } => {
                Some(format!("Anexando {file_name} ao chat..."))
            }
            UploadPhase::Done {
                file_name,
                succeeded: true,
            } => Some(format!("{file_name} anexado com sucesso")),
            UploadPhase::Done {
                succeeded: false, ..
            } => None,
        }
    }
}

/// Observable state besides the transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub loading: bool,
    pub message: MessagePhase,
    pub upload: UploadPhase,
    pub notice: Option<Notice>,
}

/// Position of a message appended to the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSlot {
    index: usize,
    revision: u64,
}

impl MessageSlot {
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Permission to write a reveal into one message slot.
///
/// A ticket goes stale when the transcript is replaced or another reveal
/// starts; writes through a stale ticket are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealTicket {
    seq: u64,
    revision: u64,
    index: usize,
    text: String,
}

impl RevealTicket {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Full text the slot ends with.
    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug)]
struct ActiveReveal {
    seq: u64,
    index: usize,
    text: String,
}

#[derive(Debug, Default)]
struct StoreState {
    header: ConversationDetail,
    messages: Vec<Message>,
    revision: u64,
    reveal: Option<ActiveReveal>,
    next_reveal_seq: u64,
    upload_generation: u64,
    status: SessionStatus,
}

impl StoreState {
    fn reveal_matches(&self, ticket: &RevealTicket) -> bool {
        self.revision == ticket.revision
            && self
                .reveal
                .as_ref()
                .is_some_and(|active| active.seq == ticket.seq)
            && ticket.index < self.messages.len()
    }

    fn start_reveal(&mut self, index: usize, text: String) -> Option<RevealTicket> {
        let message = self.messages.get_mut(index)?;
        message.body.clear();
        self.next_reveal_seq += 1;
        let seq = self.next_reveal_seq;
        self.reveal = Some(ActiveReveal {
            seq,
            index,
            text: text.clone(),
        });
        self.status.message = MessagePhase::Revealing;
        Some(RevealTicket {
            seq,
            revision: self.revision,
            index,
            text,
        })
    }

    fn end_reveal(&mut self) {
        self.reveal = None;
        if self.status.message == MessagePhase::Revealing {
            self.status.message = MessagePhase::Idle;
        }
    }
}

/// Transcript and status of one conversation.
#[derive(Debug)]
pub struct ConversationStore {
    conversation_id: String,
    state: Mutex<StoreState>,
    events: broadcast::Sender<StoreEvent>,
}

impl ConversationStore {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            conversation_id: conversation_id.into(),
            state: Mutex::new(StoreState::default()),
            events,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Receive change notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Snapshot of the transcript.
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().messages.is_empty()
    }

    pub fn message(&self, index: usize) -> Option<Message> {
        self.lock().messages.get(index).cloned()
    }

    pub fn last_message(&self) -> Option<Message> {
        self.lock().messages.last().cloned()
    }

    /// Conversation metadata from the last fetch (without messages).
    pub fn header(&self) -> ConversationDetail {
        self.lock().header.clone()
    }

    /// Knowledge base linked to the conversation, if any.
    pub fn knowledge_base_id(&self) -> Option<String> {
        self.lock().header.knowledge_base().map(str::to_string)
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status.clone()
    }

    pub fn is_revealing(&self) -> bool {
        self.lock().reveal.is_some()
    }

    /// Apply a change to the session status.
    pub fn update_status(&self, f: impl FnOnce(&mut SessionStatus)) {
        {
            let mut state = self.lock();
            f(&mut state.status);
        }
        self.emit(StoreEvent::StatusChanged);
    }

    /// Show a notice to the user.
    pub fn set_notice(&self, notice: Notice) {
        self.update_status(|status| status.notice = Some(notice));
    }

    /// Move the message phase to `Sending` unless a send is already running.
    pub fn try_begin_send(&self) -> bool {
        {
            let mut state = self.lock();
            if state.status.message == MessagePhase::Sending {
                return false;
            }
            state.status.message = MessagePhase::Sending;
            state.status.notice = None;
        }
        self.emit(StoreEvent::StatusChanged);
        true
    }

    /// Start an upload unless one is in flight; returns its generation.
    pub fn try_begin_upload(&self, file_name: &str) -> Option<u64> {
        let generation = {
            let mut state = self.lock();
            if state.status.upload.is_active() {
                return None;
            }
            state.upload_generation += 1;
            state.status.upload = UploadPhase::Uploading {
                file_name: file_name.to_string(),
            };
            state.status.notice = None;
            state.upload_generation
        };
        self.emit(StoreEvent::StatusChanged);
        Some(generation)
    }

    /// Reset a finished upload to idle if no newer upload started since.
    pub fn settle_upload(&self, generation: u64) -> bool {
        {
            let mut state = self.lock();
            if state.upload_generation != generation
                || !matches!(state.status.upload, UploadPhase::Done { .. })
            {
                return false;
            }
            state.status.upload = UploadPhase::Idle;
        }
        self.emit(StoreEvent::StatusChanged);
        true
    }

    /// Drop an upload abandoned mid-flight straight back to idle.
    pub fn abort_upload(&self, generation: u64) -> bool {
        {
            let mut state = self.lock();
            if state.upload_generation != generation || state.status.upload == UploadPhase::Idle {
                return false;
            }
            state.status.upload = UploadPhase::Idle;
        }
        self.emit(StoreEvent::StatusChanged);
        true
    }

    /// Replace the transcript with an authoritative copy.
    ///
    /// Any reveal in progress goes stale: its slot may no longer exist.
    pub fn replace_transcript(&self, detail: ConversationDetail) -> usize {
        let len = {
            let mut state = self.lock();
            Self::install(&mut state, detail);
            state.end_reveal();
            state.messages.len()
        };
        self.emit(StoreEvent::TranscriptReplaced { len });
        len
    }

    /// Apply the transcript fetched for the reply to `job_id`.
    ///
    /// Nothing happens unless that job is still the one awaited: a newer send
    /// owns the transcript and phase by then. Otherwise the transcript is
    /// replaced and, if it grew past `previous_len` with an assistant message
    /// at the end, that message starts revealing; else the phase goes idle.
    pub fn reconcile(
        &self,
        job_id: &str,
        detail: ConversationDetail,
        previous_len: usize,
    ) -> Option<RevealTicket> {
        let (len, ticket) = {
            let mut state = self.lock();
            if !state.status.message.is_awaiting(job_id) {
                return None;
            }
            Self::install(&mut state, detail);
            state.end_reveal();
            let len = state.messages.len();
            let reveal_last = len > previous_len
                && state
                    .messages
                    .last()
                    .is_some_and(|m| m.origin.is_assistant());
            let ticket = if reveal_last {
                let text = state.messages[len - 1].body.clone();
                state.start_reveal(len - 1, text)
            } else {
                None
            };
            if ticket.is_none() {
                state.status.message = MessagePhase::Idle;
            }
            (len, ticket)
        };
        self.emit(StoreEvent::TranscriptReplaced { len });
        self.emit(StoreEvent::StatusChanged);
        ticket
    }

    fn install(state: &mut StoreState, mut detail: ConversationDetail) {
        state.messages = std::mem::take(&mut detail.messages);
        state.header = detail;
        state.revision += 1;
    }

    /// Append a message at the end of the transcript.
    pub fn append(&self, message: Message) -> MessageSlot {
        let slot = {
            let mut state = self.lock();
            state.messages.push(message);
            MessageSlot {
                index: state.messages.len() - 1,
                revision: state.revision,
            }
        };
        self.emit(StoreEvent::MessageAppended { index: slot.index });
        slot
    }

    /// Roll back an optimistic message. Does nothing if the transcript was
    /// replaced since it was appended.
    pub fn remove_optimistic(&self, slot: MessageSlot) -> bool {
        {
            let mut state = self.lock();
            let still_there = state.revision == slot.revision
                && state
                    .messages
                    .get(slot.index)
                    .is_some_and(Message::is_optimistic);
            if !still_there {
                return false;
            }
            state.messages.remove(slot.index);
            state.revision += 1;
            state.end_reveal();
        }
        self.emit(StoreEvent::MessageRemoved { index: slot.index });
        true
    }

    /// Start revealing `text` into the message at `index`. Replaces any
    /// reveal already running.
    pub fn begin_reveal(&self, index: usize, text: impl Into<String>) -> Option<RevealTicket> {
        let ticket = self.lock().start_reveal(index, text.into())?;
        self.emit(StoreEvent::MessageUpdated { index });
        Some(ticket)
    }

    /// Overwrite the revealing message body. Returns false if the ticket is stale.
    pub fn write_reveal(&self, ticket: &RevealTicket, body: &str) -> bool {
        {
            let mut state = self.lock();
            if !state.reveal_matches(ticket) {
                return false;
            }
            state.messages[ticket.index].body = body.to_string();
        }
        self.emit(StoreEvent::MessageUpdated {
            index: ticket.index,
        });
        true
    }

    /// Write the full text and end the reveal. Returns false if the ticket is stale.
    pub fn finish_reveal(&self, ticket: &RevealTicket) -> bool {
        {
            let mut state = self.lock();
            if !state.reveal_matches(ticket) {
                return false;
            }
            state.messages[ticket.index].body.clone_from(&ticket.text);
            state.end_reveal();
        }
        self.emit(StoreEvent::RevealFinished {
            index: ticket.index,
        });
        true
    }

    /// End a reveal without writing anything more.
    pub fn abandon_reveal(&self, ticket: &RevealTicket) {
        let ended = {
            let mut state = self.lock();
            let current = state
                .reveal
                .as_ref()
                .is_some_and(|active| active.seq == ticket.seq);
            if current {
                state.end_reveal();
            }
            current
        };
        if ended {
            self.emit(StoreEvent::StatusChanged);
        }
    }

    /// Complete the running reveal immediately with its full text.
    pub fn finish_reveal_now(&self) -> bool {
        let index = {
            let mut state = self.lock();
            let Some(active) = state.reveal.take() else {
                return false;
            };
            let Some(message) = state.messages.get_mut(active.index) else {
                state.end_reveal();
                return false;
            };
            message.body = active.text;
            state.end_reveal();
            active.index
        };
        self.emit(StoreEvent::RevealFinished { index });
        true
    }
}
