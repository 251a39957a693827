//! Scripted in-memory backend for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::api::Backend;
use crate::error::{Error, Result};
use crate::models::{
    ConversationDetail, DirectorySnapshot, DocumentRecord, JobStatus, JobTicket, Message,
    MessageOrigin, ProcessingJob, SendMessageRequest, UploadFile,
};

/// A backend call as recorded by [`ScriptedBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Send(String),
    Status(String),
    Conversation(String),
    Upload {
        directory_id: String,
        file_name: String,
    },
    Attach {
        conversation_id: String,
        document_id: String,
    },
    Tree,
}

/// Backend answering each call from a queue of prepared results.
///
/// An exhausted queue answers with an error, so tests only script what
/// they expect to be asked.
#[derive(Default)]
pub struct ScriptedBackend {
    sends: Mutex<VecDeque<Result<JobTicket>>>,
    statuses: Mutex<VecDeque<Result<ProcessingJob>>>,
    conversations: Mutex<VecDeque<Result<ConversationDetail>>>,
    uploads: Mutex<VecDeque<Result<DocumentRecord>>>,
    attaches: Mutex<VecDeque<Result<Message>>>,
    trees: Mutex<VecDeque<Result<DirectorySnapshot>>>,
    calls: Mutex<Vec<Call>>,
    send_gate: Mutex<Option<Arc<Semaphore>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn next<T>(queue: &Mutex<VecDeque<Result<T>>>, what: &str) -> Result<T> {
    lock(queue)
        .pop_front()
        .unwrap_or_else(|| Err(Error::Other(format!("script exhausted: {what}"))))
}

impl ScriptedBackend {
    pub fn push_send(&self, result: Result<JobTicket>) {
        lock(&self.sends).push_back(result);
    }

    pub fn push_status(&self, result: Result<ProcessingJob>) {
        lock(&self.statuses).push_back(result);
    }

    pub fn push_conversation(&self, result: Result<ConversationDetail>) {
        lock(&self.conversations).push_back(result);
    }

    pub fn push_upload(&self, result: Result<DocumentRecord>) {
        lock(&self.uploads).push_back(result);
    }

    pub fn push_attach(&self, result: Result<Message>) {
        lock(&self.attaches).push_back(result);
    }

    pub fn push_tree(&self, result: Result<DirectorySnapshot>) {
        lock(&self.trees).push_back(result);
    }

    /// Make every later send wait for a permit on the returned semaphore.
    pub fn hold_sends(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *lock(&self.send_gate) = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn send_message(&self, request: &SendMessageRequest) -> Result<JobTicket> {
        self.record(Call::Send(request.text.clone()));
        let gate = lock(&self.send_gate).clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|_| Error::Other("send gate closed".to_string()))?
                .forget();
        }
        next(&self.sends, "send")
    }

    async fn job_status(&self, job_id: &str) -> Result<ProcessingJob> {
        self.record(Call::Status(job_id.to_string()));
        next(&self.statuses, "status")
    }

    async fn conversation(&self, conversation_id: &str) -> Result<ConversationDetail> {
        self.record(Call::Conversation(conversation_id.to_string()));
        next(&self.conversations, "conversation")
    }

    async fn upload_document(
        &self,
        directory_id: &str,
        file: &UploadFile,
    ) -> Result<DocumentRecord> {
        self.record(Call::Upload {
            directory_id: directory_id.to_string(),
            file_name: file.name.clone(),
        });
        next(&self.uploads, "upload")
    }

    async fn attach_document(&self, conversation_id: &str, document_id: &str) -> Result<Message> {
        self.record(Call::Attach {
            conversation_id: conversation_id.to_string(),
            document_id: document_id.to_string(),
        });
        next(&self.attaches, "attach")
    }

    async fn directory_tree(&self) -> Result<DirectorySnapshot> {
        self.record(Call::Tree);
        next(&self.trees, "tree")
    }
}

pub fn job(id: &str, status: JobStatus) -> ProcessingJob {
    ProcessingJob {
        id: id.to_string(),
        created_at: None,
        updated_at: None,
        status,
    }
}

pub fn ticket(job_id: &str) -> JobTicket {
    JobTicket {
        job_id: job_id.to_string(),
    }
}

/// A failure the backend might report under load.
pub fn transient() -> Error {
    Error::Api {
        status: 503,
        message: "Service Unavailable".to_string(),
    }
}

pub fn message(id: &str, origin: MessageOrigin, body: &str) -> Message {
    Message {
        id: id.to_string(),
        body: body.to_string(),
        timestamp: None,
        origin,
        document_name: String::new(),
        document_ext: String::new(),
        is_newly_attached: false,
    }
}

pub fn user(id: &str, body: &str) -> Message {
    message(id, MessageOrigin::user(), body)
}

pub fn assistant(id: &str, body: &str) -> Message {
    message(id, MessageOrigin::assistant(), body)
}

pub fn conversation(id: &str, messages: Vec<Message>) -> ConversationDetail {
    ConversationDetail {
        id: id.to_string(),
        name: "Chat".to_string(),
        messages,
        ..Default::default()
    }
}

pub fn document(id: &str, name: &str, status: &str) -> DocumentRecord {
    DocumentRecord {
        id: id.to_string(),
        name: name.to_string(),
        status: status.to_string(),
        ..Default::default()
    }
}

pub fn directory(
    id: &str,
    documents: Vec<DocumentRecord>,
    subdirectories: Vec<DirectorySnapshot>,
) -> DirectorySnapshot {
    DirectorySnapshot {
        id: id.to_string(),
        owner_id: "root".to_string(),
        name: id.to_string(),
        documents,
        subdirectories,
        ..Default::default()
    }
}
