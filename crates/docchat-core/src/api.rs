//! Backend operations the orchestrator depends on.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    ConversationDetail, DirectorySnapshot, DocumentRecord, JobTicket, Message, ProcessingJob,
    SendMessageRequest, UploadFile,
};

/// Chat backend as seen by a [`ChatSession`](crate::session::ChatSession).
///
/// [`HttpBackend`](crate::http::HttpBackend) is the production implementation.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Submit a user message; generation continues asynchronously server-side.
    async fn send_message(&self, request: &SendMessageRequest) -> Result<JobTicket>;

    /// Current status of a processing job.
    async fn job_status(&self, job_id: &str) -> Result<ProcessingJob>;

    /// Authoritative conversation with its full transcript.
    async fn conversation(&self, conversation_id: &str) -> Result<ConversationDetail>;

    /// Store a document in a directory; indexing starts server-side.
    async fn upload_document(&self, directory_id: &str, file: &UploadFile)
    -> Result<DocumentRecord>;

    /// Attach an indexed document, returning the message it produced.
    async fn attach_document(&self, conversation_id: &str, document_id: &str) -> Result<Message>;

    /// Snapshot of the whole directory tree, from the root.
    async fn directory_tree(&self) -> Result<DirectorySnapshot>;
}
