//! Message lifecycle orchestration for one conversation.
//!
//! A [`ChatSession`] drives send → poll → reconcile → reveal for replies and
//! upload → wait-for-index → attach for documents, writing every step into
//! its [`ConversationStore`]. At most one reply pipeline is alive at a time;
//! all background work hangs off one root [`CancellationToken`] cancelled by
//! [`ChatSession::dispose`].

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::Backend;
use crate::config::{Config, UploadConfig};
use crate::error::{Error, Result};
use crate::indexing::{IndexOutcome, IndexingWaiter};
use crate::models::{Message, PDF_MIME, SendMessageRequest, UploadFile};
use crate::notice::Notice;
use crate::poller::{PollOutcome, StatusPoller};
use crate::reveal::RevealScheduler;
use crate::store::{ConversationStore, MessagePhase, StoreEvent, UploadPhase};

const MIB: u64 = 1024 * 1024;

struct ReplyTask {
    job_id: String,
    cancel: CancellationToken,
    handle: Option<JoinHandle<Result<()>>>,
}

/// Orchestrator for one conversation.
pub struct ChatSession {
    conversation_id: String,
    backend: Arc<dyn Backend>,
    store: Arc<ConversationStore>,
    poller: StatusPoller,
    waiter: IndexingWaiter,
    reveal: RevealScheduler,
    upload: UploadConfig,
    shutdown: CancellationToken,
    reply: Mutex<Option<ReplyTask>>,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn Backend>, conversation_id: impl Into<String>, config: &Config) -> Self {
        let conversation_id = conversation_id.into();
        Self {
            store: Arc::new(ConversationStore::new(conversation_id.clone())),
            poller: StatusPoller::new(backend.clone(), &config.polling),
            waiter: IndexingWaiter::new(backend.clone(), &config.indexing),
            reveal: RevealScheduler::from_config(&config.reveal),
            upload: config.upload.clone(),
            shutdown: CancellationToken::new(),
            reply: Mutex::new(None),
            conversation_id,
            backend,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    pub fn is_disposed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn reply_slot(&self) -> MutexGuard<'_, Option<ReplyTask>> {
        self.reply.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Race `fut` against session shutdown.
    async fn cancellable<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(Error::Cancelled),
            result = fut => result,
        }
    }

    /// Show `notice` for a failed step unless the failure is a shutdown.
    fn fail(&self, notice: Notice, err: Error) -> Error {
        if !matches!(err, Error::Cancelled) {
            self.store.set_notice(notice);
        }
        err
    }

    /// Fetch the conversation and replace the local transcript.
    pub async fn load(&self) -> Result<()> {
        self.ensure_open()?;
        self.store.update_status(|s| s.loading = true);

        let result = self
            .cancellable(self.backend.conversation(&self.conversation_id))
            .await;
        self.store.update_status(|s| s.loading = false);

        match result {
            Ok(detail) => {
                let len = self.store.replace_transcript(detail);
                tracing::info!(conversation_id = %self.conversation_id, messages = len, "Conversation loaded");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(conversation_id = %self.conversation_id, error = %err, "Failed to load conversation");
                Err(self.fail(Notice::LoadFailed, err))
            }
        }
    }

    /// Send a user message and start waiting for the reply.
    ///
    /// Returns the job id once the backend accepted the message; the reply
    /// arrives in the store later. A reveal still running is completed at
    /// once and any earlier reply pipeline is cancelled.
    pub async fn send_message(&self, text: &str) -> Result<String> {
        self.ensure_open()?;
        let text = text.trim();
        if text.is_empty() {
            self.store.set_notice(Notice::EmptyMessage);
            return Err(Error::Validation("Message is empty".to_string()));
        }
        if !self.store.try_begin_send() {
            return Err(Error::Busy("A message is already being sent".to_string()));
        }

        self.store.finish_reveal_now();
        self.cancel_reply();

        let slot = self.store.append(Message::optimistic_user(text));
        let request = SendMessageRequest {
            conversation_id: self.conversation_id.clone(),
            text: text.to_string(),
            knowledge_base_id: self.store.knowledge_base_id().unwrap_or_default(),
        };

        match self.cancellable(self.backend.send_message(&request)).await {
            Ok(ticket) => {
                let job_id = ticket.job_id;
                tracing::info!(conversation_id = %self.conversation_id, job_id = %job_id, "Message accepted");
                self.store.update_status(|s| {
                    s.message = MessagePhase::AwaitingProcessing {
                        job_id: job_id.clone(),
                    };
                });
                self.start_reply(job_id.clone());
                Ok(job_id)
            }
            Err(err) => {
                tracing::warn!(conversation_id = %self.conversation_id, error = %err, "Failed to send message");
                self.store.remove_optimistic(slot);
                self.store.update_status(|s| s.message = MessagePhase::Idle);
                Err(self.fail(Notice::SendFailed, err))
            }
        }
    }

    fn cancel_reply(&self) {
        if let Some(previous) = self.reply_slot().take() {
            tracing::debug!(job_id = %previous.job_id, "Cancelling previous reply pipeline");
            previous.cancel.cancel();
        }
    }

    fn start_reply(&self, job_id: String) {
        let cancel = self.shutdown.child_token();
        let pipeline = ReplyPipeline {
            conversation_id: self.conversation_id.clone(),
            backend: self.backend.clone(),
            store: self.store.clone(),
            poller: self.poller.clone(),
            reveal: self.reveal,
        };

        let inner = tokio::spawn(pipeline.run(job_id.clone(), cancel.clone()));
        let store = self.store.clone();
        let supervised_job = job_id.clone();
        let handle = tokio::spawn(async move {
            match inner.await {
                Ok(result) => result,
                Err(err) => {
                    tracing::error!(job_id = %supervised_job, error = %err, "Reply pipeline crashed");
                    store.update_status(|s| {
                        s.message = MessagePhase::Idle;
                        s.notice = Some(Notice::StatusCheckFailed);
                    });
                    Err(Error::Scheduler(format!("Reply pipeline failed: {err}")))
                }
            }
        });

        *self.reply_slot() = Some(ReplyTask {
            job_id,
            cancel,
            handle: Some(handle),
        });
    }

    /// Wait until the current reply has been fetched and revealed.
    ///
    /// Returns immediately when no reply is pending.
    pub async fn wait_for_reply(&self) -> Result<()> {
        let handle = self.reply_slot().as_mut().and_then(|task| task.handle.take());
        let Some(handle) = handle else {
            return Ok(());
        };
        match handle.await {
            Ok(result) => result,
            Err(err) => {
                self.store.update_status(|s| {
                    s.message = MessagePhase::Idle;
                    s.notice = Some(Notice::StatusCheckFailed);
                });
                Err(Error::Scheduler(format!("Reply supervisor failed: {err}")))
            }
        }
    }

    /// Upload a PDF, wait for it to be indexed and attach it to the conversation.
    ///
    /// Returns the message produced by the attach step, which is also
    /// appended to the transcript.
    pub async fn upload_document(&self, file: UploadFile) -> Result<Message> {
        self.ensure_open()?;
        if file.mime_type != PDF_MIME {
            self.store.set_notice(Notice::NotPdf);
            return Err(Error::Validation(format!(
                "{} is not a PDF ({})",
                file.name, file.mime_type
            )));
        }
        if file.len() > self.upload.max_bytes {
            self.store.set_notice(Notice::TooLarge {
                max_mb: self.upload.max_bytes / MIB,
            });
            return Err(Error::Validation(format!(
                "{} exceeds {} bytes",
                file.name, self.upload.max_bytes
            )));
        }
        let Some(generation) = self.store.try_begin_upload(&file.name) else {
            self.store.set_notice(Notice::UploadBusy);
            return Err(Error::Busy("A document upload is in progress".to_string()));
        };

        let result = self.run_upload(&file).await;
        if matches!(result, Err(Error::Cancelled)) || self.is_disposed() {
            // No settle timer can run after shutdown; go idle directly.
            self.store.abort_upload(generation);
            return result;
        }
        if let Err(err) = &result {
            tracing::warn!(conversation_id = %self.conversation_id, file = %file.name, error = %err, "Document upload failed");
        }
        self.store.update_status(|s| {
            s.upload = UploadPhase::Done {
                file_name: file.name.clone(),
                succeeded: result.is_ok(),
            };
        });
        self.schedule_settle(generation);
        result
    }

    async fn run_upload(&self, file: &UploadFile) -> Result<Message> {
        let directory_id = self
            .upload_directory()
            .await
            .map_err(|err| self.fail(Notice::UploadFailed, err))?;

        let document = self
            .cancellable(self.backend.upload_document(&directory_id, file))
            .await
            .map_err(|err| self.fail(Notice::UploadFailed, err))?;
        tracing::info!(document_id = %document.id, directory_id = %directory_id, "Document uploaded");

        self.store.update_status(|s| {
            s.upload = UploadPhase::AwaitingIndex {
                file_name: file.name.clone(),
                document_id: document.id.clone(),
            };
        });
        match self.waiter.run(&document.id, &self.shutdown).await {
            IndexOutcome::Indexed(_) => {}
            IndexOutcome::TimedOut { checks } => {
                return Err(self.fail(
                    Notice::IndexingTimedOut,
                    Error::Timeout(format!("{} not indexed after {checks} checks", file.name)),
                ));
            }
            IndexOutcome::Cancelled => return Err(Error::Cancelled),
        }

        self.store.update_status(|s| {
            s.upload = UploadPhase::Attaching {
                file_name: file.name.clone(),
            };
        });
        let mut message = self
            .cancellable(
                self.backend
                    .attach_document(&self.conversation_id, &document.id),
            )
            .await
            .map_err(|err| self.fail(Notice::AttachFailed, err))?;

        message.is_newly_attached = true;
        self.store.append(message.clone());
        tracing::info!(conversation_id = %self.conversation_id, document_id = %document.id, "Document attached");
        Ok(message)
    }

    /// Configured upload directory, else the root of the directory tree.
    async fn upload_directory(&self) -> Result<String> {
        if let Some(id) = self.upload.directory_id.as_deref().filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }
        let root = self.cancellable(self.backend.directory_tree()).await?;
        if root.id.is_empty() {
            return Err(Error::NotFound("root directory".to_string()));
        }
        Ok(root.id)
    }

    fn schedule_settle(&self, generation: u64) {
        let store = self.store.clone();
        let cancel = self.shutdown.child_token();
        let settle = self.upload.settle();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(settle) => {
                    store.settle_upload(generation);
                }
            }
        });
    }

    /// Stop all background work. Later commands fail with [`Error::Cancelled`].
    pub fn dispose(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        if let Some(task) = self.reply_slot().take() {
            tracing::debug!(job_id = %task.job_id, "Dropping reply pipeline");
        }
        self.store.update_status(|s| {
            s.message = MessagePhase::Idle;
            s.upload = UploadPhase::Idle;
        });
        tracing::info!(conversation_id = %self.conversation_id, "Session disposed");
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Everything a reply pipeline needs, owned so it can run on its own task.
struct ReplyPipeline {
    conversation_id: String,
    backend: Arc<dyn Backend>,
    store: Arc<ConversationStore>,
    poller: StatusPoller,
    reveal: RevealScheduler,
}

impl ReplyPipeline {
    async fn run(self, job_id: String, cancel: CancellationToken) -> Result<()> {
        let outcome = self
            .poller
            .run(&job_id, &cancel, |job| {
                tracing::trace!(job_id = %job.id, status = %job.status, "Reply status");
            })
            .await;
        match outcome {
            PollOutcome::Processed(_) => {}
            PollOutcome::TimedOut { attempts } => {
                tracing::warn!(job_id = %job_id, attempts, "Reply not processed in time, fetching anyway");
                self.store.set_notice(Notice::ReplyTimedOut);
            }
            PollOutcome::Cancelled => return Ok(()),
        }

        let previous_len = self.store.len();
        let fetched = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            fetched = self.backend.conversation(&self.conversation_id) => fetched,
        };
        let detail = match fetched {
            Ok(detail) => detail,
            Err(err) => {
                tracing::warn!(conversation_id = %self.conversation_id, job_id = %job_id, error = %err, "Failed to fetch reply");
                self.store.update_status(|s| {
                    if s.message.is_awaiting(&job_id) {
                        s.message = MessagePhase::Idle;
                    }
                    s.notice = Some(Notice::LoadFailed);
                });
                return Err(err);
            }
        };
        let Some(ticket) = self.store.reconcile(&job_id, detail, previous_len) else {
            tracing::debug!(job_id = %job_id, "No new assistant message to reveal");
            return Ok(());
        };

        let outcome = self.reveal.run(&self.store, &ticket, &cancel).await;
        tracing::debug!(job_id = %job_id, ?outcome, "Reveal ended");
        Ok(())
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
