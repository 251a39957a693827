//! Waiting for an uploaded document to finish indexing.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::Backend;
use crate::config::IndexingConfig;
use crate::models::DocumentRecord;
use crate::tree;

/// How a wait ended.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOutcome {
    Indexed(DocumentRecord),
    TimedOut { checks: u32 },
    Cancelled,
}

/// Re-reads the directory tree until a document reports the finished status.
#[derive(Clone)]
pub struct IndexingWaiter {
    backend: Arc<dyn Backend>,
    interval: Duration,
    max_checks: Option<u32>,
    finished_status: String,
}

impl IndexingWaiter {
    pub fn new(backend: Arc<dyn Backend>, config: &IndexingConfig) -> Self {
        Self {
            backend,
            interval: config.interval(),
            max_checks: config.max_checks,
            finished_status: config.finished_status.clone(),
        }
    }

    /// Check `document_id` now and then once per interval.
    pub async fn run(&self, document_id: &str, cancel: &CancellationToken) -> IndexOutcome {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut checks = 0u32;

        loop {
            if self.max_checks.is_some_and(|max| checks >= max) {
                tracing::warn!(document_id, checks, "Document not indexed in time");
                return IndexOutcome::TimedOut { checks };
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return IndexOutcome::Cancelled,
                _ = ticker.tick() => {}
            }
            checks += 1;

            let snapshot = tokio::select! {
                biased;
                () = cancel.cancelled() => return IndexOutcome::Cancelled,
                snapshot = self.backend.directory_tree() => snapshot,
            };

            match snapshot {
                Ok(root) => match tree::find_document(&root, document_id) {
                    Some(doc) if doc.has_status(&self.finished_status) => {
                        tracing::info!(document_id, checks, "Document indexed");
                        return IndexOutcome::Indexed(doc.clone());
                    }
                    Some(doc) => {
                        tracing::debug!(document_id, status = %doc.status, "Document still indexing");
                    }
                    None => tracing::debug!(document_id, "Document not in tree yet"),
                },
                Err(err) => {
                    tracing::warn!(document_id, error = %err, "Failed to fetch directory tree");
                }
            }
        }
    }
}
