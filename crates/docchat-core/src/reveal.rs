//! Progressive display of a completed assistant reply.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::RevealConfig;
use crate::error::{Error, Result};
use crate::store::{ConversationStore, RevealTicket};

/// How a reveal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealOutcome {
    /// The full text was written.
    Completed,
    /// Stopped on request; the body keeps whatever prefix was shown.
    Cancelled,
    /// The slot was taken over (new transcript, new reveal or fast-forward).
    Stale,
}

/// Writes a growing prefix of the reply into its transcript slot, a fixed
/// number of characters per tick, ending with the complete text.
#[derive(Debug, Clone, Copy)]
pub struct RevealScheduler {
    chunk_chars: usize,
    tick: Duration,
}

impl RevealScheduler {
    pub fn new(chunk_chars: usize, tick: Duration) -> Self {
        Self {
            chunk_chars: chunk_chars.max(1),
            tick,
        }
    }

    pub fn from_config(config: &RevealConfig) -> Self {
        Self::new(config.chunk_chars, config.tick())
    }

    /// Number of ticks needed to show `text` completely.
    pub fn ticks_for(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chunk_chars)
    }

    pub async fn run(
        &self,
        store: &ConversationStore,
        ticket: &RevealTicket,
        cancel: &CancellationToken,
    ) -> RevealOutcome {
        let text = ticket.text();
        // Byte offset just past each character, so prefixes stay on char boundaries.
        let ends: Vec<usize> = text
            .char_indices()
            .map(|(i, c)| i + c.len_utf8())
            .collect();

        if ends.is_empty() {
            return Self::finish(store, ticket);
        }

        let mut ticker = time::interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shown = 0usize;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    store.abandon_reveal(ticket);
                    tracing::debug!(index = ticket.index(), shown, "Reveal cancelled");
                    return RevealOutcome::Cancelled;
                }
                _ = ticker.tick() => {}
            }

            shown = (shown + self.chunk_chars).min(ends.len());
            if shown == ends.len() {
                return Self::finish(store, ticket);
            }
            if !store.write_reveal(ticket, &text[..ends[shown - 1]]) {
                tracing::debug!(index = ticket.index(), "Reveal slot taken over");
                return RevealOutcome::Stale;
            }
        }
    }

    fn finish(store: &ConversationStore, ticket: &RevealTicket) -> RevealOutcome {
        if store.finish_reveal(ticket) {
            RevealOutcome::Completed
        } else {
            RevealOutcome::Stale
        }
    }

    /// Run the reveal on its own task.
    pub fn spawn(&self, store: Arc<ConversationStore>, ticket: RevealTicket) -> RevealHandle {
        let scheduler = *self;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { scheduler.run(&store, &ticket, &token).await });
        RevealHandle {
            _guard: cancel.clone().drop_guard(),
            cancel,
            task,
        }
    }
}

impl Default for RevealScheduler {
    fn default() -> Self {
        Self::from_config(&RevealConfig::default())
    }
}

/// A reveal running on its own task. Dropping the handle cancels it.
pub struct RevealHandle {
    cancel: CancellationToken,
    task: JoinHandle<RevealOutcome>,
    _guard: DropGuard,
}

impl RevealHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<RevealOutcome> {
        let RevealHandle { task, _guard, .. } = self;
        task.await
            .map_err(|err| Error::Scheduler(format!("Reveal task failed: {err}")))
    }
}
