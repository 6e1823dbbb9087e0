//! Async match queue consumption
//!
//! Worker tasks claim bounded batches and dispatch each message
//! independently: successes are acknowledged, retryable failures go
//! back on the queue with backoff, and messages that are malformed,
//! terminally failed, or out of attempts land in the dead-letter table.
//! One bad message never takes its batch down with it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::MatchError;
use crate::finder::MatchFinder;
use crate::lifecycle::MatchLifecycle;
use crate::models::{QueueAction, QueueMessage};
use crate::store::QueueStore;

/// Processes queued lifecycle actions against the matching engine
pub struct QueueWorker {
    queue: Arc<dyn QueueStore>,
    finder: Arc<MatchFinder>,
    lifecycle: Arc<MatchLifecycle>,
    config: QueueConfig,
}

enum Disposition {
    Done,
    Retry(MatchError),
    DeadLetter(String),
}

impl QueueWorker {
    pub fn new(
        queue: Arc<dyn QueueStore>,
        finder: Arc<MatchFinder>,
        lifecycle: Arc<MatchLifecycle>,
        config: QueueConfig,
    ) -> Self {
        Self {
            queue,
            finder,
            lifecycle,
            config,
        }
    }

    /// Poll the queue forever. Intended to be spawned once per worker.
    pub async fn run(self: Arc<Self>, worker_id: usize) {
        info!("Match queue worker {} started", worker_id);
        loop {
            match self.process_batch().await {
                Ok(0) => {
                    tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
                }
                Ok(processed) => {
                    debug!("Worker {} processed {} messages", worker_id, processed);
                }
                Err(e) => {
                    // Receive itself failed; back off before retrying
                    warn!("Worker {} could not receive batch: {}", worker_id, e);
                    tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
                }
            }
        }
    }

    /// Claim and dispatch one batch. Returns how many messages were
    /// claimed; failures are settled per message, never batch-wide.
    pub async fn process_batch(&self) -> Result<usize, MatchError> {
        let batch = self
            .queue
            .receive(
                self.config.batch_size,
                Duration::from_secs(self.config.visibility_timeout_secs),
            )
            .await?;

        let claimed = batch.len();
        for message in batch {
            match self.dispatch(&message).await {
                Disposition::Done => {
                    if let Err(e) = self.queue.ack(message.message_id).await {
                        // The visibility timeout will resurface it; the
                        // action itself is idempotent on redelivery
                        warn!("Failed to ack message {}: {}", message.message_id, e);
                    }
                }
                Disposition::Retry(cause) => {
                    if message.attempts >= self.config.max_attempts {
                        error!(
                            "Message {} exhausted {} attempts, dead-lettering: {}",
                            message.message_id, message.attempts, cause
                        );
                        self.settle_dead_letter(&message, &cause.to_string()).await;
                    } else {
                        warn!(
                            "Message {} failed (attempt {}/{}), retrying: {}",
                            message.message_id, message.attempts, self.config.max_attempts, cause
                        );
                        if let Err(e) = self
                            .queue
                            .release(
                                message.message_id,
                                Duration::from_secs(self.config.retry_backoff_secs),
                            )
                            .await
                        {
                            warn!("Failed to release message {}: {}", message.message_id, e);
                        }
                    }
                }
                Disposition::DeadLetter(reason) => {
                    error!(
                        "Message {} failed terminally, dead-lettering: {}",
                        message.message_id, reason
                    );
                    self.settle_dead_letter(&message, &reason).await;
                }
            }
        }

        Ok(claimed)
    }

    async fn settle_dead_letter(&self, message: &QueueMessage, reason: &str) {
        if let Err(e) = self.queue.dead_letter(message, reason).await {
            // Leave it to the visibility timeout rather than lose it
            error!("Failed to dead-letter message {}: {}", message.message_id, e);
        }
    }

    async fn dispatch(&self, message: &QueueMessage) -> Disposition {
        let action: QueueAction = match serde_json::from_value(message.payload.clone()) {
            Ok(action) => action,
            Err(e) => return Disposition::DeadLetter(format!("malformed payload: {e}")),
        };

        let result = match action {
            QueueAction::FindNextMatch => self
                .finder
                .find_next(message.requester_id)
                .await
                .map(|_| ()),
            QueueAction::AcceptMatch { candidate_id } => self
                .lifecycle
                .accept(message.requester_id, candidate_id)
                .await
                .map(|_| ()),
            QueueAction::PassMatch { candidate_id } => {
                self.lifecycle.pass(message.requester_id, candidate_id).await
            }
            QueueAction::ScoreBatch { candidate_ids } => self
                .finder
                .score_batch(message.requester_id, &candidate_ids)
                .await
                .map(|_| ()),
        };

        match result {
            Ok(()) => Disposition::Done,
            Err(e) if e.is_retryable() => Disposition::Retry(e),
            // Not-found and invalid-state cannot succeed later
            Err(e) => Disposition::DeadLetter(e.to_string()),
        }
    }
}
