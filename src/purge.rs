//! The purge loop: page through the account's messages, archive each one,
//! delete it, and move the cursor past it, until the index reports nothing
//! left or the run is cancelled.
//!
//! Per-message failures are logged and counted but never stop the sweep. The
//! cursor moves past every message that was looked at, whatever happened to
//! it, so a run can never get stuck on one message. Only a failed search ends
//! the run early.

use crate::archive::ArchiveWriter;
use crate::discord::ChatService;
use crate::error::{ApiError, RunError};
use crate::model::{Message, Snowflake};
use crate::pause::{Checkpoint, PauseController};
use crate::policy::{Deletion, DeletionPolicy};
use crate::search::SearchCursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where to purge: a guild, a channel, or a channel within a guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub guild_id: Option<Snowflake>,
    pub channel_id: Option<Snowflake>,
}

impl Target {
    /// Fills in the guild of a channel target so that searches run against
    /// the guild index and archived messages carry their guild.
    pub async fn resolve<S: ChatService + ?Sized>(
        service: &S,
        guild_id: Option<Snowflake>,
        channel_id: Option<Snowflake>,
    ) -> Result<Self, ApiError> {
        let guild_id = match (guild_id, channel_id) {
            (None, Some(channel_id)) => service.channel(channel_id).await?.guild_id,
            (guild_id, _) => guild_id,
        };
        Ok(Self {
            guild_id,
            channel_id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: Outcome,
    pub processed: usize,
    pub deleted: usize,
    /// Archived but left alone because someone else wrote them.
    pub skipped: usize,
    pub failed: usize,
    pub archive_failures: usize,
    /// The low-water mark to resume from.
    pub cursor: Snowflake,
}

pub struct Purger<S: ChatService + ?Sized> {
    service: Arc<S>,
    policy: DeletionPolicy<S>,
    archive: Option<ArchiveWriter>,
    pause: PauseController,
    cancel: CancellationToken,
    self_id: Snowflake,
    target: Target,
    cursor: SearchCursor,
}

impl<S: ChatService + ?Sized> Purger<S> {
    pub fn new(
        service: Arc<S>,
        self_id: Snowflake,
        target: Target,
        pause: PauseController,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            policy: DeletionPolicy::new(service.clone()),
            service,
            archive: None,
            pause,
            cancel,
            self_id,
            target,
            cursor: SearchCursor::new(self_id, target.guild_id, target.channel_id),
        }
    }

    pub fn with_archive(mut self, archive: ArchiveWriter) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn starting_at(mut self, min_id: Snowflake) -> Self {
        self.cursor = self.cursor.starting_at(min_id);
        self
    }

    pub fn cursor(&self) -> Snowflake {
        self.cursor.position()
    }

    pub async fn run(&mut self) -> Result<RunReport, RunError> {
        let started = Instant::now();
        let mut report = RunReport {
            outcome: Outcome::Done,
            processed: 0,
            deleted: 0,
            skipped: 0,
            failed: 0,
            archive_failures: 0,
            cursor: self.cursor.position(),
        };

        'pages: loop {
            if self.cancel.is_cancelled() {
                report.outcome = Outcome::Cancelled;
                break;
            }

            let page = self
                .cursor
                .next_page(self.service.as_ref())
                .await
                .map_err(RunError::Search)?;

            info!("{} messages remaining.", page.total_results);
            if let Some(eta) = estimate_remaining(started.elapsed(), report.processed, page.total_results) {
                info!("Estimated remaining time: {}", humantime::format_duration(eta));
            }
            if page.is_terminal() {
                break;
            }

            let messages = page.into_messages();
            if messages.is_empty() {
                // Nothing to move the cursor past; asking again would loop.
                warn!("Search reported remaining messages but returned none, stopping");
                break;
            }

            for message in messages {
                if message.id < self.cursor.position() {
                    continue;
                }
                match self.pause.checkpoint(&self.cancel).await {
                    Checkpoint::Cancelled => {
                        report.outcome = Outcome::Cancelled;
                        break 'pages;
                    }
                    Checkpoint::Clear | Checkpoint::Resumed(_) => {}
                }

                let id = message.id;
                if !self.process(message, &mut report).await {
                    report.outcome = Outcome::Cancelled;
                    break 'pages;
                }
                self.cursor.advance_past(id);
            }
        }

        report.cursor = self.cursor.position();
        info!(
            "Purge {:?}: {} processed, {} deleted, {} skipped, {} failed, {} not archived",
            report.outcome,
            report.processed,
            report.deleted,
            report.skipped,
            report.failed,
            report.archive_failures
        );
        Ok(report)
    }

    /// Archives and deletes one message. Returns false if the run was
    /// cancelled while archiving, in which case nothing is deleted and the
    /// message stays ahead of the cursor.
    async fn process(&mut self, mut message: Message, report: &mut RunReport) -> bool {
        // Search hits don't carry their guild.
        if message.guild_id.is_none() {
            message.guild_id = self.target.guild_id;
        }

        if let Some(archive) = self.archive.as_mut() {
            if let Err(e) = archive.archive(&message).await {
                warn!("Error archiving message {}: {}", message.url(), e);
                report.archive_failures += 1;
            }
        }
        if self.cancel.is_cancelled() {
            debug!("Cancelled before deleting {}", message.url());
            return false;
        }
        report.processed += 1;

        if message.author.id != self.self_id {
            debug!("Skipping {}: not authored by this account", message.url());
            report.skipped += 1;
            return true;
        }

        if let Some(sent) = message.created_at() {
            debug!("Deleting {} (sent {})", message.url(), sent.to_rfc3339());
        }
        match self.policy.delete(&message).await {
            Ok(deletion) => {
                if deletion != Deletion::Deleted {
                    debug!("Message {} counted as deleted: {:?}", message.url(), deletion);
                }
                report.deleted += 1;
            }
            Err(e) => {
                warn!("Error deleting {}: {}", message.url(), e);
                report.failed += 1;
            }
        }
        true
    }
}

/// Linear estimate from throughput so far; needs at least one processed
/// message.
pub fn estimate_remaining(elapsed: Duration, processed: usize, remaining: u64) -> Option<Duration> {
    if processed == 0 {
        return None;
    }
    let per_message = elapsed.as_secs_f64() / processed as f64;
    Some(Duration::from_secs((per_message * remaining as f64).round() as u64))
}
