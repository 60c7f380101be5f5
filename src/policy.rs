use crate::discord::ChatService;
use crate::error::{codes, ApiError, PolicyError};
use crate::model::{channel_url, Message};
use std::sync::Arc;
use tracing::debug;

/// Sending anything into an archived thread unarchives it; a zero-width space
/// is the least visible thing that can be sent.
const PLACEHOLDER: &str = "\u{200B}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    Deleted,
    /// The message no longer exists.
    AlreadyGone,
    /// The service does not allow deleting this kind of message.
    Undeletable,
}

/// Decides how a single message gets deleted and recovers from the failure
/// codes that have a known fix.
pub struct DeletionPolicy<S: ?Sized> {
    service: Arc<S>,
}

impl<S: ChatService + ?Sized> DeletionPolicy<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }

    pub async fn delete(&self, message: &Message) -> Result<Deletion, PolicyError> {
        let mut unarchived = false;
        loop {
            let err = match self
                .service
                .delete_message(message.channel_id, message.id)
                .await
            {
                Ok(()) => return Ok(Deletion::Deleted),
                Err(err) => err,
            };

            match err.code() {
                Some(codes::UNKNOWN_MESSAGE) => return Ok(Deletion::AlreadyGone),
                Some(codes::SYSTEM_MESSAGE_ACTION_UNAVAILABLE) => return Ok(Deletion::Undeletable),
                Some(codes::INVALID_ACTION_ON_ARCHIVED_THREAD) if !unarchived => {
                    self.unarchive(message).await?;
                    unarchived = true;
                }
                Some(codes::INVALID_ACTION_ON_ARCHIVED_THREAD) => {
                    return Err(PolicyError::StillArchived {
                        thread: channel_url(message.guild_id, message.channel_id),
                    })
                }
                _ => return Err(PolicyError::Delete(err)),
            }
        }
    }

    async fn unarchive(&self, message: &Message) -> Result<(), PolicyError> {
        let thread = channel_url(message.guild_id, message.channel_id);
        debug!("Thread {} is archived, sending placeholder to reopen it", thread);

        let placeholder = self
            .service
            .send_message(message.channel_id, PLACEHOLDER)
            .await
            .map_err(|source: ApiError| PolicyError::Unarchive {
                thread: thread.clone(),
                source,
            })?;

        self.service
            .delete_message(placeholder.channel_id, placeholder.id)
            .await
            .map_err(|source| PolicyError::Placeholder {
                url: placeholder.url(),
                source,
            })
    }
}
