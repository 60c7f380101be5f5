//! The remote service boundary: REST operations behind [`ChatService`] and the
//! gateway session that feeds the pause controller.

pub mod client;
pub mod gateway;

use crate::error::ApiError;
use crate::model::{Channel, Message, SearchPage, Snowflake, User};
use crate::search::SearchQuery;
use async_trait::async_trait;

pub use client::HttpClient;

#[async_trait]
pub trait ChatService: Send + Sync {
    /// The account the token belongs to.
    async fn current_user(&self) -> Result<User, ApiError>;

    async fn channel(&self, channel_id: Snowflake) -> Result<Channel, ApiError>;

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, ApiError>;

    async fn delete_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> Result<(), ApiError>;

    async fn send_message(&self, channel_id: Snowflake, content: &str)
        -> Result<Message, ApiError>;
}
