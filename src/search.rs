//! Paged search over the author's messages, driven by a low-water-mark id.
//!
//! Every page is a fresh query with an inclusive `min_id` filter, sorted
//! oldest first. Messages deleted between pages simply drop out of later
//! results, so deleting while paginating never skips or repeats work.

use crate::discord::ChatService;
use crate::error::ApiError;
use crate::model::{SearchPage, Snowflake};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub author_id: Snowflake,
    /// When set, search runs against the guild index; otherwise the channel's.
    pub guild_id: Option<Snowflake>,
    pub channel_id: Option<Snowflake>,
    pub min_id: Snowflake,
}

impl SearchQuery {
    pub fn endpoint(&self) -> Option<String> {
        match (self.guild_id, self.channel_id) {
            (Some(guild), _) => Some(format!("/guilds/{}/messages/search", guild)),
            (None, Some(channel)) => Some(format!("/channels/{}/messages/search", channel)),
            (None, None) => None,
        }
    }

    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("author_id", self.author_id.to_string()),
            ("sort_by", "timestamp".to_string()),
            ("sort_order", "asc".to_string()),
            ("include_nsfw", "true".to_string()),
        ];
        if let Some(channel) = self.channel_id {
            params.push(("channel_id", channel.to_string()));
        }
        if self.min_id > 0 {
            params.push(("min_id", self.min_id.to_string()));
        }
        params
    }
}

/// Owns the "minimum id to include in the next page" for one run.
#[derive(Debug, Clone)]
pub struct SearchCursor {
    query: SearchQuery,
}

impl SearchCursor {
    pub fn new(author_id: Snowflake, guild_id: Option<Snowflake>, channel_id: Option<Snowflake>) -> Self {
        Self {
            query: SearchQuery {
                author_id,
                guild_id,
                channel_id,
                min_id: 0,
            },
        }
    }

    /// Starts from a saved low-water mark instead of the beginning.
    pub fn starting_at(mut self, min_id: Snowflake) -> Self {
        self.query.min_id = min_id;
        self
    }

    pub fn position(&self) -> Snowflake {
        self.query.min_id
    }

    pub async fn next_page<S: ChatService + ?Sized>(
        &self,
        service: &S,
    ) -> Result<SearchPage, ApiError> {
        service.search(&self.query).await
    }

    /// Moves past `id`. The cursor never moves backwards.
    pub fn advance_past(&mut self, id: Snowflake) {
        self.query.min_id = self.query.min_id.max(id.saturating_add(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discord::fake::{Call, FakeService, PAGE_SIZE};
    use crate::model::tests::mock_message;

    #[test]
    fn test_query_params() {
        let cursor = SearchCursor::new(7, Some(1), Some(2)).starting_at(100);
        let params = cursor.query.params();
        assert!(params.contains(&("author_id", "7".to_string())));
        assert!(params.contains(&("sort_order", "asc".to_string())));
        assert!(params.contains(&("channel_id", "2".to_string())));
        assert!(params.contains(&("min_id", "100".to_string())));
        assert_eq!(
            cursor.query.endpoint().as_deref(),
            Some("/guilds/1/messages/search")
        );

        let dm = SearchCursor::new(7, None, Some(2));
        assert_eq!(
            dm.query.endpoint().as_deref(),
            Some("/channels/2/messages/search")
        );
        assert!(!dm.query.params().iter().any(|(k, _)| *k == "min_id"));
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut cursor = SearchCursor::new(1, None, Some(1));
        cursor.advance_past(10);
        assert_eq!(cursor.position(), 11);
        cursor.advance_past(5);
        assert_eq!(cursor.position(), 11);
    }

    #[tokio::test]
    async fn test_pages_never_revisit_below_cursor() {
        let messages: Vec<_> = (1..=60).map(|id| mock_message(id, 7, 3)).collect();
        let service = FakeService::new(7, messages);
        let mut cursor = SearchCursor::new(7, None, Some(3));

        let mut seen = Vec::new();
        loop {
            let page = cursor.next_page(&service).await.unwrap();
            if page.is_terminal() {
                break;
            }
            let batch = page.into_messages();
            assert!(batch.len() <= PAGE_SIZE);
            let max = batch.iter().map(|m| m.id).max().unwrap();
            for m in batch {
                assert!(m.id >= cursor.position());
                seen.push(m.id);
                cursor.advance_past(m.id);
            }
            assert_eq!(cursor.position(), max + 1);
        }

        assert_eq!(seen, (1..=60).collect::<Vec<_>>());
        let mins: Vec<_> = service
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Search { min_id } => Some(min_id),
                _ => None,
            })
            .collect();
        assert_eq!(mins, vec![0, 26, 51, 61]);
    }
}
