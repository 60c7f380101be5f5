//! The subset of the remote message schema needed for deletion and archival.
//!
//! Anything the service sends beyond identity, author, location, content and
//! attachments is carried through untouched in `extra`, so an archived payload
//! round-trips without the crate having to model the full object.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Discord ids are 64-bit snowflakes, sent over the wire as decimal strings.
pub type Snowflake = u64;

/// Milliseconds between the Unix epoch and the first second of 2015.
const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "snowflake")]
    pub id: Snowflake,
    #[serde(with = "snowflake")]
    pub channel_id: Snowflake,
    #[serde(
        default,
        with = "snowflake::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub guild_id: Option<Snowflake>,
    pub author: Author,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    #[serde(with = "snowflake")]
    pub id: Snowflake,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One page of search results.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPage {
    /// The service groups each hit with its surrounding context; the hit
    /// itself is the only entry we keep.
    #[serde(default)]
    pub messages: Vec<Vec<Message>>,
    #[serde(default)]
    pub total_results: u64,
}

impl SearchPage {
    pub fn new(messages: Vec<Message>, total_results: u64) -> Self {
        Self {
            messages: messages.into_iter().map(|m| vec![m]).collect(),
            total_results,
        }
    }

    /// Flattens the grouped results into ascending id order.
    pub fn into_messages(self) -> Vec<Message> {
        let mut messages: Vec<Message> = self.messages.into_iter().flatten().collect();
        messages.sort_by_key(|m| m.id);
        messages.dedup_by_key(|m| m.id);
        messages
    }

    pub fn is_terminal(&self) -> bool {
        self.total_results == 0
    }
}

/// The minimal channel object used to resolve a channel's guild.
#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    #[serde(with = "snowflake")]
    pub id: Snowflake,
    #[serde(default, with = "snowflake::option")]
    pub guild_id: Option<Snowflake>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    #[serde(with = "snowflake")]
    pub id: Snowflake,
    #[serde(default)]
    pub username: String,
}

impl Message {
    /// Link to the message in the web client, for manual follow-up.
    pub fn url(&self) -> String {
        format!("{}/{}", channel_url(self.guild_id, self.channel_id), self.id)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let ms = (self.id >> 22) + DISCORD_EPOCH_MS;
        Utc.timestamp_millis_opt(ms as i64).single()
    }
}

pub fn channel_url(guild_id: Option<Snowflake>, channel_id: Snowflake) -> String {
    let guild = guild_id
        .map(|g| g.to_string())
        .unwrap_or_else(|| "@me".to_string());
    format!("https://discord.com/channels/{}/{}", guild, channel_id)
}

/// Serde helpers for snowflakes: written as strings, read from strings or numbers.
pub mod snowflake {
    use super::Snowflake;
    use serde::de::{self, Deserializer};
    use serde::{Deserialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    fn from_raw<E: de::Error>(raw: Raw) -> Result<Snowflake, E> {
        match raw {
            Raw::Str(s) => s.parse().map_err(E::custom),
            Raw::Num(n) => Ok(n),
        }
    }

    pub fn serialize<S: Serializer>(id: &Snowflake, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(id)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Snowflake, D::Error> {
        from_raw(Raw::deserialize(d)?)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(id: &Option<Snowflake>, s: S) -> Result<S::Ok, S::Error> {
            match id {
                Some(id) => s.collect_str(id),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<Snowflake>, D::Error> {
            Option::<Raw>::deserialize(d)?
                .map(from_raw::<D::Error>)
                .transpose()
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn mock_message(id: Snowflake, author: Snowflake, channel: Snowflake) -> Message {
        Message {
            id,
            channel_id: channel,
            guild_id: None,
            author: Author {
                id: author,
                extra: Map::new(),
            },
            content: format!("Message {}", id),
            attachments: Vec::new(),
            extra: Map::new(),
        }
    }

    #[test]
    fn test_message_preserves_unknown_fields() {
        let raw = json!({
            "id": "1050000000000000000",
            "channel_id": "42",
            "author": {"id": "7", "username": "me"},
            "content": "hello",
            "attachments": [{"filename": "a.png", "url": "https://cdn/a.png", "size": 3}],
            "pinned": false,
            "type": 0
        });

        let msg: Message = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(msg.id, 1050000000000000000);
        assert_eq!(msg.guild_id, None);
        assert_eq!(msg.author.id, 7);
        assert_eq!(msg.attachments[0].filename, "a.png");

        // Everything we did not model comes back out unchanged
        assert_eq!(serde_json::to_value(&msg).unwrap(), raw);
    }

    #[test]
    fn test_snowflakes_accept_numbers() {
        let msg: Message = serde_json::from_value(json!({
            "id": 10,
            "channel_id": 42,
            "guild_id": null,
            "author": {"id": 7}
        }))
        .unwrap();
        assert_eq!(msg.id, 10);
        assert_eq!(msg.content, "");
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn test_search_page_flattens_in_id_order() {
        let page = SearchPage::new(
            vec![mock_message(12, 1, 5), mock_message(10, 1, 5), mock_message(11, 1, 5)],
            3,
        );
        let ids: Vec<_> = page.into_messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![10, 11, 12]);
    }

    #[test]
    fn test_urls() {
        let mut msg = mock_message(3, 1, 2);
        assert_eq!(msg.url(), "https://discord.com/channels/@me/2/3");
        msg.guild_id = Some(9);
        assert_eq!(msg.url(), "https://discord.com/channels/9/2/3");
    }

    #[test]
    fn test_created_at_from_snowflake() {
        // Snowflake from Discord's documentation: 2016-04-30 11:18:25.796 UTC
        let msg = mock_message(175928847299117063, 1, 2);
        let ts = msg.created_at().unwrap();
        assert_eq!(ts.timestamp_millis(), 1462015105796);
    }
}
