use crate::model::Snowflake;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Result};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SCHEMA: &str = include_str!("schema.sql");

/// A normalized archived message. `json` is the archived payload with the
/// content field removed; `content` holds it instead.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: Snowflake,
    pub author: Snowflake,
    pub channel: Snowflake,
    pub guild: Option<Snowflake>,
    pub content: String,
    pub json: String,
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        })
    }

    pub fn execute_init(&self) -> Result<()> {
        info!("Database: Initializing schema...");
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    /// Runs a closure against the database on the blocking pool.
    pub async fn run_blocking<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    pub fn message_exists(&self, id: Snowflake) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let exists = conn
            .prepare_cached("SELECT 1 FROM Message WHERE id = ?1")?
            .exists([id])?;
        Ok(exists)
    }

    /// Inserts a row. Returns `false` when a row with the same id is already
    /// present; any other failure is an error.
    pub fn insert_message(&self, row: &StoredMessage) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn
            .prepare_cached(
                "INSERT INTO Message (id, author, channel, guild, content, json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?
            .execute((
                row.id,
                row.author,
                row.channel,
                row.guild,
                &row.content,
                &row.json,
            ));

        match inserted {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                debug!("Database: Message {} already stored", row.id);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub fn get_message(&self, id: Snowflake) -> Result<Option<StoredMessage>> {
        let conn = self.conn.lock().unwrap();
        let row = conn.query_row(
            "SELECT id, author, channel, guild, content, json FROM Message WHERE id = ?1",
            [id],
            |row| {
                Ok(StoredMessage {
                    id: row.get(0)?,
                    author: row.get(1)?,
                    channel: row.get(2)?,
                    guild: row.get(3)?,
                    content: row.get(4)?,
                    json: row.get(5)?,
                })
            },
        )
        .optional()?;
        Ok(row)
    }

    pub fn count_messages(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM Message", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: Snowflake) -> StoredMessage {
        StoredMessage {
            id,
            author: 1,
            channel: 2,
            guild: None,
            content: format!("content {}", id),
            json: "{}".to_string(),
        }
    }

    #[test]
    fn test_db_init_and_insert() {
        let db = Database::open_in_memory().unwrap();
        db.execute_init().unwrap();
        // Re-running the schema is harmless
        db.execute_init().unwrap();

        assert!(!db.message_exists(10).unwrap());
        assert!(db.insert_message(&row(10)).unwrap());
        assert!(db.message_exists(10).unwrap());

        let stored = db.get_message(10).unwrap().unwrap();
        assert_eq!(stored, row(10));
        assert_eq!(stored.guild, None);
        assert!(db.get_message(11).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_insert_is_benign() {
        let db = Database::open_in_memory().unwrap();
        db.execute_init().unwrap();

        assert!(db.insert_message(&row(10)).unwrap());
        let mut dup = row(10);
        dup.content = "different".to_string();
        assert!(!db.insert_message(&dup).unwrap());

        assert_eq!(db.count_messages().unwrap(), 1);
        assert_eq!(db.get_message(10).unwrap().unwrap().content, "content 10");
    }

    #[test]
    fn test_guild_round_trips() {
        let db = Database::open_in_memory().unwrap();
        db.execute_init().unwrap();

        let mut r = row(3);
        r.guild = Some(1234567890123456789);
        db.insert_message(&r).unwrap();
        assert_eq!(
            db.get_message(3).unwrap().unwrap().guild,
            Some(1234567890123456789)
        );
    }

    #[test]
    fn test_store_errors_are_not_swallowed() {
        // No schema: the insert fails for a reason other than a duplicate id
        let db = Database::open_in_memory().unwrap();
        assert!(db.insert_message(&row(1)).is_err());
    }
}
