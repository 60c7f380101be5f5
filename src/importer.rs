//! Loads the archive log into the message store.
//!
//! Safe to re-run over a log that has grown since the last import: ids
//! already in the store are skipped before their payload is even parsed, and
//! the primary key catches anything that slips past the check.

use crate::db::{Database, StoredMessage};
use crate::error::ImportError;
use crate::model::{Message, Snowflake};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub inserted: usize,
    pub skipped: usize,
    /// The log ended in a partial line, left behind by an interrupted append.
    pub torn_tail: bool,
    /// Messages in the store once the import finished.
    pub stored: usize,
}

/// The fixed header in front of every log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub guild_id: Option<Snowflake>,
    pub channel_id: Snowflake,
    pub message_id: Snowflake,
}

/// Splits a log line into its header and JSON payload.
pub fn parse_line(line: &str) -> Option<(EntryHeader, &str)> {
    let (header, payload) = line.split_once(' ')?;
    let mut fields = header.split(',');
    let guild = fields.next()?;
    let channel_id = fields.next()?.parse().ok()?;
    let message_id = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    // Older logs wrote a zero for "no guild".
    let guild_id = match guild {
        "" | "0" => None,
        g => Some(g.parse().ok()?),
    };
    Some((
        EntryHeader {
            guild_id,
            channel_id,
            message_id,
        },
        payload,
    ))
}

/// Pulls the content out of an archived message, leaving the rest of the
/// payload as JSON.
pub fn normalize(header: &EntryHeader, mut message: Message) -> Result<StoredMessage, serde_json::Error> {
    let content = std::mem::take(&mut message.content);
    let mut value = serde_json::to_value(&message)?;
    if let Some(object) = value.as_object_mut() {
        object.remove("content");
    }
    Ok(StoredMessage {
        id: message.id,
        author: message.author.id,
        channel: message.channel_id,
        guild: message.guild_id.or(header.guild_id),
        content,
        json: serde_json::to_string(&value)?,
    })
}

pub struct Importer {
    db: Database,
}

impl Importer {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn import_file(&self, path: &Path) -> Result<ImportReport, ImportError> {
        info!("Importing archive log {:?}", path);
        let file = File::open(path)?;
        self.import(BufReader::new(file))
    }

    pub fn import<R: BufRead>(&self, mut reader: R) -> Result<ImportReport, ImportError> {
        let mut report = ImportReport::default();
        let mut buf = Vec::new();
        let mut line_no = 0;

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;
            let complete = buf.ends_with(b"\n");

            let result = std::str::from_utf8(&buf)
                .map_err(|source| ImportError::Encoding {
                    line: line_no,
                    source,
                })
                .and_then(|text| {
                    let line = text.trim_end_matches(['\n', '\r']);
                    if line.is_empty() {
                        return Ok(None);
                    }
                    self.import_line(line_no, line).map(Some)
                });

            match result {
                Ok(None) => {}
                Ok(Some(true)) => report.inserted += 1,
                Ok(Some(false)) => report.skipped += 1,
                // Only the last append can be torn, possibly in the middle of
                // a character; anywhere else a bad line means the log itself
                // is damaged.
                Err(
                    e @ (ImportError::Header { .. }
                    | ImportError::Payload { .. }
                    | ImportError::Encoding { .. }),
                ) if !complete => {
                    warn!("Ignoring torn final line {}: {}", line_no, e);
                    report.torn_tail = true;
                }
                Err(e) => return Err(e),
            }
        }

        report.stored = self.db.count_messages()?;
        info!(
            "Import finished: {} inserted, {} already present, {} in store",
            report.inserted, report.skipped, report.stored
        );
        Ok(report)
    }

    fn import_line(&self, line_no: usize, line: &str) -> Result<bool, ImportError> {
        let (header, payload) = parse_line(line).ok_or_else(|| ImportError::Header {
            line: line_no,
            header: line.split(' ').next().unwrap_or_default().to_string(),
        })?;

        if self.db.message_exists(header.message_id)? {
            debug!("Message {} already imported", header.message_id);
            return Ok(false);
        }

        let payload_error = |source| ImportError::Payload {
            line: line_no,
            id: header.message_id,
            source,
        };
        let message: Message = serde_json::from_str(payload).map_err(payload_error)?;
        if message.id != header.message_id {
            return Err(ImportError::IdMismatch {
                line: line_no,
                header: header.message_id,
                payload: message.id,
            });
        }

        let row = normalize(&header, message).map_err(payload_error)?;
        Ok(self.db.insert_message(&row)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::format_entry;
    use crate::model::tests::mock_message;
    use serde_json::{json, Value};
    use std::io::Cursor;

    fn importer() -> Importer {
        let db = Database::open_in_memory().unwrap();
        db.execute_init().unwrap();
        Importer::new(db)
    }

    fn log_of(ids: &[Snowflake]) -> String {
        ids.iter()
            .map(|id| {
                let mut msg = mock_message(*id, 7, 3);
                msg.guild_id = Some(1);
                format_entry(&msg).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_parse_line() {
        let (header, payload) = parse_line("1,2,3 {\"a\":1}").unwrap();
        assert_eq!(header.guild_id, Some(1));
        assert_eq!(header.channel_id, 2);
        assert_eq!(header.message_id, 3);
        assert_eq!(payload, "{\"a\":1}");

        assert_eq!(parse_line(",2,3 {}").unwrap().0.guild_id, None);
        assert_eq!(parse_line("0,2,3 {}").unwrap().0.guild_id, None);
        assert!(parse_line("2,3 {}").is_none());
        assert!(parse_line("1,2,x {}").is_none());
        assert!(parse_line("1,2,3").is_none());
    }

    #[test]
    fn test_import_is_idempotent() {
        let importer = importer();
        let log = log_of(&[10, 11, 12]);

        let first = importer.import(Cursor::new(log.clone())).unwrap();
        assert_eq!(first.inserted, 3);
        assert_eq!(first.skipped, 0);

        let second = importer.import(Cursor::new(log)).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(importer.db.count_messages().unwrap(), 3);
    }

    #[test]
    fn test_grown_log_imports_only_new_lines() {
        let importer = importer();
        importer.import(Cursor::new(log_of(&[10, 11]))).unwrap();

        let report = importer.import(Cursor::new(log_of(&[10, 11, 12, 13]))).unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.stored, 4);
    }

    #[test]
    fn test_content_round_trips() {
        let importer = importer();
        let original = json!({
            "id": "42",
            "channel_id": "3",
            "guild_id": "1",
            "author": {"id": "7", "username": "me"},
            "content": "secret words",
            "attachments": [],
            "edited_timestamp": null,
            "mentions": [{"id": "8"}]
        });
        let line = format!("1,3,42 {}\n", original);
        importer.import(Cursor::new(line)).unwrap();

        let row = importer.db.get_message(42).unwrap().unwrap();
        assert_eq!(row.content, "secret words");
        assert_eq!(row.author, 7);
        assert_eq!(row.guild, Some(1));
        assert!(!row.json.contains("secret words"));

        let mut rebuilt: Value = serde_json::from_str(&row.json).unwrap();
        assert!(rebuilt.get("content").is_none());
        rebuilt["content"] = Value::String(row.content);
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_header_guild_fills_missing_payload_guild() {
        let importer = importer();
        let msg = mock_message(5, 7, 3);
        let line = format!("9,3,5 {}\n", serde_json::to_string(&msg).unwrap());
        importer.import(Cursor::new(line)).unwrap();
        assert_eq!(importer.db.get_message(5).unwrap().unwrap().guild, Some(9));
    }

    #[test]
    fn test_torn_final_line_is_ignored() {
        let importer = importer();
        let mut log = log_of(&[10, 11]);
        let torn = log_of(&[12]);
        log.push_str(&torn[..torn.len() / 2]);

        let report = importer.import(Cursor::new(log)).unwrap();
        assert_eq!(report.inserted, 2);
        assert!(report.torn_tail);
    }

    #[test]
    fn test_malformed_line_is_fatal() {
        let importer = importer();
        let mut log = log_of(&[10]);
        log.push_str("1,3,11 {not json\n");
        log.push_str(&log_of(&[12]));

        let err = importer.import(Cursor::new(log)).unwrap_err();
        assert!(matches!(err, ImportError::Payload { line: 2, id: 11, .. }));
        assert!(!importer.db.message_exists(12).unwrap());
    }

    #[test]
    fn test_torn_line_split_inside_a_character() {
        let importer = importer();
        let mut msg = mock_message(11, 7, 3);
        msg.content = "héllo 😀😀😀".to_string();
        let entry = format_entry(&msg).unwrap();
        let cut = entry.find('😀').unwrap() + 2;

        let mut log = log_of(&[10]).into_bytes();
        log.extend_from_slice(&entry.as_bytes()[..cut]);

        let report = importer.import(Cursor::new(log)).unwrap();
        assert_eq!(report.inserted, 1);
        assert!(report.torn_tail);
        assert!(!importer.db.message_exists(11).unwrap());
    }

    #[test]
    fn test_invalid_utf8_mid_log_is_fatal() {
        let importer = importer();
        let mut log = log_of(&[10]).into_bytes();
        log.extend_from_slice(b",3,11 {\"content\":\"\xff\"}\n");
        log.extend_from_slice(log_of(&[12]).as_bytes());

        let err = importer.import(Cursor::new(log)).unwrap_err();
        assert!(matches!(err, ImportError::Encoding { line: 2, .. }));
        assert!(!importer.db.message_exists(12).unwrap());
    }

    #[test]
    fn test_header_payload_mismatch_is_fatal() {
        let importer = importer();
        let msg = mock_message(5, 7, 3);
        let line = format!(",3,6 {}\n", serde_json::to_string(&msg).unwrap());
        assert!(matches!(
            importer.import(Cursor::new(line)),
            Err(ImportError::IdMismatch { .. })
        ));
    }

    #[test]
    fn test_import_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("messages");
        std::fs::write(&path, log_of(&[1, 2])).unwrap();

        let report = importer().import_file(&path).unwrap();
        assert_eq!(report.inserted, 2);
    }
}
