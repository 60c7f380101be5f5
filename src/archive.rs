//! Append-only archive of every message the purge observes.
//!
//! Layout under the archive directory:
//!
//! ```text
//! messages                                   one line per message
//! attachments/<guild|dm>/<channel>/<id>,<n> <filename>
//! ```
//!
//! A log line is `<guild>,<channel>,<id> ` followed by the message JSON. The
//! guild is left empty for direct-message channels. Each line goes out in a
//! single append, so a crash can at worst leave a torn final line. Opening the
//! archive again drops that fragment before anything new is appended.

use crate::error::ArchiveError;
use crate::fetcher::AttachmentFetcher;
use crate::model::Message;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

pub const LOG_FILE: &str = "messages";
pub const ATTACHMENTS_DIR: &str = "attachments";

pub struct ArchiveWriter {
    log: File,
    attachments_dir: PathBuf,
    fetcher: Arc<dyn AttachmentFetcher>,
}

impl ArchiveWriter {
    pub async fn open(dir: &Path, fetcher: Arc<dyn AttachmentFetcher>) -> std::io::Result<Self> {
        fs::create_dir_all(dir).await?;
        let path = dir.join(LOG_FILE);
        drop_torn_tail(&path).await?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            log,
            attachments_dir: dir.join(ATTACHMENTS_DIR),
            fetcher,
        })
    }

    /// Stores the message's attachments, then appends its log line. Nothing is
    /// appended if any attachment fails.
    pub async fn archive(&mut self, message: &Message) -> Result<(), ArchiveError> {
        if !message.attachments.is_empty() {
            let dir = self.attachment_dir(message);
            fs::create_dir_all(&dir)
                .await
                .map_err(ArchiveError::CreateDir)?;

            for (ordinal, attachment) in message.attachments.iter().enumerate() {
                let body = self
                    .fetcher
                    .fetch(&attachment.url)
                    .await
                    .map_err(ArchiveError::Fetch)?;
                let path = dir.join(attachment_file_name(message, ordinal, &attachment.filename));
                fs::write(&path, body)
                    .await
                    .map_err(ArchiveError::WriteAttachment)?;
                debug!("Archived attachment {:?}", path);
            }
        }

        let line = format_entry(message)?;
        self.log
            .write_all(line.as_bytes())
            .await
            .map_err(ArchiveError::Append)?;
        self.log.sync_data().await.map_err(ArchiveError::Append)?;
        Ok(())
    }

    fn attachment_dir(&self, message: &Message) -> PathBuf {
        let guild = message
            .guild_id
            .map(|g| g.to_string())
            .unwrap_or_else(|| "dm".to_string());
        self.attachments_dir
            .join(guild)
            .join(message.channel_id.to_string())
    }
}

/// Cuts an unterminated final line, left by a crash mid-append, so the next
/// append starts on a line of its own. Returns the number of bytes dropped.
async fn drop_torn_tail(path: &Path) -> std::io::Result<u64> {
    let mut file = match OpenOptions::new().read(true).write(true).open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let len = file.metadata().await?.len();
    let keep = last_line_end(&mut file, len).await?;
    if keep == len {
        return Ok(0);
    }

    let dropped = len - keep;
    warn!(
        "Archive log {} ends in a torn line, dropping its last {} bytes",
        path.display(),
        dropped
    );
    file.set_len(keep).await?;
    file.sync_data().await?;
    Ok(dropped)
}

/// Offset just past the last newline in the first `len` bytes, or 0 if there is none.
async fn last_line_end(file: &mut File, len: u64) -> std::io::Result<u64> {
    const CHUNK: u64 = 4096;
    let mut buf = vec![0u8; CHUNK as usize];
    let mut end = len;
    while end > 0 {
        let start = end.saturating_sub(CHUNK);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(chunk).await?;
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

/// `<id>,<ordinal> <filename>`, with path separators in the remote filename
/// neutralised.
pub fn attachment_file_name(message: &Message, ordinal: usize, filename: &str) -> String {
    let filename: String = filename
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!("{},{} {}", message.id, ordinal, filename)
}

/// Renders one complete log line, trailing newline included.
pub fn format_entry(message: &Message) -> Result<String, serde_json::Error> {
    let guild = message.guild_id.map(|g| g.to_string()).unwrap_or_default();
    let json = serde_json::to_string(message)?;
    Ok(format!("{},{},{} {}\n", guild, message.channel_id, message.id, json))
}
