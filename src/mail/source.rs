//! Mail source capability and the spool-directory implementation.

use super::MailError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

pub type MessageId = String;

#[async_trait]
pub trait MailSource: Send + Sync {
    /// Ids of every message in the inbox, in mailbox order.
    async fn list_all(&self) -> Result<Vec<MessageId>, MailError>;
    /// Raw RFC 822 bytes of one message.
    async fn fetch(&self, id: &MessageId) -> Result<Vec<u8>, MailError>;
    /// Copy to trash and flag for deletion; takes effect on [`expunge`](Self::expunge).
    async fn move_to_trash(&self, id: &MessageId) -> Result<(), MailError>;
    async fn expunge(&self) -> Result<(), MailError>;
}

/// Inbox backed by a directory of `.eml` files.
///
/// Ids are file names. Trashed messages are copied into `trash/` and the
/// originals removed on expunge. Anything that drops files into the spool
/// (fetchmail, an MDA, a sync job) can feed the printer this way.
#[derive(Debug)]
pub struct SpoolSource {
    inbox: PathBuf,
    trash: PathBuf,
    flagged: Mutex<HashSet<MessageId>>,
}

impl SpoolSource {
    pub fn new(inbox: impl Into<PathBuf>) -> Self {
        let inbox = inbox.into();
        let trash = inbox.join("trash");
        Self {
            inbox,
            trash,
            flagged: Mutex::new(HashSet::new()),
        }
    }

    pub fn inbox(&self) -> &Path {
        &self.inbox
    }

    pub fn trash(&self) -> &Path {
        &self.trash
    }

    fn path_of(&self, id: &MessageId) -> Result<PathBuf, MailError> {
        if id.contains('/') || id.contains('\\') || id.starts_with('.') {
            return Err(MailError::Fetch(format!("invalid message id: {id}")));
        }
        Ok(self.inbox.join(id))
    }
}

#[async_trait]
impl MailSource for SpoolSource {
    #[instrument(skip_all, fields(inbox = %self.inbox.display()))]
    async fn list_all(&self) -> Result<Vec<MessageId>, MailError> {
        let mut dir = tokio::fs::read_dir(&self.inbox)
            .await
            .map_err(|e| MailError::Auth(format!("cannot open spool {}: {e}", self.inbox.display())))?;
        let mut ids = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !name.ends_with(".eml") {
                continue;
            }
            ids.push(name);
        }
        ids.sort();
        debug!(count = ids.len(), "listed spool");
        Ok(ids)
    }

    async fn fetch(&self, id: &MessageId) -> Result<Vec<u8>, MailError> {
        let path = self.path_of(id)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| MailError::Fetch(format!("{}: {e}", path.display())))
    }

    async fn move_to_trash(&self, id: &MessageId) -> Result<(), MailError> {
        let path = self.path_of(id)?;
        tokio::fs::create_dir_all(&self.trash).await?;
        tokio::fs::copy(&path, self.trash.join(id)).await?;
        self.flagged.lock().await.insert(id.clone());
        Ok(())
    }

    /// Remove flagged originals. Ids whose removal fails stay flagged for
    /// the next expunge; the first such error is returned.
    async fn expunge(&self) -> Result<(), MailError> {
        let mut flagged = self.flagged.lock().await;
        let mut first_err = None;
        let ids: Vec<MessageId> = flagged.iter().cloned().collect();
        for id in ids {
            let removed = match self.path_of(&id) {
                Ok(path) => tokio::fs::remove_file(&path).await.map_err(MailError::from),
                Err(e) => Err(e),
            };
            match removed {
                Ok(()) => debug!(%id, "expunged"),
                Err(MailError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(%id, ?e, "cannot expunge message");
                    first_err.get_or_insert(e);
                    continue;
                }
            }
            flagged.remove(&id);
        }
        first_err.map_or(Ok(()), Err)
    }
}
