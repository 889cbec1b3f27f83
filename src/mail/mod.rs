//! Mail-to-print pipeline.
//!
//! Each cycle lists the inbox, decodes every message, keeps the ones that
//! pass both allow-lists and turns them into print jobs. Processed messages
//! are trashed and expunged at the end of the cycle unless disabled.

mod filter;
mod mime;
mod source;

pub use filter::AllowList;
pub use source::{MailSource, MessageId, SpoolSource};

use crate::model::{JobSource, PrintJob, RasterImage};
use crate::raster::{self, ConversionError};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_PRINTABLE_EXTS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp"];

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail login failed: {0}")]
    Auth(String),
    #[error("mail fetch failed: {0}")]
    Fetch(String),
    #[error("cannot parse message: {0}")]
    Parse(String),
    #[error("mail io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Lowercased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        let (_, ext) = self.filename.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub id: MessageId,
    pub sender: String,
    pub recipients: BTreeSet<String>,
    pub subject: String,
    pub body_text: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl MailMessage {
    pub fn parse(id: &MessageId, raw: &[u8]) -> Result<Self, MailError> {
        mime::decode(id, raw)
    }
}

pub struct MailPipeline {
    source: Arc<dyn MailSource>,
    senders: AllowList,
    recipients: AllowList,
    printable_exts: Vec<String>,
    delete_processed: bool,
}

impl MailPipeline {
    pub fn new(source: Arc<dyn MailSource>, senders: AllowList, recipients: AllowList) -> Self {
        Self {
            source,
            senders,
            recipients,
            printable_exts: DEFAULT_PRINTABLE_EXTS.iter().map(|s| s.to_string()).collect(),
            delete_processed: true,
        }
    }

    pub fn with_printable_exts<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.printable_exts = exts
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn with_delete_processed(mut self, delete: bool) -> Self {
        self.delete_processed = delete;
        self
    }

    /// Some recipient must match the recipient list and the sender must match
    /// the sender list.
    pub fn is_eligible(&self, msg: &MailMessage) -> bool {
        self.recipients.matches_any(&msg.recipients) && self.senders.matches(&msg.sender)
    }

    fn first_printable<'m>(&self, msg: &'m MailMessage) -> Option<&'m Attachment> {
        msg.attachments.iter().find(|a| {
            a.extension()
                .is_some_and(|ext| self.printable_exts.iter().any(|p| *p == ext))
        })
    }

    /// Run one mail cycle and return the jobs to print, in mailbox order.
    ///
    /// Login and fetch failures abort the cycle; the next tick retries.
    /// Trash and expunge failures only warn and the built jobs are still
    /// returned; a message left in the inbox prints again next cycle.
    #[instrument(skip_all)]
    pub async fn check_mail(&self) -> Result<Vec<PrintJob>, MailError> {
        let ids = self.source.list_all().await?;
        let mut jobs = Vec::new();
        let mut processed = Vec::new();

        for id in ids {
            let raw = self.source.fetch(&id).await?;
            let msg = match MailMessage::parse(&id, &raw) {
                Ok(msg) => msg,
                Err(err) => {
                    warn!(%id, ?err, "skipping undecodable message");
                    continue;
                }
            };
            if !self.is_eligible(&msg) {
                debug!(%id, sender = %msg.sender, "message not eligible");
                continue;
            }

            match self.build_job(&msg).await {
                Ok(job) => {
                    info!(%id, subject = %msg.subject, "mail queued for printing");
                    jobs.push(job);
                }
                Err(err) => warn!(%id, ?err, "attachment conversion failed; message dropped"),
            }
            processed.push(id);
        }

        if self.delete_processed && !processed.is_empty() {
            self.discard(&processed).await;
        }
        Ok(jobs)
    }

    async fn discard(&self, processed: &[MessageId]) {
        let mut trashed = 0;
        for id in processed {
            match self.source.move_to_trash(id).await {
                Ok(()) => trashed += 1,
                Err(err) => warn!(%id, ?err, "cannot trash processed message"),
            }
        }
        if trashed == 0 {
            return;
        }
        match self.source.expunge().await {
            Ok(()) => debug!(count = trashed, "processed mail expunged"),
            Err(err) => warn!(?err, "expunge failed; trashed mail stays flagged"),
        }
    }

    async fn build_job(&self, msg: &MailMessage) -> Result<PrintJob, ConversionError> {
        let image = match self.first_printable(msg) {
            Some(att) => Some(rasterize_attachment(att.bytes.clone()).await?),
            None => None,
        };

        let mut b = PrintJob::builder(JobSource::Mail(msg.id.clone()));
        b.divider().bold(true).line(&msg.subject).bold(false);
        if let Some(body) = &msg.body_text {
            b.line(body);
        }
        if let Some(image) = image {
            b.image(image);
        }
        b.divider().feed(3);
        Ok(b.build())
    }
}

async fn rasterize_attachment(bytes: Vec<u8>) -> Result<RasterImage, ConversionError> {
    tokio::task::spawn_blocking(move || raster::from_bytes(&bytes))
        .await
        .map_err(|e| ConversionError::Io(std::io::Error::other(e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobKind, PrintOp};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySource {
        messages: Vec<(MessageId, String)>,
        trashed: Mutex<Vec<MessageId>>,
        expunged: Mutex<bool>,
        fail_trash: Option<MessageId>,
        fail_expunge: bool,
    }

    #[async_trait]
    impl MailSource for MemorySource {
        async fn list_all(&self) -> Result<Vec<MessageId>, MailError> {
            Ok(self.messages.iter().map(|(id, _)| id.clone()).collect())
        }

        async fn fetch(&self, id: &MessageId) -> Result<Vec<u8>, MailError> {
            self.messages
                .iter()
                .find(|(m, _)| m == id)
                .map(|(_, raw)| raw.clone().into_bytes())
                .ok_or_else(|| MailError::Fetch(id.clone()))
        }

        async fn move_to_trash(&self, id: &MessageId) -> Result<(), MailError> {
            if self.fail_trash.as_ref() == Some(id) {
                return Err(MailError::Fetch(format!("copy {id} to trash refused")));
            }
            self.trashed.lock().unwrap().push(id.clone());
            Ok(())
        }

        async fn expunge(&self) -> Result<(), MailError> {
            if self.fail_expunge {
                return Err(MailError::Io(std::io::Error::other("connection reset")));
            }
            *self.expunged.lock().unwrap() = true;
            Ok(())
        }
    }

    fn mail(from: &str, to: &str, subject: &str) -> String {
        format!("From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\n\r\nhello\r\n")
    }

    fn msg(sender: &str, recipients: &[&str]) -> MailMessage {
        MailMessage {
            id: "1".into(),
            sender: sender.into(),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            subject: "s".into(),
            body_text: None,
            attachments: Vec::new(),
        }
    }

    fn pipeline(source: Arc<MemorySource>) -> MailPipeline {
        MailPipeline::new(source, AllowList::new(["alice@x.com"]), AllowList::new(["home@y.com"]))
    }

    #[test]
    fn eligibility_needs_both_lists() {
        let p = pipeline(Arc::new(MemorySource::default()));
        assert!(p.is_eligible(&msg("alice@x.com", &["home@y.com"])));
        assert!(p.is_eligible(&msg("alice@x.com", &["other@z.com", "home@y.com"])));
        assert!(!p.is_eligible(&msg("mallory@x.com", &["home@y.com"])));
        assert!(!p.is_eligible(&msg("alice@x.com", &["other@z.com"])));
        assert!(!p.is_eligible(&msg("alice@x.com", &[])));
    }

    #[test]
    fn partial_patterns_match_as_substrings() {
        let p = MailPipeline::new(
            Arc::new(MemorySource::default()),
            AllowList::new(["alice@"]),
            AllowList::new(["@y.com"]),
        );
        assert!(p.is_eligible(&msg("alice@x.com", &["home@y.com"])));
        assert!(p.is_eligible(&msg("ALICE@x.com", &["Home@Y.com"])));
        assert!(!p.is_eligible(&msg("bob@x.com", &["home@z.com"])));
    }

    #[test]
    fn empty_allow_lists_deny_everything() {
        let p = MailPipeline::new(
            Arc::new(MemorySource::default()),
            AllowList::default(),
            AllowList::default(),
        );
        assert!(!p.is_eligible(&msg("alice@x.com", &["home@y.com"])));
    }

    #[test]
    fn printable_extension_is_case_insensitive() {
        let p = pipeline(Arc::new(MemorySource::default()));
        let mut m = msg("alice@x.com", &["home@y.com"]);
        m.attachments = vec![
            Attachment { filename: "a.pdf".into(), bytes: vec![] },
            Attachment { filename: "B.PNG".into(), bytes: vec![1] },
        ];
        assert_eq!(p.first_printable(&m).map(|a| a.filename.as_str()), Some("B.PNG"));
    }

    #[tokio::test]
    async fn eligible_text_mail_becomes_job_and_is_trashed() {
        let source = Arc::new(MemorySource {
            messages: vec![
                ("1".into(), mail("Alice <alice@x.com>", "home@y.com", "Groceries")),
                ("2".into(), mail("spam@evil.com", "home@y.com", "Buy now")),
            ],
            ..Default::default()
        });
        let jobs = pipeline(source.clone()).check_mail().await.unwrap();

        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.kind(), JobKind::StyledText);
        assert_eq!(job.requested_by(), &JobSource::Mail("1".into()));
        assert!(job.ops().contains(&PrintOp::Line("Groceries".into())));
        assert!(job.ops().contains(&PrintOp::Line("hello".into())));

        assert_eq!(*source.trashed.lock().unwrap(), vec!["1".to_string()]);
        assert!(*source.expunged.lock().unwrap());
    }

    #[tokio::test]
    async fn keep_processed_mail_when_deletion_disabled() {
        let source = Arc::new(MemorySource {
            messages: vec![("1".into(), mail("alice@x.com", "home@y.com", "Hi"))],
            ..Default::default()
        });
        let jobs = pipeline(source.clone())
            .with_delete_processed(false)
            .check_mail()
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(source.trashed.lock().unwrap().is_empty());
        assert!(!*source.expunged.lock().unwrap());
    }

    #[tokio::test]
    async fn broken_image_drops_job_but_marks_processed() {
        let raw = "From: alice@x.com\r\n\
To: home@y.com\r\n\
Subject: Photo\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"B\"\r\n\
\r\n\
--B\r\n\
Content-Type: text/plain\r\n\
\r\n\
look\r\n\
--B\r\n\
Content-Type: image/png\r\n\
Content-Disposition: attachment; filename=\"cat.png\"\r\n\
\r\n\
not really a png\r\n\
--B--\r\n";
        let source = Arc::new(MemorySource {
            messages: vec![("7".into(), raw.to_string())],
            ..Default::default()
        });
        let jobs = pipeline(source.clone()).check_mail().await.unwrap();
        assert!(jobs.is_empty());
        assert_eq!(*source.trashed.lock().unwrap(), vec!["7".to_string()]);
    }

    #[tokio::test]
    async fn trash_failure_still_returns_every_job() {
        let source = Arc::new(MemorySource {
            messages: vec![
                ("1".into(), mail("alice@x.com", "home@y.com", "First")),
                ("2".into(), mail("alice@x.com", "home@y.com", "Second")),
            ],
            fail_trash: Some("2".into()),
            ..Default::default()
        });
        let jobs = pipeline(source.clone()).check_mail().await.unwrap();

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].requested_by(), &JobSource::Mail("2".into()));
        assert_eq!(*source.trashed.lock().unwrap(), vec!["1".to_string()]);
        assert!(*source.expunged.lock().unwrap());
    }

    #[tokio::test]
    async fn expunge_failure_still_returns_jobs() {
        let source = Arc::new(MemorySource {
            messages: vec![("1".into(), mail("alice@x.com", "home@y.com", "Hi"))],
            fail_expunge: true,
            ..Default::default()
        });
        let jobs = pipeline(source.clone()).check_mail().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(*source.trashed.lock().unwrap(), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn fetch_failure_aborts_cycle() {
        struct Broken;
        #[async_trait]
        impl MailSource for Broken {
            async fn list_all(&self) -> Result<Vec<MessageId>, MailError> {
                Err(MailError::Auth("bad password".into()))
            }
            async fn fetch(&self, _id: &MessageId) -> Result<Vec<u8>, MailError> {
                unreachable!()
            }
            async fn move_to_trash(&self, _id: &MessageId) -> Result<(), MailError> {
                unreachable!()
            }
            async fn expunge(&self) -> Result<(), MailError> {
                unreachable!()
            }
        }
        let p = MailPipeline::new(Arc::new(Broken), AllowList::new(["a"]), AllowList::new(["b"]));
        assert!(matches!(p.check_mail().await, Err(MailError::Auth(_))));
    }
}
