//! RFC 822 / MIME decoding into [`MailMessage`].

use super::{Attachment, MailError, MailMessage, MessageId};
use mail_parser::{Addr, Address, MessageParser, MimeHeaders, PartType};
use std::collections::BTreeSet;

fn addrs<'a, 'x>(address: Option<&'a Address<'x>>) -> Vec<&'a Addr<'x>> {
    match address {
        Some(Address::List(list)) => list.iter().collect(),
        Some(Address::Group(groups)) => groups.iter().flat_map(|g| g.addresses.iter()).collect(),
        None => Vec::new(),
    }
}

fn addr_text(addr: &Addr<'_>) -> Option<String> {
    addr.address()
        .or_else(|| addr.name())
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

/// Decode headers, the first plain-text body and all named attachments.
pub fn decode(id: &MessageId, raw: &[u8]) -> Result<MailMessage, MailError> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailError::Parse(format!("{id}: not an RFC 822 message")))?;

    let sender = addrs(message.from())
        .into_iter()
        .find_map(addr_text)
        .unwrap_or_default();

    let recipients: BTreeSet<String> = addrs(message.to())
        .into_iter()
        .chain(addrs(message.cc()))
        .filter_map(addr_text)
        .collect();

    let subject = message.subject().unwrap_or_default().trim().to_string();

    let body_text = message
        .text_bodies()
        .find_map(|part| match &part.body {
            PartType::Text(text) => Some(text.trim().to_string()),
            _ => None,
        })
        .filter(|t| !t.is_empty());

    let attachments = message
        .attachments()
        .filter_map(|part| {
            let filename = part.attachment_name()?.trim().to_string();
            if filename.is_empty() {
                return None;
            }
            Some(Attachment {
                filename,
                bytes: part.contents().to_vec(),
            })
        })
        .collect();

    Ok(MailMessage {
        id: id.clone(),
        sender,
        recipients,
        subject,
        body_text,
        attachments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTIPART: &str = "From: Alice Example <Alice@X.com>\r\n\
To: Home <home@y.com>\r\n\
Cc: other@z.org\r\n\
Subject: Hello printer\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Print me please.\r\n\
--XYZ\r\n\
Content-Type: application/octet-stream\r\n\
Content-Disposition: attachment; filename=\"notes.bin\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
AAEC\r\n\
--XYZ--\r\n";

    #[test]
    fn decodes_headers_body_and_attachments() {
        let msg = decode(&"1.eml".to_string(), MULTIPART.as_bytes()).unwrap();
        assert_eq!(msg.sender, "alice@x.com");
        assert!(msg.recipients.contains("home@y.com"));
        assert!(msg.recipients.contains("other@z.org"));
        assert_eq!(msg.subject, "Hello printer");
        assert_eq!(msg.body_text.as_deref(), Some("Print me please."));
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].filename, "notes.bin");
        assert_eq!(msg.attachments[0].bytes, vec![0, 1, 2]);
    }

    #[test]
    fn simple_message_without_body() {
        let raw = "From: bob@x.com\r\nTo: home@y.com\r\nSubject: Ping\r\n\r\n";
        let msg = decode(&"2.eml".to_string(), raw.as_bytes()).unwrap();
        assert_eq!(msg.sender, "bob@x.com");
        assert_eq!(msg.subject, "Ping");
        assert!(msg.body_text.is_none());
        assert!(msg.attachments.is_empty());
    }
}
