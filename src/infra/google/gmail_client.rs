use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;

use super::service_account::ServiceAccountAuth;
use super::{check_response, GMAIL_API};
use crate::core::backend_error::BackendError;
use crate::core::delivery::{MailTransport, OutgoingMessage};

const LINE_WIDTH: usize = 76;

#[derive(Debug, Serialize)]
struct SendRequest {
    raw: String,
}

/// Header value on one line, as an RFC 2047 encoded-word when not plain ASCII.
/// Line breaks become spaces so a value can never start a new header.
fn encode_header(value: &str) -> String {
    let value: String = value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    if value.is_ascii() {
        value
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

/// Base64 wrapped at the MIME line limit.
fn wrapped_base64(content: &[u8]) -> String {
    let encoded = STANDARD.encode(content);
    encoded
        .as_bytes()
        .chunks(LINE_WIDTH)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// Renders a `multipart/mixed` message: HTML body first, then the attachment.
fn build_mime(message: &OutgoingMessage, boundary: &str) -> String {
    let attachment = &message.attachment;
    let file_name = attachment.file_name.replace('"', "");

    let mut mime = String::new();
    mime.push_str(&format!("To: {}\r\n", encode_header(&message.to)));
    mime.push_str(&format!("Subject: {}\r\n", encode_header(&message.subject)));
    mime.push_str("MIME-Version: 1.0\r\n");
    mime.push_str(&format!(
        "Content-Type: multipart/mixed; boundary=\"{}\"\r\n\r\n",
        boundary
    ));

    mime.push_str(&format!("--{}\r\n", boundary));
    mime.push_str("Content-Type: text/html; charset=\"UTF-8\"\r\n");
    mime.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
    mime.push_str(&wrapped_base64(message.html_body.as_bytes()));
    mime.push_str("\r\n\r\n");

    mime.push_str(&format!("--{}\r\n", boundary));
    mime.push_str(&format!(
        "Content-Type: {}; name=\"{}\"\r\n",
        attachment.mime_type,
        encode_header(&file_name)
    ));
    mime.push_str(&format!(
        "Content-Disposition: attachment; filename=\"{}\"\r\n",
        encode_header(&file_name)
    ));
    mime.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
    mime.push_str(&wrapped_base64(&attachment.content));
    mime.push_str("\r\n\r\n");

    mime.push_str(&format!("--{}--\r\n", boundary));
    mime
}

/// Sends mail as the impersonated user through `users.messages.send`.
pub struct GmailClient {
    client: Client,
    auth: Arc<ServiceAccountAuth>,
}

impl GmailClient {
    pub fn new(auth: Arc<ServiceAccountAuth>) -> Self {
        Self {
            client: Client::new(),
            auth,
        }
    }
}

#[async_trait]
impl MailTransport for GmailClient {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), BackendError> {
        let token = self.auth.get_access_token().await?;
        let boundary = format!("docmerge_{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0));
        let raw = URL_SAFE.encode(build_mime(message, &boundary));

        let response = self
            .client
            .post(format!("{}/users/me/messages/send", GMAIL_API))
            .bearer_auth(&token)
            .json(&SendRequest { raw })
            .send()
            .await?;
        check_response(response, "send mail").await?;

        tracing::debug!(to = %message.to, "Gmail accepted message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::delivery::notifier::Attachment;

    fn message() -> OutgoingMessage {
        OutgoingMessage {
            to: "ann@example.com".to_string(),
            subject: "Your NDA".to_string(),
            html_body: "<p>Hello Ann Lee,</p>".to_string(),
            attachment: Attachment {
                file_name: "NDA - Ann Lee.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                content: b"%PDF-1.4".to_vec(),
            },
        }
    }

    #[test]
    fn test_encode_header() {
        assert_eq!(encode_header("Your NDA"), "Your NDA");
        assert_eq!(encode_header("Café"), "=?UTF-8?B?Q2Fmw6k=?=");
    }

    #[test]
    fn test_subject_line_breaks_cannot_add_headers() {
        let mut message = message();
        message.subject = "Your NDA\r\nBcc: mallory@example.com".to_string();

        let mime = build_mime(&message, "b1");
        let headers: Vec<&str> = mime.split("\r\n\r\n").next().unwrap().split("\r\n").collect();

        assert!(headers.contains(&"Subject: Your NDA  Bcc: mallory@example.com"));
        assert!(!headers.iter().any(|h| h.starts_with("Bcc:")));
    }

    #[test]
    fn test_wrapped_base64_line_width() {
        let wrapped = wrapped_base64(&[0u8; 120]);
        let lines: Vec<&str> = wrapped.split("\r\n").collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|line| line.len() <= LINE_WIDTH));
        assert_eq!(STANDARD.decode(lines.concat()).unwrap(), vec![0u8; 120]);
    }

    #[test]
    fn test_mime_layout() {
        let mime = build_mime(&message(), "b1");

        assert!(mime.starts_with("To: ann@example.com\r\nSubject: Your NDA\r\n"));
        assert!(mime.contains("Content-Type: multipart/mixed; boundary=\"b1\""));
        assert!(mime.contains(&STANDARD.encode("<p>Hello Ann Lee,</p>")));
        assert!(mime.contains("Content-Disposition: attachment; filename=\"NDA - Ann Lee.pdf\""));
        assert!(mime.contains(&STANDARD.encode("%PDF-1.4")));
        assert!(mime.ends_with("--b1--\r\n"));

        let html = mime.find("text/html").unwrap();
        let pdf = mime.find("application/pdf").unwrap();
        assert!(html < pdf);
    }
}
