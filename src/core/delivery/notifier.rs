use super::artifact_exporter::Artifact;
use crate::core::backend_error::BackendError;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

/// A fully composed message, ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub attachment: Attachment,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), BackendError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Invalid recipient address: '{0}'")]
    InvalidRecipient(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Converts every line break flavour to `<br>`.
pub fn normalize_line_breaks(text: &str) -> String {
    text.replace("\r\n", "<br>")
        .replace('\n', "<br>")
        .replace('\r', "<br>")
}

/// Escapes the characters that would otherwise be read as markup.
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Builds the HTML body: a greeting with the recipient's name followed by the
/// configured text. The name comes from a form response and is escaped; the
/// configured text is trusted markup.
pub fn compose_body(full_name: &str, body_template: &str) -> String {
    format!(
        "<p>Hello {},</p><br><p>{}</p>",
        escape_html(full_name),
        normalize_line_breaks(body_template)
    )
}

/// Cheap structural check; the transport does the real validation.
pub fn is_valid_address(address: &str) -> bool {
    if address.chars().any(char::is_whitespace) {
        return false;
    }

    let mut parts = address.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        _ => false,
    }
}

pub struct Notifier<M: MailTransport> {
    transport: M,
}

impl<M: MailTransport> Notifier<M> {
    pub fn new(transport: M) -> Self {
        Self { transport }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &M {
        &self.transport
    }

    pub fn compose(
        recipient: &str,
        full_name: &str,
        subject: &str,
        body_template: &str,
        artifact: &Artifact,
    ) -> OutgoingMessage {
        OutgoingMessage {
            to: recipient.to_string(),
            subject: subject.to_string(),
            html_body: compose_body(full_name, body_template),
            attachment: Attachment {
                file_name: artifact.name.clone(),
                mime_type: artifact.mime_type.clone(),
                content: artifact.content.clone(),
            },
        }
    }

    /// Sends the artifact to one recipient. No retry.
    pub async fn notify(
        &self,
        recipient: &str,
        full_name: &str,
        subject: &str,
        body_template: &str,
        artifact: &Artifact,
    ) -> Result<(), NotifyError> {
        let recipient = recipient.trim();
        if !is_valid_address(recipient) {
            return Err(NotifyError::InvalidRecipient(recipient.to_string()));
        }

        let message = Self::compose(recipient, full_name, subject, body_template, artifact);
        self.transport.send(&message).await?;

        tracing::info!(recipient = %recipient, "Sent '{}'", artifact.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CapturingTransport {
        sent: Mutex<Vec<OutgoingMessage>>,
    }

    #[async_trait]
    impl MailTransport for CapturingTransport {
        async fn send(&self, message: &OutgoingMessage) -> Result<(), BackendError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn artifact() -> Artifact {
        Artifact {
            id: "pdf-1".to_string(),
            name: "NDA - Ann Lee.pdf".to_string(),
            url: "https://drive.example/pdf-1".to_string(),
            mime_type: "application/pdf".to_string(),
            content: b"%PDF-1.4".to_vec(),
        }
    }

    #[test]
    fn test_body_normalizes_line_breaks() {
        let body = compose_body("Ann Lee", "Line one\r\nLine two\nLine three\rEnd");
        assert_eq!(
            body,
            "<p>Hello Ann Lee,</p><br><p>Line one<br>Line two<br>Line three<br>End</p>"
        );
    }

    #[test]
    fn test_name_is_escaped_in_body() {
        let body = compose_body("<b>Ann</b> & Co", "<i>Please sign.</i>");
        assert_eq!(
            body,
            "<p>Hello &lt;b&gt;Ann&lt;/b&gt; &amp; Co,</p><br><p><i>Please sign.</i></p>"
        );
    }

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address("ann@example.com"));
        assert!(is_valid_address("ann.lee+nda@mail.example.org"));
        assert!(!is_valid_address(""));
        assert!(!is_valid_address("ann.example.com"));
        assert!(!is_valid_address("ann@@example.com"));
        assert!(!is_valid_address("@example.com"));
        assert!(!is_valid_address("ann@localhost"));
        assert!(!is_valid_address("ann lee@example.com"));
    }

    #[tokio::test]
    async fn test_notify_sends_composed_message() {
        let notifier = Notifier::new(CapturingTransport {
            sent: Mutex::new(Vec::new()),
        });

        notifier
            .notify(" ann@example.com ", "Ann Lee", "Your NDA", "Please sign.", &artifact())
            .await
            .unwrap();

        let sent = notifier.transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ann@example.com");
        assert_eq!(sent[0].subject, "Your NDA");
        assert_eq!(sent[0].attachment.file_name, "NDA - Ann Lee.pdf");
        assert_eq!(sent[0].attachment.content, b"%PDF-1.4".to_vec());
    }

    #[tokio::test]
    async fn test_invalid_recipient_never_reaches_transport() {
        let notifier = Notifier::new(CapturingTransport {
            sent: Mutex::new(Vec::new()),
        });

        let err = notifier
            .notify("not-an-address", "Ann", "s", "b", &artifact())
            .await
            .unwrap_err();

        assert_eq!(err, NotifyError::InvalidRecipient("not-an-address".to_string()));
        assert!(notifier.transport.sent.lock().unwrap().is_empty());
    }
}
