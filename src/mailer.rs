//! Outbound email as a channel-fed background worker.
//!
//! Delivery is best-effort and at-most-once: `enqueue` never blocks and
//! never returns an error to the caller; SMTP failures are logged by the
//! worker and dropped.

use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::str::FromStr;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::MailConfig;

const QUEUE_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[derive(Clone)]
pub struct Mailer {
    tx: mpsc::Sender<EmailMessage>,
}

impl Mailer {
    /// Builds the SMTP transport and spawns the worker task.
    pub fn spawn(config: MailConfig) -> anyhow::Result<Self> {
        let transport = build_transport(&config)?;
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(worker(transport, config, rx));
        Ok(Self { tx })
    }

    /// A mailer that discards every message. Used in tests.
    pub fn noop() -> Self {
        let (tx, rx) = mpsc::channel::<EmailMessage>(QUEUE_CAPACITY);
        drop(rx);
        Self { tx }
    }

    /// Fire-and-forget enqueue. Drops the message when the queue is full.
    pub fn enqueue(&self, msg: EmailMessage) {
        if let Err(e) = self.tx.try_send(msg) {
            warn!(error = %e, "mail queue full, dropping message");
        }
    }
}

/// STARTTLS transport for the standard submission port (587). The
/// connection upgrades after the handshake instead of expecting TLS from
/// the first byte.
fn build_transport(config: &MailConfig) -> anyhow::Result<AsyncSmtpTransport<Tokio1Executor>> {
    let creds = Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());
    Ok(
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(creds)
            .build(),
    )
}

async fn worker(
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: MailConfig,
    mut rx: mpsc::Receiver<EmailMessage>,
) {
    while let Some(msg) = rx.recv().await {
        match build_message(&config, &msg) {
            Ok(email) => match transport.send(email).await {
                Ok(_) => info!(to = %msg.to, subject = %msg.subject, "email sent"),
                Err(e) => error!(error = %e, to = %msg.to, "email send failed"),
            },
            Err(e) => error!(error = %e, to = %msg.to, "email build failed"),
        }
    }
}

fn build_message(config: &MailConfig, msg: &EmailMessage) -> anyhow::Result<Message> {
    let from = Mailbox::from_str(&format!("{} <{}>", config.from_name, config.from_email))?;
    let to = Mailbox::from_str(&msg.to)?;

    let email = Message::builder()
        .from(from)
        .to(to)
        .subject(msg.subject.as_str())
        .multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(msg.text.clone()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(msg.html.clone()),
                ),
        )?;
    Ok(email)
}

/// Confirmation email with the verification link for a freshly signed-up user.
pub fn confirmation_email(
    base_url: &str,
    username: &str,
    to_email: &str,
    token: &str,
) -> EmailMessage {
    let confirm_url = format!(
        "{}/api/auth/confirmed_email/{}",
        base_url.trim_end_matches('/'),
        token
    );
    let html = format!(
        r#"<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2>Confirm your email</h2>
    <p>Hi {username},</p>
    <p>Click the link below to confirm your email address:</p>
    <p><a href="{confirm_url}">{confirm_url}</a></p>
    <p style="font-size: 12px; color: #7f8c8d;">
      This link expires in 7 days. If you didn't sign up, you can ignore this email.
    </p>
  </div>
</body>
</html>"#
    );
    let text = format!(
        "Hi {username},\n\nConfirm your email address by opening this link:\n{confirm_url}\n\n\
         This link expires in 7 days. If you didn't sign up, you can ignore this email.\n"
    );
    EmailMessage {
        to: to_email.to_string(),
        subject: "Confirm your email".to_string(),
        html,
        text,
    }
}

/// Canned message used by the send_test_email endpoint.
pub fn test_email(to_email: &str) -> EmailMessage {
    EmailMessage {
        to: to_email.to_string(),
        subject: "Contactbook test email".to_string(),
        html: "<p>This is a test email from Contactbook.</p>".to_string(),
        text: "This is a test email from Contactbook.\n".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail_config() -> MailConfig {
        MailConfig {
            smtp_host: "localhost".into(),
            smtp_port: 587,
            smtp_username: "user".into(),
            smtp_password: "pass".into(),
            from_name: "Contactbook".into(),
            from_email: "noreply@contactbook.local".into(),
            base_url: "http://localhost:8080".into(),
        }
    }

    #[test]
    fn transport_builds_for_submission_port() {
        // Port 587 expects STARTTLS; building must not pick implicit TLS.
        assert!(build_transport(&mail_config()).is_ok());
    }

    #[test]
    fn confirmation_email_contains_token_link() {
        let msg = confirmation_email("http://localhost:8080/", "jane", "jane@x.com", "tok123");
        assert_eq!(msg.to, "jane@x.com");
        assert!(msg
            .html
            .contains("http://localhost:8080/api/auth/confirmed_email/tok123"));
        assert!(msg
            .text
            .contains("http://localhost:8080/api/auth/confirmed_email/tok123"));
    }

    #[test]
    fn build_message_accepts_valid_addresses() {
        let msg = test_email("someone@example.com");
        assert!(build_message(&mail_config(), &msg).is_ok());
    }

    #[test]
    fn build_message_rejects_invalid_recipient() {
        let msg = EmailMessage {
            to: "not-an-address".into(),
            subject: "s".into(),
            html: "h".into(),
            text: "t".into(),
        };
        assert!(build_message(&mail_config(), &msg).is_err());
    }

    #[test]
    fn enqueue_never_errors_without_consumer() {
        let mailer = Mailer::noop();
        for _ in 0..200 {
            mailer.enqueue(test_email("someone@example.com"));
        }
    }
}
