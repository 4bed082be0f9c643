use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use log::{info, warn};
use std::str::FromStr;
use std::time::Duration;

use crate::error::MailDeliveryError;

/// SMTP reply codes meaning the credentials were refused.
const AUTH_FAILURE_CODES: [&str; 3] = ["530", "534", "535"];
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// How the connection to the SMTP relay is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain connection upgraded with STARTTLS, port 587 by default.
    StartTls,
    /// TLS from the first byte, port 465 by default.
    Wrapper,
}

impl FromStr for TlsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "starttls" => Ok(TlsMode::StartTls),
            "wrapper" | "tls" | "ssl" => Ok(TlsMode::Wrapper),
            other => Err(format!("unknown TLS mode '{}', use starttls or wrapper", other)),
        }
    }
}

/// Mail settings fixed at startup.
#[derive(Debug, Clone)]
pub struct MailSettings {
    pub smtp_host: String,
    pub smtp_port: Option<u16>,
    pub tls: TlsMode,
    pub username: String,
    pub password: String,
    /// Sender mailbox, e.g. `Cadastro <cadastro@example.com>`.
    pub from: String,
    pub recipients: Vec<String>,
}

/// File attached to an outgoing mail.
#[derive(Debug, Clone, PartialEq)]
pub struct MailAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: Option<MailAttachment>,
}

/// Delivers outgoing mail. Implementations block until the server answers.
pub trait MailSender: Send + Sync {
    fn send(&self, mail: &OutgoingMail) -> Result<(), MailDeliveryError>;
}

/// [`MailSender`] over an authenticated, encrypted SMTP relay.
pub struct Mailer {
    smtp: SmtpTransport,
    from: Mailbox,
}

impl Mailer {
    pub fn new(settings: &MailSettings) -> Result<Self, MailDeliveryError> {
        let creds = Credentials::new(settings.username.clone(), settings.password.clone());

        let builder = match settings.tls {
            TlsMode::StartTls => SmtpTransport::starttls_relay(&settings.smtp_host),
            TlsMode::Wrapper => SmtpTransport::relay(&settings.smtp_host),
        }
        .map_err(|e| categorize(&e))?;
        let builder = match settings.smtp_port {
            Some(port) => builder.port(port),
            None => builder,
        };

        let smtp = builder
            .credentials(creds)
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        let from = settings
            .from
            .parse()
            .map_err(|e| MailDeliveryError::Other(format!("remetente inválido: {}", e)))?;

        Ok(Mailer { smtp, from })
    }

    /// Builds the MIME message: a plain-text part plus the optional attachment.
    pub fn build_message(&self, mail: &OutgoingMail) -> Result<Message, MailDeliveryError> {
        build_message(&self.from, mail)
    }
}

impl MailSender for Mailer {
    fn send(&self, mail: &OutgoingMail) -> Result<(), MailDeliveryError> {
        let email = self.build_message(mail)?;
        match self.smtp.send(&email) {
            Ok(_) => {
                info!(
                    "Mail '{}' delivered to {}",
                    mail.subject,
                    mail.recipients.join(", ")
                );
                Ok(())
            }
            Err(e) => {
                let err = categorize(&e);
                warn!("Mail '{}' not delivered: {}", mail.subject, err);
                Err(err)
            }
        }
    }
}

pub fn build_message(from: &Mailbox, mail: &OutgoingMail) -> Result<Message, MailDeliveryError> {
    if mail.recipients.is_empty() {
        return Err(MailDeliveryError::Other(
            "nenhum destinatário configurado".to_string(),
        ));
    }

    let mut builder = Message::builder().from(from.clone()).subject(&mail.subject);
    for recipient in &mail.recipients {
        let to: Mailbox = recipient.parse().map_err(|e| {
            MailDeliveryError::Other(format!("destinatário inválido '{}': {}", recipient, e))
        })?;
        builder = builder.to(to);
    }

    let text = SinglePart::plain(mail.body.clone());
    let result = match &mail.attachment {
        Some(attachment) => {
            let content_type = ContentType::parse(&attachment.content_type).map_err(|e| {
                MailDeliveryError::Other(format!("tipo de anexo inválido: {}", e))
            })?;
            let part = Attachment::new(attachment.filename.clone())
                .body(attachment.bytes.clone(), content_type);
            builder.multipart(MultiPart::mixed().singlepart(text).singlepart(part))
        }
        None => builder.singlepart(text),
    };
    result.map_err(|e| MailDeliveryError::Other(e.to_string()))
}

/// Sorts an SMTP failure into auth, connection or other.
fn categorize(err: &smtp::Error) -> MailDeliveryError {
    let message = err.to_string();
    match err.status() {
        Some(code) if AUTH_FAILURE_CODES.contains(&code.to_string().as_str()) => {
            MailDeliveryError::Auth(message)
        }
        Some(_) => MailDeliveryError::Other(message),
        None if err.is_timeout() || err.is_tls() || !(err.is_client() || err.is_response()) => {
            MailDeliveryError::Connection(message)
        }
        None => MailDeliveryError::Other(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MailSettings {
        MailSettings {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: Some(2525),
            tls: TlsMode::StartTls,
            username: "cadastro@example.com".to_string(),
            password: "segredo".to_string(),
            from: "Cadastro <cadastro@example.com>".to_string(),
            recipients: vec!["comercial@example.com".to_string()],
        }
    }

    fn mail() -> OutgoingMail {
        OutgoingMail {
            recipients: vec![
                "comercial@example.com".to_string(),
                "Gestão <gestao@example.com>".to_string(),
            ],
            subject: "Nova unidade cadastrada".to_string(),
            body: "Segue em anexo a planilha da nova unidade.".to_string(),
            attachment: Some(MailAttachment {
                filename: "unidade_Sala.xlsx".to_string(),
                content_type: crate::export::XLSX_CONTENT_TYPE.to_string(),
                bytes: b"PK\x03\x04".to_vec(),
            }),
        }
    }

    #[test]
    fn tls_mode_parses() {
        assert_eq!("STARTTLS".parse::<TlsMode>().unwrap(), TlsMode::StartTls);
        assert_eq!("wrapper".parse::<TlsMode>().unwrap(), TlsMode::Wrapper);
        assert!("none".parse::<TlsMode>().is_err());
    }

    #[test]
    fn message_carries_attachment_and_recipients() {
        let mailer = Mailer::new(&settings()).unwrap();
        let message = mailer.build_message(&mail()).unwrap();
        let raw = String::from_utf8_lossy(&message.formatted()).to_string();
        assert!(raw.contains("Subject: Nova unidade cadastrada"));
        assert!(raw.contains("comercial@example.com"));
        assert!(raw.contains("gestao@example.com"));
        assert!(raw.contains("unidade_Sala.xlsx"));
        assert!(raw.contains("multipart/mixed"));
    }

    #[test]
    fn message_without_attachment_is_plain() {
        let mailer = Mailer::new(&settings()).unwrap();
        let mut plain = mail();
        plain.attachment = None;
        let raw = String::from_utf8_lossy(&mailer.build_message(&plain).unwrap().formatted())
            .to_string();
        assert!(!raw.contains("multipart/mixed"));
    }

    #[test]
    fn invalid_recipient_is_reported() {
        let mailer = Mailer::new(&settings()).unwrap();
        let mut bad = mail();
        bad.recipients = vec!["not an address".to_string()];
        assert!(matches!(
            mailer.build_message(&bad),
            Err(MailDeliveryError::Other(_))
        ));

        bad.recipients.clear();
        assert!(mailer.build_message(&bad).is_err());
    }

    #[test]
    fn unreachable_relay_is_a_connection_failure() {
        let mut s = settings();
        s.smtp_host = "127.0.0.1".to_string();
        s.smtp_port = Some(1);
        let mailer = Mailer::new(&s).unwrap();
        match mailer.send(&mail()) {
            Err(MailDeliveryError::Connection(message)) => assert!(!message.is_empty()),
            other => panic!("expected a connection failure, got {:?}", other),
        }
    }

    #[test]
    fn invalid_sender_is_rejected_at_construction() {
        let mut s = settings();
        s.from = "???".to_string();
        assert!(Mailer::new(&s).is_err());
    }
}
