//! Failure notification over SMTP.
//!
//! One delivery attempt per run; a send failure is logged and otherwise
//! swallowed so it never changes the process exit code.

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::EmailConfig;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Mailer {
    transport: SmtpTransport,
    sender: Mailbox,
    recipients: Vec<Mailbox>,
}

impl Mailer {
    /// Build a mailer from config. Returns None when email is not
    /// configured (no recipients or no host) or the config is unusable.
    pub fn from_config(config: &EmailConfig) -> Option<Self> {
        if config.recipients.is_empty() || config.smtp_host.is_empty() {
            return None;
        }

        let sender = match config.sender.parse::<Mailbox>() {
            Ok(m) => m,
            Err(e) => {
                warn!("Invalid sender address {:?}: {}", config.sender, e);
                return None;
            }
        };

        let mut recipients = Vec::new();
        for addr in &config.recipients {
            match addr.parse::<Mailbox>() {
                Ok(m) => recipients.push(m),
                Err(e) => warn!("Invalid recipient address {:?}: {}", addr, e),
            }
        }
        if recipients.is_empty() {
            return None;
        }

        let relay = if config.starttls {
            SmtpTransport::starttls_relay(&config.smtp_host)
        } else {
            SmtpTransport::relay(&config.smtp_host)
        };
        let mut builder = match relay {
            Ok(b) => b,
            Err(e) => {
                warn!("Invalid SMTP relay {:?}: {}", config.smtp_host, e);
                return None;
            }
        };

        builder = builder.port(config.smtp_port).timeout(Some(SMTP_TIMEOUT));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Some(Self {
            transport: builder.build(),
            sender,
            recipients,
        })
    }

    /// Single delivery attempt; errors are logged and dropped.
    pub fn send_failure_report(&self, subject: &str, body: &str) {
        let mut builder = Message::builder()
            .from(self.sender.clone())
            .subject(subject);
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }

        let message = match builder.body(body.to_string()) {
            Ok(m) => m,
            Err(e) => {
                error!("Failed to build failure email: {}", e);
                return;
            }
        };

        match self.transport.send(&message) {
            Ok(_) => info!("Failure email dispatched"),
            Err(e) => error!("Failed to send failure email: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_email_is_disabled() {
        let config = EmailConfig::default();
        assert!(Mailer::from_config(&config).is_none());

        let config = EmailConfig {
            recipients: vec!["ops@example.com".to_string()],
            ..EmailConfig::default()
        };
        // Still no host
        assert!(Mailer::from_config(&config).is_none());
    }

    #[test]
    fn test_configured_email_builds() {
        let config = EmailConfig {
            recipients: vec!["ops@example.com".to_string()],
            smtp_host: "smtp.example.com".to_string(),
            username: Some("user".to_string()),
            password: Some("secret".to_string()),
            ..EmailConfig::default()
        };
        assert!(Mailer::from_config(&config).is_some());
    }

    #[test]
    fn test_unparseable_addresses_disable_email() {
        let config = EmailConfig {
            recipients: vec!["not an address".to_string()],
            smtp_host: "smtp.example.com".to_string(),
            ..EmailConfig::default()
        };
        assert!(Mailer::from_config(&config).is_none());
    }
}
