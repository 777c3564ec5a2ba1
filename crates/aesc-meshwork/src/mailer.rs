//! Contact and newsletter forms relayed to a transactional email API.
//!
//! The provider contract is a single call: `POST {api_url}/emails` with a
//! bearer key and `{from, to, subject, text, reply_to}`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_NAME_CHARS: usize = 200;
const MAX_EMAIL_CHARS: usize = 254;
const MAX_MESSAGE_CHARS: usize = 5_000;

/// Provider settings. Secrets are opaque strings.
#[derive(Clone)]
pub struct MailerConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
    pub to: String,
}

impl std::fmt::Debug for MailerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailerConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

/// A message ready to hand to the provider.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

/// HTTP client for the email provider.
#[derive(Clone)]
pub struct Mailer {
    config: MailerConfig,
    client: reqwest::Client,
}

impl Mailer {
    pub fn new(config: MailerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("mail client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &MailerConfig {
        &self.config
    }

    /// Address a message from the configured sender to the configured inbox.
    pub fn compose(&self, subject: String, text: String, reply_to: Option<String>) -> OutgoingMail {
        OutgoingMail {
            from: self.config.from.clone(),
            to: vec![self.config.to.clone()],
            subject,
            text,
            reply_to,
        }
    }

    /// Send through the provider. Non-2xx answers are errors.
    pub async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        let url = format!("{}/emails", self.config.api_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(mail)
            .send()
            .await
            .map_err(|e| Error::Mail(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            tracing::info!(subject = %mail.subject, "mail sent");
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(Error::Mail(format!("provider answered {status}: {body}")))
        }
    }
}

/// Rough shape check: one `@`, non-empty local part, dotted domain, no spaces.
pub fn is_plausible_email(email: &str) -> bool {
    if email.len() > MAX_EMAIL_CHARS || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

fn is_tripped(honeypot: &Option<String>) -> bool {
    honeypot.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(Error::InvalidInput(format!("{field} is too long")));
    }
    Ok(())
}

/// Body of `POST /api/contact`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub message: String,
    /// Honeypot; humans never fill it
    #[serde(default)]
    pub website: Option<String>,
}

impl ContactForm {
    pub fn is_spam(&self) -> bool {
        is_tripped(&self.website)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() || self.email.trim().is_empty() || self.message.trim().is_empty() {
            return Err(Error::InvalidInput("name, email and message are required".into()));
        }
        if !is_plausible_email(self.email.trim()) {
            return Err(Error::InvalidInput("invalid email".into()));
        }
        check_len("name", &self.name, MAX_NAME_CHARS)?;
        check_len("message", &self.message, MAX_MESSAGE_CHARS)
    }

    pub fn to_mail(&self, mailer: &Mailer) -> OutgoingMail {
        let name = self.name.trim();
        let email = self.email.trim();
        mailer.compose(
            format!("Contact form: {name}"),
            format!("From: {name} <{email}>\n\n{}", self.message.trim()),
            Some(email.to_string()),
        )
    }
}

/// Body of `POST /api/subscribe`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscribeForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

impl SubscribeForm {
    pub fn is_spam(&self) -> bool {
        is_tripped(&self.website)
    }

    pub fn validate(&self) -> Result<()> {
        if self.email.trim().is_empty() {
            return Err(Error::InvalidInput("email is required".into()));
        }
        if !is_plausible_email(self.email.trim()) {
            return Err(Error::InvalidInput("invalid email".into()));
        }
        if let Some(name) = &self.name {
            check_len("name", name, MAX_NAME_CHARS)?;
        }
        Ok(())
    }

    pub fn to_mail(&self, mailer: &Mailer) -> OutgoingMail {
        let email = self.email.trim();
        let name = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
        let text = match name {
            Some(name) => format!("New newsletter subscriber: {name} <{email}>"),
            None => format!("New newsletter subscriber: {email}"),
        };
        mailer.compose(format!("Newsletter signup: {email}"), text, Some(email.to_string()))
    }
}
