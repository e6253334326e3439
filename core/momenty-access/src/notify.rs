//! Email rendering and delivery.

use crate::config::AccessConfig;
use crate::error::AccessResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use momenty_types::{SubscriberRecord, Token};
use tracing::{debug, info};

/// Substitutes `{KEY}` placeholders in one left-to-right pass.
///
/// Substituted values are not rescanned. Unknown placeholders and stray
/// braces are copied through unchanged.
#[must_use]
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// `access_url` with the token appended as a query parameter.
#[must_use]
pub fn access_link(access_url: &str, token: &Token) -> String {
    let separator = if access_url.contains('?') { '&' } else { '?' };
    format!(
        "{access_url}{separator}token={}",
        urlencoding::encode(token.as_str())
    )
}

/// A rendered email ready for a [`Mailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Recipient fields shared by both templates.
#[derive(Debug, Clone, Copy)]
pub struct Recipient<'a> {
    pub email: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
}

impl<'a> From<&'a SubscriberRecord> for Recipient<'a> {
    fn from(record: &'a SubscriberRecord) -> Self {
        Self {
            email: &record.email,
            first_name: &record.first_name,
            last_name: &record.last_name,
        }
    }
}

/// Builds welcome and reminder emails from the configured templates.
pub struct NotificationRenderer<'a> {
    config: &'a AccessConfig,
}

impl<'a> NotificationRenderer<'a> {
    pub fn new(config: &'a AccessConfig) -> Self {
        Self { config }
    }

    /// Welcome email for a granted purchase. `None` if the template is empty.
    #[must_use]
    pub fn welcome(
        &self,
        to: Recipient<'_>,
        token: &Token,
        expires_at: DateTime<Utc>,
    ) -> Option<Message> {
        if self.config.welcome_template.is_empty() {
            return None;
        }
        let expires = self.format_date(expires_at);
        let link = access_link(&self.config.access_url, token);
        let body = render(
            &self.config.welcome_template,
            &[
                ("NAME", to.first_name),
                ("SURNAME", to.last_name),
                ("EMAIL", to.email),
                ("TOKEN", token.as_str()),
                ("EXPIRES", &expires),
                ("ACCESS_LINK", &link),
            ],
        );
        Some(Message {
            to: to.email.to_string(),
            subject: self.config.welcome_subject.clone(),
            body,
        })
    }

    /// Expiry reminder. `None` if the template is empty.
    #[must_use]
    pub fn reminder(&self, to: Recipient<'_>, expires_at: DateTime<Utc>) -> Option<Message> {
        if self.config.reminder_template.is_empty() {
            return None;
        }
        let expires = self.format_date(expires_at);
        let body = render(
            &self.config.reminder_template,
            &[
                ("NAME", to.first_name),
                ("SURNAME", to.last_name),
                ("EMAIL", to.email),
                ("EXPIRES", &expires),
                ("RENEWAL_LINK", &self.config.renewal_url),
            ],
        );
        Some(Message {
            to: to.email.to_string(),
            subject: self.config.reminder_subject.clone(),
            body,
        })
    }

    fn format_date(&self, at: DateTime<Utc>) -> String {
        at.format(&self.config.date_format).to_string()
    }
}

/// Outbound email sink.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> AccessResult<()>;
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> AccessResult<()> {
        info!(to = %to, subject = %subject, "mail");
        debug!(to = %to, "mail body:\n{body}");
        Ok(())
    }
}
