//! Outbound notification sender (email).
//!
//! Best-effort: callers log failures and never roll back the state change
//! that triggered the notification.

use std::sync::Arc;
use std::time::Duration;

use crate::config::NotifierConfig;
use crate::organization::ContactRecord;
use crate::{ExchangeError, ExchangeResult};

pub trait NotificationSender: Send + Sync {
    fn send(&self, to: &str, subject: &str, html_body: &str) -> ExchangeResult<()>;
}

/// Posts `{from, to, subject, html}` to a transactional-mail HTTP API.
pub struct HttpEmailSender {
    endpoint: String,
    api_key: Option<String>,
    from_address: String,
    timeout: Duration,
}

impl HttpEmailSender {
    pub fn new(endpoint: &str, api_key: Option<String>, from_address: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            api_key,
            from_address: from_address.to_string(),
            timeout,
        }
    }
}

impl NotificationSender for HttpEmailSender {
    fn send(&self, to: &str, subject: &str, html_body: &str) -> ExchangeResult<()> {
        let body = serde_json::json!({
            "from": self.from_address,
            "to": [to],
            "subject": subject,
            "html": html_body,
        });

        let mut request = ureq::post(&self.endpoint).header("content-type", "application/json");
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", &format!("Bearer {}", key));
        }

        request
            .config()
            .timeout_global(Some(self.timeout))
            .build()
            .send(serde_json::to_vec(&body)?.as_slice())
            .map_err(|e| ExchangeError::Notification(format!("POST {} failed: {}", self.endpoint, e)))?;

        tracing::info!(to = %to, subject = %subject, "Notification sent");
        Ok(())
    }
}

/// Writes the notification to the log instead of sending it.
pub struct LogSender;

impl NotificationSender for LogSender {
    fn send(&self, to: &str, subject: &str, html_body: &str) -> ExchangeResult<()> {
        tracing::info!(to = %to, subject = %subject, bytes = html_body.len(), "Notification (log only)");
        Ok(())
    }
}

/// HTTP sender when an endpoint is configured and enabled, log-only otherwise.
pub fn sender_from_config(config: &NotifierConfig) -> Arc<dyn NotificationSender> {
    match config.endpoint.as_deref() {
        Some(endpoint) if config.enabled => {
            let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
            if api_key.is_none() {
                tracing::warn!(env = %config.api_key_env, "Mail API key not set, sending unauthenticated");
            }
            Arc::new(HttpEmailSender::new(
                endpoint,
                api_key,
                &config.from_address,
                Duration::from_secs(config.timeout_secs),
            ))
        }
        _ => Arc::new(LogSender),
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Sent to the winning counterpart once an award discloses the owner's contact.
pub fn acceptance_email(listing_descriptor: &str, owner: &ContactRecord) -> (String, String) {
    let subject = format!("Your request was accepted: {}", listing_descriptor);
    let html = format!(
        "<h2>Your request was accepted</h2>\
         <p>The owner of <strong>{}</strong> accepted your request. You can now contact them directly:</p>\
         <ul>\
         <li>Company: {}</li>\
         <li>Email: <a href=\"mailto:{}\">{}</a></li>\
         <li>Phone: {}</li>\
         <li>Address: {}</li>\
         </ul>",
        escape_html(listing_descriptor),
        escape_html(&owner.company_name),
        escape_html(&owner.email),
        escape_html(&owner.email),
        escape_html(&owner.phone),
        escape_html(&owner.address),
    );
    (subject, html)
}

pub fn verification_email(handle: &str, code: &str) -> (String, String) {
    let subject = "Confirm your organization".to_string();
    let html = format!(
        "<h2>Welcome to the exchange</h2>\
         <p>Your organization is listed as <strong>{}</strong>.</p>\
         <p>Verification code: <code>{}</code></p>",
        escape_html(handle),
        escape_html(code),
    );
    (subject, html)
}
