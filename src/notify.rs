use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::MailConfig;

/// Outbound message delivery (OTP codes, reset links).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Sends in the background. Delivery failures are logged and never reach the caller.
pub fn dispatch(notifier: Arc<dyn Notifier>, to: String, subject: &'static str, body: String) {
    tokio::spawn(async move {
        if let Err(e) = notifier.send(&to, subject, &body).await {
            warn!(error = %e, to = %to, subject, "notification delivery failed");
        }
    });
}

/// Writes messages to the log instead of delivering them. Used when no mail provider is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        info!(to, subject, body, "notification (log only)");
        Ok(())
    }
}

#[derive(Serialize)]
struct SgMail<'a> {
    personalizations: Vec<SgPersonalization<'a>>,
    from: SgEmail<'a>,
    content: Vec<SgContent<'a>>,
}

#[derive(Serialize)]
struct SgPersonalization<'a> {
    to: Vec<SgEmail<'a>>,
    subject: &'a str,
}

#[derive(Serialize)]
struct SgEmail<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct SgContent<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    value: &'a str,
}

/// Plain-text mail through the SendGrid v3 API.
#[derive(Clone)]
pub struct SendGridNotifier {
    http: reqwest::Client,
    config: MailConfig,
}

impl SendGridNotifier {
    const URL: &'static str = "https://api.sendgrid.com/v3/mail/send";

    pub fn new(config: MailConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Notifier for SendGridNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let mail = SgMail {
            personalizations: vec![SgPersonalization {
                to: vec![SgEmail { email: to, name: None }],
                subject,
            }],
            from: SgEmail {
                email: &self.config.from_email,
                name: Some(&self.config.from_name),
            },
            content: vec![SgContent {
                kind: "text/plain",
                value: body,
            }],
        };

        let res = self
            .http
            .post(Self::URL)
            .bearer_auth(&self.config.api_key)
            .json(&mail)
            .send()
            .await
            .context("sendgrid request")?;

        // SendGrid answers 202 Accepted on success
        if res.status() == reqwest::StatusCode::ACCEPTED {
            info!(to, subject, "email sent");
            Ok(())
        } else {
            let code = res.status().as_u16();
            let text = res.text().await.unwrap_or_default();
            anyhow::bail!("sendgrid failed: status={code} body={text}")
        }
    }
}
