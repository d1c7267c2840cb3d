use std::time::Duration;

use serde::Deserialize;

use crate::{error::AlertError, store::AlertSink};

const TWILIO_API: &str = "https://api.twilio.com";

/// Credentials for the Twilio Messages API.
#[derive(Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number, as registered with Twilio.
    pub from_phone: String,
}

impl std::fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"***")
            .field("from_phone", &self.from_phone)
            .finish()
    }
}

impl TwilioConfig {
    /// `None` unless all of `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN` and `TWILIO_PHONE` are set.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Some(Self {
            account_sid: non_empty("TWILIO_ACCOUNT_SID")?,
            auth_token: non_empty("TWILIO_AUTH_TOKEN")?,
            from_phone: non_empty("TWILIO_PHONE")?,
        })
    }
}

/// Sends alerts as SMS through Twilio.
#[derive(Debug, Clone)]
pub struct TwilioSink {
    client: reqwest::Client,
    config: TwilioConfig,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
}

impl TwilioSink {
    pub fn new(config: TwilioConfig) -> Result<Self, AlertError> {
        Self::with_base_url(config, TWILIO_API)
    }

    /// Points the sink at another API host; used against local fakes.
    pub fn with_base_url(config: TwilioConfig, base_url: impl Into<String>) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("bus_spy/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            config,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.config.account_sid
        )
    }
}

impl AlertSink for TwilioSink {
    async fn send_alert(&self, phone: &str, message: &str) -> Result<(), AlertError> {
        let to = normalize_phone(phone);
        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", to.as_str()),
                ("From", self.config.from_phone.as_str()),
                ("Body", message),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("sms to {} rejected with {}: {}", to, status, body);
            return Err(AlertError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let resource: MessageResource = response.json().await?;
        tracing::info!("sms {} sent to {}", resource.sid, to);
        Ok(())
    }
}

/// Writes alerts to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    async fn send_alert(&self, phone: &str, message: &str) -> Result<(), AlertError> {
        tracing::info!("alert for {}: {}", normalize_phone(phone), message);
        Ok(())
    }
}

/// The sink picked at startup.
#[derive(Debug, Clone)]
pub enum AlertChannel {
    Twilio(TwilioSink),
    Log(LogSink),
}

impl AlertChannel {
    /// Twilio when its credentials are present, logging otherwise.
    pub fn from_env() -> Result<Self, AlertError> {
        match TwilioConfig::from_env() {
            Some(config) => {
                tracing::info!("sending alerts through Twilio as {}", config.from_phone);
                Ok(Self::Twilio(TwilioSink::new(config)?))
            }
            None => {
                tracing::warn!("Twilio credentials not set; alerts will only be logged");
                Ok(Self::Log(LogSink))
            }
        }
    }
}

impl AlertSink for AlertChannel {
    async fn send_alert(&self, phone: &str, message: &str) -> Result<(), AlertError> {
        match self {
            Self::Twilio(sink) => sink.send_alert(phone, message).await,
            Self::Log(sink) => sink.send_alert(phone, message).await,
        }
    }
}

/// E.164-style number: a leading `+` is added when missing.
pub fn normalize_phone(phone: &str) -> String {
    let phone = phone.trim();
    if phone.starts_with('+') {
        phone.to_string()
    } else {
        format!("+{phone}")
    }
}
