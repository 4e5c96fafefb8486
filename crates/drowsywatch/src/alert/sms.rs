//! SMS alerts through the Twilio REST API.

use serde::Deserialize;
use tracing::debug;

use super::{Alert, AlertChannel};
use crate::config::SmsConfig;
use crate::error::{Error, Result};

const CHANNEL: &str = "sms";

/// The parts of Twilio's message resource we log.
#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: Option<String>,
    status: Option<String>,
}

/// Sends one text message per alert to the saved contact.
#[derive(Debug, Clone)]
pub struct TwilioSms {
    client: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    from_phone: String,
    body: String,
}

impl TwilioSms {
    /// Create a channel from explicit credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        api_base: impl Into<String>,
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_phone: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_phone: from_phone.into(),
            body: body.into(),
        })
    }

    /// Create a channel from the `[sms]` configuration section.
    ///
    /// # Errors
    ///
    /// Returns an error if a credential is missing.
    pub fn from_config(config: &SmsConfig) -> Result<Self> {
        let required = |value: &Option<String>, key: &str| {
            value
                .clone()
                .ok_or_else(|| Error::config_validation(format!("sms.{key} is not set")))
        };
        Self::new(
            config.api_base.clone(),
            required(&config.account_sid, "account_sid")?,
            required(&config.auth_token, "auth_token")?,
            required(&config.from_phone, "from_phone")?,
            config.body.clone(),
        )
    }

    /// The message-create endpoint for this account.
    #[must_use]
    pub fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.account_sid
        )
    }
}

#[async_trait::async_trait]
impl AlertChannel for TwilioSms {
    fn name(&self) -> &'static str {
        CHANNEL
    }

    async fn notify(&self, alert: &Alert) -> Result<()> {
        let contact = alert
            .contact
            .as_ref()
            .ok_or_else(|| Error::alert_send(CHANNEL, "no contact saved"))?;

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", contact.phone.as_str()),
                ("From", self.from_phone.as_str()),
                ("Body", self.body.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::alert_send(CHANNEL, format!("{status}: {text}")));
        }

        let resource = serde_json::from_str::<MessageResource>(&text).ok();
        debug!(
            to = %contact.phone,
            sid = resource.as_ref().and_then(|r| r.sid.as_deref()),
            status = resource.as_ref().and_then(|r| r.status.as_deref()),
            "SMS accepted"
        );
        Ok(())
    }
}
