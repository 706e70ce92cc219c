use anyhow::{Context, Result, bail};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Twilio WhatsApp client for content-templated messages.
///
/// Messages are always template sends (content SID + positional variables);
/// free-form bodies are not part of the outbound surface.
#[derive(Clone)]
pub struct TwilioClient {
    client: Client,
    account_sid: Option<String>,
    auth_token: Option<String>,
    from_number: Option<String>,
    messaging_service_sid: Option<String>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    sid: String,
}

impl TwilioClient {
    pub fn from_env() -> Result<Self> {
        let account_sid = std::env::var("TWILIO_ACCOUNT_SID").ok().filter(|v| !v.is_empty());
        let auth_token = std::env::var("TWILIO_AUTH_TOKEN").ok().filter(|v| !v.is_empty());
        let from_number = std::env::var("TWILIO_WHATSAPP_FROM").ok().filter(|v| !v.is_empty());
        let messaging_service_sid = std::env::var("TWILIO_MESSAGING_SERVICE_SID")
            .ok()
            .filter(|v| !v.is_empty());

        if account_sid.is_none() || auth_token.is_none() {
            warn!("Twilio credentials not set - notification sends will fail until configured");
        }

        let base_url = std::env::var("TWILIO_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.twilio.com".to_string());

        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("Failed to build messaging HTTP client")?;

        Ok(Self {
            client,
            account_sid,
            auth_token,
            from_number,
            messaging_service_sid,
            base_url,
        })
    }

    /// Send one templated message. `variables` are the positional template
    /// variables, keyed "1", "2", ... as registered with the provider.
    /// Returns the provider message sid.
    pub async fn send_template(
        &self,
        to_whatsapp: &str,
        content_sid: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<String> {
        let (Some(account_sid), Some(auth_token)) = (&self.account_sid, &self.auth_token) else {
            bail!("Twilio client is not configured (missing account sid or auth token)");
        };

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, account_sid
        );

        let to = if to_whatsapp.starts_with("whatsapp:") {
            to_whatsapp.to_string()
        } else {
            format!("whatsapp:{}", to_whatsapp)
        };

        let content_variables =
            serde_json::to_string(variables).context("Failed to encode template variables")?;

        let mut form: Vec<(&str, String)> = vec![
            ("To", to),
            ("ContentSid", content_sid.to_string()),
            ("ContentVariables", content_variables),
        ];
        match (&self.messaging_service_sid, &self.from_number) {
            (Some(service_sid), _) => form.push(("MessagingServiceSid", service_sid.clone())),
            (None, Some(from)) => {
                let from = if from.starts_with("whatsapp:") {
                    from.clone()
                } else {
                    format!("whatsapp:{}", from)
                };
                form.push(("From", from));
            }
            (None, None) => bail!("Twilio client has neither a messaging service nor a sender"),
        }

        let response = self
            .client
            .post(&url)
            .basic_auth(account_sid, Some(auth_token))
            .form(&form)
            .send()
            .await
            .context("Messaging provider request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "Messaging provider rejected send: {} {}",
                status,
                body.chars().take(300).collect::<String>()
            );
        }

        let message: MessageResponse = response
            .json()
            .await
            .context("Failed to parse messaging provider response")?;

        debug!("Message accepted by provider: {}", message.sid);
        metrics::counter!("twilio.messages.accepted").increment(1);
        Ok(message.sid)
    }
}
