//! Telegram Bot API webhook registration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";
/// Path the generated app serves webhook updates on.
pub const WEBHOOK_PATH: &str = "/webhook";

/// The Bot API rejects requests without a user agent.
const USER_AGENT: &str = concat!("botkit/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("request to Telegram failed: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Status(u16),

    #[error("unexpected response from Telegram: {0}")]
    Malformed(String),
}

#[derive(Debug, Serialize)]
struct SetWebhookRequest<'a> {
    url: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebhookResponse {
    pub ok: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// Build the webhook URL served by the app behind `base`.
pub fn webhook_url(base: &str) -> String {
    format!("{}{WEBHOOK_PATH}", base.trim_end_matches('/'))
}

#[derive(Debug, Clone)]
pub struct WebhookClient {
    api_base: String,
    agent: ureq::Agent,
}

impl WebhookClient {
    pub fn new(api_base: &str) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(30)))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            agent,
        }
    }

    /// Point Telegram at `url` for updates to the bot identified by `token`.
    ///
    /// Error bodies from the Bot API are returned as a `WebhookResponse` with
    /// `ok == false`; only transport failures and non-JSON replies are errors.
    pub fn set_webhook(&self, token: &str, url: &str) -> Result<WebhookResponse, WebhookError> {
        let endpoint = format!("{}/bot{token}/setWebhook", self.api_base);
        let mut response = self
            .agent
            .post(&endpoint)
            .header("User-Agent", USER_AGENT)
            .send_json(&SetWebhookRequest { url })
            .map_err(|e| WebhookError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| WebhookError::Transport(e.to_string()))?;

        match serde_json::from_str::<WebhookResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => Err(WebhookError::Status(status.as_u16())),
            Err(e) => Err(WebhookError::Malformed(e.to_string())),
        }
    }
}

/// Register `url` as the bot's webhook and report the outcome on the console.
///
/// Never retries. Returns whether Telegram accepted the webhook.
pub fn register_webhook(client: &WebhookClient, token: &str, url: &str) -> bool {
    match client.set_webhook(token, url) {
        Ok(WebhookResponse { ok: true, .. }) => {
            tracing::info!(url, "webhook registered");
            println!("Webhook successfully set!");
            true
        }
        Ok(WebhookResponse { description, .. }) => {
            let description = description.unwrap_or_default();
            tracing::warn!(url, %description, "webhook rejected");
            println!("Failed to set webhook. Error: {description}");
            false
        }
        Err(e) => {
            tracing::warn!(url, error = %e, "webhook registration failed");
            eprintln!("{e}");
            false
        }
    }
}
