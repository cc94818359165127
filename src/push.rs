use std::env;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::json;

use crate::errors::{ReminderError, ReminderResult};
use crate::util::{self, get_short_token, VAR_PUSH_API_KEY, VAR_PUSH_APP_ID, VAR_PUSH_DRY_RUN, VAR_PUSH_GATEWAY_URL};

pub const DEFAULT_PUSH_GATEWAY_URL: &str = "https://onesignal.com/api/v1/notifications";

#[derive(Clone, Debug)]
pub struct PushOutcome {
    pub success: bool,
    pub provider_response: String,
}

/// The external push-notification gateway.
#[async_trait]
pub trait PushSender: Send + Sync {
    /// Fails when the gateway cannot be used at all (missing credentials).
    fn ensure_configured(&self) -> ReminderResult<()> {
        Ok(())
    }

    async fn send(&self, channel_id: &str, title: &str, body: &str) -> ReminderResult<PushOutcome>;
}

#[derive(Clone, Debug)]
pub struct GatewayCredentials {
    pub app_id: String,
    pub api_key: String,
}

pub struct HttpPushGateway {
    client: reqwest::Client,
    url: String,
    credentials: Option<GatewayCredentials>,
    dry_run: bool,
}

impl HttpPushGateway {
    pub fn new(url: String, credentials: Option<GatewayCredentials>, dry_run: bool) -> ReminderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ReminderError::Configuration(format!("cannot build http client: {e}")))?;
        Ok(HttpPushGateway { client, url, credentials, dry_run })
    }

    pub fn from_env() -> ReminderResult<Self> {
        let url = env::var(VAR_PUSH_GATEWAY_URL).unwrap_or(String::from(DEFAULT_PUSH_GATEWAY_URL));
        let credentials = match (env::var(VAR_PUSH_APP_ID), env::var(VAR_PUSH_API_KEY)) {
            (Ok(app_id), Ok(api_key)) if !app_id.is_empty() && !api_key.is_empty() => {
                Some(GatewayCredentials { app_id, api_key })
            }
            _ => {
                warn!("{VAR_PUSH_APP_ID}/{VAR_PUSH_API_KEY} not set; worker invocations will fail until configured");
                None
            }
        };
        let dry_run = env::var(VAR_PUSH_DRY_RUN).map(|v| util::is_truthy(&v)).unwrap_or(false);
        HttpPushGateway::new(url, credentials, dry_run)
    }

    fn credentials(&self) -> ReminderResult<&GatewayCredentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| ReminderError::Configuration("push gateway credentials are missing".to_string()))
    }
}

#[async_trait]
impl PushSender for HttpPushGateway {
    fn ensure_configured(&self) -> ReminderResult<()> {
        if self.dry_run {
            return Ok(());
        }
        self.credentials().map(|_| ())
    }

    async fn send(&self, channel_id: &str, title: &str, body: &str) -> ReminderResult<PushOutcome> {
        if self.dry_run {
            info!("Simulated push to ...{} ({}={})", get_short_token(channel_id), VAR_PUSH_DRY_RUN, true);
            return Ok(PushOutcome { success: true, provider_response: String::from("dry run") });
        }
        let credentials = self.credentials()?;

        let mut headers = HeaderMap::new();
        let authorization = HeaderValue::from_str(format!("Basic {}", credentials.api_key).as_str())
            .map_err(|e| ReminderError::Configuration(format!("invalid api key: {e}")))?;
        headers.insert("authorization", authorization);
        headers.insert("content-type", HeaderValue::from_static("application/json; charset=utf-8"));

        let payload = get_push_body(&credentials.app_id, channel_id, title, body);
        debug!("Push body: {payload}");

        let res = self.client.post(&self.url).headers(headers).body(payload).send().await?;

        let status = res.status();
        let provider_response = res.text().await.unwrap_or_default();
        info!("Push gateway response: channel=...{}, status={}, {}", get_short_token(channel_id), status, provider_response);

        Ok(PushOutcome { success: status.is_success(), provider_response })
    }
}

fn get_push_body(app_id: &str, channel_id: &str, title: &str, body: &str) -> String {
    json!({
        "app_id": app_id,
        "include_player_ids": [channel_id],
        "headings": { "en": title },
        "contents": { "en": body },
    })
    .to_string()
}
