//! reqwest client for the botster `/push/*` API.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{PushBackend, SubscriptionStatus};
use crate::constants::{STATUS_PATH, SUBSCRIBE_PATH, UNSUBSCRIBE_PATH, VAPID_KEY_PATH};
use crate::error::PushError;
use crate::platform::PushSubscriptionRecord;
use crate::token::AuthToken;

#[derive(Debug, Deserialize)]
struct VapidKeyResponse {
    public_key: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct UnsubscribeBody<'a> {
    endpoint: &'a str,
}

/// reqwest implementation of [`PushBackend`].
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    server_url: String,
}

impl HttpBackend {
    /// Backend for `server_url` with a request timeout.
    pub fn new(server_url: impl Into<String>, timeout: Duration) -> Result<Self, PushError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            server_url: server_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }

    /// Turn a non-2xx response into [`PushError::ServerRejected`].
    async fn rejection(response: Response) -> PushError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
        PushError::ServerRejected {
            status: status.as_u16(),
            message: parsed.message.or(parsed.error).filter(|m| !m.trim().is_empty()),
        }
    }
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"))
}

#[async_trait]
impl PushBackend for HttpBackend {
    async fn vapid_public_key(&self) -> Result<String, PushError> {
        let response = self.client.get(self.url(VAPID_KEY_PATH)).send().await?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        if !is_json(&response) {
            return Err(PushError::MissingKey(
                "VAPID key response is not JSON".to_string(),
            ));
        }

        let body: VapidKeyResponse = response.json().await?;
        if body.public_key.trim().is_empty() {
            return Err(PushError::MissingKey("server returned an empty key".to_string()));
        }
        Ok(body.public_key)
    }

    async fn subscribe(
        &self,
        token: &AuthToken,
        record: &PushSubscriptionRecord,
    ) -> Result<(), PushError> {
        let response = self
            .client
            .post(self.url(SUBSCRIBE_PATH))
            .bearer_auth(token.as_str())
            .json(record)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::rejection(response).await)
        }
    }

    async fn unsubscribe(
        &self,
        token: &AuthToken,
        endpoint: Option<&str>,
    ) -> Result<(), PushError> {
        let mut request = self
            .client
            .post(self.url(UNSUBSCRIBE_PATH))
            .bearer_auth(token.as_str());
        if let Some(endpoint) = endpoint {
            request = request.json(&UnsubscribeBody { endpoint });
        }

        let response = request.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::rejection(response).await)
        }
    }

    async fn status(&self, token: &AuthToken) -> Result<SubscriptionStatus, PushError> {
        let response = self
            .client
            .get(self.url(STATUS_PATH))
            .bearer_auth(token.as_str())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(response.json().await?)
    }
}
