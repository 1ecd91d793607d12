use std::time::Duration;

use reqwest::{Client, header::RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::common::{is_retryable_status, join_url, parse_retry_after, truncate_for_log};
use crate::constants::{
    DEFAULT_BACKEND_URL, DEFAULT_ENRICH_TIMEOUT_SECS, DEFAULT_MAX_RETRIES, EMAIL_DISPATCH_PATH,
    ENRICH_PATH, USER_AGENT,
};
use crate::error::{EmailError, EnrichError};
use crate::profile::{EnrichmentResponse, EnrichmentResult};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub backend_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_ENRICH_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequest {
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub html: String,
}

impl EmailRequest {
    /// Names of required fields that are empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.to.iter().all(|r| r.trim().is_empty()) {
            missing.push("to");
        }
        if self.subject.trim().is_empty() {
            missing.push("subject");
        }
        if self.html.trim().is_empty() {
            missing.push("html");
        }
        missing
    }
}

/// HTTP client for the external enrichment backend.
#[derive(Debug, Clone)]
pub struct EnrichmentClient {
    http: Client,
    config: ClientConfig,
}

impl EnrichmentClient {
    pub fn new(config: ClientConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Submit identifiers and return whatever records came back. The whole
    /// exchange, retries included, is bounded by the configured timeout.
    pub async fn fetch_profiles(
        &self,
        npis: &[String],
    ) -> Result<Vec<EnrichmentResult>, EnrichError> {
        let secs = self.config.timeout.as_secs();
        match tokio::time::timeout(self.config.timeout, self.fetch_with_retries(npis)).await {
            Ok(result) => result,
            Err(_) => Err(EnrichError::Timeout(secs)),
        }
    }

    async fn fetch_with_retries(
        &self,
        npis: &[String],
    ) -> Result<Vec<EnrichmentResult>, EnrichError> {
        let url = join_url(&self.config.backend_url, ENRICH_PATH);
        let body = json!({ "npi_list": npis });
        let attempts = self.config.max_retries.max(1);
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let response = self.http.post(&url).json(&body).send().await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let text = resp.text().await?;
                        let results = EnrichmentResponse::parse(&text)?.into_results();
                        tracing::debug!(
                            submitted = npis.len(),
                            returned = results.len(),
                            "enrichment response decoded"
                        );
                        return Ok(results);
                    }

                    let retry_after = parse_retry_after(resp.headers().get(RETRY_AFTER));
                    let text = resp.text().await.unwrap_or_default();
                    if is_retryable_status(status) && attempt < attempts {
                        tracing::warn!(
                            %status,
                            attempt,
                            body = %truncate_for_log(&text),
                            "enrichment backend busy, retrying"
                        );
                        tokio::time::sleep(retry_after.unwrap_or(backoff)).await;
                        backoff = (backoff + backoff).min(Duration::from_secs(60));
                        continue;
                    }

                    return Err(EnrichError::Status {
                        status,
                        body: truncate_for_log(&text),
                    });
                }
                Err(err) => {
                    if attempt >= attempts {
                        return Err(EnrichError::Request(err));
                    }
                    tracing::warn!(attempt, error = %err, "enrichment request failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff + backoff).min(Duration::from_secs(60));
                }
            }
        }
    }

    /// Forward an email to the backend once; returns the backend's body.
    pub async fn send_email(&self, req: &EmailRequest) -> Result<String, EmailError> {
        let url = join_url(&self.config.backend_url, EMAIL_DISPATCH_PATH);
        let resp = self
            .http
            .post(&url)
            .timeout(self.config.timeout)
            .json(req)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(EmailError::Status {
                status,
                body: truncate_for_log(&text),
            });
        }
        Ok(text)
    }
}
