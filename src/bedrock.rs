//! Amazon Bedrock runtime client.
//!
//! One client serves both model roles: the Converse API for chat-style
//! completion and the Titan invoke API for text embeddings. Requests are
//! signed with SigV4 (service `bedrock`) and retried with exponential
//! backoff on transient failures.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (throttled) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately, not retryable
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use async_trait::async_trait;

use crate::config::BedrockConfig;
use crate::error::PipelineError;
use crate::sigv4::{sign_request, uri_encode, AwsCredentials, SignableRequest};
use crate::models::Turn;
use crate::traits::{Embedder, TextModel};

/// Sampling temperature for all Converse calls.
const TEMPERATURE: f64 = 0.3;

pub struct BedrockClient {
    http: reqwest::Client,
    config: BedrockConfig,
    creds: AwsCredentials,
}

impl BedrockClient {
    pub fn new(config: BedrockConfig, creds: AwsCredentials) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            config,
            creds,
        })
    }

    fn host(&self) -> String {
        format!("bedrock-runtime.{}.amazonaws.com", self.config.region)
    }

    /// POST `body` to `/model/{model_id}/{action}` with signing and retry.
    async fn post_model(
        &self,
        model_id: &str,
        action: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, PipelineError> {
        let host = self.host();
        let uri = format!("/model/{}/{}", uri_encode(model_id), action);
        let url = format!("https://{}{}", host, uri);
        let payload = serde_json::to_vec(body)
            .map_err(|e| PipelineError::transient(anyhow::anyhow!("encode request: {}", e)))?;

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            // The signature carries a timestamp, so each attempt re-signs.
            let headers = sign_request(
                &SignableRequest {
                    method: "POST",
                    host: &host,
                    canonical_uri: &uri,
                    canonical_querystring: "",
                    payload: &payload,
                    service: "bedrock",
                    region: &self.config.region,
                    extra_headers: &[("content-type", "application/json")],
                },
                &self.creds,
            );

            let mut builder = self.http.post(&url).body(payload.clone());
            for (name, value) in &headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json().await.map_err(|e| {
                            PipelineError::transient(anyhow::anyhow!(
                                "Bedrock response decode failed: {}",
                                e
                            ))
                        });
                    }

                    // Throttled or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Bedrock API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(PipelineError::content(format!(
                        "Bedrock API error {}: {}",
                        status,
                        body_text.chars().take(500).collect::<String>()
                    )));
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(PipelineError::transient(last_err.unwrap_or_else(|| {
            anyhow::anyhow!("Bedrock request failed after retries")
        })))
    }
}

#[async_trait]
impl TextModel for BedrockClient {
    async fn complete(
        &self,
        messages: &[Turn],
        system: Option<&str>,
        max_tokens: u32,
    ) -> Result<String, PipelineError> {
        let converse_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|turn| {
                serde_json::json!({
                    "role": turn.role.as_str(),
                    "content": [{"text": turn.content}],
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "messages": converse_messages,
            "inferenceConfig": {
                "maxTokens": max_tokens,
                "temperature": TEMPERATURE,
            },
        });
        if let Some(system) = system {
            body["system"] = serde_json::json!([{"text": system}]);
        }

        let json = self
            .post_model(&self.config.text_model_id, "converse", &body)
            .await?;

        json["output"]["message"]["content"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                PipelineError::transient(anyhow::anyhow!(
                    "Converse response missing output.message.content[0].text"
                ))
            })
    }
}

#[async_trait]
impl Embedder for BedrockClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        // Titan rejects empty input; catch it before going to the network.
        if text.trim().is_empty() {
            return Err(PipelineError::content(
                "cannot embed empty text".to_string(),
            ));
        }

        let body = serde_json::json!({
            "inputText": text,
            "dimensions": self.config.dims,
            "normalize": true,
        });

        let json = self
            .post_model(&self.config.embed_model_id, "invoke", &body)
            .await?;

        let values = json["embedding"].as_array().ok_or_else(|| {
            PipelineError::transient(anyhow::anyhow!("embedding response missing 'embedding'"))
        })?;

        let vector: Vec<f32> = values
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect();

        if vector.len() != self.config.dims {
            return Err(PipelineError::transient(anyhow::anyhow!(
                "embedding has {} dimensions, expected {}",
                vector.len(),
                self.config.dims
            )));
        }

        Ok(vector)
    }
}
