//! S3-compatible object storage.
//!
//! Raw uploads and generated artifacts live in buckets reached over the
//! S3 REST API with SigV4 signing. A custom `endpoint_url` switches to
//! path-style addressing for MinIO and LocalStack.

use async_trait::async_trait;

use crate::config::StorageConfig;
use crate::error::PipelineError;
use crate::sigv4::{sign_request, uri_encode, AwsCredentials, SignableRequest};
use crate::traits::BlobStore;

pub struct S3Store {
    http: reqwest::Client,
    config: StorageConfig,
    creds: AwsCredentials,
}

impl S3Store {
    pub fn new(config: StorageConfig, creds: AwsCredentials) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            creds,
        }
    }

    /// Resolve scheme, host, and canonical URI for a bucket/key pair.
    ///
    /// With a custom endpoint the bucket goes into the path (path-style);
    /// otherwise the standard virtual-hosted form is used.
    fn request_target(&self, bucket: &str, key: &str) -> (String, String, String) {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        if let Some(ref endpoint) = self.config.endpoint_url {
            let scheme = if endpoint.starts_with("http://") {
                "http"
            } else {
                "https"
            };
            let host = endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string();
            let uri = format!("/{}/{}", uri_encode(bucket), encoded_key);
            (scheme.to_string(), host, uri)
        } else {
            let host = format!("{}.s3.{}.amazonaws.com", bucket, self.config.region);
            (String::from("https"), host, format!("/{}", encoded_key))
        }
    }

    fn signed_builder(
        &self,
        method: &str,
        bucket: &str,
        key: &str,
        payload: &[u8],
        extra_headers: &[(&str, &str)],
    ) -> (reqwest::RequestBuilder, String) {
        let (scheme, host, uri) = self.request_target(bucket, key);
        let url = format!("{}://{}{}", scheme, host, uri);

        let headers = sign_request(
            &SignableRequest {
                method,
                host: &host,
                canonical_uri: &uri,
                canonical_querystring: "",
                payload,
                service: "s3",
                region: &self.config.region,
                extra_headers,
            },
            &self.creds,
        );

        let mut builder = match method {
            "PUT" => self.http.put(&url),
            _ => self.http.get(&url),
        };
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        (builder, url)
    }
}

#[async_trait]
impl BlobStore for S3Store {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, PipelineError> {
        let (builder, url) = self.signed_builder("GET", bucket, key, b"", &[]);
        let resp = builder
            .send()
            .await
            .map_err(|e| PipelineError::transient(anyhow::anyhow!("GET {} failed: {}", url, e)))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PipelineError::content(format!(
                "object not found: {}/{}",
                bucket, key
            )));
        }
        if !status.is_success() {
            return Err(PipelineError::transient(anyhow::anyhow!(
                "S3 GetObject failed (HTTP {}) for key '{}'",
                status,
                key
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| PipelineError::transient(anyhow::anyhow!("read body: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, PipelineError> {
        let (builder, url) = self.signed_builder(
            "PUT",
            bucket,
            key,
            &bytes,
            &[("content-type", content_type)],
        );
        let resp = builder
            .body(bytes)
            .send()
            .await
            .map_err(|e| PipelineError::transient(anyhow::anyhow!("PUT {} failed: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::transient(anyhow::anyhow!(
                "S3 PutObject failed (HTTP {}) for key '{}': {}",
                status,
                key,
                body.chars().take(500).collect::<String>()
            )));
        }

        Ok(format!("s3://{}/{}", bucket, key))
    }
}
