const BASE_DELAY: u64 = 500;
const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT_SECS: u64 = 30;

use crate::config::KubernetesConfig;
use crate::ingress::IngressList;
use crate::intent::{IntentError, IntentSource};
use crate::types::Snapshot;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::io;
use std::path::PathBuf;
use tokio::time::{Duration, sleep};

/// Lists ingresses from the Kubernetes API server.
pub struct KubernetesIntentSource {
    client: reqwest::Client,
    list_url: String,
    token_path: Option<PathBuf>,
    page_size: u32,
    base_delay: Duration,
}

impl KubernetesIntentSource {
    pub fn new(config: &KubernetesConfig) -> Result<Self, IntentError> {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS));

        if let Some(ca_path) = &config.ca_path {
            match std::fs::read(ca_path) {
                Ok(pem) => {
                    builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(path = ?ca_path, "Cluster CA not found, using system roots");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let base = config.api_url.as_str().trim_end_matches('/');
        let list_url = if config.namespace.is_empty() {
            format!("{base}/apis/networking.k8s.io/v1/ingresses")
        } else {
            format!(
                "{base}/apis/networking.k8s.io/v1/namespaces/{}/ingresses",
                config.namespace
            )
        };

        Ok(KubernetesIntentSource {
            client: builder.build()?,
            list_url,
            token_path: config.token_path.clone(),
            page_size: config.page_size,
            base_delay: Duration::from_millis(BASE_DELAY),
        })
    }

    #[cfg(test)]
    fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Service account tokens are rotated, so the file is read per listing.
    /// A missing token file means the API server is reached without one.
    async fn bearer_token(&self) -> Result<Option<String>, IntentError> {
        let Some(path) = &self.token_path else {
            return Ok(None);
        };
        match tokio::fs::read_to_string(path).await {
            Ok(token) => Ok(Some(token.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads every page of the ingress list. Pages are chained with the
    /// `continue` token the API server returns, so the result is one
    /// consistent listing.
    pub async fn list_ingresses(&self) -> Result<IngressList, IntentError> {
        const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
            StatusCode::TOO_MANY_REQUESTS,     // 429
            StatusCode::INTERNAL_SERVER_ERROR, // 500
            StatusCode::BAD_GATEWAY,           // 502
            StatusCode::SERVICE_UNAVAILABLE,   // 503
            StatusCode::GATEWAY_TIMEOUT,       // 504
        ];

        let token = self.bearer_token().await?;
        let mut combined = IngressList::default();
        let mut next_continue: Option<String> = None;
        let mut page_fetches = 0;
        let mut retries = 0;

        loop {
            let mut url =
                Url::parse(&self.list_url).map_err(|e| IntentError::InvalidUrl(e.to_string()))?;
            url.query_pairs_mut()
                .append_pair("limit", &self.page_size.to_string());
            if let Some(ref c) = next_continue {
                url.query_pairs_mut().append_pair("continue", c);
            }

            let mut request = self.client.get(url);
            if let Some(token) = &token {
                request = request.bearer_auth(token);
            }
            let response = request.send().await?;

            let status = response.status();
            if !status.is_success() {
                if RETRIABLE_STATUS_CODES.contains(&status) {
                    if retries >= MAX_RETRIES {
                        return Err(IntentError::RetriesExceeded);
                    }
                    let delay = self.base_delay * 2_u32.pow(retries);
                    tracing::debug!(%status, ?delay, "Retrying ingress listing");
                    sleep(delay).await;
                    retries += 1;
                    continue;
                }
                return Err(IntentError::Status(status));
            }

            retries = 0;

            let page: IngressList = serde_json::from_slice(&response.bytes().await?)?;
            combined.items.extend(page.items);
            page_fetches += 1;

            match page.metadata.continue_token {
                Some(token) if !token.is_empty() => next_continue = Some(token),
                _ => break,
            }
        }

        tracing::debug!(
            pages = page_fetches,
            ingresses = combined.items.len(),
            "Listed ingresses"
        );

        Ok(combined)
    }
}

#[async_trait]
impl IntentSource for KubernetesIntentSource {
    async fn list_rules(&self) -> Result<Snapshot, IntentError> {
        let list = self.list_ingresses().await?;
        Ok(Snapshot::new(list.routing_rules()))
    }
}
