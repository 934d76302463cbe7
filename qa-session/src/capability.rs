//! The question-answering capability seam.
//!
//! The cache treats the QA computation as a black box: given the prior state
//! and a question it yields an answer and the next state.

use crate::state::QaState;
use anyhow::Context;
use async_trait::async_trait;
use qa_common::config::QaConfig;
use serde::{Deserialize, Serialize};

/// Conversational state transition.
#[async_trait]
pub trait QaCapability: Send + Sync {
    /// Answer `question` from `state`, returning the answer and the updated state.
    async fn invoke(&self, state: QaState, question: &str) -> anyhow::Result<(String, QaState)>;
}

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    state: &'a QaState,
    question: &'a str,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    answer: String,
    state: QaState,
}

/// QA capability served over HTTP.
///
/// Sends `POST {endpoint}` with `{"state": ..., "question": ...}` and expects
/// `{"answer": "...", "state": ...}` back.
pub struct HttpQaCapability {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpQaCapability {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        }
    }

    /// Build from configuration. Fails when no endpoint is configured.
    pub fn from_config(config: &QaConfig) -> qa_common::Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| qa_common::Error::Config("qa.endpoint is not set".into()))?;

        Ok(Self::new(endpoint, config.api_key.clone(), config.timeout()))
    }
}

#[async_trait]
impl QaCapability for HttpQaCapability {
    async fn invoke(&self, state: QaState, question: &str) -> anyhow::Result<(String, QaState)> {
        let mut request = self.client.post(&self.endpoint).json(&InvokeRequest {
            state: &state,
            question,
        });
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("QA request to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "QA backend returned {}: {}",
                status,
                qa_common::util::truncate_with_ellipsis(&body, 200)
            );
        }

        let parsed: InvokeResponse = response
            .json()
            .await
            .context("QA backend returned a malformed body")?;

        Ok((parsed.answer, parsed.state))
    }
}
