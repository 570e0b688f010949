use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::provider::LlmProvider;
use crate::config::LlmSettings;
use crate::core::errors::ApiError;

/// HTTP client for the Gemini `generateContent` / `embedContent` endpoints.
#[derive(Clone)]
pub struct GeminiProvider {
    base_url: String,
    model: String,
    embedding_model: String,
    api_key: String,
    temperature: f64,
    client: Client,
}

impl GeminiProvider {
    pub fn new(settings: &LlmSettings) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            embedding_model: settings.embedding_model.clone(),
            api_key: settings.api_key.clone(),
            temperature: settings.temperature,
            client,
        })
    }

    fn endpoint(&self, model: &str, action: &str) -> String {
        format!(
            "{}/{}:{}?key={}",
            self.base_url, model, action, self.api_key
        )
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn health_check(&self) -> Result<bool, ApiError> {
        let url = format!("{}?key={}", self.base_url, self.api_key);
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String, ApiError> {
        if self.api_key.is_empty() {
            return Err(ApiError::Upstream(
                "Gemini API key is not configured".to_string(),
            ));
        }

        let url = self.endpoint(&self.model, "generateContent");
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }]
            }],
            "generationConfig": {
                "temperature": self.temperature
            }
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::upstream)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            tracing::error!("Gemini generate returned {}: {}", status, text);
            return Err(ApiError::Upstream(format!(
                "generation request failed with status {}",
                status
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::upstream)?;
        let text = payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(|s| s.to_string());

        match text {
            Some(text) if !text.is_empty() => Ok(text),
            _ => {
                tracing::warn!("Gemini response had no extractable text: {}", payload);
                Err(ApiError::Upstream(
                    "generation response contained no text".to_string(),
                ))
            }
        }
    }

    async fn embed(&self, input: &str) -> Result<Vec<f32>, ApiError> {
        if self.api_key.is_empty() {
            return Err(ApiError::Upstream(
                "Gemini API key is not configured".to_string(),
            ));
        }

        let url = self.endpoint(&self.embedding_model, "embedContent");
        let body = json!({
            "content": {
                "parts": [{ "text": input }]
            }
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::upstream)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            tracing::error!("Gemini embed returned {}: {}", status, text);
            return Err(ApiError::Upstream(format!(
                "embedding request failed with status {}",
                status
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::upstream)?;
        let values = payload["embedding"]["values"]
            .as_array()
            .ok_or_else(|| {
                ApiError::Upstream("embedding response contained no vector".to_string())
            })?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Vec<f32>>();

        if values.is_empty() {
            return Err(ApiError::Upstream(
                "embedding response contained an empty vector".to_string(),
            ));
        }

        Ok(values)
    }
}
