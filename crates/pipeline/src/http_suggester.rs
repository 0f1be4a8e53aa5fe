//! HTTP adapter for a vision-language inference service.
//!
//! Each call preprocesses the image, posts it as `multipart/form-data`
//! together with the naming prompt and sanitizes the returned text.
//!
//! Request fields: `image` (PNG), `prompt`, `max_new_tokens` and, when
//! configured, `model`. The service answers `{"name": "..."}`.

use async_trait::async_trait;
use renamer_core::naming::{build_prompt, sanitize};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::preprocess::{self, DEFAULT_MAX_PIXELS};
use crate::suggester::{NameSuggester, SuggestError};

/// Token budget for one generated name.
pub const DEFAULT_MAX_NEW_TOKENS: u32 = 15;

#[derive(Debug, Clone)]
pub struct HttpSuggesterConfig {
    /// Full endpoint URL, e.g. `http://127.0.0.1:8001/v1/suggest`.
    pub url: String,
    pub model_id: Option<String>,
    pub max_pixels: u32,
    pub max_new_tokens: u32,
}

impl HttpSuggesterConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            model_id: None,
            max_pixels: DEFAULT_MAX_PIXELS,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SuggestResponse {
    #[serde(alias = "filename", alias = "text")]
    name: String,
}

pub struct HttpSuggester {
    client: reqwest::Client,
    config: HttpSuggesterConfig,
}

impl HttpSuggester {
    pub fn new(config: HttpSuggesterConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Reuse an existing [`reqwest::Client`] and its connection pool.
    pub fn with_client(client: reqwest::Client, config: HttpSuggesterConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &HttpSuggesterConfig {
        &self.config
    }

    fn form(&self, png: Vec<u8>, user_prompt: &str) -> Result<Form, SuggestError> {
        let image = Part::bytes(png)
            .file_name("image.png")
            .mime_str("image/png")
            .map_err(|e| SuggestError::Backend(e.to_string()))?;

        let mut form = Form::new()
            .part("image", image)
            .text("prompt", build_prompt(user_prompt))
            .text("max_new_tokens", self.config.max_new_tokens.to_string());
        if let Some(model) = &self.config.model_id {
            form = form.text("model", model.clone());
        }
        Ok(form)
    }
}

/// Map a non-success response to the port's error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> SuggestError {
    let detail = format!("{} {}", status.as_u16(), body.trim());
    match status {
        StatusCode::UNSUPPORTED_MEDIA_TYPE | StatusCode::UNPROCESSABLE_ENTITY => {
            SuggestError::UnsupportedFormat(detail)
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            SuggestError::BackendUnavailable(detail)
        }
        _ => SuggestError::Backend(detail),
    }
}

fn classify_transport(e: reqwest::Error) -> SuggestError {
    if e.is_connect() || e.is_timeout() {
        SuggestError::BackendUnavailable(e.to_string())
    } else {
        SuggestError::Backend(e.to_string())
    }
}

#[async_trait]
impl NameSuggester for HttpSuggester {
    async fn suggest_name(&self, image: &[u8], user_prompt: &str) -> Result<String, SuggestError> {
        let prepared = preprocess::prepare(image.to_vec(), self.config.max_pixels).await?;
        tracing::debug!(
            source_kind = ?prepared.source_kind,
            width = prepared.width,
            height = prepared.height,
            "Image prepared for inference",
        );

        let response = self
            .client
            .post(&self.config.url)
            .multipart(self.form(prepared.png, user_prompt)?)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(classify_status(status, &body));
        }

        let parsed: SuggestResponse = response
            .json()
            .await
            .map_err(|e| SuggestError::Backend(format!("invalid suggestion response: {e}")))?;

        Ok(sanitize(&parsed.name))
    }
}
