// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Gemini image-generation driver.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::endpoints::{AuthStyle, EndpointDescriptor, EndpointRegistry};
use super::error::ProviderError;
use super::types::{GenerateRequest, GenerateResponse, GeneratedImage};
use super::Provider;

/// Gemini driver configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Per-request timeout
    pub timeout: Duration,
    /// Whether 503 responses trigger a one-shot retry through each other
    /// endpoint in registry order
    pub endpoint_fallback: bool,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            endpoint_fallback: true,
        }
    }
}

/// Driver for Gemini-style image generation endpoints.
pub struct GeminiProvider {
    client: reqwest::Client,
    registry: Arc<EndpointRegistry>,
    config: GeminiConfig,
}

impl GeminiProvider {
    /// Create a driver over the given endpoint registry.
    pub fn new(registry: Arc<EndpointRegistry>) -> Result<Self, ProviderError> {
        Self::with_config(registry, GeminiConfig::default())
    }

    /// Create a driver with custom configuration.
    pub fn with_config(
        registry: Arc<EndpointRegistry>,
        config: GeminiConfig,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .use_rustls_tls()
            .build()
            .map_err(ProviderError::Network)?;

        Ok(Self {
            client,
            registry,
            config,
        })
    }

    /// Build the request body for one generation call.
    fn build_request_body(request: &GenerateRequest) -> serde_json::Value {
        let mut parts = vec![json!({ "text": request.prompt })];

        if let Some(reference) = &request.reference_image {
            if let Some((mime, data)) = split_data_url(reference) {
                parts.push(json!({
                    "inlineData": { "mimeType": mime, "data": data }
                }));
            }
        }

        let mut generation_config = serde_json::Map::new();
        generation_config.insert(
            "temperature".to_string(),
            json!(request.mode.temperature()),
        );
        generation_config.insert(
            "responseModalities".to_string(),
            json!(["TEXT", "IMAGE"]),
        );

        let mut image_config = serde_json::Map::new();
        if let Some(resolution) = request.resolution {
            image_config.insert("imageSize".to_string(), json!(resolution.as_str()));
        }
        if let Some(ratio) = request.aspect_ratio {
            image_config.insert("aspectRatio".to_string(), json!(ratio.as_str()));
        }
        if let Some(count) = request.sample_count {
            image_config.insert("numberOfImages".to_string(), json!(count));
        }
        if !image_config.is_empty() {
            generation_config.insert(
                "imageConfig".to_string(),
                serde_json::Value::Object(image_config),
            );
        }

        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config,
        })
    }

    /// Classify a non-2xx response.
    fn classify_status(status: u16, body: &str) -> ProviderError {
        let message = parse_error_message(body)
            .unwrap_or_else(|| truncate(body, 512));
        match status {
            400 => ProviderError::InvalidRequest(message),
            401 => ProviderError::InvalidApiKey,
            429 => ProviderError::RateLimited,
            503 => ProviderError::Overloaded(message),
            s if s >= 500 => ProviderError::Server { status: s, message },
            s => ProviderError::Api { status: s, message },
        }
    }

    /// Parse a 2xx response body into images.
    fn parse_response_body(
        body: &str,
        model: &str,
        endpoint: &str,
    ) -> Result<GenerateResponse, ProviderError> {
        let response: ApiResponse = serde_json::from_str(body)?;

        if let Some(err) = response.error {
            return Err(ProviderError::Api {
                status: err.code.unwrap_or(0) as u16,
                message: err.message,
            });
        }

        let images: Vec<GeneratedImage> = response
            .candidates
            .iter()
            .flat_map(|c| c.content.as_ref().map(|c| c.parts.as_slice()).unwrap_or(&[]))
            .filter_map(|part| part.inline_data.as_ref())
            .map(|inline| GeneratedImage::from_inline(&inline.mime_type, &inline.data))
            .collect();

        if images.is_empty() {
            return Err(ProviderError::NoImages);
        }

        Ok(GenerateResponse {
            images,
            model_used: model.to_string(),
            endpoint_used: endpoint.to_string(),
        })
    }

    /// Issue one request through one endpoint.
    async fn send_once(
        &self,
        descriptor: &EndpointDescriptor,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, ProviderError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| descriptor.default_model.clone());
        let mut url = format!("{}/models/{}:generateContent", descriptor.base_url, model);

        let body = Self::build_request_body(request);
        let builder = match descriptor.auth {
            AuthStyle::Query => {
                url.push_str("?key=");
                url.push_str(&request.credential.secret);
                self.client.post(&url)
            }
            AuthStyle::Bearer => self
                .client
                .post(&url)
                .bearer_auth(&request.credential.secret),
        };

        debug!(endpoint = %descriptor.tag, model = %model, "submitting generation request");

        let response = builder.json(&body).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        if !(200..300).contains(&status) {
            error!(endpoint = %descriptor.tag, status, "generation request failed");
            return Err(Self::classify_status(status, &text));
        }

        Self::parse_response_body(&text, &model, &descriptor.tag)
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    async fn generate(
        &self,
        request: GenerateRequest,
    ) -> Result<GenerateResponse, ProviderError> {
        let descriptor = self
            .registry
            .get(&request.endpoint)
            .ok_or_else(|| ProviderError::UnknownEndpoint(request.endpoint.clone()))?;

        let original = match self.send_once(descriptor, &request).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        // Overload triggers one retry through each remaining endpoint;
        // the first to succeed wins, otherwise the original 503 surfaces.
        if original.is_overload() && self.config.endpoint_fallback {
            for fallback in self.registry.fallback_candidates(&request.endpoint) {
                warn!(
                    from = %request.endpoint,
                    to = %fallback.tag,
                    "endpoint overloaded, retrying through fallback"
                );
                match self.send_once(fallback, &request).await {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        debug!(endpoint = %fallback.tag, error = %e, "fallback attempt failed");
                    }
                }
            }
        }

        Err(original)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// Split a `data:<mime>;base64,<data>` URL into its MIME type and payload.
fn split_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (mime, data) = rest.split_once(";base64,")?;
    Some((mime, data))
}

fn parse_error_message(body: &str) -> Option<String> {
    let response: ApiResponse = serde_json::from_str(body).ok()?;
    response.error.map(|e| e.message)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[allow(dead_code)]
    text: Option<String>,
    // Both API revisions are in the wild; accept either spelling.
    #[serde(rename = "inlineData", alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType", alias = "mime_type")]
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: Option<i64>,
    message: String,
    #[allow(dead_code)]
    status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use crate::jobs::{AspectRatio, GenerationMode, Resolution};
    use uuid::Uuid;

    fn request(mode: GenerationMode) -> GenerateRequest {
        GenerateRequest {
            credential: Credential {
                id: Uuid::new_v4(),
                provider: "gemini".into(),
                endpoint: "primary".into(),
                secret: "test-secret".into(),
                rpm_limit: 60,
                concurrency_limit: 4,
                priority: 0,
                enabled: true,
                created_at: chrono::Utc::now(),
            },
            endpoint: "primary".into(),
            prompt: "A red apple".into(),
            reference_image: None,
            mode,
            resolution: None,
            aspect_ratio: None,
            sample_count: None,
            model: None,
        }
    }

    #[test]
    fn test_request_body_draft_temperature() {
        let body = GeminiProvider::build_request_body(&request(GenerationMode::Draft));
        assert_eq!(body["generationConfig"]["temperature"], 0.7);
        let body = GeminiProvider::build_request_body(&request(GenerationMode::Final));
        assert_eq!(body["generationConfig"]["temperature"], 1.0);
    }

    #[test]
    fn test_request_body_modalities_and_prompt() {
        let body = GeminiProvider::build_request_body(&request(GenerationMode::Final));
        assert_eq!(
            body["generationConfig"]["responseModalities"],
            serde_json::json!(["TEXT", "IMAGE"])
        );
        assert_eq!(body["contents"][0]["parts"][0]["text"], "A red apple");
        // No imageConfig unless the caller provided image parameters
        assert!(body["generationConfig"].get("imageConfig").is_none());
    }

    #[test]
    fn test_request_body_image_config() {
        let mut req = request(GenerationMode::Final);
        req.resolution = Some(Resolution::TwoK);
        req.aspect_ratio = Some(AspectRatio::Wide);
        req.sample_count = Some(3);
        let body = GeminiProvider::build_request_body(&req);
        let image_config = &body["generationConfig"]["imageConfig"];
        assert_eq!(image_config["imageSize"], "2K");
        assert_eq!(image_config["aspectRatio"], "16:9");
        assert_eq!(image_config["numberOfImages"], 3);
    }

    #[test]
    fn test_request_body_reference_image() {
        let mut req = request(GenerationMode::Final);
        req.reference_image = Some("data:image/png;base64,aGVsbG8=".into());
        let body = GeminiProvider::build_request_body(&req);
        let inline = &body["contents"][0]["parts"][1]["inlineData"];
        assert_eq!(inline["mimeType"], "image/png");
        assert_eq!(inline["data"], "aGVsbG8=");
    }

    #[test]
    fn test_parse_camel_case_response() {
        let body = r#"{
            "candidates": [{"content": {"parts": [
                {"text": "here you go"},
                {"inlineData": {"mimeType": "image/png", "data": "QUJD"}}
            ]}}]
        }"#;
        let response = GeminiProvider::parse_response_body(body, "m", "primary").unwrap();
        assert_eq!(response.images.len(), 1);
        assert_eq!(response.images[0].url, "data:image/png;base64,QUJD");
    }

    #[test]
    fn test_parse_snake_case_response() {
        let camel = r#"{
            "candidates": [{"content": {"parts": [
                {"inlineData": {"mimeType": "image/png", "data": "QUJD"}}
            ]}}]
        }"#;
        let snake = r#"{
            "candidates": [{"content": {"parts": [
                {"inline_data": {"mime_type": "image/png", "data": "QUJD"}}
            ]}}]
        }"#;
        let a = GeminiProvider::parse_response_body(camel, "m", "primary").unwrap();
        let b = GeminiProvider::parse_response_body(snake, "m", "primary").unwrap();
        assert_eq!(a.images, b.images);
    }

    #[test]
    fn test_parse_no_images() {
        let body = r#"{"candidates": [{"content": {"parts": [{"text": "sorry"}]}}]}"#;
        let err = GeminiProvider::parse_response_body(body, "m", "primary").unwrap_err();
        assert!(matches!(err, ProviderError::NoImages));
    }

    #[test]
    fn test_parse_error_object() {
        let body = r#"{"error": {"code": 403, "message": "quota exhausted", "status": "PERMISSION_DENIED"}}"#;
        let err = GeminiProvider::parse_response_body(body, "m", "primary").unwrap_err();
        match err {
            ProviderError::Api { message, .. } => assert_eq!(message, "quota exhausted"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_classify_statuses() {
        assert!(matches!(
            GeminiProvider::classify_status(400, "{}"),
            ProviderError::InvalidRequest(_)
        ));
        assert!(matches!(
            GeminiProvider::classify_status(401, "{}"),
            ProviderError::InvalidApiKey
        ));
        assert!(matches!(
            GeminiProvider::classify_status(429, "{}"),
            ProviderError::RateLimited
        ));
        assert!(matches!(
            GeminiProvider::classify_status(503, "{}"),
            ProviderError::Overloaded(_)
        ));
        assert!(matches!(
            GeminiProvider::classify_status(500, "{}"),
            ProviderError::Server { status: 500, .. }
        ));
        assert!(matches!(
            GeminiProvider::classify_status(418, "{}"),
            ProviderError::Api { status: 418, .. }
        ));
    }

    #[test]
    fn test_split_data_url() {
        assert_eq!(
            split_data_url("data:image/jpeg;base64,Zm9v"),
            Some(("image/jpeg", "Zm9v"))
        );
        assert_eq!(split_data_url("https://example.com/a.png"), None);
    }
}
