//! Remote generative services: prompt writing and image-to-image generation.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::queue::payload::OutputFormat;
use crate::utils::http_client::truncate_body;
use crate::{Error, Result};

#[async_trait]
pub trait PromptGenerator: Send + Sync {
    async fn generate_prompt(&self, instruction: &str) -> Result<String>;
}

/// One image-to-image call.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub reference: Bytes,
    pub format: OutputFormat,
    /// How strongly the reference image constrains the output, 0..1.
    pub strength: f32,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, request: &ImageRequest) -> Result<Bytes>;
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiPromptGenerator {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiPromptGenerator {
    pub fn new(
        client: Client,
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn build_payload(&self, instruction: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You write prompts for photorealistic product photography."
                },
                {"role": "user", "content": instruction}
            ],
            "temperature": 0.8,
            "max_tokens": 300,
        })
    }
}

#[async_trait]
impl PromptGenerator for OpenAiPromptGenerator {
    async fn generate_prompt(&self, instruction: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&self.build_payload(instruction))
            .send()
            .await
            .map_err(|e| Error::remote("prompt", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::remote(
                "prompt",
                format!("HTTP {}: {}", status, truncate_body(&body)),
            ));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| Error::remote("prompt", format!("malformed response: {}", e)))?;

        let prompt = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();
        debug!(model = %self.model, chars = prompt.len(), "Generated prompt");
        Ok(prompt)
    }
}

/// JSON image-to-image gateway.
pub struct HttpImageGenerator {
    client: Client,
    api_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    image: Option<String>,
    #[serde(default)]
    artifacts: Vec<ImageArtifact>,
}

#[derive(Debug, Deserialize)]
struct ImageArtifact {
    base64: String,
}

impl ImageResponse {
    fn into_base64(self) -> Option<String> {
        self.image
            .or_else(|| self.artifacts.into_iter().next().map(|a| a.base64))
    }
}

impl HttpImageGenerator {
    pub fn new(client: Client, api_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    fn build_payload(&self, request: &ImageRequest) -> serde_json::Value {
        let (width, height) = request.format.dimensions();
        json!({
            "prompt": request.prompt,
            "init_image": STANDARD.encode(&request.reference),
            "width": width,
            "height": height,
            "strength": request.strength,
            "samples": 1,
        })
    }
}

fn decode_image(encoded: &str) -> Result<Bytes> {
    // Some gateways return data URLs.
    let encoded = encoded
        .split_once("base64,")
        .map_or(encoded, |(_, data)| data);
    STANDARD
        .decode(encoded.trim())
        .map(Bytes::from)
        .map_err(|e| Error::remote("image", format!("invalid base64 image: {}", e)))
}

#[async_trait]
impl ImageGenerator for HttpImageGenerator {
    async fn generate_image(&self, request: &ImageRequest) -> Result<Bytes> {
        let mut builder = self.client.post(&self.api_url).json(&self.build_payload(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| Error::remote("image", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::remote(
                "image",
                format!("HTTP {}: {}", status, truncate_body(&body)),
            ));
        }

        let parsed: ImageResponse = response
            .json()
            .await
            .map_err(|e| Error::remote("image", format!("malformed response: {}", e)))?;
        let encoded = parsed
            .into_base64()
            .ok_or_else(|| Error::remote("image", "response contained no image"))?;
        let image = decode_image(&encoded)?;
        debug!(size = image.len(), format = %request.format, "Generated image");
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_payload_carries_dimensions_and_strength() {
        crate::utils::http_client::install_rustls_provider();
        let generator = HttpImageGenerator::new(Client::new(), "https://img.example.com", None);
        let payload = generator.build_payload(&ImageRequest {
            prompt: "mug on marble".to_string(),
            reference: Bytes::from_static(b"png"),
            format: OutputFormat::Landscape,
            strength: 0.35,
        });
        assert_eq!(payload["width"], 1216);
        assert_eq!(payload["height"], 832);
        assert_eq!(payload["init_image"], STANDARD.encode(b"png"));
        assert!((payload["strength"].as_f64().unwrap() - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_image_response_shapes() {
        let direct: ImageResponse = serde_json::from_value(json!({"image": "aGk="})).unwrap();
        assert_eq!(direct.into_base64().as_deref(), Some("aGk="));

        let artifacts: ImageResponse =
            serde_json::from_value(json!({"artifacts": [{"base64": "aGk="}]})).unwrap();
        assert_eq!(artifacts.into_base64().as_deref(), Some("aGk="));

        let empty: ImageResponse = serde_json::from_value(json!({})).unwrap();
        assert!(empty.into_base64().is_none());
    }

    #[test]
    fn test_decode_image_accepts_data_url() {
        assert_eq!(decode_image("aGk=").unwrap(), Bytes::from_static(b"hi"));
        assert_eq!(
            decode_image("data:image/png;base64,aGk=").unwrap(),
            Bytes::from_static(b"hi")
        );
        assert!(decode_image("***").is_err());
    }

    #[test]
    fn test_chat_payload() {
        crate::utils::http_client::install_rustls_provider();
        let generator =
            OpenAiPromptGenerator::new(Client::new(), "https://api.example.com", "k", "gpt-4o-mini");
        let payload = generator.build_payload("describe");
        assert_eq!(payload["model"], "gpt-4o-mini");
        assert_eq!(payload["messages"][1]["content"], "describe");
    }
}
