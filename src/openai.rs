//! OpenAI clients: structured scene writing, image rendering and plain chat.
//!
//! The pipelines talk to [`SceneWriter`] and [`ImageRenderer`] so tests and
//! the web front-end can swap in other implementations.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::config::ImageSettings;
use crate::error::AdtoonError;
use crate::prompts::{scene_set_schema, scene_writer_instructions};
use crate::scenes::SceneSet;
use crate::util::image_dimensions;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Turns a narrative into a validated scene set.
#[async_trait]
pub trait SceneWriter: Send + Sync {
    /// Writes 18 scenes for `narrative` using `model`.
    async fn write_scenes(&self, narrative: &str, model: &str) -> Result<SceneSet, AdtoonError>;
}

/// Renders a prompt into encoded image bytes.
#[async_trait]
pub trait ImageRenderer: Send + Sync {
    /// Returns PNG (or other decodable image) bytes.
    async fn render(&self, prompt: &str, settings: &ImageSettings)
    -> Result<Vec<u8>, AdtoonError>;
}

/// Thin client over the OpenAI HTTP API.
#[derive(Clone, Debug)]
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    debug_dir: Option<PathBuf>,
}

// -----------------------------
// Responses API (text)
// -----------------------------

#[derive(Debug, Deserialize, Serialize)]
struct ResponsesCreateResponse {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<ResponseOutputItem>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ResponseOutputItem {
    #[serde(default)]
    content: Vec<ResponseContentItem>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
enum ResponseContentItem {
    #[serde(rename = "output_text")]
    OutputText { text: String },
    #[serde(other)]
    Other,
}

impl ResponsesCreateResponse {
    fn into_output_text(self) -> Option<String> {
        self.output_text.or_else(|| {
            self.output
                .into_iter()
                .flat_map(|item| item.content.into_iter())
                .find_map(|content| match content {
                    ResponseContentItem::OutputText { text } => Some(text),
                    ResponseContentItem::Other => None,
                })
        })
    }
}

// -----------------------------
// Chat Completions API
// -----------------------------

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

// -----------------------------
// Images API
// -----------------------------

/// Request body for POST /v1/images/generations
/// Docs: https://platform.openai.com/docs/api-reference/images
#[derive(Serialize, Debug, PartialEq)]
struct ImagesGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: &'a str,

    #[serde(skip_serializing_if = "Option::is_none")]
    quality: Option<&'a str>,

    // For GPT image models.
    #[serde(skip_serializing_if = "Option::is_none")]
    output_format: Option<&'a str>,

    // For dall-e models.
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<&'a str>,
}

impl<'a> ImagesGenerateRequest<'a> {
    fn new(prompt: &'a str, settings: &'a ImageSettings) -> Self {
        let model = settings.model.as_str();
        if model.starts_with("gpt-image") {
            // GPT image models always return base64 and have their own
            // quality and size vocabularies.
            let quality = if settings.quality == "hd" {
                "high"
            } else {
                "medium"
            };
            let size = match settings.size.as_str() {
                "1792x1024" => "1536x1024",
                "1024x1792" => "1024x1536",
                _ => "1024x1024",
            };
            Self {
                model,
                prompt,
                n: 1,
                size,
                quality: Some(quality),
                output_format: Some("png"),
                response_format: None,
                style: None,
            }
        } else if model == "dall-e-3" {
            Self {
                model,
                prompt,
                n: 1,
                size: &settings.size,
                quality: Some(&settings.quality),
                output_format: None,
                response_format: Some("url"),
                style: Some(&settings.style),
            }
        } else {
            // dall-e-2 only knows square sizes and no quality/style
            Self {
                model,
                prompt,
                n: 1,
                size: "1024x1024",
                quality: None,
                output_format: None,
                response_format: Some("url"),
                style: None,
            }
        }
    }
}

#[derive(Deserialize, Debug)]
struct ImagesGenerateResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize, Debug)]
struct ImageData {
    b64_json: Option<String>,
    url: Option<String>,
    revised_prompt: Option<String>,
}

impl OpenAiClient {
    /// A client for `api_key` against the public endpoint.
    pub fn new(api_key: &str) -> Result<Self, AdtoonError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            debug_dir: None,
        })
    }

    /// Points the client at another OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Saves every raw API response under `dir` for troubleshooting.
    pub fn with_debug_dir(mut self, dir: PathBuf) -> Self {
        self.debug_dir = Some(dir);
        self
    }

    async fn write_api_response(&self, prefix: &str, ext: &str, bytes: &[u8]) -> Option<PathBuf> {
        static API_RESPONSE_SEQ: AtomicUsize = AtomicUsize::new(0);
        let dir = self.debug_dir.as_ref()?;
        let seq = API_RESPONSE_SEQ.fetch_add(1, Ordering::Relaxed);
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let path = dir.join(format!("debug_{prefix}_{ts}_{seq}.{ext}"));
        if let Err(err) = tokio::fs::create_dir_all(dir).await {
            warn!("Failed to create {}: {err}", dir.display());
            return None;
        }
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => Some(path),
            Err(err) => {
                warn!("Failed to write {}: {err}", path.display());
                None
            }
        }
    }

    async fn post_json(
        &self,
        endpoint: &str,
        debug_prefix: &str,
        body: &impl Serialize,
    ) -> Result<Vec<u8>, AdtoonError> {
        let resp = self
            .client
            .post(format!("{}/{endpoint}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        let bytes = resp.bytes().await?;
        let debug_path = self.write_api_response(debug_prefix, "json", &bytes).await;
        if let Some(path) = &debug_path {
            debug!("Response from /{endpoint} saved to {}", path.display());
        }
        if !status.is_success() {
            return Err(AdtoonError::Api(format!(
                "OpenAI /{endpoint} error {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }
        Ok(bytes.to_vec())
    }

    /// Structured output through the Responses API: the model must answer
    /// with JSON matching `schema`, which is then deserialized into `T`.
    // Docs: https://platform.openai.com/docs/guides/structured-outputs
    #[allow(clippy::too_many_arguments)]
    pub async fn responses_json_schema<T: for<'de> Deserialize<'de>>(
        &self,
        model: &str,
        instructions: &str,
        user_input: &str,
        schema_name: &str,
        schema: Value,
        temperature: Option<f32>,
    ) -> Result<T, AdtoonError> {
        let mut req_body = json!({
            "model": model,
            "instructions": instructions,
            "input": [
                {"role": "user", "content": [{"type": "input_text", "text": user_input}]}
            ],
            "text": {
                "format": {
                    "type": "json_schema",
                    "name": schema_name,
                    "strict": true,
                    "schema": schema
                }
            }
        });
        if let Some(temperature) = temperature {
            req_body["temperature"] = json!(temperature);
        }

        let bytes = self.post_json("responses", "responses", &req_body).await?;
        let parsed: ResponsesCreateResponse = serde_json::from_slice(&bytes)?;
        if let Some(err) = &parsed.error
            && !err.is_null()
        {
            return Err(AdtoonError::Api(format!(
                "OpenAI Responses API returned error: {err}"
            )));
        }

        let output_text = parsed
            .into_output_text()
            .ok_or_else(|| AdtoonError::Api("/v1/responses missing output_text".to_string()))?;

        serde_json::from_str(&output_text).map_err(AdtoonError::from)
    }

    /// One system + user exchange through Chat Completions, returning the
    /// reply text.
    #[instrument(skip(self, system_prompt, user_prompt))]
    pub async fn chat_completion(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, AdtoonError> {
        let req_body = json!({
            "model": model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ]
        });
        let bytes = self
            .post_json("chat/completions", "chat_completions", &req_body)
            .await?;
        let parsed: ChatCompletionResponse = serde_json::from_slice(&bytes)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AdtoonError::Api("chat completion had no content".to_string()))
    }

    async fn download_image(&self, url: &str) -> Result<Vec<u8>, AdtoonError> {
        let url = url::Url::parse(url)?;
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            self.write_api_response("image_download", "bin", &bytes).await;
            return Err(AdtoonError::Api(format!("Image download error {status}")));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SceneWriter for OpenAiClient {
    #[instrument(skip(self, narrative), fields(chars = narrative.chars().count()))]
    async fn write_scenes(&self, narrative: &str, model: &str) -> Result<SceneSet, AdtoonError> {
        info!("Requesting scenes from {model}");
        let scenes: SceneSet = self
            .responses_json_schema(
                model,
                scene_writer_instructions(),
                narrative,
                "scene_set",
                scene_set_schema(),
                Some(0.0),
            )
            .await?;
        info!("Received a valid scene set");
        Ok(scenes)
    }
}

#[async_trait]
impl ImageRenderer for OpenAiClient {
    #[instrument(skip(self, prompt), fields(model = %settings.model))]
    async fn render(
        &self,
        prompt: &str,
        settings: &ImageSettings,
    ) -> Result<Vec<u8>, AdtoonError> {
        let req_body = ImagesGenerateRequest::new(prompt, settings);
        let bytes = self
            .post_json("images/generations", "images_generate", &req_body)
            .await?;
        let parsed: ImagesGenerateResponse = serde_json::from_slice(&bytes)?;

        let first = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| AdtoonError::Api("No image data returned".to_string()))?;

        if let Some(revised_prompt) = first.revised_prompt {
            debug!("Revised prompt from OpenAI: {revised_prompt}");
        }

        let image = if let Some(b64_json) = first.b64_json {
            general_purpose::STANDARD
                .decode(b64_json)
                .map_err(|err| AdtoonError::Api(format!("Failed to base64-decode image: {err}")))?
        } else if let Some(url) = first.url {
            self.download_image(&url).await?
        } else {
            return Err(AdtoonError::Api(
                "Image response missing b64_json and url fields".to_string(),
            ));
        };

        let (width, height) = image_dimensions(&image)?;
        debug!("Rendered {width}x{height} image");
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};

    /// Serves `router` on a free local port, returning its `/v1` base URL.
    async fn serve(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move { axum::serve(listener, router).await });
        format!("http://{addr}/v1/")
    }

    #[test]
    fn dalle3_request_uses_settings() {
        let settings = ImageSettings {
            model: "dall-e-3".to_string(),
            size: "1024x1792".to_string(),
            quality: "hd".to_string(),
            style: "natural".to_string(),
        };
        let body = serde_json::to_value(ImagesGenerateRequest::new("a cat", &settings))
            .expect("serialize");
        assert_eq!(body["size"], "1024x1792");
        assert_eq!(body["quality"], "hd");
        assert_eq!(body["style"], "natural");
        assert_eq!(body["response_format"], "url");
        assert!(body.get("output_format").is_none());
    }

    #[test]
    fn dalle2_request_drops_unsupported_fields() {
        let settings = ImageSettings {
            model: "dall-e-2".to_string(),
            size: "1792x1024".to_string(),
            ..Default::default()
        };
        let body = serde_json::to_value(ImagesGenerateRequest::new("a cat", &settings))
            .expect("serialize");
        assert_eq!(body["size"], "1024x1024");
        assert!(body.get("quality").is_none());
        assert!(body.get("style").is_none());
    }

    #[test]
    fn gpt_image_request_maps_vocabulary() {
        let settings = ImageSettings {
            model: "gpt-image-1".to_string(),
            size: "1792x1024".to_string(),
            quality: "hd".to_string(),
            ..Default::default()
        };
        let request = ImagesGenerateRequest::new("a cat", &settings);
        assert_eq!(request.size, "1536x1024");
        assert_eq!(request.quality, Some("high"));
        assert_eq!(request.output_format, Some("png"));
        assert_eq!(request.response_format, None);
    }

    #[test]
    fn output_text_falls_back_to_content_items() {
        let raw = json!({
            "output": [
                {"content": [{"type": "reasoning"}, {"type": "output_text", "text": "{\"a\":1}"}]}
            ]
        });
        let parsed: ResponsesCreateResponse = serde_json::from_value(raw).expect("parse");
        assert_eq!(parsed.into_output_text().as_deref(), Some("{\"a\":1}"));
    }

    #[tokio::test]
    async fn chat_completion_sends_bearer_and_prompts() {
        let router = axum::Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Json(json!({
                    "choices": [{"message": {"content": format!(
                        "{auth}|{}|{}|{}",
                        body["model"].as_str().unwrap_or_default(),
                        body["messages"][0]["content"].as_str().unwrap_or_default(),
                        body["messages"][1]["content"].as_str().unwrap_or_default(),
                    )}}]
                }))
            }),
        );
        let client = OpenAiClient::new("sk-local")
            .expect("client")
            .with_base_url(&serve(router).await);

        let reply = client
            .chat_completion("gpt-4o-mini", "be brief", "{\"age\":31}")
            .await
            .expect("reply");
        assert_eq!(reply, "Bearer sk-local|gpt-4o-mini|be brief|{\"age\":31}");
    }

    #[tokio::test]
    async fn render_decodes_inline_and_downloaded_images() {
        let png = crate::util::tiny_png();
        let encoded = general_purpose::STANDARD.encode(&png);
        let router = axum::Router::new()
            .route(
                "/v1/images/generations",
                post(move |Json(body): Json<Value>| {
                    let encoded = encoded.clone();
                    async move {
                        if body["model"] == "gpt-image-1" {
                            Json(json!({"data": [{"b64_json": encoded}]}))
                        } else {
                            Json(json!({"data": [{"url": "placeholder", "revised_prompt": "a cat"}]}))
                        }
                    }
                }),
            )
            .route(
                "/v1/files/cat.png",
                get(move || {
                    let png = png.clone();
                    async move { png }
                }),
            );
        let base_url = serve(router).await;
        let client = OpenAiClient::new("sk-local")
            .expect("client")
            .with_base_url(&base_url);

        let settings = ImageSettings {
            model: "gpt-image-1".to_string(),
            ..Default::default()
        };
        let inline = client.render("a cat", &settings).await.expect("inline");
        assert_eq!(image_dimensions(&inline).expect("png"), (3, 2));

        // a relative URL can't be downloaded
        let err = client
            .render("a cat", &ImageSettings::default())
            .await
            .expect_err("bad url");
        assert!(matches!(err, AdtoonError::Api(_)));

        let bytes = client
            .download_image(&format!("{base_url}files/cat.png"))
            .await
            .expect("download");
        assert_eq!(image_dimensions(&bytes).expect("png"), (3, 2));
    }

    #[tokio::test]
    async fn error_status_becomes_api_error() {
        let router = axum::Router::new().route(
            "/v1/images/generations",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let client = OpenAiClient::new("sk-local")
            .expect("client")
            .with_base_url(&serve(router).await);

        let err = client
            .render("a cat", &ImageSettings::default())
            .await
            .expect_err("rate limited");
        assert!(
            matches!(
                &err,
                AdtoonError::Api(message) if message.contains("429") && message.contains("slow down")
            ),
            "{err:?}"
        );
    }
}
