//! Google Gemini text generation over the Generative Language REST API.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use crate::error::AdtoonError;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        (!text.is_empty()).then_some(text)
    }
}

/// Client for `gemini*` models.
#[derive(Clone, Debug)]
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    /// A client for `api_key` against the public endpoint.
    pub fn new(api_key: &str) -> Result<Self, AdtoonError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// One system + user exchange at temperature 0, returning the reply text.
    #[instrument(skip(self, system_prompt, user_prompt))]
    pub async fn generate(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, AdtoonError> {
        let mut url = url::Url::parse(&format!(
            "{}/models/{model}:generateContent",
            self.base_url
        ))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        let body = json!({
            "systemInstruction": {"parts": [{"text": system_prompt}]},
            "contents": [{"role": "user", "parts": [{"text": user_prompt}]}],
            "generationConfig": {"temperature": 0}
        });
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            return Err(AdtoonError::Api(format!(
                "Gemini API error {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }
        let parsed: GenerateContentResponse = serde_json::from_slice(&bytes)?;
        parsed
            .into_text()
            .ok_or_else(|| AdtoonError::Api("Gemini response had no text".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_text_parts_of_first_candidate() {
        let raw = json!({
            "candidates": [
                {"content": {"parts": [{"text": "hello "}, {"text": "world"}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        });
        let parsed: GenerateContentResponse = serde_json::from_value(raw).expect("parse");
        assert_eq!(parsed.into_text().as_deref(), Some("hello world"));
    }

    #[test]
    fn empty_candidates_have_no_text() {
        let parsed: GenerateContentResponse =
            serde_json::from_value(json!({"candidates": []})).expect("parse");
        assert_eq!(parsed.into_text(), None);
    }
}
