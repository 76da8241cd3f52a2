use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::json;

use super::{AiService, AiSuggestion, build_prompt, parse_suggestion};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiService {
    api_key: String,
    model: String,
    client: Client,
}

impl GeminiService {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            client: Client::new(),
        }
    }

    fn request_body(image_base64: &str, mime_type: &str) -> serde_json::Value {
        json!({
            "contents": [
                {
                    "parts": [
                        {
                            "inline_data": {
                                "mime_type": mime_type,
                                "data": image_base64
                            }
                        },
                        { "text": build_prompt() }
                    ]
                }
            ],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "title": { "type": "STRING" },
                        "subject": { "type": "STRING" },
                        "description": { "type": "STRING" },
                        "rating": { "type": "STRING" },
                        "tags": { "type": "ARRAY", "items": { "type": "STRING" } }
                    },
                    "required": ["title", "subject", "description", "tags", "rating"]
                }
            }
        })
    }
}

impl std::fmt::Debug for GeminiService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiService")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl AiService for GeminiService {
    fn name(&self) -> &str {
        "Gemini"
    }

    async fn suggest(&self, image_base64: &str, mime_type: &str) -> Result<AiSuggestion> {
        let url = format!(
            "{API_BASE}/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let resp = self
            .client
            .post(&url)
            .json(&Self::request_body(image_base64, mime_type))
            .send()
            .await
            .context("Gemini request failed")?;

        let status = resp.status();
        let text = resp.text().await.context("Failed to read Gemini response")?;

        if !status.is_success() {
            anyhow::bail!("Gemini API error ({}): {}", status, text);
        }

        let json: serde_json::Value =
            serde_json::from_str(&text).context("Failed to parse Gemini response JSON")?;

        let content = json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .context("Empty response from Gemini")?;

        parse_suggestion(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_carries_image_and_schema() {
        let body = GeminiService::request_body("QUJD", "image/jpeg");
        let part = &body["contents"][0]["parts"][0]["inline_data"];
        assert_eq!(part["mime_type"], "image/jpeg");
        assert_eq!(part["data"], "QUJD");
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(
            body["generationConfig"]["responseSchema"]["properties"]["tags"]["type"],
            "ARRAY"
        );
    }

    #[test]
    fn debug_hides_api_key() {
        let service = GeminiService::new("secret-key".into(), "gemini-2.0-flash".into());
        let shown = format!("{service:?}");
        assert!(shown.contains("gemini-2.0-flash"));
        assert!(!shown.contains("secret-key"));
    }
}
