//! `GeminiClient`: [`ModelService`] over the vendor REST API.
//!
//! Every request goes to `{base_url}/models/{model}:{method}` with the API
//! key in the `x-goog-api-key` header.  Endpoints and model identifiers come
//! from [`ServiceConfig`]; nothing is hardcoded here except prompt text and
//! the fixed maps retrieval location.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::wire::{Content, GenerateContentResponse, Operation, Part};
use super::{
    AspectRatio, ChatMessage, ChatReply, GeneratedImage, GenerationSettings, ImageInput,
    ModelService, ServiceError, Source,
};
use crate::codec::{decode_text_to_bytes, encode_bytes_to_text};
use crate::config::ServiceConfig;

/// Thinking budget requested when thinking mode is on.
pub const THINKING_BUDGET: u32 = 32_768;

/// Fixed location sent with maps grounding (Kuala Lumpur).
pub const MAPS_LAT_LNG: (f64, f64) = (3.1390, 101.6869);

const TRANSCRIBE_PROMPT: &str = "Transcribe this audio exactly as spoken.";
const VIDEO_RESOLUTION: &str = "1080p";

// ---------------------------------------------------------------------------
// Request builders
// ---------------------------------------------------------------------------

/// Pick the chat model and build the `generateContent` body.
///
/// Maps grounding is only served by the lite model, and that model does not
/// take a thinking budget.
pub fn chat_request(
    config: &ServiceConfig,
    history: &[ChatMessage],
    message: &str,
    settings: &GenerationSettings,
) -> (String, Value) {
    let model = if settings.use_maps {
        config.maps_model.clone()
    } else {
        config.chat_model.clone()
    };

    let mut contents: Vec<Content> = history
        .iter()
        .filter_map(|m| {
            m.role
                .wire_name()
                .map(|role| Content::text(Some(role), m.content.clone()))
        })
        .collect();
    contents.push(Content::text(Some("user"), message));

    let mut tools = Vec::new();
    if settings.use_search {
        tools.push(json!({ "googleSearch": {} }));
    }
    if settings.use_maps {
        tools.push(json!({ "googleMaps": {} }));
    }

    let mut body = json!({ "contents": contents, "tools": tools });

    if settings.use_maps {
        let (latitude, longitude) = MAPS_LAT_LNG;
        body["toolConfig"] = json!({
            "retrievalConfig": { "latLng": { "latitude": latitude, "longitude": longitude } }
        });
    }
    if settings.thinking_mode && !settings.use_maps {
        body["generationConfig"] = json!({
            "thinkingConfig": { "thinkingBudget": THINKING_BUDGET, "includeThoughts": true }
        });
    }

    (model, body)
}

pub fn image_request(prompt: &str, settings: &GenerationSettings) -> Value {
    json!({
        "contents": [ Content::text(None, prompt) ],
        "generationConfig": {
            "imageConfig": {
                "aspectRatio": settings.aspect_ratio.as_str(),
                "imageSize": settings.image_size.as_str()
            }
        }
    })
}

pub fn video_request(prompt: &str, image: Option<&ImageInput>, aspect_ratio: AspectRatio) -> Value {
    let mut instance = json!({ "prompt": prompt });
    if let Some(image) = image {
        instance["image"] = json!({
            "bytesBase64Encoded": encode_bytes_to_text(&image.bytes),
            "mimeType": image.mime_type
        });
    }
    json!({
        "instances": [ instance ],
        "parameters": {
            "aspectRatio": aspect_ratio.as_str(),
            "resolution": VIDEO_RESOLUTION
        }
    })
}

pub fn transcribe_request(audio: &[u8], mime_type: &str) -> Value {
    json!({
        "contents": [ {
            "parts": [
                Part::inline(mime_type, encode_bytes_to_text(audio)),
                Part::text(TRANSCRIBE_PROMPT)
            ]
        } ]
    })
}

pub fn speech_request(text: &str, voice_name: &str) -> Value {
    json!({
        "contents": [ Content::text(None, format!("Say this clearly: {text}")) ],
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice_name } }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Response readers
// ---------------------------------------------------------------------------

/// Answer text, thought summary and grounding sources of a chat response.
pub fn chat_reply(response: &GenerateContentResponse) -> ChatReply {
    let parts = response.first_parts();

    let text: String = parts
        .iter()
        .filter(|p| !p.is_thought())
        .filter_map(|p| p.text.as_deref())
        .collect();

    let thinking: String = parts
        .iter()
        .filter(|p| p.is_thought())
        .filter_map(|p| p.text.as_deref())
        .collect();

    let sources = response
        .candidates
        .first()
        .and_then(|c| c.grounding_metadata.as_ref())
        .map(|g| {
            g.grounding_chunks
                .iter()
                .map(|chunk| {
                    let src = chunk.web.as_ref().or(chunk.maps.as_ref());
                    Source {
                        title: src
                            .and_then(|s| s.title.clone())
                            .unwrap_or_else(|| "Source".into()),
                        uri: src.and_then(|s| s.uri.clone()).unwrap_or_else(|| "#".into()),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    ChatReply {
        text,
        thinking: (!thinking.is_empty()).then_some(thinking),
        sources,
    }
}

/// The last inline-data part of the first candidate.
fn last_inline(response: &GenerateContentResponse) -> Option<&super::wire::InlineData> {
    response
        .first_parts()
        .iter()
        .filter_map(|p| p.inline_data.as_ref())
        .last()
}

fn first_inline(response: &GenerateContentResponse) -> Option<&super::wire::InlineData> {
    response
        .first_parts()
        .first()
        .and_then(|p| p.inline_data.as_ref())
}

/// Pull the vendor's `error.message` out of an error body, or fall back to
/// the raw body.
fn api_error(status: reqwest::StatusCode, body: &str) -> ServiceError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    ServiceError::Api {
        status: status.as_u16(),
        message,
    }
}

// ---------------------------------------------------------------------------
// GeminiClient
// ---------------------------------------------------------------------------

pub struct GeminiClient {
    client: reqwest::Client,
    config: ServiceConfig,
}

impl GeminiClient {
    /// Build a client from application config.
    ///
    /// The HTTP client carries the per-request timeout from
    /// `config.timeout_secs`.  A default client is the fallback if the
    /// builder fails.
    pub fn from_config(config: &ServiceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
        }
    }

    fn api_key(&self) -> Result<&str, ServiceError> {
        match self.config.api_key.as_deref() {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(ServiceError::MissingApiKey),
        }
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{model}:{method}", self.config.base_url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(api_error(status, &body))
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: &Value,
    ) -> Result<T, ServiceError> {
        let key = self.api_key()?;
        log::debug!("service: POST {url}");
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", key)
            .json(body)
            .send()
            .await?;
        let response = Self::check(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))
    }

    async fn generate_content(
        &self,
        model: &str,
        body: &Value,
    ) -> Result<GenerateContentResponse, ServiceError> {
        self.post(&self.model_url(model, "generateContent"), body).await
    }

    async fn poll_operation(&self, name: &str) -> Result<Operation, ServiceError> {
        let key = self.api_key()?;
        let url = format!("{}/{name}", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", key)
            .send()
            .await?;
        Self::check(response)
            .await?
            .json::<Operation>()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))
    }
}

#[async_trait]
impl ModelService for GeminiClient {
    async fn chat(
        &self,
        history: &[ChatMessage],
        message: &str,
        settings: &GenerationSettings,
    ) -> Result<ChatReply, ServiceError> {
        let (model, body) = chat_request(&self.config, history, message, settings);
        log::info!("service: chat with {model} ({} prior message(s))", history.len());
        let response = self.generate_content(&model, &body).await?;
        Ok(chat_reply(&response))
    }

    async fn generate_image(
        &self,
        prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<GeneratedImage, ServiceError> {
        let body = image_request(prompt, settings);
        let response = self
            .generate_content(&self.config.image_model, &body)
            .await?;
        let inline = last_inline(&response).ok_or(ServiceError::Empty("image"))?;
        Ok(GeneratedImage {
            mime_type: if inline.mime_type.is_empty() {
                "image/png".into()
            } else {
                inline.mime_type.clone()
            },
            bytes: decode_text_to_bytes(&inline.data)?,
        })
    }

    async fn generate_video(
        &self,
        prompt: &str,
        image: Option<&ImageInput>,
        aspect_ratio: AspectRatio,
    ) -> Result<Vec<u8>, ServiceError> {
        let body = video_request(prompt, image, aspect_ratio);
        let url = self.model_url(&self.config.video_model, "predictLongRunning");
        let mut operation: Operation = self.post(&url, &body).await?;
        log::info!("service: video operation {} started", operation.name);

        let interval = Duration::from_secs(self.config.video_poll_secs);
        while !operation.done {
            tokio::time::sleep(interval).await;
            operation = self.poll_operation(&operation.name).await?;
            log::debug!("service: polled {} (done = {})", operation.name, operation.done);
        }

        if let Some(err) = &operation.error {
            return Err(ServiceError::Operation(format!("{} ({})", err.message, err.code)));
        }
        let uri = operation.video_uri().ok_or(ServiceError::Empty("video"))?;

        let response = self
            .client
            .get(uri)
            .query(&[("key", self.api_key()?)])
            .send()
            .await?;
        let bytes = Self::check(response).await?.bytes().await?;
        log::info!("service: downloaded video ({} bytes)", bytes.len());
        Ok(bytes.to_vec())
    }

    async fn transcribe_audio(
        &self,
        audio: &[u8],
        mime_type: &str,
    ) -> Result<String, ServiceError> {
        let body = transcribe_request(audio, mime_type);
        let response = self
            .generate_content(&self.config.transcribe_model, &body)
            .await?;
        Ok(chat_reply(&response).text)
    }

    async fn generate_speech(&self, text: &str) -> Result<Vec<u8>, ServiceError> {
        let body = speech_request(text, &self.config.tts_voice);
        let response = self.generate_content(&self.config.tts_model, &body).await?;
        let inline = first_inline(&response).ok_or(ServiceError::Empty("audio"))?;
        Ok(decode_text_to_bytes(&inline.data)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ImageSize;

    fn settings() -> GenerationSettings {
        GenerationSettings::default()
    }

    #[test]
    fn chat_uses_pro_model_and_maps_roles() {
        let config = ServiceConfig::default();
        let history = vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
            ChatMessage {
                role: crate::service::Role::System,
                content: "Error communicating with AI.".into(),
            },
        ];
        let (model, body) = chat_request(&config, &history, "build a game", &settings());

        assert_eq!(model, config.chat_model);
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3, "system notices are not sent");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(contents[2]["parts"][0]["text"], "build a game");
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn thinking_budget_only_without_maps() {
        let config = ServiceConfig::default();
        let mut s = settings();
        s.thinking_mode = true;

        let (_, body) = chat_request(&config, &[], "x", &s);
        assert_eq!(
            body["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            THINKING_BUDGET
        );

        s.use_maps = true;
        let (model, body) = chat_request(&config, &[], "x", &s);
        assert_eq!(model, config.maps_model);
        assert!(body.get("generationConfig").is_none());
        assert_eq!(body["tools"][0], json!({ "googleMaps": {} }));
        assert_eq!(
            body["toolConfig"]["retrievalConfig"]["latLng"]["latitude"],
            MAPS_LAT_LNG.0
        );
    }

    #[test]
    fn search_and_maps_tools_stack() {
        let mut s = settings();
        s.use_search = true;
        s.use_maps = true;
        let (_, body) = chat_request(&ServiceConfig::default(), &[], "x", &s);
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0], json!({ "googleSearch": {} }));
    }

    #[test]
    fn image_request_carries_image_config() {
        let s = GenerationSettings {
            aspect_ratio: AspectRatio::Portrait9x16,
            image_size: ImageSize::FourK,
            ..settings()
        };
        let body = image_request("a castle", &s);
        assert_eq!(body["generationConfig"]["imageConfig"]["aspectRatio"], "9:16");
        assert_eq!(body["generationConfig"]["imageConfig"]["imageSize"], "4K");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "a castle");
    }

    #[test]
    fn video_request_with_reference_image() {
        let image = ImageInput {
            mime_type: "image/png".into(),
            bytes: b"hello".to_vec(),
        };
        let body = video_request("waves", Some(&image), AspectRatio::Landscape16x9);
        assert_eq!(body["instances"][0]["prompt"], "waves");
        assert_eq!(body["instances"][0]["image"]["bytesBase64Encoded"], "aGVsbG8=");
        assert_eq!(body["parameters"]["aspectRatio"], "16:9");
        assert_eq!(body["parameters"]["resolution"], "1080p");

        let body = video_request("waves", None, AspectRatio::Portrait9x16);
        assert!(body["instances"][0].get("image").is_none());
    }

    #[test]
    fn transcribe_and_speech_prompts() {
        let body = transcribe_request(b"hello", "audio/webm");
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], "audio/webm");
        assert_eq!(parts[0]["inlineData"]["data"], "aGVsbG8=");
        assert_eq!(parts[1]["text"], TRANSCRIBE_PROMPT);

        let body = speech_request("hi there", "Kore");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Say this clearly: hi there");
        assert_eq!(
            body["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
    }

    #[test]
    fn chat_reply_splits_thoughts_and_sources() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [
                    { "text": "planning...", "thought": true },
                    { "text": "Here is " },
                    { "text": "your site." }
                ]},
                "groundingMetadata": { "groundingChunks": [
                    { "web": { "title": "Docs", "uri": "https://docs.test" } },
                    { "maps": { "uri": "https://maps.test/x" } },
                    {}
                ]}
            }]
        }))
        .unwrap();

        let reply = chat_reply(&response);
        assert_eq!(reply.text, "Here is your site.");
        assert_eq!(reply.thinking.as_deref(), Some("planning..."));
        assert_eq!(
            reply.sources,
            vec![
                Source { title: "Docs".into(), uri: "https://docs.test".into() },
                Source { title: "Source".into(), uri: "https://maps.test/x".into() },
                Source { title: "Source".into(), uri: "#".into() },
            ]
        );
    }

    #[test]
    fn empty_response_gives_empty_reply() {
        let reply = chat_reply(&GenerateContentResponse::default());
        assert_eq!(reply, ChatReply::default());
    }

    #[test]
    fn last_inline_part_wins_for_images() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [
                { "text": "Here you go" },
                { "inlineData": { "mimeType": "image/png", "data": "AAAA" } },
                { "inlineData": { "mimeType": "image/jpeg", "data": "AQID" } }
            ]}}]
        }))
        .unwrap();
        assert_eq!(last_inline(&response).unwrap().mime_type, "image/jpeg");
        assert!(first_inline(&response).is_none());
    }

    #[test]
    fn api_error_prefers_vendor_message() {
        let err = api_error(
            reqwest::StatusCode::FORBIDDEN,
            r#"{"error":{"code":403,"message":"API key not valid"}}"#,
        );
        assert_eq!(err.to_string(), "API returned 403: API key not valid");

        let err = api_error(reqwest::StatusCode::BAD_GATEWAY, "upstream down\n");
        assert_eq!(err.to_string(), "API returned 502: upstream down");
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let client = GeminiClient::from_config(&ServiceConfig::default());
        let err = client.generate_speech("hi").await.unwrap_err();
        assert!(matches!(err, ServiceError::MissingApiKey));
    }
}
