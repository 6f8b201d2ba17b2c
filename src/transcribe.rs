use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

const CHAT_API_BASE: &str = "https://api.openai.com/";
const DOCUMENT_API_BASE: &str = "https://vision.googleapis.com/";

const MAX_COMPLETION_TOKENS: u32 = 4000;
const TEMPERATURE: f64 = 0.1;

const SYSTEM_PROMPT: &str = "You are an expert at transcribing Spanish handwritten poetry. \
Extract the text from the image and return ONLY the transcribed text, with no additional commentary.\n\n\
Rules:\n\
- Preserve the original formatting, line breaks, and structure of the poem\n\
- Use Spanish characters properly (á, é, í, ó, ú, ñ, Á, É, Í, Ó, Ú, Ñ)\n\
- If you are uncertain about a word, make your best guess based on context\n\
- Do not add any intro, outro, or explanation\n\
- Return ONLY the poem text";

const USER_PROMPT: &str =
    "Transcribe this Spanish handwritten poem. Return only the text, preserving the original formatting.";

/// A transcription result is usable when it contains anything beyond
/// whitespace. This single predicate decides when the fallback provider runs.
pub fn usable(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, image: &[u8]) -> Result<String>;
}

/// Primary provider: an OpenAI-style chat completion with the photo inlined
/// as a base64 JPEG data URL.
pub struct ChatVisionClient {
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
}

impl ChatVisionClient {
    pub fn new(api_key: String, model: String) -> Self {
        let base_url = Url::parse(CHAT_API_BASE).expect("valid default chat API URL");
        Self::with_base_url(api_key, model, base_url)
    }

    pub fn with_base_url(api_key: String, model: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("tg-poembot/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key,
            model,
        }
    }
}

pub fn build_chat_request(model: &str, image: &[u8]) -> Value {
    let data_url = format!("data:image/jpeg;base64,{}", STANDARD.encode(image));
    json!({
        "model": model,
        "messages": [
            {
                "role": "system",
                "content": SYSTEM_PROMPT,
            },
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": USER_PROMPT },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }
        ],
        "max_tokens": MAX_COMPLETION_TOKENS,
        "temperature": TEMPERATURE,
    })
}

#[async_trait]
impl Transcriber for ChatVisionClient {
    async fn transcribe(&self, image: &[u8]) -> Result<String> {
        let endpoint = self
            .base_url
            .join("v1/chat/completions")
            .context("invalid chat API base URL")?;
        let body = build_chat_request(&self.model, image);
        let res = self
            .http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("failed to reach chat vision API")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            bail!("chat vision error {}: {}", status, body);
        }
        let payload: ChatCompletionResponse = res
            .json()
            .await
            .context("invalid chat vision response JSON")?;
        Ok(payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

/// Fallback provider: document text detection with explicit language hints.
pub struct DocumentTextClient {
    http: Client,
    base_url: Url,
    access_token: String,
    language_hints: Vec<String>,
}

impl DocumentTextClient {
    pub fn new(access_token: String, language_hints: Vec<String>) -> Self {
        let base_url = Url::parse(DOCUMENT_API_BASE).expect("valid default vision API URL");
        Self::with_base_url(access_token, language_hints, base_url)
    }

    pub fn with_base_url(access_token: String, language_hints: Vec<String>, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("tg-poembot/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            access_token,
            language_hints,
        }
    }
}

pub fn build_annotate_request(image: &[u8], language_hints: &[String]) -> Value {
    json!({
        "requests": [{
            "image": { "content": STANDARD.encode(image) },
            "features": [{ "type": "DOCUMENT_TEXT_DETECTION" }],
            "imageContext": { "languageHints": language_hints },
        }]
    })
}

#[async_trait]
impl Transcriber for DocumentTextClient {
    async fn transcribe(&self, image: &[u8]) -> Result<String> {
        let endpoint = self
            .base_url
            .join("v1/images:annotate")
            .context("invalid vision API base URL")?;
        let body = build_annotate_request(image, &self.language_hints);
        let res = self
            .http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .json(&body)
            .send()
            .await
            .context("failed to reach document text API")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            bail!("document text error {}: {}", status, body);
        }
        let payload: AnnotateResponse = res
            .json()
            .await
            .context("invalid document text response JSON")?;
        let result = payload.responses.into_iter().next().unwrap_or_default();
        if let Some(full) = result.full_text_annotation {
            return Ok(full.text);
        }
        if !result.text_annotations.is_empty() {
            return Ok(result
                .text_annotations
                .into_iter()
                .map(|annotation| annotation.description)
                .collect::<Vec<_>>()
                .join("\n"));
        }
        Ok(String::new())
    }
}

/// Two-tier transcription: try the primary, fall back when it errors or
/// returns nothing usable, and fail with "extraction empty" when both tiers
/// come back blank.
pub struct TieredTranscriber {
    primary: Box<dyn Transcriber>,
    fallback: Box<dyn Transcriber>,
}

impl TieredTranscriber {
    pub fn new(
        primary: impl Transcriber + 'static,
        fallback: impl Transcriber + 'static,
    ) -> Self {
        Self {
            primary: Box::new(primary),
            fallback: Box::new(fallback),
        }
    }
}

#[async_trait]
impl Transcriber for TieredTranscriber {
    async fn transcribe(&self, image: &[u8]) -> Result<String> {
        match self.primary.transcribe(image).await {
            Ok(text) if usable(&text).is_some() => return Ok(text),
            Ok(_) => warn!("primary transcription returned no usable text; trying fallback"),
            Err(err) => warn!(?err, "primary transcription failed; trying fallback"),
        }
        let text = self
            .fallback
            .transcribe(image)
            .await
            .context("fallback transcription failed")?;
        if usable(&text).is_none() {
            return Err(anyhow!("extraction empty"));
        }
        Ok(text)
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct AnnotateResponse {
    responses: Vec<AnnotateResult>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AnnotateResult {
    full_text_annotation: Option<FullTextAnnotation>,
    #[serde(default)]
    text_annotations: Vec<EntityAnnotation>,
}

#[derive(Deserialize)]
struct FullTextAnnotation {
    text: String,
}

#[derive(Deserialize)]
struct EntityAnnotation {
    description: String,
}
