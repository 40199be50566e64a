//! Image captioning through an Azure OpenAI chat-completions deployment.
//!
//! The image travels as an `image_url` content part, either as a URL the
//! service can fetch itself or as an inline `data:` URI.

use crate::config::OpenAiSettings;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SYSTEM_PROMPT: &str = "You are a helpful assistant.";
const CAPTION_PROMPT: &str = "Generate a concise, human-friendly caption.";
const MAX_TOKENS: u32 = 8192;
const TEMPERATURE: f32 = 0.7;
const TOP_P: f32 = 0.95;

#[derive(Debug, Error)]
pub enum CaptionError {
    #[error("captioning request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("captioning service returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("captioning service returned no caption")]
    EmptyResponse,
}

/// Where the model should read the image from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageSource {
    /// Publicly resolvable address of the image.
    Url(String),
    /// Raw bytes sent inline as base64.
    Inline { mime_type: String, data: Bytes },
}

impl ImageSource {
    pub fn inline(mime_type: &str, data: Bytes) -> Self {
        Self::Inline {
            mime_type: mime_type.to_string(),
            data,
        }
    }

    /// Value for the `image_url.url` field.
    pub fn to_url(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Inline { mime_type, data } => format!(
                "data:{};base64,{}",
                mime_type,
                general_purpose::STANDARD.encode(data)
            ),
        }
    }
}

/// Produces a caption for one image.
#[async_trait]
pub trait Captioner: Send + Sync {
    async fn describe(&self, image: &ImageSource) -> Result<String, CaptionError>;
}

pub struct AzureOpenAiCaptioner {
    client: reqwest::Client,
    url: String,
    api_key: String,
    deployment: String,
}

impl AzureOpenAiCaptioner {
    pub fn new(settings: &OpenAiSettings) -> Result<Self, CaptionError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            settings.endpoint.trim_end_matches('/'),
            settings.deployment,
            settings.api_version
        );

        Ok(Self {
            client,
            url,
            api_key: settings.api_key.expose().to_string(),
            deployment: settings.deployment.clone(),
        })
    }
}

// --- Request types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

// --- Response types ---

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

fn caption_request<'a>(deployment: &'a str, image: &ImageSource) -> ChatRequest<'a> {
    ChatRequest {
        model: deployment,
        messages: vec![
            ChatMessage {
                role: "system",
                content: MessageContent::Text(SYSTEM_PROMPT.to_string()),
            },
            ChatMessage {
                role: "user",
                content: MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: CAPTION_PROMPT.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image.to_url(),
                        },
                    },
                ]),
            },
        ],
        max_tokens: MAX_TOKENS,
        temperature: TEMPERATURE,
        top_p: TOP_P,
        frequency_penalty: 0.0,
        presence_penalty: 0.0,
    }
}

#[async_trait]
impl Captioner for AzureOpenAiCaptioner {
    async fn describe(&self, image: &ImageSource) -> Result<String, CaptionError> {
        let body = caption_request(&self.deployment, image);

        let resp = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CaptionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = resp.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .ok_or(CaptionError::EmptyResponse)
    }
}
