//! Anthropic Messages API 客户端，实现三个 oracle 接口

use super::parse::{parse_match_response, parse_receipt_response, parse_tag_response};
use super::prompts::{build_match_prompt, RECEIPT_PROMPT, TAG_PROMPT};
use super::{MatchOracle, OracleError, ReceiptReader, TagExtractor};
use crate::config::OracleConfig;
use crate::models::{LineItemCandidate, NewReceiptItem, ProposedMatch, TagCandidate, TagFields};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentBlock {
    Image { source: ImageSource },
    Text { text: String },
}

#[derive(Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'static str,
    data: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// 根据文件头判断图片类型，默认 JPEG
fn media_type_of(photo: &[u8]) -> &'static str {
    if photo.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if photo.len() > 12 && &photo[0..4] == b"RIFF" && &photo[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

fn image_block(photo: &[u8]) -> ContentBlock {
    ContentBlock::Image {
        source: ImageSource {
            kind: "base64",
            media_type: media_type_of(photo),
            data: STANDARD.encode(photo),
        },
    }
}

pub struct AnthropicClient {
    http: reqwest::Client,
    config: OracleConfig,
}

impl AnthropicClient {
    pub fn new(config: OracleConfig) -> Result<Self, OracleError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OracleError::Unavailable(format!("http client: {}", e)))?;
        Ok(Self { http, config })
    }

    /// 发送一次请求，返回所有 text 块拼接后的文本
    async fn complete(&self, content: Vec<ContentBlock>, max_tokens: u32) -> Result<String, OracleError> {
        if self.config.api_key.is_empty() {
            return Err(OracleError::Unavailable("ANTHROPIC_API_KEY is not set".to_string()));
        }

        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens,
            messages: vec![Message {
                role: "user",
                content,
            }],
        };

        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let start = std::time::Instant::now();
        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;
        tracing::debug!("oracle call finished, status {}, 耗时: {:?}", status, start.elapsed());

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {}", status));
            return Err(OracleError::Unavailable(message));
        }

        let parsed: MessagesResponse = serde_json::from_str(&body)
            .map_err(|e| OracleError::Unavailable(format!("unexpected envelope: {}", e)))?;

        Ok(parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[async_trait]
impl TagExtractor for AnthropicClient {
    async fn extract(&self, photo: &[u8]) -> Result<TagFields, OracleError> {
        let content = vec![
            image_block(photo),
            ContentBlock::Text {
                text: TAG_PROMPT.to_string(),
            },
        ];
        let text = self.complete(content, self.config.tag_max_tokens).await?;
        parse_tag_response(&text)
    }
}

#[async_trait]
impl ReceiptReader for AnthropicClient {
    async fn read_receipt(&self, photo: &[u8]) -> Result<Vec<NewReceiptItem>, OracleError> {
        let content = vec![
            image_block(photo),
            ContentBlock::Text {
                text: RECEIPT_PROMPT.to_string(),
            },
        ];
        let text = self.complete(content, self.config.receipt_max_tokens).await?;
        parse_receipt_response(&text)
    }
}

#[async_trait]
impl MatchOracle for AnthropicClient {
    async fn propose_matches(
        &self,
        items: &[LineItemCandidate],
        tags: &[TagCandidate],
    ) -> Result<Vec<ProposedMatch>, OracleError> {
        let prompt = build_match_prompt(items, tags)
            .map_err(|e| OracleError::Parse(format!("serialize match input: {}", e)))?;
        let text = self
            .complete(vec![ContentBlock::Text { text: prompt }], self.config.match_max_tokens)
            .await?;
        parse_match_response(&text)
    }
}
