use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::agent::tools::ToolDefinition;
use crate::config::AppConfig;
use crate::errors::Error;

pub const TEMPERATURE: f32 = 0.2;
pub const MAX_TOKENS: u32 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of the chat-completions `messages` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    /// Null on assistant turns that only carry tool calls.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_calls,
            tool_call_id: None,
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, exactly as the model produced it
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: String,
    choices: Vec<CompletionChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub message: ChatMessage,
    pub usage: Option<TokenUsage>,
    /// Model name reported by the service, used for pricing
    pub model: String,
}

#[derive(ThisError, Debug)]
pub enum LlmError {
    #[error("chat completion request timed out")]
    Timeout(#[source] reqwest::Error),

    #[error("could not reach the chat completion endpoint")]
    Connection(#[source] reqwest::Error),

    #[error("chat completion request rejected ({status}): {body}")]
    InvalidRequest { status: StatusCode, body: String },

    #[error("chat completion API error ({status}): {body}")]
    Api { status: StatusCode, body: String },

    #[error("malformed chat completion response: {0}")]
    Decode(String),

    #[error("chat completion transport error")]
    Transport(#[source] reqwest::Error),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout(e)
        } else if e.is_connect() {
            LlmError::Connection(e)
        } else if e.is_decode() {
            LlmError::Decode(e.to_string())
        } else {
            LlmError::Transport(e)
        }
    }
}

/// A chat-completion backend the agent can drive.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Deployment or model name, for logs.
    fn name(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        response_format: Option<&serde_json::Value>,
    ) -> Result<LlmResponse, LlmError>;
}

/// Azure OpenAI chat-completions client bound to one deployment.
pub struct LlmClient {
    client: Client,
    url: Url,
    api_key: String,
    api_version: String,
    deployment: String,
}

impl LlmClient {
    pub fn new(config: &AppConfig) -> Result<Self, Error> {
        if config.deployment_name.trim().is_empty() {
            tracing::error!("Missing environment variable: GPT35_DEPLOYMENT_NAME");
            return Err(Error::Environment {
                message: "Required environment variable GPT35_DEPLOYMENT_NAME is not set.".to_string(),
            });
        }

        let init_failed = |e: anyhow::Error| {
            tracing::error!("An error occurred while initializing the chat model client: {}", e);
            Error::runtime("Failed to initialize the chat model client.", e)
        };

        let url = Url::parse(&format!(
            "{}/openai/deployments/{}/chat/completions",
            config.openai_endpoint, config.deployment_name
        ))
        .map_err(|e| init_failed(e.into()))?;

        let client = Client::builder()
            .timeout(config.llm_request_timeout)
            .build()
            .map_err(|e| init_failed(e.into()))?;

        Ok(Self {
            client,
            url,
            api_key: config.openai_api_key.clone(),
            api_version: config.api_version.clone(),
            deployment: config.deployment_name.clone(),
        })
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    fn name(&self) -> &str {
        &self.deployment
    }

    /// Send a conversation to the deployment and get the assistant's reply.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        response_format: Option<&serde_json::Value>,
    ) -> Result<LlmResponse, LlmError> {
        let mut body = serde_json::json!({
            "messages": messages,
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
        });
        if !tools.is_empty() {
            body["tools"] = tools.iter().map(ToolDefinition::to_openai).collect();
        }
        if let Some(format) = response_format {
            body["response_format"] = format.clone();
        }

        let resp = self
            .client
            .post(self.url.clone())
            .query(&[("api-version", self.api_version.as_str())])
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let err_body = resp.text().await.unwrap_or_default();
            return Err(if status == StatusCode::BAD_REQUEST {
                LlmError::InvalidRequest { status, body: err_body }
            } else {
                LlmError::Api { status, body: err_body }
            });
        }

        let completion: CompletionResponse = resp.json().await?;

        let message = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| LlmError::Decode("response contained no choices".to_string()))?;

        Ok(LlmResponse {
            message,
            usage: completion.usage,
            model: completion.model,
        })
    }
}
