pub mod models;
pub mod prompt;
pub mod tools;

use std::sync::Arc;
use std::time::Duration;

use crate::ai::llm::{ChatMessage, ChatModel, LlmError};
use crate::ai::usage::UsageTracker;
use crate::config::AppConfig;
use crate::db::SqlDatabase;
use crate::errors::Error;
use models::{AgentAction, AgentInvocationResult, IntermediateStep, StructuredAnswer};
use tools::SqlToolkit;

pub const MAX_ITERATIONS_OUTPUT: &str = "Agent stopped due to max iterations.";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub top_k: usize,
    pub max_iterations: usize,
    /// Log each step at INFO
    pub verbose: bool,
    pub structured_output: bool,
    pub timeout: Option<Duration>,
}

impl AgentConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            top_k: config.agent_top_k,
            max_iterations: config.agent_max_iterations,
            verbose: config.show_query_execution_steps,
            structured_output: config.structured_output,
            timeout: config.agent_timeout,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            top_k: 30,
            max_iterations: 15,
            verbose: true,
            structured_output: false,
            timeout: None,
        }
    }
}

/// Tool-calling SQL agent bound to one database and one chat model.
pub struct SqlAgent {
    llm: Arc<dyn ChatModel>,
    usage: Arc<UsageTracker>,
    toolkit: SqlToolkit,
    config: AgentConfig,
}

impl SqlAgent {
    pub fn new(
        db: Arc<dyn SqlDatabase>,
        llm: Arc<dyn ChatModel>,
        usage: Arc<UsageTracker>,
        config: AgentConfig,
    ) -> Self {
        let toolkit = SqlToolkit::new(db, llm.clone(), usage.clone());
        Self {
            llm,
            usage,
            toolkit,
            config,
        }
    }

    /// Run the agent once on `input`. Failures are logged and wrapped by
    /// kind; there is no partial result.
    pub async fn invoke(&self, input: &str) -> Result<AgentInvocationResult, Error> {
        let run = self.run(input);
        let outcome = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::error!("Agent did not finish within {:?}", limit);
                    return Err(Error::Timeout {
                        message: "Timeout error occurred.".to_string(),
                        source: Some(anyhow::anyhow!("agent did not finish within {:?}", limit)),
                    });
                }
            },
            None => run.await,
        };

        let result = outcome.map_err(|e| {
            tracing::error!("Agent invocation failed: {}", e);
            classify(e)
        })?;

        if self.config.verbose {
            for (action, observation) in result.steps() {
                tracing::info!("Action: {} {}\nObservation: {}", action.tool, action.tool_input, observation);
            }
        }
        Ok(result)
    }

    async fn run(&self, input: &str) -> Result<AgentInvocationResult, LlmError> {
        let mut system = prompt::agent_prefix(self.toolkit.dialect(), self.config.top_k);
        if self.config.structured_output {
            system.push_str(prompt::STRUCTURED_ANSWER_INSTRUCTIONS);
        }
        let response_format = self
            .config
            .structured_output
            .then(StructuredAnswer::response_format);

        let mut messages = vec![
            ChatMessage::system(system),
            ChatMessage::user(input),
            ChatMessage::assistant(prompt::SQL_FUNCTIONS_SUFFIX),
        ];
        let mut steps = Vec::new();

        for iteration in 0..self.config.max_iterations {
            let reply = self
                .llm
                .complete(&messages, self.toolkit.definitions(), response_format.as_ref())
                .await?;
            self.usage.record(&reply.model, reply.usage.as_ref());
            let message = reply.message;

            // No tool calls means the model has answered.
            if message.tool_calls.is_empty() {
                let text = message.content.unwrap_or_default();
                let structured = if self.config.structured_output {
                    parse_structured(&text)
                } else {
                    None
                };
                let output = structured
                    .as_ref()
                    .map(StructuredAnswer::to_output_text)
                    .unwrap_or(text);

                tracing::debug!("Agent finished after {} iteration(s)", iteration + 1);
                return Ok(AgentInvocationResult {
                    input: input.to_string(),
                    output: Some(output),
                    intermediate_steps: steps,
                    structured,
                });
            }

            let calls = message.tool_calls.clone();
            messages.push(message);

            for call in &calls {
                let observation = self.toolkit.call(call).await?;
                let action = AgentAction {
                    tool: call.function.name.clone(),
                    tool_input: tools::parse_arguments(&call.function.arguments)
                        .map(serde_json::Value::Object)
                        .unwrap_or_else(|_| serde_json::Value::String(call.function.arguments.clone())),
                    tool_call_id: call.id.clone(),
                    log: format!("\nInvoking: `{}` with `{}`\n", call.function.name, call.function.arguments),
                };
                if !self.config.verbose {
                    tracing::debug!("Action: {}\nObservation: {}", action.tool, observation);
                }

                messages.push(ChatMessage::tool_result(call.id.clone(), observation.clone()));
                steps.push(IntermediateStep::new(action, observation));
            }
        }

        tracing::warn!("Agent hit the limit of {} iterations", self.config.max_iterations);
        Ok(AgentInvocationResult {
            input: input.to_string(),
            output: Some(MAX_ITERATIONS_OUTPUT.to_string()),
            intermediate_steps: steps,
            structured: None,
        })
    }
}

/// Map a model failure onto the caller-facing taxonomy.
fn classify(e: LlmError) -> Error {
    match &e {
        LlmError::Connection(_) => Error::connection("Connection error occurred.", e),
        LlmError::Timeout(_) => Error::Timeout {
            message: "Timeout error occurred.".to_string(),
            source: Some(e.into()),
        },
        LlmError::InvalidRequest { .. } => Error::Value {
            message: format!("Value error occurred: {}", e),
        },
        _ => Error::runtime("An unexpected error occurred.", e),
    }
}

/// Accept the JSON object bare or inside a ```json fence.
fn parse_structured(text: &str) -> Option<StructuredAnswer> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.strip_suffix("```").unwrap_or(s))
        .unwrap_or(trimmed);

    match serde_json::from_str::<StructuredAnswer>(inner.trim()) {
        Ok(answer) => Some(answer),
        Err(e) => {
            tracing::warn!("Structured answer did not parse, falling back to text: {}", e);
            None
        }
    }
}
