use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::agent::models::AgentInvocationResult;
use crate::ai::usage::UsageStats;
use crate::errors::Error;

pub const FINAL_ANSWER_NOT_FOUND: &str = "Final Answer not found.";
pub const SQL_NOT_FOUND: &str = "SQL statement not found.";

/// The structured reply for one request. Text fields carry their display
/// label; the `*Int`/`*Float` fields carry the raw numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlResponse {
    #[serde(rename = "Prompt")]
    pub prompt: String,
    #[serde(rename = "FinalAnswer")]
    pub final_answer: String,
    #[serde(rename = "SqlStatement")]
    pub sql_statement: String,
    #[serde(rename = "PromptTokens")]
    pub prompt_tokens: String,
    #[serde(rename = "CompletionTokens")]
    pub completion_tokens: String,
    #[serde(rename = "TotalTokens")]
    pub total_tokens: String,
    #[serde(rename = "TotalCost")]
    pub total_cost: String,
    #[serde(rename = "Explanation")]
    pub explanation: String,
    #[serde(rename = "PromptTokensInt")]
    pub prompt_tokens_int: u64,
    #[serde(rename = "CompletionTokensInt")]
    pub completion_tokens_int: u64,
    #[serde(rename = "TotalCostFloat")]
    pub total_cost_float: f64,
}

/// The three pieces recovered from an agent answer, unlabeled.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedAnswer {
    pub final_answer: String,
    pub sql_statement: String,
    pub explanation: String,
}

static FINAL_ANSWER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)Final Answer:(.*?)(?:\n\n|\z)").unwrap());
static SQL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)SELECT.*?(?:Explanation:|\z)").unwrap());

/// Heuristic split of free agent text. Never fails: missing pieces become
/// placeholders.
pub fn extract_from_text(output: &str) -> ExtractedAnswer {
    let final_answer = FINAL_ANSWER_RE
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| FINAL_ANSWER_NOT_FOUND.to_string());

    // Drop every answer segment, leaving its terminating blank line in place.
    let mut explanation = String::with_capacity(output.len());
    let mut last = 0;
    for caps in FINAL_ANSWER_RE.captures_iter(output) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        explanation.push_str(&output[last..whole.start()]);
        last = body.end();
    }
    explanation.push_str(&output[last..]);

    let sql_statement = SQL_RE
        .find(output)
        .map(|m| m.as_str().trim_end_matches("Explanation:").trim().to_string())
        .unwrap_or_else(|| SQL_NOT_FOUND.to_string());

    ExtractedAnswer {
        final_answer,
        sql_statement,
        explanation: explanation.trim().to_string(),
    }
}

/// Pull the answer out of an agent result. A structured answer wins when
/// all of its fields are filled; otherwise the text heuristics run on
/// `output`.
pub fn extract_answer(result: &AgentInvocationResult) -> Result<ExtractedAnswer, Error> {
    if let Some(structured) = &result.structured {
        let answer = ExtractedAnswer {
            final_answer: structured.final_answer.trim().to_string(),
            sql_statement: structured.sql_statement.trim().to_string(),
            explanation: structured.explanation.trim().to_string(),
        };
        if !answer.final_answer.is_empty() && !answer.sql_statement.is_empty() {
            return Ok(answer);
        }
        tracing::warn!("Structured answer is incomplete, parsing output text instead");
    }

    let output = result.output_text().map_err(|e| {
        tracing::error!("An error occurred: {}", e);
        e
    })?;
    Ok(extract_from_text(output))
}

/// Build the response record for `prompt` from an agent result and its usage.
pub fn build_response(
    prompt: &str,
    result: &AgentInvocationResult,
    usage: &UsageStats,
) -> Result<SqlResponse, Error> {
    let answer = extract_answer(result)?;

    tracing::info!("Total Tokens: {}", usage.total_tokens);
    tracing::info!("Prompt Tokens: {}", usage.prompt_tokens);
    tracing::info!("Completion Tokens: {}", usage.completion_tokens);
    tracing::info!("Total Cost (USD): {}", usage.total_cost);
    tracing::debug!("Final Answer: {}", answer.final_answer);
    tracing::debug!("SQL Statement: {}", answer.sql_statement);

    Ok(SqlResponse {
        prompt: format!("User Prompt: {}", prompt),
        final_answer: format!("Final Answer: {}", answer.final_answer),
        sql_statement: format!("SQL Statement: {}", answer.sql_statement),
        prompt_tokens: format!("Prompt Tokens: {}", usage.prompt_tokens),
        completion_tokens: format!("Completion Tokens: {}", usage.completion_tokens),
        total_tokens: format!("Total Tokens: {}", usage.total_tokens),
        total_cost: format!("Total Cost (USD): {}", usage.total_cost),
        explanation: format!("Explanation: {}", answer.explanation),
        prompt_tokens_int: usage.prompt_tokens,
        completion_tokens_int: usage.completion_tokens,
        total_cost_float: usage.total_cost,
    })
}
