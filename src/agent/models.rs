use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// A tool invocation chosen by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    pub tool: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    #[serde(default)]
    pub tool_call_id: String,
    #[serde(default)]
    pub log: String,
}

/// One `(action, observation)` pair of the agent's scratchpad. Recorded
/// results come in either a two-element array or a named record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntermediateStep {
    Pair(AgentAction, String),
    Record {
        action: AgentAction,
        #[serde(default)]
        observation: String,
    },
    /// Any other shape; kept so a result still loads, skipped when listed.
    Unrecognized(serde_json::Value),
}

impl IntermediateStep {
    pub fn new(action: AgentAction, observation: String) -> Self {
        IntermediateStep::Pair(action, observation)
    }

    pub fn parts(&self) -> Option<(&AgentAction, &str)> {
        match self {
            IntermediateStep::Pair(action, observation) => Some((action, observation.as_str())),
            IntermediateStep::Record { action, observation } => Some((action, observation.as_str())),
            IntermediateStep::Unrecognized(_) => None,
        }
    }
}

/// Schema-constrained final answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredAnswer {
    pub final_answer: String,
    pub sql_statement: String,
    pub explanation: String,
}

impl StructuredAnswer {
    /// JSON-schema `response_format` requesting this shape.
    pub fn response_format() -> serde_json::Value {
        serde_json::json!({
            "type": "json_schema",
            "json_schema": {
                "name": "sql_answer",
                "strict": true,
                "schema": {
                    "type": "object",
                    "properties": {
                        "final_answer": { "type": "string" },
                        "sql_statement": { "type": "string" },
                        "explanation": { "type": "string" }
                    },
                    "required": ["final_answer", "sql_statement", "explanation"],
                    "additionalProperties": false
                }
            }
        })
    }

    /// Same content laid out the way the free-text agent writes it.
    pub fn to_output_text(&self) -> String {
        format!(
            "Final Answer: {}\n\nExplanation:\n{}\n\n```sql\n{}\n```",
            self.final_answer.trim(),
            self.explanation.trim(),
            self.sql_statement.trim()
        )
    }
}

/// What one agent run produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentInvocationResult {
    pub input: String,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub intermediate_steps: Vec<IntermediateStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<StructuredAnswer>,
}

impl AgentInvocationResult {
    pub fn output_text(&self) -> Result<&str, Error> {
        self.output.as_deref().ok_or_else(|| Error::Runtime {
            message: "An error occurred while extracting the SQL statement.".to_string(),
            source: Some(anyhow::anyhow!("agent result has no 'output'")),
        })
    }

    /// Well-formed steps in order. Anything else is logged and skipped.
    pub fn steps(&self) -> impl Iterator<Item = (&AgentAction, &str)> {
        self.intermediate_steps.iter().filter_map(|step| {
            let parts = step.parts();
            if parts.is_none() {
                tracing::warn!("Unexpected step type: {:?}", step);
            }
            parts
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_accept_pairs_and_records() {
        let raw = serde_json::json!({
            "input": "how many users?",
            "output": "Final Answer: 3",
            "intermediate_steps": [
                [{ "tool": "sql_db_list_tables", "tool_input": {} }, "users"],
                { "action": { "tool": "sql_db_query", "tool_input": { "query": "SELECT COUNT(*) FROM users" } },
                  "observation": "[(3,)]" },
                "garbage"
            ]
        });
        let result: AgentInvocationResult = serde_json::from_value(raw).unwrap();

        assert_eq!(result.intermediate_steps.len(), 3);
        let steps: Vec<(&str, &str)> = result.steps().map(|(a, o)| (a.tool.as_str(), o)).collect();
        assert_eq!(
            steps,
            vec![("sql_db_list_tables", "users"), ("sql_db_query", "[(3,)]")]
        );
    }

    #[test]
    fn missing_output_is_a_runtime_error() {
        let result: AgentInvocationResult =
            serde_json::from_value(serde_json::json!({ "input": "x" })).unwrap();
        assert!(matches!(result.output_text(), Err(Error::Runtime { .. })));
    }

    #[test]
    fn structured_answer_renders_in_free_text_layout() {
        let answer = StructuredAnswer {
            final_answer: "42 users signed up.".to_string(),
            sql_statement: "SELECT COUNT(*) FROM users".to_string(),
            explanation: "Counted rows.".to_string(),
        };
        assert_eq!(
            answer.to_output_text(),
            "Final Answer: 42 users signed up.\n\nExplanation:\nCounted rows.\n\n```sql\nSELECT COUNT(*) FROM users\n```"
        );
    }
}
