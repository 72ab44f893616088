use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::prompt;
use crate::ai::llm::{ChatMessage, ChatModel, LlmError, ToolCall};
use crate::ai::usage::UsageTracker;
use crate::db::SqlDatabase;

pub const QUERY_SQL_DATABASE: &str = "sql_db_query";
pub const INFO_SQL_DATABASE: &str = "sql_db_schema";
pub const LIST_SQL_DATABASE: &str = "sql_db_list_tables";
pub const QUERY_CHECKER: &str = "sql_db_query_checker";

/// Defines a tool that the LLM can invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Wire shape of the chat-completions `tools` array.
    pub fn to_openai(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// The four database tools offered to the agent, bound to one connection.
pub struct SqlToolkit {
    db: Arc<dyn SqlDatabase>,
    llm: Arc<dyn ChatModel>,
    usage: Arc<UsageTracker>,
    tools: Vec<ToolDefinition>,
}

impl SqlToolkit {
    pub fn new(db: Arc<dyn SqlDatabase>, llm: Arc<dyn ChatModel>, usage: Arc<UsageTracker>) -> Self {
        let mut tools = Vec::new();

        tools.push(ToolDefinition {
            name: QUERY_SQL_DATABASE.to_string(),
            description: format!(
                "Execute a SQL query against the database and get back the result. \
                 If the query is not correct, an error message will be returned. \
                 If an error is returned, rewrite the query, check the query, and try again. \
                 If you encounter an issue with an unknown column, use {} to look up the correct table fields.",
                INFO_SQL_DATABASE
            ),
            parameters: single_string_param("query", "A detailed and correct SQL query."),
        });

        tools.push(ToolDefinition {
            name: INFO_SQL_DATABASE.to_string(),
            description: format!(
                "Get the schema and sample rows for the specified SQL tables. \
                 Be sure that the tables actually exist by calling {} first!",
                LIST_SQL_DATABASE
            ),
            parameters: single_string_param(
                "table_names",
                "A comma-separated list of the table names, for example: table1, table2, table3",
            ),
        });

        tools.push(ToolDefinition {
            name: LIST_SQL_DATABASE.to_string(),
            description: "List the tables in the database as a comma-separated string.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "tool_input": {
                        "type": "string",
                        "description": "An empty string"
                    }
                }
            }),
        });

        tools.push(ToolDefinition {
            name: QUERY_CHECKER.to_string(),
            description: format!(
                "Use this tool to double check if your query is correct before executing it. \
                 Always use this tool before executing a query with {}!",
                QUERY_SQL_DATABASE
            ),
            parameters: single_string_param("query", "A detailed and SQL query to be checked."),
        });

        Self { db, llm, usage, tools }
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn dialect(&self) -> &str {
        self.db.dialect()
    }

    /// Run one tool call and return its observation. Database failures and
    /// bad arguments come back as `Error: ...` text for the model to act on;
    /// only a failing model call inside the checker is an error.
    pub async fn call(&self, call: &ToolCall) -> Result<String, LlmError> {
        let args = match parse_arguments(&call.function.arguments) {
            Ok(args) => args,
            Err(e) => return Ok(format!("Error: could not parse tool arguments: {}", e)),
        };
        let arg = |key: &str| args.get(key).and_then(|v| v.as_str()).unwrap_or("").trim().to_string();

        let observation = match call.function.name.as_str() {
            QUERY_SQL_DATABASE => {
                let query = arg("query");
                match self.db.run(&query).await {
                    Ok(rows) => rows,
                    Err(e) => format!("Error: {}", e),
                }
            }
            INFO_SQL_DATABASE => {
                let tables: Vec<String> = arg("table_names")
                    .split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect();
                match self.db.table_info(&tables).await {
                    Ok(info) => info,
                    Err(e) => format!("Error: {}", e),
                }
            }
            LIST_SQL_DATABASE => match self.db.usable_table_names().await {
                Ok(names) => names.join(", "),
                Err(e) => format!("Error: {}", e),
            },
            QUERY_CHECKER => self.check_query(&arg("query")).await?,
            other => {
                let names: Vec<&str> = self.tools.iter().map(|t| t.name.as_str()).collect();
                format!("{} is not a valid tool, try one of [{}].", other, names.join(", "))
            }
        };

        Ok(observation)
    }

    async fn check_query(&self, query: &str) -> Result<String, LlmError> {
        let messages = [ChatMessage::user(prompt::query_checker(query, self.db.dialect()))];
        let reply = self.llm.complete(&messages, &[], None).await?;
        self.usage.record(&reply.model, reply.usage.as_ref());
        Ok(reply.message.content.unwrap_or_default().trim().to_string())
    }
}

fn single_string_param(name: &str, description: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            name: {
                "type": "string",
                "description": description
            }
        },
        "required": [name]
    })
}

/// Tool arguments arrive as a JSON-encoded string; an empty string means no arguments.
pub fn parse_arguments(raw: &str) -> serde_json::Result<serde_json::Map<String, serde_json::Value>> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Map::new());
    }
    serde_json::from_str(raw)
}
