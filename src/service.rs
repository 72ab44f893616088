use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::agent::{AgentConfig, SqlAgent};
use crate::ai::llm::{ChatModel, LlmClient};
use crate::ai::usage::UsageTracker;
use crate::config::AppConfig;
use crate::db::models::ConnectionDescriptor;
use crate::db::{Database, SqlDatabase};
use crate::errors::Error;
use crate::extract::{self, SqlResponse};

/// Opens the per-request collaborators. Nothing is pooled or cached.
#[async_trait]
pub trait Backends: Send + Sync {
    async fn open_database(&self) -> Result<Arc<dyn SqlDatabase>, Error>;

    fn chat_model(&self) -> Result<Arc<dyn ChatModel>, Error>;
}

/// SQL Server plus Azure OpenAI, both built from `AppConfig`.
pub struct LiveBackends {
    config: Arc<AppConfig>,
}

impl LiveBackends {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Backends for LiveBackends {
    async fn open_database(&self) -> Result<Arc<dyn SqlDatabase>, Error> {
        let descriptor = ConnectionDescriptor::from_config(&self.config);
        let db = Database::connect(descriptor).await?;
        Ok(Arc::new(db))
    }

    fn chat_model(&self) -> Result<Arc<dyn ChatModel>, Error> {
        Ok(Arc::new(LlmClient::new(&self.config)?))
    }
}

/// Turns one natural-language question into a `SqlResponse`.
pub struct SqlService {
    backends: Arc<dyn Backends>,
    agent_config: AgentConfig,
}

impl SqlService {
    pub fn new(backends: Arc<dyn Backends>, agent_config: AgentConfig) -> Self {
        Self {
            backends,
            agent_config,
        }
    }

    pub fn from_config(config: Arc<AppConfig>) -> Self {
        let agent_config = AgentConfig::from_app_config(&config);
        Self::new(Arc::new(LiveBackends::new(config)), agent_config)
    }

    pub async fn generate_sql_query(&self, prompt: &str) -> Result<SqlResponse, Error> {
        let run_id = Uuid::new_v4();
        tracing::info!(%run_id, "Entered generate_sql_query with prompt: {}", prompt);

        // ── 1. Connect to the database ────────────────────────────────

        let db = self.backends.open_database().await?;

        if self.agent_config.verbose {
            match db.usable_table_names().await {
                Ok(tables) => tracing::info!(%run_id, "Database ready. Found tables: {:?}", tables),
                Err(e) => tracing::warn!(%run_id, "Could not list tables: {}", e),
            }
        }

        // ── 2. Bind the chat model ────────────────────────────────────

        let llm = self.backends.chat_model()?;
        tracing::info!(%run_id, "Chat model ready: {}", llm.name());

        // ── 3. Build and invoke the agent ─────────────────────────────

        let usage = Arc::new(UsageTracker::new());
        let agent = SqlAgent::new(db, llm, usage.clone(), self.agent_config.clone());
        let result = agent.invoke(prompt).await?;

        // ── 4. Extract the structured response ────────────────────────

        let response = extract::build_response(prompt, &result, &usage.snapshot())?;
        tracing::info!(%run_id, "Generated SQL query: {}", response.sql_statement);

        Ok(response)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agent::tools::tests::{tool_call, FakeDatabase, ScriptedModel, StalledModel};
    use crate::agent::tools::QUERY_SQL_DATABASE;
    use crate::ai::llm::{ChatMessage, LlmError};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Hands out a fresh scripted model per request.
    pub(crate) struct FakeBackends {
        scripts: Mutex<Vec<Vec<Result<ChatMessage, LlmError>>>>,
        database_down: bool,
        model_stalls: bool,
    }

    impl FakeBackends {
        pub(crate) fn with_script(script: Vec<Result<ChatMessage, LlmError>>) -> Self {
            Self {
                scripts: Mutex::new(vec![script]),
                database_down: false,
                model_stalls: false,
            }
        }

        pub(crate) fn database_down() -> Self {
            Self {
                database_down: true,
                ..Self::with_script(Vec::new())
            }
        }

        pub(crate) fn stalled_model() -> Self {
            Self {
                model_stalls: true,
                ..Self::with_script(Vec::new())
            }
        }
    }

    #[async_trait]
    impl Backends for FakeBackends {
        async fn open_database(&self) -> Result<Arc<dyn SqlDatabase>, Error> {
            if self.database_down {
                return Err(Error::connection(
                    "Failed to connect to the database. Please check your database configuration.",
                    anyhow::anyhow!("connection refused"),
                ));
            }
            Ok(Arc::new(FakeDatabase::new()))
        }

        fn chat_model(&self) -> Result<Arc<dyn ChatModel>, Error> {
            if self.model_stalls {
                return Ok(Arc::new(StalledModel));
            }
            let script = self.scripts.lock().unwrap().pop().unwrap_or_default();
            Ok(Arc::new(ScriptedModel::new(script)))
        }
    }

    pub(crate) fn service(backends: FakeBackends) -> SqlService {
        SqlService::new(Arc::new(backends), AgentConfig::default())
    }

    pub(crate) fn service_with_timeout(backends: FakeBackends, timeout: Duration) -> SqlService {
        let config = AgentConfig {
            timeout: Some(timeout),
            ..AgentConfig::default()
        };
        SqlService::new(Arc::new(backends), config)
    }

    #[tokio::test]
    async fn question_flows_through_agent_into_response() {
        let backends = FakeBackends::with_script(vec![
            Ok(ChatMessage::assistant_tool_calls(vec![tool_call(
                "c1",
                QUERY_SQL_DATABASE,
                r#"{"query": "SELECT COUNT(*) FROM users"}"#,
            )])),
            Ok(ChatMessage::assistant(
                "Final Answer: 42 users.\n\nExplanation: I ran SELECT COUNT(*) FROM users",
            )),
        ]);

        let response = service(backends).generate_sql_query("How many users?").await.unwrap();

        assert_eq!(response.final_answer, "Final Answer: 42 users.");
        assert_eq!(response.sql_statement, "SQL Statement: SELECT COUNT(*) FROM users");
        assert_eq!(response.prompt_tokens_int, 200);
        assert_eq!(response.completion_tokens_int, 40);
        assert!(response.total_cost_float > 0.0);
    }

    #[tokio::test]
    async fn database_failure_stops_before_the_model() {
        let err = service(FakeBackends::database_down())
            .generate_sql_query("q")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Connection { .. }));
    }

    #[tokio::test]
    async fn stalled_agent_times_out() {
        let service = service_with_timeout(FakeBackends::stalled_model(), Duration::from_millis(20));

        let err = service.generate_sql_query("q").await.unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }));
    }
}
