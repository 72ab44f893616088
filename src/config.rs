use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Azure OpenAI deployment the chat client is bound to
    pub deployment_name: String,
    pub api_version: String,
    /// e.g. `https://my-resource.openai.azure.com`
    pub openai_endpoint: String,
    pub openai_api_key: String,

    pub sql_server_name: String,
    pub sql_server_username: String,
    pub sql_server_password: String,
    pub sql_server_database: String,
    /// Skip server certificate validation (local containers only)
    pub sql_server_trust_cert: bool,

    pub host: String,
    pub port: u16,

    /// Log every agent step at INFO instead of DEBUG
    pub show_query_execution_steps: bool,
    /// Row cap the agent is told to apply to its queries
    pub agent_top_k: usize,
    pub agent_max_iterations: usize,
    /// Overall bound on a single agent invocation. `None` waits forever.
    pub agent_timeout: Option<Duration>,
    pub llm_request_timeout: Duration,
    /// Ask the model for a JSON-schema final answer
    pub structured_output: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve every setting through `lookup`. Required keys that are absent
    /// or blank fail with the key's name; nothing is defaulted for them.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| -> Result<String, ConfigError> {
            match lookup(key) {
                Some(v) if !v.trim().is_empty() => Ok(v),
                _ => Err(ConfigError::Missing { key }),
            }
        };
        let optional = |key: &str, default: &str| -> String {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            deployment_name: required("GPT35_DEPLOYMENT_NAME")?,
            api_version: required("AZURE_OPENAI_API_VERSION")?,
            sql_server_name: required("SQL_SERVER_NAME")?,
            sql_server_username: required("SQL_SERVER_USERNAME")?,
            sql_server_password: required("SQL_SERVER_PASSWORD")?,
            sql_server_database: required("SQL_SERVER_DATABASE")?,
            openai_endpoint: required("AZURE_OPENAI_ENDPOINT")?
                .trim_end_matches('/')
                .to_string(),
            openai_api_key: required("AZURE_OPENAI_API_KEY")?,
            sql_server_trust_cert: parse("SQL_SERVER_TRUST_CERT", &optional("SQL_SERVER_TRUST_CERT", "false"))?,
            host: optional("HOST", "0.0.0.0"),
            port: parse("PORT", &optional("PORT", "8000"))?,
            show_query_execution_steps: parse(
                "SHOW_QUERY_EXECUTION_STEPS",
                &optional("SHOW_QUERY_EXECUTION_STEPS", "true"),
            )?,
            agent_top_k: parse("AGENT_TOP_K", &optional("AGENT_TOP_K", "30"))?,
            agent_max_iterations: parse(
                "AGENT_MAX_ITERATIONS",
                &optional("AGENT_MAX_ITERATIONS", "15"),
            )?,
            agent_timeout: match lookup("AGENT_TIMEOUT_SECS").filter(|v| !v.trim().is_empty()) {
                Some(v) => Some(Duration::from_secs(parse("AGENT_TIMEOUT_SECS", &v)?)),
                None => None,
            },
            llm_request_timeout: Duration::from_secs(parse(
                "LLM_REQUEST_TIMEOUT_SECS",
                &optional("LLM_REQUEST_TIMEOUT_SECS", "120"),
            )?),
            structured_output: parse("STRUCTURED_OUTPUT", &optional("STRUCTURED_OUTPUT", "false"))?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}
