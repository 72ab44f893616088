use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::AppState;
use crate::errors::Error;
use crate::extract::SqlResponse;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPrompt {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateSqlResponse {
    #[serde(rename = "SqlResponse")]
    pub sql_response: SqlResponse,
}

/// `POST /generate-sql/`: answer one question. Rejected input is a 400,
/// every other failure a 500 with a generic `detail`.
pub async fn generate_sql(
    State(state): State<AppState>,
    Json(request): Json<UserPrompt>,
) -> Result<Json<GenerateSqlResponse>, Error> {
    tracing::info!("Received prompt: {}", request.prompt);

    let sql_response = state.service.generate_sql_query(&request.prompt).await?;
    tracing::info!("Answered prompt: {}", sql_response.final_answer);

    Ok(Json(GenerateSqlResponse { sql_response }))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
