//! Cloudflare D1 HTTP query transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use super::{json_i64, QueryResult, QueryTransport};
use crate::config::TargetConfig;
use crate::error::{MigrateError, Result};

/// Longest slice of an unparseable response body kept in an error message.
const MAX_BODY_IN_ERROR: usize = 512;

#[derive(Serialize)]
struct QueryRequest<'a> {
    sql: &'a str,
    params: &'a [Value],
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<ApiMessage>,
}

#[derive(Deserialize)]
struct StatementResult {
    #[serde(default)]
    results: Vec<Map<String, Value>>,
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    meta: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

fn default_true() -> bool {
    true
}

/// Client for the D1 `/query` endpoint of one database.
pub struct D1Client {
    client: reqwest::Client,
    url: String,
    api_token: String,
}

impl std::fmt::Debug for D1Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D1Client")
            .field("url", &self.url)
            .field("api_token", &"[REDACTED]")
            .finish()
    }
}

impl D1Client {
    pub fn new(config: &TargetConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.query_url(),
            api_token: config.api_token.clone(),
        })
    }
}

#[async_trait]
impl QueryTransport for D1Client {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        debug!("D1 query ({} params): {}", params.len(), sql);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_token)
            .json(&QueryRequest { sql, params })
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        parse_response(status, &body)
    }

    fn name(&self) -> &str {
        "d1"
    }
}

/// Decode a D1 response body, turning both HTTP and application failures into errors.
fn parse_response(status: u16, body: &str) -> Result<QueryResult> {
    let ok_status = (200..300).contains(&status);

    let envelope: Envelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            let message = if ok_status {
                format!("malformed response body: {}", e)
            } else {
                truncate(body).to_string()
            };
            return Err(MigrateError::remote(Some(status), message));
        }
    };

    if !ok_status || !envelope.success {
        return Err(MigrateError::remote(
            Some(status),
            describe_errors(&envelope.errors),
        ));
    }

    let statement = envelope
        .result
        .into_iter()
        .next()
        .ok_or_else(|| MigrateError::remote(Some(status), "response contains no result"))?;

    if !statement.success {
        return Err(MigrateError::remote(
            Some(status),
            "statement reported success=false",
        ));
    }

    let meta = statement.meta.unwrap_or_default();
    Ok(QueryResult {
        rows: statement.results,
        changes: meta
            .get("changes")
            .and_then(json_i64)
            .and_then(|n| u64::try_from(n).ok()),
        last_row_id: meta.get("last_row_id").and_then(json_i64),
    })
}

fn describe_errors(errors: &[ApiMessage]) -> String {
    if errors.is_empty() {
        return "success=false".to_string();
    }
    errors
        .iter()
        .map(|e| match e.code {
            Some(code) => format!("{} (code {})", e.message, code),
            None => e.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn truncate(body: &str) -> &str {
    if body.len() <= MAX_BODY_IN_ERROR {
        return body;
    }
    let mut end = MAX_BODY_IN_ERROR;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
