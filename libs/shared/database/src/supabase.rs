use std::time::Duration;

use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method, Response,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use shared_config::AppConfig;

/// SQLSTATE raised by an `EXCLUDE` constraint.
pub const EXCLUSION_VIOLATION: &str = "23P01";
pub const UNIQUE_VIOLATION: &str = "23505";
pub const NO_DATA_FOUND: &str = "P0002";

// Statement timeout, serialization failure, deadlock: the transaction was
// rolled back and may be retried.
const TRANSIENT_SQLSTATES: [&str; 3] = ["57014", "40001", "40P01"];

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Request to database timed out")]
    Timeout,

    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Failed to decode database response: {0}")]
    Decode(String),

    #[error("Invalid request header: {0}")]
    InvalidHeader(String),
}

impl DatabaseError {
    /// Postgres SQLSTATE reported by PostgREST, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            DatabaseError::Api { code: Some(code), .. } => Some(code.as_str()),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            DatabaseError::Timeout | DatabaseError::Connection(_) => true,
            DatabaseError::Api { status, code, .. } => {
                matches!(*status, 503 | 504)
                    || code
                        .as_deref()
                        .is_some_and(|c| TRANSIENT_SQLSTATES.contains(&c))
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::Api { status: 404, .. })
    }
}

impl From<reqwest::Error> for DatabaseError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DatabaseError::Timeout
        } else if e.is_decode() {
            DatabaseError::Decode(e.to_string())
        } else {
            DatabaseError::Connection(e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        let timeout = Duration::from_secs(config.scheduling.store_timeout_seconds);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client with timeout ({}), using defaults", e);
                Client::new()
            });

        Self {
            client,
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap, DatabaseError> {
        let mut headers = HeaderMap::new();

        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.anon_key)
                .map_err(|e| DatabaseError::InvalidHeader(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = auth_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| DatabaseError::InvalidHeader(e.to_string()))?,
            );
        }

        Ok(headers)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<Response, DatabaseError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers(auth_token)?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url).headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let parsed = serde_json::from_str::<PostgrestErrorBody>(&error_text).ok();
            let (code, message) = match parsed {
                Some(body) => {
                    let message = match (body.message, body.details) {
                        (Some(m), Some(d)) => format!("{} ({})", m, d),
                        (Some(m), None) => m,
                        (None, _) => error_text.clone(),
                    };
                    (body.code, message)
                }
                None => (None, error_text),
            };

            error!("API error ({}) code={:?}: {}", status, code, message);

            return Err(DatabaseError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }

        Ok(response)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T, DatabaseError>
    where T: DeserializeOwned {
        self.request_with_headers(method, path, auth_token, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        headers: Option<HeaderMap>,
    ) -> Result<T, DatabaseError>
    where T: DeserializeOwned {
        let response = self.send(method, path, auth_token, body, headers).await?;

        response
            .json::<T>()
            .await
            .map_err(|e| DatabaseError::Decode(e.to_string()))
    }

    /// Send a request whose response body is not needed (e.g. `Prefer: return=minimal`).
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
    ) -> Result<(), DatabaseError> {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=minimal"));

        self.send(method, path, auth_token, body, Some(headers)).await?;
        Ok(())
    }

    /// Call a Postgres function through PostgREST. The function body runs in
    /// a single transaction.
    pub async fn rpc<T>(&self, function: &str, auth_token: Option<&str>, args: Value) -> Result<T, DatabaseError>
    where T: DeserializeOwned {
        let path = format!("/rest/v1/rpc/{}", function);
        self.request(Method::POST, &path, auth_token, Some(args)).await
    }

    /// Headers asking PostgREST to echo written rows back.
    pub fn return_representation() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}
