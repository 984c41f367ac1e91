// src/api.rs
use std::fmt;

use log::debug;
use reqwest::{header::CONTENT_TYPE, StatusCode};
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

const ERROR_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid instance URL: {0}")]
    InvalidUrl(String),

    #[error("request body must be a JSON object")]
    InvalidBody,

    /// Non-success HTTP status.
    #[error("API request failed: {status} - {message}")]
    Status { status: u16, message: String },

    /// Success status, but the body carried an `error` object.
    #[error("API error {code}: {message}")]
    Remote { code: String, message: String },

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Thin client for the one-shot Misskey HTTP API.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    origin: String,
    token: String,
}

impl ApiClient {
    pub fn new(origin: &str, token: &str) -> Result<Self, ApiError> {
        let origin = origin.trim().trim_end_matches('/');
        let origin = if origin.contains("://") {
            origin.to_string()
        } else {
            format!("https://{origin}")
        };
        Url::parse(&origin).map_err(|e| ApiError::InvalidUrl(format!("{origin}: {e}")))?;

        Ok(Self {
            http: reqwest::Client::new(),
            origin,
            token: token.to_string(),
        })
    }

    /// `POST {origin}/api/{endpoint}` with the token merged into `body`.
    ///
    /// Empty and non-JSON successful responses come back as `{}`.
    pub async fn request(&self, endpoint: &str, body: Value) -> Result<Value, ApiError> {
        let mut payload = Map::new();
        payload.insert("i".to_string(), Value::String(self.token.clone()));
        match body {
            Value::Object(fields) => payload.extend(fields),
            Value::Null => {}
            _ => return Err(ApiError::InvalidBody),
        }

        let url = format!("{}/api/{}", self.origin, endpoint.trim_start_matches('/'));
        debug!("POST {}/api/{}", self.origin, endpoint);

        let response = self.http.post(&url).json(&payload).send().await?;
        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("application/json"));
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        if status == StatusCode::NO_CONTENT || !is_json || text.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| ApiError::Decode(format!("{e} - response: {}", preview(&text))))?;

        if let Some(error) = data.get("error").filter(|error| !error.is_null()) {
            return Err(ApiError::Remote {
                code: error
                    .get("code")
                    .and_then(Value::as_str)
                    .unwrap_or("UNKNOWN")
                    .to_string(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            });
        }

        Ok(data)
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Misskey error bodies look like `{"error":{"message":..,"code":..}}`;
/// fall back to the raw text for anything else.
fn error_message(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|body| {
            body.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| preview(text))
}

fn preview(text: &str) -> String {
    text.chars().take(ERROR_PREVIEW_CHARS).collect()
}
