use anyhow::Result;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;

use super::{AdapterError, AdapterSettings};

/// How a request authenticates against the remote service.
pub enum Auth<'a> {
    /// `Authorization: token <t>` (GitHub personal tokens).
    Token(&'a str),
    Bearer(&'a str),
    Basic { username: &'a str, secret: &'a str },
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(settings: &AdapterSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    /// Send one request and decode the body as JSON. Empty bodies decode to
    /// `null`, non-JSON bodies to a string. Non-2xx responses are classified
    /// by [`classify_status`].
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        auth: &Auth<'_>,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value, AdapterError> {
        let mut request = self
            .client
            .request(method, url)
            .header("Accept", "application/json");
        request = match auth {
            Auth::Token(t) => request.header("Authorization", format!("token {}", t)),
            Auth::Bearer(t) => request.bearer_auth(t),
            Auth::Basic { username, secret } => request.basic_auth(username, Some(secret)),
        };
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let res = request.send().await.map_err(classify_transport)?;
        let status = res.status();
        let text = res.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            let message = format!("HTTP {} from {}: {}", status.as_u16(), url, snippet(&text));
            return Err(if classify_status(status) {
                AdapterError::transient(message)
            } else {
                AdapterError::permanent(message)
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    pub async fn get(
        &self,
        url: &str,
        auth: &Auth<'_>,
        query: &[(&str, &str)],
    ) -> Result<Value, AdapterError> {
        self.send(Method::GET, url, auth, query, None).await
    }

    pub async fn post(
        &self,
        url: &str,
        auth: &Auth<'_>,
        body: &Value,
    ) -> Result<Value, AdapterError> {
        self.send(Method::POST, url, auth, &[], Some(body)).await
    }
}

/// `true` when a non-success status is worth retrying.
pub fn classify_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn classify_transport(err: reqwest::Error) -> AdapterError {
    if err.is_builder() {
        AdapterError::permanent(format!("invalid request: {}", err))
    } else if err.is_timeout() {
        AdapterError::transient(format!("request timed out: {}", err))
    } else {
        AdapterError::transient(format!("request failed: {}", err))
    }
}

fn snippet(text: &str) -> String {
    const MAX: usize = 200;
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX).collect();
    format!("{}...", cut)
}
