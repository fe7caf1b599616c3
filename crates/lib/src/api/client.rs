//! HTTP client shared by the typed API wrappers.
//!
//! Both backends answer with the envelope `{ "code", "data", "message" }` where `code == 0`
//! means success. Error envelopes may also come with a non-2xx status.

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("api error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("response has no data")]
    MissingData,
    #[error("malformed stream event: {0}")]
    Stream(String),
    #[error("request cancelled")]
    Cancelled,
}

/// Response envelope used by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub code: i64,
    pub data: Option<T>,
    #[serde(default)]
    pub message: String,
}

impl<T> Envelope<T> {
    /// Ok(data) when code is 0; data may still be absent for endpoints that return only a message.
    pub fn into_result(self) -> Result<Option<T>, ApiError> {
        if self.code != 0 {
            return Err(ApiError::Api {
                code: self.code,
                message: self.message,
            });
        }
        Ok(self.data)
    }
}

/// Client for one backend: base URL plus optional bearer token.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token.filter(|t| !t.trim().is_empty());
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Build a request with the Authorization header applied.
    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let rb = self.client.request(method, self.url(path));
        match &self.token {
            Some(t) if t.starts_with("Bearer ") => rb.header(reqwest::header::AUTHORIZATION, t),
            Some(t) => rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {}", t)),
            None => rb,
        }
    }

    /// Send and require `data` in the envelope.
    pub(crate) async fn send<T: DeserializeOwned>(&self, rb: RequestBuilder) -> Result<T, ApiError> {
        self.send_optional(rb).await?.ok_or(ApiError::MissingData)
    }

    /// Send where only success matters; returns the envelope message.
    pub(crate) async fn send_unit(&self, rb: RequestBuilder) -> Result<String, ApiError> {
        let res = self.send_checked(rb).await?;
        let env: Envelope<serde_json::Value> = res.json().await?;
        let message = env.message.clone();
        env.into_result()?;
        Ok(message)
    }

    pub(crate) async fn send_optional<T: DeserializeOwned>(
        &self,
        rb: RequestBuilder,
    ) -> Result<Option<T>, ApiError> {
        let res = self.send_checked(rb).await?;
        let env: Envelope<T> = res.json().await?;
        env.into_result()
    }

    /// Send and map non-2xx to an error. Error envelopes keep their code and message.
    pub(crate) async fn send_checked(&self, rb: RequestBuilder) -> Result<Response, ApiError> {
        let res = rb.send().await?;
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        log::debug!("api: {} {}", status, body);
        match serde_json::from_str::<Envelope<serde_json::Value>>(&body) {
            Ok(env) if env.code != 0 => Err(ApiError::Api {
                code: env.code,
                message: env.message,
            }),
            _ => Err(ApiError::Status { status, body }),
        }
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        self.send(self.request(Method::GET, path).query(query)).await
    }

    pub(crate) async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(self.request(Method::POST, path).json(body)).await
    }
}

/// Paginated list as returned by the management backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub list: Vec<T>,
    #[serde(default)]
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_code_zero_is_ok() {
        let env: Envelope<Vec<u32>> =
            serde_json::from_str(r#"{"code":0,"data":[1,2],"message":"success"}"#).unwrap();
        assert_eq!(env.into_result().unwrap(), Some(vec![1, 2]));
    }

    #[test]
    fn envelope_without_data() {
        let env: Envelope<Vec<u32>> = serde_json::from_str(r#"{"code":0,"message":"deleted"}"#).unwrap();
        assert_eq!(env.into_result().unwrap(), None);
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct NoDefault {
        id: String,
    }

    #[test]
    fn envelope_data_needs_no_default() {
        let env: Envelope<NoDefault> = serde_json::from_str(r#"{"code":0,"message":"ok"}"#).unwrap();
        assert_eq!(env.into_result().unwrap(), None);
        let env: Envelope<NoDefault> =
            serde_json::from_str(r#"{"code":0,"data":{"id":"x"}}"#).unwrap();
        assert_eq!(env.into_result().unwrap(), Some(NoDefault { id: "x".to_string() }));
    }

    #[test]
    fn envelope_nonzero_code_is_api_error() {
        let env: Envelope<serde_json::Value> =
            serde_json::from_str(r#"{"code":400,"message":"missing llm_factory"}"#).unwrap();
        match env.into_result() {
            Err(ApiError::Api { code, message }) => {
                assert_eq!(code, 400);
                assert_eq!(message, "missing llm_factory");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn base_url_is_normalised() {
        let c = ApiClient::new("http://host:1/", None);
        assert_eq!(c.base_url(), "http://host:1");
        assert_eq!(c.url("/api/v1/users"), "http://host:1/api/v1/users");
        assert_eq!(c.url("v1/conversation/list"), "http://host:1/v1/conversation/list");
    }
}
