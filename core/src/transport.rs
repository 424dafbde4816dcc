use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use tracing::trace;

use crate::error::ProviderError;
use crate::provider::ProviderTransport;

/// Generic JSON-over-HTTP transport. Both the cloud API and a local
/// inference server speak the same minimal shape: POST one payload, get one
/// JSON document back. They differ only in base URL and whether a bearer key
/// is attached.
pub struct HttpProviderTransport {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpProviderTransport {
    pub fn new(base_url: &str, api_key: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().build()?;
        let endpoint = format!("{}/v1/generate", base_url.trim_end_matches('/'));
        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl ProviderTransport for HttpProviderTransport {
    async fn send(
        &self,
        model: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<Value, ProviderError> {
        let body = json!({ "model": model, "input": payload });
        let mut request = self.http.post(&self.endpoint).timeout(timeout).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                ProviderError::Timeout(timeout)
            } else {
                ProviderError::Network(err.to_string())
            }
        })?;
        let status = response.status();
        trace!(%status, endpoint = %self.endpoint, "provider response");
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|err| ProviderError::Server(format!("unparsable response body: {err}")));
        }
        let message = response.text().await.unwrap_or_default();
        Err(classify_status(status, message))
    }
}

fn classify_status(status: reqwest::StatusCode, message: String) -> ProviderError {
    let message = if message.is_empty() {
        status.to_string()
    } else {
        message
    };
    match status.as_u16() {
        401 | 403 => ProviderError::Auth(message),
        429 => ProviderError::RateLimited(message),
        400..=499 => ProviderError::InvalidRequest(message),
        _ => ProviderError::Server(message),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::body_partial_json;
    use wiremock::matchers::header;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn posts_model_and_payload_with_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/generate"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "m1", "input": {"q": "hi"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "hello"})))
            .expect(1)
            .mount(&server)
            .await;

        let transport =
            HttpProviderTransport::new(server.uri().as_str(), Some("sk-test".to_string())).unwrap();
        let value = transport.send("m1", &json!({"q": "hi"}), TIMEOUT).await.unwrap();
        assert_eq!(value, json!({"text": "hello"}));
    }

    #[tokio::test]
    async fn maps_status_codes_to_error_kinds() {
        let cases = [
            (401, "auth"),
            (403, "auth"),
            (400, "invalid_request"),
            (422, "invalid_request"),
            (429, "rate_limited"),
            (500, "server_error"),
            (503, "server_error"),
        ];
        for (status, expected_kind) in cases {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;
            let transport = HttpProviderTransport::new(server.uri().as_str(), None).unwrap();
            let err = transport
                .send("m1", &json!({}), TIMEOUT)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), expected_kind, "status {status}");
        }
    }

    #[tokio::test]
    async fn garbage_body_on_success_is_a_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;
        let transport = HttpProviderTransport::new(server.uri().as_str(), None).unwrap();
        let err = transport.send("m1", &json!({}), TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ProviderError::Server(_)));
    }
}
