use crate::annotations::TriggerConfig;
use crate::secret_string::SecretString;
use reqwest::Client;
use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, warn};

pub static PROJECT_ID_PLACEHOLDER: &str = "PROJECT_ID";

/// Body of a pipeline trigger request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WebhookPayload {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub token: SecretString,
    #[serde(rename = "variables[TRIGGERED_ENV]")]
    pub triggered_env: String,
    #[serde(rename = "variables[IMAGE_TAG]")]
    pub image_tag: String,
}

impl WebhookPayload {
    pub fn new(config: &TriggerConfig, token: &SecretString, image_tag: &str) -> Self {
        Self {
            git_ref: config.branch.value.clone(),
            token: token.clone(),
            triggered_env: config.env.value.clone(),
            image_tag: image_tag.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct WebhookResponse {
    pub status: reqwest::StatusCode,
    pub body: String,
}

#[derive(Debug)]
pub enum DispatchError {
    Request(reqwest::Error),
    ReadBody(reqwest::Error),
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Request(e) | DispatchError::ReadBody(e) => Some(e),
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Request(e) => write!(f, "failed to send webhook request: {}", e),
            DispatchError::ReadBody(e) => write!(f, "failed to read webhook response body: {}", e),
        }
    }
}

/// Sends pipeline triggers. A single POST per call, never retried.
#[derive(Clone)]
pub struct WebhookDispatcher {
    http_client: Client,
    base_url: String,
    path_template: String,
    auth_token: SecretString,
}

impl WebhookDispatcher {
    pub fn new(
        http_client: Client,
        base_url: impl Into<String>,
        path_template: impl Into<String>,
        auth_token: SecretString,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            path_template: path_template.into(),
            auth_token,
        }
    }

    pub fn webhook_url(&self, project_id: &str) -> String {
        format!("{}{}", self.base_url, self.path_template)
            .replace(PROJECT_ID_PLACEHOLDER, project_id)
    }

    pub fn payload(&self, config: &TriggerConfig, image_tag: &str) -> WebhookPayload {
        WebhookPayload::new(config, &self.auth_token, image_tag)
    }

    pub async fn dispatch(
        &self,
        url: &str,
        payload: &WebhookPayload,
    ) -> Result<WebhookResponse, DispatchError> {
        debug!("Triggering webhook {} with payload {:?}", url, payload);

        let response = self
            .http_client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(DispatchError::Request)?;

        let status = response.status();
        let body = response.text().await.map_err(DispatchError::ReadBody)?;

        Ok(WebhookResponse { status, body })
    }

    /// Resolves the url for `config`, dispatches, and logs the outcome. Errors end here.
    pub async fn trigger(&self, config: &TriggerConfig, image_tag: &str) {
        let url = self.webhook_url(&config.project_id.value);
        let payload = self.payload(config, image_tag);

        match self.dispatch(&url, &payload).await {
            Ok(response) if response.status.is_success() => {
                info!(
                    "Triggered pipeline for project {} with tag {}, status {}",
                    config.project_id.value, image_tag, response.status
                );
                debug!("Response body: {}", response.body);
            }
            Ok(response) => {
                warn!(
                    "Pipeline trigger for project {} answered with status {}: {}",
                    config.project_id.value, response.status, response.body
                );
            }
            Err(e) => {
                error!(
                    "Failed to trigger pipeline for project {} at {} with tag {}: {:?}",
                    config.project_id.value, url, image_tag, e
                );
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Resolved;
    use axum::Router;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode, Uri};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    pub(crate) struct CapturedRequest {
        pub path: String,
        pub content_type: Option<String>,
        pub body: serde_json::Value,
    }

    pub(crate) type Captured = Arc<Mutex<Vec<CapturedRequest>>>;

    async fn capture(
        State(captured): State<Captured>,
        uri: Uri,
        headers: HeaderMap,
        body: String,
    ) -> (StatusCode, &'static str) {
        captured.lock().unwrap().push(CapturedRequest {
            path: uri.path().to_string(),
            content_type: headers
                .get(axum::http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: serde_json::from_str(&body).unwrap_or(serde_json::Value::Null),
        });
        (StatusCode::CREATED, "{\"id\":1}")
    }

    /// Starts a local CI endpoint recording every request. Returns its base url.
    pub(crate) async fn start_ci_server() -> (String, Captured) {
        let captured: Captured = Arc::default();
        let app = Router::new().fallback(capture).with_state(captured.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{}/api/v4", addr), captured)
    }

    fn config(env: &str, branch: &str, project_id: &str) -> TriggerConfig {
        TriggerConfig {
            env: Resolved::explicit(env.to_string()),
            branch: Resolved::explicit(branch.to_string()),
            project_id: Resolved::explicit(project_id.to_string()),
        }
    }

    fn dispatcher(base_url: &str) -> WebhookDispatcher {
        WebhookDispatcher::new(
            Client::new(),
            base_url,
            "/projects/PROJECT_ID/trigger/pipeline",
            SecretString::from("glptt-token"),
        )
    }

    #[test]
    fn test_webhook_url_substitutes_project_id() {
        let dispatcher = dispatcher("https://gitlab.com/api/v4");
        assert_eq!(
            dispatcher.webhook_url("42"),
            "https://gitlab.com/api/v4/projects/42/trigger/pipeline"
        );
    }

    #[test]
    fn test_payload_wire_form() {
        let payload = dispatcher("https://gitlab.com/api/v4")
            .payload(&config("staging", "main", "42"), "1.1");
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            serde_json::json!({
                "ref": "main",
                "token": "glptt-token",
                "variables[TRIGGERED_ENV]": "staging",
                "variables[IMAGE_TAG]": "1.1",
            })
        );
        assert!(!format!("{:?}", payload).contains("glptt-token"));
    }

    #[tokio::test]
    async fn test_dispatch_posts_json() {
        let (base_url, captured) = start_ci_server().await;
        let dispatcher = dispatcher(&base_url);
        let url = dispatcher.webhook_url("7");
        let payload = dispatcher.payload(&config("prod", "release", "7"), "2.0");

        let response = dispatcher.dispatch(&url, &payload).await.expect("Dispatch should succeed");

        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.body, "{\"id\":1}");
        let requests = captured.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/api/v4/projects/7/trigger/pipeline");
        assert_eq!(requests[0].content_type.as_deref(), Some("application/json"));
        assert_eq!(requests[0].body["variables[IMAGE_TAG]"], "2.0");
    }

    #[tokio::test]
    async fn test_dispatch_reports_connection_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dispatcher = dispatcher(&format!("http://{}", addr));
        let url = dispatcher.webhook_url("1");
        let payload = dispatcher.payload(&config("e", "b", "1"), "t");

        let err = dispatcher.dispatch(&url, &payload).await.unwrap_err();
        assert!(matches!(err, DispatchError::Request(_)));
    }
}
