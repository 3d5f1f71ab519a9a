//! HTTP client for the lifecycle control surface.
//!
//! Configuration is via environment variables:
//! - `CLC_URL` - Base URL (default: `http://localhost:17020/api/v1`)

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

use crate::api::{ComponentDetail, ToggleResponse};
use crate::models::*;
use crate::progress::ActiveTask;

/// Default URL for a local server.
const DEFAULT_URL: &str = "http://localhost:17020/api/v1";

/// HTTP client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Server error: {0}")]
    Server(String),
}

impl ClientError {
    fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::NOT_FOUND => Self::NotFound(body),
            StatusCode::BAD_REQUEST => Self::BadRequest(body),
            StatusCode::CONFLICT => Self::Conflict(body),
            _ => Self::Server(format!("{}: {}", status, body)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleClient {
    base_url: String,
    client: Client,
}

impl LifecycleClient {
    /// Create client from environment variables.
    pub fn from_env() -> Self {
        let base_url = std::env::var("CLC_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        Self::new(base_url)
    }

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client.request(method, &url)
    }

    /// Handle response, converting HTTP errors to ClientError.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::from_status(status, body))
        }
    }

    /// Handle response that may return empty body (204 No Content).
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<(), ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::from_status(status, body))
        }
    }

    // ============================================================
    // Namespaces
    // ============================================================

    pub async fn list_namespaces(&self) -> Result<Vec<NamespaceView>, ClientError> {
        let response = self.request(Method::GET, "/namespaces").send().await?;
        self.handle_response(response).await
    }

    /// Get the rendered namespace tree.
    pub async fn tree(&self) -> Result<String, ClientError> {
        let response = self.request(Method::GET, "/tree").send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(ClientError::from_status(status, body))
        }
    }

    // ============================================================
    // Components
    // ============================================================

    pub async fn create_component(
        &self,
        namespace: &str,
        input: &CreateComponentInput,
    ) -> Result<Component, ClientError> {
        let response = self
            .request(Method::POST, &format!("/namespaces/{}/components", namespace))
            .json(input)
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn get_component(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ComponentDetail, ClientError> {
        let response = self
            .request(
                Method::GET,
                &format!("/namespaces/{}/components/{}", namespace, name),
            )
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn delete_component(&self, namespace: &str, name: &str) -> Result<(), ClientError> {
        let response = self
            .request(
                Method::DELETE,
                &format!("/namespaces/{}/components/{}", namespace, name),
            )
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    /// Start the feature if it is stopped, stop it if it is running.
    pub async fn toggle(
        &self,
        namespace: &str,
        name: &str,
        feature: ComponentFeature,
    ) -> Result<ToggleResponse, ClientError> {
        let response = self
            .request(
                Method::POST,
                &format!(
                    "/namespaces/{}/components/{}/features/{}/toggle",
                    namespace, name, feature
                ),
            )
            .send()
            .await?;
        self.handle_response(response).await
    }

    // ============================================================
    // Tasks
    // ============================================================

    pub async fn list_tasks(&self) -> Result<Vec<ActiveTask>, ClientError> {
        let response = self.request(Method::GET, "/tasks").send().await?;
        self.handle_response(response).await
    }

    pub async fn cancel_task(&self, id: Uuid) -> Result<(), ClientError> {
        let response = self
            .request(Method::DELETE, &format!("/tasks/{}", id))
            .send()
            .await?;
        self.handle_empty_response(response).await
    }
}
