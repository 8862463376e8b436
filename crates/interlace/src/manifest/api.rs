//! Access to the deployment platform's managed-resources endpoint.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::config::ArgocdSettings;
use crate::error::RetrievalError;

/// Source of an application's desired state.
#[async_trait]
pub trait DeploymentApi: Send + Sync {
    /// Returns the managed-resources document for `app_name`.
    async fn managed_resources(&self, app_name: &str) -> Result<Value, RetrievalError>;
}

/// Argo CD REST client.
pub struct ArgoCdClient {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
}

impl ArgoCdClient {
    pub fn new(settings: &ArgocdSettings) -> Result<Self, RetrievalError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(settings.insecure_tls)
            .build()
            .map_err(|e| RetrievalError::Http {
                url: settings.api_base_url.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            token: SecretString::from(settings.token.expose_secret()),
        })
    }

    fn managed_resources_url(&self, app_name: &str) -> String {
        format!("{}/{}/managed-resources", self.base_url, app_name)
    }
}

#[async_trait]
impl DeploymentApi for ArgoCdClient {
    async fn managed_resources(&self, app_name: &str) -> Result<Value, RetrievalError> {
        let url = self.managed_resources_url(app_name);
        let http_err = |e: reqwest::Error| RetrievalError::Http {
            url: url.clone(),
            message: e.to_string(),
        };

        let response = self
            .http
            .get(&url)
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(http_err)?
            .error_for_status()
            .map_err(http_err)?;

        response.json::<Value>().await.map_err(|e| RetrievalError::Response {
            url: url.clone(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_managed_resources_url() {
        let settings = ArgocdSettings {
            api_base_url: "https://argocd.example/api/v1/applications/".to_string(),
            token: SecretString::from("t"),
            namespace: "argocd".to_string(),
            insecure_tls: false,
        };
        let client = ArgoCdClient::new(&settings).unwrap();
        assert_eq!(
            client.managed_resources_url("guestbook"),
            "https://argocd.example/api/v1/applications/guestbook/managed-resources"
        );
    }
}
