//! HTTP client for the monitor API.

pub mod types;

use reqwest::Url;
use serde::de::DeserializeOwned;

use crate::app_event::AppEvent;
use crate::config::DEFAULT_API_BIND;
use types::{AcknowledgeResponse, MonitorState};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid API base URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Client for a daemon on the default local address.
    pub fn new() -> Self {
        Self::with_base_url(format!("http://{DEFAULT_API_BIND}"))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_monitor(&self) -> Result<MonitorState> {
        let response = self.http.get(self.url("/monitor")?).send().await?;
        Self::json(response).await
    }

    pub async fn start(&self) -> Result<MonitorState> {
        self.post_json("/monitor/start").await
    }

    pub async fn stop(&self) -> Result<MonitorState> {
        self.post_json("/monitor/stop").await
    }

    /// Returns true if a check-in window was open.
    pub async fn acknowledge(&self) -> Result<bool> {
        let response: AcknowledgeResponse = self.post_json("/monitor/acknowledge").await?;
        Ok(response.resolved)
    }

    pub async fn trigger_sos(&self) -> Result<()> {
        self.http
            .post(self.url("/sos")?)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn drain_events(&self) -> Result<Vec<AppEvent>> {
        self.post_json("/events/drain").await
    }

    fn url(&self, path: &str) -> Result<Url> {
        let raw = format!("{}/api/v0{path}", self.base_url);
        Url::parse(&raw).map_err(|e| ClientError::InvalidUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.http.post(self.url(path)?).send().await?;
        Self::json(response).await
    }

    async fn json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        Ok(response.error_for_status()?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_default_to_local_daemon() {
        let client = Client::new();

        assert_eq!(client.base_url(), "http://127.0.0.1:7786");
        assert_eq!(
            client.url("/monitor").unwrap().as_str(),
            "http://127.0.0.1:7786/api/v0/monitor"
        );
    }

    #[test]
    fn should_strip_trailing_slash() {
        let client = Client::with_base_url("http://phone.local:9000/");

        assert_eq!(
            client.url("/sos").unwrap().as_str(),
            "http://phone.local:9000/api/v0/sos"
        );
    }

    #[test]
    fn should_reject_malformed_base_url() {
        let client = Client::with_base_url("not a url");

        assert!(matches!(
            client.url("/monitor"),
            Err(ClientError::InvalidUrl { .. })
        ));
    }
}
