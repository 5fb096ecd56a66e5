//! HTTP implementation of the host API collaborators.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::ActionSource,
    protocol::{
        ConnectRequest, ConnectionCommand, ConnectionOptionsResponse, PrinterStateSnapshot,
        PrinterStatusResponse, StartupNotices, StartupResponse, SystemCommandsResponse,
    },
};
use tracing::debug;
use url::Url;

use crate::{error::RequestError, ConnectionApi, SystemApi};

const API_KEY_HEADER: &str = "X-Api-Key";
const CONNECTION_PATH: &str = "api/connection";
const SYSTEM_COMMANDS_PATH: &str = "api/system/commands";
const SYSTEM_STARTUP_PATH: &str = "api/system/startup";
const PRINTER_PATH: &str = "api/printer?exclude=temperature,sd";

pub struct HttpApiClient {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpApiClient {
    pub fn new(
        server_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RequestError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| RequestError::Transport {
                url: server_url.to_string(),
                source,
            })?;
        Self::with_client(http, server_url, api_key)
    }

    pub fn with_client(
        http: Client,
        server_url: &str,
        api_key: Option<String>,
    ) -> Result<Self, RequestError> {
        let trimmed = server_url.trim();
        // Url::join drops the last path segment unless the base ends with a slash.
        let base_url = if trimmed.ends_with('/') {
            Url::parse(trimmed)?
        } else {
            Url::parse(&format!("{trimmed}/"))?
        };
        Ok(Self {
            http,
            base_url,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Current printer state. The host answers 409 while no printer is
    /// connected, which reads as the closed default.
    pub async fn get_printer_state(&self) -> Result<PrinterStateSnapshot, RequestError> {
        match self.get_json::<PrinterStatusResponse>(PRINTER_PATH).await {
            Ok(response) => Ok(response.state),
            Err(RequestError::Status { status: 409, .. }) => Ok(PrinterStateSnapshot {
                text: "Offline".to_string(),
                ..PrinterStateSnapshot::default()
            }),
            Err(err) => Err(err),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, RequestError> {
        Ok(self.base_url.join(path)?)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, url: &Url) -> Result<Response, RequestError> {
        let response = builder
            .send()
            .await
            .map_err(|source| RequestError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "host api response");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RequestError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RequestError> {
        let url = self.endpoint(path)?;
        let response = self
            .send(self.request(Method::GET, url.clone()), &url)
            .await?;
        let body = response
            .text()
            .await
            .map_err(|source| RequestError::Transport {
                url: url.to_string(),
                source,
            })?;
        serde_json::from_str(&body).map_err(|source| RequestError::Decode {
            url: url.to_string(),
            source,
        })
    }

    async fn post_json<B: Serialize + ?Sized>(&self, url: Url, body: &B) -> Result<(), RequestError> {
        self.send(self.request(Method::POST, url.clone()).json(body), &url)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConnectionApi for HttpApiClient {
    async fn get_options(&self) -> Result<ConnectionOptionsResponse, RequestError> {
        self.get_json(CONNECTION_PATH).await
    }

    async fn connect(&self, request: ConnectRequest) -> Result<(), RequestError> {
        let url = self.endpoint(CONNECTION_PATH)?;
        self.post_json(url, &ConnectionCommand::Connect(request))
            .await
    }

    async fn disconnect(&self) -> Result<(), RequestError> {
        let url = self.endpoint(CONNECTION_PATH)?;
        self.post_json(url, &ConnectionCommand::Disconnect).await
    }
}

#[async_trait]
impl SystemApi for HttpApiClient {
    async fn get_commands(&self) -> Result<SystemCommandsResponse, RequestError> {
        self.get_json(SYSTEM_COMMANDS_PATH).await
    }

    async fn get_startup_notices(&self) -> Result<StartupNotices, RequestError> {
        let response: StartupResponse = self.get_json(SYSTEM_STARTUP_PATH).await?;
        Ok(response.startup)
    }

    async fn execute_command(
        &self,
        source: ActionSource,
        action: &str,
    ) -> Result<(), RequestError> {
        let mut url = self.endpoint(SYSTEM_COMMANDS_PATH)?;
        url.path_segments_mut()
            .map_err(|_| {
                RequestError::Unavailable(format!("cannot append command path to {}", self.base_url))
            })?
            .push(source.as_str())
            .push(action);
        self.post_json(url, &serde_json::json!({})).await
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
