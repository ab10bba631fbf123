//! HAProxy Dataplane API client.
//!
//! The readiness probe and the backend queries share one base URL and one
//! set of credentials, so they live behind a single client. The probe is
//! deliberately unauthenticated: an unmapped endpoint answers 404 while a
//! live Dataplane API answers 401 or 200, which is exactly the distinction
//! the readiness policy classifies.

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::HarnessConfig;
use crate::errors::{HarnessError, HarnessResult};

/// One server entry under a backend. Only `name` is significant to the
/// harness; remaining fields are kept for diagnostics.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendServer {
    pub name: String,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

/// Client for the proxy's configuration API.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    http: Client,
    base_url: String,
    user: String,
    password: String,
}

impl ProxyClient {
    pub fn new(config: &HarnessConfig) -> HarnessResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            base_url: config.proxy_base_url.trim_end_matches('/').to_string(),
            user: config.proxy_user.clone(),
            password: config.proxy_password.clone(),
        })
    }

    /// Status of the configuration-version endpoint, for the readiness
    /// policy to classify. Transport errors (connection refused while the
    /// proxy is still starting) surface as `Err` for the caller to retry.
    pub fn configuration_version_status(&self) -> HarnessResult<StatusCode> {
        let url = format!("{}/configuration/version", self.base_url);
        let response = self.http.get(&url).send()?;
        Ok(response.status())
    }

    /// Server list of a named backend.
    pub fn backend_servers(&self, backend: &str) -> HarnessResult<Vec<BackendServer>> {
        let url = format!("{}/configuration/backends/{backend}/servers", self.base_url);
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.user, Some(&self.password))
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(HarnessError::ProxyApi {
                url,
                status: status.as_u16(),
            });
        }
        Ok(response.json()?)
    }

    /// Whether `backend` currently lists a server named `server`.
    pub fn has_backend_server(&self, backend: &str, server: &str) -> HarnessResult<bool> {
        let servers = self.backend_servers(backend)?;
        Ok(servers.iter().any(|s| s.name == server))
    }
}
