//! Blocking REST provider.
//!
//! Every call is a single HTTP request; waiting on async operations is left
//! to [`converge::wait_for_completion`], which polls through
//! [`Provider::poll_operation`].

use crate::wire::{
    InstanceView, ResourceEnvelope, operation_status, status_error, transport_error,
};
use converge::{
    InstanceStatus, ObservedState, OperationHandle, OperationStatus, Provider, ResourceId, Result,
    UpdatePayload,
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use ureq::Agent;
use ureq::http::Response;

const ASYNC_OPERATION_HEADER: &str = "Azure-AsyncOperation";
const LOCATION_HEADER: &str = "Location";
const USER_AGENT: &str = concat!("vmconverge/", env!("CARGO_PKG_VERSION"));

/// Settings for [`ArmProvider`]
#[derive(Debug, Clone)]
pub struct ArmConfig {
    /// Base URL resource ids are appended to
    pub endpoint: String,
    /// Value of the `api-version` query parameter
    pub api_version: String,
    /// Bearer token, if the endpoint needs one
    pub token: Option<String>,
    pub request_timeout: Duration,
}

impl ArmConfig {
    pub fn new(endpoint: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_version: api_version.into(),
            token: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Read the bearer token from environment variable `var`.
    pub fn with_token_from_env(mut self, var: &str) -> std::result::Result<Self, ConfigError> {
        let token = std::env::var(var).map_err(|_| ConfigError::MissingToken {
            var: var.to_string(),
        })?;
        if token.trim().is_empty() {
            return Err(ConfigError::MissingToken {
                var: var.to_string(),
            });
        }
        self.token = Some(token);
        Ok(self)
    }
}

/// Errors building an [`ArmProvider`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {var} is not set or empty")]
    MissingToken { var: String },

    #[error("endpoint must be an http(s) URL: {endpoint}")]
    InvalidEndpoint { endpoint: String },
}

/// [`Provider`] over an ARM-style REST API.
pub struct ArmProvider {
    agent: Agent,
    config: ArmConfig,
}

impl ArmProvider {
    pub fn new(config: ArmConfig) -> std::result::Result<Self, ConfigError> {
        if !(config.endpoint.starts_with("https://") || config.endpoint.starts_with("http://")) {
            return Err(ConfigError::InvalidEndpoint {
                endpoint: config.endpoint,
            });
        }
        let agent: Agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(config.request_timeout))
            .build()
            .into();
        Ok(Self { agent, config })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// URL for `id` plus an optional action suffix.
    fn resource_url(&self, id: &ResourceId, action: Option<&str>) -> String {
        resource_url(&self.config.endpoint, &self.config.api_version, id, action)
    }

    fn authorization(&self) -> Option<String> {
        self.config.token.as_ref().map(|t| format!("Bearer {t}"))
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, id: &ResourceId) -> Result<T> {
        let (_, body) = self.get(url, id)?;
        Ok(serde_json::from_str(&body)?)
    }

    /// GET `url`, returning the success status and raw body.
    fn get(&self, url: &str, id: &ResourceId) -> Result<(u16, String)> {
        log::debug!("GET {url}");
        let mut request = self
            .agent
            .get(url)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT);
        if let Some(auth) = self.authorization() {
            request = request.header("Authorization", &auth);
        }
        let response = request.call().map_err(|e| transport_error(&e))?;
        read_success(response, id)
    }

    /// Issue a mutating call and turn the response into an operation handle.
    fn mutate(
        &self,
        method: &str,
        id: &ResourceId,
        action: Option<&str>,
        payload: Option<&UpdatePayload>,
        operation: String,
    ) -> Result<OperationHandle> {
        let url = self.resource_url(id, action);
        log::debug!("{method} {url}");
        let auth = self.authorization();

        let result = match payload {
            Some(payload) => {
                let mut request = self
                    .agent
                    .patch(&url)
                    .header("Accept", "application/json")
                    .header("User-Agent", USER_AGENT);
                if let Some(auth) = &auth {
                    request = request.header("Authorization", auth);
                }
                request.send_json(payload)
            }
            None => {
                let mut request = self
                    .agent
                    .post(&url)
                    .header("Accept", "application/json")
                    .header("User-Agent", USER_AGENT);
                if let Some(auth) = &auth {
                    request = request.header("Authorization", auth);
                }
                request.send_empty()
            }
        };
        let response = result.map_err(|e| transport_error(&e))?;
        let location = operation_location(&response);
        let (status, _) = read_success(response, id)?;
        log::debug!("{operation}: accepted (HTTP {status})");

        Ok(match location {
            Some(location) => OperationHandle::pending(id.clone(), operation, location),
            None => OperationHandle::completed(id.clone(), operation),
        })
    }
}

/// Read the body, mapping non-2xx statuses to errors.
fn read_success(mut response: Response<ureq::Body>, id: &ResourceId) -> Result<(u16, String)> {
    let status = response.status().as_u16();
    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| transport_error(&e))?;
    if (200..300).contains(&status) {
        Ok((status, body))
    } else {
        Err(status_error(status, id, &body))
    }
}

/// Async-operation URL, preferring `Azure-AsyncOperation` over `Location`.
fn operation_location(response: &Response<ureq::Body>) -> Option<String> {
    [ASYNC_OPERATION_HEADER, LOCATION_HEADER]
        .iter()
        .find_map(|name| response.headers().get(*name)?.to_str().ok())
        .map(str::to_string)
}

/// Join endpoint, id and action and append `api-version`.
pub fn resource_url(endpoint: &str, api_version: &str, id: &ResourceId, action: Option<&str>) -> String {
    let base = endpoint.trim_end_matches('/');
    let path = id.as_str().trim_matches('/');
    match action {
        Some(action) => format!("{base}/{path}/{action}?api-version={api_version}"),
        None => format!("{base}/{path}?api-version={api_version}"),
    }
}

impl Provider for ArmProvider {
    fn fetch_state(&self, id: &ResourceId) -> Result<ObservedState> {
        let envelope: ResourceEnvelope = self.get_json(&self.resource_url(id, None), id)?;
        Ok(envelope.into())
    }

    fn send_update(&self, id: &ResourceId, payload: &UpdatePayload) -> Result<OperationHandle> {
        self.mutate(
            "PATCH",
            id,
            None,
            Some(payload),
            format!("update {}", id.name()),
        )
    }

    fn power_off(&self, id: &ResourceId) -> Result<OperationHandle> {
        self.mutate(
            "POST",
            id,
            Some("powerOff"),
            None,
            format!("shut down {}", id.name()),
        )
    }

    fn deallocate(&self, id: &ResourceId) -> Result<OperationHandle> {
        self.mutate(
            "POST",
            id,
            Some("deallocate"),
            None,
            format!("deallocate {}", id.name()),
        )
    }

    fn start(&self, id: &ResourceId) -> Result<OperationHandle> {
        self.mutate(
            "POST",
            id,
            Some("start"),
            None,
            format!("start {}", id.name()),
        )
    }

    fn list_instance_statuses(&self, id: &ResourceId) -> Result<Vec<InstanceStatus>> {
        let view: InstanceView = self.get_json(&self.resource_url(id, Some("instanceView")), id)?;
        Ok(view.statuses)
    }

    fn poll_operation(&self, handle: &OperationHandle) -> Result<OperationStatus> {
        let Some(location) = handle.location.as_deref() else {
            return Ok(OperationStatus::Succeeded);
        };
        let (status, body) = self.get(location, &handle.resource)?;
        Ok(operation_status(status, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_url() {
        let id = ResourceId::new("/subscriptions/s1/resourceGroups/rg/providers/Compute/virtualMachines/web-0");
        assert_eq!(
            resource_url("https://management.example.com/", "2024-07-01", &id, None),
            "https://management.example.com/subscriptions/s1/resourceGroups/rg/providers/Compute/virtualMachines/web-0?api-version=2024-07-01"
        );
        assert_eq!(
            resource_url("https://management.example.com", "2024-07-01", &id, Some("deallocate")),
            "https://management.example.com/subscriptions/s1/resourceGroups/rg/providers/Compute/virtualMachines/web-0/deallocate?api-version=2024-07-01"
        );
    }

    #[test]
    fn test_rejects_non_http_endpoint() {
        let err = ArmProvider::new(ArmConfig::new("ftp://example.com", "2024-07-01"))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::InvalidEndpoint { .. }));
        assert!(ArmProvider::new(ArmConfig::new("https://example.com", "2024-07-01")).is_ok());
    }

    #[test]
    fn test_missing_token_env() {
        let err = ArmConfig::new("https://example.com", "2024-07-01")
            .with_token_from_env("VMCONVERGE_TEST_TOKEN_THAT_IS_NEVER_SET")
            .unwrap_err();
        assert!(err.to_string().contains("VMCONVERGE_TEST_TOKEN_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn test_completed_handle_polls_as_succeeded() {
        let provider = ArmProvider::new(ArmConfig::new("https://example.com", "2024-07-01")).unwrap();
        let handle = OperationHandle::completed("/vms/web-0".into(), "start web-0");
        assert_eq!(provider.poll_operation(&handle).unwrap(), OperationStatus::Succeeded);
    }
}
