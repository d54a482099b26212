//! Core data models for the Cloud Foundry, destination and html5-apps-repo APIs
//!
//! This module contains the resource types returned by the Cloud Foundry v3 API
//! and by the service APIs reached through service key credentials, together with
//! the clients that fetch them.

pub mod cf;
pub mod destination;
pub mod html5;
pub mod paging;
pub mod transport;
pub mod uaa;

#[cfg(test)]
pub(crate) mod testing;

pub use cf::CfClient;
pub use paging::{fetch_all, Page};
pub use transport::{ApiError, ApiRequest, ApiResponse, HttpTransport, TlsOptions, Transport};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Service offering available in the marketplace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Offering name, e.g. `html5-apps-repo` or `destination`
    pub name: String,
    /// Offering GUID
    pub guid: String,
}

/// Plan of a service offering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePlan {
    /// Plan name, e.g. `app-runtime` or `lite`
    pub name: String,
    /// Plan GUID
    pub guid: String,
}

/// Last operation executed on a service instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastOperation {
    /// Operation type (`create`, `update`, `delete`)
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Operation state (`initial`, `in progress`, `succeeded`, `failed`)
    #[serde(default)]
    pub state: String,
}

impl LastOperation {
    /// Whether the instance failed to be deleted and may be broken
    pub fn is_failed_delete(&self) -> bool {
        self.kind == "delete" && self.state == "failed"
    }
}

/// Service instance in a space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub name: String,
    pub guid: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub last_operation: LastOperation,
}

/// UAA section of service key credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UaaCredentials {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub clientid: Option<String>,
    #[serde(default)]
    pub clientsecret: Option<String>,
    #[serde(default)]
    pub identityzone: Option<String>,
}

/// Credentials of a service key
///
/// html5-apps-repo keys carry the OAuth client in a nested `uaa` section, while
/// destination service keys carry it at the top level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Base URL of the service API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Token endpoint base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clientid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clientsecret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identityzone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uaa: Option<UaaCredentials>,
}

/// Service key (credential binding of type `key`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceKey {
    pub name: String,
    pub guid: String,
    /// Filled from the binding details endpoint
    #[serde(default)]
    pub credentials: Credentials,
}

/// Body of `/v3/service_credential_bindings/:guid/details`
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceKeyDetails {
    #[serde(default)]
    pub credentials: Credentials,
}

/// Hyperlink inside a v3 resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub href: Option<String>,
}

/// Error entry attached to a failed job
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobError {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Asynchronous Cloud Foundry job
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub guid: String,
    /// `PROCESSING`, `POLLING`, `COMPLETE` or `FAILED`
    pub state: String,
    #[serde(default)]
    pub links: HashMap<String, Link>,
    #[serde(default)]
    pub errors: Vec<JobError>,
}

impl Job {
    /// Returns the href of the named link, if present
    pub fn link(&self, name: &str) -> Option<&str> {
        self.links.get(name).and_then(|link| link.href.as_deref())
    }
}

/// Cloud Foundry application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    pub guid: String,
}

/// Body of `/v3/apps/:guid/env`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppEnvironment {
    #[serde(default)]
    pub system_env_json: serde_json::Value,
    #[serde(default)]
    pub application_env_json: serde_json::Value,
    #[serde(default)]
    pub environment_variables: serde_json::Map<String, serde_json::Value>,
}

impl AppEnvironment {
    /// Credentials of the first bound service of `service` label with the given plan
    pub fn bound_credentials(&self, service: &str, plan: &str) -> Option<Credentials> {
        self.system_env_json
            .get("VCAP_SERVICES")?
            .get(service)?
            .as_array()?
            .iter()
            .find(|binding| binding.get("plan").and_then(|p| p.as_str()) == Some(plan))
            .and_then(|binding| binding.get("credentials"))
            .and_then(|credentials| serde_json::from_value(credentials.clone()).ok())
    }
}

/// Destination exposed by the destination service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationApp {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Description", default)]
    pub description: String,
    #[serde(rename = "ProxyType", default)]
    pub proxy_type: String,
    #[serde(rename = "URL", default)]
    pub url: String,
}

impl DestinationApp {
    /// Whether the destination points to an on-premise system through Cloud Connector
    pub fn is_on_premise(&self) -> bool {
        self.proxy_type == "OnPremise"
    }
}

/// HTML5 application stored in html5-apps-repo
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Html5App {
    #[serde(default)]
    pub application_name: String,
    #[serde(default)]
    pub application_version: String,
    #[serde(default)]
    pub app_host_id: String,
    #[serde(default)]
    pub changed_on: String,
    #[serde(default)]
    pub is_default: bool,
}
