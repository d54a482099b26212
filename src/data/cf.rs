//! Cloud Foundry v3 API client
//!
//! Listing operations go through [`fetch_all`]; service and plan lists are
//! memoized in the [`ResponseCache`] passed by the caller.

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use urlencoding::encode;

use super::paging::fetch_all;
use super::transport::{ApiError, ApiRequest, ApiResponse, Transport};
use super::{
    AppEnvironment, Application, Job, Service, ServiceInstance, ServiceKey, ServiceKeyDetails,
    ServicePlan,
};
use crate::cache::{service_plans_key, services_key, CachedValue, ResponseCache};

/// Delay between two polls of an asynchronous job
const JOB_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Number of polls before a job is considered stuck
const JOB_POLL_ATTEMPTS: u32 = 120;

/// Name and GUID part of any v3 resource
#[derive(Debug, Deserialize)]
struct NamedResource {
    name: String,
    guid: String,
}

/// Client for the Cloud Foundry v3 API
#[derive(Debug, Clone)]
pub struct CfClient<T> {
    transport: T,
    job_poll_interval: Duration,
}

impl<T: Transport> CfClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            job_poll_interval: JOB_POLL_INTERVAL,
        }
    }

    /// Overrides the delay between job polls
    pub fn with_job_poll_interval(mut self, interval: Duration) -> Self {
        self.job_poll_interval = interval;
        self
    }

    /// Transport used for requests, also usable for service APIs
    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn get_json<R: serde::de::DeserializeOwned>(&self, url: &str) -> Result<R, ApiError> {
        self.transport
            .send(ApiRequest::get(url))
            .await?
            .expect_status(&[200], url)?
            .json()
    }

    /// Lists marketplace service offerings
    pub async fn get_services(&self, cache: &ResponseCache) -> Result<Vec<Service>, ApiError> {
        if let Some(services) = cache.services() {
            tracing::trace!("Returning cached list of services");
            return Ok(services);
        }

        let services = fetch_all(&self.transport, "/v3/service_offerings", |s: Service| s).await?;
        cache.set(services_key(), CachedValue::Services(services.clone()));

        Ok(services)
    }

    /// Lists plans of a service offering
    pub async fn get_service_plans(
        &self,
        cache: &ResponseCache,
        service_guid: &str,
    ) -> Result<Vec<ServicePlan>, ApiError> {
        if let Some(plans) = cache.service_plans(service_guid) {
            tracing::trace!(service_guid, "Returning cached list of service plans");
            return Ok(plans);
        }

        let url = format!(
            "/v3/service_plans?service_offering_guids={}",
            encode(service_guid)
        );
        let plans = fetch_all(&self.transport, &url, |p: ServicePlan| p).await?;
        cache.set(
            service_plans_key(service_guid),
            CachedValue::ServicePlans(plans.clone()),
        );

        Ok(plans)
    }

    /// Lists instances of the given plans in a space
    pub async fn get_service_instances(
        &self,
        space_guid: &str,
        plans: &[ServicePlan],
    ) -> Result<Vec<ServiceInstance>, ApiError> {
        let plan_guids: Vec<_> = plans.iter().map(|plan| encode(&plan.guid)).collect();
        let url = format!(
            "/v3/service_instances?space_guids={}&service_plan_guids={}",
            encode(space_guid),
            plan_guids.join(",")
        );
        fetch_all(&self.transport, &url, |i: ServiceInstance| i).await
    }

    /// Finds a service instance of a space by name
    pub async fn get_service_instance_by_name(
        &self,
        space_guid: &str,
        name: &str,
    ) -> Result<ServiceInstance, ApiError> {
        let url = format!(
            "/v3/service_instances?names={}&space_guids={}",
            encode(name),
            encode(space_guid)
        );
        fetch_all(&self.transport, &url, |i: ServiceInstance| i)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound(format!("service instance with name '{}' not found", name)))
    }

    pub async fn get_service_instance_by_url(&self, url: &str) -> Result<ServiceInstance, ApiError> {
        self.get_json(url).await
    }

    /// Reads a service key and its credentials from the key resource URL
    pub async fn get_service_key_by_url(&self, url: &str) -> Result<ServiceKey, ApiError> {
        let binding: NamedResource = self.get_json(url).await?;
        let details = self.get_service_key_details(&binding.guid).await?;
        Ok(ServiceKey {
            name: binding.name,
            guid: binding.guid,
            credentials: details.credentials,
        })
    }

    /// Lists the keys of a service instance together with their credentials
    ///
    /// Keys keep the server order, so the last one is the most recently created.
    pub async fn get_service_keys(&self, instance_guid: &str) -> Result<Vec<ServiceKey>, ApiError> {
        let url = format!(
            "/v3/service_credential_bindings?type=key&service_instance_guids={}",
            encode(instance_guid)
        );
        let mut keys = fetch_all(&self.transport, &url, |binding: NamedResource| ServiceKey {
            name: binding.name,
            guid: binding.guid,
            credentials: Default::default(),
        })
        .await?;

        for key in &mut keys {
            key.credentials = self.get_service_key_details(&key.guid).await?.credentials;
        }

        Ok(keys)
    }

    pub async fn get_service_key_details(&self, key_guid: &str) -> Result<ServiceKeyDetails, ApiError> {
        self.get_json(&format!(
            "/v3/service_credential_bindings/{}/details",
            key_guid
        ))
        .await
    }

    /// Creates a managed service instance and waits until it is ready
    ///
    /// An empty `name` becomes `<plan>-<timestamp>`; a name ending with `-` gets
    /// `<plan>-<timestamp>` appended.
    pub async fn create_service_instance(
        &self,
        space_guid: &str,
        plan: &ServicePlan,
        parameters: Option<&Value>,
        name: &str,
    ) -> Result<ServiceInstance, ApiError> {
        let name = instance_name(name, &plan.name, Utc::now().timestamp());
        let mut body = json!({
            "type": "managed",
            "name": name,
            "relationships": {
                "space": {"data": {"guid": space_guid}},
                "service_plan": {"data": {"guid": plan.guid}}
            }
        });
        if let Some(parameters) = parameters {
            body["parameters"] = parameters.clone();
        }

        let url = "/v3/service_instances";
        tracing::debug!(name = %name, plan = %plan.name, "Creating service instance");
        let response = self
            .transport
            .send(ApiRequest::post(url).json(body))
            .await?
            .expect_status(&[202], url)?;

        let job = self.poll_job(job_location(&response)?).await?;
        let instance_url = job.link("service_instances").ok_or(ApiError::MissingLink {
            resource: "job",
            link: "service_instances",
        })?;

        self.get_service_instance_by_url(instance_url).await
    }

    /// Creates a service key for an instance and returns it with its credentials
    pub async fn create_service_key(
        &self,
        instance: &ServiceInstance,
        parameters: Option<&Value>,
    ) -> Result<ServiceKey, ApiError> {
        let name = format!("{}-key-{}", instance.name, Utc::now().timestamp());
        let mut body = json!({
            "type": "key",
            "name": name,
            "relationships": {
                "service_instance": {"data": {"guid": instance.guid}}
            }
        });
        if let Some(parameters) = parameters {
            body["parameters"] = parameters.clone();
        }

        let url = "/v3/service_credential_bindings";
        tracing::debug!(name = %name, instance = %instance.name, "Creating service key");
        let response = self
            .transport
            .send(ApiRequest::post(url).json(body))
            .await?
            .expect_status(&[201, 202], url)?;

        if response.status == 202 {
            let job = self.poll_job(job_location(&response)?).await?;
            let binding_url = job
                .link("service_credential_bindings")
                .ok_or(ApiError::MissingLink {
                    resource: "job",
                    link: "service_credential_bindings",
                })?;
            return self.get_service_key_by_url(binding_url).await;
        }

        let binding: NamedResource = response.json()?;
        let details = self.get_service_key_details(&binding.guid).await?;
        Ok(ServiceKey {
            name: binding.name,
            guid: binding.guid,
            credentials: details.credentials,
        })
    }

    pub async fn delete_service_key(&self, key_guid: &str, retries: u32) -> Result<(), ApiError> {
        self.delete_with_retries(&format!("/v3/service_credential_bindings/{}", key_guid), retries)
            .await
    }

    pub async fn delete_service_instance(&self, instance_guid: &str, retries: u32) -> Result<(), ApiError> {
        self.delete_with_retries(&format!("/v3/service_instances/{}", instance_guid), retries)
            .await
    }

    /// Deletes a resource, trying at most `retries` times
    async fn delete_with_retries(&self, url: &str, retries: u32) -> Result<(), ApiError> {
        let mut attempt = 1;
        loop {
            match self.delete_once(url).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < retries => {
                    tracing::warn!(url, attempt, "Delete failed, retrying: {}", e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn delete_once(&self, url: &str) -> Result<(), ApiError> {
        let response = self
            .transport
            .send(ApiRequest::delete(url))
            .await?
            .expect_status(&[202, 204], url)?;
        if response.status == 202 {
            if let Some(location) = &response.location {
                self.poll_job(location).await?;
            }
        }
        Ok(())
    }

    /// Waits for an asynchronous job to complete
    pub async fn poll_job(&self, url: &str) -> Result<Job, ApiError> {
        for _ in 0..JOB_POLL_ATTEMPTS {
            let job: Job = self.get_json(url).await?;
            match job.state.as_str() {
                "COMPLETE" => return Ok(job),
                "FAILED" => {
                    let message = job
                        .errors
                        .iter()
                        .filter_map(|e| e.detail.as_deref().or(e.title.as_deref()))
                        .collect::<Vec<_>>()
                        .join("; ");
                    return Err(ApiError::JobFailed {
                        url: url.to_string(),
                        message,
                    });
                }
                state => {
                    tracing::trace!(url, state, "Job still running");
                    tokio::time::sleep(self.job_poll_interval).await;
                }
            }
        }
        Err(ApiError::JobTimeout(url.to_string()))
    }

    /// Finds an application of a space by name
    pub async fn get_application(&self, space_guid: &str, name: &str) -> Result<Application, ApiError> {
        let url = format!(
            "/v3/apps?names={}&space_guids={}",
            encode(name),
            encode(space_guid)
        );
        fetch_all(&self.transport, &url, |app: Application| app)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ApiError::NotFound(format!(
                    "application with name {} does not exist in current organization and space",
                    name
                ))
            })
    }

    pub async fn get_environment(&self, app_guid: &str) -> Result<AppEnvironment, ApiError> {
        self.get_json(&format!("/v3/apps/{}/env", app_guid)).await
    }
}

fn job_location(response: &ApiResponse) -> Result<&str, ApiError> {
    response.location.as_deref().ok_or(ApiError::MissingLink {
        resource: "response",
        link: "Location",
    })
}

/// Applies the naming rules for new service instances
fn instance_name(requested: &str, plan_name: &str, timestamp: i64) -> String {
    if requested.is_empty() {
        format!("{}-{}", plan_name, timestamp)
    } else if requested.len() > 1 && requested.ends_with('-') {
        format!("{}{}-{}", requested, plan_name, timestamp)
    } else {
        requested.to_string()
    }
}
