//! Resolution of the service instances, keys and tokens needed by the commands
//!
//! Reaching the html5-apps-repo or destination APIs takes a chain of lookups:
//! service offering, plan, instance, key, token. Missing instances and keys are
//! created on the way. The resolved HTML5 context is memoized in the response
//! cache so later invocations can skip the whole chain.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{html5_context_key, CachedValue, ResponseCache};
use crate::config::{Settings, Target};
use crate::data::transport::mask_secret;
use crate::data::{
    destination, uaa, ApiError, CfClient, Credentials, DestinationApp, Service, ServiceInstance,
    ServiceKey, ServicePlan, Transport,
};

/// Plan of html5-apps-repo used to read applications
pub const APP_RUNTIME_PLAN: &str = "app-runtime";
/// Destination service offering name
pub const DESTINATION_SERVICE: &str = "destination";
/// Destination service plan used to read destinations
pub const LITE_PLAN: &str = "lite";
/// Runtime used in application URLs when none is given
pub const DEFAULT_RUNTIME: &str = "cpp";
/// Attempts made when deleting temporary instances and keys
pub const MAX_RETRY_COUNT: u32 = 3;

/// Errors that can occur while resolving a context
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("could not get services: {0}")]
    Services(#[source] ApiError),

    #[error("{0} service is not in the list of available services. Make sure your subaccount has entitlement to use it")]
    ServiceNotFound(String),

    #[error("could not get service plans: {0}")]
    ServicePlans(#[source] ApiError),

    #[error("{service} service does not have a '{plan}' plan")]
    PlanNotFound { service: String, plan: String },

    #[error("could not get service instances for {plan} plan: {source}")]
    ServiceInstances {
        plan: String,
        #[source]
        source: ApiError,
    },

    #[error("could not create service instance of {plan} plan: {source}")]
    CreateInstance {
        plan: String,
        #[source]
        source: ApiError,
    },

    #[error("could not get service keys of {instance} service instance: {source}")]
    ServiceKeys {
        instance: String,
        #[source]
        source: ApiError,
    },

    #[error("service key configuration is not a valid JSON: {0}")]
    KeyParameters(#[source] serde_json::Error),

    #[error("could not create service key of {instance} service instance: {source}")]
    CreateKey {
        instance: String,
        #[source]
        source: ApiError,
    },

    #[error("could not obtain access token: {0}")]
    Token(#[source] ApiError),

    #[error("could not list destinations of {instance} service instance: {source}")]
    Destinations {
        instance: String,
        #[source]
        source: ApiError,
    },

    #[error("could not delete service key {name}: {source}")]
    DeleteKey {
        name: String,
        #[source]
        source: ApiError,
    },

    #[error("could not delete service instance {name}: {source}")]
    DeleteInstance {
        name: String,
        #[source]
        source: ApiError,
    },

    #[error("could not get application {name}: {source}")]
    Application {
        name: String,
        #[source]
        source: ApiError,
    },

    #[error("application {app} is not bound to {service} service {plan} plan")]
    NotBound {
        app: String,
        service: String,
        plan: String,
    },

    #[error("service key has no '{0}' credential needed for runtime URLs")]
    MissingCredential(&'static str),
}

/// Everything needed to call the html5-apps-repo runtime API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Html5Context {
    /// Name of the html5-apps-repo offering
    pub service_name: String,
    pub services: Vec<Service>,
    pub service: Service,
    pub service_plans: Vec<ServicePlan>,
    pub app_runtime_plan: ServicePlan,
    /// Usable app-runtime instances; the last one is in use
    pub app_runtime_instances: Vec<ServiceInstance>,
    /// Instance created during resolution, to be deleted afterwards
    pub created_instance: Option<ServiceInstance>,
    /// Keys of the instance in use; the last one is in use
    pub service_keys: Vec<ServiceKey>,
    /// Key created during resolution, to be deleted afterwards
    pub created_key: Option<ServiceKey>,
    pub access_token: String,
}

impl Html5Context {
    /// Service key whose token is held by the context
    pub fn active_key(&self) -> Option<&ServiceKey> {
        self.service_keys.last()
    }

    /// Base runtime URL of HTML5 applications
    pub fn runtime_url(
        &self,
        runtime: Option<&str>,
        url_override: Option<&str>,
    ) -> Result<String, ContextError> {
        let credentials = self
            .active_key()
            .map(|key| &key.credentials)
            .ok_or(ContextError::MissingCredential("uri"))?;
        runtime_url(credentials, runtime, url_override)
    }
}

/// Builds `https://<identityzone>.<runtime><domain of uri>`
///
/// `url_override` wins when set.
pub fn runtime_url(
    credentials: &Credentials,
    runtime: Option<&str>,
    url_override: Option<&str>,
) -> Result<String, ContextError> {
    if let Some(url) = url_override {
        return Ok(url.to_string());
    }

    let uri = credentials
        .uri
        .as_deref()
        .ok_or(ContextError::MissingCredential("uri"))?;
    let zone = credentials
        .uaa
        .as_ref()
        .and_then(|uaa| uaa.identityzone.as_deref())
        .or(credentials.identityzone.as_deref())
        .ok_or(ContextError::MissingCredential("identityzone"))?;
    let domain = uri
        .find('.')
        .map(|idx| &uri[idx..])
        .ok_or(ContextError::MissingCredential("uri"))?;

    Ok(format!(
        "https://{}.{}{}",
        zone,
        runtime.unwrap_or(DEFAULT_RUNTIME),
        domain
    ))
}

fn find_service(services: &[Service], name: &str) -> Result<Service, ContextError> {
    services
        .iter()
        .find(|service| service.name == name)
        .cloned()
        .ok_or_else(|| ContextError::ServiceNotFound(name.to_string()))
}

fn find_plan(plans: &[ServicePlan], service: &str, plan: &str) -> Result<ServicePlan, ContextError> {
    plans
        .iter()
        .find(|p| p.name == plan)
        .cloned()
        .ok_or_else(|| ContextError::PlanNotFound {
            service: service.to_string(),
            plan: plan.to_string(),
        })
}

fn parse_key_parameters(raw: Option<&str>) -> Result<Option<serde_json::Value>, ContextError> {
    raw.map(|json| {
        tracing::trace!(parameters = json, "Using service key configuration");
        serde_json::from_str(json).map_err(ContextError::KeyParameters)
    })
    .transpose()
}

/// Resolves the HTML5 context of the targeted org and space
///
/// Returns the cached context when there is one. Otherwise finds the app-runtime
/// plan of the html5-apps-repo service, picks the last usable instance (creating
/// one if needed) and its last key (creating one if needed), and obtains a token.
pub async fn resolve_html5_context<T: Transport>(
    client: &CfClient<T>,
    cache: &ResponseCache,
    target: &Target,
    settings: &Settings,
) -> Result<Html5Context, ContextError> {
    if let Some(context) = cache.html5_context(&target.org.guid, &target.space.guid) {
        tracing::trace!("Returning cached HTML5 context");
        return Ok(context);
    }

    let service_name = settings.service_name.clone();

    tracing::trace!("Getting list of services");
    let services = client
        .get_services(cache)
        .await
        .map_err(ContextError::Services)?;
    let service = find_service(&services, &service_name)?;

    tracing::trace!(service = %service_name, guid = %service.guid, "Getting service plans");
    let service_plans = client
        .get_service_plans(cache, &service.guid)
        .await
        .map_err(ContextError::ServicePlans)?;
    let app_runtime_plan = find_plan(&service_plans, &service_name, APP_RUNTIME_PLAN)?;

    let instances = client
        .get_service_instances(&target.space.guid, std::slice::from_ref(&app_runtime_plan))
        .await
        .map_err(|source| ContextError::ServiceInstances {
            plan: APP_RUNTIME_PLAN.to_string(),
            source,
        })?;
    let mut app_runtime_instances: Vec<ServiceInstance> = instances
        .into_iter()
        .filter(|instance| {
            let broken = instance.last_operation.is_failed_delete();
            if broken {
                tracing::trace!(instance = %instance.name, "Service instance is potentially broken and will not be reused");
            }
            !broken
        })
        .collect();

    let mut created_instance = None;
    if app_runtime_instances.is_empty() {
        tracing::trace!(service = %service_name, "Creating service instance of app-runtime plan");
        let instance = client
            .create_service_instance(&target.space.guid, &app_runtime_plan, None, "")
            .await
            .map_err(|source| ContextError::CreateInstance {
                plan: APP_RUNTIME_PLAN.to_string(),
                source,
            })?;
        app_runtime_instances.push(instance.clone());
        created_instance = Some(instance);
    }

    // resolution always leaves at least one instance in the list
    let instance = app_runtime_instances[app_runtime_instances.len() - 1].clone();

    tracing::trace!(instance = %instance.name, "Getting list of service keys");
    let mut service_keys = client
        .get_service_keys(&instance.guid)
        .await
        .map_err(|source| ContextError::ServiceKeys {
            instance: instance.name.clone(),
            source,
        })?;

    let mut created_key = None;
    if service_keys.is_empty() {
        let parameters = parse_key_parameters(settings.app_runtime_key_parameters.as_deref())?;
        tracing::trace!(instance = %instance.name, "Creating service key");
        let key = client
            .create_service_key(&instance, parameters.as_ref())
            .await
            .map_err(|source| ContextError::CreateKey {
                instance: instance.name.clone(),
                source,
            })?;
        service_keys.push(key.clone());
        created_key = Some(key);
    } else {
        tracing::trace!(
            count = service_keys.len(),
            instance = %instance.name,
            "Found service keys, using the last one"
        );
    }

    let key = &service_keys[service_keys.len() - 1];
    let access_token = uaa::get_token(client.transport(), &key.credentials)
        .await
        .map_err(ContextError::Token)?;
    tracing::trace!(key = %key.name, token = %mask_secret(&access_token), "Obtained access token");

    let context = Html5Context {
        service_name,
        services,
        service,
        service_plans,
        app_runtime_plan,
        app_runtime_instances,
        created_instance,
        service_keys,
        created_key,
        access_token,
    };

    cache.set(
        html5_context_key(&target.org.guid, &target.space.guid),
        CachedValue::Html5Context(Box::new(context.clone())),
    );

    Ok(context)
}

/// Deletes the key and instance created while resolving `context`
///
/// Nothing is deleted when the context is kept in a persistent cache.
pub async fn clean_html5_context<T: Transport>(
    client: &CfClient<T>,
    context: &Html5Context,
    persistent_cache: bool,
) -> Result<(), ContextError> {
    if persistent_cache {
        tracing::trace!("Preserving HTML5 context for future use with cache");
        return Ok(());
    }

    if let Some(key) = &context.created_key {
        tracing::trace!(key = %key.name, "Deleting service key");
        client
            .delete_service_key(&key.guid, MAX_RETRY_COUNT)
            .await
            .map_err(|source| ContextError::DeleteKey {
                name: key.name.clone(),
                source,
            })?;
    }

    if let Some(instance) = &context.created_instance {
        tracing::trace!(instance = %instance.name, "Deleting service instance");
        client
            .delete_service_instance(&instance.guid, MAX_RETRY_COUNT)
            .await
            .map_err(|source| ContextError::DeleteInstance {
                name: instance.name.clone(),
                source,
            })?;
        tracing::trace!(instance = %instance.name, "Service instance successfully deleted");
    }

    Ok(())
}

/// Credentials and token of an app-runtime binding of a CF application
#[derive(Debug, Clone)]
pub struct BoundRuntime {
    pub credentials: Credentials,
    pub access_token: String,
}

/// Resolves the app-runtime credentials bound to a Cloud Foundry application
pub async fn resolve_bound_runtime<T: Transport>(
    client: &CfClient<T>,
    target: &Target,
    app_name: &str,
    service_name: &str,
) -> Result<BoundRuntime, ContextError> {
    let app_error = |source| ContextError::Application {
        name: app_name.to_string(),
        source,
    };
    let app = client
        .get_application(&target.space.guid, app_name)
        .await
        .map_err(app_error)?;
    let environment = client.get_environment(&app.guid).await.map_err(app_error)?;

    let credentials = environment
        .bound_credentials(service_name, APP_RUNTIME_PLAN)
        .ok_or_else(|| ContextError::NotBound {
            app: app_name.to_string(),
            service: service_name.to_string(),
            plan: APP_RUNTIME_PLAN.to_string(),
        })?;
    let access_token = uaa::get_token(client.transport(), &credentials)
        .await
        .map_err(ContextError::Token)?;

    Ok(BoundRuntime {
        credentials,
        access_token,
    })
}

/// Which destinations of a destination service instance to list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestinationLevel {
    #[default]
    Instance,
    Subaccount,
}

/// Lists the destinations reachable through destination service instances of the space
///
/// For every destination offering, the instances of its lite plan are tried in
/// order; the first instance with a usable key provides the destinations. A key
/// is created for an instance that has none.
pub async fn discover_destination_apps<T: Transport>(
    client: &CfClient<T>,
    cache: &ResponseCache,
    target: &Target,
    level: DestinationLevel,
) -> Result<Vec<DestinationApp>, ContextError> {
    tracing::trace!("Getting list of services");
    let services = client
        .get_services(cache)
        .await
        .map_err(ContextError::Services)?;
    let destination_services: Vec<&Service> = services
        .iter()
        .filter(|service| service.name == DESTINATION_SERVICE)
        .collect();
    if destination_services.is_empty() {
        return Err(ContextError::ServiceNotFound(DESTINATION_SERVICE.to_string()));
    }

    let mut apps = Vec::new();
    for service in destination_services {
        tracing::trace!(guid = %service.guid, "Getting service plans for destination service");
        let plans = client
            .get_service_plans(cache, &service.guid)
            .await
            .map_err(ContextError::ServicePlans)?;
        let lite_plan = find_plan(&plans, DESTINATION_SERVICE, LITE_PLAN)?;

        let instances = client
            .get_service_instances(&target.space.guid, std::slice::from_ref(&lite_plan))
            .await
            .map_err(|source| ContextError::ServiceInstances {
                plan: LITE_PLAN.to_string(),
                source,
            })?;

        for instance in &instances {
            let mut keys = client
                .get_service_keys(&instance.guid)
                .await
                .map_err(|source| ContextError::ServiceKeys {
                    instance: instance.name.clone(),
                    source,
                })?;
            if keys.is_empty() {
                tracing::trace!(instance = %instance.name, "Creating service key");
                let key = client
                    .create_service_key(instance, None)
                    .await
                    .map_err(|source| ContextError::CreateKey {
                        instance: instance.name.clone(),
                        source,
                    })?;
                keys.push(key);
            }

            let Some(key) = keys.last() else { continue };
            tracing::trace!(
                count = keys.len(),
                instance = %instance.name,
                key = %key.guid,
                "Using last service key"
            );
            let token = uaa::get_token(client.transport(), &key.credentials)
                .await
                .map_err(ContextError::Token)?;
            let uri = key.credentials.uri.as_deref().ok_or_else(|| ContextError::Destinations {
                instance: instance.name.clone(),
                source: ApiError::MissingCredentials("uri"),
            })?;

            let listed = match level {
                DestinationLevel::Instance => {
                    destination::list_instance_destinations(client.transport(), uri, &token).await
                }
                DestinationLevel::Subaccount => {
                    destination::list_subaccount_destinations(client.transport(), uri, &token).await
                }
            };
            apps.extend(listed.map_err(|source| ContextError::Destinations {
                instance: instance.name.clone(),
                source,
            })?);
            break;
        }
    }

    Ok(apps)
}
