//! In-memory response cache
//!
//! Holds the results of expensive lookup sequences for the lifetime of one
//! process. Values are a closed set of types so they can be written to and read
//! back from the snapshot file; the key prefix tells which type a value has.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::context::Html5Context;
use crate::data::{Service, ServicePlan};

/// Key prefix of the marketplace service list
pub const SERVICES_PREFIX: &str = "GetServices:";
/// Key prefix of service plan lists, followed by the service GUID
pub const SERVICE_PLANS_PREFIX: &str = "GetServicePlans:";
/// Key prefix of HTML5 contexts, followed by org and space GUIDs
pub const HTML5_CONTEXT_PREFIX: &str = "GetHTML5Context:";

pub fn services_key() -> String {
    SERVICES_PREFIX.to_string()
}

pub fn service_plans_key(service_guid: &str) -> String {
    format!("{}{}", SERVICE_PLANS_PREFIX, service_guid)
}

pub fn html5_context_key(org_guid: &str, space_guid: &str) -> String {
    format!("{}{}:{}", HTML5_CONTEXT_PREFIX, org_guid, space_guid)
}

/// A cacheable result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CachedValue {
    Services(Vec<Service>),
    ServicePlans(Vec<ServicePlan>),
    Html5Context(Box<Html5Context>),
}

impl CachedValue {
    /// Rebuilds a value read from the snapshot file
    ///
    /// Returns `Ok(None)` for keys whose prefix is not a known cacheable type.
    pub fn from_json(key: &str, value: serde_json::Value) -> Result<Option<Self>, serde_json::Error> {
        let cached = if key.starts_with(HTML5_CONTEXT_PREFIX) {
            Self::Html5Context(Box::new(serde_json::from_value(value)?))
        } else if key.starts_with(SERVICE_PLANS_PREFIX) {
            Self::ServicePlans(serde_json::from_value(value)?)
        } else if key.starts_with(SERVICES_PREFIX) {
            Self::Services(serde_json::from_value(value)?)
        } else {
            return Ok(None);
        };
        Ok(Some(cached))
    }
}

/// Process-wide key/value store
///
/// Last write wins; entries are never evicted while the process runs.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CachedValue>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedValue>> {
        // the map stays consistent even if a holder panicked
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<CachedValue> {
        self.lock().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: CachedValue) {
        self.lock().insert(key.into(), value);
    }

    /// Snapshot of every entry
    pub fn all(&self) -> HashMap<String, CachedValue> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Cached service list
    pub fn services(&self) -> Option<Vec<Service>> {
        match self.get(&services_key()) {
            Some(CachedValue::Services(services)) => Some(services),
            _ => None,
        }
    }

    /// Cached plans of a service
    pub fn service_plans(&self, service_guid: &str) -> Option<Vec<ServicePlan>> {
        match self.get(&service_plans_key(service_guid)) {
            Some(CachedValue::ServicePlans(plans)) => Some(plans),
            _ => None,
        }
    }

    /// Cached HTML5 context of an org and space
    pub fn html5_context(&self, org_guid: &str, space_guid: &str) -> Option<Html5Context> {
        match self.get(&html5_context_key(org_guid, space_guid)) {
            Some(CachedValue::Html5Context(context)) => Some(*context),
            _ => None,
        }
    }
}
