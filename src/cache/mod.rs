//! Cache module for memoizing API lookups
//!
//! This module provides an in-memory response cache for values that are costly to
//! resolve (service lists, service plans, HTML5 contexts) and a snapshot file that
//! keeps those values across invocations for a limited time.

mod manager;
mod store;

pub use manager::{CacheError, CacheSession, SnapshotFile};
pub use store::{
    html5_context_key, service_plans_key, services_key, CachedValue, ResponseCache,
    HTML5_CONTEXT_PREFIX, SERVICES_PREFIX, SERVICE_PLANS_PREFIX,
};
