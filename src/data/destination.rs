//! Destination service API client
//!
//! Lists and deletes destinations through the `uri` of a destination service key.

use super::transport::{ApiError, ApiRequest, Transport};
use super::DestinationApp;

const DESTINATION_CONFIGURATION_PATH: &str = "/destination-configuration/v1";

fn destinations_url(service_url: &str, level: &str) -> String {
    format!(
        "{}{}/{}",
        service_url.trim_end_matches('/'),
        DESTINATION_CONFIGURATION_PATH,
        level
    )
}

async fn list_destinations<T: Transport>(
    transport: &T,
    url: String,
    token: &str,
) -> Result<Vec<DestinationApp>, ApiError> {
    let response = transport
        .send(ApiRequest::get(url.as_str()).bearer(token))
        .await?
        .expect_status(&[200], &url)?;
    response.json()
}

/// Lists destinations defined on the service instance
pub async fn list_instance_destinations<T: Transport>(
    transport: &T,
    service_url: &str,
    token: &str,
) -> Result<Vec<DestinationApp>, ApiError> {
    list_destinations(
        transport,
        destinations_url(service_url, "instanceDestinations"),
        token,
    )
    .await
}

/// Lists destinations defined on the subaccount
pub async fn list_subaccount_destinations<T: Transport>(
    transport: &T,
    service_url: &str,
    token: &str,
) -> Result<Vec<DestinationApp>, ApiError> {
    list_destinations(
        transport,
        destinations_url(service_url, "subaccountDestinations"),
        token,
    )
    .await
}

/// Deletes a service instance level destination
pub async fn delete_instance_destination<T: Transport>(
    transport: &T,
    service_url: &str,
    token: &str,
    name: &str,
) -> Result<(), ApiError> {
    let url = format!(
        "{}/{}",
        destinations_url(service_url, "instanceDestinations"),
        name
    );
    transport
        .send(ApiRequest::delete(url.as_str()).bearer(token))
        .await?
        .expect_status(&[200, 201, 204], &url)?;
    Ok(())
}
