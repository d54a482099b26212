//! Paginated listing of Cloud Foundry v3 resources
//!
//! Every v3 listing endpoint answers with a page of `resources` and a
//! `pagination.next.href` link. `fetch_all` follows those links in server order
//! and collects the transformed items of every page.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::transport::{ApiError, ApiRequest, Transport};
use super::Link;

/// Pagination section of a v3 listing response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub next: Option<Link>,
}

/// One page of a v3 listing response
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    pub resources: Vec<T>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

impl<T> Page<T> {
    /// Link to the next page, `None` on the last page
    pub fn next_href(&self) -> Option<&str> {
        self.pagination
            .as_ref()
            .and_then(|p| p.next.as_ref())
            .and_then(|link| link.href.as_deref())
    }
}

/// Fetches every page starting at `first_url` and returns the transformed items
///
/// Pages are requested one after another and items keep their server order.
/// A failure on any page aborts the whole listing. A next link equal to the page
/// just fetched ends the listing instead of looping on it.
pub async fn fetch_all<Tr, T, U, F>(
    transport: &Tr,
    first_url: &str,
    mut transform: F,
) -> Result<Vec<U>, ApiError>
where
    Tr: Transport,
    T: DeserializeOwned,
    F: FnMut(T) -> U,
{
    let mut items = Vec::new();
    let mut cursor = Some(first_url.to_string());

    while let Some(url) = cursor.take() {
        let response = transport
            .send(ApiRequest::get(url.as_str()))
            .await?
            .error_for_status(&url)?;
        let page: Page<T> = response.json()?;

        let next = page.next_href().map(str::to_string);
        items.extend(page.resources.into_iter().map(&mut transform));

        match next {
            Some(next) if same_resource(&next, &url) => {
                tracing::warn!(url = %url, "Next page URL is equal to the current one, stopping");
            }
            next => cursor = next,
        }
    }

    tracing::debug!(url = first_url, count = items.len(), "Fetched all pages");
    Ok(items)
}

/// Path and query of a URL; relative URLs are returned unchanged
fn path_and_query(url: &str) -> &str {
    match url.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("/", |idx| &rest[idx..]),
        None => url,
    }
}

/// Whether two links name the same page, ignoring scheme and host
fn same_resource(a: &str, b: &str) -> bool {
    path_and_query(a) == path_and_query(b)
}
