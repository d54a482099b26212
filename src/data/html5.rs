//! html5-apps-repo runtime API client

use super::transport::{ApiError, ApiRequest, Transport};
use super::Html5App;

/// Lists the HTML5 applications visible to an app-runtime service key
pub async fn list_html5_apps<T: Transport>(
    transport: &T,
    service_url: &str,
    token: &str,
) -> Result<Vec<Html5App>, ApiError> {
    let url = format!(
        "{}/applications/metadata/",
        service_url.trim_end_matches('/')
    );
    let response = transport
        .send(ApiRequest::get(url.as_str()).bearer(token))
        .await?
        .expect_status(&[200], &url)?;
    response.json()
}
