//! OAuth token retrieval for service keys

use serde::Deserialize;

use super::transport::{ApiError, ApiRequest, Transport};
use super::Credentials;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Token endpoint and OAuth client of a service key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClient<'a> {
    pub url: &'a str,
    pub client_id: &'a str,
    pub client_secret: &'a str,
}

impl<'a> OAuthClient<'a> {
    /// Picks the nested `uaa` section when present, the top-level fields otherwise
    pub fn from_credentials(credentials: &'a Credentials) -> Result<Self, ApiError> {
        let (url, client_id, client_secret) = match &credentials.uaa {
            Some(uaa) => (&uaa.url, &uaa.clientid, &uaa.clientsecret),
            None => (&credentials.url, &credentials.clientid, &credentials.clientsecret),
        };
        Ok(Self {
            url: url.as_deref().ok_or(ApiError::MissingCredentials("url"))?,
            client_id: client_id
                .as_deref()
                .ok_or(ApiError::MissingCredentials("clientid"))?,
            client_secret: client_secret
                .as_deref()
                .ok_or(ApiError::MissingCredentials("clientsecret"))?,
        })
    }
}

/// Obtains an access token with the client credentials grant
pub async fn get_token<T: Transport>(
    transport: &T,
    credentials: &Credentials,
) -> Result<String, ApiError> {
    let client = OAuthClient::from_credentials(credentials)?;
    let url = format!("{}/oauth/token", client.url.trim_end_matches('/'));

    let request = ApiRequest::post(url.as_str())
        .basic_auth(client.client_id, client.client_secret)
        .form(&[
            ("grant_type", "client_credentials"),
            ("response_type", "token"),
        ]);
    let response = transport.send(request).await?.expect_status(&[200], &url)?;
    let token: TokenResponse = response.json()?;

    Ok(token.access_token)
}
