//! Execution of the `list` and `destinations` commands

use std::io::{self, Write};

use thiserror::Error;

use crate::cache::{CacheError, CacheSession, SnapshotFile};
use crate::cli::{Cli, CliError, Commands, DestinationsArgs, ListOptions};
use crate::config::{ConfigError, Settings, Target, CACHE_TIMEOUT_SECS};
use crate::context::{
    clean_html5_context, discover_destination_apps, resolve_bound_runtime, resolve_html5_context,
    runtime_url, ContextError, Html5Context,
};
use crate::data::{html5, ApiError, CfClient, Html5App, HttpTransport, Transport};
use crate::output::{Reporter, Table};

/// Errors that end a command
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Could not get org and space: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not use cache: {0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Cli(#[from] CliError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Could not write output: {0}")]
    Output(#[from] io::Error),
}

/// Runs the parsed command against the targeted Cloud Foundry API
///
/// The cache session is closed even when the command fails; the command error
/// takes precedence over a failure to save the cache.
pub async fn run<W: Write>(cli: &Cli, mut settings: Settings, out: W) -> Result<(), CommandError> {
    settings.cache_enabled |= cli.cache;

    let list_options = match &cli.command {
        Commands::List(args) => ListOptions::from_args(args)?,
        Commands::Destinations(_) => ListOptions::default(),
    };

    let target = Target::load(&settings.cf_home)?;
    let tls = settings.tls_options(&target)?;
    let transport = HttpTransport::new(
        target.api_endpoint.clone(),
        Some(target.access_token.clone()),
        &tls,
    )?;
    let client = CfClient::new(transport);

    let snapshot = SnapshotFile::new(settings.cache_file(), CACHE_TIMEOUT_SECS);
    let session = CacheSession::open(snapshot, settings.cache_enabled)?;
    let mut reporter = Reporter::new(out);

    let result = match &cli.command {
        Commands::List(_) => {
            list_apps(&client, &session, &target, &settings, &list_options, &mut reporter).await
        }
        Commands::Destinations(args) => {
            list_destinations(&client, &session, &target, args, &mut reporter).await
        }
    };

    let closed = session.close();
    result?;
    closed?;
    Ok(())
}

/// Prints the HTML5 applications readable with the app-runtime plan
pub async fn list_apps<T: Transport, W: Write>(
    client: &CfClient<T>,
    session: &CacheSession,
    target: &Target,
    settings: &Settings,
    options: &ListOptions,
    reporter: &mut Reporter<W>,
) -> Result<(), CommandError> {
    match &options.app {
        Some(app) => reporter.say(&format!(
            "Getting list of HTML5 applications bound to {} in org {} / space {}{}...",
            app,
            target.org.name,
            target.space.name,
            as_user(target)
        ))?,
        None => reporter.say(&format!(
            "Getting list of HTML5 applications in org {} / space {}{}...",
            target.org.name,
            target.space.name,
            as_user(target)
        ))?,
    }

    let (apps, base_url) = match &options.app {
        Some(app) => {
            let bound = resolve_bound_runtime(client, target, app, &settings.service_name).await?;
            let uri = bound
                .credentials
                .uri
                .as_deref()
                .ok_or(ApiError::MissingCredentials("uri"))?;
            let apps = html5::list_html5_apps(client.transport(), uri, &bound.access_token).await?;
            let base_url = if options.show_url {
                Some(runtime_url(
                    &bound.credentials,
                    options.runtime.as_deref(),
                    settings.runtime_url.as_deref(),
                )?)
            } else {
                None
            };
            (apps, base_url)
        }
        None => {
            let context = resolve_html5_context(client, session.cache(), target, settings).await?;
            let listed = list_with_context(client, &context, settings, options).await;
            let cleaned = clean_html5_context(client, &context, session.is_persistent()).await;
            let listed = listed?;
            cleaned?;
            listed
        }
    };

    reporter.ok()?;
    reporter.say("")?;

    let mut headers = vec!["name", "version", "app-host-id", "changed on"];
    if base_url.is_some() {
        headers.push("url");
    }
    let mut table = Table::new(&headers);
    for app in &apps {
        let mut row = vec![
            app.application_name.clone(),
            app.application_version.clone(),
            app.app_host_id.clone(),
            app.changed_on.clone(),
        ];
        if let Some(base) = &base_url {
            row.push(app_url(base, app));
        }
        table.add_row(&row);
    }
    reporter.table(&table)?;

    Ok(())
}

async fn list_with_context<T: Transport>(
    client: &CfClient<T>,
    context: &Html5Context,
    settings: &Settings,
    options: &ListOptions,
) -> Result<(Vec<Html5App>, Option<String>), CommandError> {
    let uri = context
        .active_key()
        .and_then(|key| key.credentials.uri.as_deref())
        .ok_or(ApiError::MissingCredentials("uri"))?;
    let apps = html5::list_html5_apps(client.transport(), uri, &context.access_token).await?;
    let base_url = if options.show_url {
        Some(context.runtime_url(options.runtime.as_deref(), settings.runtime_url.as_deref())?)
    } else {
        None
    };
    Ok((apps, base_url))
}

/// ` as <user>` suffix of progress lines, empty when the user is unknown
fn as_user(target: &Target) -> String {
    target
        .username()
        .map(|user| format!(" as {}", user))
        .unwrap_or_default()
}

/// Conventional URL of an application: `<base>/<name without dots>-<version>/`
pub fn app_url(base_url: &str, app: &Html5App) -> String {
    format!(
        "{}/{}-{}/",
        base_url.trim_end_matches('/'),
        app.application_name.replace('.', ""),
        app.application_version
    )
}

/// Prints the on-premise applications exposed through destinations
pub async fn list_destinations<T: Transport, W: Write>(
    client: &CfClient<T>,
    session: &CacheSession,
    target: &Target,
    args: &DestinationsArgs,
    reporter: &mut Reporter<W>,
) -> Result<(), CommandError> {
    reporter.say(&format!(
        "Getting list of Destinations applications in org {} / space {}{}...",
        target.org.name,
        target.space.name,
        as_user(target)
    ))?;

    let apps = discover_destination_apps(client, session.cache(), target, args.level()).await?;

    reporter.ok()?;
    reporter.say("")?;

    let mut table = Table::new(&["name", "description", "type", "URL"]);
    for app in apps.iter().filter(|app| app.is_on_premise()) {
        table.add_row(&[&app.name, &app.description, &app.proxy_type, &app.url]);
    }
    reporter.table(&table)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Entity;
    use crate::data::testing::FakeTransport;
    use clap::Parser;
    use reqwest::Method;
    use serde_json::json;
    use std::path::PathBuf;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use tempfile::TempDir;

    const TOKEN_URL: &str = "https://zone.authentication.example.com/oauth/token";
    const APPS_URL: &str = "https://html5-apps-repo-rt.cfapps.eu10.hana.ondemand.com/applications/metadata/";

    fn target() -> Target {
        Target {
            api_endpoint: "https://api.example.com".to_string(),
            access_token: "bearer cf".to_string(),
            ssl_disabled: false,
            org: Entity { guid: "org-guid".into(), name: "org".into() },
            space: Entity { guid: "space-guid".into(), name: "dev".into() },
        }
    }

    fn settings() -> Settings {
        Settings::from_vars(PathBuf::from("/home"), |_| None)
    }

    fn credentials() -> serde_json::Value {
        json!({
            "uri": "https://html5-apps-repo-rt.cfapps.eu10.hana.ondemand.com",
            "uaa": {
                "url": "https://zone.authentication.example.com",
                "clientid": "id",
                "clientsecret": "secret",
                "identityzone": "zone"
            }
        })
    }

    fn apps() -> serde_json::Value {
        json!([
            {"applicationName": "com.acme.portal", "applicationVersion": "1.0.0", "appHostId": "h1", "changedOn": "2024-10-01"},
            {"applicationName": "admin", "applicationVersion": "2.0.0", "appHostId": "h2", "changedOn": "2024-10-02"}
        ])
    }

    fn output(reporter: Reporter<Vec<u8>>) -> String {
        String::from_utf8(reporter.into_inner()).unwrap()
    }

    #[tokio::test]
    async fn test_list_apps_of_bound_application() {
        let transport = FakeTransport::new()
            .respond(Method::GET, "/v3/apps?names=router&space_guids=space-guid", 200, json!({"resources": [{"name": "router", "guid": "app"}]}))
            .respond(
                Method::GET,
                "/v3/apps/app/env",
                200,
                json!({"system_env_json": {"VCAP_SERVICES": {"html5-apps-repo": [
                    {"plan": "app-runtime", "credentials": credentials()}
                ]}}}),
            )
            .respond(Method::POST, TOKEN_URL, 200, json!({"access_token": "t"}))
            .respond(Method::GET, APPS_URL, 200, apps());
        let client = CfClient::new(transport);
        let options = ListOptions {
            app: Some("router".to_string()),
            show_url: true,
            runtime: None,
        };
        let mut reporter = Reporter::new(Vec::new());

        list_apps(&client, &CacheSession::in_memory(), &target(), &settings(), &options, &mut reporter)
            .await
            .unwrap();

        let output = output(reporter);
        assert!(output.starts_with("Getting list of HTML5 applications bound to router in org org / space dev...\nOK\n\n"));
        assert!(output.contains("https://zone.cpp.cfapps.eu10.hana.ondemand.com/comacmeportal-1.0.0/"));
        assert!(output.contains("admin"));
    }

    #[tokio::test]
    async fn test_list_apps_resolves_and_cleans_context() {
        let transport = FakeTransport::new()
            .respond(Method::GET, "/v3/service_offerings", 200, json!({"resources": [{"name": "html5-apps-repo", "guid": "svc"}]}))
            .respond(
                Method::GET,
                "/v3/service_plans?service_offering_guids=svc",
                200,
                json!({"resources": [{"name": "app-runtime", "guid": "rt"}]}),
            )
            .respond(
                Method::GET,
                "/v3/service_instances?space_guids=space-guid&service_plan_guids=rt",
                200,
                json!({"resources": [{"name": "rt-1", "guid": "i1"}]}),
            )
            .respond(
                Method::GET,
                "/v3/service_credential_bindings?type=key&service_instance_guids=i1",
                200,
                json!({"resources": []}),
            )
            .respond(Method::POST, "/v3/service_credential_bindings", 201, json!({"name": "k", "guid": "k"}))
            .respond(Method::GET, "/v3/service_credential_bindings/k/details", 200, json!({"credentials": credentials()}))
            .respond_raw(Method::DELETE, "/v3/service_credential_bindings/k", 204, "")
            .respond(Method::POST, TOKEN_URL, 200, json!({"access_token": "t"}))
            .respond(Method::GET, APPS_URL, 200, apps());
        let client = CfClient::new(transport);
        let mut reporter = Reporter::new(Vec::new());

        list_apps(
            &client,
            &CacheSession::in_memory(),
            &target(),
            &settings(),
            &ListOptions::default(),
            &mut reporter,
        )
        .await
        .unwrap();

        let output = output(reporter);
        assert!(output.contains("name              version   app-host-id   changed on\n"));
        assert!(output.contains("com.acme.portal   1.0.0     h1            2024-10-01\n"));
        assert!(!output.contains("https://"));
        let last = client.transport().requests().pop().unwrap();
        assert_eq!(last.method, Method::DELETE);
        assert_eq!(last.url, "/v3/service_credential_bindings/k");
    }

    #[tokio::test]
    async fn test_list_destinations_shows_on_premise_only() {
        let transport = FakeTransport::new()
            .respond(Method::GET, "/v3/service_offerings", 200, json!({"resources": [{"name": "destination", "guid": "d"}]}))
            .respond(
                Method::GET,
                "/v3/service_plans?service_offering_guids=d",
                200,
                json!({"resources": [{"name": "lite", "guid": "lite"}]}),
            )
            .respond(
                Method::GET,
                "/v3/service_instances?space_guids=space-guid&service_plan_guids=lite",
                200,
                json!({"resources": [{"name": "dest", "guid": "di"}]}),
            )
            .respond(
                Method::GET,
                "/v3/service_credential_bindings?type=key&service_instance_guids=di",
                200,
                json!({"resources": [{"name": "dk", "guid": "dk"}]}),
            )
            .respond(
                Method::GET,
                "/v3/service_credential_bindings/dk/details",
                200,
                json!({"credentials": {
                    "uri": "https://dest.example.com",
                    "url": "https://zone.authentication.example.com",
                    "clientid": "id",
                    "clientsecret": "secret"
                }}),
            )
            .respond(Method::POST, TOKEN_URL, 200, json!({"access_token": "t"}))
            .respond(
                Method::GET,
                "https://dest.example.com/destination-configuration/v1/instanceDestinations",
                200,
                json!([
                    {"Name": "erp", "Description": "ERP", "ProxyType": "OnPremise", "URL": "http://erp:8000"},
                    {"Name": "web", "ProxyType": "Internet", "URL": "https://web"}
                ]),
            );
        let client = CfClient::new(transport);
        let mut reporter = Reporter::new(Vec::new());

        list_destinations(
            &client,
            &CacheSession::in_memory(),
            &target(),
            &DestinationsArgs::default(),
            &mut reporter,
        )
        .await
        .unwrap();

        let output = output(reporter);
        assert!(output.contains("erp    ERP           OnPremise   http://erp:8000"));
        assert!(!output.contains("https://web"));
    }

    #[test]
    fn test_progress_line_names_user() {
        let claims = URL_SAFE_NO_PAD.encode(json!({"user_name": "alice"}).to_string());
        let mut logged_in = target();
        logged_in.access_token = format!("bearer header.{}.signature", claims);

        assert_eq!(as_user(&logged_in), " as alice");
        assert_eq!(as_user(&target()), "");
    }

    #[test]
    fn test_app_url() {
        let app = Html5App {
            application_name: "com.acme.portal".to_string(),
            application_version: "1.2.0".to_string(),
            ..Default::default()
        };
        assert_eq!(
            app_url("https://zone.cpp.example.com/", &app),
            "https://zone.cpp.example.com/comacmeportal-1.2.0/"
        );
    }

    #[tokio::test]
    async fn test_run_without_cf_config() {
        let home = TempDir::new().unwrap();
        let cli = Cli::parse_from(["html5-cf", "list"]);
        let settings = Settings::from_vars(home.path().to_path_buf(), |_| None);

        let err = run(&cli, settings, Vec::new()).await.unwrap_err();

        assert!(matches!(err, CommandError::Config(ConfigError::Read { .. })));
        assert!(err.to_string().starts_with("Could not get org and space"));
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_runtime_before_loading_config() {
        let home = TempDir::new().unwrap();
        let cli = Cli::parse_from(["html5-cf", "list", "--url", "--runtime", "a.b"]);
        let settings = Settings::from_vars(home.path().to_path_buf(), |_| None);

        let err = run(&cli, settings, Vec::new()).await.unwrap_err();

        assert!(matches!(err, CommandError::Cli(CliError::InvalidRuntime(_))));
    }
}
