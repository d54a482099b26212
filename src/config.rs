//! Configuration of the tool
//!
//! Two sources are combined: the CF CLI's own `config.json`, which tells which
//! API is targeted and which org/space is selected, and environment variables
//! that tune the behavior (cache, service name, TLS).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use directories::BaseDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::data::TlsOptions;

/// Maximum age of the persisted cache in seconds
pub const CACHE_TIMEOUT_SECS: i64 = 60 * 60;

/// Default name of the html5-apps-repo service offering
pub const DEFAULT_HTML5_SERVICE_NAME: &str = "html5-apps-repo";

/// Errors that can occur while reading the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the user home directory")]
    NoHomeDir,

    #[error("could not read CF CLI configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CF CLI configuration {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no API endpoint set, use 'cf api' to set an endpoint")]
    NoApiEndpoint,

    #[error("not logged in. Use 'cf login' to log in")]
    NotLoggedIn,

    #[error("no org and space targeted, use 'cf target -o ORG -s SPACE' to target an org and a space")]
    NoOrgTargeted,

    #[error("no space targeted, use 'cf target -s' to target a space")]
    NoSpaceTargeted,

    #[error("certificate file {0:?} is not accessible. Please check 'SSL_CERT_FILE' or 'SSL_CERT_DIR' environment variable is pointing to existing file or directory")]
    CertificateNotAccessible(PathBuf),
}

#[derive(Debug, Default, Deserialize)]
struct EntityFields {
    #[serde(rename = "GUID", default)]
    guid: String,
    #[serde(rename = "Name", default)]
    name: String,
}

/// Subset of the CF CLI `config.json`
#[derive(Debug, Deserialize)]
struct CfConfigFile {
    #[serde(rename = "Target", default)]
    target: String,
    #[serde(rename = "AccessToken", default)]
    access_token: String,
    #[serde(rename = "SSLDisabled", default)]
    ssl_disabled: bool,
    #[serde(rename = "OrganizationFields", default)]
    organization: EntityFields,
    #[serde(rename = "SpaceFields", default)]
    space: EntityFields,
}

/// Org or space selected with `cf target`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub guid: String,
    pub name: String,
}

/// Targeted API, credentials, org and space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub api_endpoint: String,
    /// Authorization header value as stored by the CF CLI, e.g. `bearer eyJ...`
    pub access_token: String,
    pub ssl_disabled: bool,
    pub org: Entity,
    pub space: Entity,
}

impl Target {
    /// Loads the target from `<cf home>/.cf/config.json`
    pub fn load(cf_home: &Path) -> Result<Self, ConfigError> {
        Self::from_file(&cf_home.join(".cf").join("config.json"))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: CfConfigFile =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if config.target.is_empty() {
            return Err(ConfigError::NoApiEndpoint);
        }
        if config.access_token.is_empty() {
            return Err(ConfigError::NotLoggedIn);
        }
        if config.organization.name.is_empty() {
            return Err(ConfigError::NoOrgTargeted);
        }
        if config.space.name.is_empty() || config.space.guid.is_empty() {
            return Err(ConfigError::NoSpaceTargeted);
        }

        Ok(Self {
            api_endpoint: config.target,
            access_token: config.access_token,
            ssl_disabled: config.ssl_disabled,
            org: Entity {
                guid: config.organization.guid,
                name: config.organization.name,
            },
            space: Entity {
                guid: config.space.guid,
                name: config.space.name,
            },
        })
    }
}

impl Target {
    /// User name carried in the access token, if it can be read
    pub fn username(&self) -> Option<String> {
        let token = self
            .access_token
            .split_once(' ')
            .map_or(self.access_token.as_str(), |(_, token)| token);
        let payload = token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
        claims
            .get("user_name")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    }
}

/// Settings taken from environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Directory containing the `.cf` folder (`CF_HOME`, default home directory)
    pub cf_home: PathBuf,
    /// Persist the response cache between invocations (`HTML5_CACHE=1`)
    pub cache_enabled: bool,
    /// Name of the html5-apps-repo offering (`HTML5_SERVICE_NAME`)
    pub service_name: String,
    /// Fixed runtime URL overriding the computed one (`HTML5_RUNTIME_URL`)
    pub runtime_url: Option<String>,
    /// JSON parameters for new app-runtime keys (`HTML5_APP_RUNTIME_KEY_PARAMETERS`)
    pub app_runtime_key_parameters: Option<String>,
    /// Additional root CA (`SSL_CERT_FILE`, or `server.crt` in `SSL_CERT_DIR`)
    pub ca_path: Option<PathBuf>,
    /// Trace logging requested by the CF CLI (`CF_TRACE=true`)
    pub trace: bool,
}

impl Settings {
    /// Reads settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        let home = match vars.get("CF_HOME").filter(|v| !v.is_empty()) {
            Some(home) => PathBuf::from(home),
            None => BaseDirs::new()
                .map(|dirs| dirs.home_dir().to_path_buf())
                .ok_or(ConfigError::NoHomeDir)?,
        };
        Ok(Self::from_vars(home, |name| vars.get(name).cloned()))
    }

    /// Builds settings from a variable lookup
    pub fn from_vars<F>(cf_home: PathBuf, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.is_empty());

        let ca_path = non_empty("SSL_CERT_FILE").map(PathBuf::from).or_else(|| {
            non_empty("SSL_CERT_DIR").map(|dir| PathBuf::from(dir).join("server.crt"))
        });

        Self {
            cf_home,
            cache_enabled: non_empty("HTML5_CACHE").as_deref() == Some("1"),
            service_name: non_empty("HTML5_SERVICE_NAME")
                .unwrap_or_else(|| DEFAULT_HTML5_SERVICE_NAME.to_string()),
            runtime_url: non_empty("HTML5_RUNTIME_URL"),
            app_runtime_key_parameters: non_empty("HTML5_APP_RUNTIME_KEY_PARAMETERS"),
            ca_path,
            trace: non_empty("CF_TRACE")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    /// Location of the cache snapshot
    pub fn cache_file(&self) -> PathBuf {
        self.cf_home
            .join(".cf")
            .join("plugins")
            .join("html5-plugin-config.json")
    }

    /// TLS options for the targeted API, checking that the CA file exists
    pub fn tls_options(&self, target: &Target) -> Result<TlsOptions, ConfigError> {
        if let Some(path) = &self.ca_path {
            if !path.exists() {
                tracing::trace!(path = %path.display(), "Additional root CA file not found");
                return Err(ConfigError::CertificateNotAccessible(path.clone()));
            }
        }
        Ok(TlsOptions {
            insecure: target.ssl_disabled,
            ca_path: self.ca_path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_vars(PathBuf::from("/home/user"), |name| vars.get(name).cloned())
    }

    fn write_cf_config(value: serde_json::Value) -> TempDir {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir_all(temp_dir.path().join(".cf")).unwrap();
        fs::write(temp_dir.path().join(".cf").join("config.json"), value.to_string()).unwrap();
        temp_dir
    }

    fn complete_cf_config() -> serde_json::Value {
        json!({
            "ConfigVersion": 3,
            "Target": "https://api.cf.example.com",
            "AccessToken": "bearer eyJtoken",
            "SSLDisabled": true,
            "OrganizationFields": {"GUID": "org-guid", "Name": "my-org"},
            "SpaceFields": {"GUID": "space-guid", "Name": "dev", "AllowSSH": true}
        })
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[]);
        assert!(!settings.cache_enabled);
        assert_eq!(settings.service_name, "html5-apps-repo");
        assert!(settings.runtime_url.is_none());
        assert!(settings.ca_path.is_none());
        assert!(!settings.trace);
    }

    #[test]
    fn test_cache_enabled_only_with_one() {
        assert!(settings(&[("HTML5_CACHE", "1")]).cache_enabled);
        assert!(!settings(&[("HTML5_CACHE", "true")]).cache_enabled);
    }

    #[test]
    fn test_ca_path_prefers_cert_file() {
        let s = settings(&[("SSL_CERT_FILE", "/certs/ca.pem"), ("SSL_CERT_DIR", "/dir")]);
        assert_eq!(s.ca_path, Some(PathBuf::from("/certs/ca.pem")));

        let s = settings(&[("SSL_CERT_DIR", "/dir")]);
        assert_eq!(s.ca_path, Some(PathBuf::from("/dir/server.crt")));
    }

    #[test]
    fn test_overrides() {
        let s = settings(&[
            ("HTML5_SERVICE_NAME", "html5-apps-repo-canary"),
            ("HTML5_RUNTIME_URL", "https://runtime"),
            ("HTML5_APP_RUNTIME_KEY_PARAMETERS", "{\"xsuaa\":{}}"),
            ("CF_TRACE", "TRUE"),
        ]);
        assert_eq!(s.service_name, "html5-apps-repo-canary");
        assert_eq!(s.runtime_url.as_deref(), Some("https://runtime"));
        assert!(s.app_runtime_key_parameters.is_some());
        assert!(s.trace);
    }

    #[test]
    fn test_cache_file_location() {
        assert_eq!(
            settings(&[]).cache_file(),
            PathBuf::from("/home/user/.cf/plugins/html5-plugin-config.json")
        );
    }

    #[test]
    fn test_tls_options_rejects_missing_ca() {
        let s = settings(&[("SSL_CERT_FILE", "/nonexistent/ca.pem")]);
        let temp_dir = write_cf_config(complete_cf_config());
        let target = Target::load(temp_dir.path()).unwrap();

        let err = s.tls_options(&target).unwrap_err();
        assert!(matches!(err, ConfigError::CertificateNotAccessible(_)));
    }

    #[test]
    fn test_tls_options_follow_target() {
        let temp_dir = write_cf_config(complete_cf_config());
        let target = Target::load(temp_dir.path()).unwrap();

        let tls = settings(&[]).tls_options(&target).unwrap();
        assert!(tls.insecure);
        assert!(tls.ca_path.is_none());
    }

    #[test]
    fn test_load_target() {
        let temp_dir = write_cf_config(complete_cf_config());

        let target = Target::load(temp_dir.path()).unwrap();

        assert_eq!(target.api_endpoint, "https://api.cf.example.com");
        assert_eq!(target.access_token, "bearer eyJtoken");
        assert_eq!(target.org.name, "my-org");
        assert_eq!(target.space.guid, "space-guid");
    }

    #[test]
    fn test_load_target_not_logged_in() {
        let mut config = complete_cf_config();
        config["AccessToken"] = json!("");
        let temp_dir = write_cf_config(config);

        let err = Target::load(temp_dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::NotLoggedIn));
    }

    #[test]
    fn test_load_target_without_space() {
        let mut config = complete_cf_config();
        config["SpaceFields"] = json!({"GUID": "", "Name": ""});
        let temp_dir = write_cf_config(config);

        let err = Target::load(temp_dir.path()).unwrap_err();
        assert!(err.to_string().contains("cf target -s"));
    }

    #[test]
    fn test_load_target_without_org() {
        let mut config = complete_cf_config();
        config["OrganizationFields"] = json!({"GUID": "", "Name": ""});
        let temp_dir = write_cf_config(config);

        let err = Target::load(temp_dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::NoOrgTargeted));
    }

    fn target_with_token(access_token: &str) -> Target {
        Target {
            api_endpoint: "https://api.cf.example.com".to_string(),
            access_token: access_token.to_string(),
            ssl_disabled: false,
            org: Entity { guid: "o".into(), name: "org".into() },
            space: Entity { guid: "s".into(), name: "dev".into() },
        }
    }

    #[test]
    fn test_username_from_access_token() {
        let claims = URL_SAFE_NO_PAD.encode(json!({"user_name": "alice@example.com"}).to_string());
        let target = target_with_token(&format!("bearer eyJhbGciOiJSUzI1NiJ9.{}.signature", claims));

        assert_eq!(target.username().as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn test_username_missing_from_opaque_token() {
        assert!(target_with_token("bearer eyJtoken").username().is_none());
        let claims = URL_SAFE_NO_PAD.encode(json!({"sub": "id"}).to_string());
        assert!(target_with_token(&format!("bearer h.{}.s", claims)).username().is_none());
    }

    #[test]
    fn test_load_target_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = Target::load(temp_dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
