use std::collections::HashMap;
use thiserror::Error;

const LOGIN_AUTHORITY: &str = "https://login.microsoftonline.com";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("invalid .env file: {0}")]
    EnvFile(String),
}

/// Process settings, read once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct Settings {
    pub tenant_id: String,
    pub client_id: String,
    pub openapi_client_id: String,
    pub cors_origins: Vec<String>,
    pub scope_description: String,
    pub port: u16,
    /// Seconds between key refreshes, 0 disables the refresh task.
    pub jwks_refresh_secs: u64,
    openid_config_url: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        env_file(dotenvy::dotenv())?;
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let tenant_id = identifier(&lookup, "TENANT_ID")?;
        let client_id = identifier(&lookup, "AUTH_CLIENT_ID")?;

        let openapi_client_id = lookup("OPENAPI_CLIENT_ID").unwrap_or_default();

        let cors_origins = match lookup("BACKEND_CORS_ORIGINS") {
            Some(raw) => parse_origins(&raw).ok_or(ConfigError::Invalid("BACKEND_CORS_ORIGINS"))?,
            None => vec!["http://localhost:8000".to_string()],
        };

        let scope_description = lookup("SCOPE_DESCRIPTION")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "user_impersonation".to_string());

        let port = match lookup("PORT") {
            Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid("PORT"))?,
            None => 8000,
        };

        let jwks_refresh_secs = match lookup("JWKS_REFRESH_SECS") {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid("JWKS_REFRESH_SECS"))?,
            None => 86400,
        };

        let openid_config_url = lookup("OPENID_CONFIG_URL").filter(|s| !s.trim().is_empty());

        Ok(Self {
            tenant_id,
            client_id,
            openapi_client_id,
            cors_origins,
            scope_description,
            port,
            jwks_refresh_secs,
            openid_config_url,
        })
    }

    pub fn scope_name(&self) -> String {
        format!("api://{}/{}", self.client_id, self.scope_description)
    }

    pub fn scopes(&self) -> HashMap<String, String> {
        HashMap::from([(self.scope_name(), self.scope_description.clone())])
    }

    pub fn authorization_url(&self) -> String {
        format!("{LOGIN_AUTHORITY}/{}/oauth2/v2.0/authorize", self.tenant_id)
    }

    pub fn token_url(&self) -> String {
        format!("{LOGIN_AUTHORITY}/{}/oauth2/v2.0/token", self.tenant_id)
    }

    pub fn openid_config_url(&self) -> String {
        match &self.openid_config_url {
            Some(url) => url.clone(),
            None => format!(
                "{LOGIN_AUTHORITY}/{}/v2.0/.well-known/openid-configuration",
                self.tenant_id
            ),
        }
    }

    /// Audiences accepted in access tokens: v2 tokens carry the bare client id,
    /// v1 tokens the application id URI.
    pub fn audiences(&self) -> Vec<String> {
        vec![self.client_id.clone(), format!("api://{}", self.client_id)]
    }
}

/// A missing `.env` is fine, an unreadable or malformed one is not.
fn env_file<T>(loaded: Result<T, dotenvy::Error>) -> Result<(), ConfigError> {
    match loaded {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(ConfigError::EnvFile(e.to_string())),
    }
}

fn identifier<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))?;
    let well_formed = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if !well_formed {
        return Err(ConfigError::Invalid(key));
    }
    Ok(value)
}

/// Accepts either a comma separated list or a JSON array of strings.
fn parse_origins(raw: &str) -> Option<Vec<String>> {
    let raw = raw.trim();
    let origins: Vec<String> = if raw.starts_with('[') {
        serde_json::from_str(raw).ok()?
    } else {
        raw.split(',').map(|s| s.to_string()).collect()
    };
    let origins: Vec<String> = origins
        .into_iter()
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect();
    origins.iter().all(|o| valid_origin(o)).then_some(origins)
}

fn valid_origin(origin: &str) -> bool {
    if origin == "*" {
        return true;
    }
    let host = origin
        .strip_prefix("https://")
        .or_else(|| origin.strip_prefix("http://"));
    match host {
        Some(host) => !host.is_empty() && host.chars().all(|c| c.is_ascii_graphic()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TENANT: &str = "9b1c3f4e-0000-4a5b-8c6d-123456789abc";
    const CLIENT: &str = "11111111-2222-3333-4444-555555555555";

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    fn minimal() -> Settings {
        settings(&[("TENANT_ID", TENANT), ("AUTH_CLIENT_ID", CLIENT)]).unwrap()
    }

    #[test]
    fn defaults() {
        let s = minimal();
        assert_eq!(s.openapi_client_id, "");
        assert_eq!(s.cors_origins, vec!["http://localhost:8000"]);
        assert_eq!(s.scope_description, "user_impersonation");
        assert_eq!(s.port, 8000);
        assert_eq!(s.jwks_refresh_secs, 86400);
    }

    #[test]
    fn derived_values() {
        let s = minimal();
        assert_eq!(
            s.scope_name(),
            format!("api://{CLIENT}/user_impersonation")
        );
        assert_eq!(
            s.scopes().get(&s.scope_name()).map(String::as_str),
            Some("user_impersonation")
        );
        assert_eq!(
            s.authorization_url(),
            format!("https://login.microsoftonline.com/{TENANT}/oauth2/v2.0/authorize")
        );
        assert_eq!(
            s.token_url(),
            format!("https://login.microsoftonline.com/{TENANT}/oauth2/v2.0/token")
        );
        assert_eq!(
            s.openid_config_url(),
            format!("https://login.microsoftonline.com/{TENANT}/v2.0/.well-known/openid-configuration")
        );
        assert_eq!(s.audiences(), vec![CLIENT.to_string(), format!("api://{CLIENT}")]);
    }

    #[test]
    fn missing_identifiers() {
        assert_eq!(
            settings(&[("AUTH_CLIENT_ID", CLIENT)]).unwrap_err(),
            ConfigError::Missing("TENANT_ID")
        );
        assert_eq!(
            settings(&[("TENANT_ID", TENANT), ("AUTH_CLIENT_ID", "  ")]).unwrap_err(),
            ConfigError::Missing("AUTH_CLIENT_ID")
        );
    }

    #[test]
    fn malformed_identifiers() {
        assert_eq!(
            settings(&[("TENANT_ID", "a/b"), ("AUTH_CLIENT_ID", CLIENT)]).unwrap_err(),
            ConfigError::Invalid("TENANT_ID")
        );
        assert_eq!(
            settings(&[("TENANT_ID", TENANT), ("AUTH_CLIENT_ID", "client id")]).unwrap_err(),
            ConfigError::Invalid("AUTH_CLIENT_ID")
        );
    }

    #[test]
    fn cors_origins_list_and_json() {
        let s = settings(&[
            ("TENANT_ID", TENANT),
            ("AUTH_CLIENT_ID", CLIENT),
            ("BACKEND_CORS_ORIGINS", "http://a.example/, http://b.example"),
        ])
        .unwrap();
        assert_eq!(s.cors_origins, vec!["http://a.example", "http://b.example"]);

        let s = settings(&[
            ("TENANT_ID", TENANT),
            ("AUTH_CLIENT_ID", CLIENT),
            ("BACKEND_CORS_ORIGINS", r#"["http://c.example"]"#),
        ])
        .unwrap();
        assert_eq!(s.cors_origins, vec!["http://c.example"]);

        let err = settings(&[
            ("TENANT_ID", TENANT),
            ("AUTH_CLIENT_ID", CLIENT),
            ("BACKEND_CORS_ORIGINS", "[not json"),
        ])
        .unwrap_err();
        assert_eq!(err, ConfigError::Invalid("BACKEND_CORS_ORIGINS"));

        let err = settings(&[
            ("TENANT_ID", TENANT),
            ("AUTH_CLIENT_ID", CLIENT),
            ("BACKEND_CORS_ORIGINS", "localhost:8000"),
        ])
        .unwrap_err();
        assert_eq!(err, ConfigError::Invalid("BACKEND_CORS_ORIGINS"));
    }

    #[test]
    fn wildcard_origin() {
        let s = settings(&[
            ("TENANT_ID", TENANT),
            ("AUTH_CLIENT_ID", CLIENT),
            ("BACKEND_CORS_ORIGINS", "*"),
        ])
        .unwrap();
        assert_eq!(s.cors_origins, vec!["*"]);
    }

    #[test]
    fn overrides() {
        let s = settings(&[
            ("TENANT_ID", TENANT),
            ("AUTH_CLIENT_ID", CLIENT),
            ("SCOPE_DESCRIPTION", "read"),
            ("PORT", "3000"),
            ("JWKS_REFRESH_SECS", "0"),
            ("OPENID_CONFIG_URL", "http://localhost:8080/default/.well-known/openid-configuration"),
        ])
        .unwrap();
        assert_eq!(s.scope_name(), format!("api://{CLIENT}/read"));
        assert_eq!(s.port, 3000);
        assert_eq!(s.jwks_refresh_secs, 0);
        assert_eq!(
            s.openid_config_url(),
            "http://localhost:8080/default/.well-known/openid-configuration"
        );
    }

    #[test]
    fn absent_env_file_is_ignored() {
        let path = std::env::temp_dir().join(format!("azure-rapi-absent-{}.env", std::process::id()));
        assert_eq!(env_file(dotenvy::from_path(&path)), Ok(()));
    }

    #[test]
    fn malformed_env_file_is_fatal() {
        let path = std::env::temp_dir().join(format!("azure-rapi-malformed-{}.env", std::process::id()));
        std::fs::write(&path, "AZURE_RAPI_TEST_KEY=\"unterminated\n").unwrap();
        let loaded = env_file(dotenvy::from_path(&path));
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(loaded, Err(ConfigError::EnvFile(_))));
    }

    #[test]
    fn bad_port() {
        let err = settings(&[
            ("TENANT_ID", TENANT),
            ("AUTH_CLIENT_ID", CLIENT),
            ("PORT", "eighty"),
        ])
        .unwrap_err();
        assert_eq!(err, ConfigError::Invalid("PORT"));
    }
}
