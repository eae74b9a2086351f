use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use relay_core::write_text_atomic;

pub const RUNTIME_PROFILE_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_RUNTIME_PROFILE_PATH: &str = ".relay/config.json";
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
pub const RELAY_BASE_URL_ENV: &str = "RELAY_BASE_URL";
pub const RELAY_AUTH_TOKEN_ENV: &str = "RELAY_AUTH_TOKEN";

fn runtime_profile_schema_version() -> u32 {
    RUNTIME_PROFILE_SCHEMA_VERSION
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

/// Persisted runtime profile consulted by every proxied call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeProfile {
    #[serde(default = "runtime_profile_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Environment variable consulted when `auth_token` is unset.
    #[serde(default)]
    pub auth_token_env: Option<String>,
    /// OpenAPI JSON document used to resolve `operationId` call targets.
    #[serde(default)]
    pub openapi_spec: Option<PathBuf>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for RuntimeProfile {
    fn default() -> Self {
        Self {
            schema_version: RUNTIME_PROFILE_SCHEMA_VERSION,
            base_url: None,
            headers: BTreeMap::new(),
            auth_token: None,
            auth_token_env: None,
            openapi_spec: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Overrides layered on top of the persisted profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeProfileOverrides {
    pub base_url: Option<String>,
    pub auth_token: Option<String>,
}

impl RuntimeProfileOverrides {
    /// Reads `RELAY_BASE_URL` / `RELAY_AUTH_TOKEN`, letting explicit values win.
    pub fn with_env_fallback(self) -> Self {
        Self {
            base_url: self.base_url.or_else(|| non_empty_env(RELAY_BASE_URL_ENV)),
            auth_token: self
                .auth_token
                .or_else(|| non_empty_env(RELAY_AUTH_TOKEN_ENV)),
        }
    }
}

impl RuntimeProfile {
    /// Returns the configured bearer token, consulting `auth_token_env` last.
    pub fn resolved_auth_token(&self) -> Option<String> {
        self.auth_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .or_else(|| self.auth_token_env.as_deref().and_then(non_empty_env))
    }

    /// Returns the trimmed base URL without trailing slashes.
    pub fn normalized_base_url(&self) -> Option<String> {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|base| !base.is_empty())
            .map(|base| base.trim_end_matches('/').to_string())
    }

    pub fn apply_overrides(&mut self, overrides: &RuntimeProfileOverrides) {
        if let Some(base_url) = overrides.base_url.as_ref() {
            self.base_url = Some(base_url.clone());
        }
        if let Some(auth_token) = overrides.auth_token.as_ref() {
            self.auth_token = Some(auth_token.clone());
        }
    }
}

/// Loads a runtime profile; a missing or blank file yields the defaults.
///
/// A relative `openapi_spec` is resolved against the profile's directory.
pub fn load_runtime_profile(path: &Path) -> Result<RuntimeProfile> {
    if !path.exists() {
        return Ok(RuntimeProfile::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read runtime profile {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(RuntimeProfile::default());
    }
    let mut profile = serde_json::from_str::<RuntimeProfile>(&raw)
        .with_context(|| format!("failed to parse runtime profile {}", path.display()))?;
    if profile.schema_version != RUNTIME_PROFILE_SCHEMA_VERSION {
        bail!(
            "unsupported runtime profile schema_version {} in {} (expected {})",
            profile.schema_version,
            path.display(),
            RUNTIME_PROFILE_SCHEMA_VERSION
        );
    }
    if let Some(spec) = profile.openapi_spec.as_ref() {
        if spec.is_relative() {
            if let Some(parent) = path.parent() {
                profile.openapi_spec = Some(parent.join(spec));
            }
        }
    }
    Ok(profile)
}

/// Persists a runtime profile atomically as pretty JSON.
pub fn save_runtime_profile(path: &Path, profile: &RuntimeProfile) -> Result<()> {
    let mut payload =
        serde_json::to_string_pretty(profile).context("failed to encode runtime profile")?;
    payload.push('\n');
    write_text_atomic(path, &payload)
        .with_context(|| format!("failed to write runtime profile {}", path.display()))
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{
        load_runtime_profile, save_runtime_profile, RuntimeProfile, RuntimeProfileOverrides,
        DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_RETRIES,
    };

    #[test]
    fn unit_missing_runtime_profile_yields_defaults() {
        let temp = tempdir().expect("tempdir");
        let profile = load_runtime_profile(&temp.path().join("absent.json")).expect("load");
        assert_eq!(profile, RuntimeProfile::default());
        assert_eq!(profile.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(profile.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    }

    #[test]
    fn functional_runtime_profile_save_then_load_resolves_relative_openapi_spec() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("profiles/config.json");
        let profile = RuntimeProfile {
            base_url: Some("https://api.example.test/v1/".to_string()),
            openapi_spec: Some("openapi.json".into()),
            ..RuntimeProfile::default()
        };
        save_runtime_profile(&path, &profile).expect("save");

        let loaded = load_runtime_profile(&path).expect("load");
        assert_eq!(
            loaded.normalized_base_url().as_deref(),
            Some("https://api.example.test/v1")
        );
        assert_eq!(
            loaded.openapi_spec,
            Some(temp.path().join("profiles/openapi.json"))
        );
    }

    #[test]
    fn regression_runtime_profile_rejects_unknown_schema_version() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"schema_version":9}"#).expect("write");
        let error = load_runtime_profile(&path).expect_err("schema should be rejected");
        assert!(error
            .to_string()
            .contains("unsupported runtime profile schema_version 9"));
    }

    #[test]
    fn unit_overrides_replace_base_url_and_token() {
        let mut profile = RuntimeProfile {
            base_url: Some("https://old.test".to_string()),
            ..RuntimeProfile::default()
        };
        profile.apply_overrides(&RuntimeProfileOverrides {
            base_url: Some("https://new.test".to_string()),
            auth_token: Some("secret".to_string()),
        });
        assert_eq!(profile.base_url.as_deref(), Some("https://new.test"));
        assert_eq!(profile.resolved_auth_token().as_deref(), Some("secret"));
    }

    #[test]
    fn unit_blank_auth_token_is_treated_as_absent() {
        let profile = RuntimeProfile {
            auth_token: Some("   ".to_string()),
            ..RuntimeProfile::default()
        };
        assert_eq!(profile.resolved_auth_token(), None);
    }
}
