//! Jules API key storage
//!
//! The key never lives in `config.toml`. It comes from `JULES_API_KEY` or,
//! failing that, from `~/.config/foreman/secrets.toml`, which must be
//! readable by its owner only (0600 on Unix).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "JULES_API_KEY";

const TEMPLATE: &str = r#"# Foreman credentials. Keep this file at mode 600.

[jules]
# Sent as the X-Goog-Api-Key header on every Jules API request
api_key = ""
"#;

/// Contents of the secrets file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Secrets {
    pub jules: JulesSecrets,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct JulesSecrets {
    pub api_key: Option<String>,
}

/// Where a resolved API key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Env,
    File,
}

/// Refuse files that group or other can read
#[cfg(unix)]
fn check_owner_only(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path)?.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(Error::Config(format!(
            "Secrets file {} has insecure permissions {:o}, expected 600",
            path.display(),
            mode
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_owner_only(_path: &Path) -> Result<()> {
    Ok(())
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl Secrets {
    /// `~/.config/foreman/secrets.toml`
    pub fn default_secrets_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("foreman").join("secrets.toml"))
    }

    /// Load from the default path; a missing file yields empty secrets
    pub fn load() -> Result<Self> {
        match Self::default_secrets_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from `path`; a missing file yields empty secrets
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No secrets file");
            return Ok(Self::default());
        }
        check_owner_only(path)?;

        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// API key from `JULES_API_KEY`, else from the file
    pub fn api_key(&self) -> Option<String> {
        self.resolve_key(std::env::var(API_KEY_ENV).ok().as_deref())
            .map(|(key, _)| key)
    }

    /// Which source `api_key` would use, if any
    pub fn key_source(&self) -> Option<KeySource> {
        self.resolve_key(std::env::var(API_KEY_ENV).ok().as_deref())
            .map(|(_, source)| source)
    }

    fn resolve_key(&self, env_value: Option<&str>) -> Option<(String, KeySource)> {
        if let Some(key) = env_value.and_then(non_empty) {
            debug!(source = API_KEY_ENV, "Using Jules API key");
            return Some((key, KeySource::Env));
        }
        let key = self.jules.api_key.as_deref().and_then(non_empty)?;
        debug!(source = "secrets file", "Using Jules API key");
        Some((key, KeySource::File))
    }

    /// Write an empty template to the default path and return it
    pub fn create_template() -> Result<PathBuf> {
        let path = Self::default_secrets_path()
            .ok_or_else(|| Error::Config("Could not determine secrets path".to_string()))?;
        Self::write_template(&path)?;
        Ok(path)
    }

    fn write_template(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(Error::Config(format!(
                "Secrets file already exists at {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, TEMPLATE)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        warn!(path = %path.display(), "Wrote secrets template, add the Jules API key to it");
        Ok(())
    }
}
