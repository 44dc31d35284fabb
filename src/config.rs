use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::SheetError;
use crate::schema::{DEFAULT_EXCLUSION_TAG, EnumerateOptions};

pub const CONFIG_FILE: &str = "psheets.json";
pub const DEFAULT_SERVER: &str = "http://localhost:8000";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub admin: Option<bool>,
    #[serde(default)]
    pub exclusion_tag: Option<String>,
    #[serde(default)]
    pub delimiter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub server: String,
    pub credentials: Option<Credentials>,
    pub admin: bool,
    pub exclusion_tag: String,
    pub delimiter: Option<u8>,
}

impl ResolvedConfig {
    pub fn enumerate_options(&self) -> EnumerateOptions {
        EnumerateOptions {
            admin: self.admin,
            exclusion_tag: self.exclusion_tag.clone(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit path, then `psheets.json` in the working directory, then the
    /// user config directory.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SheetError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => Self::default_path().ok_or(SheetError::MissingConfig)?,
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SheetError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| SheetError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    fn default_path() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("org", "portal-sheets", "psheets")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
            .filter(|path| path.exists())
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, SheetError> {
        let server = config
            .server
            .map(|server| server.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_SERVER.to_string());

        let credentials = match (config.key, config.secret) {
            (Some(key), Some(secret)) => Some(Credentials { key, secret }),
            (None, None) => None,
            _ => {
                return Err(SheetError::ConfigParse(
                    "key and secret must be given together".to_string(),
                ));
            }
        };

        let delimiter = match config.delimiter.as_deref() {
            None => None,
            Some("\\t") | Some("\t") | Some("tab") => Some(b'\t'),
            Some(value) if value.len() == 1 => value.bytes().next(),
            Some(value) => {
                return Err(SheetError::ConfigParse(format!(
                    "delimiter must be a single character: {value}"
                )));
            }
        };

        Ok(ResolvedConfig {
            server,
            credentials,
            admin: config.admin.unwrap_or(false),
            exclusion_tag: config
                .exclusion_tag
                .unwrap_or_else(|| DEFAULT_EXCLUSION_TAG.to_string()),
            delimiter,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_for_empty_config() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.server, DEFAULT_SERVER);
        assert_eq!(resolved.credentials, None);
        assert!(!resolved.admin);
        assert_eq!(resolved.exclusion_tag, DEFAULT_EXCLUSION_TAG);
        assert_eq!(resolved.delimiter, None);
    }

    #[test]
    fn half_credentials_are_rejected() {
        let config = Config {
            key: Some("KEY".to_string()),
            ..Config::default()
        };
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert_matches!(err, SheetError::ConfigParse(_));
    }
}
