use crate::error::{LimitsError, Result};
use crate::quota::types::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub template: TemplateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub database_url: String,
}

/// Default maximum for each kind in a newly created Reseller pool.
/// Kinds left out default to 0.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default)]
    pub reseller_defaults: BTreeMap<ResourceKind, u32>,
}

/// What a templated domain creation brings along
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TemplateConfig {
    #[serde(default)]
    pub create_domain_admin: bool,
    #[serde(default = "default_aliases")]
    pub default_aliases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
}

fn default_aliases() -> Vec<String> {
    vec!["postmaster".to_string(), "abuse".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8090".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://mail-limits.db".to_string(),
        }
    }
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            create_domain_admin: false,
            default_aliases: default_aliases(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| LimitsError::Config(e.to_string()))?;

        toml::from_str(&content).map_err(|e| LimitsError::Config(e.to_string()))
    }

    /// Optional file, then `MAIL_LIMITS__SECTION__KEY` environment overrides
    /// (e.g. `MAIL_LIMITS__LIMITS__RESELLER_DEFAULTS__MAILBOXES=50`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("MAIL_LIMITS")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("template.default_aliases"),
            )
            .build()
            .map_err(|e| LimitsError::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| LimitsError::Config(e.to_string()))
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            limits: LimitsConfig::default(),
            template: TemplateConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:8090");
        assert!(config.limits.reseller_defaults.is_empty());
        assert_eq!(config.template.default_aliases, vec!["postmaster", "abuse"]);
    }

    #[test]
    fn test_from_file_with_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[limits.reseller_defaults]
domains = 5
mailboxes = 50

[template]
create_domain_admin = true
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(
            config.limits.reseller_defaults.get(&ResourceKind::Mailboxes),
            Some(&50)
        );
        assert_eq!(
            config.limits.reseller_defaults.get(&ResourceKind::Domains),
            Some(&5)
        );
        assert!(config.template.create_domain_admin);
        // Missing sections fall back to defaults
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.template.default_aliases.len(), 2);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[limits.reseller_defaults]\nquarks = 1").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(LimitsError::Config(_))
        ));
    }

    #[test]
    fn test_load_layers_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nlisten_addr = \"0.0.0.0:9000\"\n\n[limits.reseller_defaults]\nmailbox_aliases = 7"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:9000");
        assert_eq!(
            config.limits.reseller_defaults.get(&ResourceKind::MailboxAliases),
            Some(&7)
        );
        assert_eq!(config.storage.database_url, "sqlite://mail-limits.db");
    }

    #[test]
    fn test_missing_file() {
        assert!(Config::from_file("/nonexistent/mail-limits.toml").is_err());
    }
}
