// Settings for the content layer: CMS endpoint, credentials source, cache
// sizing, per-entity TTLs and logging. Layered from an optional file and
// `CMS__*` environment variables.

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;
use crate::error::{ContentError, ContentResult};
use crate::normalize::{ImageFormat, ImageTransform};

const DEFAULT_BASE_URL: &str = "http://localhost:8055";
const DEFAULT_TOKEN_ENV: &str = "CMS_TOKEN";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_LOCALE: &str = "en-US";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CmsSettings {
    pub base_url: String,
    // Falls back to `base_url` when unset
    pub asset_base_url: Option<String>,
    // Name of the environment variable holding the bearer token
    pub token_env: String,
    pub request_timeout_ms: u64,
    pub default_locale: String,
    pub image: Option<ImageTransform>,
    pub cache: CacheSettings,
    pub ttl: TtlTable,
    pub logging: LoggingSettings,
}

impl Default for CmsSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            asset_base_url: None,
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            request_timeout_ms: DEFAULT_TIMEOUT_MS,
            default_locale: DEFAULT_LOCALE.to_string(),
            image: None,
            cache: CacheSettings::default(),
            ttl: TtlTable::default(),
            logging: LoggingSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
        }
    }
}

// TTLs in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlTable {
    pub hotel: u64,
    pub hotels_list: u64,
    pub destination: u64,
    pub destinations_list: u64,
    pub category: u64,
    pub categories_list: u64,
    pub page: u64,
    pub navigation: u64,
    pub translations: u64,
}

impl Default for TtlTable {
    fn default() -> Self {
        Self {
            hotel: 300,
            hotels_list: 300,
            destination: 600,
            destinations_list: 600,
            category: 1800,
            categories_list: 1800,
            page: 3600,
            navigation: 3600,
            translations: 86_400,
        }
    }
}

impl TtlTable {
    pub fn item(&self, kind: EntityKind) -> u64 {
        match kind {
            EntityKind::Hotel => self.hotel,
            EntityKind::Destination => self.destination,
            EntityKind::Category => self.category,
            EntityKind::Page => self.page,
            EntityKind::Navigation => self.navigation,
            EntityKind::Translation => self.translations,
        }
    }

    pub fn list(&self, kind: EntityKind) -> u64 {
        match kind {
            EntityKind::Hotel => self.hotels_list,
            EntityKind::Destination => self.destinations_list,
            EntityKind::Category => self.categories_list,
            EntityKind::Page => self.page,
            EntityKind::Navigation => self.navigation,
            EntityKind::Translation => self.translations,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    // EnvFilter directive, e.g. `info` or `travel_content=debug`
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl CmsSettings {
    /// Loads settings from an optional file, then `CMS__*` environment
    /// variables (`CMS__BASE_URL`, `CMS__CACHE__MAX_ENTRIES`, ...).
    pub fn load(path: Option<&Path>) -> ContentResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings: CmsSettings = builder
            .add_source(
                Environment::with_prefix("CMS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| ContentError::Configuration(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(toml: &str) -> ContentResult<Self> {
        let settings: CmsSettings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| ContentError::Configuration(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> ContentResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ContentError::Configuration(format!(
                "base_url must be an http(s) URL, got `{}`",
                self.base_url
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(ContentError::Configuration(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(ContentError::Configuration(
                "cache.max_entries must be greater than zero".to_string(),
            ));
        }
        if self.token_env.trim().is_empty() {
            return Err(ContentError::Configuration(
                "token_env must name an environment variable".to_string(),
            ));
        }
        Ok(())
    }

    pub fn asset_base(&self) -> &str {
        self.asset_base_url.as_deref().unwrap_or(&self.base_url)
    }
}
