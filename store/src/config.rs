//! Store configuration.
//!
//! Settings carry serde-friendly defaults and can be overridden from the
//! environment, so tests inject a `mockable::Env` instead of mutating process
//! state.

use mockable::Env;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

const IMAGE_BASE_URL_ENV: &str = "STORE_IMAGE_BASE_URL";
const DEFAULT_PAGE_SIZE_ENV: &str = "STORE_DEFAULT_PAGE_SIZE";
const MAX_PAGE_SIZE_ENV: &str = "STORE_MAX_PAGE_SIZE";

/// Default base for resolving relative poster/still paths.
pub const DEFAULT_IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p/w500/";

/// Errors raised while building store configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The image base URL did not parse.
    #[error("invalid image base URL '{value}': {message}")]
    InvalidBaseUrl {
        /// The rejected value.
        value: String,
        /// Parser detail.
        message: String,
    },
    /// A numeric setting did not parse or was out of range.
    #[error("invalid value for {name}='{value}'; expected a positive integer")]
    InvalidPageSize {
        /// Environment variable name.
        name: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// Tunables for the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL prepended to relative image paths at read time.
    pub image_base_url: String,
    /// Page size applied when callers do not request a limit.
    pub default_page_size: usize,
    /// Upper bound on a single page.
    pub max_page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            image_base_url: DEFAULT_IMAGE_BASE_URL.to_owned(),
            default_page_size: pagination::DEFAULT_PAGE_SIZE,
            max_page_size: pagination::MAX_PAGE_SIZE,
        }
    }
}

impl StoreConfig {
    /// Build configuration from the environment, falling back to defaults
    /// for unset variables.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when a variable is set but invalid.
    pub fn from_env<E: Env>(env: &E) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = env.string(IMAGE_BASE_URL_ENV) {
            // Validate eagerly so a bad override fails at startup, not on
            // the first read.
            ImageUrlResolver::new(&value)?;
            config.image_base_url = value;
        }
        if let Some(value) = env.string(DEFAULT_PAGE_SIZE_ENV) {
            config.default_page_size = parse_page_size(DEFAULT_PAGE_SIZE_ENV, &value)?;
        }
        if let Some(value) = env.string(MAX_PAGE_SIZE_ENV) {
            config.max_page_size = parse_page_size(MAX_PAGE_SIZE_ENV, &value)?;
        }
        Ok(config)
    }

    /// Build the image URL resolver for this configuration.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidBaseUrl`] when the configured base does
    /// not parse.
    pub fn image_resolver(&self) -> Result<ImageUrlResolver, ConfigError> {
        ImageUrlResolver::new(&self.image_base_url)
    }
}

fn parse_page_size(name: &'static str, value: &str) -> Result<usize, ConfigError> {
    match value.parse::<usize>() {
        Ok(size) if size > 0 => Ok(size),
        _ => Err(ConfigError::InvalidPageSize {
            name,
            value: value.to_owned(),
        }),
    }
}

/// Joins relative image paths onto a validated base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUrlResolver {
    base: Url,
}

impl ImageUrlResolver {
    /// Parse and validate a base URL.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidBaseUrl`] when the value does not parse
    /// as an absolute URL.
    pub fn new(base: &str) -> Result<Self, ConfigError> {
        let parsed = Url::parse(base).map_err(|error| ConfigError::InvalidBaseUrl {
            value: base.to_owned(),
            message: error.to_string(),
        })?;
        Ok(Self { base: parsed })
    }

    /// Resolve a stored relative path into an absolute display URL.
    #[must_use]
    pub fn resolve(&self, relative_path: &str) -> String {
        let trimmed = relative_path.trim_start_matches('/');
        self.base.join(trimmed).map_or_else(
            |_| format!("{}{trimmed}", self.base),
            |joined| joined.to_string(),
        )
    }
}
