use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::{ContainerOptions, UploadOptions};

/// Maximum objects per listing page unless configured otherwise.
pub const DEFAULT_LIST_PAGE_SIZE: usize = 5000;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Adapter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Container holding every object of this adapter
    pub container: String,

    /// Root namespace prepended to every object key
    #[serde(default)]
    pub prefix: String,

    /// Maximum results requested per listing page
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,

    /// Upload options applied when a call does not set them
    #[serde(default)]
    pub upload: UploadOptions,

    /// Options used when the adapter has to create the container
    #[serde(default)]
    pub container_options: ContainerOptions,
}

fn default_list_page_size() -> usize {
    DEFAULT_LIST_PAGE_SIZE
}

impl AdapterConfig {
    /// Configuration for `container` with defaults everywhere else.
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            prefix: String::new(),
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
            upload: UploadOptions::default(),
            container_options: ContainerOptions::default(),
        }
    }

    /// Set the root namespace prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the listing page size.
    pub fn with_list_page_size(mut self, list_page_size: usize) -> Self {
        self.list_page_size = list_page_size;
        self
    }

    /// Set the default upload options.
    pub fn with_upload_defaults(mut self, upload: UploadOptions) -> Self {
        self.upload = upload;
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AdapterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check values a storage service would reject.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.container.trim().is_empty() {
            return Err(ConfigError::Invalid("container must not be empty".into()));
        }
        if self.list_page_size == 0 {
            return Err(ConfigError::Invalid(
                "list_page_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
