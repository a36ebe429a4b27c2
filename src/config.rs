//! Configuration loading
//!
//! A node reads an optional TOML file whose sections mirror [`NodeConfig`].
//! Missing keys fall back to defaults; command-line values are applied on
//! top by the caller.

use std::fs;
use std::path::Path;

use crate::error::{BullyError, BullyResult};
use crate::p2p::NodeConfig;

/// Load and validate a node configuration file
pub fn load_config(path: &Path) -> BullyResult<NodeConfig> {
    let text = fs::read_to_string(path).map_err(|e| BullyError::config(path, e))?;
    let config = from_toml_str(&text).map_err(|e| BullyError::config(path, e))?;
    config.validate()?;
    Ok(config)
}

/// Parse a configuration from TOML text without validating it
pub fn from_toml_str(text: &str) -> Result<NodeConfig, toml::de::Error> {
    toml::from_str(text)
}
