//! Settings loading.

use std::path::Path;

use tracing::debug;

use super::error::ConfigError;
use super::schema::MetricsSettings;

/// Load settings from a YAML file.
pub fn load_settings(path: &Path) -> Result<MetricsSettings, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let settings = parse_settings(&contents)?;
    debug!(path = %path.display(), prefix = %settings.prefix(), "Loaded metrics settings");
    Ok(settings)
}

/// Parse settings from YAML text.
pub fn parse_settings(contents: &str) -> Result<MetricsSettings, ConfigError> {
    if contents.trim().is_empty() {
        return Err(ConfigError::EmptyConfigFile);
    }
    Ok(serde_saphyr::from_str(contents)?)
}
