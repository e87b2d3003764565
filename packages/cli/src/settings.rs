//! TOML settings for the driver.
//!
//! Without `--config` the embedded `config/default.toml` is used. A user
//! file may set any subset of keys; the rest keep their defaults.

use std::path::Path;

use animal_watch_lifecycle::MarkerPolicy;
use animal_watch_live_view::LiveViewConfig;
use animal_watch_lookup::LookupConfig;
use serde::{Deserialize, Serialize};

/// Defaults shipped with the binary.
const DEFAULT_TOML: &str = include_str!("../config/default.toml");

/// Effective settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub live_view: LiveViewConfig,
    pub lookup: LookupConfig,
    pub policy: MarkerPolicy,
}

impl Settings {
    /// Loads `path`, or the embedded defaults when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                log::info!("Loaded settings from {}", path.display());
                toml::from_str(&raw)?
            }
            None => toml::from_str(DEFAULT_TOML)?,
        };
        Ok(settings)
    }

    /// Settings rendered back as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_match_code_defaults() {
        assert_eq!(toml::from_str::<Settings>(DEFAULT_TOML).unwrap(), Settings::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let settings: Settings = toml::from_str(
            "[lookup]\nforeground_interval_secs = 30\n\n[live_view]\nradius_meters = 1000.0\n",
        )
        .unwrap();
        assert_eq!(settings.lookup.foreground_interval_secs, 30);
        assert_eq!(settings.lookup.background_interval_secs, 300);
        assert!((settings.live_view.radius_meters - 1000.0).abs() < f64::EPSILON);
        assert_eq!(settings.policy, MarkerPolicy::default());
    }

    #[test]
    fn renders_back_to_toml() {
        let rendered = Settings::default().to_toml().unwrap();
        assert_eq!(toml::from_str::<Settings>(&rendered).unwrap(), Settings::default());
    }
}
