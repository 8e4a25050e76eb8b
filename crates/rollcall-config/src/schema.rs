//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Location permission window
    #[serde(default)]
    pub permission: RawPermissionConfig,

    /// Options passed to the platform geolocation API
    #[serde(default)]
    pub geolocation: RawGeolocationConfig,

    /// Check-in radius bounds
    #[serde(default)]
    pub check_in: RawCheckInConfig,

    /// Optional operating region; coordinates outside it are refused
    #[serde(default)]
    pub region: Option<RawRegion>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Data directory for the store
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawPermissionConfig {
    /// Activity window length in milliseconds (default: 24h)
    pub expiration_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawGeolocationConfig {
    pub high_accuracy: Option<bool>,
    pub timeout_ms: Option<u64>,
    /// Maximum age of a cached fix; 0 forces a fresh one
    pub maximum_age_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawCheckInConfig {
    pub min_radius_meters: Option<f64>,
    pub max_radius_meters: Option<f64>,
    /// Radius used when a section is created without one
    pub default_radius_meters: Option<f64>,
}

/// Operating region bounding box
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawRegion {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_sections() {
        let config: RawConfig = toml::from_str("config_version = 1").unwrap();
        assert!(config.region.is_none());
        assert!(config.permission.expiration_time_ms.is_none());
        assert!(config.service.data_dir.is_none());
    }

    #[test]
    fn parse_region() {
        let toml_str = r#"
            config_version = 1

            [region]
            min_latitude = 4.5
            max_latitude = 21.5
            min_longitude = 116.0
            max_longitude = 127.0
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        let region = config.region.unwrap();
        assert_eq!(region.min_latitude, 4.5);
        assert_eq!(region.max_longitude, 127.0);
    }

    #[test]
    fn parse_geolocation_options() {
        let toml_str = r#"
            config_version = 1

            [geolocation]
            high_accuracy = false
            timeout_ms = 5000
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.geolocation.high_accuracy, Some(false));
        assert_eq!(config.geolocation.timeout_ms, Some(5000));
        assert!(config.geolocation.maximum_age_ms.is_none());
    }
}
