//! Configuration validation

use crate::policy::{
    DEFAULT_MAX_RADIUS_METERS, DEFAULT_MIN_RADIUS_METERS, DEFAULT_RADIUS_METERS,
    MAX_EXPIRATION_TIME_MS,
};
use crate::schema::{RawCheckInConfig, RawConfig, RawRegion};
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("permission.expiration_time_ms must be greater than zero")]
    ZeroExpiration,

    #[error("permission.expiration_time_ms {0} exceeds one year")]
    ExpirationTooLong(u64),

    #[error("geolocation.timeout_ms must be greater than zero")]
    ZeroTimeout,

    #[error("geolocation.maximum_age_ms must be 0; cached positions are never accepted, got {0}")]
    CachedPositionAllowed(u64),

    #[error("check_in: {0}")]
    RadiusError(String),

    #[error("region: {0}")]
    RegionError(String),
}

/// Validate a raw configuration, collecting every problem found
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    match config.permission.expiration_time_ms {
        Some(0) => errors.push(ValidationError::ZeroExpiration),
        Some(ms) if ms > MAX_EXPIRATION_TIME_MS => {
            errors.push(ValidationError::ExpirationTooLong(ms))
        }
        _ => {}
    }

    if config.geolocation.timeout_ms == Some(0) {
        errors.push(ValidationError::ZeroTimeout);
    }

    if let Some(age) = config.geolocation.maximum_age_ms.filter(|&age| age != 0) {
        errors.push(ValidationError::CachedPositionAllowed(age));
    }

    errors.extend(validate_radius_bounds(&config.check_in));

    if let Some(region) = &config.region {
        errors.extend(validate_region(region));
    }

    errors
}

fn validate_radius_bounds(check_in: &RawCheckInConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let min = check_in.min_radius_meters.unwrap_or(DEFAULT_MIN_RADIUS_METERS);
    let max = check_in.max_radius_meters.unwrap_or(DEFAULT_MAX_RADIUS_METERS);
    let default = check_in.default_radius_meters.unwrap_or(DEFAULT_RADIUS_METERS);

    for (name, value) in [("min", min), ("max", max), ("default", default)] {
        if !value.is_finite() || value <= 0.0 {
            errors.push(ValidationError::RadiusError(format!(
                "{}_radius_meters must be a positive number, got {}",
                name, value
            )));
        }
    }

    if min > max {
        errors.push(ValidationError::RadiusError(format!(
            "min_radius_meters ({}) exceeds max_radius_meters ({})",
            min, max
        )));
    }

    if default < min || default > max {
        errors.push(ValidationError::RadiusError(format!(
            "default_radius_meters ({}) must be within {}..={}",
            default, min, max
        )));
    }

    errors
}

fn validate_region(region: &RawRegion) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for (name, value) in [
        ("min_latitude", region.min_latitude),
        ("max_latitude", region.max_latitude),
    ] {
        if !(-90.0..=90.0).contains(&value) {
            errors.push(ValidationError::RegionError(format!(
                "{} {} is outside -90..=90",
                name, value
            )));
        }
    }

    for (name, value) in [
        ("min_longitude", region.min_longitude),
        ("max_longitude", region.max_longitude),
    ] {
        if !(-180.0..=180.0).contains(&value) {
            errors.push(ValidationError::RegionError(format!(
                "{} {} is outside -180..=180",
                name, value
            )));
        }
    }

    if region.min_latitude >= region.max_latitude {
        errors.push(ValidationError::RegionError(
            "min_latitude must be less than max_latitude".into(),
        ));
    }

    if region.min_longitude >= region.max_longitude {
        errors.push(ValidationError::RegionError(
            "min_longitude must be less than max_longitude".into(),
        ));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> RawConfig {
        toml::from_str("config_version = 1").unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&base_config()).is_empty());
    }

    #[test]
    fn zero_expiration_and_timeout_rejected() {
        let mut config = base_config();
        config.permission.expiration_time_ms = Some(0);
        config.geolocation.timeout_ms = Some(0);

        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::ZeroExpiration)));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::ZeroTimeout)));
    }

    #[test]
    fn expiration_window_is_bounded() {
        let mut config = base_config();
        config.permission.expiration_time_ms = Some(MAX_EXPIRATION_TIME_MS);
        assert!(validate_config(&config).is_empty());

        config.permission.expiration_time_ms = Some(u64::MAX / 2);
        let errors = validate_config(&config);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ValidationError::ExpirationTooLong(_)));
    }

    #[test]
    fn cached_positions_rejected() {
        let mut config = base_config();
        config.geolocation.maximum_age_ms = Some(0);
        assert!(validate_config(&config).is_empty());

        config.geolocation.maximum_age_ms = Some(600_000);
        let errors = validate_config(&config);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ValidationError::CachedPositionAllowed(600_000)));
    }

    #[test]
    fn inverted_radius_bounds_rejected() {
        let mut config = base_config();
        config.check_in.min_radius_meters = Some(200.0);
        config.check_in.max_radius_meters = Some(100.0);

        let errors = validate_config(&config);
        assert!(!errors.is_empty());
        assert!(errors.iter().all(|e| matches!(e, ValidationError::RadiusError(_))));
    }

    #[test]
    fn default_radius_outside_bounds_rejected() {
        let mut config = base_config();
        config.check_in.default_radius_meters = Some(500.0);

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn region_errors_are_collected() {
        let mut config = base_config();
        config.region = Some(RawRegion {
            min_latitude: 95.0,
            max_latitude: 10.0,
            min_longitude: 130.0,
            max_longitude: 120.0,
        });

        let errors = validate_config(&config);
        // Out-of-range latitude plus both inverted pairs
        assert_eq!(errors.len(), 3);
    }
}
