//! Configuration validation.
//!
//! Semantic checks on top of what serde already enforces. Every problem is
//! reported, not just the first one.

use thiserror::Error;

use crate::config::schema::{BreakerConfig, QueryConfig, ResilienceConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{section}: stale_time_ms ({stale_ms}) must not exceed ttl_ms ({ttl_ms})")]
    StaleAfterTtl {
        section: String,
        stale_ms: u64,
        ttl_ms: u64,
    },

    #[error("{section}: {field} must be greater than zero")]
    Zero { section: String, field: &'static str },

    #[error("{section}: base_delay_ms ({base_ms}) exceeds max_delay_ms ({max_ms})")]
    DelayRange {
        section: String,
        base_ms: u64,
        max_ms: u64,
    },

    #[error("invalid circuit name {0:?}")]
    CircuitName(String),

    #[error("observability: invalid metrics address {0:?}")]
    MetricsAddress(String),
}

/// Validate a whole configuration, collecting every error.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_query(&config.query, &mut errors);
    validate_breaker("circuit_breaker", &config.circuit_breaker, &mut errors);

    for (name, breaker) in &config.circuits {
        if name.trim().is_empty() {
            errors.push(ValidationError::CircuitName(name.clone()));
        }
        validate_breaker(&format!("circuits.{}", name), breaker, &mut errors);
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_query(query: &QueryConfig, errors: &mut Vec<ValidationError>) {
    let section = "query";
    if query.stale_time_ms > query.ttl_ms {
        errors.push(ValidationError::StaleAfterTtl {
            section: section.to_string(),
            stale_ms: query.stale_time_ms,
            ttl_ms: query.ttl_ms,
        });
    }
    if query.max_attempts == 0 {
        errors.push(zero(section, "max_attempts"));
    }
    if query.max_entries == 0 {
        errors.push(zero(section, "max_entries"));
    }
    if query.base_delay_ms > query.max_delay_ms {
        errors.push(ValidationError::DelayRange {
            section: section.to_string(),
            base_ms: query.base_delay_ms,
            max_ms: query.max_delay_ms,
        });
    }
}

/// Checks shared by the default breaker section and per-circuit overrides.
pub fn validate_breaker(section: &str, breaker: &BreakerConfig, errors: &mut Vec<ValidationError>) {
    if breaker.failure_threshold == 0 {
        errors.push(zero(section, "failure_threshold"));
    }
    if breaker.success_threshold == 0 {
        errors.push(zero(section, "success_threshold"));
    }
    if breaker.half_open_max_probes == 0 {
        errors.push(zero(section, "half_open_max_probes"));
    }
    if breaker.enable_health_check && breaker.health_check_interval_ms == 0 {
        errors.push(zero(section, "health_check_interval_ms"));
    }
}

fn zero(section: &str, field: &'static str) -> ValidationError {
    ValidationError::Zero {
        section: section.to_string(),
        field,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ResilienceConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_all_errors() {
        let mut config = ResilienceConfig::default();
        config.query.stale_time_ms = config.query.ttl_ms + 1;
        config.query.max_attempts = 0;
        config.circuit_breaker.success_threshold = 0;
        let mut payments = BreakerConfig::default();
        payments.failure_threshold = 0;
        config.circuits.insert("payments".into(), payments);

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.to_string().contains("circuits.payments")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::StaleAfterTtl { .. })));
    }

    #[test]
    fn test_metrics_address_checked_only_when_enabled() {
        let mut config = ResilienceConfig::default();
        config.observability.metrics_address = "not-an-address".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::MetricsAddress("not-an-address".into())]);
    }
}
