use std::net::SocketAddr;

use http::{HeaderName, HeaderValue};

use crate::config::models::{FilterSettings, ServerConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Route conflict detected: {message}")]
    RouteConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if config.event_loops == 0 {
            errors.push(ValidationError::InvalidField {
                field: "event_loops".to_string(),
                message: "At least one event loop is required".to_string(),
            });
        }

        if config.exchange_timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "exchange_timeout_secs".to_string(),
                message: "Must be greater than zero".to_string(),
            });
        }

        errors.extend(Self::validate_filter_settings(&config.filters));
        errors.extend(Self::validate_routes(config));
        errors.extend(Self::validate_response_headers(config));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_filter_settings(settings: &FilterSettings) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if settings.default_error_endpoint.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "filters.default_error_endpoint".to_string(),
            });
        }

        if settings.concurrency_protect_enabled && settings.concurrency_limit == 0 {
            errors.push(ValidationError::InvalidField {
                field: "filters.concurrency_limit".to_string(),
                message: "Must be greater than zero when concurrency protection is enabled"
                    .to_string(),
            });
        }

        for (name, limit) in &settings.concurrency_limits {
            if *limit == 0 {
                errors.push(ValidationError::InvalidField {
                    field: format!("filters.concurrency_limits.{name}"),
                    message: "Must be greater than zero".to_string(),
                });
            }
        }

        errors
    }

    fn validate_routes(config: &ServerConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for (prefix, endpoint) in &config.routes {
            if !prefix.starts_with('/') {
                errors.push(ValidationError::InvalidField {
                    field: format!("route path: {prefix}"),
                    message: "Route paths must start with '/'".to_string(),
                });
            }
            if endpoint.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("routes.{prefix}"),
                });
            }
        }

        // Prefixes that only differ by a trailing slash would shadow each other.
        let mut normalized: Vec<(String, &String)> = config
            .routes
            .keys()
            .map(|p| (p.trim_end_matches('/').to_string(), p))
            .collect();
        normalized.sort();
        for pair in normalized.windows(2) {
            if pair[0].0 == pair[1].0 {
                errors.push(ValidationError::RouteConflict {
                    message: format!("'{}' and '{}' match the same requests", pair[0].1, pair[1].1),
                });
            }
        }

        errors
    }

    fn validate_response_headers(config: &ServerConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (name, value) in &config.response_headers {
            if HeaderName::try_from(name.as_str()).is_err() {
                errors.push(ValidationError::InvalidField {
                    field: format!("response_headers.{name}"),
                    message: "Invalid header name".to_string(),
                });
            }
            if HeaderValue::try_from(value.as_str()).is_err() {
                errors.push(ValidationError::InvalidField {
                    field: format!("response_headers.{name}"),
                    message: "Invalid header value".to_string(),
                });
            }
        }
        errors
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }
        let mut message = format!("{} validation errors:", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("\n  {}. {}", i + 1, error));
        }
        message
    }
}
