// src/config/models.rs
use hyper::http::uri::PathAndQuery;
use hyper::Method;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// One upstream service exposed through the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub service: String,
    #[serde(default)]
    pub source_prefix: String,
    #[serde(default)]
    pub target_prefix: String,
    pub upstream: Url,
    /// Forces every forwarded request onto this upstream path (websocket
    /// style passthrough routes).
    #[serde(default)]
    pub fixed_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub consecutive_failure_threshold: u32,
    pub minimum_requests: u32,
    pub failure_ratio: f64,
    pub window_ms: u64,
    pub reset_timeout_ms: u64,
    pub max_half_open_requests: u32,
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            consecutive_failure_threshold: 5,
            minimum_requests: 10,
            failure_ratio: 0.6,
            window_ms: 60_000,
            reset_timeout_ms: 30_000,
            max_half_open_requests: 3,
            half_open_success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub per_attempt_timeout_ms: u64,
    pub inter_attempt_delay_ms: u64,
    pub retryable_methods: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            per_attempt_timeout_ms: 5_000,
            inter_attempt_delay_ms: 100,
            retryable_methods: vec!["GET".to_string(), "HEAD".to_string()],
        }
    }
}

impl RetryConfig {
    pub fn per_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.per_attempt_timeout_ms)
    }

    pub fn inter_attempt_delay(&self) -> Duration {
        Duration::from_millis(self.inter_attempt_delay_ms)
    }

    pub fn methods(&self) -> Result<Vec<Method>, ConfigError> {
        self.retryable_methods
            .iter()
            .map(|m| {
                Method::from_str(&m.to_ascii_uppercase())
                    .map_err(|_| ConfigError::InvalidMethod(m.clone()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
            path: "/metrics".to_string(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one route must be configured")]
    NoRoutes,

    #[error("service {0} is registered more than once")]
    DuplicateService(String),

    #[error("route for {service} has an invalid upstream {upstream}: {reason}")]
    InvalidUpstream {
        service: String,
        upstream: String,
        reason: &'static str,
    },

    #[error("route for {service} has an invalid {field} {path:?}: must be an absolute URI path")]
    InvalidPath {
        service: String,
        field: &'static str,
        path: String,
    },

    #[error("retry.max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("circuit_breaker.failure_ratio must be in (0, 1], got {0}")]
    InvalidFailureRatio(f64),

    #[error("circuit_breaker.{0} must be at least 1")]
    ZeroThreshold(&'static str),

    #[error("unknown HTTP method {0:?}")]
    InvalidMethod(String),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.routes.is_empty() {
            return Err(ConfigError::NoRoutes);
        }

        let mut seen = HashSet::new();
        for route in &self.routes {
            if !seen.insert(route.service.as_str()) {
                return Err(ConfigError::DuplicateService(route.service.clone()));
            }
            route.validate()?;
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        self.retry.methods()?;

        let cb = &self.circuit_breaker;
        if !(cb.failure_ratio > 0.0 && cb.failure_ratio <= 1.0) {
            return Err(ConfigError::InvalidFailureRatio(cb.failure_ratio));
        }
        if cb.consecutive_failure_threshold == 0 {
            return Err(ConfigError::ZeroThreshold("consecutive_failure_threshold"));
        }
        if cb.max_half_open_requests == 0 {
            return Err(ConfigError::ZeroThreshold("max_half_open_requests"));
        }
        if cb.half_open_success_threshold == 0 {
            return Err(ConfigError::ZeroThreshold("half_open_success_threshold"));
        }

        Ok(())
    }
}

impl RouteConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason| ConfigError::InvalidUpstream {
            service: self.service.clone(),
            upstream: self.upstream.to_string(),
            reason,
        };

        match self.upstream.scheme() {
            "http" | "https" => {}
            _ => return Err(invalid("scheme must be http or https")),
        }
        if self.upstream.host_str().is_none() {
            return Err(invalid("missing host"));
        }
        if self.upstream.port_or_known_default().is_none() {
            return Err(invalid("missing port"));
        }

        let paths = [
            ("source_prefix", Some(&self.source_prefix)),
            ("target_prefix", Some(&self.target_prefix)),
            ("fixed_path", self.fixed_path.as_ref()),
        ];
        for (field, path) in paths {
            let Some(path) = path else { continue };
            // Empty prefixes mean passthrough; a fixed path must name something.
            if path.is_empty() && field != "fixed_path" {
                continue;
            }
            if !is_absolute_path(path) {
                return Err(ConfigError::InvalidPath {
                    service: self.service.clone(),
                    field,
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }
}

fn is_absolute_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.contains(&['?', '#'][..])
        && PathAndQuery::from_str(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
listen: "127.0.0.1:8080"
routes:
  - service: tasks
    source_prefix: /api/tasks
    target_prefix: /tasks
    upstream: http://tasks:8081
  - service: notifications
    upstream: http://notifications:8082
    fixed_path: /ws
retry:
  max_attempts: 4
"#;

    #[test]
    fn test_parse_yaml_with_defaults() {
        let config: Config = serde_yaml::from_str(YAML).unwrap();
        config.validate().unwrap();

        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.inter_attempt_delay_ms, 100);
        assert_eq!(config.circuit_breaker.consecutive_failure_threshold, 5);
        assert_eq!(config.routes[1].source_prefix, "");
        assert_eq!(config.routes[1].fixed_path.as_deref(), Some("/ws"));
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_rejects_duplicate_service() {
        let mut config: Config = serde_yaml::from_str(YAML).unwrap();
        config.routes[1].service = "tasks".into();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateService(name)) if name == "tasks"
        ));
    }

    #[test]
    fn test_rejects_unsupported_upstream_scheme() {
        let mut config: Config = serde_yaml::from_str(YAML).unwrap();
        config.routes[0].upstream = Url::parse("ftp://tasks:21").unwrap();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUpstream { .. })
        ));
    }

    #[test]
    fn test_rejects_relative_or_malformed_route_paths() {
        let mut config: Config = serde_yaml::from_str(YAML).unwrap();
        config.routes[0].target_prefix = "tasks".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPath { field: "target_prefix", .. })
        ));

        config.routes[0].target_prefix = "/tasks".into();
        config.routes[0].source_prefix = "/api tasks".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPath { field: "source_prefix", .. })
        ));

        config.routes[0].source_prefix = "/api/tasks?x=1".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPath { field: "source_prefix", .. })
        ));

        config.routes[0].source_prefix = "/api/tasks".into();
        config.routes[1].fixed_path = Some("ws".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPath { field: "fixed_path", .. })
        ));

        config.routes[1].fixed_path = Some(String::new());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPath { field: "fixed_path", .. })
        ));

        config.routes[1].fixed_path = Some("/ws".into());
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_retry_and_breaker_settings() {
        let mut config: Config = serde_yaml::from_str(YAML).unwrap();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroAttempts)));

        config.retry.max_attempts = 1;
        config.retry.retryable_methods = vec!["GE T".into()];
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMethod(_))));

        config.retry.retryable_methods = vec!["get".into()];
        config.circuit_breaker.failure_ratio = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFailureRatio(_))
        ));
    }
}
