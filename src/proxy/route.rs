// src/proxy/route.rs
use crate::config::{ConfigError, RouteConfig};

/// Static description of one upstream service, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRoute {
    pub service_name: String,
    pub source_prefix: String,
    pub target_prefix: String,
    pub upstream_scheme: String,
    pub upstream_host: String,
    pub upstream_port: u16,
    pub fixed_path: Option<String>,
}

impl ServiceRoute {
    pub fn new(
        service_name: impl Into<String>,
        source_prefix: impl Into<String>,
        target_prefix: impl Into<String>,
        upstream_host: impl Into<String>,
        upstream_port: u16,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            source_prefix: source_prefix.into(),
            target_prefix: target_prefix.into(),
            upstream_scheme: "http".to_string(),
            upstream_host: upstream_host.into(),
            upstream_port,
            fixed_path: None,
        }
    }

    pub fn with_fixed_path(mut self, path: impl Into<String>) -> Self {
        self.fixed_path = Some(path.into());
        self
    }

    /// `host:port`, used as the outbound authority and `Host` header.
    pub fn authority(&self) -> String {
        if self.upstream_host.contains(':') {
            format!("[{}]:{}", self.upstream_host, self.upstream_port)
        } else {
            format!("{}:{}", self.upstream_host, self.upstream_port)
        }
    }

    /// Prefix match on whole path segments: `/api/tasks` takes `/api/tasks`
    /// and `/api/tasks/1` but not `/api/tasksecret`.
    pub fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.source_prefix.as_str()) {
            Some(rest) => {
                rest.is_empty() || rest.starts_with('/') || self.source_prefix.ends_with('/')
            }
            None => false,
        }
    }
}

impl TryFrom<&RouteConfig> for ServiceRoute {
    type Error = ConfigError;

    fn try_from(config: &RouteConfig) -> Result<Self, Self::Error> {
        config.validate()?;

        let invalid = |reason| ConfigError::InvalidUpstream {
            service: config.service.clone(),
            upstream: config.upstream.to_string(),
            reason,
        };
        let host = config.upstream.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = config
            .upstream
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;

        Ok(Self {
            service_name: config.service.clone(),
            source_prefix: config.source_prefix.clone(),
            target_prefix: config.target_prefix.clone(),
            upstream_scheme: config.upstream.scheme().to_string(),
            upstream_host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            upstream_port: port,
            fixed_path: config.fixed_path.clone(),
        })
    }
}
