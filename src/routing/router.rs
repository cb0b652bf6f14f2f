//! Upstream mount table.
//!
//! Compiled once from `[[upstreams]]` configuration into an immutable table.
//! Resolving a request path yields the upstream and the rewritten upstream
//! path; deny and streaming regexes are evaluated against the rewritten path.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use url::Url;

use crate::config::{HttpClientConfig, StreamFlagMode, UpstreamConfig};
use crate::routing::matcher::{PathPattern, PatternTable};

/// Error compiling the mount table.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("upstream '{name}': invalid base URL: {source}")]
    BaseUrl {
        name: String,
        #[source]
        source: url::ParseError,
    },
    #[error("upstream '{name}': invalid pattern '{pattern}': {source}")]
    Pattern {
        name: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A compiled upstream definition.
#[derive(Debug)]
pub struct Upstream {
    pub name: String,
    pub base_url: Url,
    mount: PathPattern,
    rewrite_root: String,
    fixed_path: Option<String>,
    pub api_key: Option<String>,
    /// Read timeout for this upstream.
    pub timeout: Duration,
    pub health_path: String,
    deny: Vec<Regex>,
    stream: Vec<Regex>,
    pub stream_flag: Option<String>,
    pub stream_flag_mode: StreamFlagMode,
    pub inject_billing: bool,
}

fn compile_all(name: &str, patterns: &[String]) -> Result<Vec<Regex>, RouteError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| RouteError::Pattern {
                name: name.to_string(),
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

impl Upstream {
    pub fn from_config(config: &UpstreamConfig, client: &HttpClientConfig) -> Result<Self, RouteError> {
        let base_url = Url::parse(&config.base_url).map_err(|source| RouteError::BaseUrl {
            name: config.name.clone(),
            source,
        })?;
        Ok(Self {
            name: config.name.clone(),
            base_url,
            mount: PathPattern::prefix(&config.mount),
            rewrite_root: config.rewrite_root.trim_end_matches('/').to_string(),
            fixed_path: config.fixed_path.clone(),
            api_key: config.api_key.clone(),
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(client.read_timeout_secs)),
            health_path: config.health_path.clone(),
            deny: compile_all(&config.name, &config.deny_patterns)?,
            stream: compile_all(&config.name, &config.stream_patterns)?,
            stream_flag: config.stream_flag.clone(),
            stream_flag_mode: config.stream_flag_mode,
            inject_billing: config.inject_billing,
        })
    }

    /// Map a gateway path under this mount onto the upstream's path space.
    pub fn rewrite(&self, path: &str) -> String {
        if let Some(fixed) = &self.fixed_path {
            return fixed.clone();
        }
        let rest = self
            .mount
            .match_end(path)
            .map(|end| &path[end..])
            .unwrap_or("");
        if rest.is_empty() {
            format!("{}/", self.rewrite_root)
        } else {
            format!("{}{}", self.rewrite_root, rest)
        }
    }

    pub fn is_denied(&self, upstream_path: &str) -> bool {
        self.deny.iter().any(|re| re.is_match(upstream_path))
    }

    pub fn is_streaming_path(&self, upstream_path: &str) -> bool {
        self.stream.iter().any(|re| re.is_match(upstream_path))
    }

    /// Absolute upstream URL for a rewritten path and optional query.
    pub fn url_for(&self, upstream_path: &str, query: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        let base = self.base_url.path().trim_end_matches('/');
        url.set_path(&format!("{}{}", base, upstream_path));
        url.set_query(query);
        url
    }
}

/// Result of resolving a request path.
#[derive(Debug, Clone)]
pub struct Route {
    pub upstream: Arc<Upstream>,
    pub upstream_path: String,
}

/// Immutable mount table.
#[derive(Debug, Default)]
pub struct Router {
    mounts: PatternTable<Arc<Upstream>>,
}

impl Router {
    pub fn from_config(upstreams: &[UpstreamConfig], client: &HttpClientConfig) -> Result<Self, RouteError> {
        let mut mounts = PatternTable::new();
        for config in upstreams {
            let upstream = Upstream::from_config(config, client)?;
            tracing::debug!(
                upstream = %upstream.name,
                mount = %config.mount,
                base_url = %upstream.base_url,
                "Mounted upstream"
            );
            mounts.insert(PathPattern::prefix(&config.mount), Arc::new(upstream));
        }
        Ok(Self { mounts })
    }

    /// Find the upstream owning `path` and rewrite it.
    pub fn resolve(&self, path: &str) -> Option<Route> {
        let (_, upstream) = self.mounts.best_match(path)?;
        Some(Route {
            upstream_path: upstream.rewrite(path),
            upstream: upstream.clone(),
        })
    }

    pub fn upstreams(&self) -> impl Iterator<Item = &Arc<Upstream>> {
        self.mounts.iter().map(|(_, upstream)| upstream)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Upstream>> {
        self.upstreams().find(|u| u.name == name)
    }
}
