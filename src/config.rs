use crate::error::{Result, StatError};
use crate::language::LanguageRegistry;
use crate::remote::RetryPolicy;
use regex::Regex;
use reqwest::Url;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    Gitlab,
}

impl FromStr for ServerKind {
    type Err = StatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gitlab" => Ok(ServerKind::Gitlab),
            _ => Err(StatError::UnknownServer(s.to_string())),
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerKind::Gitlab => f.write_str("gitlab"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Concurrency {
    /// Repositories processed at the same time.
    pub repositories: usize,
    /// Blame requests in flight at the same time, across all repositories.
    pub files: usize,
}

impl Default for Concurrency {
    fn default() -> Self {
        Self {
            repositories: 8,
            files: 32,
        }
    }
}

/// Everything one aggregation run needs, assembled before it starts.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub aliases: BTreeMap<String, Vec<String>>,
    pub languages: LanguageRegistry,
    pub query: Option<String>,
    pub exclude: Option<Regex>,
    pub concurrency: Concurrency,
}

/// Connection parameters for the remote service.
#[derive(Debug, Clone)]
pub struct Connection {
    pub server: ServerKind,
    pub host: Url,
    pub token: String,
    pub rate_limit: u32,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

/// Parses repeated `key:value` specifications into `key -> [values]`,
/// keeping values in the order given.
pub fn parse_alias_specs<S: AsRef<str>>(specs: &[S]) -> Result<BTreeMap<String, Vec<String>>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for spec in specs {
        let spec = spec.as_ref();
        let parts: Vec<&str> = spec.split(':').collect();
        let [key, value] = parts.as_slice() else {
            return Err(StatError::InvalidAlias(spec.to_string()));
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(StatError::InvalidAlias(spec.to_string()));
        }
        map.entry(key.to_string()).or_default().push(value.to_string());
    }
    Ok(map)
}

pub fn parse_languages<S: AsRef<str>>(specs: &[S]) -> Result<LanguageRegistry> {
    Ok(LanguageRegistry::new(parse_alias_specs(specs)?))
}

/// Parses the server URL, assuming `https` when no scheme is given.
pub fn normalize_host(host: &str) -> Result<Url> {
    let host = host.trim();
    if host.is_empty() {
        return Err(StatError::Config("missing host; pass --host or set GITLAB_HOST".to_string()));
    }
    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{host}")
    };
    let url = Url::parse(&with_scheme).map_err(|e| StatError::InvalidHost(host.to_string(), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(StatError::InvalidHost(host.to_string(), "expected an http(s) URL".to_string()));
    }
    Ok(url)
}

pub fn compile_exclude(pattern: Option<&str>) -> Result<Option<Regex>> {
    match pattern.filter(|p| !p.is_empty()) {
        Some(p) => Ok(Some(Regex::new(p)?)),
        None => Ok(None),
    }
}
