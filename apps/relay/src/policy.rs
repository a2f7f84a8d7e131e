//! Authorization policy for callers and agents
//!
//! The relay asks a policy engine one question per request: given the method,
//! path, headers and remote address, is this allowed? Two query identifiers are
//! used, one for ordinary callers and one for agent registration.
//!
//! [`RulePolicy`] is the bundled engine. It loads JSON documents mapping query
//! identifiers to rules:
//!
//! ```json
//! {
//!   "data.auth.client": { "rules": [ { "headers": { "authorization": "Bearer s3cret" } } ] },
//!   "data.auth.server": { "default": true }
//! }
//! ```

use http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading or evaluating a policy
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Undefined policy query: {0}")]
    UndefinedQuery(String),

    #[error("Failed to read policy {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid policy document {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Policy evaluation failed: {0}")]
    Evaluation(String),
}

/// What the policy sees of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyInput {
    pub method: String,
    pub path: String,
    /// First value of each header
    pub header: HashMap<String, String>,
    pub remote: String,
}

impl PolicyInput {
    pub fn from_parts(parts: &Parts, remote: Option<SocketAddr>) -> Self {
        let mut header = HashMap::new();
        for (name, value) in parts.headers.iter() {
            header
                .entry(name.as_str().to_string())
                .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        Self {
            method: parts.method.as_str().to_string(),
            path: parts.uri.path().to_string(),
            header,
            remote: remote.map(|addr| addr.to_string()).unwrap_or_default(),
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.header
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Policy decision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOutput {
    #[serde(default)]
    pub allow: bool,
}

/// A pluggable decision engine
pub trait AuthPolicy: Send + Sync {
    /// Evaluate `query` against `input`.
    ///
    /// An explicit deny is `Ok` with `allow == false`; `Err` means the
    /// evaluation itself failed.
    fn query(&self, query: &str, input: &PolicyInput) -> Result<PolicyOutput, PolicyError>;
}

/// JWT Claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user ID)
    pub exp: usize,  // Expiration time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<usize>, // Issued at
}

/// Require an HS256 bearer token signed with `secret`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JwtRule {
    pub secret: String,
}

impl JwtRule {
    fn validate(&self, token: &str) -> Option<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        ) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!("Token validation failed: {}", e);
                None
            }
        }
    }
}

/// A single rule. Every condition present must match.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub remote_prefix: Option<String>,
    #[serde(default)]
    pub bearer_jwt: Option<JwtRule>,
}

impl Rule {
    fn matches(&self, input: &PolicyInput) -> bool {
        if let Some(method) = &self.method
            && !method.eq_ignore_ascii_case(&input.method)
        {
            return false;
        }
        if let Some(path) = &self.path
            && path != &input.path
        {
            return false;
        }
        if let Some(prefix) = &self.path_prefix
            && !input.path.starts_with(prefix.as_str())
        {
            return false;
        }
        if let Some(prefix) = &self.remote_prefix
            && !input.remote.starts_with(prefix.as_str())
        {
            return false;
        }
        let headers_match = self
            .headers
            .iter()
            .all(|(name, expected)| input.header(name) == Some(expected.as_str()));
        if !headers_match {
            return false;
        }
        if let Some(jwt) = &self.bearer_jwt {
            let token = input
                .header("authorization")
                .and_then(|value| value.strip_prefix("Bearer "));
            return match token {
                Some(token) => jwt.validate(token).is_some(),
                None => false,
            };
        }
        true
    }
}

/// Rules for one query identifier
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryRules {
    /// Allow when no rule matches
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Rule-based policy engine loaded from JSON documents
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct RulePolicy {
    queries: HashMap<String, QueryRules>,
}

impl RulePolicy {
    /// Parse a single policy document
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Load policy documents from files or directories of `*.json` files.
    /// Documents defining the same query are merged.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self, PolicyError> {
        let mut policy = Self::default();

        for path in paths {
            let path = path.as_ref();
            let io_error = |source| PolicyError::Io {
                path: path.to_path_buf(),
                source,
            };

            if path.is_dir() {
                let mut files = Vec::new();
                for entry in std::fs::read_dir(path).map_err(io_error)? {
                    let file = entry.map_err(io_error)?.path();
                    if file.extension().is_some_and(|ext| ext == "json") {
                        files.push(file);
                    }
                }
                files.sort();
                for file in files {
                    policy.merge(Self::load_file(&file)?);
                }
            } else {
                policy.merge(Self::load_file(path)?);
            }
        }

        Ok(policy)
    }

    fn load_file(path: &Path) -> Result<Self, PolicyError> {
        let text = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| PolicyError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn merge(&mut self, other: Self) {
        for (query, rules) in other.queries {
            let entry = self.queries.entry(query).or_default();
            entry.default |= rules.default;
            entry.rules.extend(rules.rules);
        }
    }

    /// Query identifiers this policy defines
    pub fn queries(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }
}

impl AuthPolicy for RulePolicy {
    fn query(&self, query: &str, input: &PolicyInput) -> Result<PolicyOutput, PolicyError> {
        let rules = self
            .queries
            .get(query)
            .ok_or_else(|| PolicyError::UndefinedQuery(query.to_string()))?;

        let allow = rules.default || rules.rules.iter().any(|rule| rule.matches(input));
        Ok(PolicyOutput { allow })
    }
}
