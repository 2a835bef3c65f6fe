use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

pub const DEFAULT_SCHEME: &str = "wss";

pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const CF_ACCESS_CLIENT_ID_HEADER: &str = "CF-Access-Client-Id";
pub const CF_ACCESS_CLIENT_SECRET_HEADER: &str = "CF-Access-Client-Secret";

/// Remote protocol spoken by a server. Both variants expose the same
/// client-facing behavior; they differ only in capability flags.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    #[default]
    Acp,
    Codex,
}

impl ProtocolKind {
    /// Whether opening an existing session needs an explicit load round trip.
    /// Codex servers replay a thread as soon as it is selected.
    pub fn requires_explicit_load(self) -> bool {
        match self {
            ProtocolKind::Acp => true,
            ProtocolKind::Codex => false,
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolKind::Acp => write!(f, "acp"),
            ProtocolKind::Codex => write!(f, "codex"),
        }
    }
}

impl std::str::FromStr for ProtocolKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "acp" => Ok(ProtocolKind::Acp),
            "codex" => Ok(ProtocolKind::Codex),
            _ => Err(format!("Unknown protocol: {}", s)),
        }
    }
}

fn default_working_directory() -> PathBuf {
    PathBuf::from("/")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerProfile {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub scheme: String,
    pub host: String,
    #[serde(default)]
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cf_access_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cf_access_client_secret: Option<String>,
    #[serde(default = "default_working_directory")]
    pub working_directory: PathBuf,
    #[serde(default)]
    pub protocol: ProtocolKind,
}

impl ServerProfile {
    pub fn new(name: impl Into<String>, scheme: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            scheme: scheme.into(),
            host: host.into(),
            token: String::new(),
            cf_access_client_id: None,
            cf_access_client_secret: None,
            working_directory: default_working_directory(),
            protocol: ProtocolKind::default(),
        }
    }

    /// Endpoint derived from scheme and host. A host that already carries a
    /// scheme (`ws://…`, `https://…`) is taken verbatim. Empty when the host
    /// is empty.
    pub fn endpoint_url_string(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        if host.is_empty() {
            return String::new();
        }
        if host.contains("://") {
            return host.to_string();
        }
        let scheme = self.scheme.trim().trim_end_matches("://");
        let scheme = if scheme.is_empty() {
            DEFAULT_SCHEME
        } else {
            scheme
        };
        format!("{scheme}://{host}")
    }

    /// Gateway auth is enabled only when both halves of the credential are set.
    pub fn has_gateway_auth(&self) -> bool {
        non_empty(&self.cf_access_client_id).is_some()
            && non_empty(&self.cf_access_client_secret).is_some()
    }

    /// Headers every transport call attaches for this profile.
    pub fn auth_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if !self.token.trim().is_empty() {
            headers.push((
                AUTHORIZATION_HEADER.to_string(),
                format!("Bearer {}", self.token.trim()),
            ));
        }
        if let (Some(id), Some(secret)) = (
            non_empty(&self.cf_access_client_id),
            non_empty(&self.cf_access_client_secret),
        ) {
            headers.push((CF_ACCESS_CLIENT_ID_HEADER.to_string(), id.to_string()));
            headers.push((
                CF_ACCESS_CLIENT_SECRET_HEADER.to_string(),
                secret.to_string(),
            ));
        }
        headers
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
