//! Caller identity keys.

use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::error::TollgateError;

/// A key that identifies whose quota an action is charged to.
///
/// The string form is `<kind>:<id>`, e.g. `ip:10.0.0.1` or `user:42`, and is
/// what strategies receive as their key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    /// An authenticated user
    User(String),
    /// A verified API key's owning client
    ApiKey(String),
    /// A self-declared client identifier
    Client(String),
    /// A remote network address
    Ip(String),
    /// The shared bucket for callers with no identity at all
    Global,
}

impl ClientKey {
    /// Convert the key to its string representation.
    pub fn to_string_key(&self) -> String {
        self.to_string()
    }

    /// The `<kind>` prefix.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientKey::User(_) => "user",
            ClientKey::ApiKey(_) => "api_key",
            ClientKey::Client(_) => "client",
            ClientKey::Ip(_) => "ip",
            ClientKey::Global => "global",
        }
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKey::User(id)
            | ClientKey::ApiKey(id)
            | ClientKey::Client(id)
            | ClientKey::Ip(id) => write!(f, "{}:{}", self.kind(), id),
            ClientKey::Global => write!(f, "global:default"),
        }
    }
}

impl FromStr for ClientKey {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| TollgateError::invalid(format!("client key {s:?} has no kind prefix")))?;
        if id.is_empty() {
            return Err(TollgateError::invalid(format!("client key {s:?} has an empty id")));
        }
        match kind {
            "user" => Ok(ClientKey::User(id.to_string())),
            "api_key" => Ok(ClientKey::ApiKey(id.to_string())),
            "client" => Ok(ClientKey::Client(id.to_string())),
            "ip" => Ok(ClientKey::Ip(id.to_string())),
            "global" if id == "default" => Ok(ClientKey::Global),
            _ => Err(TollgateError::invalid(format!("unknown client key kind {kind:?}"))),
        }
    }
}

/// Whatever the request layer managed to learn about a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    /// User id taken from a verified token
    pub user_id: Option<String>,
    /// Client id bound to a verified API key
    pub api_key_owner: Option<String>,
    /// Identifier the client declared for itself
    pub client_id: Option<String>,
    /// Remote address of the connection
    pub remote_addr: Option<String>,
}

impl CallerIdentity {
    /// Pick the most trustworthy key available: user, then API key owner,
    /// then declared client id, then remote address, then the global key.
    pub fn client_key(&self) -> ClientKey {
        fn present(value: &Option<String>) -> Option<&str> {
            value.as_deref().filter(|v| !v.is_empty())
        }

        if let Some(user) = present(&self.user_id) {
            return ClientKey::User(user.to_string());
        }
        if let Some(owner) = present(&self.api_key_owner) {
            return ClientKey::ApiKey(owner.to_string());
        }
        if let Some(client) = present(&self.client_id) {
            return ClientKey::Client(client.to_string());
        }
        if let Some(addr) = present(&self.remote_addr) {
            warn!(remote_addr = %addr, "Unidentified client, using address-based rate limit key");
            return ClientKey::Ip(addr.to_string());
        }
        warn!("Caller has no identity, using the global rate limit key");
        ClientKey::Global
    }
}
