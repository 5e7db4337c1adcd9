use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Marker carried in the `kind` field of every connection request.
///
/// This string and the field names below are the compatibility surface
/// out-of-tree plugins depend on; they must never be renamed.
pub const SUB_REQUEST_KIND: &str = "sub-request";

/// Marker carried in the `kind` field of every host emission.
pub const SUB_EMISSION_KIND: &str = "sub-emission";

/// One-shot connection request a plugin sends to the host, accompanied by
/// exactly one transferable channel endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub kind: String,
    #[serde(rename = "subscriptionKinds")]
    pub subscription_kinds: Vec<String>,
}

impl SubscriptionRequest {
    pub fn new<I>(kinds: I) -> Self
    where
        I: IntoIterator<Item = SubscriptionKind>,
    {
        Self {
            kind: SUB_REQUEST_KIND.to_string(),
            subscription_kinds: kinds.into_iter().map(|k| k.as_str().to_string()).collect(),
        }
    }
}

/// One host-to-plugin message, sent on every change of the subscribed value
/// for as long as the channel stays open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionEmission {
    pub kind: String,
    #[serde(rename = "subscriptionKind")]
    pub subscription_kind: String,
    pub data: Value,
}

impl SubscriptionEmission {
    pub fn new(subscription_kind: SubscriptionKind, data: Value) -> Self {
        Self {
            kind: SUB_EMISSION_KIND.to_string(),
            subscription_kind: subscription_kind.as_str().to_string(),
            data,
        }
    }
}

/// Closed set of data streams a plugin may subscribe to. Unknown strings are
/// a protocol violation, not a silently-ignored case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// The host's current principal, or null when nobody is signed in.
    AuthStatus,
}

impl SubscriptionKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            SubscriptionKind::AuthStatus => "auth-status",
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auth-status" => Ok(SubscriptionKind::AuthStatus),
            other => Err(ProtocolError::UnknownSubscriptionKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown subscription kind `{0}`")]
    UnknownSubscriptionKind(String),
}
