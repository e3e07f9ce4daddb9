//! Identifier newtypes for connections and users.
//!
//! A [`ConnectionId`] is minted by the gateway for every accepted socket and
//! is never chosen by a client. A [`UserId`] is whatever string the client
//! registers under; the only rule is that it is non-empty.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::ProtocolError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, serde($($serde:tt)*)) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde($($serde)*)]
        pub struct $name(String);

        impl $name {
            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

string_id! {
    /// Opaque handle for one live duplex connection.
    ConnectionId, serde(transparent)
}

string_id! {
    /// Client-supplied identity naming a logical user.
    ///
    /// Deserializing goes through [`UserId::parse`], so an empty string is
    /// rejected however the value is built.
    UserId, serde(try_from = "String", into = "String")
}

impl ConnectionId {
    /// Mint a fresh handle (`conn_` + UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// Wrap an existing handle value.
    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl UserId {
    /// Validate and wrap a client-supplied identity.
    pub fn parse(value: impl Into<String>) -> Result<Self, ProtocolError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ProtocolError::EmptyIdentity);
        }
        Ok(Self(value))
    }
}

impl TryFrom<String> for UserId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for UserId {
    type Error = ProtocolError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("conn_"));
    }

    #[test]
    fn connection_id_from_str() {
        let id = ConnectionId::from("c1");
        assert_eq!(id.as_str(), "c1");
        assert_eq!(id.to_string(), "c1");
    }

    #[test]
    fn user_id_accepts_any_non_empty_string() {
        let id = UserId::parse("alice").unwrap();
        assert_eq!(id.as_str(), "alice");
        assert_eq!(UserId::parse(" ").unwrap().as_str(), " ");
    }

    #[test]
    fn user_id_rejects_empty() {
        assert_matches!(UserId::parse(""), Err(ProtocolError::EmptyIdentity));
        assert_matches!(UserId::try_from(String::new()), Err(ProtocolError::EmptyIdentity));
    }

    #[test]
    fn user_id_serializes_transparently() {
        let id = UserId::parse("bob").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"bob\"");
    }

    #[test]
    fn user_id_deserialize_rejects_empty() {
        let id: UserId = serde_json::from_str("\"dave\"").unwrap();
        assert_eq!(id.as_str(), "dave");

        let err = serde_json::from_str::<UserId>("\"\"").unwrap_err();
        assert!(err.to_string().contains("empty"), "unexpected error: {err}");
    }

    #[test]
    fn received_message_with_empty_sender_does_not_deserialize() {
        let json = r#"{"from":"","message":"hi","timestamp":"2026-01-01T00:00:00.000Z"}"#;
        assert!(serde_json::from_str::<crate::ReceivedMessage>(json).is_err());
    }

    #[test]
    fn connection_id_round_trips_as_plain_string() {
        let id = ConnectionId::from("conn_7");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"conn_7\"");
        assert_eq!(serde_json::from_str::<ConnectionId>(&json).unwrap(), id);
    }

    #[test]
    fn deref_to_str() {
        let id = UserId::parse("carol").unwrap();
        let s: &str = &id;
        assert_eq!(s, "carol");
        assert_eq!(id.len(), 5);
    }
}
