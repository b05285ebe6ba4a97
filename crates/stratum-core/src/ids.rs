//! String-backed identifier newtypes.
//!
//! Minted ids (`MessageId`, `SummaryId`) are created server-side as
//! `<prefix>_<uuidv7>`, so ids sort lexicographically in creation order.
//! `SessionId` is the odd one out: the client names it and the server only
//! enforces its bounds, so it gets the shared plumbing but no generator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! string_id {
    // Shared plumbing: opaque string wrapper with the usual conversions.
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };

    // Minted ids additionally carry a prefix and a generator.
    ($(#[$meta:meta])* $name:ident, minted $prefix:literal) => {
        string_id!($(#[$meta])* $name);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Mint a fresh id. UUIDv7 keeps concurrent mints unique and
            /// same-session mints time-ordered.
            pub fn new() -> Self {
                Self(format!("{}_{}", Self::PREFIX, Uuid::now_v7()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

string_id! {
    /// Identity of one persisted chat message.
    MessageId, minted "msg"
}

string_id! {
    /// Identity of one persisted summary (either level).
    SummaryId, minted "sum"
}

string_id! {
    /// Opaque client-supplied session name. Never generated server-side.
    SessionId
}

/// Maximum length of a client-supplied session identifier.
pub const SESSION_ID_MAX_LEN: usize = 100;

impl SessionId {
    /// Check the session-id constraints (non-empty, length cap).
    pub fn is_valid(&self) -> bool {
        let raw = self.as_str();
        !raw.is_empty() && raw.len() <= SESSION_ID_MAX_LEN
    }
}
